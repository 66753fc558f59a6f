//! In-process emulation of the reconstruction backend.
//!
//! Progress scripts are chosen by the uploaded filename:
//!
//! | Filename      | Progress stream                                  |
//! |---------------|--------------------------------------------------|
//! | `fail.mp4`    | one running frame, then `failed`                 |
//! | `broken.mp4`  | one running frame, then the body ends            |
//! | `chunky.mp4`  | raw bytes with comments, junk and split frames   |
//! | `flood.mp4`   | one running frame, then a line that never ends   |
//! | anything else | three stages ending in `completed`               |

#![allow(dead_code)]

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};

use axum::body::{Body, Bytes};
use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

/// What the fake backend has seen, for assertions.
#[derive(Debug, Default)]
pub struct BackendState {
    /// Uploaded files by name.
    pub uploads: HashMap<String, Vec<u8>>,
    /// Content type of each upload part.
    pub upload_types: HashMap<String, String>,
    /// Quality label of every estimate / process request, in order.
    pub qualities: Vec<String>,
    /// Task id to uploaded filename.
    pub tasks: HashMap<String, String>,
}

pub type Shared = Arc<Mutex<BackendState>>;

/// Start the fake backend on an ephemeral port. Returns its base URL.
pub async fn spawn_backend() -> (String, Shared) {
    let state: Shared = Arc::default();
    let app = Router::new()
        .route("/upload_video", post(upload_video))
        .route("/estimate_time", post(estimate_time))
        .route("/process_video", post(process_video))
        .route("/progress/{task_id}", get(progress))
        .route("/video_result/{task_id}", get(video_result))
        .route("/export/{task_id}/{format}", get(export))
        .with_state(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), state)
}

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

async fn upload_video(State(state): State<Shared>, mut multipart: Multipart) -> Response {
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() != Some("video") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().unwrap_or_default().to_string();
        let Ok(bytes) = field.bytes().await else {
            return error(StatusCode::BAD_REQUEST, "Unreadable file");
        };
        if filename.is_empty() || bytes.is_empty() {
            return error(StatusCode::BAD_REQUEST, "No selected file");
        }

        let mut state = state.lock().unwrap();
        state.uploads.insert(filename.clone(), bytes.to_vec());
        state.upload_types.insert(filename.clone(), content_type);
        return Json(json!({
            "message": "File uploaded successfully",
            "filename": filename,
        }))
        .into_response();
    }
    error(StatusCode::BAD_REQUEST, "No file part")
}

async fn estimate_time(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    let quality = body["quality"].as_str().unwrap_or_default().to_string();
    let minutes = match quality.as_str() {
        "low" => 1.5,
        "medium" => 3.0,
        "high" => 4.5,
        _ => return error(StatusCode::BAD_REQUEST, "Unknown quality"),
    };
    state.lock().unwrap().qualities.push(quality);
    Json(json!({ "estimated_minutes": minutes })).into_response()
}

async fn process_video(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    let filename = body["filename"].as_str().unwrap_or_default().to_string();
    let quality = body["quality"].as_str().unwrap_or_default().to_string();

    let mut state = state.lock().unwrap();
    if !state.uploads.contains_key(&filename) {
        return error(StatusCode::NOT_FOUND, "File not found");
    }
    let task_id = uuid::Uuid::new_v4().to_string();
    state.qualities.push(quality);
    state.tasks.insert(task_id.clone(), filename);
    Json(json!({ "message": "Processing started", "task_id": task_id })).into_response()
}

fn frame(progress: i64, line: &str, status: &str) -> Event {
    Event::default().data(json!({ "progress": progress, "line": line, "status": status }).to_string())
}

async fn progress(State(state): State<Shared>, Path(task_id): Path<String>) -> Response {
    let Some(filename) = state.lock().unwrap().tasks.get(&task_id).cloned() else {
        return error(StatusCode::NOT_FOUND, "Unknown task");
    };

    let frames = match filename.as_str() {
        "fail.mp4" => vec![
            frame(10, "Extract frames", "extracting_frames"),
            frame(10, "decoder error", "failed"),
        ],
        "broken.mp4" => vec![frame(30, "Extract frames", "running")],
        "chunky.mp4" => return chunky_progress(),
        "flood.mp4" => return flood_progress(),
        _ => vec![
            frame(10, "Extract frames", "extracting_frames"),
            frame(55, "Run colmap2nerf.py", "running_colmap"),
            frame(100, "Done", "completed"),
        ],
    };
    Sse::new(futures::stream::iter(frames.into_iter().map(Ok::<_, Infallible>))).into_response()
}

fn chunky_progress() -> Response {
    let chunks: Vec<Result<Bytes, Infallible>> = vec![
        Ok(Bytes::from_static(b": keep-alive\n\n")),
        Ok(Bytes::from_static(b"data: not json\n\n")),
        Ok(Bytes::from_static(b"data: {\"progress\":40,\"line\":\"Ex")),
        Ok(Bytes::from_static(b"tract\",\"status\":\"running\"}\r\n")),
        Ok(Bytes::from_static(
            b"\r\ndata: {\"progress\":100,\"line\":\"Done\",\"status\":\"completed\"}\n\n",
        )),
    ];
    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .body(Body::from_stream(futures::stream::iter(chunks)))
        .unwrap()
}

fn flood_progress() -> Response {
    let head = Bytes::from_static(
        b"data: {\"progress\":20,\"line\":\"Extract frames\",\"status\":\"running\"}\n\ndata: ",
    );
    let filler = Bytes::from(vec![b'x'; 64 * 1024]);
    let chunks = std::iter::once(head)
        .chain(std::iter::repeat(filler).take(32))
        .map(Ok::<_, Infallible>);
    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .body(Body::from_stream(futures::stream::iter(chunks)))
        .unwrap()
}

async fn video_result(State(state): State<Shared>, Path(task_id): Path<String>) -> Response {
    if !state.lock().unwrap().tasks.contains_key(&task_id) {
        return error(StatusCode::NOT_FOUND, "Video not found");
    }
    ([(header::CONTENT_TYPE, "video/mp4")], "fake mp4 payload").into_response()
}

async fn export(
    State(state): State<Shared>,
    Path((task_id, format)): Path<(String, String)>,
) -> Response {
    if !state.lock().unwrap().tasks.contains_key(&task_id) {
        return error(StatusCode::NOT_FOUND, "Unknown task");
    }
    match format.as_str() {
        "obj" => (
            [(header::CONTENT_DISPOSITION, "attachment; filename=\"scene.obj\"")],
            "v 0 0 0\n",
        )
            .into_response(),
        "ply" => "ply\nformat ascii 1.0\n".into_response(),
        _ => error(StatusCode::NOT_FOUND, "Export not ready"),
    }
}
