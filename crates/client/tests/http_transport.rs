//! HTTP/SSE transport against an in-process backend.

mod common;

use assert_matches::assert_matches;
use bytes::Bytes;
use futures::TryStreamExt;
use v2n_client::{
    AssetUpload, Capabilities, HttpTransport, LifecycleClient, LifecycleError, ProgressItem,
    Transport, TransportError,
};
use v2n_core::export::ExportFormat;
use v2n_core::lifecycle::{Estimate, LifecycleState};
use v2n_core::progress::ProgressEvent;
use v2n_core::quality::QualityPreset;
use v2n_core::types::{AssetId, JobId};

fn video(name: &str) -> AssetUpload {
    AssetUpload::new(name, b"\x00\x00\x00\x18ftypmp42".to_vec())
}

async fn collect_items(transport: &HttpTransport, job_id: &JobId) -> Vec<ProgressItem> {
    let mut subscription = transport.subscribe_progress(job_id).await.unwrap();
    let mut items = Vec::new();
    while let Some(item) = subscription.next().await {
        items.push(item);
    }
    items
}

/// Upload `name` and start it, returning the task id.
async fn started(transport: &HttpTransport, name: &str) -> JobId {
    let receipt = transport.upload_asset(video(name)).await.unwrap();
    transport
        .start_processing(&receipt.asset_id, QualityPreset::Medium)
        .await
        .unwrap()
        .job_id
}

// ---------------------------------------------------------------------------
// Request / response calls
// ---------------------------------------------------------------------------

#[tokio::test]
async fn upload_sends_multipart_video_field() {
    let (url, state) = common::spawn_backend().await;
    let transport = HttpTransport::new(&url).unwrap();

    let receipt = transport.upload_asset(video("video123.mp4")).await.unwrap();

    assert_eq!(receipt.asset_id.as_str(), "video123.mp4");
    assert_eq!(receipt.message.as_deref(), Some("File uploaded successfully"));
    let state = state.lock().unwrap();
    assert_eq!(state.uploads["video123.mp4"], b"\x00\x00\x00\x18ftypmp42");
    assert_eq!(state.upload_types["video123.mp4"], "video/mp4");
}

#[tokio::test]
async fn upload_honours_explicit_content_type() {
    let (url, state) = common::spawn_backend().await;
    let transport = HttpTransport::new(&url).unwrap();

    transport
        .upload_asset(video("clip.mov").with_content_type("video/quicktime"))
        .await
        .unwrap();
    assert_eq!(state.lock().unwrap().upload_types["clip.mov"], "video/quicktime");
}

#[tokio::test]
async fn rejected_upload_is_api_error() {
    let (url, _) = common::spawn_backend().await;
    let transport = HttpTransport::new(&url).unwrap();

    let err = transport
        .upload_asset(AssetUpload::new("empty.mp4", Vec::new()))
        .await
        .unwrap_err();
    assert_matches!(err, TransportError::Api { status: 400, ref body } if body.contains("No selected file"));
}

#[tokio::test]
async fn estimate_uses_quality_label() {
    let (url, state) = common::spawn_backend().await;
    let transport = HttpTransport::new(&url).unwrap();
    let asset = transport.upload_asset(video("a.mp4")).await.unwrap().asset_id;

    let minutes = transport
        .estimate_duration(&asset, QualityPreset::High)
        .await
        .unwrap();
    assert_eq!(minutes, 4.5);
    assert_eq!(state.lock().unwrap().qualities, vec!["high"]);
}

#[tokio::test]
async fn start_returns_server_task_id() {
    let (url, state) = common::spawn_backend().await;
    let transport = HttpTransport::new(&url).unwrap();
    let asset = transport.upload_asset(video("a.mp4")).await.unwrap().asset_id;

    let receipt = transport
        .start_processing(&asset, QualityPreset::Low)
        .await
        .unwrap();

    assert!(uuid::Uuid::parse_str(receipt.job_id.as_str()).is_ok());
    assert_eq!(receipt.message.as_deref(), Some("Processing started"));
    let state = state.lock().unwrap();
    assert_eq!(state.qualities, vec!["low"]);
    assert_eq!(state.tasks[receipt.job_id.as_str()], "a.mp4");
}

#[tokio::test]
async fn start_for_unknown_asset_is_api_error() {
    let (url, _) = common::spawn_backend().await;
    let transport = HttpTransport::new(&url).unwrap();

    let err = transport
        .start_processing(&AssetId::from("missing.mp4"), QualityPreset::Medium)
        .await
        .unwrap_err();
    assert_matches!(err, TransportError::Api { status: 404, .. });
}

#[tokio::test]
async fn unreachable_backend_is_request_error() {
    let transport = HttpTransport::new("http://127.0.0.1:1").unwrap();
    let err = transport.upload_asset(video("a.mp4")).await.unwrap_err();
    assert_matches!(err, TransportError::Request(_));
}

// ---------------------------------------------------------------------------
// Progress stream
// ---------------------------------------------------------------------------

#[tokio::test]
async fn progress_stream_delivers_events_in_order() {
    let (url, _) = common::spawn_backend().await;
    let transport = HttpTransport::new(&url).unwrap();
    let job = started(&transport, "video123.mp4").await;

    let items = collect_items(&transport, &job).await;
    assert_eq!(
        items,
        vec![
            ProgressItem::Event(ProgressEvent::new(10, "Extract frames", "extracting_frames")),
            ProgressItem::Event(ProgressEvent::new(55, "Run colmap2nerf.py", "running_colmap")),
            ProgressItem::Event(ProgressEvent::new(100, "Done", "completed")),
        ]
    );
}

#[tokio::test]
async fn progress_stream_stops_after_failure() {
    let (url, _) = common::spawn_backend().await;
    let transport = HttpTransport::new(&url).unwrap();
    let job = started(&transport, "fail.mp4").await;

    let items = collect_items(&transport, &job).await;
    assert_eq!(items.len(), 2);
    assert_eq!(
        items[1],
        ProgressItem::Event(ProgressEvent::new(10, "decoder error", "failed"))
    );
}

#[tokio::test]
async fn truncated_stream_reports_error() {
    let (url, _) = common::spawn_backend().await;
    let transport = HttpTransport::new(&url).unwrap();
    let job = started(&transport, "broken.mp4").await;

    let items = collect_items(&transport, &job).await;
    assert_eq!(items.len(), 2);
    assert_eq!(
        items[0],
        ProgressItem::Event(ProgressEvent::new(30, "Extract frames", "running"))
    );
    assert_matches!(items[1], ProgressItem::Error(_));
}

#[tokio::test]
async fn split_and_malformed_frames_are_handled() {
    let (url, _) = common::spawn_backend().await;
    let transport = HttpTransport::new(&url).unwrap();
    let job = started(&transport, "chunky.mp4").await;

    let items = collect_items(&transport, &job).await;
    assert_eq!(
        items,
        vec![
            ProgressItem::Event(ProgressEvent::new(40, "Extract", "running")),
            ProgressItem::Event(ProgressEvent::new(100, "Done", "completed")),
        ]
    );
}

#[tokio::test]
async fn oversized_frame_ends_the_stream() {
    let (url, _) = common::spawn_backend().await;
    let transport = HttpTransport::new(&url).unwrap();
    let job = started(&transport, "flood.mp4").await;

    let items = collect_items(&transport, &job).await;
    assert_eq!(
        items,
        vec![
            ProgressItem::Event(ProgressEvent::new(20, "Extract frames", "running")),
            ProgressItem::Error("progress frame too large".into()),
        ]
    );
}

#[tokio::test]
async fn progress_for_unknown_task_is_api_error() {
    let (url, _) = common::spawn_backend().await;
    let transport = HttpTransport::new(&url).unwrap();

    let err = transport
        .subscribe_progress(&JobId::from("nope"))
        .await
        .unwrap_err();
    assert_matches!(err, TransportError::Api { status: 404, .. });
}

// ---------------------------------------------------------------------------
// Post-completion downloads
// ---------------------------------------------------------------------------

#[tokio::test]
async fn export_uses_content_disposition_filename() {
    let (url, _) = common::spawn_backend().await;
    let transport = HttpTransport::new(&url).unwrap();
    let job = started(&transport, "a.mp4").await;

    let artifact = transport
        .export_artifact(&job, ExportFormat::Obj)
        .await
        .unwrap();
    assert_eq!(artifact.filename, "scene.obj");
    assert_eq!(artifact.bytes, Bytes::from_static(b"v 0 0 0\n"));
    assert_eq!(artifact.format, ExportFormat::Obj);
}

#[tokio::test]
async fn export_without_header_uses_default_name() {
    let (url, _) = common::spawn_backend().await;
    let transport = HttpTransport::new(&url).unwrap();
    let job = started(&transport, "a.mp4").await;

    let artifact = transport
        .export_artifact(&job, ExportFormat::Ply)
        .await
        .unwrap();
    assert_eq!(artifact.filename, "model.ply");
}

#[tokio::test]
async fn export_not_ready_is_api_error() {
    let (url, _) = common::spawn_backend().await;
    let transport = HttpTransport::new(&url).unwrap();
    let job = started(&transport, "a.mp4").await;

    let err = transport
        .export_artifact(&job, ExportFormat::Glb)
        .await
        .unwrap_err();
    assert_matches!(err, TransportError::Api { status: 404, .. });
}

#[tokio::test]
async fn result_media_is_streamed() {
    let (url, _) = common::spawn_backend().await;
    let transport = HttpTransport::new(&url).unwrap();
    let job = started(&transport, "a.mp4").await;

    let chunks: Vec<Bytes> = transport
        .fetch_result_media(&job)
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(chunks.concat(), b"fake mp4 payload");
}

// ---------------------------------------------------------------------------
// Lifecycle client over HTTP
// ---------------------------------------------------------------------------

#[tokio::test]
async fn lifecycle_client_end_to_end() {
    let (url, _) = common::spawn_backend().await;
    let transport = HttpTransport::new(&url).unwrap();
    let mut client = LifecycleClient::new(transport, Capabilities::default());

    let asset = client.select_asset(video("video123.mp4")).await.unwrap();
    assert_eq!(client.lifecycle().estimate(), Estimate::Unknown);
    client
        .estimate_duration(&asset, QualityPreset::Medium)
        .await
        .unwrap();
    assert_eq!(client.lifecycle().estimate(), Estimate::Minutes(3.0));

    let job = client
        .start_job(&asset, QualityPreset::Medium)
        .await
        .unwrap();
    assert_eq!(client.wait_for_terminal().await.unwrap(), job);
    assert_eq!(client.state(), LifecycleState::Completed);
    assert_eq!(client.lifecycle().percent(), 100);

    let artifact = client
        .export_artifact(&job, ExportFormat::Obj)
        .await
        .unwrap();
    assert_eq!(artifact.filename, "scene.obj");
}

#[tokio::test]
async fn lifecycle_client_reports_server_failure() {
    let (url, _) = common::spawn_backend().await;
    let mut client = LifecycleClient::new(HttpTransport::new(&url).unwrap(), Capabilities::default());

    let asset = client.select_asset(video("fail.mp4")).await.unwrap();
    client
        .start_job(&asset, QualityPreset::Medium)
        .await
        .unwrap();

    assert_matches!(
        client.wait_for_terminal().await,
        Err(LifecycleError::JobFailed { ref reason, .. }) if reason == "decoder error"
    );
    assert_eq!(client.lifecycle().percent(), 10);
}

#[tokio::test]
async fn lifecycle_client_reports_lost_stream() {
    let (url, _) = common::spawn_backend().await;
    let mut client = LifecycleClient::new(HttpTransport::new(&url).unwrap(), Capabilities::default());

    let asset = client.select_asset(video("broken.mp4")).await.unwrap();
    client
        .start_job(&asset, QualityPreset::Medium)
        .await
        .unwrap();

    assert_matches!(
        client.wait_for_terminal().await,
        Err(LifecycleError::StatusUnknown { .. })
    );
    assert_eq!(client.state(), LifecycleState::StatusUnknown);
    assert_eq!(client.lifecycle().percent(), 30);
}
