//! HTTP binding of [`Transport`] for the reconstruction backend.
//!
//! | Capability        | Request                              |
//! |-------------------|--------------------------------------|
//! | upload            | `POST /upload_video` (multipart)     |
//! | estimate          | `POST /estimate_time`                |
//! | start             | `POST /process_video`                |
//! | progress          | `GET /progress/{task_id}` (SSE)      |
//! | result media      | `GET /video_result/{task_id}`        |
//! | export            | `GET /export/{task_id}/{format}`     |

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_DISPOSITION, CONTENT_TYPE};
use reqwest::multipart;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use v2n_core::export::{suggested_filename, ExportFormat};
use v2n_core::progress::parse_progress;
use v2n_core::quality::QualityPreset;
use v2n_core::types::{AssetId, JobId};

use crate::config::ClientConfig;
use crate::sse::SseDecoder;
use crate::subscription::{ProgressSender, ProgressSubscription};
use crate::transport::{
    AssetUpload, ExportArtifact, MediaStream, StartReceipt, Transport, TransportError,
    UploadReceipt,
};

/// Multipart field the backend reads the video from.
const UPLOAD_FIELD: &str = "video";

/// MIME type used when the upload does not name one.
const DEFAULT_VIDEO_MIME: &str = "video/mp4";

/// Default number of progress events buffered per subscription.
const DEFAULT_PROGRESS_BUFFER: usize = 64;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    message: Option<String>,
    filename: String,
}

#[derive(Debug, Serialize)]
struct JobRequest<'a> {
    filename: &'a str,
    quality: QualityPreset,
}

#[derive(Debug, Deserialize)]
struct EstimateResponse {
    estimated_minutes: f64,
}

#[derive(Debug, Deserialize)]
struct ProcessResponse {
    #[serde(default)]
    message: Option<String>,
    task_id: String,
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// HTTP client for one backend instance.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
    request_timeout: Option<Duration>,
    progress_buffer: usize,
}

impl HttpTransport {
    /// Create a transport for the backend at `base_url`, e.g.
    /// `http://localhost:5000`.
    pub fn new(base_url: &str) -> Result<Self, TransportError> {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Create a transport reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, base_url: &str) -> Result<Self, TransportError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| TransportError::InvalidUrl(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(TransportError::InvalidUrl(base_url.to_string()));
        }
        Ok(Self {
            client,
            base_url,
            request_timeout: None,
            progress_buffer: DEFAULT_PROGRESS_BUFFER,
        })
    }

    /// Build a transport from [`ClientConfig`].
    pub fn from_config(config: &ClientConfig) -> Result<Self, TransportError> {
        let mut transport = Self::new(&config.server_url)?;
        transport.request_timeout = Some(config.request_timeout());
        transport.progress_buffer = config.progress_buffer;
        Ok(transport)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ---- private helpers ----

    /// Join path segments onto the base URL, escaping each one.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, TransportError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| TransportError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn with_timeout(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.request_timeout {
            Some(timeout) => request.timeout(timeout),
            None => request,
        }
    }

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`TransportError::Api`]
    /// containing the status and body text on failure.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(TransportError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, TransportError> {
        let response = Self::ensure_success(response).await?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| TransportError::Decode(e.to_string()))
    }

    async fn post_job_request<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        asset_id: &AssetId,
        quality: QualityPreset,
    ) -> Result<T, TransportError> {
        let body = JobRequest {
            filename: asset_id.as_str(),
            quality,
        };
        let request = self.client.post(self.endpoint(&[path])?).json(&body);
        let response = self.with_timeout(request).send().await?;
        Self::parse_response(response).await
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn upload_asset(&self, upload: AssetUpload) -> Result<UploadReceipt, TransportError> {
        let mime = upload
            .content_type
            .as_deref()
            .unwrap_or(DEFAULT_VIDEO_MIME)
            .to_string();
        let part = multipart::Part::bytes(upload.bytes)
            .file_name(upload.file_name)
            .mime_str(&mime)?;
        let form = multipart::Form::new().part(UPLOAD_FIELD, part);

        // Uploads are not bounded by the request timeout: videos are large.
        let response = self
            .client
            .post(self.endpoint(&["upload_video"])?)
            .multipart(form)
            .send()
            .await?;
        let body: UploadResponse = Self::parse_response(response).await?;

        if body.filename.trim().is_empty() {
            return Err(TransportError::Decode(
                "upload response carried an empty filename".into(),
            ));
        }
        Ok(UploadReceipt {
            asset_id: AssetId::new(body.filename),
            message: body.message,
        })
    }

    async fn estimate_duration(
        &self,
        asset_id: &AssetId,
        quality: QualityPreset,
    ) -> Result<f64, TransportError> {
        let body: EstimateResponse = self
            .post_job_request("estimate_time", asset_id, quality)
            .await?;
        Ok(body.estimated_minutes)
    }

    async fn start_processing(
        &self,
        asset_id: &AssetId,
        quality: QualityPreset,
    ) -> Result<StartReceipt, TransportError> {
        let body: ProcessResponse = self
            .post_job_request("process_video", asset_id, quality)
            .await?;
        if body.task_id.trim().is_empty() {
            return Err(TransportError::Decode(
                "start response carried an empty task_id".into(),
            ));
        }
        Ok(StartReceipt {
            job_id: JobId::new(body.task_id),
            message: body.message,
        })
    }

    async fn subscribe_progress(
        &self,
        job_id: &JobId,
    ) -> Result<ProgressSubscription, TransportError> {
        let response = self
            .client
            .get(self.endpoint(&["progress", job_id.as_str()])?)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !content_type.is_empty() && !content_type.starts_with("text/event-stream") {
            return Err(TransportError::Stream(format!(
                "expected an event stream, got '{content_type}'"
            )));
        }

        let (sender, subscription) =
            ProgressSubscription::channel(job_id.clone(), self.progress_buffer);
        tokio::spawn(read_progress_stream(response, job_id.clone(), sender));

        tracing::debug!(job_id = %job_id, "Progress stream opened");
        Ok(subscription)
    }

    async fn fetch_result_media(&self, job_id: &JobId) -> Result<MediaStream, TransportError> {
        let response = self
            .client
            .get(self.endpoint(&["video_result", job_id.as_str()])?)
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;
        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(TransportError::from))
            .boxed())
    }

    async fn export_artifact(
        &self,
        job_id: &JobId,
        format: ExportFormat,
    ) -> Result<ExportArtifact, TransportError> {
        let request = self
            .client
            .get(self.endpoint(&["export", job_id.as_str(), format.as_str()])?);
        let response = self.with_timeout(request).send().await?;
        let response = Self::ensure_success(response).await?;

        let disposition = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let filename = suggested_filename(disposition.as_deref(), format);
        let bytes = response.bytes().await?;

        Ok(ExportArtifact {
            job_id: job_id.clone(),
            format,
            filename,
            bytes,
        })
    }
}

// ---------------------------------------------------------------------------
// Progress reader
// ---------------------------------------------------------------------------

/// Read an SSE progress body and forward parsed events in order.
///
/// Stops after the first terminal event, when the subscriber closes, when
/// the body ends, on a read error or when a frame outgrows
/// [`crate::sse::MAX_FRAME_BYTES`]. All but the first two are reported to
/// the subscriber as stream errors. Malformed frames are logged and skipped.
async fn read_progress_stream(response: reqwest::Response, job_id: JobId, sender: ProgressSender) {
    let mut body = response.bytes_stream();
    let mut decoder = SseDecoder::new();

    loop {
        let chunk = tokio::select! {
            biased;
            _ = sender.closed() => {
                tracing::debug!(job_id = %job_id, "Progress subscription closed by client");
                return;
            }
            chunk = body.next() => chunk,
        };

        match chunk {
            Some(Ok(bytes)) => {
                let frames = match decoder.push(&bytes) {
                    Ok(frames) => frames,
                    Err(e) => {
                        tracing::warn!(job_id = %job_id, error = %e, "Progress frame too large");
                        sender.send_error("progress frame too large").await;
                        return;
                    }
                };
                for frame in frames {
                    match parse_progress(&frame.data) {
                        Ok(event) => {
                            let terminal = event.status.is_terminal();
                            if !sender.send_event(event).await {
                                return;
                            }
                            if terminal {
                                tracing::debug!(job_id = %job_id, "Terminal progress event forwarded");
                                return;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(
                                job_id = %job_id,
                                error = %e,
                                raw_message = %frame.data,
                                "Failed to parse progress frame",
                            );
                        }
                    }
                }
            }
            Some(Err(e)) => {
                tracing::error!(job_id = %job_id, error = %e, "Progress stream receive error");
                sender
                    .send_error(format!("progress stream read failed: {e}"))
                    .await;
                return;
            }
            None => {
                tracing::info!(job_id = %job_id, "Progress stream ended without a terminal status");
                sender
                    .send_error("progress stream ended before a terminal status")
                    .await;
                return;
            }
        }
    }
}
