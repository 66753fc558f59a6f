//! The capabilities the lifecycle client needs from the backend.
//!
//! [`Transport`] is the only seam between the lifecycle and the network.
//! [`HttpTransport`](crate::http::HttpTransport) binds it to the reference
//! HTTP/SSE API; tests substitute in-memory implementations.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use v2n_core::export::ExportFormat;
use v2n_core::quality::QualityPreset;
use v2n_core::types::{AssetId, JobId};

use crate::subscription::ProgressSubscription;

/// Playable result media, streamed chunk by chunk.
pub type MediaStream = BoxStream<'static, Result<Bytes, TransportError>>;

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// A local video selected for upload.
#[derive(Debug, Clone)]
pub struct AssetUpload {
    /// Name sent as the multipart filename.
    pub file_name: String,
    pub bytes: Vec<u8>,
    /// MIME type; the transport picks a default when `None`.
    pub content_type: Option<String>,
}

impl AssetUpload {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Read a video from disk, using its file name as the upload name.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, TransportError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "video.mp4".to_string());
        Ok(Self::new(file_name, bytes))
    }
}

/// Outcome of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub asset_id: AssetId,
    /// Human-readable server message.
    pub message: Option<String>,
}

/// Outcome of a successful start request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartReceipt {
    pub job_id: JobId,
    /// Human-readable server message.
    pub message: Option<String>,
}

/// A downloaded export. Not retained by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportArtifact {
    pub job_id: JobId,
    pub format: ExportFormat,
    /// Server-suggested name, or `model.<ext>`.
    pub filename: String,
    pub bytes: Bytes,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from a transport call.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend returned a non-2xx status code.
    #[error("Backend API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// A response body did not have the expected shape.
    #[error("Unexpected response: {0}")]
    Decode(String),

    /// The progress stream could not be opened or broke.
    #[error("Progress stream error: {0}")]
    Stream(String),

    /// The configured base URL cannot address the backend.
    #[error("Invalid backend URL: {0}")]
    InvalidUrl(String),

    /// Reading a local file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Network capabilities of the reconstruction backend.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Upload a source video; returns the server-assigned asset id.
    async fn upload_asset(&self, upload: AssetUpload) -> Result<UploadReceipt, TransportError>;

    /// Advisory estimate, in minutes, for processing `asset_id` at `quality`.
    async fn estimate_duration(
        &self,
        asset_id: &AssetId,
        quality: QualityPreset,
    ) -> Result<f64, TransportError>;

    /// Begin the server-side pipeline.
    async fn start_processing(
        &self,
        asset_id: &AssetId,
        quality: QualityPreset,
    ) -> Result<StartReceipt, TransportError>;

    /// Open the long-lived progress stream for `job_id`.
    async fn subscribe_progress(&self, job_id: &JobId)
        -> Result<ProgressSubscription, TransportError>;

    /// Stream the rendered preview of a completed job.
    async fn fetch_result_media(&self, job_id: &JobId) -> Result<MediaStream, TransportError>;

    /// Download a derived model of a completed job.
    async fn export_artifact(
        &self,
        job_id: &JobId,
        format: ExportFormat,
    ) -> Result<ExportArtifact, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn upload_asset(&self, upload: AssetUpload) -> Result<UploadReceipt, TransportError> {
        (**self).upload_asset(upload).await
    }

    async fn estimate_duration(
        &self,
        asset_id: &AssetId,
        quality: QualityPreset,
    ) -> Result<f64, TransportError> {
        (**self).estimate_duration(asset_id, quality).await
    }

    async fn start_processing(
        &self,
        asset_id: &AssetId,
        quality: QualityPreset,
    ) -> Result<StartReceipt, TransportError> {
        (**self).start_processing(asset_id, quality).await
    }

    async fn subscribe_progress(
        &self,
        job_id: &JobId,
    ) -> Result<ProgressSubscription, TransportError> {
        (**self).subscribe_progress(job_id).await
    }

    async fn fetch_result_media(&self, job_id: &JobId) -> Result<MediaStream, TransportError> {
        (**self).fetch_result_media(job_id).await
    }

    async fn export_artifact(
        &self,
        job_id: &JobId,
        format: ExportFormat,
    ) -> Result<ExportArtifact, TransportError> {
        (**self).export_artifact(job_id, format).await
    }
}
