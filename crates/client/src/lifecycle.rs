//! Single-job lifecycle driver.
//!
//! [`LifecycleClient`] owns a [`JobLifecycle`] state machine and performs
//! every network effect through a [`Transport`]. It holds at most one
//! progress subscription: a new upload or a new start closes the previous
//! one, and terminal events or stream errors close it as well.
//!
//! State changes are broadcast via a [`tokio::sync::broadcast`] channel.
//! Call [`LifecycleClient::subscribe`] to receive them.

use tokio::sync::broadcast;
use v2n_core::error::CoreError;
use v2n_core::export::ExportFormat;
use v2n_core::lifecycle::{Estimate, JobLifecycle, LifecycleState, Transition};
use v2n_core::progress::ProgressEvent;
use v2n_core::quality::QualityPreset;
use v2n_core::types::{AssetId, JobId};

use crate::config::Capabilities;
use crate::events::LifecycleEvent;
use crate::subscription::{ProgressItem, ProgressSubscription};
use crate::transport::{AssetUpload, ExportArtifact, MediaStream, Transport, TransportError};

/// Broadcast channel capacity for observer events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Reason reported when a subscription ends without an error item.
const STREAM_CLOSED_REASON: &str = "progress stream closed";

/// Errors surfaced by [`LifecycleClient`] operations.
///
/// Each error ends only the operation that raised it; the lifecycle state
/// after any error is well defined.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// The asset was rejected. The client is back to `Idle`.
    #[error("Upload failed: {0}")]
    Upload(#[source] TransportError),

    /// No estimate could be produced. Advisory only.
    #[error("Estimate unavailable: {0}")]
    EstimationUnavailable(String),

    /// The start request was rejected. The asset stays selected.
    #[error("Failed to start processing: {0}")]
    Start(#[source] TransportError),

    #[error("Job {job_id} failed: {reason}")]
    JobFailed { job_id: JobId, reason: String },

    /// The progress stream broke; the job may still be running server-side.
    #[error("Processing status unknown for job {job_id}: {reason}")]
    StatusUnknown { job_id: JobId, reason: String },

    #[error("Export failed: {0}")]
    Export(#[source] TransportError),

    #[error("Export is not enabled for this backend")]
    ExportDisabled,

    #[error("Failed to fetch result media: {0}")]
    ResultMedia(#[source] TransportError),

    /// The operation is not valid in the current state. Never reaches the
    /// transport.
    #[error(transparent)]
    Precondition(#[from] CoreError),
}

/// Outcome of pulling one item from the active progress subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamStep {
    /// A progress event was applied.
    Applied(Transition),
    /// The stream broke or ended early.
    Lost { reason: String },
}

/// Drives one asset selection and the job started from it.
pub struct LifecycleClient<T: Transport> {
    transport: T,
    capabilities: Capabilities,
    lifecycle: JobLifecycle,
    subscription: Option<ProgressSubscription>,
    event_tx: broadcast::Sender<LifecycleEvent>,
    /// State last published to observers.
    reported_state: LifecycleState,
    /// Why the progress stream of the active job was lost, if it was.
    stream_error: Option<String>,
}

impl<T: Transport> LifecycleClient<T> {
    pub fn new(transport: T, capabilities: Capabilities) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            transport,
            capabilities,
            lifecycle: JobLifecycle::default(),
            subscription: None,
            event_tx,
            reported_state: LifecycleState::Idle,
            stream_error: None,
        }
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.event_tx.subscribe()
    }

    pub fn lifecycle(&self) -> &JobLifecycle {
        &self.lifecycle
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Whether a progress subscription is currently held open.
    pub fn is_listening(&self) -> bool {
        self.subscription.is_some()
    }

    // ---- asset selection ----

    /// Upload `upload` and make it the selected asset.
    ///
    /// Any previous asset, estimate and job are forgotten first and their
    /// progress stream is closed. No estimate is requested here; callers
    /// that want one use [`LifecycleClient::estimate_duration`], which never
    /// holds back a start.
    pub async fn select_asset(&mut self, upload: AssetUpload) -> Result<AssetId, LifecycleError> {
        self.close_subscription();
        self.stream_error = None;
        let had_estimate = self.lifecycle.estimate() != Estimate::Unknown;
        self.lifecycle.begin_upload();
        self.publish_state();
        if had_estimate {
            self.emit(LifecycleEvent::EstimateUpdated {
                estimate: Estimate::Unknown,
            });
        }

        let file_name = upload.file_name.clone();
        let receipt = match self.transport.upload_asset(upload).await {
            Ok(receipt) => receipt,
            Err(e) => {
                tracing::warn!(file_name = %file_name, error = %e, "Asset upload failed");
                self.lifecycle.upload_failed();
                self.publish_state();
                return Err(LifecycleError::Upload(e));
            }
        };

        let asset_id = receipt.asset_id;
        tracing::info!(
            asset_id = %asset_id,
            message = receipt.message.as_deref().unwrap_or_default(),
            "Asset uploaded",
        );
        self.lifecycle.upload_succeeded(asset_id.clone());
        self.emit(LifecycleEvent::AssetReady {
            asset_id: asset_id.clone(),
        });
        self.publish_state();

        Ok(asset_id)
    }

    // ---- quality / estimate ----

    /// Choose the preset for the next start.
    ///
    /// Never touches a job already started. When an asset is ready and
    /// estimation is enabled, a fresh estimate is requested and returned
    /// (`Estimate::Unknown` if it could not be produced); otherwise `None`.
    pub async fn set_quality(&mut self, quality: QualityPreset) -> Option<Estimate> {
        let previous = self.lifecycle.estimate();
        let wants_estimate = self.lifecycle.set_quality(quality);
        if self.lifecycle.estimate() != previous {
            self.emit(LifecycleEvent::EstimateUpdated {
                estimate: self.lifecycle.estimate(),
            });
        }

        if !wants_estimate || !self.capabilities.estimate {
            return None;
        }
        let asset_id = self.lifecycle.asset()?.clone();
        match self.estimate_duration(&asset_id, quality).await {
            Ok(minutes) => Some(Estimate::Minutes(minutes)),
            Err(e) => {
                tracing::debug!(asset_id = %asset_id, %quality, error = %e, "Estimate unavailable");
                Some(Estimate::Unknown)
            }
        }
    }

    /// Request an advisory processing-time estimate, in minutes.
    ///
    /// Failures are reported as [`LifecycleError::EstimationUnavailable`]
    /// and leave the state untouched. A result that arrives after the asset
    /// or preset changed is returned but not stored.
    pub async fn estimate_duration(
        &mut self,
        asset_id: &AssetId,
        quality: QualityPreset,
    ) -> Result<f64, LifecycleError> {
        if !self.capabilities.estimate {
            return Err(LifecycleError::EstimationUnavailable(
                "estimation is not enabled".into(),
            ));
        }
        self.lifecycle.begin_estimate(asset_id)?;
        self.publish_state();

        let outcome = match self.transport.estimate_duration(asset_id, quality).await {
            Ok(minutes) if minutes.is_finite() && minutes >= 0.0 => Ok(minutes),
            Ok(minutes) => Err(format!("backend returned an invalid estimate ({minutes})")),
            Err(e) => Err(e.to_string()),
        };

        let estimate = match &outcome {
            Ok(minutes) => Estimate::Minutes(*minutes),
            Err(_) => Estimate::Unknown,
        };
        let previous = self.lifecycle.estimate();
        let stored = self.lifecycle.finish_estimate(asset_id, quality, estimate);
        self.publish_state();
        if stored && estimate != previous {
            self.emit(LifecycleEvent::EstimateUpdated { estimate });
        }

        outcome.map_err(LifecycleError::EstimationUnavailable)
    }

    // ---- job start ----

    /// Start processing `asset_id` at `quality` and open its progress stream.
    ///
    /// Rejected locally while a start is in flight or a job is running.
    /// If the stream cannot be opened after the server accepted the job,
    /// the job id is still returned and the state is `StatusUnknown`.
    pub async fn start_job(
        &mut self,
        asset_id: &AssetId,
        quality: QualityPreset,
    ) -> Result<JobId, LifecycleError> {
        self.lifecycle.begin_start(asset_id, quality)?;
        self.close_subscription();
        self.stream_error = None;
        self.publish_state();

        let receipt = match self.transport.start_processing(asset_id, quality).await {
            Ok(receipt) => receipt,
            Err(e) => {
                tracing::warn!(asset_id = %asset_id, %quality, error = %e, "Start request failed");
                self.lifecycle.start_failed();
                self.publish_state();
                return Err(LifecycleError::Start(e));
            }
        };

        let job_id = self.lifecycle.start_succeeded(receipt.job_id)?.id.clone();
        tracing::info!(
            job_id = %job_id,
            asset_id = %asset_id,
            %quality,
            "Processing started",
        );
        self.emit(LifecycleEvent::JobStarted {
            job_id: job_id.clone(),
            quality,
        });
        self.publish_state();

        match self.transport.subscribe_progress(&job_id).await {
            Ok(subscription) => self.subscription = Some(subscription),
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Failed to open progress stream");
                self.on_stream_error(&job_id, &e.to_string());
            }
        }

        Ok(job_id)
    }

    // ---- progress ----

    /// Apply one progress event delivered for `job_id`.
    ///
    /// Events for any job other than the active one are discarded. Terminal
    /// events close the subscription and are published only once.
    pub fn on_progress_event(&mut self, job_id: &JobId, event: ProgressEvent) -> Transition {
        let transition = self.lifecycle.apply_progress(job_id, &event);
        match &transition {
            Transition::Discarded => {
                tracing::debug!(job_id = %job_id, "Discarding progress event for inactive job");
            }
            Transition::Progressed { percent } => {
                self.emit(LifecycleEvent::Progress {
                    job_id: job_id.clone(),
                    percent: *percent,
                    line: event.line,
                });
            }
            Transition::Completed => {
                self.close_subscription_for(job_id);
                tracing::info!(job_id = %job_id, "Processing completed");
                self.emit(LifecycleEvent::Progress {
                    job_id: job_id.clone(),
                    percent: self.lifecycle.percent(),
                    line: event.line,
                });
                self.emit(LifecycleEvent::JobCompleted {
                    job_id: job_id.clone(),
                });
                self.publish_state();
            }
            Transition::Failed { reason } => {
                self.close_subscription_for(job_id);
                tracing::warn!(job_id = %job_id, reason = %reason, "Processing failed");
                self.emit(LifecycleEvent::JobFailed {
                    job_id: job_id.clone(),
                    reason: reason.clone(),
                });
                self.publish_state();
            }
            Transition::Duplicate => {
                self.close_subscription_for(job_id);
                tracing::debug!(job_id = %job_id, "Ignoring repeated terminal event");
            }
        }
        transition
    }

    /// The progress stream for `job_id` failed at the transport level.
    ///
    /// Closes the subscription and, if the job was running, moves it to
    /// `StatusUnknown`. Returns whether the state changed.
    pub fn on_stream_error(&mut self, job_id: &JobId, reason: &str) -> bool {
        self.close_subscription_for(job_id);
        if !self.lifecycle.stream_lost(job_id) {
            tracing::debug!(job_id = %job_id, reason, "Ignoring stream error for inactive job");
            return false;
        }

        tracing::warn!(job_id = %job_id, reason, "Progress stream lost; processing status unknown");
        self.stream_error = Some(reason.to_string());
        self.emit(LifecycleEvent::StatusUnknown {
            job_id: job_id.clone(),
            reason: reason.to_string(),
        });
        self.publish_state();
        true
    }

    /// Pull the next item from the active subscription and apply it.
    ///
    /// Returns `None` when no subscription is open.
    pub async fn next_event(&mut self) -> Option<StreamStep> {
        let subscription = self.subscription.as_mut()?;
        let job_id = subscription.job_id().clone();

        match subscription.next().await {
            Some(ProgressItem::Event(event)) => {
                Some(StreamStep::Applied(self.on_progress_event(&job_id, event)))
            }
            Some(ProgressItem::Error(reason)) => {
                self.on_stream_error(&job_id, &reason);
                Some(StreamStep::Lost { reason })
            }
            None => {
                self.on_stream_error(&job_id, STREAM_CLOSED_REASON);
                Some(StreamStep::Lost {
                    reason: STREAM_CLOSED_REASON.to_string(),
                })
            }
        }
    }

    /// Consume progress until the active job reaches an outcome.
    ///
    /// `Completed` yields the job id; `Failed` and a lost stream are
    /// reported as [`LifecycleError::JobFailed`] and
    /// [`LifecycleError::StatusUnknown`].
    pub async fn wait_for_terminal(&mut self) -> Result<JobId, LifecycleError> {
        loop {
            let job = self.lifecycle.job().ok_or(CoreError::InvalidState {
                operation: "wait for a job",
                state: self.lifecycle.state(),
            })?;
            let job_id = job.id.clone();

            match self.lifecycle.state() {
                LifecycleState::Completed => return Ok(job_id),
                LifecycleState::Failed => {
                    return Err(LifecycleError::JobFailed {
                        job_id,
                        reason: job.failure.clone().unwrap_or_default(),
                    });
                }
                LifecycleState::StatusUnknown => {
                    return Err(LifecycleError::StatusUnknown {
                        job_id,
                        reason: self
                            .stream_error
                            .clone()
                            .unwrap_or_else(|| STREAM_CLOSED_REASON.to_string()),
                    });
                }
                LifecycleState::Running => {
                    if self.next_event().await.is_none() {
                        self.on_stream_error(&job_id, "no progress subscription is open");
                    }
                }
                state => {
                    return Err(CoreError::InvalidState {
                        operation: "wait for a job",
                        state,
                    }
                    .into());
                }
            }
        }
    }

    // ---- post-completion ----

    /// Download a derived model of the completed active job.
    pub async fn export_artifact(
        &self,
        job_id: &JobId,
        format: ExportFormat,
    ) -> Result<ExportArtifact, LifecycleError> {
        if !self.capabilities.export {
            return Err(LifecycleError::ExportDisabled);
        }
        self.lifecycle.ensure_exportable(job_id)?;

        let artifact = self
            .transport
            .export_artifact(job_id, format)
            .await
            .map_err(LifecycleError::Export)?;
        tracing::info!(
            job_id = %job_id,
            %format,
            filename = %artifact.filename,
            size = artifact.bytes.len(),
            "Artifact exported",
        );
        Ok(artifact)
    }

    /// Stream the rendered preview of the completed active job.
    pub async fn fetch_result_media(&self, job_id: &JobId) -> Result<MediaStream, LifecycleError> {
        self.lifecycle.ensure_result_available(job_id)?;
        self.transport
            .fetch_result_media(job_id)
            .await
            .map_err(LifecycleError::ResultMedia)
    }

    // ---- private helpers ----

    fn emit(&self, event: LifecycleEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Publish `StateChanged` if the state moved since the last publish.
    fn publish_state(&mut self) {
        let state = self.lifecycle.state();
        if state != self.reported_state {
            self.reported_state = state;
            self.emit(LifecycleEvent::StateChanged { state });
        }
    }

    fn close_subscription(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            tracing::debug!(job_id = %subscription.job_id(), "Closing progress subscription");
            subscription.close();
        }
    }

    fn close_subscription_for(&mut self, job_id: &JobId) {
        if self.subscription.as_ref().is_some_and(|s| s.job_id() == job_id) {
            self.close_subscription();
        }
    }
}
