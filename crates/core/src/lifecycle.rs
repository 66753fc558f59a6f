//! Client-side lifecycle of one reconstruction job.
//!
//! [`JobLifecycle`] is a synchronous state machine: the driver calls a
//! `begin_*` method before a network request and the matching
//! `*_succeeded` / `*_failed` method when the request completes. Progress
//! frames and stream loss are applied with [`JobLifecycle::apply_progress`]
//! and [`JobLifecycle::stream_lost`].
//!
//! ```text
//! Idle -> AssetReady -> (Estimating) -> Starting -> Running -> Completed
//!                                                          \-> Failed
//!                                                          \-> StatusUnknown
//! ```
//!
//! The active job id is the only guard against stale work: anything tagged
//! with a different id is discarded.

use std::fmt;

use serde::Serialize;

use crate::error::CoreError;
use crate::progress::{ProgressEvent, ProgressStatus, MAX_PERCENT};
use crate::quality::QualityPreset;
use crate::types::{AssetId, JobId, Timestamp};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Client-visible lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// No usable asset. Also the state while an upload is in flight.
    #[default]
    Idle,
    AssetReady,
    /// An advisory duration estimate is in flight.
    Estimating,
    /// A start request is in flight.
    Starting,
    Running,
    Completed,
    Failed,
    /// The progress stream broke while the job was running. The server-side
    /// job may have finished, failed, or still be running.
    StatusUnknown,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AssetReady => "asset_ready",
            Self::Estimating => "estimating",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::StatusUnknown => "status_unknown",
        }
    }

    /// `Completed` and `Failed` are terminal. `StatusUnknown` is not: the
    /// client simply no longer knows.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// States from which a new job may be started for the held asset.
    /// An estimate in flight never holds a start back.
    fn can_start(self) -> bool {
        matches!(
            self,
            Self::AssetReady
                | Self::Estimating
                | Self::Completed
                | Self::Failed
                | Self::StatusUnknown
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Advisory processing-time estimate. Never gates starting a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(tag = "kind", content = "minutes", rename_all = "snake_case")]
pub enum Estimate {
    Minutes(f64),
    #[default]
    Unknown,
}

impl Estimate {
    /// Text shown next to the quality selector.
    pub fn label(&self) -> String {
        match self {
            Self::Minutes(m) => format!("{m} minutes"),
            Self::Unknown => "N/A".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Job record
// ---------------------------------------------------------------------------

/// Everything the client knows about the active job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRecord {
    /// Assigned once at start; never changes.
    pub id: JobId,
    pub asset: AssetId,
    /// Preset the job was started with. Later preset changes do not touch it.
    pub quality: QualityPreset,
    /// Displayed percentage. Never decreases while running.
    pub percent: u8,
    /// Last log line received.
    pub message: Option<String>,
    /// Server-reported failure reason, once failed.
    pub failure: Option<String>,
    pub started_at: Timestamp,
    pub updated_at: Timestamp,
}

impl JobRecord {
    fn new(id: JobId, asset: AssetId, quality: QualityPreset) -> Self {
        let now = chrono::Utc::now();
        Self {
            id,
            asset,
            quality,
            percent: 0,
            message: None,
            failure: None,
            started_at: now,
            updated_at: now,
        }
    }

    /// One-line summary, e.g. `55% Complete - Run colmap2nerf.py`.
    pub fn progress_text(&self) -> String {
        crate::progress::progress_text(self.percent, self.message.as_deref().unwrap_or_default())
    }
}

/// Result of applying one progress event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The event belongs to no active job, or arrived while the job was not
    /// running. Nothing changed.
    Discarded,
    /// Still running; `percent` is the displayed value after the update.
    Progressed { percent: u8 },
    Completed,
    Failed { reason: String },
    /// The job had already reached a terminal state. Nothing changed.
    Duplicate,
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Lifecycle of one asset selection and the job started from it.
#[derive(Debug, Clone, Default)]
pub struct JobLifecycle {
    state: LifecycleState,
    asset: Option<AssetId>,
    quality: QualityPreset,
    estimate: Estimate,
    /// Preset captured by `begin_start`, consumed by `start_succeeded`.
    pending_quality: Option<QualityPreset>,
    job: Option<JobRecord>,
}

impl JobLifecycle {
    pub fn new(quality: QualityPreset) -> Self {
        Self {
            quality,
            ..Self::default()
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn asset(&self) -> Option<&AssetId> {
        self.asset.as_ref()
    }

    pub fn quality(&self) -> QualityPreset {
        self.quality
    }

    pub fn estimate(&self) -> Estimate {
        self.estimate
    }

    pub fn job(&self) -> Option<&JobRecord> {
        self.job.as_ref()
    }

    pub fn active_job_id(&self) -> Option<&JobId> {
        self.job.as_ref().map(|j| &j.id)
    }

    /// Displayed percentage of the active job (0 when there is none).
    pub fn percent(&self) -> u8 {
        self.job.as_ref().map_or(0, |j| j.percent)
    }

    // ---- asset selection ----

    /// A new upload begins: forget the previous asset, its estimate and any
    /// job started from it.
    pub fn begin_upload(&mut self) {
        self.state = LifecycleState::Idle;
        self.asset = None;
        self.estimate = Estimate::Unknown;
        self.pending_quality = None;
        self.job = None;
    }

    pub fn upload_succeeded(&mut self, asset: AssetId) {
        self.asset = Some(asset);
        self.state = LifecycleState::AssetReady;
    }

    pub fn upload_failed(&mut self) {
        self.begin_upload();
    }

    // ---- quality / estimate ----

    /// Store the preset for the next start. Returns `true` when an asset is
    /// ready and an estimate for the new preset would be useful.
    pub fn set_quality(&mut self, quality: QualityPreset) -> bool {
        if self.quality != quality {
            self.estimate = Estimate::Unknown;
        }
        self.quality = quality;
        self.asset.is_some() && self.state == LifecycleState::AssetReady
    }

    /// Mark an estimate request as in flight. Only `AssetReady` moves to
    /// `Estimating`; estimating from any other state leaves it untouched.
    pub fn begin_estimate(&mut self, asset: &AssetId) -> Result<(), CoreError> {
        self.ensure_current_asset(asset)?;
        if self.state == LifecycleState::AssetReady {
            self.state = LifecycleState::Estimating;
        }
        Ok(())
    }

    /// Record an estimate result. Stale results (asset or preset changed
    /// meanwhile) are dropped; returns whether the estimate was stored.
    /// Only `Estimating` moves back to `AssetReady`; a result arriving after
    /// a start leaves the job state alone.
    pub fn finish_estimate(
        &mut self,
        asset: &AssetId,
        quality: QualityPreset,
        estimate: Estimate,
    ) -> bool {
        if self.state == LifecycleState::Estimating {
            self.state = LifecycleState::AssetReady;
        }
        if self.asset.as_ref() != Some(asset) || self.quality != quality {
            return false;
        }
        self.estimate = estimate;
        true
    }

    // ---- job start ----

    /// Validate and mark a start request as in flight.
    ///
    /// Allowed from `AssetReady` or `Estimating`, and from `Completed`,
    /// `Failed` or `StatusUnknown` while the asset is still held (a fresh
    /// start for the same asset). The previous job record is dropped.
    pub fn begin_start(&mut self, asset: &AssetId, quality: QualityPreset) -> Result<(), CoreError> {
        if !self.state.can_start() {
            return Err(CoreError::InvalidState {
                operation: "start a job",
                state: self.state,
            });
        }
        self.ensure_current_asset(asset)?;

        self.job = None;
        self.pending_quality = Some(quality);
        self.state = LifecycleState::Starting;
        Ok(())
    }

    /// The server accepted the start and assigned `job_id`.
    pub fn start_succeeded(&mut self, job_id: JobId) -> Result<&JobRecord, CoreError> {
        if self.state != LifecycleState::Starting {
            return Err(CoreError::InvalidState {
                operation: "record a started job",
                state: self.state,
            });
        }
        let asset = self.asset.clone().ok_or(CoreError::InvalidState {
            operation: "record a started job",
            state: self.state,
        })?;
        let quality = self.pending_quality.take().unwrap_or(self.quality);

        self.state = LifecycleState::Running;
        Ok(&*self.job.insert(JobRecord::new(job_id, asset, quality)))
    }

    /// The start request failed; the asset stays selected so the caller
    /// can retry.
    pub fn start_failed(&mut self) {
        self.pending_quality = None;
        if self.state == LifecycleState::Starting {
            self.state = if self.asset.is_some() {
                LifecycleState::AssetReady
            } else {
                LifecycleState::Idle
            };
        }
    }

    // ---- progress ----

    /// Apply one progress event received for `job_id`.
    pub fn apply_progress(&mut self, job_id: &JobId, event: &ProgressEvent) -> Transition {
        let Some(job) = self.job.as_mut().filter(|j| &j.id == job_id) else {
            return Transition::Discarded;
        };
        match self.state {
            LifecycleState::Running => {}
            state if state.is_terminal() => return Transition::Duplicate,
            _ => return Transition::Discarded,
        }

        job.updated_at = chrono::Utc::now();
        job.message = Some(event.line.clone());

        match &event.status {
            ProgressStatus::Completed => {
                job.percent = MAX_PERCENT;
                self.state = LifecycleState::Completed;
                Transition::Completed
            }
            ProgressStatus::Failed { stage } => {
                job.percent = job.percent.max(event.percent());
                let reason = if event.line.is_empty() {
                    stage.clone()
                } else {
                    event.line.clone()
                };
                job.failure = Some(reason.clone());
                self.state = LifecycleState::Failed;
                Transition::Failed { reason }
            }
            ProgressStatus::Running { .. } => {
                job.percent = job.percent.max(event.percent());
                Transition::Progressed {
                    percent: job.percent,
                }
            }
        }
    }

    /// The progress stream for `job_id` broke. Returns `true` when this
    /// moved the job to `StatusUnknown`.
    pub fn stream_lost(&mut self, job_id: &JobId) -> bool {
        if self.state != LifecycleState::Running || self.active_job_id() != Some(job_id) {
            return false;
        }
        self.state = LifecycleState::StatusUnknown;
        true
    }

    // ---- post-completion ----

    /// Exports are only valid for the active job once it completed.
    pub fn ensure_exportable(&self, job_id: &JobId) -> Result<(), CoreError> {
        self.ensure_completed(job_id, "export an artifact")
    }

    /// Result media is only served for the active job once it completed.
    pub fn ensure_result_available(&self, job_id: &JobId) -> Result<(), CoreError> {
        self.ensure_completed(job_id, "fetch result media")
    }

    fn ensure_completed(&self, job_id: &JobId, operation: &'static str) -> Result<(), CoreError> {
        if self.state != LifecycleState::Completed {
            return Err(CoreError::InvalidState {
                operation,
                state: self.state,
            });
        }
        match self.active_job_id() {
            Some(active) if active == job_id => Ok(()),
            active => Err(CoreError::JobMismatch {
                requested: job_id.clone(),
                active: active.cloned(),
            }),
        }
    }

    fn ensure_current_asset(&self, asset: &AssetId) -> Result<(), CoreError> {
        match &self.asset {
            Some(current) if current == asset => Ok(()),
            current => Err(CoreError::AssetMismatch {
                requested: asset.clone(),
                current: current.clone(),
            }),
        }
    }
}
