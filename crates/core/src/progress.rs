//! Progress stream payloads and their parser.
//!
//! The backend pushes one JSON object per stream frame with the shape
//! `{"progress": <int>, "line": "<log line>", "status": "<stage>"}`. The
//! status is a free-form pipeline stage string; this module folds it into
//! the three-state [`ProgressStatus`] the lifecycle understands.

use serde::{Deserialize, Serialize};

/// Status string that marks successful completion of the whole pipeline.
pub const STATUS_COMPLETED: &str = "completed";

/// Status string that marks failure of the whole pipeline.
pub const STATUS_FAILED: &str = "failed";

/// Suffix the backend appends to stage names that failed (e.g. `training_failed`).
pub const FAILED_STAGE_SUFFIX: &str = "_failed";

/// Status assumed when a frame carries none.
pub const STATUS_RUNNING: &str = "running";

/// Upper bound of a progress percentage.
pub const MAX_PERCENT: u8 = 100;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Job status carried by a progress event.
///
/// Intermediate pipeline stages (`started`, `training_in_progress`,
/// `video2nerf_completed`, ...) are all `Running`; the raw stage name is
/// kept for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProgressStatus {
    Running { stage: String },
    Completed,
    Failed { stage: String },
}

impl ProgressStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed { .. })
    }

    /// The raw stage name as the server sent it.
    pub fn stage(&self) -> &str {
        match self {
            Self::Running { stage } | Self::Failed { stage } => stage,
            Self::Completed => STATUS_COMPLETED,
        }
    }
}

impl Default for ProgressStatus {
    fn default() -> Self {
        Self::Running {
            stage: STATUS_RUNNING.to_string(),
        }
    }
}

impl From<String> for ProgressStatus {
    fn from(raw: String) -> Self {
        let stage = raw.trim().to_ascii_lowercase();
        if stage == STATUS_COMPLETED {
            Self::Completed
        } else if stage == STATUS_FAILED || stage.ends_with(FAILED_STAGE_SUFFIX) {
            Self::Failed { stage }
        } else if stage.is_empty() {
            Self::default()
        } else {
            Self::Running { stage }
        }
    }
}

impl From<&str> for ProgressStatus {
    fn from(raw: &str) -> Self {
        Self::from(raw.to_string())
    }
}

impl From<ProgressStatus> for String {
    fn from(status: ProgressStatus) -> Self {
        status.stage().to_string()
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// One frame of the progress stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Percentage as reported by the server. Not trusted to be in range.
    #[serde(default)]
    pub progress: i64,
    /// Latest log line from the pipeline.
    #[serde(default)]
    pub line: String,
    #[serde(default)]
    pub status: ProgressStatus,
}

impl ProgressEvent {
    pub fn new(progress: i64, line: impl Into<String>, status: impl Into<ProgressStatus>) -> Self {
        Self {
            progress,
            line: line.into(),
            status: status.into(),
        }
    }

    /// The reported percentage clamped into `0..=100`.
    pub fn percent(&self) -> u8 {
        clamp_percent(self.progress)
    }
}

/// Clamp a server-reported percentage into `0..=100`.
pub fn clamp_percent(progress: i64) -> u8 {
    progress.clamp(0, MAX_PERCENT as i64) as u8
}

/// Render the one-line progress summary shown next to the progress bar.
pub fn progress_text(percent: u8, line: &str) -> String {
    if line.is_empty() {
        format!("{percent}% Complete")
    } else {
        format!("{percent}% Complete - {line}")
    }
}

/// Parse the `data` payload of one progress stream frame.
///
/// Returns `Err` for malformed JSON. Callers should log and skip the
/// frame rather than tear down the stream.
pub fn parse_progress(data: &str) -> Result<ProgressEvent, serde_json::Error> {
    serde_json::from_str(data)
}
