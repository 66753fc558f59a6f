use crate::lifecycle::LifecycleState;
use crate::types::{AssetId, JobId};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: LifecycleState,
    },

    #[error("Asset {requested} is not the selected asset")]
    AssetMismatch {
        requested: AssetId,
        current: Option<AssetId>,
    },

    #[error("Job {requested} is not the active job")]
    JobMismatch {
        requested: JobId,
        active: Option<JobId>,
    },
}
