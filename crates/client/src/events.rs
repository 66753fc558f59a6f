//! Observer events emitted by the lifecycle client.
//!
//! These mirror the state changes a UI needs to render: the lifecycle
//! state, the selected asset, the advisory estimate and job progress.

use serde::Serialize;
use v2n_core::lifecycle::{Estimate, LifecycleState};
use v2n_core::quality::QualityPreset;
use v2n_core::types::{AssetId, JobId};

/// A notification broadcast by [`LifecycleClient`](crate::LifecycleClient).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// The lifecycle moved to a new state.
    StateChanged { state: LifecycleState },

    /// An upload succeeded and the asset is selected.
    AssetReady { asset_id: AssetId },

    /// The advisory estimate changed (including back to unknown).
    EstimateUpdated { estimate: Estimate },

    /// The server accepted a start request.
    JobStarted {
        job_id: JobId,
        quality: QualityPreset,
    },

    /// A running job made progress.
    Progress {
        job_id: JobId,
        /// Displayed percentage (0-100), never decreasing.
        percent: u8,
        /// Latest log line from the server.
        line: String,
    },

    JobCompleted { job_id: JobId },

    JobFailed { job_id: JobId, reason: String },

    /// The progress stream broke before a terminal status arrived.
    StatusUnknown { job_id: JobId, reason: String },
}
