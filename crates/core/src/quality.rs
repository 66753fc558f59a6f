//! Quality presets offered to the caller before a job starts.
//!
//! The backend maps each preset to a frame extraction rate; a higher rate
//! yields more frames for reconstruction and a longer run.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Named processing configuration sent with estimate and start requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityPreset {
    Low,
    #[default]
    #[serde(alias = "normal")]
    Medium,
    High,
}

/// Every preset, in ascending order of cost.
pub const ALL_PRESETS: [QualityPreset; 3] =
    [QualityPreset::Low, QualityPreset::Medium, QualityPreset::High];

impl QualityPreset {
    /// Wire label sent to the backend.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Frames per second the backend extracts from the source video.
    pub fn frames_per_second(self) -> u32 {
        match self {
            Self::Low => 2,
            Self::Medium => 4,
            Self::High => 6,
        }
    }
}

impl FromStr for QualityPreset {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" | "normal" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(CoreError::Validation(format!(
                "Invalid quality preset '{other}'. Must be one of: low, medium, high"
            ))),
        }
    }
}

impl fmt::Display for QualityPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
