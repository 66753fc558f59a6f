//! Runner settings loaded from the environment.

use std::path::PathBuf;

use v2n_client::config::parse_flag;
use v2n_client::{ClientConfig, ConfigError};
use v2n_core::export::ExportFormat;
use v2n_core::quality::QualityPreset;

/// Everything one headless run needs.
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerSettings {
    pub client: ClientConfig,
    /// Local video to upload.
    pub video_path: PathBuf,
    pub quality: QualityPreset,
    /// Exports to download after completion, in order.
    pub export_formats: Vec<ExportFormat>,
    /// Directory the result media and exports are written to.
    pub output_dir: PathBuf,
    /// Also download the rendered preview video.
    pub save_result_media: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{var} has invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error(transparent)]
    Client(#[from] ConfigError),
}

impl RunnerSettings {
    /// Load settings from environment variables.
    ///
    /// Client variables are read by [`ClientConfig::from_env`]; the runner
    /// adds `VIDEO_PATH`, `QUALITY`, `EXPORT_FORMATS`, `OUTPUT_DIR` and
    /// `SAVE_RESULT_MEDIA`.
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SettingsError> {
        let client = ClientConfig::from_lookup(&lookup)?;

        let video_path = lookup("VIDEO_PATH")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .ok_or(SettingsError::Missing("VIDEO_PATH"))?;

        let quality = match lookup("QUALITY") {
            Some(v) => v.parse().map_err(|e: v2n_core::error::CoreError| SettingsError::Invalid {
                var: "QUALITY",
                value: v.clone(),
                reason: e.to_string(),
            })?,
            None => QualityPreset::default(),
        };

        let export_formats = match lookup("EXPORT_FORMATS") {
            Some(v) => parse_formats(&v)?,
            None => Vec::new(),
        };

        let output_dir = lookup("OUTPUT_DIR")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        let save_result_media = match lookup("SAVE_RESULT_MEDIA") {
            Some(v) => parse_flag("SAVE_RESULT_MEDIA", &v)?,
            None => false,
        };

        Ok(Self {
            client,
            video_path,
            quality,
            export_formats,
            output_dir,
            save_result_media,
        })
    }
}

/// Parse a comma-separated format list, dropping blanks and repeats.
fn parse_formats(value: &str) -> Result<Vec<ExportFormat>, SettingsError> {
    let mut formats = Vec::new();
    for item in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let format: ExportFormat = item.parse().map_err(|e: v2n_core::error::CoreError| {
            SettingsError::Invalid {
                var: "EXPORT_FORMATS",
                value: value.to_string(),
                reason: e.to_string(),
            }
        })?;
        if !formats.contains(&format) {
            formats.push(format);
        }
    }
    Ok(formats)
}
