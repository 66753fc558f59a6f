//! Export formats and download filename resolution.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Formats
// ---------------------------------------------------------------------------

/// Derived 3D model formats the backend can export for a completed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    /// Wavefront OBJ mesh.
    Obj,
    /// Stanford PLY point cloud / mesh.
    Ply,
    /// Binary glTF scene.
    Glb,
}

/// Every supported export format.
pub const ALL_FORMATS: [ExportFormat; 3] = [ExportFormat::Obj, ExportFormat::Ply, ExportFormat::Glb];

impl ExportFormat {
    /// Wire tag, also used as the file extension.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Obj => "obj",
            Self::Ply => "ply",
            Self::Glb => "glb",
        }
    }

    /// Fallback download name when the server does not suggest one.
    pub fn default_filename(self) -> String {
        format!("model.{}", self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "obj" => Ok(Self::Obj),
            "ply" => Ok(Self::Ply),
            "glb" => Ok(Self::Glb),
            other => Err(CoreError::Validation(format!(
                "Invalid export format '{other}'. Must be one of: obj, ply, glb"
            ))),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Content-Disposition
// ---------------------------------------------------------------------------

static EXTENDED_FILENAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)filename\*\s*=\s*(?:UTF-8|ISO-8859-1)?'[^']*'([^;]+)"#).expect("valid regex")
});

static FILENAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:^|;)\s*filename\s*=\s*(?:"([^"]*)"|([^;]+))"#).expect("valid regex")
});

/// Resolve the filename for an exported artifact.
///
/// Prefers the RFC 5987 `filename*` parameter, then plain `filename`.
/// Directory components are stripped. Falls back to `model.<ext>` when
/// the header is absent or names nothing usable.
pub fn suggested_filename(content_disposition: Option<&str>, format: ExportFormat) -> String {
    content_disposition
        .and_then(filename_from_header)
        .unwrap_or_else(|| format.default_filename())
}

fn filename_from_header(header: &str) -> Option<String> {
    let raw = match EXTENDED_FILENAME_RE.captures(header).and_then(|c| c.get(1)) {
        // Undecodable `filename*` values name nothing usable.
        Some(m) => urlencoding::decode(m.as_str().trim()).ok()?.into_owned(),
        None => FILENAME_RE
            .captures(header)
            .and_then(|c| c.get(1).or_else(|| c.get(2)))
            .map(|m| m.as_str().trim().to_string())?,
    };
    file_name_component(&raw)
}

/// Last path component of `raw`, safe to join onto a directory.
///
/// Returns `None` for empty, `.`, `..` or names containing control or
/// replacement characters.
pub fn file_name_component(raw: &str) -> Option<String> {
    let name = raw.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.chars().any(|c| c.is_control() || c == char::REPLACEMENT_CHARACTER)
    {
        None
    } else {
        Some(name.to_string())
    }
}
