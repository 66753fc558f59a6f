//! Client configuration loaded from environment variables.

use std::time::Duration;

/// Optional backend capabilities the lifecycle client may use.
///
/// Deployments without an estimate or export endpoint switch the matching
/// flag off instead of running a different client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Request advisory duration estimates after upload and preset changes.
    pub estimate: bool,
    /// Allow artifact exports for completed jobs.
    pub export: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            estimate: true,
            export: true,
        }
    }
}

/// Client configuration loaded from environment variables.
///
/// All fields have defaults suitable for a backend running locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL of the backend (default: `http://localhost:5000`).
    pub server_url: String,
    /// Timeout for short request/response calls in seconds (default: `30`).
    /// Uploads and streams are not bounded by it.
    pub request_timeout_secs: u64,
    /// Progress events buffered between the reader task and the client
    /// (default: `64`).
    pub progress_buffer: usize,
    pub capabilities: Capabilities,
}

/// Invalid configuration value.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} has invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:5000".into(),
            request_timeout_secs: 30,
            progress_buffer: 64,
            capabilities: Capabilities::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                    | Default                 |
    /// |----------------------------|-------------------------|
    /// | `V2N_SERVER_URL`           | `http://localhost:5000` |
    /// | `V2N_REQUEST_TIMEOUT_SECS` | `30`                    |
    /// | `V2N_PROGRESS_BUFFER`      | `64`                    |
    /// | `V2N_ENABLE_ESTIMATE`      | `true`                  |
    /// | `V2N_ENABLE_EXPORT`        | `true`                  |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reading from `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let server_url = lookup("V2N_SERVER_URL")
            .map(|v| v.trim().trim_end_matches('/').to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.server_url);

        let request_timeout_secs = match lookup("V2N_REQUEST_TIMEOUT_SECS") {
            Some(v) => parse_number("V2N_REQUEST_TIMEOUT_SECS", &v)?,
            None => defaults.request_timeout_secs,
        };

        let progress_buffer = match lookup("V2N_PROGRESS_BUFFER") {
            Some(v) => parse_number("V2N_PROGRESS_BUFFER", &v)?,
            None => defaults.progress_buffer,
        };

        let estimate = match lookup("V2N_ENABLE_ESTIMATE") {
            Some(v) => parse_flag("V2N_ENABLE_ESTIMATE", &v)?,
            None => defaults.capabilities.estimate,
        };

        let export = match lookup("V2N_ENABLE_EXPORT") {
            Some(v) => parse_flag("V2N_ENABLE_EXPORT", &v)?,
            None => defaults.capabilities.export,
        };

        Ok(Self {
            server_url,
            request_timeout_secs,
            progress_buffer,
            capabilities: Capabilities { estimate, export },
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn parse_number<N>(var: &'static str, value: &str) -> Result<N, ConfigError>
where
    N: std::str::FromStr,
    N::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: N::Err| ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

/// Parse a boolean flag (`1/0`, `true/false`, `yes/no`, `on/off`).
pub fn parse_flag(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: "expected true or false".into(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = ClientConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn overrides_are_applied() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("V2N_SERVER_URL", "http://gpu-box:8080/"),
            ("V2N_REQUEST_TIMEOUT_SECS", "5"),
            ("V2N_PROGRESS_BUFFER", "16"),
            ("V2N_ENABLE_ESTIMATE", "off"),
            ("V2N_ENABLE_EXPORT", "No"),
        ]))
        .unwrap();

        assert_eq!(config.server_url, "http://gpu-box:8080");
        assert_eq!(config.request_timeout_secs, 5);
        assert_eq!(config.progress_buffer, 16);
        assert_eq!(
            config.capabilities,
            Capabilities {
                estimate: false,
                export: false
            }
        );
    }

    #[test]
    fn invalid_number_is_reported() {
        let err = ClientConfig::from_lookup(lookup(&[("V2N_REQUEST_TIMEOUT_SECS", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("V2N_REQUEST_TIMEOUT_SECS"));
    }

    #[test]
    fn invalid_flag_is_reported() {
        let err = ClientConfig::from_lookup(lookup(&[("V2N_ENABLE_EXPORT", "maybe")])).unwrap_err();
        assert!(err.to_string().contains("maybe"));
    }
}
