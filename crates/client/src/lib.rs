//! Job lifecycle client for the video-to-3D reconstruction backend.
//!
//! Provides the [`transport::Transport`] seam, its HTTP/SSE binding
//! ([`http::HttpTransport`]), progress subscriptions, and the
//! [`lifecycle::LifecycleClient`] that drives one job from upload to a
//! terminal state and publishes [`events::LifecycleEvent`]s to observers.

pub mod config;
pub mod events;
pub mod http;
pub mod lifecycle;
pub mod sse;
pub mod subscription;
pub mod transport;

pub use config::{Capabilities, ClientConfig, ConfigError};
pub use events::LifecycleEvent;
pub use http::HttpTransport;
pub use lifecycle::{LifecycleClient, LifecycleError, StreamStep};
pub use subscription::{ProgressItem, ProgressSender, ProgressSubscription};
pub use transport::{AssetUpload, ExportArtifact, MediaStream, Transport, TransportError};
