//! Domain types and the I/O-free job lifecycle for the video-to-3D
//! reconstruction client.
//!
//! Nothing in this crate performs network or file I/O. The transport and
//! the driver that feeds network completions into [`lifecycle::JobLifecycle`]
//! live in `v2n-client`.

pub mod error;
pub mod export;
pub mod lifecycle;
pub mod progress;
pub mod quality;
pub mod types;
