// SPDX-License-Identifier: MPL-2.0

//! Camera driver abstraction
//!
//! The capture session only ever talks to a [`CameraDriver`]. The driver owns
//! its capture thread and hands completed requests back through
//! [`CameraDriver::wait`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │   CaptureSession    │  ← Layout, paths, still capture
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │ CameraDriver Trait  │  ← configure / start / stop / wait / teardown
//! └──────────┬──────────┘
//!            │
//!            ▼
//!      ┌───────────┐
//!      │ Synthetic │  ← Test-pattern implementation
//!      └───────────┘
//! ```

pub mod format_converters;
pub mod synthetic;
pub mod types;

pub use synthetic::SyntheticCamera;
pub use types::*;

use crate::errors::CameraError;
use std::time::Duration;

/// Result type for driver operations
pub type BackendResult<T> = Result<T, CameraError>;

/// Camera driver trait
///
/// Lifecycle is strictly: `generate_configuration` → `configure` →
/// (`start` → `wait`* → `stop`)* → `teardown`. A driver must refuse to
/// configure while running and must not deliver requests after `stop`.
pub trait CameraDriver: Send {
    // ===== Identity =====

    /// Sensor model, used for DNG make/model tags
    fn camera_model(&self) -> &str;

    // ===== Configuration =====

    /// Default configuration with one stream per requested role
    ///
    /// Returns `None` if the camera cannot produce the role set at all.
    fn generate_configuration(&mut self, roles: &[StreamRole]) -> Option<CameraConfiguration>;

    /// Validate and commit a configuration, filling in strides
    ///
    /// Fails if a configuration is already live or the camera is running.
    fn configure(&mut self, config: &mut CameraConfiguration) -> BackendResult<()>;

    /// Release the committed configuration and its buffers
    fn teardown(&mut self) -> BackendResult<()>;

    /// Geometry of a committed stream
    fn stream_info(&self, stream: StreamId) -> Option<StreamInfo>;

    // ===== Streaming =====

    /// Begin delivering requests with the given controls
    fn start(&mut self, controls: &CameraControls) -> BackendResult<()>;

    /// Stop delivering requests
    ///
    /// Requests already handed out stay valid until their last reference drops.
    fn stop(&mut self) -> BackendResult<()>;

    /// Block until the next completed request, a timeout, or a quit message
    fn wait(&mut self, timeout: Duration) -> CameraMsg;

    /// Whether `start` has been called without a matching `stop`
    fn is_running(&self) -> bool;
}
