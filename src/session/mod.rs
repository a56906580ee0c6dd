// SPDX-License-Identifier: GPL-3.0-only

//! Capture session lifecycle
//!
//! - [`controller`]: the camera, its live layout and the encoder paths bound to it
//! - [`state`]: phases of the timed demo cycle

pub mod controller;
pub mod state;

pub use controller::{
    CaptureSession, EncodePath, LayoutKind, SessionStats, StreamBinding, StreamLayout,
};
pub use state::{DemoAction, DemoCycle, OutputState};
