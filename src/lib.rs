// SPDX-License-Identifier: MPL-2.0

//! picam-mjpeg - Raspberry Pi camera daemon
//!
//! One camera feeds three paths at once: an MJPEG preview rewritten on every
//! lores frame, an on-demand video recording and still captures. A control
//! FIFO and POSIX signals drive the session.
//!
//! # Architecture
//!
//! - [`session`]: stream layout, camera lifecycle and encoder paths
//! - [`event_loop`]: the per-frame dispatcher
//! - [`backends`]: camera driver abstraction and the synthetic driver
//! - [`media`]: encoders and output sinks
//! - [`pipelines`]: encoder adapters, still saving and motion detection
//! - [`control`]: FIFO commands, signals and persisted settings
//! - [`config`]: layered configuration
//! - [`naming`]: filename templates
//! - [`storage`]: persisted media counters

pub mod backends;
pub mod config;
pub mod constants;
pub mod control;
pub mod errors;
pub mod event_loop;
pub mod media;
pub mod naming;
pub mod pipelines;
pub mod session;
pub mod storage;

pub use config::Config;
pub use errors::{AppError, AppResult};
pub use event_loop::{EventLoop, LoopExit};
pub use session::CaptureSession;
