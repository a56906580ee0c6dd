// SPDX-License-Identifier: MPL-2.0

//! Frame processing downstream of the camera
//!
//! - [`encode_path`]: per-stream encoder adapters and their pending queues
//! - [`motion`]: lores motion detection
//! - [`photo`]: still encoding and saving

pub mod encode_path;
pub mod motion;
pub mod photo;
