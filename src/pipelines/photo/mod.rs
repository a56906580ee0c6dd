// SPDX-License-Identifier: GPL-3.0-only

//! Still image pipeline
//!
//! ```text
//! StillFrame ──▶ encoding::encode ──▶ ImageSaver ──▶ file (+ DNG, latest link)
//! ```

pub mod encoding;
pub mod saver;

pub use encoding::{EncodingFormat, StillFrame};
pub use saver::{ImageSaver, advance_counter, update_latest};
