// SPDX-License-Identifier: MPL-2.0

//! Frame encoders and the sinks their output is written to

pub mod encoders;
pub mod outputs;
