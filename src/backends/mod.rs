// SPDX-License-Identifier: MPL-2.0

//! Backend abstraction layer for camera capture

pub mod camera;
