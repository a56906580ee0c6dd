// SPDX-License-Identifier: MPL-2.0

//! Encoder resources
//!
//! An [`Encoder`] accepts frames through [`Encoder::encode`] and reports back in
//! two ways. The encoded bytes go to the path's output sink, and
//! [`EncodeCallbacks::input_done`] fires exactly once per accepted frame when
//! the encoder no longer needs the input memory. Dropping an encoder flushes
//! it and joins any worker thread.
//!
//! Available codecs:
//! - **MJPEG**: one JPEG per frame on a worker thread ([`mjpeg`])
//! - **YUV420**: raw passthrough ([`yuv`])
//! - **H.264**: GStreamer, hardware first, with the `h264` feature

#[cfg(feature = "h264")]
pub mod h264;
pub mod mjpeg;
pub mod yuv;

use crate::backends::camera::{StreamInfo, StreamRole};
use crate::config::{Codec, PathOptions};
use crate::errors::EncoderError;
use crate::media::outputs::SharedSink;
use std::sync::Arc;
#[cfg(not(feature = "h264"))]
use tracing::warn;

/// Frame memory handed to an encoder
///
/// Holds a reference to the camera buffer so the memory stays valid until the
/// encoder drops it.
#[derive(Clone)]
pub struct FrameSpan {
    data: Arc<[u8]>,
    len: usize,
}

impl FrameSpan {
    pub fn new(data: Arc<[u8]>, len: usize) -> Self {
        let len = len.min(data.len());
        Self { data, len }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// One frame submitted for encoding
#[derive(Clone)]
pub struct EncodeInput {
    pub fd: i32,
    pub span: FrameSpan,
    pub info: StreamInfo,
    pub timestamp_us: i64,
}

/// Completion side of an encoder
pub trait EncodeCallbacks: Send + Sync {
    /// The oldest submitted frame has been consumed
    fn input_done(&self);

    /// An error occurred off the dispatcher thread
    fn fault(&self, error: EncoderError);
}

/// What an encoder is wired to
#[derive(Clone)]
pub struct EncoderContext {
    pub callbacks: Arc<dyn EncodeCallbacks>,
    pub sink: SharedSink,
}

impl EncoderContext {
    /// Forward one encoded unit to the sink, reporting sink failures as faults
    pub fn emit(&self, data: &[u8], timestamp_us: i64, keyframe: bool) {
        let result = match self.sink.lock() {
            Ok(mut sink) => sink.on_encoded_data(data, timestamp_us, keyframe),
            Err(_) => {
                self.callbacks
                    .fault(EncoderError::EncodeFailed("output sink poisoned".into()));
                return;
            }
        };
        if let Err(e) = result {
            self.callbacks.fault(EncoderError::EncodeFailed(e.to_string()));
        }
    }
}

pub trait Encoder: Send {
    /// Queue one frame; `input_done` follows once it has been consumed
    fn encode(&mut self, input: EncodeInput) -> Result<(), EncoderError>;
}

/// Creates the encoder for a path
pub trait EncoderFactory: Send {
    fn create(
        &self,
        role: StreamRole,
        options: &PathOptions,
        info: &StreamInfo,
        ctx: EncoderContext,
    ) -> Result<Box<dyn Encoder>, EncoderError>;
}

/// Picks the encoder from the path's codec
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultEncoderFactory;

impl EncoderFactory for DefaultEncoderFactory {
    fn create(
        &self,
        role: StreamRole,
        options: &PathOptions,
        info: &StreamInfo,
        ctx: EncoderContext,
    ) -> Result<Box<dyn Encoder>, EncoderError> {
        if !info.is_configured() {
            return Err(EncoderError::InitializationFailed(format!(
                "{} stream has no geometry",
                role
            )));
        }
        match options.codec {
            Codec::Mjpeg => Ok(Box::new(mjpeg::MjpegEncoder::new(
                role,
                options.quality,
                ctx,
            )?)),
            Codec::Yuv420 => Ok(Box::new(yuv::YuvEncoder::new(ctx))),
            #[cfg(feature = "h264")]
            Codec::H264 => Ok(Box::new(h264::H264Encoder::new(options, info, ctx)?)),
            #[cfg(not(feature = "h264"))]
            Codec::H264 => {
                warn!(%role, "Built without H.264 support, recording MJPEG instead");
                Ok(Box::new(mjpeg::MjpegEncoder::new(
                    role,
                    options.quality,
                    ctx,
                )?))
            }
        }
    }
}
