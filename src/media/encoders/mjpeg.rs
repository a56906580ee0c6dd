// SPDX-License-Identifier: MPL-2.0

//! Motion JPEG encoder
//!
//! Frames are compressed on a dedicated worker thread so the dispatcher never
//! waits on JPEG encoding. Every output frame is a keyframe.

use super::{EncodeInput, Encoder, EncoderContext};
use crate::backends::camera::StreamRole;
use crate::backends::camera::format_converters::to_rgb;
use crate::errors::EncoderError;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;
use tracing::{debug, error};

pub struct MjpegEncoder {
    role: StreamRole,
    input: Option<Sender<EncodeInput>>,
    worker: Option<JoinHandle<()>>,
}

impl MjpegEncoder {
    pub fn new(role: StreamRole, quality: u8, ctx: EncoderContext) -> Result<Self, EncoderError> {
        let (tx, rx) = mpsc::channel();
        let quality = quality.clamp(1, 100);
        let worker = std::thread::Builder::new()
            .name(format!("mjpeg-{}", role))
            .spawn(move || encode_loop(rx, quality, ctx))
            .map_err(|e| EncoderError::InitializationFailed(e.to_string()))?;
        debug!(%role, quality, "MJPEG encoder started");
        Ok(Self {
            role,
            input: Some(tx),
            worker: Some(worker),
        })
    }
}

/// Compress one frame to JPEG
pub fn encode_frame(input: &EncodeInput, quality: u8) -> Result<Vec<u8>, EncoderError> {
    let rgb = to_rgb(input.span.as_slice(), &input.info).ok_or_else(|| {
        EncoderError::EncodeFailed(format!(
            "{} frame of {} bytes too short for {}x{}",
            input.info.pixel_format,
            input.span.len(),
            input.info.width,
            input.info.height
        ))
    })?;

    let mut jpeg = Vec::with_capacity(rgb.len() / 8);
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, quality)
        .encode(
            &rgb,
            input.info.width,
            input.info.height,
            image::ExtendedColorType::Rgb8,
        )
        .map_err(|e| EncoderError::EncodeFailed(e.to_string()))?;
    Ok(jpeg)
}

fn encode_loop(rx: Receiver<EncodeInput>, quality: u8, ctx: EncoderContext) {
    for input in rx {
        match encode_frame(&input, quality) {
            Ok(jpeg) => ctx.emit(&jpeg, input.timestamp_us, true),
            Err(e) => {
                error!(error = %e, "MJPEG encode failed");
                ctx.callbacks.fault(e);
            }
        }
        // Release the camera buffer before reporting completion
        drop(input);
        ctx.callbacks.input_done();
    }
}

impl Encoder for MjpegEncoder {
    fn encode(&mut self, input: EncodeInput) -> Result<(), EncoderError> {
        self.input
            .as_ref()
            .ok_or(EncoderError::WorkerGone)?
            .send(input)
            .map_err(|_| EncoderError::WorkerGone)
    }
}

impl Drop for MjpegEncoder {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain what is queued and exit
        self.input = None;
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            error!(role = %self.role, "MJPEG worker panicked");
        }
        debug!(role = %self.role, "MJPEG encoder stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::{ColorSpace, PixelFormat, StreamInfo};
    use crate::media::encoders::{EncodeCallbacks, FrameSpan};
    use crate::media::outputs::{FrameWriter, Output, shared};
    use crate::errors::OutputError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Counts {
        done: AtomicUsize,
        faults: AtomicUsize,
    }

    impl EncodeCallbacks for Counts {
        fn input_done(&self) {
            self.done.fetch_add(1, Ordering::SeqCst);
        }
        fn fault(&self, _error: EncoderError) {
            self.faults.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Clone, Default)]
    struct Frames(Arc<Mutex<Vec<Vec<u8>>>>);

    impl FrameWriter for Frames {
        fn write_frame(&mut self, data: &[u8], _ts: i64, _key: bool) -> Result<(), OutputError> {
            self.0.lock().unwrap().push(data.to_vec());
            Ok(())
        }
    }

    fn input(len: usize) -> EncodeInput {
        let info = StreamInfo {
            width: 16,
            height: 8,
            stride: 16,
            pixel_format: PixelFormat::Yuv420,
            color_space: Some(ColorSpace::Sycc),
        };
        EncodeInput {
            fd: -1,
            span: FrameSpan::new(vec![128u8; len].into(), len),
            info,
            timestamp_us: 0,
        }
    }

    #[test]
    fn test_frames_encoded_and_completed_in_order() {
        let counts = Arc::new(Counts::default());
        let frames = Frames::default();
        let ctx = EncoderContext {
            callbacks: counts.clone(),
            sink: shared(Output::new(Box::new(frames.clone()), None)),
        };
        let mut enc = MjpegEncoder::new(StreamRole::Viewfinder, 50, ctx).unwrap();
        enc.encode(input(16 * 8 * 3 / 2)).unwrap();
        enc.encode(input(16 * 8 * 3 / 2)).unwrap();
        drop(enc);

        assert_eq!(counts.done.load(Ordering::SeqCst), 2);
        assert_eq!(counts.faults.load(Ordering::SeqCst), 0);
        let frames = frames.0.lock().unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[0][..2], &[0xff, 0xd8]);
    }

    #[test]
    fn test_short_frame_faults_but_completes() {
        let counts = Arc::new(Counts::default());
        let ctx = EncoderContext {
            callbacks: counts.clone(),
            sink: shared(Output::new(Box::new(Frames::default()), None)),
        };
        let mut enc = MjpegEncoder::new(StreamRole::Viewfinder, 50, ctx).unwrap();
        enc.encode(input(10)).unwrap();
        drop(enc);
        assert_eq!(counts.done.load(Ordering::SeqCst), 1);
        assert_eq!(counts.faults.load(Ordering::SeqCst), 1);
    }
}
