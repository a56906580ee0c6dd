// SPDX-License-Identifier: MPL-2.0

//! H.264 encoder through GStreamer
//!
//! Pipeline: `appsrc (I420) ! <encoder> ! h264parse ! appsink`.
//! Encoders are probed hardware first:
//! 1. `v4l2h264enc` (Raspberry Pi hardware block)
//! 2. `x264enc`
//! 3. `openh264enc`
//!
//! Input frames are copied into GStreamer buffers, so `input_done` fires as
//! soon as a frame has been pushed.

use super::{EncodeInput, Encoder, EncoderContext};
use crate::backends::camera::StreamInfo;
use crate::config::PathOptions;
use crate::errors::EncoderError;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use tracing::{debug, error, info, warn};

/// Candidate encoders in priority order
const ENCODERS: [&str; 3] = ["v4l2h264enc", "x264enc", "openh264enc"];

fn init_failed(what: impl std::fmt::Display) -> EncoderError {
    EncoderError::InitializationFailed(what.to_string())
}

/// First encoder element that can be instantiated
fn select_encoder() -> Result<(gst::Element, &'static str), EncoderError> {
    for name in ENCODERS {
        if let Ok(element) = gst::ElementFactory::make(name).build() {
            info!(encoder = name, "Selected H.264 encoder");
            return Ok((element, name));
        }
    }
    Err(init_failed(
        "no H.264 encoder available (install gstreamer1-plugins-good or -ugly)",
    ))
}

fn configure_encoder(encoder: &gst::Element, name: &str, bitrate: u32, intra: u32) {
    match name {
        "v4l2h264enc" => {
            let mut controls = gst::Structure::builder("controls").field("repeat_sequence_header", 1i32);
            if bitrate > 0 {
                controls = controls.field("video_bitrate", bitrate as i32);
            }
            if intra > 0 {
                controls = controls.field("h264_i_frame_period", intra as i32);
            }
            encoder.set_property("extra-controls", controls.build());
        }
        "x264enc" => {
            encoder.set_property_from_str("speed-preset", "ultrafast");
            encoder.set_property_from_str("tune", "zerolatency");
            if bitrate > 0 {
                // kbit/s
                encoder.set_property("bitrate", (bitrate / 1000).max(1));
            }
            if intra > 0 {
                encoder.set_property("key-int-max", intra);
            }
        }
        "openh264enc" => {
            encoder.set_property_from_str("usage-type", "camera");
            if bitrate > 0 {
                encoder.set_property_from_str("rate-control", "bitrate");
                encoder.set_property("bitrate", bitrate);
            }
            if intra > 0 {
                encoder.set_property("gop-size", intra);
            }
        }
        _ => {}
    }
    debug!(encoder = name, bitrate, intra, "Configured H.264 encoder");
}

pub struct H264Encoder {
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    info: StreamInfo,
    ctx: EncoderContext,
}

impl H264Encoder {
    pub fn new(
        options: &PathOptions,
        info: &StreamInfo,
        ctx: EncoderContext,
    ) -> Result<Self, EncoderError> {
        gst::init().map_err(|e| init_failed(format!("GStreamer init failed: {}", e)))?;

        let (encoder, name) = select_encoder()?;
        configure_encoder(&encoder, name, options.bitrate, options.intra);

        let fps = options.framerate.max(1.0).round() as i32;
        let video_info =
            gst_video::VideoInfo::builder(gst_video::VideoFormat::I420, info.width, info.height)
                .fps(gst::Fraction::new(fps, 1))
                .build()
                .map_err(|e| init_failed(format!("invalid video geometry: {}", e)))?;
        let caps = video_info
            .to_caps()
            .map_err(|e| init_failed(format!("failed to build caps: {}", e)))?;
        let appsrc = gst_app::AppSrc::builder()
            .caps(&caps)
            .format(gst::Format::Time)
            .is_live(true)
            .build();

        let parser = gst::ElementFactory::make("h264parse")
            .build()
            .map_err(|e| init_failed(format!("h264parse: {}", e)))?;
        let out_caps = gst::Caps::builder("video/x-h264")
            .field("stream-format", "byte-stream")
            .field("alignment", "au")
            .build();
        let appsink = gst_app::AppSink::builder().caps(&out_caps).sync(false).build();

        let sink_ctx = ctx.clone();
        appsink.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |sink| {
                    let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                    let buffer = sample.buffer().ok_or(gst::FlowError::Error)?;
                    let map = buffer.map_readable().map_err(|_| gst::FlowError::Error)?;
                    let keyframe = !buffer.flags().contains(gst::BufferFlags::DELTA_UNIT);
                    let ts = buffer.pts().map(|t| t.useconds() as i64).unwrap_or_default();
                    sink_ctx.emit(map.as_slice(), ts, keyframe);
                    Ok(gst::FlowSuccess::Ok)
                })
                .build(),
        );

        let pipeline = gst::Pipeline::new();
        pipeline
            .add_many([appsrc.upcast_ref(), &encoder, &parser, appsink.upcast_ref()])
            .map_err(|e| init_failed(format!("failed to add elements: {}", e)))?;
        gst::Element::link_many([appsrc.upcast_ref(), &encoder, &parser, appsink.upcast_ref()])
            .map_err(|e| init_failed(format!("failed to link elements: {}", e)))?;

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| init_failed(format!("failed to start pipeline: {}", e)))?;

        info!(width = info.width, height = info.height, fps, "H.264 pipeline started");
        Ok(Self {
            pipeline,
            appsrc,
            info: *info,
            ctx,
        })
    }

    /// Tightly packed I420 from a possibly padded frame
    fn pack_i420(&self, data: &[u8]) -> Option<Vec<u8>> {
        let w = self.info.width as usize;
        let h = self.info.height as usize;
        let stride = self.info.stride as usize;
        if stride == w {
            return data.get(..w * h * 3 / 2).map(<[u8]>::to_vec);
        }

        let c_stride = stride / 2;
        let (cw, ch) = (w / 2, h.div_ceil(2));
        let y_size = stride * h;
        let c_size = c_stride * ch;
        if data.len() < y_size + 2 * c_size {
            return None;
        }
        let mut out = Vec::with_capacity(w * h + 2 * cw * ch);
        for row in data[..y_size].chunks(stride) {
            out.extend_from_slice(&row[..w]);
        }
        for plane in [&data[y_size..y_size + c_size], &data[y_size + c_size..y_size + 2 * c_size]] {
            for row in plane.chunks(c_stride) {
                out.extend_from_slice(&row[..cw]);
            }
        }
        Some(out)
    }

    fn check_bus(&self) -> Result<(), EncoderError> {
        let Some(bus) = self.pipeline.bus() else {
            return Ok(());
        };
        if let Some(msg) = bus.pop_filtered(&[gst::MessageType::Error])
            && let gst::MessageView::Error(err) = msg.view()
        {
            return Err(EncoderError::EncodeFailed(err.error().to_string()));
        }
        Ok(())
    }
}

impl Encoder for H264Encoder {
    fn encode(&mut self, input: EncodeInput) -> Result<(), EncoderError> {
        self.check_bus()?;
        let Some(packed) = self.pack_i420(input.span.as_slice()) else {
            let len = input.span.len();
            drop(input);
            self.ctx.callbacks.input_done();
            return Err(EncoderError::EncodeFailed(format!("short frame of {} bytes", len)));
        };
        let timestamp_us = input.timestamp_us;
        drop(input);

        let mut buffer = gst::Buffer::from_mut_slice(packed);
        if let Some(buffer) = buffer.get_mut() {
            buffer.set_pts(gst::ClockTime::from_useconds(timestamp_us.max(0) as u64));
        }
        let pushed = self.appsrc.push_buffer(buffer);
        self.ctx.callbacks.input_done();
        pushed
            .map(|_| ())
            .map_err(|e| EncoderError::EncodeFailed(format!("push failed: {:?}", e)))
    }
}

impl Drop for H264Encoder {
    fn drop(&mut self) {
        // Drain queued frames so the file ends on a complete access unit
        if self.appsrc.end_of_stream().is_ok()
            && let Some(bus) = self.pipeline.bus()
        {
            let done = bus.timed_pop_filtered(
                gst::ClockTime::from_seconds(2),
                &[gst::MessageType::Eos, gst::MessageType::Error],
            );
            if done.is_none() {
                warn!("H.264 pipeline did not drain before shutdown");
            }
        }
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            error!(?e, "Failed to stop H.264 pipeline");
        }
        debug!("H.264 encoder stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::{
        CompletedRequest, FrameBuffer, Metadata, PixelFormat, StreamId, StreamRole,
    };
    use crate::config::Config;
    use crate::errors::{AppError, OutputError};
    use crate::media::outputs::{FrameWriter, Output, shared};
    use crate::pipelines::encode_path::{EncoderAdapter, FaultSlot, PendingEncodeQueue};
    use std::collections::HashMap;
    use std::sync::Arc;

    struct NullWriter;
    impl FrameWriter for NullWriter {
        fn write_frame(&mut self, _: &[u8], _: i64, _: bool) -> Result<(), OutputError> {
            Ok(())
        }
    }

    #[test]
    fn test_short_frame_is_released() {
        let info = StreamInfo {
            width: 64,
            height: 32,
            stride: 64,
            pixel_format: PixelFormat::Yuv420,
            color_space: None,
        };
        let role = StreamRole::VideoRecording;
        let stream = StreamId(0);
        let queue = Arc::new(PendingEncodeQueue::default());
        let sink = shared(Output::new(Box::new(NullWriter), None));
        let faults = FaultSlot::new();
        let ctx = EncoderContext {
            callbacks: EncoderAdapter::callbacks(role, &queue, &sink, false, &faults),
            sink: Arc::clone(&sink),
        };
        let Ok(encoder) = H264Encoder::new(&Config::default().video_options(), &info, ctx) else {
            eprintln!("no H.264 encoder element available, skipping");
            return;
        };
        let mut adapter =
            EncoderAdapter::new(role, stream, info, Arc::clone(&queue), Box::new(encoder), sink);

        let mut buffers = HashMap::new();
        buffers.insert(
            stream,
            FrameBuffer {
                fd: -1,
                data: vec![0u8; 100].into(),
                bytes_used: 100,
                timestamp_ns: 0,
            },
        );
        let request = Arc::new(CompletedRequest {
            sequence: 0,
            buffers,
            metadata: Metadata::default(),
            framerate: 30.0,
            lease: None,
        });

        assert!(matches!(
            adapter.encode_buffer(&request),
            Err(AppError::Encoder(EncoderError::EncodeFailed(_)))
        ));
        // The failed frame left the queue like any completed one
        assert_eq!(adapter.pending(), 0);
        assert_eq!(Arc::strong_count(&request), 1);
        assert!(faults.take().is_none());
    }
}
