// SPDX-License-Identifier: GPL-3.0-only

//! Test-pattern camera driver
//!
//! Produces a moving luma bar on every YUV stream and a fixed Bayer mosaic on
//! raw streams, paced at the requested framerate.
//!
//! ```text
//! ┌──────────────────────┐         ┌───────────────────────┐
//! │  SyntheticCamera     │         │   Capture Thread      │
//! │  (dispatcher)        │         │                       │
//! │  stop_flag ──────────┼────────►│  pace to framerate    │
//! │  free slots ─────────┼────────►│  take a buffer slot   │
//! │  frames     ◄────────┼─────────│  fill + send request  │
//! └──────────────────────┘         └───────────────────────┘
//! ```
//!
//! A request never outlives its slot: the slot returns to the pool when the
//! last reference to the request drops, so at most `buffer_count` requests are
//! ever in flight.

use super::types::*;
use super::{BackendResult, CameraDriver};
use crate::errors::CameraError;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Full sensor readout size
const SENSOR_SIZE: Size = Size::new(2304, 1296);

/// YUV row alignment in bytes
const STRIDE_ALIGN: u32 = 64;

/// Synthetic camera driver
pub struct SyntheticCamera {
    model: String,
    /// Committed configuration
    config: Option<CameraConfiguration>,
    /// Capture thread, present while running
    capture: Option<CaptureThread>,
    /// Frames delivered by the capture thread
    frames: Option<Receiver<CompletedRequestPtr>>,
    /// Sequence numbers continue across restarts
    next_sequence: u64,
}

struct CaptureThread {
    handle: Option<JoinHandle<u64>>,
    stop_flag: Arc<AtomicBool>,
}

impl CaptureThread {
    /// Stop the thread and return the next unused sequence number
    fn stop(mut self) -> Option<u64> {
        self.stop_flag.store(true, Ordering::Release);
        let handle = self.handle.take()?;
        match handle.join() {
            Ok(seq) => Some(seq),
            Err(e) => {
                error!("Synthetic capture thread panicked: {:?}", e);
                None
            }
        }
    }
}

impl Drop for CaptureThread {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take()
            && let Err(e) = handle.join()
        {
            error!("Synthetic capture thread panicked: {:?}", e);
        }
    }
}

impl SyntheticCamera {
    pub fn new() -> Self {
        Self::with_model("synthetic-imx708")
    }

    pub fn with_model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            config: None,
            capture: None,
            frames: None,
            next_sequence: 0,
        }
    }

    fn default_stream(role: StreamRole) -> StreamConfiguration {
        let (size, pixel_format, buffer_count, color_space) = match role {
            StreamRole::VideoRecording => (
                Size::new(crate::constants::video::WIDTH, crate::constants::video::HEIGHT),
                PixelFormat::Yuv420,
                4,
                Some(ColorSpace::Rec709),
            ),
            StreamRole::Viewfinder => (
                Size::new(crate::constants::lores::WIDTH, crate::constants::lores::HEIGHT),
                PixelFormat::Yuv420,
                4,
                Some(ColorSpace::Sycc),
            ),
            StreamRole::Raw => (SENSOR_SIZE, PixelFormat::RawGrbg10, 2, Some(ColorSpace::Raw)),
            StreamRole::StillCapture => {
                (SENSOR_SIZE, PixelFormat::Yuv420, 1, Some(ColorSpace::Sycc))
            }
        };
        StreamConfiguration {
            role,
            size,
            pixel_format,
            buffer_count,
            color_space,
            stride: 0,
        }
    }

    fn validate(config: &mut CameraConfiguration) -> BackendResult<()> {
        for stream in &mut config.streams {
            if stream.size.is_empty() {
                return Err(CameraError::Backend(format!(
                    "{} stream has zero size",
                    stream.role
                )));
            }
            let requested = stream.size;
            stream.size = Size::new(
                stream.size.width.min(SENSOR_SIZE.width),
                stream.size.height.min(SENSOR_SIZE.height),
            )
            .aligned_down(2);
            if stream.size != requested {
                warn!(
                    role = %stream.role,
                    requested = %requested,
                    adjusted = %stream.size,
                    "Stream size adjusted"
                );
            }
            if stream.role == StreamRole::Raw {
                stream.pixel_format = PixelFormat::RawGrbg10;
                stream.color_space = Some(ColorSpace::Raw);
            }
            stream.buffer_count = stream.buffer_count.max(1);
            stream.stride = stream
                .pixel_format
                .min_stride(stream.size.width)
                .next_multiple_of(STRIDE_ALIGN);
        }
        Ok(())
    }
}

impl Default for SyntheticCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraDriver for SyntheticCamera {
    fn camera_model(&self) -> &str {
        &self.model
    }

    fn generate_configuration(&mut self, roles: &[StreamRole]) -> Option<CameraConfiguration> {
        if roles.is_empty() {
            return None;
        }
        Some(CameraConfiguration {
            streams: roles.iter().map(|r| Self::default_stream(*r)).collect(),
            transform: Transform::default(),
            sensor_size: None,
        })
    }

    fn configure(&mut self, config: &mut CameraConfiguration) -> BackendResult<()> {
        if self.capture.is_some() {
            return Err(CameraError::AlreadyRunning);
        }
        if self.config.is_some() {
            return Err(CameraError::Backend(
                "a configuration is already committed".into(),
            ));
        }
        Self::validate(config)?;
        info!(
            roles = ?config.roles(),
            transform = ?config.transform,
            "Synthetic camera configured"
        );
        self.config = Some(config.clone());
        Ok(())
    }

    fn teardown(&mut self) -> BackendResult<()> {
        if self.capture.is_some() {
            return Err(CameraError::AlreadyRunning);
        }
        if self.config.take().is_some() {
            debug!("Synthetic camera configuration released");
        }
        Ok(())
    }

    fn stream_info(&self, stream: StreamId) -> Option<StreamInfo> {
        self.config
            .as_ref()?
            .streams
            .get(stream.0)
            .map(StreamInfo::from_config)
    }

    fn start(&mut self, controls: &CameraControls) -> BackendResult<()> {
        if self.capture.is_some() {
            return Err(CameraError::AlreadyRunning);
        }
        let config = self.config.clone().ok_or(CameraError::NotConfigured)?;

        let (frame_tx, frame_rx) = mpsc::channel();
        let stop_flag = Arc::new(AtomicBool::new(false));
        let params = CaptureParams {
            streams: config.streams,
            framerate: controls.framerate.max(1.0),
            brightness: controls.brightness,
            shutter_us: controls.shutter_us,
            first_sequence: self.next_sequence,
            stop_flag: Arc::clone(&stop_flag),
            frame_tx,
        };

        let handle = std::thread::Builder::new()
            .name("synthetic-capture".to_string())
            .spawn(move || capture_thread_main(params))
            .map_err(|e| CameraError::Backend(format!("spawn capture thread: {}", e)))?;

        info!(framerate = controls.framerate, "Synthetic camera started");
        self.capture = Some(CaptureThread {
            handle: Some(handle),
            stop_flag,
        });
        self.frames = Some(frame_rx);
        Ok(())
    }

    fn stop(&mut self) -> BackendResult<()> {
        let capture = self.capture.take().ok_or(CameraError::NotRunning)?;
        if let Some(seq) = capture.stop() {
            self.next_sequence = seq;
        }
        // Undelivered requests return their slots as they drop here
        self.frames = None;
        info!("Synthetic camera stopped");
        Ok(())
    }

    fn wait(&mut self, timeout: Duration) -> CameraMsg {
        let Some(frames) = self.frames.as_ref() else {
            std::thread::sleep(timeout);
            return CameraMsg::Timeout;
        };
        match frames.recv_timeout(timeout) {
            Ok(request) => CameraMsg::RequestComplete(request),
            Err(RecvTimeoutError::Timeout) => CameraMsg::Timeout,
            Err(RecvTimeoutError::Disconnected) => {
                error!("Synthetic capture thread disconnected");
                CameraMsg::Quit
            }
        }
    }

    fn is_running(&self) -> bool {
        self.capture.is_some()
    }
}

struct CaptureParams {
    streams: Vec<StreamConfiguration>,
    framerate: f32,
    brightness: f32,
    shutter_us: u32,
    first_sequence: u64,
    stop_flag: Arc<AtomicBool>,
    frame_tx: Sender<CompletedRequestPtr>,
}

/// Capture loop, returns the next sequence number on exit
fn capture_thread_main(params: CaptureParams) -> u64 {
    let interval = Duration::from_secs_f32(1.0 / params.framerate);
    let slots = params
        .streams
        .iter()
        .map(|s| s.buffer_count)
        .min()
        .unwrap_or(1) as usize;

    let (free_tx, free_rx) = mpsc::channel::<usize>();
    for slot in 0..slots {
        let _ = free_tx.send(slot);
    }

    let luma_bias = (params.brightness.clamp(-1.0, 1.0) * 64.0) as i32;
    let patterns: Vec<Arc<[u8]>> = params
        .streams
        .iter()
        .map(|s| base_pattern(s, luma_bias))
        .collect();

    let start = Instant::now();
    let mut next_frame = start;
    let mut sequence = params.first_sequence;

    debug!(slots, ?interval, "Synthetic capture thread running");

    while !params.stop_flag.load(Ordering::Acquire) {
        let now = Instant::now();
        if next_frame > now {
            std::thread::sleep(next_frame - now);
        }
        next_frame += interval;

        // A full pool means every buffer is still held downstream; drop the frame
        let slot = match free_rx.recv_timeout(interval) {
            Ok(slot) => slot,
            Err(_) => {
                debug!(sequence, "No free buffer, frame dropped");
                continue;
            }
        };

        let sensor_ns = start.elapsed().as_nanos() as i64;
        let buffers: HashMap<StreamId, FrameBuffer> = params
            .streams
            .iter()
            .zip(&patterns)
            .enumerate()
            .map(|(i, (stream, pattern))| {
                let data = animate(stream, pattern, sequence);
                let bytes_used = data.len();
                (
                    StreamId(i),
                    FrameBuffer {
                        fd: -1,
                        data,
                        bytes_used,
                        timestamp_ns: sensor_ns + 1_000_000,
                    },
                )
            })
            .collect();

        let request = CompletedRequest {
            sequence,
            buffers,
            metadata: Metadata {
                sequence,
                sensor_timestamp_ns: Some(sensor_ns),
                exposure_time_us: Some(if params.shutter_us > 0 {
                    params.shutter_us
                } else {
                    interval.as_micros() as u32
                }),
                analogue_gain: Some(1.0),
                colour_temperature: Some(5000),
                lux: Some(400.0),
            },
            framerate: params.framerate,
            lease: Some(BufferLease::new(slot, free_tx.clone())),
        };
        sequence += 1;

        if params.frame_tx.send(Arc::new(request)).is_err() {
            debug!("Frame receiver dropped, capture thread exiting");
            break;
        }
    }

    sequence
}

/// Static content for one stream
fn base_pattern(stream: &StreamConfiguration, luma_bias: i32) -> Arc<[u8]> {
    let w = stream.size.width as usize;
    let h = stream.size.height as usize;
    let stride = stream.stride as usize;
    let mut data = vec![0u8; stream.pixel_format.frame_size(stream.stride, stream.size.height)];

    match stream.pixel_format {
        PixelFormat::Yuv420 => {
            for y in 0..h {
                for x in 0..w {
                    let v = ((x * 255) / w.max(1)) as i32 / 2 + 64 + luma_bias;
                    data[y * stride + x] = v.clamp(0, 255) as u8;
                }
            }
            data[stride * h..].fill(128);
        }
        PixelFormat::RawGrbg10 => {
            for y in 0..h {
                for x in 0..w {
                    let value: u16 = match (y % 2, x % 2) {
                        (0, 1) => 700, // R
                        (1, 0) => 300, // B
                        _ => 500,      // G
                    };
                    let i = y * stride + x * 2;
                    data[i..i + 2].copy_from_slice(&value.to_le_bytes());
                }
            }
        }
        PixelFormat::Rgb888 => {
            for y in 0..h {
                let row = &mut data[y * stride..y * stride + w * 3];
                for (x, px) in row.chunks_exact_mut(3).enumerate() {
                    px.copy_from_slice(&[((x * 255) / w.max(1)) as u8, 96, 160]);
                }
            }
        }
    }

    Arc::from(data)
}

/// Per-frame content: YUV streams get a moving bright bar, others are shared as is
fn animate(stream: &StreamConfiguration, pattern: &Arc<[u8]>, sequence: u64) -> Arc<[u8]> {
    if stream.pixel_format != PixelFormat::Yuv420 {
        return Arc::clone(pattern);
    }
    let w = stream.size.width as usize;
    let h = stream.size.height as usize;
    let stride = stream.stride as usize;
    let bar = (w / 16).max(1);
    let x0 = (sequence as usize * 8) % w.max(1);

    let mut data = pattern.to_vec();
    for y in 0..h {
        let row = &mut data[y * stride..y * stride + w];
        for px in row.iter_mut().skip(x0).take(bar) {
            *px = 235;
        }
    }
    Arc::from(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config(camera: &mut SyntheticCamera) -> CameraConfiguration {
        let mut config = camera
            .generate_configuration(&[StreamRole::VideoRecording, StreamRole::Viewfinder])
            .unwrap();
        config.streams[0].size = Size::new(64, 48);
        config.streams[0].buffer_count = 2;
        config.streams[1].size = Size::new(33, 25);
        config.streams[1].buffer_count = 2;
        config
    }

    #[test]
    fn test_configure_aligns_and_sets_stride() {
        let mut camera = SyntheticCamera::new();
        let mut config = small_config(&mut camera);
        camera.configure(&mut config).unwrap();
        assert_eq!(config.streams[1].size, Size::new(32, 24));
        assert_eq!(config.streams[0].stride, 64);
        let info = camera.stream_info(StreamId(1)).unwrap();
        assert!(info.is_configured());
    }

    #[test]
    fn test_reconfigure_requires_teardown() {
        let mut camera = SyntheticCamera::new();
        let mut config = small_config(&mut camera);
        camera.configure(&mut config).unwrap();
        assert!(camera.configure(&mut config.clone()).is_err());
        camera.teardown().unwrap();
        camera.configure(&mut config).unwrap();
    }

    #[test]
    fn test_buffers_recycle_when_requests_drop() {
        let mut camera = SyntheticCamera::new();
        let mut config = small_config(&mut camera);
        camera.configure(&mut config).unwrap();
        let controls = CameraControls {
            framerate: 200.0,
            ..Default::default()
        };
        camera.start(&controls).unwrap();

        let mut held = Vec::new();
        for _ in 0..2 {
            match camera.wait(Duration::from_secs(2)) {
                CameraMsg::RequestComplete(r) => held.push(r),
                other => panic!("unexpected {:?}", other),
            }
        }
        // Both slots are held, nothing more can arrive
        assert!(matches!(
            camera.wait(Duration::from_millis(100)),
            CameraMsg::Timeout
        ));

        held.clear();
        assert!(matches!(
            camera.wait(Duration::from_secs(2)),
            CameraMsg::RequestComplete(_)
        ));
        camera.stop().unwrap();
        camera.teardown().unwrap();
    }

    #[test]
    fn test_teardown_refused_while_running() {
        let mut camera = SyntheticCamera::new();
        let mut config = small_config(&mut camera);
        camera.configure(&mut config).unwrap();
        camera.start(&CameraControls::default()).unwrap();
        assert!(camera.teardown().is_err());
        camera.stop().unwrap();
        assert!(camera.teardown().is_ok());
    }
}
