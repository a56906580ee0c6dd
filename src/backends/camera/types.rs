// SPDX-License-Identifier: GPL-3.0-only

//! Shared types for camera drivers

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::mpsc::Sender;

/// Logical purpose of a camera stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamRole {
    /// Main full-rate stream for recording
    VideoRecording,
    /// Low resolution stream for the MJPEG preview and motion analysis
    Viewfinder,
    /// Unprocessed sensor data
    Raw,
    /// Dedicated full resolution still stream
    StillCapture,
}

impl fmt::Display for StreamRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamRole::VideoRecording => "video",
            StreamRole::Viewfinder => "lores",
            StreamRole::Raw => "raw",
            StreamRole::StillCapture => "still",
        };
        f.write_str(name)
    }
}

/// Frame dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Round both dimensions down to a multiple of `align`
    pub fn aligned_down(self, align: u32) -> Self {
        let align = align.max(1);
        Self {
            width: self.width - self.width % align,
            height: self.height - self.height % align,
        }
    }

    /// Whether either dimension is larger than `other`'s
    pub fn exceeds(&self, other: &Size) -> bool {
        self.width > other.width || self.height > other.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Pixel layouts the pipeline understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Planar 4:2:0, Y then U then V
    Yuv420,
    /// Packed 8-bit RGB
    Rgb888,
    /// 16-bit little-endian GRBG Bayer, 10 significant bits
    RawGrbg10,
}

impl PixelFormat {
    /// Bytes for one frame with the given stride and height
    pub fn frame_size(&self, stride: u32, height: u32) -> usize {
        let plane = stride as usize * height as usize;
        match self {
            PixelFormat::Yuv420 => plane + plane / 2,
            PixelFormat::Rgb888 | PixelFormat::RawGrbg10 => plane,
        }
    }

    /// Minimum stride for a row of `width` pixels
    pub fn min_stride(&self, width: u32) -> u32 {
        match self {
            PixelFormat::Yuv420 => width,
            PixelFormat::Rgb888 => width * 3,
            PixelFormat::RawGrbg10 => width * 2,
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, PixelFormat::RawGrbg10)
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelFormat::Yuv420 => "YUV420",
            PixelFormat::Rgb888 => "RGB888",
            PixelFormat::RawGrbg10 => "SGRBG10",
        };
        f.write_str(name)
    }
}

/// Colour encoding attached to a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorSpace {
    /// HD video (BT.709, limited range)
    Rec709,
    /// SD video (BT.601, limited range)
    Smpte170m,
    /// JPEG (BT.601, full range)
    Sycc,
    /// Sensor native
    Raw,
}

/// Sensor readout orientation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Transform {
    pub hflip: bool,
    pub vflip: bool,
}

impl Transform {
    /// Compose a rotation (0 or 180) with explicit flips
    pub fn from_options(rotation: u32, hflip: bool, vflip: bool) -> Option<Self> {
        let rotated = match rotation {
            0 => false,
            180 => true,
            _ => return None,
        };
        Some(Self {
            hflip: hflip ^ rotated,
            vflip: vflip ^ rotated,
        })
    }
}

/// Index of a stream inside the live configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(pub usize);

/// One stream inside a camera configuration
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfiguration {
    pub role: StreamRole,
    pub size: Size,
    pub pixel_format: PixelFormat,
    pub buffer_count: u32,
    pub color_space: Option<ColorSpace>,
    /// Filled in by the driver when the configuration is committed
    pub stride: u32,
}

/// A full multi-stream configuration
#[derive(Debug, Clone, PartialEq)]
pub struct CameraConfiguration {
    pub streams: Vec<StreamConfiguration>,
    pub transform: Transform,
    /// Sensor readout size, when a specific mode was requested
    pub sensor_size: Option<Size>,
}

impl CameraConfiguration {
    pub fn stream_for(&self, role: StreamRole) -> Option<(StreamId, &StreamConfiguration)> {
        self.streams
            .iter()
            .enumerate()
            .find(|(_, s)| s.role == role)
            .map(|(i, s)| (StreamId(i), s))
    }

    pub fn stream_mut(&mut self, role: StreamRole) -> Option<&mut StreamConfiguration> {
        self.streams.iter_mut().find(|s| s.role == role)
    }

    pub fn roles(&self) -> Vec<StreamRole> {
        self.streams.iter().map(|s| s.role).collect()
    }
}

/// Geometry of a committed stream as seen by consumers
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub pixel_format: PixelFormat,
    pub color_space: Option<ColorSpace>,
}

impl StreamInfo {
    pub fn from_config(cfg: &StreamConfiguration) -> Self {
        Self {
            width: cfg.size.width,
            height: cfg.size.height,
            stride: cfg.stride,
            pixel_format: cfg.pixel_format,
            color_space: cfg.color_space,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.width > 0 && self.height > 0 && self.stride > 0
    }
}

/// Runtime controls applied on every camera start
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraControls {
    pub brightness: f32,
    pub contrast: f32,
    pub saturation: f32,
    pub sharpness: f32,
    /// Fixed exposure in microseconds, 0 for auto
    pub shutter_us: u32,
    pub framerate: f32,
}

impl Default for CameraControls {
    fn default() -> Self {
        Self {
            brightness: 0.0,
            contrast: 1.0,
            saturation: 1.0,
            sharpness: 1.0,
            shutter_us: 0,
            framerate: crate::constants::video::FRAMERATE,
        }
    }
}

/// Per-capture metadata reported by the driver
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Metadata {
    /// Driver frame sequence number
    pub sequence: u64,
    /// Start of exposure in nanoseconds, when the sensor reports it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sensor_timestamp_ns: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exposure_time_us: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analogue_gain: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub colour_temperature: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lux: Option<f32>,
}

/// A filled buffer belonging to one stream
///
/// Plane memory is reference counted so the buffer stays mapped for as long as
/// any encoder or saver still holds its request.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    /// dmabuf descriptor, or -1 for heap-backed buffers
    pub fd: i32,
    pub data: Arc<[u8]>,
    /// Bytes of `data` holding valid image data
    pub bytes_used: usize,
    /// Buffer completion time in nanoseconds
    pub timestamp_ns: i64,
}

impl FrameBuffer {
    pub fn span(&self) -> &[u8] {
        &self.data[..self.bytes_used.min(self.data.len())]
    }
}

/// Returns a request's buffer slot to its driver when dropped
pub struct BufferLease {
    slot: usize,
    recycler: Sender<usize>,
}

impl BufferLease {
    pub fn new(slot: usize, recycler: Sender<usize>) -> Self {
        Self { slot, recycler }
    }
}

impl Drop for BufferLease {
    fn drop(&mut self) {
        // The driver may already be gone during shutdown
        let _ = self.recycler.send(self.slot);
    }
}

impl fmt::Debug for BufferLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferLease").field("slot", &self.slot).finish()
    }
}

/// A camera-filled request: one buffer per configured stream plus metadata
#[derive(Debug)]
pub struct CompletedRequest {
    pub sequence: u64,
    pub buffers: HashMap<StreamId, FrameBuffer>,
    pub metadata: Metadata,
    pub framerate: f32,
    pub lease: Option<BufferLease>,
}

impl CompletedRequest {
    pub fn buffer(&self, stream: StreamId) -> Option<&FrameBuffer> {
        self.buffers.get(&stream)
    }

    /// Frame time in microseconds, sensor timestamp first
    pub fn timestamp_us(&self, buffer: &FrameBuffer) -> i64 {
        self.metadata
            .sensor_timestamp_ns
            .unwrap_or(buffer.timestamp_ns)
            / 1000
    }
}

/// Shared handle to a completed request
pub type CompletedRequestPtr = Arc<CompletedRequest>;

/// What a blocking wait on the camera produced
#[derive(Debug)]
pub enum CameraMsg {
    RequestComplete(CompletedRequestPtr),
    /// No request within the hardware timeout
    Timeout,
    /// Driver asked the application to exit
    Quit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_down_to_even() {
        assert_eq!(Size::new(641, 479).aligned_down(2), Size::new(640, 478));
        assert_eq!(Size::new(640, 480).aligned_down(2), Size::new(640, 480));
    }

    #[test]
    fn test_transform_rotation_composes_flips() {
        let t = Transform::from_options(180, true, false).unwrap();
        assert_eq!(
            t,
            Transform {
                hflip: false,
                vflip: true
            }
        );
        assert!(Transform::from_options(90, false, false).is_none());
    }

    #[test]
    fn test_timestamp_prefers_sensor() {
        let buffer = FrameBuffer {
            fd: -1,
            data: Arc::from(vec![0u8; 4]),
            bytes_used: 4,
            timestamp_ns: 9_000,
        };
        let mut request = CompletedRequest {
            sequence: 0,
            buffers: HashMap::new(),
            metadata: Metadata::default(),
            framerate: 30.0,
            lease: None,
        };
        assert_eq!(request.timestamp_us(&buffer), 9);
        request.metadata.sensor_timestamp_ns = Some(5_000_000);
        assert_eq!(request.timestamp_us(&buffer), 5_000);
    }

    #[test]
    fn test_yuv420_frame_size() {
        assert_eq!(PixelFormat::Yuv420.frame_size(640, 480), 640 * 480 * 3 / 2);
    }
}
