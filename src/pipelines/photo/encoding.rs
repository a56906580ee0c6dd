// SPDX-License-Identifier: GPL-3.0-only

//! Still image encoding
//!
//! Supported outputs:
//! - JPEG (with quality control)
//! - PNG and BMP (lossless)
//! - YUV420 (the frame bytes as captured)
//! - DNG (raw Bayer frames only)

use crate::backends::camera::format_converters::to_rgb;
use crate::backends::camera::{Metadata, PixelFormat, StreamInfo};
use crate::config::StillEncoding;
use crate::errors::PhotoError;
use image::{ImageFormat, RgbImage};
use std::io::Cursor;
use std::sync::Arc;
use tracing::debug;

/// Supported encoding formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingFormat {
    Jpeg,
    Png,
    Bmp,
    Yuv420,
    /// Raw Bayer data
    Dng,
}

impl EncodingFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            EncodingFormat::Jpeg => "jpg",
            EncodingFormat::Png => "png",
            EncodingFormat::Bmp => "bmp",
            EncodingFormat::Yuv420 => "yuv",
            EncodingFormat::Dng => "dng",
        }
    }

    fn name(&self) -> &'static str {
        match self {
            EncodingFormat::Jpeg => "jpeg",
            EncodingFormat::Png => "png",
            EncodingFormat::Bmp => "bmp",
            EncodingFormat::Yuv420 => "yuv420",
            EncodingFormat::Dng => "dng",
        }
    }
}

impl From<StillEncoding> for EncodingFormat {
    fn from(encoding: StillEncoding) -> Self {
        match encoding {
            StillEncoding::Jpg => EncodingFormat::Jpeg,
            StillEncoding::Png => EncodingFormat::Png,
            StillEncoding::Bmp => EncodingFormat::Bmp,
            StillEncoding::Yuv420 => EncodingFormat::Yuv420,
        }
    }
}

/// A captured frame owned independently of the camera request
#[derive(Debug, Clone)]
pub struct StillFrame {
    data: Arc<[u8]>,
    len: usize,
    pub info: StreamInfo,
    pub metadata: Metadata,
}

impl StillFrame {
    pub fn new(data: Arc<[u8]>, len: usize, info: StreamInfo, metadata: Metadata) -> Self {
        let len = len.min(data.len());
        Self {
            data,
            len,
            info,
            metadata,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn is_raw(&self) -> bool {
        self.info.pixel_format.is_raw()
    }
}

fn rgb_image(frame: &StillFrame, format: EncodingFormat) -> Result<RgbImage, PhotoError> {
    let rgb = to_rgb(frame.bytes(), &frame.info).ok_or_else(|| PhotoError::UnsupportedFormat {
        format: format!(
            "{} {}x{} ({} bytes)",
            frame.info.pixel_format,
            frame.info.width,
            frame.info.height,
            frame.bytes().len()
        ),
        encoding: format.name(),
    })?;
    RgbImage::from_raw(frame.info.width, frame.info.height, rgb)
        .ok_or_else(|| PhotoError::EncodingFailed("RGB buffer size mismatch".into()))
}

/// Encode `frame` in `format`
pub fn encode(
    frame: &StillFrame,
    format: EncodingFormat,
    quality: u8,
    camera_model: &str,
) -> Result<Vec<u8>, PhotoError> {
    let data = match format {
        EncodingFormat::Jpeg => encode_jpeg(&rgb_image(frame, format)?, quality)?,
        EncodingFormat::Png => write_image(&rgb_image(frame, format)?, ImageFormat::Png)?,
        EncodingFormat::Bmp => write_image(&rgb_image(frame, format)?, ImageFormat::Bmp)?,
        EncodingFormat::Yuv420 => {
            if frame.info.pixel_format != PixelFormat::Yuv420 {
                return Err(PhotoError::UnsupportedFormat {
                    format: frame.info.pixel_format.to_string(),
                    encoding: format.name(),
                });
            }
            frame.bytes().to_vec()
        }
        EncodingFormat::Dng => encode_dng(frame, camera_model)?,
    };
    debug!(size = data.len(), format = format.name(), "Still encoded");
    Ok(data)
}

fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, PhotoError> {
    let mut buffer = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
        .encode(
            image.as_raw(),
            image.width(),
            image.height(),
            image::ExtendedColorType::Rgb8,
        )
        .map_err(|e| PhotoError::EncodingFailed(format!("JPEG: {}", e)))?;
    Ok(buffer)
}

fn write_image(image: &RgbImage, format: ImageFormat) -> Result<Vec<u8>, PhotoError> {
    let mut buffer = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buffer), format)
        .map_err(|e| PhotoError::EncodingFailed(format!("{:?}: {}", format, e)))?;
    Ok(buffer)
}

/// Single-strip CFA DNG holding the 16-bit Bayer samples
fn encode_dng(frame: &StillFrame, camera_model: &str) -> Result<Vec<u8>, PhotoError> {
    use dng::ifd::{Ifd, IfdValue, Offsets};
    use dng::tags::ifd as tiff_tags;
    use dng::{DngWriter, FileType};
    use std::io::Write;

    if !frame.is_raw() {
        return Err(PhotoError::UnsupportedFormat {
            format: frame.info.pixel_format.to_string(),
            encoding: "dng",
        });
    }

    let width = frame.info.width;
    let height = frame.info.height;
    let row_bytes = width as usize * 2;
    let stride = frame.info.stride as usize;
    if stride < row_bytes || frame.bytes().len() < stride * height as usize {
        return Err(PhotoError::EncodingFailed("raw frame shorter than its geometry".into()));
    }
    let samples: Vec<u8> = frame
        .bytes()
        .chunks(stride)
        .take(height as usize)
        .flat_map(|row| &row[..row_bytes])
        .copied()
        .collect();
    let strip_len = samples.len() as u32;

    let mut ifd = Ifd::default();
    ifd.insert(tiff_tags::ImageWidth, IfdValue::Long(width));
    ifd.insert(tiff_tags::ImageLength, IfdValue::Long(height));
    ifd.insert(tiff_tags::BitsPerSample, IfdValue::Short(16));
    ifd.insert(tiff_tags::Compression, IfdValue::Short(1));
    // Colour filter array
    ifd.insert(tiff_tags::PhotometricInterpretation, IfdValue::Short(32803));
    ifd.insert(tiff_tags::SamplesPerPixel, IfdValue::Short(1));
    ifd.insert(tiff_tags::RowsPerStrip, IfdValue::Long(height));
    ifd.insert(tiff_tags::PlanarConfiguration, IfdValue::Short(1));
    ifd.insert(
        tiff_tags::Software,
        IfdValue::Ascii(format!("picam-mjpeg v{}", env!("CARGO_PKG_VERSION"))),
    );
    ifd.insert(tiff_tags::Make, IfdValue::Ascii("Raspberry Pi".into()));
    ifd.insert(tiff_tags::Model, IfdValue::Ascii(camera_model.to_string()));

    if let Some(exposure_us) = frame.metadata.exposure_time_us {
        let denominator = 1_000_000u32;
        let divisor = gcd(exposure_us, denominator);
        ifd.insert(
            tiff_tags::ExposureTime,
            IfdValue::Rational(exposure_us / divisor, denominator / divisor),
        );
    }
    if let Some(gain) = frame.metadata.analogue_gain {
        let iso = (gain * 100.0).round().clamp(0.0, 65535.0) as u16;
        ifd.insert(tiff_tags::ISOSpeedRatings, IfdValue::Short(iso));
    }

    struct BayerStrip {
        data: Vec<u8>,
    }

    impl Offsets for BayerStrip {
        fn size(&self) -> u32 {
            self.data.len() as u32
        }

        fn write(&self, writer: &mut dyn Write) -> std::io::Result<()> {
            writer.write_all(&self.data)
        }
    }

    let offsets: Arc<dyn Offsets + Send + Sync> = Arc::new(BayerStrip { data: samples });
    ifd.insert(tiff_tags::StripOffsets, IfdValue::Offsets(offsets));
    ifd.insert(tiff_tags::StripByteCounts, IfdValue::Long(strip_len));

    let mut buffer = Vec::new();
    DngWriter::write_dng(Cursor::new(&mut buffer), true, FileType::Dng, vec![ifd])
        .map_err(|e| PhotoError::EncodingFailed(format!("DNG: {:?}", e)))?;
    Ok(buffer)
}

/// Greatest common divisor, never zero
fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a.max(1)
}
