// SPDX-License-Identifier: GPL-3.0-only
//! Pixel format conversion for encoders and the image saver
//!
//! Everything here works on stride-aware buffers as delivered by the camera.

use super::types::{ColorSpace, PixelFormat, StreamInfo};

/// YUV to RGB matrix coefficients (Kr-derived, per colour space)
#[derive(Debug, Clone, Copy)]
struct YuvMatrix {
    rv: f32,
    gu: f32,
    gv: f32,
    bu: f32,
    /// Luma offset and scale for limited-range sources
    y_offset: f32,
    y_scale: f32,
    c_scale: f32,
}

impl YuvMatrix {
    fn for_color_space(cs: Option<ColorSpace>) -> Self {
        match cs {
            Some(ColorSpace::Rec709) => Self {
                rv: 1.5748,
                gu: 0.1873,
                gv: 0.4681,
                bu: 1.8556,
                y_offset: 16.0,
                y_scale: 255.0 / 219.0,
                c_scale: 255.0 / 224.0,
            },
            Some(ColorSpace::Smpte170m) => Self {
                rv: 1.402,
                gu: 0.344,
                gv: 0.714,
                bu: 1.772,
                y_offset: 16.0,
                y_scale: 255.0 / 219.0,
                c_scale: 255.0 / 224.0,
            },
            // sYCC / JPEG: BT.601 full range
            _ => Self {
                rv: 1.402,
                gu: 0.344,
                gv: 0.714,
                bu: 1.772,
                y_offset: 0.0,
                y_scale: 1.0,
                c_scale: 1.0,
            },
        }
    }
}

/// Convert planar YUV420 to packed RGB888
///
/// Returns `None` if `data` is shorter than the geometry requires.
pub fn yuv420_to_rgb(data: &[u8], info: &StreamInfo) -> Option<Vec<u8>> {
    let w = info.width as usize;
    let h = info.height as usize;
    let stride = info.stride as usize;
    let chroma_stride = stride / 2;
    let y_size = stride * h;
    let c_size = chroma_stride * h.div_ceil(2);
    if data.len() < y_size + 2 * c_size {
        return None;
    }

    let (y_plane, rest) = data.split_at(y_size);
    let (u_plane, v_plane) = rest.split_at(c_size);
    let m = YuvMatrix::for_color_space(info.color_space);
    let mut rgb = Vec::with_capacity(w * h * 3);

    for row in 0..h {
        let y_row = &y_plane[row * stride..row * stride + w];
        let c_off = (row / 2) * chroma_stride;
        for (col, &y) in y_row.iter().enumerate() {
            let y = (y as f32 - m.y_offset) * m.y_scale;
            let u = (u_plane[c_off + col / 2] as f32 - 128.0) * m.c_scale;
            let v = (v_plane[c_off + col / 2] as f32 - 128.0) * m.c_scale;

            rgb.push((y + m.rv * v).clamp(0.0, 255.0) as u8);
            rgb.push((y - m.gu * u - m.gv * v).clamp(0.0, 255.0) as u8);
            rgb.push((y + m.bu * u).clamp(0.0, 255.0) as u8);
        }
    }

    Some(rgb)
}

/// Borrow the luma plane of a YUV420 buffer as rows of `width` bytes
pub fn luma_rows<'a>(data: &'a [u8], info: &StreamInfo) -> impl Iterator<Item = &'a [u8]> + 'a {
    let w = info.width as usize;
    let stride = (info.stride as usize).max(w);
    data.chunks(stride)
        .take(info.height as usize)
        .filter(move |row| row.len() >= w)
        .map(move |row| &row[..w])
}

/// Convert 16-bit GRBG Bayer (10 significant bits) to RGB888
///
/// Bayer pattern (GRBG):
/// ```text
/// G R
/// B G
/// ```
/// Each 2x2 block produces 4 pixels with the same RGB values.
pub fn grbg10_to_rgb(data: &[u8], info: &StreamInfo) -> Option<Vec<u8>> {
    let w = info.width as usize;
    let h = info.height as usize;
    let stride = info.stride as usize;
    if data.len() < stride * h || stride < w * 2 {
        return None;
    }

    let sample = |x: usize, y: usize| -> u32 {
        let i = y * stride + x * 2;
        (u16::from_le_bytes([data[i], data[i + 1]]) >> 2) as u32
    };

    let mut rgb = vec![0u8; w * h * 3];
    for y in (0..h.saturating_sub(1)).step_by(2) {
        for x in (0..w.saturating_sub(1)).step_by(2) {
            let g0 = sample(x, y);
            let r = sample(x + 1, y) as u8;
            let b = sample(x, y + 1) as u8;
            let g1 = sample(x + 1, y + 1);
            let g = ((g0 + g1) / 2) as u8;

            for dy in 0..2 {
                for dx in 0..2 {
                    let idx = ((y + dy) * w + (x + dx)) * 3;
                    rgb[idx] = r;
                    rgb[idx + 1] = g;
                    rgb[idx + 2] = b;
                }
            }
        }
    }

    Some(rgb)
}

/// Drop stride padding from a packed RGB888 buffer
pub fn pack_rgb_rows(data: &[u8], info: &StreamInfo) -> Option<Vec<u8>> {
    let row_bytes = info.width as usize * 3;
    let stride = info.stride as usize;
    if stride < row_bytes || data.len() < stride * info.height as usize {
        return None;
    }
    if stride == row_bytes {
        return Some(data[..row_bytes * info.height as usize].to_vec());
    }
    Some(
        data.chunks(stride)
            .take(info.height as usize)
            .flat_map(|row| &row[..row_bytes])
            .copied()
            .collect(),
    )
}

/// Packed RGB888 from any supported stream format
pub fn to_rgb(data: &[u8], info: &StreamInfo) -> Option<Vec<u8>> {
    match info.pixel_format {
        PixelFormat::Yuv420 => yuv420_to_rgb(data, info),
        PixelFormat::Rgb888 => pack_rgb_rows(data, info),
        PixelFormat::RawGrbg10 => grbg10_to_rgb(data, info),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(w: u32, h: u32, format: PixelFormat, cs: Option<ColorSpace>) -> StreamInfo {
        StreamInfo {
            width: w,
            height: h,
            stride: format.min_stride(w),
            pixel_format: format,
            color_space: cs,
        }
    }

    #[test]
    fn test_yuv420_grey_is_grey() {
        let info = info(4, 2, PixelFormat::Yuv420, Some(ColorSpace::Sycc));
        let mut data = vec![128u8; 8];
        data.extend_from_slice(&[128u8; 4]);
        let rgb = yuv420_to_rgb(&data, &info).unwrap();
        assert_eq!(rgb.len(), 4 * 2 * 3);
        assert!(rgb.iter().all(|&c| c == 128));
    }

    #[test]
    fn test_yuv420_short_buffer_rejected() {
        let info = info(4, 2, PixelFormat::Yuv420, None);
        assert!(yuv420_to_rgb(&[0u8; 5], &info).is_none());
    }

    #[test]
    fn test_grbg_block_colours() {
        let info = info(2, 2, PixelFormat::RawGrbg10, Some(ColorSpace::Raw));
        // G=400, R=1000, B=200, G=400 (10-bit), stored little endian
        let mut data = Vec::new();
        for v in [400u16, 1000, 200, 400] {
            data.extend_from_slice(&v.to_le_bytes());
        }
        let rgb = grbg10_to_rgb(&data, &info).unwrap();
        assert_eq!(&rgb[0..3], &[250, 100, 50]);
    }

    #[test]
    fn test_luma_rows_skip_padding() {
        let mut info = info(2, 2, PixelFormat::Yuv420, None);
        info.stride = 4;
        let data = [1u8, 2, 0, 0, 3, 4, 0, 0, 9, 9, 9, 9];
        let rows: Vec<&[u8]> = luma_rows(&data, &info).collect();
        assert_eq!(rows, vec![&[1u8, 2][..], &[3u8, 4][..]]);
    }
}
