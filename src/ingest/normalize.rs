use anyhow::{anyhow, Result};

use crate::frame::PixelEncoding;

/// Convert a camera buffer into tightly packed RGB24.
///
/// `step` is the row length in bytes; padding past `width * channels` is skipped.
pub(crate) fn normalize_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    step: u32,
    encoding: PixelEncoding,
) -> Result<Vec<u8>> {
    if width == 0 || height == 0 {
        return Err(anyhow!("frame has zero dimension {}x{}", width, height));
    }

    let channels = encoding.channels() as usize;
    let w = width as usize;
    let h = height as usize;
    let row_len = w
        .checked_mul(channels)
        .ok_or_else(|| anyhow!("{} frame dimensions overflow", encoding))?;
    let step = step as usize;
    if step < row_len {
        return Err(anyhow!(
            "{} row step {} shorter than row length {}",
            encoding,
            step,
            row_len
        ));
    }
    // The last row may omit its padding.
    let expected = step
        .checked_mul(h - 1)
        .and_then(|v| v.checked_add(row_len))
        .ok_or_else(|| anyhow!("{} frame dimensions overflow", encoding))?;
    if pixels.len() < expected {
        return Err(anyhow!(
            "{} frame length mismatch: expected at least {}, got {}",
            encoding,
            expected,
            pixels.len()
        ));
    }

    let mut rgb = Vec::with_capacity(w * h * 3);
    for row in 0..h {
        let start = row * step;
        let line = &pixels[start..start + row_len];
        match encoding {
            PixelEncoding::Rgb8 => rgb.extend_from_slice(line),
            PixelEncoding::Bgr8 => {
                for px in line.chunks_exact(3) {
                    rgb.extend_from_slice(&[px[2], px[1], px[0]]);
                }
            }
            PixelEncoding::Rgba8 => {
                for px in line.chunks_exact(4) {
                    rgb.extend_from_slice(&px[..3]);
                }
            }
            PixelEncoding::Bgra8 => {
                for px in line.chunks_exact(4) {
                    rgb.extend_from_slice(&[px[2], px[1], px[0]]);
                }
            }
            PixelEncoding::Mono8 => {
                for &y in line {
                    rgb.extend_from_slice(&[y, y, y]);
                }
            }
        }
    }

    Ok(rgb)
}
