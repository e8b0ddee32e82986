//! Wire format for image messages on the bus.
//!
//! One line of JSON header terminated by `\n`, followed by the raw pixel bytes:
//!
//! ```text
//! {"seq":12,"stamp_ms":1700000000123,"frame_id":"left","width":1280,"height":720,
//!  "encoding":"bgra8","step":5120}\n<bytes>
//! ```

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::frame::{Frame, PixelEncoding};

/// Header preceding the pixel payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageHeader {
    #[serde(default)]
    pub seq: u64,
    #[serde(default)]
    pub stamp_ms: u64,
    #[serde(default)]
    pub frame_id: String,
    pub width: u32,
    pub height: u32,
    pub encoding: PixelEncoding,
    /// Row length in bytes; defaults to a packed row.
    #[serde(default)]
    pub step: Option<u32>,
}

impl ImageHeader {
    pub fn step_or_packed(&self) -> u32 {
        self.step
            .unwrap_or_else(|| self.width.saturating_mul(self.encoding.channels()))
    }
}

/// Encode a header and pixel bytes into one bus payload.
pub fn encode_image(header: &ImageHeader, pixels: &[u8]) -> Result<Vec<u8>> {
    let mut out = serde_json::to_vec(header).context("serialize image header")?;
    out.reserve(pixels.len() + 1);
    out.push(b'\n');
    out.extend_from_slice(pixels);
    Ok(out)
}

/// Split a bus payload into its header and pixel bytes.
pub fn decode_image(payload: &[u8]) -> Result<(ImageHeader, &[u8])> {
    let split = payload
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| anyhow!("image message has no header terminator"))?;
    let header: ImageHeader = serde_json::from_slice(&payload[..split])
        .map_err(|e| anyhow!("invalid image header: {}", e))?;
    Ok((header, &payload[split + 1..]))
}

/// Decode a bus payload straight into a `Frame`.
pub fn frame_from_message(payload: &[u8]) -> Result<Frame> {
    let (header, pixels) = decode_image(payload)?;
    let step = header.step_or_packed();
    Ok(Frame::new(
        pixels.to_vec(),
        header.width,
        header.height,
        header.encoding,
        step,
    )
    .with_source(header.seq, header.frame_id, header.stamp_ms))
}
