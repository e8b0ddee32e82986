//! Synthetic camera for the demo binary and tests.
//!
//! Produces encoded image messages exactly as a camera driver would publish them, so the
//! whole listener → store → loop path is exercised without hardware.

use anyhow::Result;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::frame::PixelEncoding;
use crate::ingest::envelope::{encode_image, ImageHeader};

/// Configuration for a synthetic camera.
#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub frame_id: String,
    pub width: u32,
    pub height: u32,
    pub encoding: PixelEncoding,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            frame_id: "synthetic_left".to_string(),
            width: 640,
            height: 360,
            encoding: PixelEncoding::Bgr8,
        }
    }
}

pub struct SyntheticCamera {
    config: SyntheticConfig,
    frame_count: u64,
    scene_state: u8,
}

impl SyntheticCamera {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            frame_count: 0,
            scene_state: 0,
        }
    }

    pub fn frames_generated(&self) -> u64 {
        self.frame_count
    }

    /// Next frame as a bus payload.
    pub fn next_message(&mut self) -> Result<Vec<u8>> {
        self.frame_count += 1;
        let stamp_ms = SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis() as u64;
        let header = ImageHeader {
            seq: self.frame_count,
            stamp_ms,
            frame_id: self.config.frame_id.clone(),
            width: self.config.width,
            height: self.config.height,
            encoding: self.config.encoding,
            step: None,
        };
        let pixels = self.generate_pixels();
        encode_image(&header, &pixels)
    }

    /// Packed byte length of one frame.
    fn frame_len(&self) -> usize {
        self.config.width as usize
            * self.config.height as usize
            * self.config.encoding.channels() as usize
    }

    /// Gradient that shifts every frame, with a scene change every 50 frames.
    fn generate_pixels(&mut self) -> Vec<u8> {
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        (0..self.frame_len())
            .map(|i| ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8)
            .collect()
    }
}
