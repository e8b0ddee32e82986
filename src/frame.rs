//! Frame staging.
//!
//! - `Frame`: one decoded camera image as delivered by the bus (bytes + geometry + encoding).
//! - `FrameStore`: single-slot, mutex-guarded handoff between the ingestion listener and
//!   the detection loop. The newest frame always wins; an unread frame is dropped when the
//!   next one arrives.
//!
//! The store is the only state shared between the transport thread and the detection loop.

use anyhow::{anyhow, Result};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::ingest::normalize::normalize_to_rgb;

// ----------------------------------------------------------------------------
// PixelEncoding
// ----------------------------------------------------------------------------

/// Pixel layouts accepted on the image topic.
///
/// Names follow the usual camera driver encoding strings (`bgr8`, `bgra8`, ...).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelEncoding {
    Rgb8,
    Bgr8,
    Rgba8,
    Bgra8,
    Mono8,
}

impl PixelEncoding {
    /// Bytes per pixel.
    pub fn channels(self) -> u32 {
        match self {
            Self::Rgb8 | Self::Bgr8 => 3,
            Self::Rgba8 | Self::Bgra8 => 4,
            Self::Mono8 => 1,
        }
    }
}

impl FromStr for PixelEncoding {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "rgb8" => Ok(Self::Rgb8),
            "bgr8" => Ok(Self::Bgr8),
            "rgba8" => Ok(Self::Rgba8),
            "bgra8" => Ok(Self::Bgra8),
            "mono8" => Ok(Self::Mono8),
            other => Err(anyhow!("unsupported pixel encoding '{}'", other)),
        }
    }
}

impl fmt::Display for PixelEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Rgb8 => "rgb8",
            Self::Bgr8 => "bgr8",
            Self::Rgba8 => "rgba8",
            Self::Bgra8 => "bgra8",
            Self::Mono8 => "mono8",
        };
        f.write_str(name)
    }
}

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// One camera frame as received from the image topic.
///
/// Frames are immutable once built. The store hands out `Arc<Frame>` so the detection
/// loop can keep reading a frame while the listener installs the next one.
pub struct Frame {
    data: Vec<u8>,

    pub width: u32,
    pub height: u32,
    pub encoding: PixelEncoding,
    /// Row length in bytes (may exceed `width * channels` when rows are padded).
    pub step: u32,

    /// Sequence number assigned by the publisher (camera side).
    pub source_seq: u64,
    /// Camera frame identifier (e.g. optical frame name).
    pub frame_id: String,
    /// Capture stamp in milliseconds since the epoch, as reported by the camera.
    pub stamp_ms: u64,

    /// Arrival order assigned by the `FrameStore`; zero until stored.
    seq: u64,
    /// Local receive instant, used for staleness checks.
    received_at: Instant,
}

impl Frame {
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        encoding: PixelEncoding,
        step: u32,
    ) -> Self {
        Self {
            data,
            width,
            height,
            encoding,
            step,
            source_seq: 0,
            frame_id: String::new(),
            stamp_ms: 0,
            seq: 0,
            received_at: Instant::now(),
        }
    }

    /// Tightly packed frame (`step == width * channels`).
    pub fn packed(data: Vec<u8>, width: u32, height: u32, encoding: PixelEncoding) -> Self {
        let step = width.saturating_mul(encoding.channels());
        Self::new(data, width, height, encoding, step)
    }

    pub fn with_source(
        mut self,
        source_seq: u64,
        frame_id: impl Into<String>,
        stamp_ms: u64,
    ) -> Self {
        self.source_seq = source_seq;
        self.frame_id = frame_id.into();
        self.stamp_ms = stamp_ms;
        self
    }

    /// Arrival sequence number (1-based once stored).
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn age(&self) -> Duration {
        self.received_at.elapsed()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Convert into the RGB buffer the inference service consumes.
    pub fn to_rgb(&self) -> Result<RgbImage> {
        let rgb = normalize_to_rgb(&self.data, self.width, self.height, self.step, self.encoding)?;
        RgbImage::from_raw(self.width, self.height, rgb)
            .ok_or_else(|| anyhow!("RGB buffer does not match {}x{}", self.width, self.height))
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("seq", &self.seq)
            .field("source_seq", &self.source_seq)
            .field("frame_id", &self.frame_id)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("encoding", &self.encoding)
            .field("bytes", &self.data.len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// FrameStore: single-slot latest-frame handoff
// ----------------------------------------------------------------------------

/// Counters kept by the store, for health logging.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStoreStats {
    /// Frames installed via `put`.
    pub received: u64,
    /// Frames overwritten before anyone read them.
    pub dropped: u64,
}

#[derive(Default)]
struct Slot {
    latest: Option<Arc<Frame>>,
    read: bool,
    next_seq: u64,
    stats: FrameStoreStats,
}

/// Latest-frame-wins store shared by the listener (writer) and the detection loop (reader).
///
/// Cloning the store clones the handle, not the slot.
#[derive(Clone, Default)]
pub struct FrameStore {
    slot: Arc<Mutex<Slot>>,
}

impl FrameStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the slot. Never blocks beyond the slot lock.
    pub fn put(&self, mut frame: Frame) {
        let mut slot = self.lock();
        if slot.latest.is_some() && !slot.read {
            slot.stats.dropped += 1;
        }
        slot.next_seq += 1;
        frame.seq = slot.next_seq;
        slot.latest = Some(Arc::new(frame));
        slot.read = false;
        slot.stats.received += 1;
    }

    /// Current frame, or `None` if nothing has arrived yet.
    pub fn get(&self) -> Option<Arc<Frame>> {
        let mut slot = self.lock();
        let frame = slot.latest.clone();
        if frame.is_some() {
            slot.read = true;
        }
        frame
    }

    pub fn stats(&self) -> FrameStoreStats {
        self.lock().stats
    }

    // The slot holds no cross-field invariant a panicking writer could break,
    // so a poisoned lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
