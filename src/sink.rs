//! 3D tracking sink adapters.
//!
//! The stereo camera's tracking subsystem is opaque to the bridge: it receives every
//! candidate of one frame in a single call and reconciles them against its depth frame.

use anyhow::{anyhow, Context, Result};
use std::sync::{Arc, Mutex, PoisonError};

use crate::bus::Bus;
use crate::convert::TrackedObjectCandidate;

pub trait TrackingSink: Send {
    fn name(&self) -> &'static str;

    /// Submit the full candidate batch for one frame. The batch may be empty.
    fn ingest(&mut self, batch: &[TrackedObjectCandidate]) -> Result<()>;
}

/// Publishes each batch as a JSON array for the camera-side ingestion process.
pub struct BusSink {
    bus: Arc<dyn Bus>,
    topic: String,
}

impl BusSink {
    pub fn new(bus: Arc<dyn Bus>, topic: impl Into<String>) -> Self {
        Self {
            bus,
            topic: topic.into(),
        }
    }
}

impl TrackingSink for BusSink {
    fn name(&self) -> &'static str {
        "bus"
    }

    fn ingest(&mut self, batch: &[TrackedObjectCandidate]) -> Result<()> {
        let payload = serde_json::to_vec(batch).context("serialize candidate batch")?;
        self.bus.publish(&self.topic, payload)
    }
}

/// Keeps every batch in memory. Can be switched to fail, for error-path tests.
#[derive(Clone, Default)]
pub struct RecordingSink {
    batches: Arc<Mutex<Vec<Vec<TrackedObjectCandidate>>>>,
    failing: Arc<Mutex<bool>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> Vec<Vec<TrackedObjectCandidate>> {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap_or_else(PoisonError::into_inner) = failing;
    }
}

impl TrackingSink for RecordingSink {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn ingest(&mut self, batch: &[TrackedObjectCandidate]) -> Result<()> {
        if *self.failing.lock().unwrap_or_else(PoisonError::into_inner) {
            return Err(anyhow!("tracking sink rejected batch of {}", batch.len()));
        }
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(batch.to_vec());
        Ok(())
    }
}
