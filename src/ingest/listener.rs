use anyhow::Result;

use crate::bus::Bus;
use crate::frame::FrameStore;
use crate::ingest::envelope::frame_from_message;

/// Transport-side callback for the color-image topic.
///
/// Its only effect is `FrameStore::put`. It does no pixel conversion and no inference,
/// so the transport thread is never held up by the detection loop.
#[derive(Clone)]
pub struct FrameListener {
    store: FrameStore,
}

impl FrameListener {
    pub fn new(store: FrameStore) -> Self {
        Self { store }
    }

    /// Handle one image message. Malformed messages are logged and dropped.
    pub fn on_message(&self, payload: &[u8]) {
        match frame_from_message(payload) {
            Ok(frame) => self.store.put(frame),
            Err(e) => log::warn!("dropping malformed image message: {}", e),
        }
    }

    /// Subscribe this listener to `topic` on `bus`.
    pub fn attach(self, bus: &dyn Bus, topic: &str) -> Result<()> {
        bus.subscribe(
            topic,
            Box::new(move |_topic: &str, payload: &[u8]| self.on_message(payload)),
        )?;
        log::info!("frame listener subscribed to {}", topic);
        Ok(())
    }
}
