//! Publish/subscribe bus abstraction.
//!
//! The bridge only needs two things from its transport: fire-and-forget publish and a
//! per-topic callback. `MqttBus` is the production adapter; `LocalBus` is an in-process
//! bus used by the demo binary and tests.

mod local;
mod mqtt;

use anyhow::Result;

pub use local::LocalBus;
pub use mqtt::{MqttBus, MqttBusOptions};

/// Callback invoked on the transport's delivery thread: `(topic, payload)`.
///
/// Handlers must return quickly; they run on the transport's delivery thread.
pub type Handler = Box<dyn Fn(&str, &[u8]) + Send + Sync>;

pub trait Bus: Send + Sync {
    /// Publish `payload` on `topic`. Best effort: no acknowledgement, no retry.
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;

    /// Register `handler` for messages arriving on `topic`.
    fn subscribe(&self, topic: &str, handler: Handler) -> Result<()>;
}
