use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{Bus, Handler};

#[derive(Default)]
struct LocalState {
    handlers: HashMap<String, Vec<Arc<Handler>>>,
    published: Vec<(String, Vec<u8>)>,
}

/// In-process bus. Delivery is synchronous on the publisher's thread and every
/// published message is kept for inspection.
#[derive(Clone, Default)]
pub struct LocalBus {
    state: Arc<Mutex<LocalState>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Payloads published on `topic`, oldest first.
    pub fn published_on(&self, topic: &str) -> Vec<Vec<u8>> {
        self.lock()
            .published
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    pub fn published_count(&self) -> usize {
        self.lock().published.len()
    }

    fn lock(&self) -> MutexGuard<'_, LocalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Bus for LocalBus {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        // Handlers run outside the lock so they may publish themselves.
        let handlers = {
            let mut state = self.lock();
            state.published.push((topic.to_string(), payload.clone()));
            state.handlers.get(topic).cloned().unwrap_or_default()
        };
        for handler in handlers {
            handler(topic, &payload);
        }
        Ok(())
    }

    fn subscribe(&self, topic: &str, handler: Handler) -> Result<()> {
        self.lock()
            .handlers
            .entry(topic.to_string())
            .or_default()
            .push(Arc::new(handler));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn delivers_only_to_matching_topic() {
        let bus = LocalBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        bus.subscribe(
            "camera/image",
            Box::new(move |_, payload| {
                assert_eq!(payload, b"px");
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();

        bus.publish("camera/image", b"px".to_vec()).unwrap();
        bus.publish("camera/other", b"zz".to_vec()).unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.published_on("camera/other"), vec![b"zz".to_vec()]);
        assert_eq!(bus.published_count(), 2);
    }
}
