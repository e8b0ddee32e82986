use anyhow::{anyhow, Result};
use image::RgbImage;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::detect::backend::InferenceBackend;
use crate::detect::result::DetectionResult;

/// Scripted backend for tests, the demo and dry runs without a model.
///
/// Queued responses are consumed first, one per call; afterwards every call returns the
/// fixed detection set. Confidence filtering is applied like a real model would.
#[derive(Default)]
pub struct StubBackend {
    fixed: Vec<DetectionResult>,
    queued: VecDeque<Result<Vec<DetectionResult>, String>>,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `detections` on every call.
    pub fn with_detections(mut self, detections: Vec<DetectionResult>) -> Self {
        self.fixed = detections;
        self
    }

    /// Queue a one-shot response.
    pub fn push_response(mut self, detections: Vec<DetectionResult>) -> Self {
        self.queued.push_back(Ok(detections));
        self
    }

    /// Queue a one-shot failure.
    pub fn push_failure(mut self, message: &str) -> Self {
        self.queued.push_back(Err(message.to_string()));
        self
    }

    /// Sleep this long inside every call (simulates a slow model).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Shared counter of `detect` calls.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl InferenceBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _image: &RgbImage, min_confidence: f32) -> Result<Vec<DetectionResult>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        let detections = match self.queued.pop_front() {
            Some(Ok(detections)) => detections,
            Some(Err(message)) => return Err(anyhow!(message)),
            None => self.fixed.clone(),
        };
        Ok(detections
            .into_iter()
            .filter(|d| d.confidence >= min_confidence)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::BoundingBox;

    fn det(class_id: u32, confidence: f32) -> DetectionResult {
        DetectionResult::new(class_id, confidence, BoundingBox::new(10.0, 10.0, 4.0, 4.0))
    }

    #[test]
    fn queued_responses_precede_fixed_set() {
        let mut backend = StubBackend::new()
            .with_detections(vec![det(1, 0.9)])
            .push_failure("device lost")
            .push_response(vec![det(2, 0.95), det(3, 0.2)]);
        let counter = backend.call_counter();
        let image = RgbImage::new(4, 4);

        assert!(backend.detect(&image, 0.5).is_err());
        let second = backend.detect(&image, 0.5).unwrap();
        assert_eq!(second, vec![det(2, 0.95)]);
        let third = backend.detect(&image, 0.5).unwrap();
        assert_eq!(third, vec![det(1, 0.9)]);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }
}
