use anyhow::Result;
use image::RgbImage;

use crate::detect::result::DetectionResult;

/// Inference service trait.
///
/// A backend is loaded once at startup and then owned by the inference worker thread
/// for the life of the process. `detect` is called once per processed frame.
pub trait InferenceBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on an RGB frame, returning every detection whose confidence is
    /// at least `min_confidence`, with boxes in the frame's pixel coordinates.
    fn detect(&mut self, image: &RgbImage, min_confidence: f32) -> Result<Vec<DetectionResult>>;

    /// Optional warm-up hook, run once before the first frame.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
