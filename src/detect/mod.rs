mod backend;
pub mod backends;
mod device;
mod loader;
mod result;
mod worker;

pub use backend::InferenceBackend;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use device::Device;
pub use loader::{load_backend, BackendKind};
pub use result::{non_max_suppression, BoundingBox, DetectionResult};
pub use worker::{Inference, InferenceWorker};
