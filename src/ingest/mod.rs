//! Frame ingestion.
//!
//! - `envelope`: wire format of image messages on the bus
//! - `listener`: bus callback that stages frames into the `FrameStore`
//! - `synthetic`: generated camera stream (demo, tests)
//!
//! The ingestion layer is responsible for:
//! - Decoding the message envelope
//! - Installing the newest frame into the store
//!
//! The ingestion layer MUST NOT:
//! - Convert pixels or run inference on the transport thread
//! - Queue frames (the newest frame always wins)

pub mod envelope;
pub mod listener;
pub(crate) mod normalize;
pub mod synthetic;

pub use envelope::{decode_image, encode_image, frame_from_message, ImageHeader};
pub use listener::FrameListener;
pub use synthetic::{SyntheticCamera, SyntheticConfig};
