//! Detector Bridge
//!
//! Real-time bridge between a stereo camera's color stream and its 3D object tracker.
//! Each frame is run through a 2D detector; confident detections are handed to the
//! tracker as a per-frame batch while an annotated frame and a box report are
//! republished for other consumers.
//!
//! # Architecture
//!
//! ```text
//! image topic → FrameListener → FrameStore → DetectionLoop → InferenceWorker
//!                                                 │
//!                                           BoxConverter
//!                                  ┌──────────────┴──────────────┐
//!                            TrackingSink                 ResultPublisher
//!                       (batch ≥ ingestion)       (annotated frame + report ≥ display)
//! ```
//!
//! 1. **Latest frame wins**: the store holds one frame; the listener never waits for the loop.
//! 2. **One inference per frame**: a frame is processed at most once, at the lower threshold.
//! 3. **Two thresholds**: the tracker only sees detections at or above the ingestion threshold.
//! 4. **Independent outputs**: a sink failure never suppresses publication.
//!
//! # Module Structure
//!
//! - `frame`: `Frame` and the single-slot `FrameStore`
//! - `ingest`: image message envelope, bus listener, synthetic camera
//! - `detect`: inference backends, loader and the timeout-bounded worker
//! - `convert`: detection to tracker candidate / report box mapping
//! - `annotate`, `publish`, `sink`: the per-frame outputs
//! - `pipeline`: the detection loop
//! - `bus`, `transport`: publish/subscribe adapters (MQTT, in-process)
//! - `config`: file and environment configuration

pub mod annotate;
pub mod bus;
pub mod config;
pub mod convert;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod publish;
pub mod sink;
pub mod transport;

pub use annotate::{AnnotatedFrame, Annotator};
pub use bus::{Bus, LocalBus, MqttBus, MqttBusOptions};
pub use config::BridgeConfig;
pub use convert::{BoxConverter, BoxReport, ReportBox, TrackedObjectCandidate};
pub use detect::{
    load_backend, BackendKind, BoundingBox, DetectionResult, Device, InferenceBackend,
    InferenceWorker, StubBackend,
};
pub use frame::{Frame, FrameStore, FrameStoreStats, PixelEncoding};
pub use ingest::FrameListener;
pub use pipeline::{DetectionLoop, LoopSettings, LoopStats, StepOutcome};
pub use publish::ResultPublisher;
pub use sink::{BusSink, RecordingSink, TrackingSink};
