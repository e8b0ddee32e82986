//! The detection loop.
//!
//! One iteration takes the newest staged frame, runs a single inference at the lower of the
//! two thresholds and splits the result:
//! - detections at or above the ingestion threshold become the tracking sink batch
//! - every detection at or above the display threshold is drawn and reported
//!
//! Per-frame failures are logged and the loop moves on to the next frame.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::annotate::{AnnotatedFrame, Annotator};
use crate::config::BridgeConfig;
use crate::convert::{BoxConverter, BoxReport, ReportBox, TrackedObjectCandidate};
use crate::detect::{Inference, InferenceWorker};
use crate::frame::FrameStore;
use crate::publish::ResultPublisher;
use crate::sink::TrackingSink;

#[derive(Clone, Debug)]
pub struct LoopSettings {
    pub ingestion_threshold: f32,
    pub display_threshold: f32,
    pub inference_timeout: Duration,
    pub poll_interval: Duration,
    pub max_frame_age: Option<Duration>,
    pub health_log_interval: Duration,
}

impl LoopSettings {
    pub fn from_config(cfg: &BridgeConfig) -> Self {
        Self {
            ingestion_threshold: cfg.inference.ingestion_threshold,
            display_threshold: cfg.inference.display_threshold,
            inference_timeout: cfg.inference.timeout,
            poll_interval: cfg.runtime.poll_interval,
            max_frame_age: cfg.runtime.max_frame_age,
            health_log_interval: cfg.runtime.health_log_interval,
        }
    }
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self::from_config(&BridgeConfig::default())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub frames_processed: u64,
    pub frames_stale: u64,
    pub frames_busy: u64,
    pub frames_failed: u64,
    pub candidates_ingested: u64,
    pub sink_failures: u64,
    pub publish_failures: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// Older than the configured maximum frame age.
    Stale,
    /// The inference worker is still running a timed-out frame.
    Busy,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameSummary {
    pub frame_seq: u64,
    /// Detections at or above the display threshold.
    pub displayed: usize,
    /// Candidates submitted to the tracking sink.
    pub ingested: usize,
    pub sink_ok: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// No new frame since the last iteration.
    Idle,
    Processed(FrameSummary),
    Skipped(SkipReason),
    /// Pixel conversion or inference failed; nothing was published for the frame.
    Failed,
}

pub struct DetectionLoop {
    store: FrameStore,
    worker: InferenceWorker,
    converter: BoxConverter,
    annotator: Annotator,
    sink: Box<dyn TrackingSink>,
    publisher: ResultPublisher,
    settings: LoopSettings,
    last_seq: Option<u64>,
    stats: LoopStats,
}

impl DetectionLoop {
    pub fn new(
        store: FrameStore,
        worker: InferenceWorker,
        converter: BoxConverter,
        annotator: Annotator,
        sink: Box<dyn TrackingSink>,
        publisher: ResultPublisher,
        settings: LoopSettings,
    ) -> Self {
        Self {
            store,
            worker,
            converter,
            annotator,
            sink,
            publisher,
            settings,
            last_seq: None,
            stats: LoopStats::default(),
        }
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    /// Run until `shutdown` is set. Returns the final counters.
    pub fn run(&mut self, shutdown: &AtomicBool) -> LoopStats {
        log::info!(
            "detection loop running: backend={} sink={} ingestion>={} display>={}",
            self.worker.backend_name(),
            self.sink.name(),
            self.settings.ingestion_threshold,
            self.settings.display_threshold
        );
        let mut last_health_log = Instant::now();

        while !shutdown.load(Ordering::SeqCst) {
            if self.step() == StepOutcome::Idle {
                std::thread::sleep(self.settings.poll_interval);
            }
            if last_health_log.elapsed() >= self.settings.health_log_interval {
                self.log_health();
                last_health_log = Instant::now();
            }
        }

        self.log_health();
        log::info!("detection loop stopped");
        self.stats
    }

    /// Process the newest frame, if there is one not yet processed.
    pub fn step(&mut self) -> StepOutcome {
        let Some(frame) = self.store.get() else {
            return StepOutcome::Idle;
        };
        let seq = frame.seq();
        if self.last_seq == Some(seq) {
            return StepOutcome::Idle;
        }
        self.last_seq = Some(seq);

        if let Some(max_age) = self.settings.max_frame_age {
            let age = frame.age();
            if age > max_age {
                log::debug!("skipping frame {}: {} ms old", seq, age.as_millis());
                self.stats.frames_stale += 1;
                return StepOutcome::Skipped(SkipReason::Stale);
            }
        }

        let image = match frame.to_rgb() {
            Ok(image) => image,
            Err(e) => {
                log::warn!("frame {} conversion failed: {:#}", seq, e);
                self.stats.frames_failed += 1;
                return StepOutcome::Failed;
            }
        };

        let ingestion_threshold = self.settings.ingestion_threshold;
        let display_threshold = self.settings.display_threshold;
        let floor = ingestion_threshold.min(display_threshold);

        let (mut image, mut detections) = match self.worker.infer(
            seq,
            image,
            floor,
            self.settings.inference_timeout,
        ) {
            Ok(Inference::Done { image, detections }) => (image, detections),
            Ok(Inference::Busy) => {
                log::debug!("skipping frame {}: inference still busy", seq);
                self.stats.frames_busy += 1;
                return StepOutcome::Skipped(SkipReason::Busy);
            }
            Err(e) => {
                log::warn!("frame {} inference failed: {:#}", seq, e);
                self.stats.frames_failed += 1;
                return StepOutcome::Failed;
            }
        };

        detections.retain(|d| d.confidence >= floor);
        detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        let candidates: Vec<TrackedObjectCandidate> = detections
            .iter()
            .filter(|d| d.confidence >= ingestion_threshold)
            .enumerate()
            .map(|(index, d)| {
                self.converter
                    .to_candidate(d, seq, index, frame.width, frame.height)
            })
            .collect();

        let sink_ok = match self.sink.ingest(&candidates) {
            Ok(()) => {
                self.stats.candidates_ingested += candidates.len() as u64;
                true
            }
            Err(e) => {
                log::warn!("frame {} tracking sink ingestion failed: {:#}", seq, e);
                self.stats.sink_failures += 1;
                false
            }
        };

        let boxes: Vec<ReportBox> = detections
            .iter()
            .filter(|d| d.confidence >= display_threshold)
            .map(|d| {
                self.converter
                    .to_report_box(d, d.confidence >= ingestion_threshold)
            })
            .collect();

        let boxes_drawn = self.annotator.draw(&mut image, &boxes);
        let annotated = AnnotatedFrame {
            image,
            source_seq: frame.source_seq,
            frame_id: frame.frame_id.clone(),
            stamp_ms: frame.stamp_ms,
            boxes_drawn,
        };
        if let Err(e) = self.publisher.publish_annotated(&annotated) {
            log::warn!("frame {}: {:#}", seq, e);
            self.stats.publish_failures += 1;
        }

        let report = BoxReport {
            frame_seq: seq,
            source_seq: frame.source_seq,
            frame_id: frame.frame_id.clone(),
            stamp_ms: frame.stamp_ms,
            width: frame.width,
            height: frame.height,
            boxes,
        };
        if let Err(e) = self.publisher.publish_report(&report) {
            log::warn!("frame {}: {:#}", seq, e);
            self.stats.publish_failures += 1;
        }

        self.stats.frames_processed += 1;
        log::debug!(
            "frame {}: {} displayed, {} ingested",
            seq,
            report.boxes.len(),
            candidates.len()
        );
        StepOutcome::Processed(FrameSummary {
            frame_seq: seq,
            displayed: report.boxes.len(),
            ingested: candidates.len(),
            sink_ok,
        })
    }

    fn log_health(&self) {
        let store = self.store.stats();
        let s = &self.stats;
        log::info!(
            "health: received={} dropped={} processed={} stale={} busy={} failed={} \
             ingested={} sink_failures={} publish_failures={}",
            store.received,
            store.dropped,
            s.frames_processed,
            s.frames_stale,
            s.frames_busy,
            s.frames_failed,
            s.candidates_ingested,
            s.sink_failures,
            s.publish_failures
        );
    }
}
