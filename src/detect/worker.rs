//! Inference worker thread.
//!
//! The backend is moved onto a dedicated thread so the detection loop can bound how long
//! it waits for a result. A frame whose inference times out is dropped; while the worker
//! is still busy with it, later frames are skipped rather than queued.

use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use image::RgbImage;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::detect::backend::InferenceBackend;
use crate::detect::result::DetectionResult;

struct Job {
    seq: u64,
    image: RgbImage,
    min_confidence: f32,
}

struct JobResult {
    seq: u64,
    image: RgbImage,
    detections: Result<Vec<DetectionResult>>,
}

/// Outcome of one inference request.
pub enum Inference {
    /// Detections for the frame, with the image handed back for annotation.
    Done {
        image: RgbImage,
        detections: Vec<DetectionResult>,
    },
    /// The worker is still busy with an earlier, timed-out frame.
    Busy,
}

pub struct InferenceWorker {
    backend_name: &'static str,
    jobs: Option<Sender<Job>>,
    results: Receiver<JobResult>,
    handle: Option<JoinHandle<()>>,
    in_flight: Option<u64>,
}

impl InferenceWorker {
    pub fn spawn(mut backend: Box<dyn InferenceBackend>) -> Result<Self> {
        let backend_name = backend.name();
        let (job_tx, job_rx) = bounded::<Job>(1);
        let (result_tx, result_rx) = bounded::<JobResult>(1);

        let handle = std::thread::Builder::new()
            .name(format!("inference-{}", backend_name))
            .spawn(move || {
                for job in job_rx.iter() {
                    let detections = backend.detect(&job.image, job.min_confidence);
                    let result = JobResult {
                        seq: job.seq,
                        image: job.image,
                        detections,
                    };
                    if result_tx.send(result).is_err() {
                        break;
                    }
                }
                log::debug!("inference worker exiting");
            })?;

        Ok(Self {
            backend_name,
            jobs: Some(job_tx),
            results: result_rx,
            handle: Some(handle),
            in_flight: None,
        })
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend_name
    }

    /// Run inference for frame `seq`, waiting at most `timeout`.
    pub fn infer(
        &mut self,
        seq: u64,
        image: RgbImage,
        min_confidence: f32,
        timeout: Duration,
    ) -> Result<Inference> {
        if !self.reap_stale()? {
            return Ok(Inference::Busy);
        }

        let jobs = self
            .jobs
            .as_ref()
            .ok_or_else(|| anyhow!("inference worker is shut down"))?;
        match jobs.try_send(Job {
            seq,
            image,
            min_confidence,
        }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => return Ok(Inference::Busy),
            Err(TrySendError::Disconnected(_)) => {
                return Err(anyhow!("inference worker thread has exited"))
            }
        }
        self.in_flight = Some(seq);

        match self.results.recv_timeout(timeout) {
            Ok(result) => {
                self.in_flight = None;
                Ok(Inference::Done {
                    image: result.image,
                    detections: result.detections?,
                })
            }
            Err(RecvTimeoutError::Timeout) => Err(anyhow!(
                "inference timed out after {} ms; frame dropped",
                timeout.as_millis()
            )),
            Err(RecvTimeoutError::Disconnected) => {
                self.in_flight = None;
                Err(anyhow!("inference worker thread has exited"))
            }
        }
    }

    /// Discard a late result from a timed-out frame. Returns false while it is still running.
    fn reap_stale(&mut self) -> Result<bool> {
        let Some(stale_seq) = self.in_flight else {
            return Ok(true);
        };
        match self.results.try_recv() {
            Ok(late) => {
                log::debug!(
                    "discarding late inference result for frame {} (expected {})",
                    late.seq,
                    stale_seq
                );
                self.in_flight = None;
                Ok(true)
            }
            Err(TryRecvError::Empty) => Ok(false),
            Err(TryRecvError::Disconnected) => Err(anyhow!("inference worker thread has exited")),
        }
    }
}

impl Drop for InferenceWorker {
    fn drop(&mut self) {
        // Closing the job channel ends the worker loop after its current job.
        self.jobs = None;
        // A hung model must not block shutdown.
        if self.in_flight.is_none() {
            if let Some(handle) = self.handle.take() {
                let _ = handle.join();
            }
        }
    }
}
