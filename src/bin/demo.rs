//! demo - end-to-end synthetic run of the detector bridge
//!
//! A synthetic camera publishes frames on an in-process bus, the stub backend returns a
//! fixed pair of detections, and the summary of what reached each output is printed.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use detector_bridge::config::AnnotationSettings;
use detector_bridge::ingest::{SyntheticCamera, SyntheticConfig};
use detector_bridge::{
    Annotator, BoundingBox, BoxConverter, BoxReport, BridgeConfig, Bus, BusSink, DetectionLoop,
    DetectionResult, FrameListener, FrameStore, InferenceWorker, LocalBus, LoopSettings,
    ResultPublisher, StubBackend, TrackedObjectCandidate,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Duration in seconds for synthetic frames.
    #[arg(long, default_value_t = 3)]
    seconds: u64,
    /// Frames per second for the synthetic camera.
    #[arg(long, default_value_t = 15)]
    fps: u32,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if args.fps == 0 {
        return Err(anyhow!("--fps must be greater than zero"));
    }

    let cfg = BridgeConfig::default();
    let bus = LocalBus::new();
    let store = FrameStore::new();
    FrameListener::new(store.clone()).attach(&bus, &cfg.topics.image)?;

    // One detection above the ingestion threshold, one only above the display threshold.
    let backend = StubBackend::new().with_detections(vec![
        DetectionResult::new(3, 0.92, BoundingBox::new(100.0, 100.0, 50.0, 50.0)),
        DetectionResult::new(5, 0.6, BoundingBox::new(200.0, 200.0, 40.0, 40.0)),
    ]);
    let worker = InferenceWorker::spawn(Box::new(backend))?;

    let shared: Arc<dyn Bus> = Arc::new(bus.clone());
    let mut detection_loop = DetectionLoop::new(
        store,
        worker,
        BoxConverter::new(
            cfg.tracking.probability_scale,
            cfg.tracking.is_grounded,
            cfg.inference.class_names.clone(),
        ),
        Annotator::new(&AnnotationSettings::default())?,
        Box::new(BusSink::new(shared.clone(), cfg.topics.sink.clone())),
        ResultPublisher::new(shared, cfg.topics.annotated.clone(), cfg.topics.report.clone()),
        LoopSettings::from_config(&cfg),
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    let camera_shutdown = shutdown.clone();
    let camera_bus = bus.clone();
    let image_topic = cfg.topics.image.clone();
    let frame_interval = Duration::from_secs(1) / args.fps;
    let total_frames = args.seconds * u64::from(args.fps);

    let camera = std::thread::Builder::new()
        .name("synthetic-camera".to_string())
        .spawn(move || -> Result<u64> {
            let mut camera = SyntheticCamera::new(SyntheticConfig::default());
            while camera.frames_generated() < total_frames {
                camera_bus.publish(&image_topic, camera.next_message()?)?;
                std::thread::sleep(frame_interval);
            }
            camera_shutdown.store(true, Ordering::SeqCst);
            Ok(camera.frames_generated())
        })?;

    let stats = detection_loop.run(&shutdown);
    let generated = camera
        .join()
        .map_err(|_| anyhow!("synthetic camera thread panicked"))??;

    let reports = bus.published_on(&cfg.topics.report);
    let batches = bus.published_on(&cfg.topics.sink);
    let annotated = bus.published_on(&cfg.topics.annotated);

    println!("frames generated:   {}", generated);
    println!("frames processed:   {}", stats.frames_processed);
    println!("annotated frames:   {}", annotated.len());
    println!("box reports:        {}", reports.len());
    println!("tracking batches:   {}", batches.len());
    println!("candidates ingested: {}", stats.candidates_ingested);

    if let Some(last) = reports.last() {
        let report: BoxReport = serde_json::from_slice(last)?;
        println!("last report (frame {}):", report.frame_seq);
        for b in &report.boxes {
            println!(
                "  {} conf={:.2} [{:.0},{:.0} - {:.0},{:.0}] ingested={}",
                b.class_name.as_deref().unwrap_or("?"),
                b.confidence,
                b.x_min,
                b.y_min,
                b.x_max,
                b.y_max,
                b.ingested
            );
        }
    }
    if let Some(last) = batches.last() {
        let batch: Vec<TrackedObjectCandidate> = serde_json::from_slice(last)?;
        for cand in &batch {
            println!(
                "  candidate {} label={} probability={:.1} box={:?}",
                cand.unique_id, cand.label, cand.probability, cand.bounding_box_2d
            );
        }
    }
    Ok(())
}
