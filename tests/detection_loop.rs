use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use detector_bridge::annotate::class_color;
use detector_bridge::config::AnnotationSettings;
use detector_bridge::ingest::{decode_image, encode_image, ImageHeader};
use detector_bridge::pipeline::SkipReason;
use detector_bridge::{
    Annotator, BoundingBox, BoxConverter, BoxReport, Bus, DetectionLoop, DetectionResult,
    FrameListener, FrameStore, InferenceWorker, LocalBus, LoopSettings, PixelEncoding,
    RecordingSink, ResultPublisher, StepOutcome, StubBackend,
};

const IMAGE_TOPIC: &str = "camera/left/image";
const ANNOTATED_TOPIC: &str = "detector/annotated";
const REPORT_TOPIC: &str = "detector/boxes";

struct Harness {
    detection_loop: DetectionLoop,
    bus: LocalBus,
    sink: RecordingSink,
    calls: Arc<AtomicUsize>,
}

fn harness(backend: StubBackend, settings: LoopSettings) -> Harness {
    let bus = LocalBus::new();
    let store = FrameStore::new();
    FrameListener::new(store.clone())
        .attach(&bus, IMAGE_TOPIC)
        .expect("attach listener");

    let calls = backend.call_counter();
    let worker = InferenceWorker::spawn(Box::new(backend)).expect("spawn worker");
    let sink = RecordingSink::new();
    let shared: Arc<dyn Bus> = Arc::new(bus.clone());
    let detection_loop = DetectionLoop::new(
        store,
        worker,
        BoxConverter::with_session("test", 100.0, true, vec![]),
        Annotator::new(&AnnotationSettings::default()).expect("annotator"),
        Box::new(sink.clone()),
        ResultPublisher::new(shared, ANNOTATED_TOPIC, REPORT_TOPIC),
        settings,
    );
    Harness {
        detection_loop,
        bus,
        sink,
        calls,
    }
}

fn settings() -> LoopSettings {
    LoopSettings {
        ingestion_threshold: 0.8,
        display_threshold: 0.5,
        inference_timeout: Duration::from_secs(5),
        poll_interval: Duration::from_millis(5),
        max_frame_age: None,
        health_log_interval: Duration::from_secs(60),
    }
}

fn image_message(seq: u64, width: u32, height: u32, step: Option<u32>) -> Vec<u8> {
    let header = ImageHeader {
        seq,
        stamp_ms: 1_700_000_000_000 + seq,
        frame_id: "left".to_string(),
        width,
        height,
        encoding: PixelEncoding::Bgr8,
        step,
    };
    let pixels = vec![0u8; (width * height * 3) as usize];
    encode_image(&header, &pixels).expect("encode image")
}

fn two_detections() -> StubBackend {
    StubBackend::new().with_detections(vec![
        DetectionResult::new(3, 0.92, BoundingBox::new(100.0, 100.0, 50.0, 50.0)),
        DetectionResult::new(5, 0.6, BoundingBox::new(200.0, 200.0, 40.0, 40.0)),
    ])
}

fn last_report(bus: &LocalBus) -> BoxReport {
    let reports = bus.published_on(REPORT_TOPIC);
    serde_json::from_slice(reports.last().expect("report published")).expect("report json")
}

#[test]
fn two_detections_split_between_sink_and_outputs() {
    let mut h = harness(two_detections(), settings());
    h.bus
        .publish(IMAGE_TOPIC, image_message(1, 320, 320, None))
        .unwrap();

    match h.detection_loop.step() {
        StepOutcome::Processed(summary) => {
            assert_eq!(summary.displayed, 2);
            assert_eq!(summary.ingested, 1);
            assert!(summary.sink_ok);
        }
        other => panic!("unexpected outcome {:?}", other),
    }

    let batches = h.sink.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 1);
    let candidate = &batches[0][0];
    assert_eq!(candidate.label, 3);
    assert!((candidate.probability - 92.0).abs() < 1e-3);
    assert_eq!(
        candidate.bounding_box_2d,
        [[75, 75], [125, 75], [125, 125], [75, 125]]
    );
    assert!(candidate.is_grounded);

    let report = last_report(&h.bus);
    assert_eq!(report.source_seq, 1);
    assert_eq!((report.width, report.height), (320, 320));
    assert_eq!(report.boxes.len(), 2);
    assert_eq!(report.boxes[0].class_id, 3);
    assert!(report.boxes[0].ingested);
    assert_eq!(report.boxes[1].class_id, 5);
    assert!(!report.boxes[1].ingested);

    let annotated = h.bus.published_on(ANNOTATED_TOPIC);
    assert_eq!(annotated.len(), 1);
    let (header, pixels) = decode_image(&annotated[0]).unwrap();
    assert_eq!(header.encoding, PixelEncoding::Rgb8);
    let pixel = |x: u32, y: u32| {
        let i = ((y * header.width + x) * 3) as usize;
        [pixels[i], pixels[i + 1], pixels[i + 2]]
    };
    assert_eq!(pixel(75, 100), class_color(3).0);
    assert_eq!(pixel(180, 200), class_color(5).0);
    assert_eq!(pixel(100, 100), [0, 0, 0]);
}

#[test]
fn each_batch_holds_only_its_own_frame() {
    let backend = StubBackend::new()
        .push_response(vec![DetectionResult::new(
            1,
            0.9,
            BoundingBox::new(20.0, 20.0, 10.0, 10.0),
        )])
        .push_response(vec![DetectionResult::new(
            2,
            0.95,
            BoundingBox::new(40.0, 40.0, 10.0, 10.0),
        )]);
    let mut h = harness(backend, settings());

    for seq in 1..=2 {
        h.bus
            .publish(IMAGE_TOPIC, image_message(seq, 64, 64, None))
            .unwrap();
        assert!(matches!(h.detection_loop.step(), StepOutcome::Processed(_)));
    }

    let batches = h.sink.batches();
    assert_eq!(batches.len(), 2);
    let labels: Vec<Vec<i32>> = batches
        .iter()
        .map(|batch| batch.iter().map(|c| c.label).collect())
        .collect();
    assert_eq!(labels, vec![vec![1], vec![2]]);
    assert_ne!(batches[0][0].unique_id, batches[1][0].unique_id);

    let reports = h.bus.published_on(REPORT_TOPIC);
    let second: BoxReport = serde_json::from_slice(&reports[1]).unwrap();
    assert_eq!(second.boxes.len(), 1);
    assert_eq!(second.boxes[0].class_id, 2);
}

#[test]
fn display_threshold_above_ingestion_threshold() {
    let backend = StubBackend::new().with_detections(vec![
        DetectionResult::new(1, 0.95, BoundingBox::new(20.0, 20.0, 10.0, 10.0)),
        DetectionResult::new(2, 0.6, BoundingBox::new(40.0, 40.0, 10.0, 10.0)),
    ]);
    let mut h = harness(
        backend,
        LoopSettings {
            ingestion_threshold: 0.5,
            display_threshold: 0.9,
            ..settings()
        },
    );
    h.bus
        .publish(IMAGE_TOPIC, image_message(1, 64, 64, None))
        .unwrap();

    match h.detection_loop.step() {
        StepOutcome::Processed(summary) => {
            assert_eq!(summary.ingested, 2);
            assert_eq!(summary.displayed, 1);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    let labels: Vec<i32> = h.sink.batches()[0].iter().map(|c| c.label).collect();
    assert_eq!(labels, vec![1, 2]);
    let report = last_report(&h.bus);
    assert_eq!(report.boxes.len(), 1);
    assert_eq!(report.boxes[0].class_id, 1);
}

#[test]
fn detections_below_display_threshold_are_dropped_everywhere() {
    let backend = StubBackend::new().with_detections(vec![DetectionResult::new(
        1,
        0.3,
        BoundingBox::new(10.0, 10.0, 8.0, 8.0),
    )]);
    let mut h = harness(backend, settings());
    h.bus
        .publish(IMAGE_TOPIC, image_message(1, 32, 32, None))
        .unwrap();

    assert!(matches!(h.detection_loop.step(), StepOutcome::Processed(_)));
    assert!(last_report(&h.bus).boxes.is_empty());
    assert_eq!(h.sink.batches(), vec![Vec::new()]);
}

#[test]
fn no_frame_means_no_inference_and_no_publication() {
    let mut h = harness(two_detections(), settings());
    let shutdown = Arc::new(AtomicBool::new(false));
    let stopper = shutdown.clone();
    let timer = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(150));
        stopper.store(true, Ordering::SeqCst);
    });

    let stats = h.detection_loop.run(&shutdown);
    timer.join().unwrap();

    assert_eq!(stats.frames_processed, 0);
    assert_eq!(h.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.bus.published_count(), 0);
    assert!(h.sink.batches().is_empty());
}

#[test]
fn shutdown_while_idle_returns_promptly() {
    let mut h = harness(StubBackend::new(), settings());
    let shutdown = Arc::new(AtomicBool::new(false));
    let stopper = shutdown.clone();
    let timer = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        stopper.store(true, Ordering::SeqCst);
        Instant::now()
    });

    h.detection_loop.run(&shutdown);
    let stopped_at = Instant::now();
    let signalled_at = timer.join().unwrap();
    assert!(stopped_at.duration_since(signalled_at) < Duration::from_secs(1));
}

#[test]
fn bad_frame_is_skipped_and_next_frame_succeeds() {
    let mut h = harness(two_detections(), settings());

    // Declared row step longer than the payload holds.
    h.bus
        .publish(IMAGE_TOPIC, image_message(1, 16, 16, Some(4096)))
        .unwrap();
    assert_eq!(h.detection_loop.step(), StepOutcome::Failed);
    assert_eq!(h.bus.published_on(REPORT_TOPIC).len(), 0);
    assert_eq!(h.calls.load(Ordering::SeqCst), 0);

    h.bus
        .publish(IMAGE_TOPIC, image_message(2, 320, 320, None))
        .unwrap();
    assert!(matches!(h.detection_loop.step(), StepOutcome::Processed(_)));
    assert_eq!(last_report(&h.bus).source_seq, 2);
    assert_eq!(h.detection_loop.stats().frames_failed, 1);
}

#[test]
fn sink_failure_does_not_block_publication() {
    let mut h = harness(two_detections(), settings());
    h.sink.set_failing(true);
    h.bus
        .publish(IMAGE_TOPIC, image_message(1, 320, 320, None))
        .unwrap();

    match h.detection_loop.step() {
        StepOutcome::Processed(summary) => assert!(!summary.sink_ok),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(h.bus.published_on(ANNOTATED_TOPIC).len(), 1);
    assert_eq!(last_report(&h.bus).boxes.len(), 2);
    assert_eq!(h.detection_loop.stats().sink_failures, 1);
}

#[test]
fn newest_frame_wins_and_each_frame_runs_once() {
    let mut h = harness(StubBackend::new(), settings());
    for seq in 1..=3 {
        h.bus
            .publish(IMAGE_TOPIC, image_message(seq, 8, 8, None))
            .unwrap();
    }

    assert!(matches!(h.detection_loop.step(), StepOutcome::Processed(_)));
    assert_eq!(h.detection_loop.step(), StepOutcome::Idle);
    assert_eq!(h.calls.load(Ordering::SeqCst), 1);
    assert_eq!(last_report(&h.bus).source_seq, 3);
}

#[test]
fn inference_timeout_drops_frame_and_skips_while_busy() {
    let backend = two_detections().with_delay(Duration::from_millis(300));
    let mut h = harness(
        backend,
        LoopSettings {
            inference_timeout: Duration::from_millis(20),
            ..settings()
        },
    );

    h.bus
        .publish(IMAGE_TOPIC, image_message(1, 8, 8, None))
        .unwrap();
    assert_eq!(h.detection_loop.step(), StepOutcome::Failed);

    h.bus
        .publish(IMAGE_TOPIC, image_message(2, 8, 8, None))
        .unwrap();
    assert_eq!(
        h.detection_loop.step(),
        StepOutcome::Skipped(SkipReason::Busy)
    );
    assert_eq!(h.bus.published_on(REPORT_TOPIC).len(), 0);
}

#[test]
fn stale_frames_are_not_processed() {
    let mut h = harness(
        two_detections(),
        LoopSettings {
            max_frame_age: Some(Duration::from_millis(10)),
            ..settings()
        },
    );
    h.bus
        .publish(IMAGE_TOPIC, image_message(1, 8, 8, None))
        .unwrap();
    std::thread::sleep(Duration::from_millis(40));

    assert_eq!(
        h.detection_loop.step(),
        StepOutcome::Skipped(SkipReason::Stale)
    );
    assert_eq!(h.calls.load(Ordering::SeqCst), 0);
}
