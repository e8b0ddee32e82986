//! detector_bridge - 2D detection bridge for a stereo camera's 3D object tracker.
//!
//! 1. Subscribes to the camera's color image topic over MQTT
//! 2. Runs the configured detector on the newest frame
//! 3. Submits confident detections to the tracking sink topic as one batch per frame
//! 4. Publishes an annotated frame and a box report
//!
//! Configuration is read from `DETECTOR_BRIDGE_CONFIG` and `DETECTOR_BRIDGE_*`
//! variables; command-line flags override both.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use detector_bridge::transport::{parse_mqtt_endpoint, validate_loopback_addr, TlsMaterials};
use detector_bridge::{
    load_backend, Annotator, BackendKind, BoxConverter, BridgeConfig, BusSink, DetectionLoop,
    Device, FrameListener, FrameStore, InferenceWorker, LoopSettings, MqttBus, MqttBusOptions,
    ResultPublisher,
};

const RECONNECT_DELAY: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Bridge camera frames through a 2D detector into a 3D object tracker"
)]
struct Args {
    /// Path to a TOML or JSON config file.
    #[arg(long, env = "DETECTOR_BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// MQTT broker address (host:port, mqtt://, mqtts://).
    /// Only loopback brokers are accepted unless --allow-remote-mqtt is set.
    #[arg(long)]
    mqtt_broker_addr: Option<String>,

    /// Allow a non-loopback MQTT broker.
    #[arg(long)]
    allow_remote_mqtt: bool,

    /// Color image topic to subscribe to.
    #[arg(long)]
    image_topic: Option<String>,

    /// Inference backend: 'tract' or 'stub'.
    #[arg(long)]
    backend: Option<BackendKind>,

    /// Model weights (ONNX).
    #[arg(long)]
    model_path: Option<PathBuf>,

    /// Compute device: 'cpu' or 'cuda:N'.
    #[arg(long)]
    device: Option<Device>,

    /// Minimum confidence for the tracking sink (0.0-1.0).
    #[arg(long)]
    ingestion_threshold: Option<f32>,

    /// Minimum confidence for the annotated frame and report (0.0-1.0).
    #[arg(long)]
    display_threshold: Option<f32>,
}

impl Args {
    fn apply(&self, cfg: &mut BridgeConfig) {
        if let Some(addr) = &self.mqtt_broker_addr {
            cfg.mqtt.broker_addr = addr.clone();
        }
        if self.allow_remote_mqtt {
            cfg.mqtt.allow_remote = true;
        }
        if let Some(topic) = &self.image_topic {
            cfg.topics.image = topic.clone();
        }
        if let Some(backend) = self.backend {
            cfg.inference.backend = backend;
        }
        if let Some(path) = &self.model_path {
            cfg.inference.model_path = path.clone();
        }
        if let Some(device) = self.device {
            cfg.inference.device = device;
        }
        if let Some(threshold) = self.ingestion_threshold {
            cfg.inference.ingestion_threshold = threshold;
        }
        if let Some(threshold) = self.display_threshold {
            cfg.inference.display_threshold = threshold;
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = BridgeConfig::load_from(args.config.as_deref())?;
    args.apply(&mut cfg);
    cfg.validate()?;

    let endpoint = parse_mqtt_endpoint(&cfg.mqtt.broker_addr, cfg.mqtt.use_tls)?;
    let tls = TlsMaterials::load(
        cfg.mqtt.tls_ca_path.as_deref(),
        cfg.mqtt.tls_client_cert_path.as_deref(),
        cfg.mqtt.tls_client_key_path.as_deref(),
    )?;
    if !cfg.mqtt.allow_remote {
        validate_loopback_addr(&endpoint, &cfg.mqtt.broker_addr)?;
    } else {
        log::warn!("remote MQTT enabled - frames travel over the network");
    }

    log::info!("detector bridge starting");
    log::info!(
        "  MQTT broker: {}:{} (TLS: {})",
        endpoint.host,
        endpoint.port,
        endpoint.use_tls
    );
    log::info!("  image topic: {}", cfg.topics.image);
    log::info!(
        "  outputs: annotated={} report={} sink={}",
        cfg.topics.annotated,
        cfg.topics.report,
        cfg.topics.sink
    );
    log::info!(
        "  model: {} ({} on {})",
        cfg.inference.model_path.display(),
        cfg.inference.backend,
        cfg.inference.device
    );
    log::info!(
        "  thresholds: ingestion={} display={}",
        cfg.inference.ingestion_threshold,
        cfg.inference.display_threshold
    );

    // Model problems are fatal before anything is subscribed.
    let backend = load_backend(&cfg.inference)?;
    let worker = InferenceWorker::spawn(backend)?;
    let annotator = Annotator::new(&cfg.annotation)?;
    if !annotator.has_font() {
        log::info!("no label font configured; boxes are drawn without labels");
    }

    let bus = Arc::new(MqttBus::connect(MqttBusOptions {
        endpoint,
        tls,
        client_id: cfg.mqtt.client_id.clone(),
        username: cfg.mqtt.username.clone(),
        password: cfg.mqtt.password.clone(),
        status_topic: Some(cfg.topics.status.clone()),
        max_packet_size: cfg.mqtt.max_packet_size,
        reconnect_delay: RECONNECT_DELAY,
    })?);

    let store = FrameStore::new();
    FrameListener::new(store.clone()).attach(bus.as_ref(), &cfg.topics.image)?;

    let converter = BoxConverter::new(
        cfg.tracking.probability_scale,
        cfg.tracking.is_grounded,
        cfg.inference.class_names.clone(),
    );
    let sink = BusSink::new(bus.clone(), cfg.topics.sink.clone());
    let publisher = ResultPublisher::new(
        bus.clone(),
        cfg.topics.annotated.clone(),
        cfg.topics.report.clone(),
    );
    let mut detection_loop = DetectionLoop::new(
        store,
        worker,
        converter,
        annotator,
        Box::new(sink),
        publisher,
        LoopSettings::from_config(&cfg),
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    let signal = shutdown.clone();
    ctrlc::set_handler(move || {
        signal.store(true, Ordering::SeqCst);
    })?;

    let stats = detection_loop.run(&shutdown);
    log::info!(
        "shutdown: processed={} failed={} ingested={}",
        stats.frames_processed,
        stats.frames_failed,
        stats.candidates_ingested
    );
    bus.shutdown()?;
    Ok(())
}
