use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::{BackendKind, Device};

const DEFAULT_BROKER_ADDR: &str = "127.0.0.1:1883";
const DEFAULT_CLIENT_ID: &str = "detector-bridge";
const DEFAULT_MAX_PACKET_SIZE: u32 = 32 * 1024 * 1024;
const DEFAULT_IMAGE_TOPIC: &str = "zed2/zed_node/left_raw/image_raw_color";
const DEFAULT_ANNOTATED_TOPIC: &str = "detector_2d/objects_label";
const DEFAULT_REPORT_TOPIC: &str = "detector_2d/boxes_coordinates";
const DEFAULT_SINK_TOPIC: &str = "detector_2d/custom_box_objects";
const DEFAULT_STATUS_TOPIC: &str = "detector_2d/status";
const DEFAULT_MODEL_PATH: &str = "yolov8n.onnx";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
const DEFAULT_INGESTION_THRESHOLD: f32 = 0.8;
const DEFAULT_DISPLAY_THRESHOLD: f32 = 0.5;
const DEFAULT_INFERENCE_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_PROBABILITY_SCALE: f32 = 100.0;
const DEFAULT_LINE_THICKNESS: u32 = 2;
const DEFAULT_POLL_INTERVAL_MS: u64 = 5;
const DEFAULT_MAX_FRAME_AGE_MS: u64 = 2_000;
const DEFAULT_HEALTH_LOG_SECS: u64 = 30;

/// COCO-80 labels, the class order of the stock YOLOv8 weights.
const COCO_CLASS_NAMES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant",
    "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote", "keyboard", "cell phone",
    "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase", "scissors",
    "teddy bear", "hair drier", "toothbrush",
];

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct BridgeConfigFile {
    mqtt: Option<MqttConfigFile>,
    topics: Option<TopicConfigFile>,
    inference: Option<InferenceConfigFile>,
    tracking: Option<TrackingConfigFile>,
    annotation: Option<AnnotationConfigFile>,
    #[serde(rename = "loop")]
    runtime: Option<LoopConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct MqttConfigFile {
    broker_addr: Option<String>,
    client_id: Option<String>,
    username: Option<String>,
    password: Option<String>,
    use_tls: Option<bool>,
    tls_ca_path: Option<PathBuf>,
    tls_client_cert_path: Option<PathBuf>,
    tls_client_key_path: Option<PathBuf>,
    allow_remote: Option<bool>,
    max_packet_size: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct TopicConfigFile {
    image: Option<String>,
    annotated: Option<String>,
    report: Option<String>,
    sink: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct InferenceConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    device: Option<String>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    iou_threshold: Option<f32>,
    ingestion_threshold: Option<f32>,
    display_threshold: Option<f32>,
    timeout_ms: Option<u64>,
    class_names: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct TrackingConfigFile {
    probability_scale: Option<f32>,
    is_grounded: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct AnnotationConfigFile {
    font_path: Option<PathBuf>,
    line_thickness: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct LoopConfigFile {
    poll_interval_ms: Option<u64>,
    max_frame_age_ms: Option<u64>,
    health_log_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct BridgeConfig {
    pub mqtt: MqttSettings,
    pub topics: TopicSettings,
    pub inference: InferenceSettings,
    pub tracking: TrackingSettings,
    pub annotation: AnnotationSettings,
    pub runtime: RuntimeSettings,
}

#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub broker_addr: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
    pub tls_ca_path: Option<PathBuf>,
    pub tls_client_cert_path: Option<PathBuf>,
    pub tls_client_key_path: Option<PathBuf>,
    /// Permit a non-loopback broker.
    pub allow_remote: bool,
    pub max_packet_size: u32,
}

#[derive(Debug, Clone)]
pub struct TopicSettings {
    pub image: String,
    pub annotated: String,
    pub report: String,
    pub sink: String,
    pub status: String,
}

#[derive(Debug, Clone)]
pub struct InferenceSettings {
    pub backend: BackendKind,
    pub model_path: PathBuf,
    pub device: Device,
    pub input_width: u32,
    pub input_height: u32,
    pub iou_threshold: f32,
    /// Minimum confidence for submission to the tracking sink.
    pub ingestion_threshold: f32,
    /// Minimum confidence for the annotated frame and the box report.
    pub display_threshold: f32,
    pub timeout: Duration,
    pub class_names: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TrackingSettings {
    /// Multiplier from model confidence `[0,1]` to the sink's probability scale.
    pub probability_scale: f32,
    pub is_grounded: bool,
}

#[derive(Debug, Clone)]
pub struct AnnotationSettings {
    /// TrueType/OpenType font for box labels. Boxes are drawn unlabeled without one.
    pub font_path: Option<PathBuf>,
    pub line_thickness: u32,
}

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub poll_interval: Duration,
    /// Frames older than this are skipped. `None` disables the check.
    pub max_frame_age: Option<Duration>,
    pub health_log_interval: Duration,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            broker_addr: DEFAULT_BROKER_ADDR.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            username: None,
            password: None,
            use_tls: false,
            tls_ca_path: None,
            tls_client_cert_path: None,
            tls_client_key_path: None,
            allow_remote: false,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }
}

impl Default for TopicSettings {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE_TOPIC.to_string(),
            annotated: DEFAULT_ANNOTATED_TOPIC.to_string(),
            report: DEFAULT_REPORT_TOPIC.to_string(),
            sink: DEFAULT_SINK_TOPIC.to_string(),
            status: DEFAULT_STATUS_TOPIC.to_string(),
        }
    }
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            device: Device::default(),
            input_width: DEFAULT_INPUT_SIZE,
            input_height: DEFAULT_INPUT_SIZE,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            ingestion_threshold: DEFAULT_INGESTION_THRESHOLD,
            display_threshold: DEFAULT_DISPLAY_THRESHOLD,
            timeout: Duration::from_millis(DEFAULT_INFERENCE_TIMEOUT_MS),
            class_names: COCO_CLASS_NAMES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            probability_scale: DEFAULT_PROBABILITY_SCALE,
            is_grounded: true,
        }
    }
}

impl Default for AnnotationSettings {
    fn default() -> Self {
        Self {
            font_path: None,
            line_thickness: DEFAULT_LINE_THICKNESS,
        }
    }
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            max_frame_age: Some(Duration::from_millis(DEFAULT_MAX_FRAME_AGE_MS)),
            health_log_interval: Duration::from_secs(DEFAULT_HEALTH_LOG_SECS),
        }
    }
}

impl BridgeConfig {
    /// Defaults, then `DETECTOR_BRIDGE_CONFIG` file, then `DETECTOR_BRIDGE_*` variables.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("DETECTOR_BRIDGE_CONFIG")
            .ok()
            .filter(|path| !path.trim().is_empty());
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: BridgeConfigFile) -> Result<Self> {
        let mut cfg = Self::default();

        if let Some(mqtt) = file.mqtt {
            let s = &mut cfg.mqtt;
            set(&mut s.broker_addr, mqtt.broker_addr);
            set(&mut s.client_id, mqtt.client_id);
            set(&mut s.use_tls, mqtt.use_tls);
            set(&mut s.allow_remote, mqtt.allow_remote);
            set(&mut s.max_packet_size, mqtt.max_packet_size);
            s.username = mqtt.username;
            s.password = mqtt.password;
            s.tls_ca_path = mqtt.tls_ca_path;
            s.tls_client_cert_path = mqtt.tls_client_cert_path;
            s.tls_client_key_path = mqtt.tls_client_key_path;
        }

        if let Some(topics) = file.topics {
            let s = &mut cfg.topics;
            set(&mut s.image, topics.image);
            set(&mut s.annotated, topics.annotated);
            set(&mut s.report, topics.report);
            set(&mut s.sink, topics.sink);
            set(&mut s.status, topics.status);
        }

        if let Some(inference) = file.inference {
            let s = &mut cfg.inference;
            if let Some(backend) = inference.backend {
                s.backend = backend.parse()?;
            }
            if let Some(device) = inference.device {
                s.device = device.parse()?;
            }
            set(&mut s.model_path, inference.model_path);
            set(&mut s.input_width, inference.input_width);
            set(&mut s.input_height, inference.input_height);
            set(&mut s.iou_threshold, inference.iou_threshold);
            set(&mut s.ingestion_threshold, inference.ingestion_threshold);
            set(&mut s.display_threshold, inference.display_threshold);
            set(&mut s.class_names, inference.class_names);
            if let Some(ms) = inference.timeout_ms {
                s.timeout = Duration::from_millis(ms);
            }
        }

        if let Some(tracking) = file.tracking {
            set(&mut cfg.tracking.probability_scale, tracking.probability_scale);
            set(&mut cfg.tracking.is_grounded, tracking.is_grounded);
        }

        if let Some(annotation) = file.annotation {
            cfg.annotation.font_path = annotation.font_path;
            set(&mut cfg.annotation.line_thickness, annotation.line_thickness);
        }

        if let Some(runtime) = file.runtime {
            let s = &mut cfg.runtime;
            if let Some(ms) = runtime.poll_interval_ms {
                s.poll_interval = Duration::from_millis(ms);
            }
            if let Some(ms) = runtime.max_frame_age_ms {
                s.max_frame_age = frame_age(ms);
            }
            if let Some(secs) = runtime.health_log_interval_secs {
                s.health_log_interval = Duration::from_secs(secs);
            }
        }

        Ok(cfg)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = env_string("DETECTOR_BRIDGE_MQTT_ADDR") {
            self.mqtt.broker_addr = addr;
        }
        if let Some(client_id) = env_string("DETECTOR_BRIDGE_MQTT_CLIENT_ID") {
            self.mqtt.client_id = client_id;
        }
        if let Some(user) = env_string("DETECTOR_BRIDGE_MQTT_USERNAME") {
            self.mqtt.username = Some(user);
        }
        if let Ok(password) = std::env::var("DETECTOR_BRIDGE_MQTT_PASSWORD") {
            self.mqtt.password = Some(password);
        }
        if let Some(value) = env_string("DETECTOR_BRIDGE_MQTT_TLS") {
            self.mqtt.use_tls = parse_bool("DETECTOR_BRIDGE_MQTT_TLS", &value)?;
        }
        if let Some(path) = env_string("DETECTOR_BRIDGE_MQTT_TLS_CA") {
            self.mqtt.tls_ca_path = Some(PathBuf::from(path));
        }
        if let Some(value) = env_string("DETECTOR_BRIDGE_MQTT_ALLOW_REMOTE") {
            self.mqtt.allow_remote = parse_bool("DETECTOR_BRIDGE_MQTT_ALLOW_REMOTE", &value)?;
        }

        if let Some(topic) = env_string("DETECTOR_BRIDGE_IMAGE_TOPIC") {
            self.topics.image = topic;
        }
        if let Some(topic) = env_string("DETECTOR_BRIDGE_ANNOTATED_TOPIC") {
            self.topics.annotated = topic;
        }
        if let Some(topic) = env_string("DETECTOR_BRIDGE_REPORT_TOPIC") {
            self.topics.report = topic;
        }
        if let Some(topic) = env_string("DETECTOR_BRIDGE_SINK_TOPIC") {
            self.topics.sink = topic;
        }

        if let Some(backend) = env_string("DETECTOR_BRIDGE_BACKEND") {
            self.inference.backend = backend.parse()?;
        }
        if let Some(path) = env_string("DETECTOR_BRIDGE_MODEL_PATH") {
            self.inference.model_path = PathBuf::from(path);
        }
        if let Some(device) = env_string("DETECTOR_BRIDGE_DEVICE") {
            self.inference.device = device.parse()?;
        }
        if let Some(value) = env_string("DETECTOR_BRIDGE_INGESTION_THRESHOLD") {
            self.inference.ingestion_threshold = value.parse().map_err(|_| {
                anyhow!("DETECTOR_BRIDGE_INGESTION_THRESHOLD must be a number in [0, 1]")
            })?;
        }
        if let Some(value) = env_string("DETECTOR_BRIDGE_DISPLAY_THRESHOLD") {
            self.inference.display_threshold = value.parse().map_err(|_| {
                anyhow!("DETECTOR_BRIDGE_DISPLAY_THRESHOLD must be a number in [0, 1]")
            })?;
        }
        if let Some(value) = env_string("DETECTOR_BRIDGE_INFERENCE_TIMEOUT_MS") {
            let ms: u64 = value.parse().map_err(|_| {
                anyhow!(
                    "DETECTOR_BRIDGE_INFERENCE_TIMEOUT_MS must be an integer number of milliseconds"
                )
            })?;
            self.inference.timeout = Duration::from_millis(ms);
        }
        if let Some(names) = env_string("DETECTOR_BRIDGE_CLASS_NAMES") {
            let parsed = split_csv(&names);
            if !parsed.is_empty() {
                self.inference.class_names = parsed;
            }
        }

        if let Some(value) = env_string("DETECTOR_BRIDGE_PROBABILITY_SCALE") {
            self.tracking.probability_scale = value.parse().map_err(|_| {
                anyhow!("DETECTOR_BRIDGE_PROBABILITY_SCALE must be a positive number")
            })?;
        }
        if let Some(path) = env_string("DETECTOR_BRIDGE_FONT_PATH") {
            self.annotation.font_path = Some(PathBuf::from(path));
        }
        if let Some(value) = env_string("DETECTOR_BRIDGE_MAX_FRAME_AGE_MS") {
            let ms: u64 = value.parse().map_err(|_| {
                anyhow!(
                    "DETECTOR_BRIDGE_MAX_FRAME_AGE_MS must be an integer number of milliseconds"
                )
            })?;
            self.runtime.max_frame_age = frame_age(ms);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let inference = &self.inference;
        for (name, value) in [
            ("ingestion_threshold", inference.ingestion_threshold),
            ("display_threshold", inference.display_threshold),
            ("iou_threshold", inference.iou_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{} must be within [0, 1], got {}", name, value));
            }
        }
        if inference.input_width == 0 || inference.input_height == 0 {
            return Err(anyhow!("model input size must be non-zero"));
        }
        if inference.timeout.is_zero() {
            return Err(anyhow!("inference timeout must be greater than zero"));
        }

        let scale = self.tracking.probability_scale;
        if !scale.is_finite() || scale <= 0.0 {
            return Err(anyhow!("probability_scale must be positive, got {}", scale));
        }
        if self.annotation.line_thickness == 0 {
            return Err(anyhow!("line_thickness must be at least 1"));
        }
        if self.runtime.poll_interval.is_zero() {
            return Err(anyhow!("poll_interval must be greater than zero"));
        }

        for (name, topic) in [
            ("image", &self.topics.image),
            ("annotated", &self.topics.annotated),
            ("report", &self.topics.report),
            ("sink", &self.topics.sink),
            ("status", &self.topics.status),
        ] {
            if topic.trim().is_empty() {
                return Err(anyhow!("{} topic must not be empty", name));
            }
            if topic.contains(['#', '+']) {
                return Err(anyhow!("{} topic must not contain wildcards: {}", name, topic));
            }
        }
        if self.mqtt.client_id.trim().is_empty() {
            return Err(anyhow!("mqtt client_id must not be empty"));
        }
        Ok(())
    }
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

fn frame_age(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow!("{} must be a boolean (true/false)", name)),
    }
}

fn read_config_file(path: &Path) -> Result<BridgeConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
