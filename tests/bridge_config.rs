use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use detector_bridge::config::BridgeConfig;
use detector_bridge::{BackendKind, Device};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "DETECTOR_BRIDGE_CONFIG",
        "DETECTOR_BRIDGE_MQTT_ADDR",
        "DETECTOR_BRIDGE_MQTT_CLIENT_ID",
        "DETECTOR_BRIDGE_MQTT_USERNAME",
        "DETECTOR_BRIDGE_MQTT_PASSWORD",
        "DETECTOR_BRIDGE_MQTT_TLS",
        "DETECTOR_BRIDGE_MQTT_TLS_CA",
        "DETECTOR_BRIDGE_MQTT_ALLOW_REMOTE",
        "DETECTOR_BRIDGE_IMAGE_TOPIC",
        "DETECTOR_BRIDGE_ANNOTATED_TOPIC",
        "DETECTOR_BRIDGE_REPORT_TOPIC",
        "DETECTOR_BRIDGE_SINK_TOPIC",
        "DETECTOR_BRIDGE_BACKEND",
        "DETECTOR_BRIDGE_MODEL_PATH",
        "DETECTOR_BRIDGE_DEVICE",
        "DETECTOR_BRIDGE_INGESTION_THRESHOLD",
        "DETECTOR_BRIDGE_DISPLAY_THRESHOLD",
        "DETECTOR_BRIDGE_INFERENCE_TIMEOUT_MS",
        "DETECTOR_BRIDGE_CLASS_NAMES",
        "DETECTOR_BRIDGE_PROBABILITY_SCALE",
        "DETECTOR_BRIDGE_FONT_PATH",
        "DETECTOR_BRIDGE_MAX_FRAME_AGE_MS",
    ] {
        std::env::remove_var(key);
    }
}

fn write_temp(suffix: &str, contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("temp config");
    std::io::Write::write_all(&mut file, contents.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = BridgeConfig::load().expect("load defaults");
    assert_eq!(cfg.topics.image, "zed2/zed_node/left_raw/image_raw_color");
    assert_eq!(cfg.topics.annotated, "detector_2d/objects_label");
    assert_eq!(cfg.topics.report, "detector_2d/boxes_coordinates");
    assert_eq!(cfg.inference.ingestion_threshold, 0.8);
    assert_eq!(cfg.inference.display_threshold, 0.5);
    assert_eq!(cfg.inference.device, Device::Cpu);
    assert_eq!(cfg.tracking.probability_scale, 100.0);
    assert!(cfg.tracking.is_grounded);
    assert_eq!(cfg.mqtt.broker_addr, "127.0.0.1:1883");
    assert!(!cfg.mqtt.allow_remote);
}

#[test]
fn loads_toml_config_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_temp(
        ".toml",
        r#"
[mqtt]
broker_addr = "mqtts://broker.local:8883"
allow_remote = true

[topics]
image = "cam/left/image"

[inference]
backend = "stub"
model_path = "/models/yolov8s.onnx"
device = "cpu"
ingestion_threshold = 0.7
display_threshold = 0.4
timeout_ms = 500
class_names = ["forklift", "pallet"]

[tracking]
probability_scale = 1.0
is_grounded = false

[loop]
poll_interval_ms = 20
max_frame_age_ms = 0
"#,
    );

    std::env::set_var("DETECTOR_BRIDGE_CONFIG", file.path());
    std::env::set_var("DETECTOR_BRIDGE_DISPLAY_THRESHOLD", "0.3");
    std::env::set_var("DETECTOR_BRIDGE_SINK_TOPIC", "tracker/in");

    let cfg = BridgeConfig::load().expect("load config");

    assert_eq!(cfg.mqtt.broker_addr, "mqtts://broker.local:8883");
    assert!(cfg.mqtt.allow_remote);
    assert_eq!(cfg.topics.image, "cam/left/image");
    assert_eq!(cfg.topics.sink, "tracker/in");
    assert_eq!(cfg.inference.backend, BackendKind::Stub);
    assert_eq!(cfg.inference.model_path.to_str(), Some("/models/yolov8s.onnx"));
    assert_eq!(cfg.inference.ingestion_threshold, 0.7);
    assert_eq!(cfg.inference.display_threshold, 0.3);
    assert_eq!(cfg.inference.timeout, Duration::from_millis(500));
    assert_eq!(cfg.inference.class_names, vec!["forklift", "pallet"]);
    assert_eq!(cfg.tracking.probability_scale, 1.0);
    assert!(!cfg.tracking.is_grounded);
    assert_eq!(cfg.runtime.poll_interval, Duration::from_millis(20));
    assert!(cfg.runtime.max_frame_age.is_none());

    clear_env();
}

#[test]
fn loads_json_config() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_temp(
        ".json",
        r#"{
            "inference": { "device": "cuda:1", "display_threshold": 0.6 },
            "annotation": { "line_thickness": 4 }
        }"#,
    );

    let cfg = BridgeConfig::load_from(Some(file.path())).expect("load config");
    assert_eq!(cfg.inference.device, Device::Cuda(1));
    assert_eq!(cfg.inference.display_threshold, 0.6);
    assert_eq!(cfg.annotation.line_thickness, 4);
}

#[test]
fn thresholds_can_be_set_in_either_order() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("DETECTOR_BRIDGE_INGESTION_THRESHOLD", "0.4");
    std::env::set_var("DETECTOR_BRIDGE_DISPLAY_THRESHOLD", "0.9");
    let cfg = BridgeConfig::load().expect("independent thresholds");
    assert_eq!(cfg.inference.ingestion_threshold, 0.4);
    assert_eq!(cfg.inference.display_threshold, 0.9);

    clear_env();
}

#[test]
fn rejects_out_of_range_threshold_and_bad_numbers() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("DETECTOR_BRIDGE_INGESTION_THRESHOLD", "1.5");
    assert!(BridgeConfig::load().is_err());

    std::env::set_var("DETECTOR_BRIDGE_INGESTION_THRESHOLD", "high");
    assert!(BridgeConfig::load().is_err());

    clear_env();
    std::env::set_var("DETECTOR_BRIDGE_PROBABILITY_SCALE", "0");
    assert!(BridgeConfig::load().is_err());

    clear_env();
}

#[test]
fn rejects_unknown_device_and_missing_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("DETECTOR_BRIDGE_DEVICE", "tpu");
    assert!(BridgeConfig::load().is_err());
    clear_env();

    std::env::set_var("DETECTOR_BRIDGE_CONFIG", "/nonexistent/bridge.toml");
    assert!(BridgeConfig::load().is_err());

    clear_env();
}
