use anyhow::{anyhow, Result};
use std::fmt;
use std::str::FromStr;

use crate::config::InferenceSettings;
use crate::detect::backend::InferenceBackend;
use crate::detect::backends::StubBackend;

/// Which inference backend to build at startup.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BackendKind {
    /// Scripted backend; never detects anything unless scripted.
    Stub,
    /// YOLOv8 ONNX through tract (`backend-tract` feature).
    #[default]
    Tract,
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "stub" | "none" => Ok(Self::Stub),
            "tract" | "onnx" => Ok(Self::Tract),
            other => Err(anyhow!(
                "unknown inference backend '{}': expected 'tract' or 'stub'",
                other
            )),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stub => write!(f, "stub"),
            Self::Tract => write!(f, "tract"),
        }
    }
}

/// Build and warm up the configured backend.
///
/// Called once at startup; any error here (missing weights, unsupported device) is fatal.
pub fn load_backend(settings: &InferenceSettings) -> Result<Box<dyn InferenceBackend>> {
    let mut backend: Box<dyn InferenceBackend> = match settings.backend {
        BackendKind::Stub => Box::new(StubBackend::new()),
        BackendKind::Tract => load_tract(settings)?,
    };
    backend
        .warm_up()
        .map_err(|e| anyhow!("{} backend warm-up failed: {}", backend.name(), e))?;
    log::info!(
        "inference backend '{}' ready (device {})",
        backend.name(),
        settings.device
    );
    Ok(backend)
}

#[cfg(feature = "backend-tract")]
fn load_tract(settings: &InferenceSettings) -> Result<Box<dyn InferenceBackend>> {
    use crate::detect::backends::TractBackend;

    if settings.device.is_accelerator() {
        return Err(anyhow!(
            "device {} unavailable: the tract backend runs on the host only (use device = \"cpu\")",
            settings.device
        ));
    }
    let backend = TractBackend::new(
        &settings.model_path,
        settings.input_width,
        settings.input_height,
    )?
    .with_iou_threshold(settings.iou_threshold);
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn load_tract(_settings: &InferenceSettings) -> Result<Box<dyn InferenceBackend>> {
    Err(anyhow!(
        "inference backend 'tract' requires the 'backend-tract' feature"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::Device;

    #[test]
    fn backend_kind_parses() {
        assert_eq!("ONNX".parse::<BackendKind>().unwrap(), BackendKind::Tract);
        assert_eq!("stub".parse::<BackendKind>().unwrap(), BackendKind::Stub);
        assert!("torch".parse::<BackendKind>().is_err());
    }

    #[test]
    fn stub_backend_loads() {
        let settings = InferenceSettings {
            backend: BackendKind::Stub,
            ..InferenceSettings::default()
        };
        let backend = load_backend(&settings).unwrap();
        assert_eq!(backend.name(), "stub");
    }

    #[test]
    fn missing_model_fails_fast() {
        let settings = InferenceSettings {
            backend: BackendKind::Tract,
            model_path: "/nonexistent/yolov8n.onnx".into(),
            device: Device::Cpu,
            ..InferenceSettings::default()
        };
        assert!(load_backend(&settings).is_err());
    }

    #[cfg(feature = "backend-tract")]
    #[test]
    fn accelerator_request_fails_fast_on_tract() {
        let settings = InferenceSettings {
            backend: BackendKind::Tract,
            device: Device::Cuda(0),
            ..InferenceSettings::default()
        };
        let err = load_backend(&settings).err().expect("device error");
        assert!(err.to_string().contains("unavailable"));
    }
}
