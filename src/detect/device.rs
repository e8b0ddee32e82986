use anyhow::{anyhow, Result};
use std::fmt;
use std::str::FromStr;

/// Compute device requested for inference.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Device {
    #[default]
    Cpu,
    /// Accelerator by ordinal.
    Cuda(u32),
}

impl Device {
    pub fn is_accelerator(&self) -> bool {
        matches!(self, Self::Cuda(_))
    }
}

impl FromStr for Device {
    type Err = anyhow::Error;

    /// Accepts `cpu`/`host`, `cuda`/`gpu`, `cuda:N`, or a bare ordinal `N`.
    fn from_str(s: &str) -> Result<Self> {
        let value = s.trim().to_lowercase();
        match value.as_str() {
            "cpu" | "host" => return Ok(Self::Cpu),
            "cuda" | "gpu" => return Ok(Self::Cuda(0)),
            _ => {}
        }
        let ordinal = value.strip_prefix("cuda:").unwrap_or(&value);
        ordinal
            .parse::<u32>()
            .map(Self::Cuda)
            .map_err(|_| anyhow!("unknown device '{}': expected cpu, cuda or cuda:N", s))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda(n) => write!(f, "cuda:{}", n),
        }
    }
}
