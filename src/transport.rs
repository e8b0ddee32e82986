//! MQTT endpoint parsing and TLS transport selection.
//!
//! Supported broker address forms:
//! - `host:port` (plain TCP unless TLS is forced)
//! - `mqtt://host:port`, `tcp://host:port` (plain TCP)
//! - `mqtts://host:port`, `ssl://host:port` (TLS)
//! - `[ipv6]:port`

use anyhow::{anyhow, Context, Result};
use rumqttc::Transport;
use std::path::Path;

/// Broker endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttEndpoint {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

/// PEM material for TLS connections. Empty means "use the default root store".
#[derive(Clone, Debug, Default)]
pub struct TlsMaterials {
    pub ca: Option<Vec<u8>>,
    /// Client certificate and key for mutual TLS, always provided together.
    pub client_auth: Option<(Vec<u8>, Vec<u8>)>,
}

impl TlsMaterials {
    pub fn load(
        ca_path: Option<&Path>,
        client_cert_path: Option<&Path>,
        client_key_path: Option<&Path>,
    ) -> Result<Self> {
        let ca = ca_path
            .map(|path| {
                std::fs::read(path)
                    .with_context(|| format!("failed to read MQTT TLS CA '{}'", path.display()))
            })
            .transpose()?;

        let client_auth = match (client_cert_path, client_key_path) {
            (Some(cert_path), Some(key_path)) => {
                let cert = std::fs::read(cert_path).with_context(|| {
                    format!("failed to read MQTT TLS client cert '{}'", cert_path.display())
                })?;
                let key = std::fs::read(key_path).with_context(|| {
                    format!("failed to read MQTT TLS client key '{}'", key_path.display())
                })?;
                Some((cert, key))
            }
            (None, None) => None,
            (Some(_), None) => {
                return Err(anyhow!("MQTT TLS client certificate provided without key"))
            }
            (None, Some(_)) => {
                return Err(anyhow!("MQTT TLS client key provided without certificate"))
            }
        };

        Ok(Self { ca, client_auth })
    }

    pub fn is_configured(&self) -> bool {
        self.ca.is_some() || self.client_auth.is_some()
    }

    /// Build the rumqttc transport for `endpoint`.
    pub fn build_transport(&self, endpoint: &MqttEndpoint) -> Result<Transport> {
        if !endpoint.use_tls {
            if self.is_configured() {
                return Err(anyhow!(
                    "MQTT TLS materials provided but TLS is disabled (use mqtts:// or enable TLS)"
                ));
            }
            return Ok(Transport::tcp());
        }
        if !self.is_configured() {
            return Ok(Transport::tls_with_default_config());
        }
        let ca = self.ca.clone().ok_or_else(|| {
            anyhow!("MQTT TLS CA certificate is required when providing client certificates")
        })?;
        Ok(Transport::tls(ca, self.client_auth.clone(), None))
    }
}

pub fn parse_mqtt_endpoint(addr: &str, force_tls: bool) -> Result<MqttEndpoint> {
    let mut use_tls = force_tls;
    let mut remainder = addr.trim();

    if let Some((scheme, rest)) = remainder.split_once("://") {
        match scheme {
            "mqtt" | "tcp" => {}
            "mqtts" | "ssl" => use_tls = true,
            other => return Err(anyhow!("unsupported MQTT scheme: {}", other)),
        }
        remainder = rest;
    }

    let (host, port) = split_host_port(remainder)?;
    if host.is_empty() {
        return Err(anyhow!("missing MQTT host in {}", addr));
    }
    Ok(MqttEndpoint {
        host,
        port,
        use_tls,
    })
}

fn split_host_port(addr: &str) -> Result<(String, u16)> {
    let (host, port) = match addr.strip_prefix('[') {
        Some(rest) => {
            let (host, rest) = rest
                .split_once(']')
                .ok_or_else(|| anyhow!("invalid MQTT address: {}", addr))?;
            let port = rest
                .strip_prefix(':')
                .ok_or_else(|| anyhow!("missing MQTT port in {}", addr))?;
            (host, port)
        }
        None => addr
            .rsplit_once(':')
            .ok_or_else(|| anyhow!("missing MQTT port in {}", addr))?,
    };
    let port: u16 = port
        .parse()
        .with_context(|| format!("invalid MQTT port in {}", addr))?;
    Ok((host.to_string(), port))
}

/// Reject non-loopback brokers unless remote access was explicitly allowed.
pub fn validate_loopback_addr(endpoint: &MqttEndpoint, original: &str) -> Result<()> {
    let host = endpoint.host.as_str();
    if host == "localhost" {
        return Ok(());
    }
    if let Ok(ip) = host.parse::<std::net::IpAddr>() {
        if ip.is_loopback() {
            return Ok(());
        }
    }
    Err(anyhow!(
        "MQTT broker must be loopback: {} (set mqtt.allow_remote to override)",
        original
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_endpoint_plain() {
        let ep = parse_mqtt_endpoint("127.0.0.1:1883", false).unwrap();
        assert_eq!(ep.host, "127.0.0.1");
        assert_eq!(ep.port, 1883);
        assert!(!ep.use_tls);
    }

    #[test]
    fn parse_endpoint_tls_scheme() {
        let ep = parse_mqtt_endpoint("ssl://jetson.local:8883", false).unwrap();
        assert_eq!(ep.host, "jetson.local");
        assert!(ep.use_tls);
    }

    #[test]
    fn parse_endpoint_ipv6() {
        let ep = parse_mqtt_endpoint("[::1]:1883", false).unwrap();
        assert_eq!(ep.host, "::1");
        assert_eq!(ep.port, 1883);
    }

    #[test]
    fn parse_endpoint_rejects_missing_port_and_bad_scheme() {
        assert!(parse_mqtt_endpoint("localhost", false).is_err());
        assert!(parse_mqtt_endpoint("ws://localhost:80", false).is_err());
    }

    #[test]
    fn loopback_guard() {
        let local = parse_mqtt_endpoint("[::1]:1883", false).unwrap();
        assert!(validate_loopback_addr(&local, "[::1]:1883").is_ok());
        let remote = parse_mqtt_endpoint("192.168.1.10:1883", false).unwrap();
        assert!(validate_loopback_addr(&remote, "192.168.1.10:1883").is_err());
    }

    #[test]
    fn client_cert_requires_key() {
        let err = TlsMaterials::load(None, Some(Path::new("/nonexistent/cert.pem")), None)
            .unwrap_err();
        assert!(err.to_string().contains("without key"));
    }

    #[test]
    fn tls_materials_rejected_on_plain_tcp() {
        let materials = TlsMaterials {
            ca: Some(b"pem".to_vec()),
            client_auth: None,
        };
        let ep = parse_mqtt_endpoint("127.0.0.1:1883", false).unwrap();
        assert!(materials.build_transport(&ep).is_err());
    }
}
