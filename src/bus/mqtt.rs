use anyhow::{anyhow, Result};
use rumqttc::v5::mqttbytes::v5::LastWill;
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, Event, Incoming, MqttOptions};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use super::{Bus, Handler};
use crate::transport::{MqttEndpoint, TlsMaterials};

const PAYLOAD_ONLINE: &str = "online";
const PAYLOAD_OFFLINE: &str = "offline";
const REQUEST_CAPACITY: usize = 64;

type HandlerMap = Arc<Mutex<HashMap<String, Vec<Arc<Handler>>>>>;

/// Connection settings for `MqttBus`.
#[derive(Clone, Debug)]
pub struct MqttBusOptions {
    pub endpoint: MqttEndpoint,
    pub tls: TlsMaterials,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Retained availability topic (`online` / `offline` via last will).
    pub status_topic: Option<String>,
    /// Largest packet accepted or sent, in bytes. Raw frames are large.
    pub max_packet_size: u32,
    pub reconnect_delay: Duration,
}

/// MQTT v5 bus.
///
/// A background thread drives the rumqttc connection, dispatches incoming publishes to
/// the registered handlers and re-subscribes after every reconnect.
pub struct MqttBus {
    client: Client,
    handlers: HandlerMap,
    stopping: Arc<AtomicBool>,
    connection_handle: Mutex<Option<JoinHandle<()>>>,
    status_topic: Option<String>,
}

impl MqttBus {
    pub fn connect(opts: MqttBusOptions) -> Result<Self> {
        let mut options =
            MqttOptions::new(&opts.client_id, &opts.endpoint.host, opts.endpoint.port);
        options.set_keep_alive(Duration::from_secs(30));
        options.set_clean_start(true);
        options.set_max_packet_size(Some(opts.max_packet_size));
        if let Some(user) = opts.username.as_deref() {
            options.set_credentials(user, opts.password.as_deref().unwrap_or_default());
        }
        if let Some(topic) = opts.status_topic.as_deref() {
            options.set_last_will(LastWill::new(
                topic,
                PAYLOAD_OFFLINE.as_bytes().to_vec(),
                QoS::AtLeastOnce,
                true,
                None,
            ));
        }
        options.set_transport(opts.tls.build_transport(&opts.endpoint)?);

        let (client, connection) = Client::new(options, REQUEST_CAPACITY);
        let handlers: HandlerMap = Arc::default();
        let stopping = Arc::new(AtomicBool::new(false));

        let handle = {
            let client = client.clone();
            let handlers = handlers.clone();
            let stopping = stopping.clone();
            let status_topic = opts.status_topic.clone();
            let reconnect_delay = opts.reconnect_delay;
            std::thread::Builder::new()
                .name("mqtt-connection".to_string())
                .spawn(move || {
                    drive_connection(
                        connection,
                        &client,
                        &handlers,
                        &stopping,
                        status_topic.as_deref(),
                        reconnect_delay,
                    )
                })?
        };

        log::info!(
            "MQTT bus started for {}:{} (TLS: {}, auth: {})",
            opts.endpoint.host,
            opts.endpoint.port,
            opts.endpoint.use_tls,
            opts.username.is_some()
        );

        Ok(Self {
            client,
            handlers,
            stopping,
            connection_handle: Mutex::new(Some(handle)),
            status_topic: opts.status_topic,
        })
    }

    /// Publish `offline`, disconnect and join the connection thread.
    pub fn shutdown(&self) -> Result<()> {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(topic) = self.status_topic.as_deref() {
            let _ = self
                .client
                .try_publish(topic, QoS::AtLeastOnce, true, PAYLOAD_OFFLINE.as_bytes().to_vec());
        }
        self.client.disconnect()?;
        let handle = self
            .connection_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle
                .join()
                .map_err(|_| anyhow!("MQTT connection thread panicked"))?;
        }
        Ok(())
    }
}

impl Bus for MqttBus {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        // try_publish never blocks the detection loop; a full request queue drops the message.
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload)
            .map_err(|e| anyhow!("MQTT publish to {} failed: {}", topic, e))
    }

    fn subscribe(&self, topic: &str, handler: Handler) -> Result<()> {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(topic.to_string())
            .or_default()
            .push(Arc::new(handler));
        self.client.subscribe(topic, QoS::AtMostOnce)?;
        Ok(())
    }
}

fn drive_connection(
    mut connection: Connection,
    client: &Client,
    handlers: &HandlerMap,
    stopping: &AtomicBool,
    status_topic: Option<&str>,
    reconnect_delay: Duration,
) {
    for event in connection.iter() {
        match event {
            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                log::info!("MQTT connected");
                resubscribe(client, handlers);
                if let Some(topic) = status_topic {
                    let _ = client.try_publish(
                        topic,
                        QoS::AtLeastOnce,
                        true,
                        PAYLOAD_ONLINE.as_bytes().to_vec(),
                    );
                }
            }
            Ok(Event::Incoming(Incoming::Publish(publish))) => {
                let topic = match std::str::from_utf8(&publish.topic) {
                    Ok(topic) => topic,
                    Err(e) => {
                        log::warn!("skipping publish with invalid topic: {}", e);
                        continue;
                    }
                };
                let targets = handlers
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get(topic)
                    .cloned()
                    .unwrap_or_default();
                for handler in targets {
                    handler(topic, &publish.payload);
                }
            }
            Ok(_) => {}
            Err(e) => {
                if stopping.load(Ordering::SeqCst) {
                    break;
                }
                log::error!("MQTT connection error: {}. Reconnecting...", e);
                std::thread::sleep(reconnect_delay);
            }
        }
        if stopping.load(Ordering::SeqCst) {
            break;
        }
    }
    log::info!("MQTT connection closed");
}

// Runs on the connection thread, which is also the one draining requests,
// so it must not use the blocking subscribe.
fn resubscribe(client: &Client, handlers: &HandlerMap) {
    let topics: Vec<String> = handlers
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .keys()
        .cloned()
        .collect();
    for topic in topics {
        if let Err(e) = client.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
            log::warn!("re-subscribe to {} failed: {}", topic, e);
        }
    }
}
