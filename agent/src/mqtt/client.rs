//! MQTT client implementation

use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::errors::AgentError;
use crate::mqtt::publisher::MqttPublisher;
use crate::mqtt::topics::Topics;
use crate::storage::settings::{MqttBrokerSettings, MqttProtocol};

const KEEP_ALIVE: Duration = Duration::from_secs(120);

/// MQTT broker address
#[derive(Debug, Clone)]
pub struct MqttAddress {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    /// Optional path to a PEM-encoded CA certificate for broker verification.
    /// When `None` and `use_tls` is `true`, the system certificate store is used.
    pub ca_cert_path: Option<String>,
}

impl From<&MqttBrokerSettings> for MqttAddress {
    fn from(settings: &MqttBrokerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            use_tls: settings.protocol == MqttProtocol::Mqtts,
            ca_cert_path: settings.ca_cert_path.clone(),
        }
    }
}

/// MQTT client wrapper owning the event loop
pub struct MqttClient {
    client: AsyncClient,
    eventloop: EventLoop,
    upstream: String,
    downstream: String,
}

impl MqttClient {
    /// Create a new MQTT client. Nothing is sent until the event loop is polled.
    pub fn new(settings: &MqttBrokerSettings) -> Result<Self, AgentError> {
        let address = MqttAddress::from(settings);
        if address.host.is_empty() {
            return Err(AgentError::ConfigError("MQTT host is not configured".to_string()));
        }
        if settings.device_key.is_empty() {
            return Err(AgentError::ConfigError("MQTT device key is not configured".to_string()));
        }

        let client_id = format!("k3sgent-{}", settings.device_key);

        let mut options = MqttOptions::new(&client_id, &address.host, address.port);
        options.set_keep_alive(KEEP_ALIVE);
        if !settings.user.is_empty() {
            let password = settings
                .password
                .as_ref()
                .map(|p| p.expose_secret().to_string())
                .unwrap_or_default();
            options.set_credentials(&settings.user, password);
        }

        if address.use_tls {
            use rumqttc::{TlsConfiguration, Transport};
            use rustls::ClientConfig;

            let mut root_cert_store = rustls::RootCertStore::empty();

            if let Some(ref ca_path) = address.ca_cert_path {
                let ca_pem = std::fs::read(ca_path)
                    .map_err(|e| AgentError::MqttError(format!("Failed to read CA cert {ca_path}: {e}")))?;
                let mut cursor = std::io::Cursor::new(ca_pem);
                for cert in rustls_pemfile::certs(&mut cursor).flatten() {
                    let _ = root_cert_store.add(cert);
                }
            } else {
                for cert in rustls_native_certs::load_native_certs().unwrap_or_default() {
                    let _ = root_cert_store.add(cert);
                }
            }

            let client_config = ClientConfig::builder()
                .with_root_certificates(root_cert_store)
                .with_no_client_auth();

            options.set_transport(Transport::tls_with_config(TlsConfiguration::Rustls(
                Arc::new(client_config),
            )));
        }

        let (client, eventloop) = AsyncClient::new(options, 10);

        Ok(Self {
            client,
            eventloop,
            upstream: Topics::upstream(&settings.user, &settings.device_key),
            downstream: Topics::downstream(&settings.user, &settings.device_key),
        })
    }

    /// Publisher bound to the upstream topic
    pub fn publisher(&self) -> MqttPublisher {
        MqttPublisher::new(self.client.clone(), self.upstream.clone())
    }

    pub fn downstream_topic(&self) -> &str {
        &self.downstream
    }

    /// Drive the event loop until the broker accepts the connection
    pub async fn connect(&mut self, timeout: Duration) -> Result<(), AgentError> {
        let handshake = async {
            loop {
                match self.poll().await {
                    Ok(MqttEvent::Connected) => return Ok(()),
                    Ok(_) => {}
                    Err(e) => return Err(e),
                }
            }
        };

        match tokio::time::timeout(timeout, handshake).await {
            Ok(result) => result,
            Err(_) => Err(AgentError::MqttError(format!(
                "No connection acknowledgement within {:?}",
                timeout
            ))),
        }
    }

    /// Poll for the next event. Re-subscribes to the command topic after every
    /// (re)connection.
    pub async fn poll(&mut self) -> Result<MqttEvent, AgentError> {
        match self.eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                debug!("Received message on topic: {}", publish.topic);
                Ok(MqttEvent::Message(MqttMessage {
                    topic: publish.topic.clone(),
                    payload: publish.payload.to_vec(),
                }))
            }
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code != ConnectReturnCode::Success {
                    return Err(AgentError::MqttError(format!("Connection refused: {:?}", ack.code)));
                }
                info!("MQTT connected");
                self.client
                    .try_subscribe(&self.downstream, QoS::AtLeastOnce)
                    .map_err(|e| AgentError::MqttError(e.to_string()))?;
                info!("Subscribed to: {}", self.downstream);
                Ok(MqttEvent::Connected)
            }
            Ok(Event::Incoming(Packet::SubAck(_))) => {
                debug!("Subscription acknowledged");
                Ok(MqttEvent::Other)
            }
            Ok(_) => Ok(MqttEvent::Other),
            Err(e) => {
                warn!("MQTT poll error: {}", e);
                Err(AgentError::MqttError(e.to_string()))
            }
        }
    }

    /// Disconnect from broker
    pub async fn disconnect(&mut self) -> Result<(), AgentError> {
        self.client
            .disconnect()
            .await
            .map_err(|e| AgentError::MqttError(e.to_string()))?;
        info!("MQTT disconnected");
        Ok(())
    }
}

/// Event surfaced by [`MqttClient::poll`]
#[derive(Debug, Clone)]
pub enum MqttEvent {
    Connected,
    Message(MqttMessage),
    Other,
}

/// MQTT message
#[derive(Debug, Clone)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl MqttMessage {
    /// Parse payload as JSON
    pub fn parse_json<T: DeserializeOwned>(&self) -> Result<T, AgentError> {
        serde_json::from_slice(&self.payload).map_err(|e| AgentError::MqttError(e.to_string()))
    }
}
