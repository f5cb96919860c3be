//! Outbound message channel

use async_trait::async_trait;
use rumqttc::{AsyncClient, QoS};
use serde_json::Value;
use tracing::debug;

use crate::errors::AgentError;

/// Sink for result, progress and broadcast messages.
///
/// Shared by the message pump, the progress reporters and the heartbeat.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, message: &Value) -> Result<(), AgentError>;
}

/// Publishes JSON messages on the upstream topic
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
    topic: String,
}

impl MqttPublisher {
    pub fn new(client: AsyncClient, topic: impl Into<String>) -> Self {
        Self {
            client,
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(&self, message: &Value) -> Result<(), AgentError> {
        let payload = serde_json::to_vec(message)?;
        self.client
            .publish(&self.topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| AgentError::MqttError(e.to_string()))?;
        debug!("Published to: {}", self.topic);
        Ok(())
    }
}
