//! MQTT transport worker
//!
//! Owns the event loop. Decoded payloads are queued for the message pump so
//! that command execution never stalls the connection.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::mqtt::client::{MqttClient, MqttEvent};
use crate::mqtt::topics::Topics;
use crate::utils::{calc_exp_backoff, CooldownOptions};

/// MQTT worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Backoff between failed polls while the event loop reconnects
    pub reconnect_cooldown: CooldownOptions,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            reconnect_cooldown: CooldownOptions {
                base_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(60),
                multiplier: 2.0,
            },
        }
    }
}

/// Run the MQTT worker on an already connected client
pub async fn run<S, F>(
    options: &Options,
    mut client: MqttClient,
    inbox: mpsc::UnboundedSender<Value>,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("MQTT worker listening on {}", client.downstream_topic());

    let mut failures: u32 = 0;
    loop {
        let event = tokio::select! {
            _ = &mut shutdown_signal => {
                info!("MQTT worker shutting down...");
                break;
            }
            event = client.poll() => event,
        };

        match event {
            Ok(MqttEvent::Message(msg)) => {
                failures = 0;
                if !Topics::is_downstream_topic(&msg.topic) {
                    debug!("Ignoring message on topic: {}", msg.topic);
                    continue;
                }
                match msg.parse_json::<Value>() {
                    Ok(payload) => {
                        if inbox.send(payload).is_err() {
                            warn!("Message pump is gone, stopping MQTT worker");
                            break;
                        }
                    }
                    Err(e) => warn!("Dropping undecodable message: {}", e),
                }
            }
            Ok(MqttEvent::Connected) => {
                if failures > 0 {
                    info!("MQTT reconnected after {} failed attempts", failures);
                }
                failures = 0;
            }
            Ok(MqttEvent::Other) => {}
            Err(e) => {
                let delay = calc_exp_backoff(&options.reconnect_cooldown, failures);
                error!("MQTT connection error: {}, retrying in {:?}", e, delay);
                failures = failures.saturating_add(1);

                tokio::select! {
                    _ = &mut shutdown_signal => {
                        info!("MQTT worker shutting down...");
                        break;
                    }
                    _ = sleep_fn(delay) => {}
                }
            }
        }
    }

    if let Err(e) = client.disconnect().await {
        debug!("MQTT disconnect failed: {}", e);
    }
}
