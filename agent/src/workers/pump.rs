//! Message pump: executes queued commands one at a time

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::info;

use crate::orchestrator::Dispatcher;

/// Dispatch queued payloads in arrival order until shutdown or until the
/// transport drops its sender
pub async fn run(
    dispatcher: Dispatcher,
    mut inbox: mpsc::UnboundedReceiver<Value>,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) {
    info!("Message pump starting...");

    loop {
        let payload = tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Message pump shutting down...");
                return;
            }
            payload = inbox.recv() => payload,
        };

        match payload {
            Some(payload) => dispatcher.dispatch(payload).await,
            None => {
                info!("Message queue closed, message pump stopping");
                return;
            }
        }
    }
}
