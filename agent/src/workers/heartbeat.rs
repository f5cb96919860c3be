//! Periodic apps and resources broadcast

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::orchestrator::Engine;

/// Heartbeat worker options
#[derive(Debug, Clone)]
pub struct Options {
    pub interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }
}

/// Run the heartbeat worker
pub async fn run<S, F>(
    options: &Options,
    engine: Arc<Engine>,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Heartbeat worker starting, interval {:?}", options.interval);

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Heartbeat worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }

        match engine.broadcast_status().await {
            Ok(()) => debug!("Status broadcast sent"),
            Err(e) if e.is_control_plane() => {
                warn!("Status broadcast skipped, cluster not reachable: {}", e)
            }
            Err(e) => error!("Status broadcast failed: {}", e),
        }
    }
}
