//! Periodic progress publishing for long-running requests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::mqtt::Publisher;
use crate::orchestrator::request::CommandKind;
use crate::orchestrator::response::Envelope;
use crate::reporter::task_status::TaskStatusStore;

/// Spawns one reporting task per in-flight request. At most `max_concurrent`
/// tasks publish at once; the rest wait for a slot.
#[derive(Clone)]
pub struct ProgressReporter {
    publisher: Arc<dyn Publisher>,
    store: Arc<TaskStatusStore>,
    permits: Arc<Semaphore>,
    interval: Duration,
    active: Arc<AtomicUsize>,
    /// Held shared while a progress message is being published
    publishing: Arc<RwLock<()>>,
}

impl ProgressReporter {
    pub fn new(
        publisher: Arc<dyn Publisher>,
        store: Arc<TaskStatusStore>,
        interval: Duration,
        max_concurrent: usize,
    ) -> Self {
        Self {
            publisher,
            store,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            interval,
            active: Arc::new(AtomicUsize::new(0)),
            publishing: Arc::new(RwLock::new(())),
        }
    }

    /// Wait for progress messages already on their way out. Reporters
    /// stopped before this call publish nothing after it returns.
    pub async fn settle(&self) {
        drop(self.publishing.write().await);
    }

    pub fn store(&self) -> &Arc<TaskStatusStore> {
        &self.store
    }

    /// Reporting tasks that have not exited yet
    pub fn active_reporters(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Start reporting `label` for a request until the returned handle is
    /// stopped or dropped
    pub fn start(&self, request_id: &str, request: CommandKind, label: &str) -> ProgressHandle {
        self.store.set(request_id, label);

        let token = CancellationToken::new();
        let task = ReportTask {
            request_id: request_id.to_string(),
            request,
            publisher: self.publisher.clone(),
            store: self.store.clone(),
            permits: self.permits.clone(),
            interval: self.interval,
            publishing: self.publishing.clone(),
            token: token.clone(),
            active: ActiveGuard::new(self.active.clone()),
        };
        tokio::spawn(task.run());

        ProgressHandle {
            request_id: request_id.to_string(),
            store: self.store.clone(),
            token,
        }
    }
}

struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct ReportTask {
    request_id: String,
    request: CommandKind,
    publisher: Arc<dyn Publisher>,
    store: Arc<TaskStatusStore>,
    permits: Arc<Semaphore>,
    interval: Duration,
    publishing: Arc<RwLock<()>>,
    token: CancellationToken,
    active: ActiveGuard,
}

impl ReportTask {
    async fn run(self) {
        let _active = self.active;

        let _permit = tokio::select! {
            _ = self.token.cancelled() => return,
            permit = self.permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
        };

        debug!("Progress reporting started for request {}", self.request_id);
        loop {
            {
                let _publishing = self.publishing.read().await;
                if self.token.is_cancelled() {
                    break;
                }
                if let Some(label) = self.store.get(&self.request_id) {
                    let message = Envelope::progress(&self.request_id, self.request, &label).to_value();
                    if let Err(e) = self.publisher.publish(&message).await {
                        warn!("Failed to publish progress of {}: {}", self.request_id, e);
                    }
                }
            }

            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        debug!("Progress reporting stopped for request {}", self.request_id);
    }
}

/// Stop signal of one reporter. Dropping the handle stops the reporter.
pub struct ProgressHandle {
    request_id: String,
    store: Arc<TaskStatusStore>,
    token: CancellationToken,
}

impl ProgressHandle {
    /// Change the label published from the next tick on
    pub fn set_status(&self, label: &str) {
        if !self.is_stopped() {
            self.store.set(&self.request_id, label);
        }
    }

    /// Stop the reporter and forget the request's label. Idempotent.
    pub fn stop(&self) {
        if self.token.is_cancelled() {
            return;
        }
        self.token.cancel();
        self.store.remove(&self.request_id);
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for ProgressHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
