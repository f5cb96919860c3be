//! Bulk deletion

use std::fmt;

use tracing::{info, warn};

use crate::errors::AgentError;
use crate::orchestrator::engine::{Engine, Outcome};
use crate::orchestrator::request::Request;
use crate::orchestrator::response::labels;

/// Per-item results of a bulk operation
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BulkOutcome {
    pub items: Vec<(String, Result<(), String>)>,
}

impl BulkOutcome {
    pub fn record(&mut self, item: impl Into<String>, result: Result<(), AgentError>) {
        let item = item.into();
        if let Err(e) = &result {
            warn!("Failed to delete {}: {}", item, e);
        }
        self.items.push((item, result.map_err(|e| e.reason())));
    }

    pub fn failures(&self) -> usize {
        self.items.iter().filter(|(_, r)| r.is_err()).count()
    }
}

impl fmt::Display for BulkOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} deleted, {} failed",
            self.items.len() - self.failures(),
            self.failures()
        )
    }
}

impl Engine {
    /// Delete every non-system app, then every imported image. Individual
    /// failures are recorded and skipped.
    pub(crate) async fn delete_all_apps_and_images(&self, request: &Request) -> Result<Outcome, AgentError> {
        let progress = self
            .reporter
            .start(&request.request_id, request.kind, labels::DELETING);
        let mut outcome = BulkOutcome::default();

        match self.control_plane.list_deployments().await {
            Ok(deployments) => {
                for deployment in deployments
                    .iter()
                    .filter(|d| d.namespace != self.options.system_namespace)
                {
                    let result = self.remove_app(&deployment.name, &deployment.namespace).await;
                    outcome.record(format!("app {}/{}", deployment.namespace, deployment.name), result);
                }
            }
            Err(e) => outcome.record("app listing", Err(e)),
        }

        match self.images.list_images().await {
            Ok(images) => {
                for image in images {
                    let result = self.images.remove_image(&image).await;
                    outcome.record(format!("image {}", image), result);
                }
            }
            Err(e) => outcome.record("image listing", Err(e)),
        }

        progress.stop();
        info!("Bulk deletion finished: {}", outcome);
        Ok(Outcome::Completed(None))
    }
}
