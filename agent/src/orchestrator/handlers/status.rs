//! Status listings and the unsolicited broadcast

use serde_json::{json, Value};

use crate::errors::AgentError;
use crate::orchestrator::engine::{Engine, Outcome};
use crate::orchestrator::response::status_update;
use crate::telemetry::{app_counts, collect_resources};

impl Engine {
    /// `{apps, resources, app_counts}` over every non-system app
    pub async fn apps_and_resources(&self) -> Result<Value, AgentError> {
        let apps = self.list_user_apps().await?;
        let resources = collect_resources().await;
        Ok(json!({
            "apps": apps,
            "resources": resources,
            "app_counts": app_counts(&apps),
        }))
    }

    pub(crate) async fn get_apps_and_resources_status(&self) -> Result<Outcome, AgentError> {
        Ok(Outcome::Completed(Some(self.apps_and_resources().await?)))
    }

    /// Publish the status broadcast sent by the heartbeat
    pub async fn broadcast_status(&self) -> Result<(), AgentError> {
        let status = self.apps_and_resources().await?;
        self.notify(&status_update(status)).await;
        Ok(())
    }
}
