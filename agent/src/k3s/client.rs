//! Control plane and container runtime boundaries

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::errors::AgentError;

/// Container as declared in a deployment or pod spec
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerInfo {
    pub name: String,
    pub image: String,
    pub image_pull_policy: Option<String>,
    /// Declared `resources.requests.cpu`
    pub cpu_request: Option<String>,
    /// Declared `resources.requests.memory`
    pub memory_request: Option<String>,
}

/// Read-back of one deployment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploymentInfo {
    pub name: String,
    pub namespace: String,
    pub desired_replicas: i32,
    pub available_replicas: i32,
    pub updated_replicas: i32,
    pub unavailable_replicas: i32,
    pub match_labels: BTreeMap<String, String>,
    pub containers: Vec<ContainerInfo>,
}

impl DeploymentInfo {
    /// Rollout finished: every desired replica is available and up to date
    pub fn is_rolled_out(&self) -> bool {
        self.available_replicas == self.desired_replicas
            && self.updated_replicas == self.desired_replicas
    }
}

/// Read-back of one pod
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodInfo {
    pub name: String,
    pub namespace: String,
    pub phase: String,
    pub start_time: Option<DateTime<Utc>>,
    pub containers: Vec<ContainerInfo>,
}

/// Current usage of one container, as raw quantity strings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerUsage {
    pub name: String,
    pub cpu: String,
    pub memory: String,
}

/// Declarative CRUD against the local cluster.
///
/// Mutations return as soon as the API accepted them; convergence is observed
/// separately by polling.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Create the namespace unless it already exists
    async fn ensure_namespace(&self, namespace: &str) -> Result<(), AgentError>;

    async fn create_deployment(&self, namespace: &str, definition: &Value) -> Result<(), AgentError>;

    /// `Ok(None)` when the deployment does not exist
    async fn get_deployment(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<DeploymentInfo>, AgentError>;

    /// Deployments across all namespaces
    async fn list_deployments(&self) -> Result<Vec<DeploymentInfo>, AgentError>;

    /// Strategic merge patch of a deployment
    async fn patch_deployment(&self, name: &str, namespace: &str, patch: &Value) -> Result<(), AgentError>;

    async fn delete_deployment(&self, name: &str, namespace: &str) -> Result<(), AgentError>;

    async fn list_pods(
        &self,
        namespace: &str,
        match_labels: &BTreeMap<String, String>,
    ) -> Result<Vec<PodInfo>, AgentError>;

    /// Container usage from the metrics API
    async fn pod_metrics(&self, namespace: &str, pod: &str) -> Result<Vec<ContainerUsage>, AgentError>;

    async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        tail_lines: i64,
        previous: bool,
    ) -> Result<String, AgentError>;
}

/// Image store of the container runtime backing the cluster
#[async_trait]
pub trait ImageRuntime: Send + Sync {
    /// Import an image archive
    async fn import_image(&self, archive: &Path) -> Result<(), AgentError>;

    /// Imported user images, as short names (`name:tag`)
    async fn list_images(&self) -> Result<Vec<String>, AgentError>;

    async fn remove_image(&self, image: &str) -> Result<(), AgentError>;
}

/// Kubernetes label selector string (`k1=v1,k2=v2`). An empty selector
/// selects nothing.
pub fn label_selector(match_labels: &BTreeMap<String, String>) -> Option<String> {
    if match_labels.is_empty() {
        return None;
    }
    Some(
        match_labels
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(","),
    )
}
