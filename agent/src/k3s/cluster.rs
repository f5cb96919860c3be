//! Control plane backed by the k3s API server

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Container, Namespace, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, ListParams, LogParams, Patch, PatchParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use serde_json::Value;
use tracing::{debug, info};

use crate::errors::AgentError;
use crate::k3s::client::{
    label_selector, ContainerInfo, ContainerUsage, ControlPlane, DeploymentInfo, PodInfo,
};

/// `ControlPlane` implementation on the `kube` client
#[derive(Clone)]
pub struct KubeControlPlane {
    client: Client,
}

impl KubeControlPlane {
    /// Connect using the kubeconfig at `path`
    pub async fn from_kubeconfig(path: &str) -> Result<Self, AgentError> {
        let kubeconfig = Kubeconfig::read_from(path)
            .map_err(|e| AgentError::ConfigError(format!("Failed to load kubeconfig {}: {}", path, e)))?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| AgentError::ConfigError(format!("Invalid kubeconfig {}: {}", path, e)))?;
        let client = Client::try_from(config).map_err(|e| AgentError::ConfigError(e.to_string()))?;
        info!("Cluster client configured from {}", path);
        Ok(Self { client })
    }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ControlPlane for KubeControlPlane {
    async fn ensure_namespace(&self, namespace: &str) -> Result<(), AgentError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        if api.get_opt(namespace).await?.is_some() {
            return Ok(());
        }

        let body = Namespace {
            metadata: ObjectMeta {
                name: Some(namespace.to_string()),
                ..ObjectMeta::default()
            },
            ..Namespace::default()
        };
        api.create(&PostParams::default(), &body).await?;
        info!("Created namespace {}", namespace);
        Ok(())
    }

    async fn create_deployment(&self, namespace: &str, definition: &Value) -> Result<(), AgentError> {
        let deployment: Deployment = serde_json::from_value(definition.clone()).map_err(|e| {
            AgentError::ValidationError(format!("invalid deployment definition, {}", e))
        })?;
        self.deployments(namespace)
            .create(&PostParams::default(), &deployment)
            .await?;
        Ok(())
    }

    async fn get_deployment(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<DeploymentInfo>, AgentError> {
        let deployment = self.deployments(namespace).get_opt(name).await?;
        Ok(deployment.map(deployment_info))
    }

    async fn list_deployments(&self) -> Result<Vec<DeploymentInfo>, AgentError> {
        let api: Api<Deployment> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await?;
        Ok(list.items.into_iter().map(deployment_info).collect())
    }

    async fn patch_deployment(&self, name: &str, namespace: &str, patch: &Value) -> Result<(), AgentError> {
        self.deployments(namespace)
            .patch(name, &PatchParams::default(), &Patch::Strategic(patch))
            .await?;
        Ok(())
    }

    async fn delete_deployment(&self, name: &str, namespace: &str) -> Result<(), AgentError> {
        self.deployments(namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }

    async fn list_pods(
        &self,
        namespace: &str,
        match_labels: &BTreeMap<String, String>,
    ) -> Result<Vec<PodInfo>, AgentError> {
        let Some(selector) = label_selector(match_labels) else {
            return Ok(Vec::new());
        };
        let list = self
            .pods(namespace)
            .list(&ListParams::default().labels(&selector))
            .await?;
        Ok(list.items.into_iter().map(pod_info).collect())
    }

    async fn pod_metrics(&self, namespace: &str, pod: &str) -> Result<Vec<ContainerUsage>, AgentError> {
        let path = format!(
            "/apis/metrics.k8s.io/v1beta1/namespaces/{}/pods/{}",
            namespace, pod
        );
        let request = http::Request::get(path)
            .body(Vec::new())
            .map_err(|e| AgentError::Internal(e.to_string()))?;
        let metrics: Value = self.client.request(request).await?;
        debug!("Metrics for pod {}/{}: {}", namespace, pod, metrics);
        Ok(parse_pod_metrics(&metrics))
    }

    async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        tail_lines: i64,
        previous: bool,
    ) -> Result<String, AgentError> {
        let params = LogParams {
            container: Some(container.to_string()),
            tail_lines: Some(tail_lines),
            previous,
            ..LogParams::default()
        };
        Ok(self.pods(namespace).logs(pod, &params).await?)
    }
}

fn container_info(container: Container) -> ContainerInfo {
    let requests = container
        .resources
        .and_then(|r| r.requests)
        .unwrap_or_default();
    ContainerInfo {
        cpu_request: requests.get("cpu").map(|q| q.0.clone()),
        memory_request: requests.get("memory").map(|q| q.0.clone()),
        name: container.name,
        image: container.image.unwrap_or_default(),
        image_pull_policy: container.image_pull_policy,
    }
}

fn deployment_info(deployment: Deployment) -> DeploymentInfo {
    let status = deployment.status.unwrap_or_default();
    let (desired_replicas, match_labels, containers) = match deployment.spec {
        Some(spec) => (
            spec.replicas.unwrap_or(0),
            spec.selector.match_labels.unwrap_or_default(),
            spec.template
                .spec
                .map(|s| s.containers.into_iter().map(container_info).collect())
                .unwrap_or_default(),
        ),
        None => (0, BTreeMap::new(), Vec::new()),
    };

    DeploymentInfo {
        name: deployment.metadata.name.unwrap_or_default(),
        namespace: deployment.metadata.namespace.unwrap_or_default(),
        desired_replicas,
        available_replicas: status.available_replicas.unwrap_or(0),
        updated_replicas: status.updated_replicas.unwrap_or(0),
        unavailable_replicas: status.unavailable_replicas.unwrap_or(0),
        match_labels,
        containers,
    }
}

fn pod_info(pod: Pod) -> PodInfo {
    let status = pod.status.unwrap_or_default();
    PodInfo {
        name: pod.metadata.name.unwrap_or_default(),
        namespace: pod.metadata.namespace.unwrap_or_default(),
        phase: status.phase.unwrap_or_else(|| "Unknown".to_string()),
        start_time: status.start_time.map(|t| t.0),
        containers: pod
            .spec
            .map(|s| s.containers.into_iter().map(container_info).collect())
            .unwrap_or_default(),
    }
}

/// Extract container usage from a `metrics.k8s.io` PodMetrics object
pub fn parse_pod_metrics(metrics: &Value) -> Vec<ContainerUsage> {
    metrics
        .get("containers")
        .and_then(Value::as_array)
        .map(|containers| {
            containers
                .iter()
                .map(|c| {
                    let usage = c.get("usage");
                    let field = |key: &str| {
                        usage
                            .and_then(|u| u.get(key))
                            .and_then(Value::as_str)
                            .unwrap_or("0")
                            .to_string()
                    };
                    ContainerUsage {
                        name: c.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
                        cpu: field("cpu"),
                        memory: field("memory"),
                    }
                })
                .collect()
        })
        .unwrap_or_default()
}
