//! Command execution engine

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::errors::AgentError;
use crate::filesys::dir::Dir;
use crate::k3s::app::App;
use crate::k3s::health::AppStatus;
use crate::k3s::poller::{await_condition, Convergence, PollPolicy};
use crate::k3s::{ControlPlane, ImageRuntime};
use crate::mqtt::Publisher;
use crate::orchestrator::request::{CommandKind, Request};
use crate::orchestrator::response::Envelope;
use crate::orchestrator::schema::DeploymentSchemas;
use crate::reporter::{ProgressReporter, TaskStatusStore};
use crate::telemetry::HostFacts;
use crate::tunnel::{ServiceManager, TunnelOptions};

/// Tunables of the engine
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Wait after create, patch and scale calls
    pub rollout_poll: PollPolicy,
    /// Wait after delete calls
    pub delete_poll: PollPolicy,
    pub reporter_interval: Duration,
    pub reporter_capacity: usize,
    /// Namespace excluded from listings and bulk deletion
    pub system_namespace: String,
    /// Scratch directory for downloaded image archives
    pub tmp_dir: Dir,
    pub download_timeout: Duration,
    pub tunnel: TunnelOptions,
}

/// External collaborators of the engine
#[derive(Clone)]
pub struct Collaborators {
    pub control_plane: Arc<dyn ControlPlane>,
    pub images: Arc<dyn ImageRuntime>,
    pub services: Arc<dyn ServiceManager>,
    pub publisher: Arc<dyn Publisher>,
}

/// Terminal result of a handler
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed(Option<Value>),
    Failed { reason: String, result: Option<Value> },
}

impl Outcome {
    /// `Completed` only when the app is healthy
    pub fn health_gated(app: &App) -> Self {
        if app.status == AppStatus::Healthy {
            Outcome::Completed(Some(app.to_value()))
        } else {
            Outcome::Failed {
                reason: format!("app status is {}", app.status),
                result: Some(app.to_value()),
            }
        }
    }
}

/// Executes commands against the cluster and reports their results.
///
/// Built once at startup; handlers run one at a time on the message pump.
pub struct Engine {
    pub(crate) control_plane: Arc<dyn ControlPlane>,
    pub(crate) images: Arc<dyn ImageRuntime>,
    pub(crate) services: Arc<dyn ServiceManager>,
    publisher: Arc<dyn Publisher>,
    pub(crate) reporter: ProgressReporter,
    pub(crate) schemas: DeploymentSchemas,
    pub(crate) http: reqwest::Client,
    pub(crate) options: EngineOptions,
    pub(crate) cancel: CancellationToken,
}

impl Engine {
    pub fn new(
        collaborators: Collaborators,
        schemas: DeploymentSchemas,
        options: EngineOptions,
        cancel: CancellationToken,
    ) -> Result<Self, AgentError> {
        let reporter = ProgressReporter::new(
            collaborators.publisher.clone(),
            Arc::new(TaskStatusStore::new()),
            options.reporter_interval,
            options.reporter_capacity,
        );
        let http = reqwest::Client::builder()
            .timeout(options.download_timeout)
            .build()?;

        Ok(Self {
            control_plane: collaborators.control_plane,
            images: collaborators.images,
            services: collaborators.services,
            publisher: collaborators.publisher,
            reporter,
            schemas,
            http,
            options,
            cancel,
        })
    }

    pub fn reporter(&self) -> &ProgressReporter {
        &self.reporter
    }

    /// Publish a message; failures are logged and dropped
    pub async fn notify(&self, message: &Value) {
        if let Err(e) = self.publisher.publish(message).await {
            error!("Failed to publish message: {}", e);
        }
    }

    /// Run the handler of a request and publish its terminal result
    pub async fn handle(&self, request: &Request) {
        let kind = request.kind;
        info!("Processing the request '{}'", kind);

        let outcome = self.execute(request).await;
        // the handler's reporters are stopped by now
        self.reporter.settle().await;

        let envelope = match outcome {
            Ok(Outcome::Completed(result)) => {
                info!("Completed the request '{}'", kind);
                Envelope::completed(&request.request_id, kind, result)
            }
            Ok(Outcome::Failed { reason, result }) => {
                error!(
                    "request: {}, request_id: {}, error: {}",
                    kind, request.request_id, reason
                );
                Envelope::failed(&request.request_id, kind, reason, result)
            }
            Err(e) => {
                error!(
                    "request: {}, request_id: {}, error: {}",
                    kind, request.request_id, e
                );
                Envelope::failed(&request.request_id, kind, e.reason(), None)
            }
        };

        self.notify(&envelope.to_value()).await;
    }

    async fn execute(&self, request: &Request) -> Result<Outcome, AgentError> {
        match request.kind {
            CommandKind::ImportImage => self.import_image(request).await,
            CommandKind::GetImportedImages => self.get_imported_images().await,
            CommandKind::DeployApp => self.deploy_app(request).await,
            CommandKind::StartApp => self.start_app(request).await,
            CommandKind::StopApp => self.stop_app(request).await,
            CommandKind::GetAppStatus => self.get_app_status(request).await,
            CommandKind::GetAppsAndResourcesStatus => self.get_apps_and_resources_status().await,
            CommandKind::GetAppStatusAndLogs => self.get_app_status_and_logs(request).await,
            CommandKind::UpdateApp => self.update_app(request).await,
            CommandKind::ScalePatchApp => self.scale_patch_app(request).await,
            CommandKind::ImagePatchApp => self.image_patch_app(request).await,
            CommandKind::DeleteApp => self.delete_app(request).await,
            CommandKind::DeleteImage => self.delete_image(request).await,
            CommandKind::DeleteAllAppsAndImages => self.delete_all_apps_and_images(request).await,
            CommandKind::GetSshPublicKey => self.get_ssh_public_key().await,
            CommandKind::StartReverseSshConnection => self.start_reverse_ssh_connection(request).await,
            CommandKind::StopReverseSshConnection => self.stop_reverse_ssh_connection().await,
        }
    }

    pub(crate) fn host_facts(&self) -> HostFacts {
        HostFacts::current()
    }

    /// Wait until `check` passes under `policy`, logging how the wait ended
    pub(crate) async fn converge<F, Fut>(&self, what: &str, policy: &PollPolicy, check: F) -> Convergence
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<bool, AgentError>>,
    {
        let outcome = await_condition(policy, &self.cancel, check).await;
        match outcome {
            Convergence::Converged { attempts } => {
                debug!("{} converged after {} checks", what, attempts)
            }
            Convergence::TimedOut => {
                warn!("{} did not converge within {:?}", what, policy.budget())
            }
            Convergence::Cancelled => warn!("{} wait cancelled", what),
        }
        outcome
    }

    /// Deployment exists and every desired replica is available and updated
    pub(crate) async fn is_rolled_out(&self, name: &str, namespace: &str) -> Result<bool, AgentError> {
        Ok(self
            .control_plane
            .get_deployment(name, namespace)
            .await?
            .is_some_and(|d| d.is_rolled_out()))
    }

    /// Pods match the replica target: none for 0, else exactly `replicas`
    /// pods all `Running`
    pub(crate) async fn pods_at_replicas(
        &self,
        name: &str,
        namespace: &str,
        replicas: i32,
    ) -> Result<bool, AgentError> {
        let Some(deployment) = self.control_plane.get_deployment(name, namespace).await? else {
            return Ok(false);
        };
        let pods = self
            .control_plane
            .list_pods(namespace, &deployment.match_labels)
            .await?;

        if replicas <= 0 {
            return Ok(pods.is_empty());
        }
        Ok(pods.len() == replicas as usize && pods.iter().all(|p| p.phase == "Running"))
    }

    /// Patch the replica count and wait for the pods to follow
    pub(crate) async fn scale(&self, name: &str, namespace: &str, replicas: i32) -> Result<Convergence, AgentError> {
        self.control_plane
            .patch_deployment(name, namespace, &json!({"spec": {"replicas": replicas}}))
            .await?;
        info!("Scaling {}/{} to {} replicas", namespace, name, replicas);

        let policy = self.options.rollout_poll;
        Ok(self
            .converge(&format!("scale of {}/{}", namespace, name), &policy, || {
                self.pods_at_replicas(name, namespace, replicas)
            })
            .await)
    }

    /// Deployment no longer found
    pub(crate) async fn is_deleted(&self, name: &str, namespace: &str) -> Result<bool, AgentError> {
        Ok(self.control_plane.get_deployment(name, namespace).await?.is_none())
    }
}
