//! App lifecycle handlers

use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::errors::AgentError;
use crate::k3s::app::{list_apps, read_app, read_app_with_logs};
use crate::k3s::health::AppStatus;
use crate::orchestrator::engine::{Engine, Outcome};
use crate::orchestrator::request::{Request, DEFAULT_NAMESPACE};
use crate::orchestrator::response::labels;
use crate::utils::short_image_name;

const DEFAULT_TAIL_LINES: i64 = 50;

/// Name and namespace from a deployment definition's metadata
fn definition_target(definition: &Value) -> Result<(String, String), AgentError> {
    let metadata = definition.get("metadata");
    let name = metadata
        .and_then(|m| m.get("name"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AgentError::ValidationError("metadata.name is not specified in the deployment definition".to_string()))?;
    let namespace = metadata
        .and_then(|m| m.get("namespace"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_NAMESPACE);
    Ok((name.to_string(), namespace.to_string()))
}

fn deployment_definition(request: &Request) -> Result<&Value, AgentError> {
    request
        .param("deployment_definition")
        .filter(|v| v.is_object())
        .ok_or_else(|| {
            AgentError::ValidationError("deployment_definition is not specified in the request!".to_string())
        })
}

/// Images of containers with `imagePullPolicy: Never`
fn never_pulled_images(definition: &Value) -> Vec<String> {
    definition
        .pointer("/spec/template/spec/containers")
        .and_then(Value::as_array)
        .map(|containers| {
            containers
                .iter()
                .filter(|c| c.get("imagePullPolicy").and_then(Value::as_str) == Some("Never"))
                .filter_map(|c| c.get("image").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Remove the fields the cluster refuses to change on an existing deployment
pub fn strip_immutable_fields(spec: &mut Value) {
    if let Some(spec) = spec.as_object_mut() {
        spec.remove("selector");
        if let Some(template) = spec.get_mut("template").and_then(Value::as_object_mut) {
            template.remove("metadata");
        }
    }
}

/// Strategic merge patch replacing one container's image
pub fn image_patch(container_name: &str, new_image: &str, pull_policy: Option<&str>) -> Value {
    let mut container = Map::new();
    container.insert("name".to_string(), json!(container_name));
    container.insert("image".to_string(), json!(new_image));
    if let Some(policy) = pull_policy {
        container.insert("imagePullPolicy".to_string(), json!(policy));
    }
    json!({"spec": {"template": {"spec": {"containers": [container]}}}})
}

impl Engine {
    pub(crate) async fn deploy_app(&self, request: &Request) -> Result<Outcome, AgentError> {
        let definition = deployment_definition(request)?;
        self.schemas.validate_create(definition)?;
        let (name, namespace) = definition_target(definition)?;

        let local_images = never_pulled_images(definition);
        if !local_images.is_empty() {
            let imported = self.images.list_images().await?;
            let missing = local_images
                .iter()
                .any(|image| !imported.iter().any(|i| i == image || i == short_image_name(image)));
            if missing {
                return Err(AgentError::ValidationError(
                    "image(s) specified in the deployment definition is not found in the system!".to_string(),
                ));
            }
        }

        let progress = self
            .reporter
            .start(&request.request_id, request.kind, labels::DEPLOYING);

        if namespace != DEFAULT_NAMESPACE {
            self.control_plane.ensure_namespace(&namespace).await?;
        }
        self.control_plane.create_deployment(&namespace, definition).await?;
        info!("Created deployment {}/{}", namespace, name);

        let policy = self.options.rollout_poll;
        self.converge(&format!("deployment of {}/{}", namespace, name), &policy, || {
            self.is_rolled_out(&name, &namespace)
        })
        .await;

        progress.stop();
        let app = read_app(self.control_plane.as_ref(), &name, &namespace, &self.host_facts())
            .await?
            .ok_or_else(|| AgentError::NotFound("deployed app not found in the system".to_string()))?;
        Ok(Outcome::health_gated(&app))
    }

    pub(crate) async fn start_app(&self, request: &Request) -> Result<Outcome, AgentError> {
        let name = request.required_str("app_name")?;
        let replicas = request
            .int_param("replicas")
            .filter(|r| *r > 0 && *r <= i32::MAX as i64)
            .ok_or_else(|| AgentError::ValidationError("replicas is not specified/valid in the request".to_string()))?
            as i32;
        let namespace = request.namespace();

        let progress = self
            .reporter
            .start(&request.request_id, request.kind, labels::STARTING);

        let app = read_app(self.control_plane.as_ref(), name, namespace, &self.host_facts())
            .await?
            .ok_or_else(|| AgentError::NotFound("application not found in the system".to_string()))?;
        if app.status == AppStatus::Stopped {
            self.scale(name, namespace, replicas).await?;
        } else {
            debug!("{}/{} is {}, not scaling", namespace, name, app.status);
        }

        progress.stop();
        let app = read_app(self.control_plane.as_ref(), name, namespace, &self.host_facts())
            .await?
            .ok_or_else(|| AgentError::NotFound("application not found in the system".to_string()))?;
        Ok(Outcome::health_gated(&app))
    }

    pub(crate) async fn stop_app(&self, request: &Request) -> Result<Outcome, AgentError> {
        let name = request.required_str("app_name")?;
        let namespace = request.namespace();

        let app = read_app(self.control_plane.as_ref(), name, namespace, &self.host_facts())
            .await?
            .ok_or_else(|| AgentError::NotFound("The specified app is not found".to_string()))?;

        if app.status != AppStatus::Stopped {
            let progress = self
                .reporter
                .start(&request.request_id, request.kind, labels::STOPPING);
            self.scale(name, namespace, 0).await?;
            progress.stop();
        }

        let app = read_app(self.control_plane.as_ref(), name, namespace, &self.host_facts())
            .await?
            .ok_or_else(|| AgentError::NotFound("The specified app is not found".to_string()))?;
        Ok(Outcome::Completed(Some(app.to_value())))
    }

    pub(crate) async fn get_app_status(&self, request: &Request) -> Result<Outcome, AgentError> {
        let name = request.required_str("app_name")?;
        let namespace = request.namespace();

        match read_app(self.control_plane.as_ref(), name, namespace, &self.host_facts()).await? {
            Some(app) => Ok(Outcome::Completed(Some(app.to_value()))),
            None => Err(AgentError::NotFound("specified app not found in the system".to_string())),
        }
    }

    pub(crate) async fn get_app_status_and_logs(&self, request: &Request) -> Result<Outcome, AgentError> {
        let name = request.required_str("app_name")?;
        let namespace = request.namespace();
        let tail_lines = request
            .int_param("tail_n_lines")
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_TAIL_LINES);
        let previous = request.bool_param("previous_logs", false);

        let app = read_app_with_logs(
            self.control_plane.as_ref(),
            name,
            namespace,
            tail_lines,
            previous,
            &self.host_facts(),
        )
        .await?;
        Ok(Outcome::Completed(Some(app.to_value())))
    }

    pub(crate) async fn update_app(&self, request: &Request) -> Result<Outcome, AgentError> {
        let definition = deployment_definition(request)?;
        self.schemas.validate_update(definition)?;
        let (name, namespace) = definition_target(definition)?;

        if self.control_plane.get_deployment(&name, &namespace).await?.is_none() {
            return Err(AgentError::NotFound("deployment not found!".to_string()));
        }

        let mut spec = definition.get("spec").cloned().unwrap_or_else(|| json!({}));
        strip_immutable_fields(&mut spec);

        let progress = self
            .reporter
            .start(&request.request_id, request.kind, labels::UPDATING);

        self.control_plane
            .patch_deployment(&name, &namespace, &json!({ "spec": spec }))
            .await?;
        info!("Patched deployment {}/{}", namespace, name);

        let policy = self.options.rollout_poll;
        self.converge(&format!("update of {}/{}", namespace, name), &policy, || {
            self.is_rolled_out(&name, &namespace)
        })
        .await;

        progress.stop();
        let app = read_app(self.control_plane.as_ref(), &name, &namespace, &self.host_facts())
            .await?
            .ok_or_else(|| AgentError::NotFound("deployment not found!".to_string()))?;
        Ok(Outcome::health_gated(&app))
    }

    /// App state after a patch; read failures give an empty object
    async fn best_effort_app(&self, name: &str, namespace: &str) -> Value {
        match read_app(self.control_plane.as_ref(), name, namespace, &self.host_facts()).await {
            Ok(Some(app)) => app.to_value(),
            Ok(None) => json!({}),
            Err(e) => {
                warn!("Status read-back of {}/{} failed: {}", namespace, name, e);
                json!({})
            }
        }
    }

    pub(crate) async fn scale_patch_app(&self, request: &Request) -> Result<Outcome, AgentError> {
        let name = request.required_str("app_name")?;
        let replicas = request
            .int_param("replicas")
            .filter(|r| *r >= 0 && *r <= i32::MAX as i64)
            .ok_or_else(|| {
                AgentError::ValidationError("replicas is not specified or incorrect value is specified".to_string())
            })? as i32;
        let namespace = request.namespace();

        let progress = self
            .reporter
            .start(&request.request_id, request.kind, labels::PATCHING);
        self.scale(name, namespace, replicas).await?;
        let app = self.best_effort_app(name, namespace).await;
        progress.stop();

        Ok(Outcome::Completed(Some(app)))
    }

    pub(crate) async fn image_patch_app(&self, request: &Request) -> Result<Outcome, AgentError> {
        let (name, container_name, new_image) = match (
            request.str_param("app_name"),
            request.str_param("container_name"),
            request.str_param("new_image"),
        ) {
            (Some(name), Some(container), Some(image)) if !name.is_empty() && !container.is_empty() && !image.is_empty() => {
                (name, container, image)
            }
            _ => {
                return Err(AgentError::ValidationError(
                    "app_name/container_name/new_image is/are not specified!".to_string(),
                ))
            }
        };
        let namespace = request.namespace();

        let progress = self
            .reporter
            .start(&request.request_id, request.kind, labels::PATCHING);

        let pull_policy = match request.str_param("image_pull_policy") {
            Some(policy) => Some(policy.to_string()),
            None => self
                .control_plane
                .get_deployment(name, namespace)
                .await?
                .and_then(|d| {
                    d.containers
                        .into_iter()
                        .find(|c| c.name == container_name)
                        .and_then(|c| c.image_pull_policy)
                }),
        };

        self.control_plane
            .patch_deployment(
                name,
                namespace,
                &image_patch(container_name, new_image, pull_policy.as_deref()),
            )
            .await?;
        info!("Patched {}/{} container {} to {}", namespace, name, container_name, new_image);

        let policy = self.options.rollout_poll;
        self.converge(&format!("image patch of {}/{}", namespace, name), &policy, || {
            self.runs_image(name, namespace, container_name, new_image)
        })
        .await;

        let app = self.best_effort_app(name, namespace).await;
        progress.stop();
        Ok(Outcome::Completed(Some(app)))
    }

    /// Every pod's `container_name` container runs `image`
    async fn runs_image(
        &self,
        name: &str,
        namespace: &str,
        container_name: &str,
        image: &str,
    ) -> Result<bool, AgentError> {
        let Some(deployment) = self.control_plane.get_deployment(name, namespace).await? else {
            return Ok(false);
        };
        let pods = self
            .control_plane
            .list_pods(namespace, &deployment.match_labels)
            .await?;
        Ok(pods
            .iter()
            .flat_map(|p| p.containers.iter())
            .filter(|c| c.name == container_name)
            .all(|c| c.image == image))
    }

    pub(crate) async fn delete_app(&self, request: &Request) -> Result<Outcome, AgentError> {
        let name = request.required_str("app_name")?;
        let namespace = request.namespace();

        self.remove_app(name, namespace).await?;
        Ok(Outcome::Completed(None))
    }

    /// Delete a deployment and wait until it is gone
    pub(crate) async fn remove_app(&self, name: &str, namespace: &str) -> Result<(), AgentError> {
        self.control_plane.delete_deployment(name, namespace).await?;
        info!("Deleted deployment {}/{}", namespace, name);

        let policy = self.options.delete_poll;
        self.converge(&format!("deletion of {}/{}", namespace, name), &policy, || {
            self.is_deleted(name, namespace)
        })
        .await;
        Ok(())
    }

    pub(crate) async fn list_user_apps(&self) -> Result<Vec<crate::k3s::app::App>, AgentError> {
        list_apps(
            self.control_plane.as_ref(),
            &self.options.system_namespace,
            &self.host_facts(),
        )
        .await
    }
}
