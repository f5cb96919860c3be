//! Image archive handlers

use std::collections::HashSet;

use serde_json::json;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::errors::AgentError;
use crate::filesys::file::File;
use crate::k3s::client::DeploymentInfo;
use crate::orchestrator::engine::{Engine, Outcome};
use crate::orchestrator::request::Request;
use crate::orchestrator::response::labels;
use crate::utils::{generate_uuid, short_image_name};

/// Images referenced by the given deployments, full and short names
pub fn images_in_use(deployments: &[DeploymentInfo]) -> HashSet<String> {
    let mut images = HashSet::new();
    for container in deployments.iter().flat_map(|d| d.containers.iter()) {
        images.insert(container.image.clone());
        images.insert(short_image_name(&container.image).to_string());
    }
    images
}

impl Engine {
    pub(crate) async fn import_image(&self, request: &Request) -> Result<Outcome, AgentError> {
        let url = request.required_str("download_url")?;
        let auth_user = request.str_param("auth_user");
        let auth_password = request.str_param("auth_password");

        let progress = self
            .reporter
            .start(&request.request_id, request.kind, labels::DOWNLOADING);

        let archive = self.options.tmp_dir.file(&format!("{}.tar", generate_uuid()));
        let imported = async {
            self.download(url, auth_user, auth_password, &archive).await?;
            info!("Image file downloaded to {}", archive.path().display());

            progress.set_status(labels::IMPORTING);
            self.images.import_image(archive.path()).await
        }
        .await;

        if let Err(e) = archive.delete().await {
            warn!("Failed to remove {}: {}", archive.path().display(), e);
        }
        imported?;

        progress.stop();
        let images = self.images.list_images().await?;
        Ok(Outcome::Completed(Some(json!({ "images": images }))))
    }

    async fn download(
        &self,
        url: &str,
        user: Option<&str>,
        password: Option<&str>,
        destination: &File,
    ) -> Result<(), AgentError> {
        let mut builder = self.http.get(url);
        if let Some(user) = user {
            builder = builder.basic_auth(user, password);
        }

        let mut response = builder
            .send()
            .await
            .map_err(|e| AgentError::DownloadError(format!("failed to download the file, {}", e)))?;
        if response.status() != reqwest::StatusCode::OK {
            return Err(AgentError::DownloadError(format!(
                "failed to download the file, error code: {}",
                response.status().as_u16()
            )));
        }

        if let Some(parent) = destination.path().parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(destination.path()).await?;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| AgentError::DownloadError(format!("failed to download the file, {}", e)))?
        {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }

    pub(crate) async fn get_imported_images(&self) -> Result<Outcome, AgentError> {
        let images = self.images.list_images().await?;
        Ok(Outcome::Completed(Some(json!({ "images": images }))))
    }

    pub(crate) async fn delete_image(&self, request: &Request) -> Result<Outcome, AgentError> {
        let image = request.required_str("image")?;
        let force = request.bool_param("force", false);

        if !force {
            info!("delete_image, checking whether any apps use {}", image);
            let deployments = self.control_plane.list_deployments().await?;
            let in_use = images_in_use(&deployments);
            if in_use.contains(image) || in_use.contains(short_image_name(image)) {
                return Err(AgentError::ValidationError(
                    "The specified image is in use!".to_string(),
                ));
            }
        }

        self.images.remove_image(image).await?;
        Ok(Outcome::Completed(None))
    }
}
