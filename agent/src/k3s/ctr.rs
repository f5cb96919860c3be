//! Image store access through the k3s runtime CLIs

use std::path::Path;
use std::process::Output;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tracing::{debug, info};

use crate::errors::AgentError;
use crate::k3s::client::ImageRuntime;
use crate::utils::short_image_name;

/// `ImageRuntime` driving `k3s ctr` and `crictl`
#[derive(Debug, Clone)]
pub struct CtrImageRuntime {
    use_sudo: bool,
}

impl CtrImageRuntime {
    pub fn new(use_sudo: bool) -> Self {
        Self { use_sudo }
    }

    fn command(&self, program: &str, args: &[&str]) -> Command {
        let mut cmd = if self.use_sudo {
            let mut cmd = Command::new("sudo");
            cmd.arg(program);
            cmd
        } else {
            Command::new(program)
        };
        cmd.args(args);
        cmd
    }

    async fn run(&self, program: &str, args: &[&str]) -> Result<Output, AgentError> {
        debug!("Running {} {}", program, args.join(" "));
        let output = self
            .command(program, args)
            .output()
            .await
            .map_err(|e| AgentError::CommandError(format!("Failed to run {}: {}", program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AgentError::CommandError(command_error_message(&stderr)));
        }
        Ok(output)
    }
}

#[async_trait]
impl ImageRuntime for CtrImageRuntime {
    async fn import_image(&self, archive: &Path) -> Result<(), AgentError> {
        let archive = archive.display().to_string();
        self.run("k3s", &["ctr", "images", "import", &archive]).await?;
        info!("Imported image archive {}", archive);
        Ok(())
    }

    async fn list_images(&self) -> Result<Vec<String>, AgentError> {
        let output = self.run("k3s", &["ctr", "images", "list", "-q"]).await?;
        Ok(parse_image_list(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn remove_image(&self, image: &str) -> Result<(), AgentError> {
        self.run("crictl", &["rmi", image]).await?;
        info!("Removed image {}", image);
        Ok(())
    }
}

/// User images from `ctr images list -q` output, as short names
pub fn parse_image_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.starts_with("docker.io/rancher") && !line.starts_with("sha"))
        .map(|line| short_image_name(line).to_string())
        .collect()
}

/// The `msg="..."` fragment of a containerd log line, else the whole stderr
pub fn command_error_message(stderr: &str) -> String {
    let msg = Regex::new(r#"msg="([^"]+)""#)
        .ok()
        .and_then(|re| re.captures(stderr))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string());
    msg.unwrap_or_else(|| stderr.trim().to_string())
}
