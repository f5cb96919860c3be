//! OS service supervision

use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

use crate::errors::AgentError;

/// Start and stop externally supervised services
#[async_trait]
pub trait ServiceManager: Send + Sync {
    async fn restart(&self, service: &str) -> Result<(), AgentError>;

    async fn stop(&self, service: &str) -> Result<(), AgentError>;
}

/// `ServiceManager` on systemd
#[derive(Debug, Clone)]
pub struct SystemctlServiceManager {
    use_sudo: bool,
}

impl SystemctlServiceManager {
    pub fn new(use_sudo: bool) -> Self {
        Self { use_sudo }
    }

    async fn systemctl(&self, action: &str, service: &str) -> Result<(), AgentError> {
        let mut cmd = if self.use_sudo {
            let mut cmd = Command::new("sudo");
            cmd.arg("systemctl");
            cmd
        } else {
            Command::new("systemctl")
        };

        let output = cmd
            .args([action, service])
            .output()
            .await
            .map_err(|e| AgentError::CommandError(format!("Failed to run systemctl: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AgentError::CommandError(format!(
                "systemctl {} {} failed: {}",
                action,
                service,
                stderr.trim()
            )));
        }

        info!("systemctl {} {}", action, service);
        Ok(())
    }
}

#[async_trait]
impl ServiceManager for SystemctlServiceManager {
    async fn restart(&self, service: &str) -> Result<(), AgentError> {
        self.systemctl("restart", service).await
    }

    async fn stop(&self, service: &str) -> Result<(), AgentError> {
        self.systemctl("stop", service).await
    }
}
