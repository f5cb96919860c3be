//! Storage layout configuration

use std::path::PathBuf;

use crate::errors::AgentError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Environment variable pointing at the agent home directory
pub const HOME_ENV_VAR: &str = "K3S_EDGE_HOME";

const DEFAULT_HOME: &str = "/etc/k3s-edge";

/// Storage layout for the agent
///
/// ```text
/// <home>/config/settings.json
/// <home>/deployment/create_deployment_schema.json
/// <home>/deployment/update_deployment_schema.json
/// <home>/tmp/        downloaded image archives
/// <home>/logs/       rolling agent logs
/// <home>/tunnel/     reverse ssh parameters and log
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Layout rooted at `$K3S_EDGE_HOME`, or the default home directory
    pub fn from_env() -> Self {
        match std::env::var_os(HOME_ENV_VAR) {
            Some(dir) if !dir.is_empty() => Self::new(dir),
            _ => Self::default(),
        }
    }

    pub fn config_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("config"))
    }

    /// Get the settings file path
    pub fn settings_file(&self) -> File {
        self.config_dir().file("settings.json")
    }

    pub fn deployment_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("deployment"))
    }

    /// JSON schema for `deploy_app` definitions
    pub fn create_schema_file(&self) -> File {
        self.deployment_dir().file("create_deployment_schema.json")
    }

    /// JSON schema for `update_app` definitions
    pub fn update_schema_file(&self) -> File {
        self.deployment_dir().file("update_deployment_schema.json")
    }

    /// Scratch directory for downloaded image archives
    pub fn tmp_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("tmp"))
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    pub fn tunnel_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("tunnel"))
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), AgentError> {
        self.config_dir().create().await?;
        self.deployment_dir().create().await?;
        self.tmp_dir().create().await?;
        self.logs_dir().create().await?;
        self.tunnel_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self::new(DEFAULT_HOME)
    }
}
