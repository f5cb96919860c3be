//! Error types for the edge agent

use thiserror::Error;

/// Main error type for the edge agent
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("MQTT error: {0}")]
    MqttError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Rejection or failure reported by the cluster API
    #[error("Control plane error: status: {code}, reason: {reason}, message: {message}")]
    ControlPlane {
        code: u16,
        reason: String,
        message: String,
    },

    /// Transport-level failure talking to the cluster API (no status available)
    #[error("Cluster client error: {0}")]
    ClusterClient(String),

    /// External command (ctr, crictl, systemctl) failed
    #[error("Command error: {0}")]
    CommandError(String),

    #[error("Download error: {0}")]
    DownloadError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Text reported to the remote caller in the `reason` field of a `Failed` result.
    pub fn reason(&self) -> String {
        match self {
            AgentError::ControlPlane {
                code,
                reason,
                message,
            } => format!("status: {}, reason: {}, message: {}", code, reason, message),
            AgentError::ValidationError(msg)
            | AgentError::NotFound(msg)
            | AgentError::CommandError(msg)
            | AgentError::DownloadError(msg)
            | AgentError::ClusterClient(msg)
            | AgentError::Internal(msg) => msg.clone(),
            other => other.to_string(),
        }
    }

    /// Whether the error originated from the cluster API
    pub fn is_control_plane(&self) -> bool {
        matches!(self, AgentError::ControlPlane { .. } | AgentError::ClusterClient(_))
    }
}

impl From<kube::Error> for AgentError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(response) => AgentError::ControlPlane {
                code: response.code,
                reason: response.reason,
                message: response.message,
            },
            other => AgentError::ClusterClient(other.to_string()),
        }
    }
}
