//! Inbound command envelope

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::errors::AgentError;

pub const DEFAULT_NAMESPACE: &str = "default";

/// Closed set of commands the agent accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    ImportImage,
    GetImportedImages,
    DeployApp,
    StartApp,
    StopApp,
    GetAppStatus,
    GetAppsAndResourcesStatus,
    GetAppStatusAndLogs,
    UpdateApp,
    ScalePatchApp,
    ImagePatchApp,
    DeleteApp,
    DeleteImage,
    DeleteAllAppsAndImages,
    GetSshPublicKey,
    StartReverseSshConnection,
    StopReverseSshConnection,
}

impl CommandKind {
    pub const ALL: [CommandKind; 17] = [
        CommandKind::ImportImage,
        CommandKind::GetImportedImages,
        CommandKind::DeployApp,
        CommandKind::StartApp,
        CommandKind::StopApp,
        CommandKind::GetAppStatus,
        CommandKind::GetAppsAndResourcesStatus,
        CommandKind::GetAppStatusAndLogs,
        CommandKind::UpdateApp,
        CommandKind::ScalePatchApp,
        CommandKind::ImagePatchApp,
        CommandKind::DeleteApp,
        CommandKind::DeleteImage,
        CommandKind::DeleteAllAppsAndImages,
        CommandKind::GetSshPublicKey,
        CommandKind::StartReverseSshConnection,
        CommandKind::StopReverseSshConnection,
    ];

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::ImportImage => "import_image",
            CommandKind::GetImportedImages => "get_imported_images",
            CommandKind::DeployApp => "deploy_app",
            CommandKind::StartApp => "start_app",
            CommandKind::StopApp => "stop_app",
            CommandKind::GetAppStatus => "get_app_status",
            CommandKind::GetAppsAndResourcesStatus => "get_apps_and_resources_status",
            CommandKind::GetAppStatusAndLogs => "get_app_status_and_logs",
            CommandKind::UpdateApp => "update_app",
            CommandKind::ScalePatchApp => "scale_patch_app",
            CommandKind::ImagePatchApp => "image_patch_app",
            CommandKind::DeleteApp => "delete_app",
            CommandKind::DeleteImage => "delete_image",
            CommandKind::DeleteAllAppsAndImages => "delete_all_apps_and_images",
            CommandKind::GetSshPublicKey => "get_ssh_public_key",
            CommandKind::StartReverseSshConnection => "start_reverse_ssh_connection",
            CommandKind::StopReverseSshConnection => "stop_reverse_ssh_connection",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CommandKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// Reasons an inbound payload never reaches a handler
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("request_id is not specified")]
    MissingRequestId,

    #[error("unknown command: {0}")]
    UnknownCommand(String),
}

/// A decoded command. Immutable once received.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub request_id: String,
    pub kind: CommandKind,
    params: Map<String, Value>,
}

impl Request {
    pub fn new(request_id: impl Into<String>, kind: CommandKind, params: Map<String, Value>) -> Self {
        Self {
            request_id: request_id.into(),
            kind,
            params,
        }
    }

    /// Decode an inbound envelope. The correlation id is checked before the
    /// command kind.
    pub fn parse(payload: Value) -> Result<Self, ParseError> {
        let Value::Object(mut params) = payload else {
            return Err(ParseError::NotAnObject);
        };

        let request_id = match params.remove("request_id") {
            Some(Value::String(id)) if !id.is_empty() => id,
            Some(Value::Number(id)) => id.to_string(),
            _ => return Err(ParseError::MissingRequestId),
        };

        let kind = match params.remove("request") {
            Some(Value::String(name)) => name
                .parse::<CommandKind>()
                .map_err(ParseError::UnknownCommand)?,
            Some(other) => return Err(ParseError::UnknownCommand(other.to_string())),
            None => return Err(ParseError::UnknownCommand(String::new())),
        };

        Ok(Self::new(request_id, kind, params))
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key).filter(|v| !v.is_null())
    }

    pub fn str_param(&self, key: &str) -> Option<&str> {
        self.param(key).and_then(Value::as_str)
    }

    /// A string parameter that must be present and non-empty
    pub fn required_str(&self, key: &str) -> Result<&str, AgentError> {
        self.str_param(key)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AgentError::ValidationError(format!("{} is not specified in the request", key)))
    }

    /// Integer parameter; floats, strings and booleans do not count
    pub fn int_param(&self, key: &str) -> Option<i64> {
        self.param(key).and_then(Value::as_i64)
    }

    pub fn bool_param(&self, key: &str, default: bool) -> bool {
        self.param(key).and_then(Value::as_bool).unwrap_or(default)
    }

    /// Target namespace, `default` when absent
    pub fn namespace(&self) -> &str {
        self.str_param("namespace")
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_NAMESPACE)
    }
}
