//! Outbound envelopes

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::orchestrator::request::CommandKind;

pub const COMPLETED: &str = "Completed";
pub const FAILED: &str = "Failed";

/// Progress labels published while a request is in flight
pub mod labels {
    pub const DOWNLOADING: &str = "Downloading";
    pub const IMPORTING: &str = "Importing";
    pub const DEPLOYING: &str = "Deploying";
    pub const STARTING: &str = "Starting";
    pub const STOPPING: &str = "Stopping";
    pub const UPDATING: &str = "Updating";
    pub const PATCHING: &str = "Patching";
    pub const DELETING: &str = "Deleting";
    pub const CONNECTING: &str = "Connecting";
}

/// Result or progress message correlated to a request.
///
/// Any `status` other than `Completed` or `Failed` is an interim progress
/// label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub request_id: String,
    pub request: CommandKind,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Envelope {
    pub fn completed(request_id: &str, request: CommandKind, result: Option<Value>) -> Self {
        Self {
            request_id: request_id.to_string(),
            request,
            status: COMPLETED.to_string(),
            result,
            reason: None,
        }
    }

    pub fn failed(
        request_id: &str,
        request: CommandKind,
        reason: impl Into<String>,
        result: Option<Value>,
    ) -> Self {
        Self {
            request_id: request_id.to_string(),
            request,
            status: FAILED.to_string(),
            result,
            reason: Some(reason.into()),
        }
    }

    pub fn progress(request_id: &str, request: CommandKind, label: &str) -> Self {
        Self {
            request_id: request_id.to_string(),
            request,
            status: label.to_string(),
            result: None,
            reason: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status == COMPLETED || self.status == FAILED
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Unsolicited apps and resources broadcast
pub fn status_update(status: Value) -> Value {
    json!({
        "status_update": "apps_and_resources_status",
        "status": status,
    })
}
