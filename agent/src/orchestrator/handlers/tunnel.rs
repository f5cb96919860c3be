//! Reverse ssh tunnel handlers

use serde_json::json;

use crate::errors::AgentError;
use crate::orchestrator::engine::{Engine, Outcome};
use crate::orchestrator::request::Request;
use crate::orchestrator::response::labels;
use crate::tunnel::{read_public_key, start_tunnel, stop_tunnel, TunnelParams, LOCAL_SSH_PORT};

fn port_param(request: &Request, key: &str, default: u16) -> Result<u16, AgentError> {
    match request.param(key) {
        None => Ok(default),
        Some(_) => request
            .int_param(key)
            .and_then(|port| u16::try_from(port).ok())
            .ok_or_else(|| AgentError::ValidationError(format!("{} is not a valid port", key))),
    }
}

/// Tunnel parameters from a request
pub fn tunnel_params(request: &Request) -> Result<TunnelParams, AgentError> {
    Ok(TunnelParams {
        ssh_host: request.required_str("ssh_host")?.to_string(),
        ssh_user: request.required_str("ssh_user")?.to_string(),
        ssh_port: port_param(request, "ssh_port", LOCAL_SSH_PORT)?,
        remote_port: port_param(request, "remote_port", 0)?,
    })
}

impl Engine {
    pub(crate) async fn get_ssh_public_key(&self) -> Result<Outcome, AgentError> {
        let public_key = read_public_key(&self.options.tunnel).await?;
        Ok(Outcome::Completed(Some(json!({ "public_key": public_key }))))
    }

    pub(crate) async fn start_reverse_ssh_connection(&self, request: &Request) -> Result<Outcome, AgentError> {
        let params = tunnel_params(request)?;

        let progress = self
            .reporter
            .start(&request.request_id, request.kind, labels::CONNECTING);
        let allocated_port = start_tunnel(
            self.services.as_ref(),
            &self.options.tunnel,
            &params,
            &self.cancel,
        )
        .await?;
        progress.stop();

        Ok(Outcome::Completed(Some(json!({ "allocated_port": allocated_port }))))
    }

    pub(crate) async fn stop_reverse_ssh_connection(&self) -> Result<Outcome, AgentError> {
        stop_tunnel(self.services.as_ref(), &self.options.tunnel).await?;
        Ok(Outcome::Completed(None))
    }
}
