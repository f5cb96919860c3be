//! Reverse ssh tunnel control
//!
//! The tunnel itself runs as a supervised service that reads its connection
//! parameters from an env file and logs the port the ssh server allocated.

pub mod service;

use std::time::Duration;

use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::errors::AgentError;
use crate::filesys::file::File;

pub use service::{ServiceManager, SystemctlServiceManager};

/// Port the tunnel forwards to on the device
pub const LOCAL_SSH_PORT: u16 = 22;

/// Paths and timing of the tunnel service
#[derive(Debug, Clone)]
pub struct TunnelOptions {
    pub service_name: String,
    pub params_file: File,
    pub log_file: File,
    pub public_key_file: File,
    pub poll_interval: Duration,
    pub poll_attempts: u32,
}

/// Connection parameters written for the tunnel service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelParams {
    pub ssh_host: String,
    pub ssh_port: u16,
    pub ssh_user: String,
    /// 0 lets the server pick the port
    pub remote_port: u16,
}

impl TunnelParams {
    /// `KEY=value` lines read by the service
    pub fn to_env(&self) -> String {
        format!(
            "SSH_HOST={}\nSSH_PORT={}\nSSH_USER={}\nREMOTE_PORT={}\nLOCAL_PORT={}\n",
            self.ssh_host, self.ssh_port, self.ssh_user, self.remote_port, LOCAL_SSH_PORT
        )
    }
}

/// Port reported by an `Allocated port N` line in the tunnel log
pub fn find_allocated_port(log: &str) -> Option<u16> {
    let re = Regex::new(r"Allocated port (\d+)").ok()?;
    re.captures(log)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Write the parameters, restart the service and wait for the allocated port
pub async fn start_tunnel(
    services: &dyn ServiceManager,
    options: &TunnelOptions,
    params: &TunnelParams,
    cancel: &CancellationToken,
) -> Result<u16, AgentError> {
    options.params_file.write_string(&params.to_env()).await?;
    options.log_file.truncate().await?;
    services.restart(&options.service_name).await?;
    info!(
        "Restarted {} for {}@{}:{}",
        options.service_name, params.ssh_user, params.ssh_host, params.ssh_port
    );

    let mut log = String::new();
    for attempt in 1..=options.poll_attempts {
        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(AgentError::Internal("reverse ssh connection cancelled".to_string()));
            }
            _ = tokio::time::sleep(options.poll_interval) => {}
        }

        log = match options.log_file.read_string().await {
            Ok(log) => log,
            Err(e) => {
                debug!("Tunnel log not readable on attempt {}: {}", attempt, e);
                continue;
            }
        };
        if let Some(port) = find_allocated_port(&log) {
            info!("Reverse ssh tunnel allocated port {}", port);
            return Ok(port);
        }
    }

    let log = log.trim();
    Err(AgentError::CommandError(if log.is_empty() {
        "reverse ssh connection did not report an allocated port".to_string()
    } else {
        log.to_string()
    }))
}

pub async fn stop_tunnel(services: &dyn ServiceManager, options: &TunnelOptions) -> Result<(), AgentError> {
    services.stop(&options.service_name).await
}

/// Public key the remote side must authorize
pub async fn read_public_key(options: &TunnelOptions) -> Result<String, AgentError> {
    if !options.public_key_file.exists().await {
        return Err(AgentError::NotFound(format!(
            "ssh public key not found at {}",
            options.public_key_file.path().display()
        )));
    }
    Ok(options.public_key_file.read_string().await?.trim().to_string())
}
