//! Settings file management

use std::sync::Arc;

use secrecy::SecretString;
use serde::Deserialize;

use crate::logs::LogLevel;
use crate::storage::layout::StorageLayout;

/// Agent settings, read from `<home>/config/settings.json`
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON formatted logs on stdout
    #[serde(default)]
    pub json_logs: bool,

    /// Interval of the unsolicited apps and resources broadcast
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// MQTT broker configuration
    #[serde(default)]
    pub mqtt_broker: MqttBrokerSettings,

    /// Local cluster configuration
    #[serde(default)]
    pub k3s: K3sSettings,

    /// Reverse ssh tunnel configuration
    #[serde(default)]
    pub tunnel: TunnelSettings,

    /// Progress reporting configuration
    #[serde(default)]
    pub reporter: ReporterSettings,
}

fn default_true() -> bool {
    true
}

fn default_heartbeat_interval() -> u64 {
    60
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            json_logs: false,
            heartbeat_interval_secs: default_heartbeat_interval(),
            mqtt_broker: MqttBrokerSettings::default(),
            k3s: K3sSettings::default(),
            tunnel: TunnelSettings::default(),
            reporter: ReporterSettings::default(),
        }
    }
}

impl Settings {
    /// Fill paths left empty in the settings file from the storage layout
    pub fn resolve_paths(&mut self, layout: &StorageLayout) {
        let tunnel_dir = layout.tunnel_dir();
        if self.tunnel.params_file.is_empty() {
            self.tunnel.params_file = tunnel_dir.file("tunnel.env").path().display().to_string();
        }
        if self.tunnel.log_file.is_empty() {
            self.tunnel.log_file = tunnel_dir.file("tunnel.log").path().display().to_string();
        }
    }
}

/// Broker transport protocol
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MqttProtocol {
    #[default]
    Mqtt,
    Mqtts,
}

/// MQTT broker settings
#[derive(Debug, Clone, Deserialize)]
pub struct MqttBrokerSettings {
    /// Broker host
    #[serde(default)]
    pub host: String,

    /// Broker port
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// Plain TCP or TLS
    #[serde(default)]
    pub protocol: MqttProtocol,

    /// Broker user, also the first topic segment
    #[serde(default)]
    pub user: String,

    /// Broker password
    #[serde(default)]
    pub password: Option<Arc<SecretString>>,

    /// Device key, the second topic segment
    #[serde(default)]
    pub device_key: String,

    /// Optional path to a PEM-encoded CA certificate for broker TLS verification.
    /// When absent, the system certificate store is used.
    #[serde(default)]
    pub ca_cert_path: Option<String>,
}

fn default_mqtt_port() -> u16 {
    1883
}

impl Default for MqttBrokerSettings {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_mqtt_port(),
            protocol: MqttProtocol::Mqtt,
            user: String::new(),
            password: None,
            device_key: String::new(),
            ca_cert_path: None,
        }
    }
}

/// Local k3s cluster settings
#[derive(Debug, Clone, Deserialize)]
pub struct K3sSettings {
    /// Kubeconfig written by the k3s installer
    #[serde(default = "default_kubeconfig")]
    pub kubeconfig: String,

    /// Namespace excluded from listings and bulk deletion
    #[serde(default = "default_system_namespace")]
    pub system_namespace: String,

    /// Prefix runtime CLI invocations with sudo
    #[serde(default = "default_true")]
    pub use_sudo: bool,
}

fn default_kubeconfig() -> String {
    "/etc/rancher/k3s/k3s.yaml".to_string()
}

fn default_system_namespace() -> String {
    "kube-system".to_string()
}

impl Default for K3sSettings {
    fn default() -> Self {
        Self {
            kubeconfig: default_kubeconfig(),
            system_namespace: default_system_namespace(),
            use_sudo: true,
        }
    }
}

/// Reverse ssh tunnel settings
#[derive(Debug, Clone, Deserialize)]
pub struct TunnelSettings {
    /// Supervised service that runs the tunnel
    #[serde(default = "default_tunnel_service")]
    pub service_name: String,

    /// Connection parameters read by the service; defaults under `<home>/tunnel`
    #[serde(default)]
    pub params_file: String,

    /// Log written by the service; defaults under `<home>/tunnel`
    #[serde(default)]
    pub log_file: String,

    /// Public key handed out by `get_ssh_public_key`
    #[serde(default = "default_public_key_file")]
    pub public_key_file: String,
}

fn default_tunnel_service() -> String {
    "reverse-ssh-tunnel".to_string()
}

fn default_public_key_file() -> String {
    "/root/.ssh/id_rsa.pub".to_string()
}

impl Default for TunnelSettings {
    fn default() -> Self {
        Self {
            service_name: default_tunnel_service(),
            params_file: String::new(),
            log_file: String::new(),
            public_key_file: default_public_key_file(),
        }
    }
}

/// Progress reporting settings
#[derive(Debug, Clone, Deserialize)]
pub struct ReporterSettings {
    /// Interval between two progress messages of one request
    #[serde(default = "default_reporter_interval")]
    pub interval_secs: u64,

    /// Reporters running at once; further requests wait for a slot
    #[serde(default = "default_reporter_capacity")]
    pub max_concurrent: usize,
}

fn default_reporter_interval() -> u64 {
    2
}

fn default_reporter_capacity() -> usize {
    10
}

impl Default for ReporterSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_reporter_interval(),
            max_concurrent: default_reporter_capacity(),
        }
    }
}
