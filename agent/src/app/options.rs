//! Application configuration options

use std::time::Duration;

use crate::filesys::file::File;
use crate::k3s::poller::PollPolicy;
use crate::orchestrator::EngineOptions;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::{MqttBrokerSettings, Settings};
use crate::tunnel::TunnelOptions;
use crate::workers::{heartbeat, mqtt};

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Home directory layout
    pub layout: StorageLayout,

    /// Broker connection
    pub mqtt_broker: MqttBrokerSettings,

    /// Kubeconfig of the local cluster
    pub kubeconfig: String,

    /// Prefix runtime and service CLIs with sudo
    pub use_sudo: bool,

    /// Command engine tunables
    pub engine: EngineOptions,

    /// MQTT worker options
    pub mqtt_worker: mqtt::Options,

    /// Heartbeat worker options
    pub heartbeat: heartbeat::Options,
}

impl AppOptions {
    pub fn from_settings(settings: &Settings, layout: &StorageLayout) -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            layout: layout.clone(),
            mqtt_broker: settings.mqtt_broker.clone(),
            kubeconfig: settings.k3s.kubeconfig.clone(),
            use_sudo: settings.k3s.use_sudo,
            engine: EngineOptions {
                rollout_poll: PollPolicy::rollout(),
                delete_poll: PollPolicy::deletion(),
                reporter_interval: Duration::from_secs(settings.reporter.interval_secs.max(1)),
                reporter_capacity: settings.reporter.max_concurrent,
                system_namespace: settings.k3s.system_namespace.clone(),
                tmp_dir: layout.tmp_dir(),
                download_timeout: Duration::from_secs(1800),
                tunnel: TunnelOptions {
                    service_name: settings.tunnel.service_name.clone(),
                    params_file: File::new(&settings.tunnel.params_file),
                    log_file: File::new(&settings.tunnel.log_file),
                    public_key_file: File::new(&settings.tunnel.public_key_file),
                    poll_interval: Duration::from_secs(1),
                    poll_attempts: 10,
                },
            },
            mqtt_worker: mqtt::Options::default(),
            heartbeat: heartbeat::Options {
                interval: Duration::from_secs(settings.heartbeat_interval_secs.max(1)),
            },
        }
    }
}

/// Lifecycle options for the agent
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Wait for the broker's connection acknowledgement at startup
    pub connect_timeout: Duration,

    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}
