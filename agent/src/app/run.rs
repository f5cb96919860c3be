//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::errors::AgentError;
use crate::k3s::cluster::KubeControlPlane;
use crate::k3s::ctr::CtrImageRuntime;
use crate::mqtt::client::MqttClient;
use crate::orchestrator::schema::DeploymentSchemas;
use crate::orchestrator::{Collaborators, Dispatcher, Engine};
use crate::tunnel::SystemctlServiceManager;
use crate::workers::{heartbeat, mqtt, pump};

/// Run the k3s edge agent
pub async fn run(
    agent_version: String,
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), AgentError> {
    info!("Initializing k3s edge agent {}...", agent_version);

    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let cancel = CancellationToken::new();
    let mut shutdown_manager =
        ShutdownManager::new(shutdown_tx.clone(), cancel.clone(), options.lifecycle.clone());

    if let Err(e) = init(&options, cancel, shutdown_tx.clone(), &mut shutdown_manager).await {
        error!("Failed to start agent: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    cancel: CancellationToken,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), AgentError> {
    let mut client = MqttClient::new(&options.mqtt_broker)?;
    let engine = init_engine(options, &client, cancel).await?;

    info!(
        "Connecting to MQTT broker: {}:{}",
        options.mqtt_broker.host, options.mqtt_broker.port
    );
    client.connect(options.lifecycle.connect_timeout).await?;

    let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();

    init_message_pump(
        Dispatcher::new(engine.clone()),
        inbox_rx,
        shutdown_manager,
        shutdown_tx.subscribe(),
    )?;
    init_heartbeat_worker(
        options.heartbeat.clone(),
        engine,
        shutdown_manager,
        shutdown_tx.subscribe(),
    )?;
    init_mqtt_worker(
        options.mqtt_worker.clone(),
        client,
        inbox_tx,
        shutdown_manager,
        shutdown_tx.subscribe(),
    )?;

    Ok(())
}

async fn init_engine(
    options: &AppOptions,
    client: &MqttClient,
    cancel: CancellationToken,
) -> Result<Arc<Engine>, AgentError> {
    info!("Initializing command engine...");

    let control_plane = KubeControlPlane::from_kubeconfig(&options.kubeconfig).await?;
    let schemas = DeploymentSchemas::load(&options.layout).await?;

    let collaborators = Collaborators {
        control_plane: Arc::new(control_plane),
        images: Arc::new(CtrImageRuntime::new(options.use_sudo)),
        services: Arc::new(SystemctlServiceManager::new(options.use_sudo)),
        publisher: Arc::new(client.publisher()),
    };

    Ok(Arc::new(Engine::new(
        collaborators,
        schemas,
        options.engine.clone(),
        cancel,
    )?))
}

fn init_message_pump(
    dispatcher: Dispatcher,
    inbox: mpsc::UnboundedReceiver<Value>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), AgentError> {
    info!("Initializing message pump...");

    let pump_handle = tokio::spawn(async move {
        pump::run(
            dispatcher,
            inbox,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_pump_handle(pump_handle)
}

fn init_heartbeat_worker(
    options: heartbeat::Options,
    engine: Arc<Engine>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), AgentError> {
    info!("Initializing heartbeat worker...");

    let heartbeat_handle = tokio::spawn(async move {
        heartbeat::run(
            &options,
            engine,
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_heartbeat_worker_handle(heartbeat_handle)
}

fn init_mqtt_worker(
    options: mqtt::Options,
    client: MqttClient,
    inbox: mpsc::UnboundedSender<Value>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), AgentError> {
    info!("Initializing MQTT worker...");

    let mqtt_handle = tokio::spawn(async move {
        mqtt::run(
            &options,
            client,
            inbox,
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_mqtt_worker_handle(mqtt_handle)
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    cancel: CancellationToken,
    lifecycle_options: LifecycleOptions,
    pump_handle: Option<JoinHandle<()>>,
    heartbeat_worker_handle: Option<JoinHandle<()>>,
    mqtt_worker_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    pub fn new(
        shutdown_tx: broadcast::Sender<()>,
        cancel: CancellationToken,
        lifecycle_options: LifecycleOptions,
    ) -> Self {
        Self {
            shutdown_tx,
            cancel,
            lifecycle_options,
            pump_handle: None,
            heartbeat_worker_handle: None,
            mqtt_worker_handle: None,
        }
    }

    pub fn with_pump_handle(&mut self, handle: JoinHandle<()>) -> Result<(), AgentError> {
        if self.pump_handle.is_some() {
            return Err(AgentError::ShutdownError("pump_handle already set".to_string()));
        }
        self.pump_handle = Some(handle);
        Ok(())
    }

    pub fn with_heartbeat_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), AgentError> {
        if self.heartbeat_worker_handle.is_some() {
            return Err(AgentError::ShutdownError("heartbeat_handle already set".to_string()));
        }
        self.heartbeat_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_mqtt_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), AgentError> {
        if self.mqtt_worker_handle.is_some() {
            return Err(AgentError::ShutdownError("mqtt_handle already set".to_string()));
        }
        self.mqtt_worker_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), AgentError> {
        let _ = self.shutdown_tx.send(());
        // interrupts in-flight convergence waits and the tunnel poll
        self.cancel.cancel();

        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), AgentError> {
        info!("Shutting down k3s edge agent...");

        // 1. MQTT worker, no new commands
        if let Some(handle) = self.mqtt_worker_handle.take() {
            handle.await.map_err(|e| AgentError::ShutdownError(e.to_string()))?;
        }

        // 2. Message pump
        if let Some(handle) = self.pump_handle.take() {
            handle.await.map_err(|e| AgentError::ShutdownError(e.to_string()))?;
        }

        // 3. Heartbeat worker
        if let Some(handle) = self.heartbeat_worker_handle.take() {
            handle.await.map_err(|e| AgentError::ShutdownError(e.to_string()))?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
