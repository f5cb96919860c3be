//! Read-back projection of a deployed app

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::errors::AgentError;
use crate::k3s::client::{ContainerUsage, ControlPlane, DeploymentInfo, PodInfo};
use crate::k3s::health::{classify, AppStatus};
use crate::k3s::quantity::{cpu_millicores, memory_mib};
use crate::telemetry::HostFacts;
use crate::utils::round2;

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ContainerSummary {
    pub name: String,
    pub image: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct PodSummary {
    pub name: String,
    /// Pod phase
    pub status: String,
    pub containers: Vec<ContainerSummary>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct Replicas {
    pub desired: i32,
    pub available: i32,
    pub updated: i32,
    pub unavailable: i32,
}

/// Log tail of one container
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ContainerLogs {
    pub pod: String,
    pub container: String,
    pub logs: Vec<String>,
}

/// One deployed workload as reported to the remote operator.
///
/// Never cached: every query rebuilds it from the cluster.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct App {
    pub app_name: String,
    pub namespace: String,
    pub status: AppStatus,
    pub pods: Vec<PodSummary>,
    pub replicas: Replicas,
    /// Percent of the CPU baseline in use
    pub cpu_usage: f64,
    /// Percent of the memory baseline in use
    pub mem_usage: f64,
    /// Seconds since the earliest pod started
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs: Option<Vec<ContainerLogs>>,
}

impl App {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Build the projection from raw read-backs.
///
/// `metrics` is aligned with `pods`; `None` marks a pod without metrics.
pub fn project(
    deployment: &DeploymentInfo,
    pods: &[PodInfo],
    metrics: &[Option<Vec<ContainerUsage>>],
    host: &HostFacts,
    now: DateTime<Utc>,
) -> App {
    let phases: Vec<&str> = pods.iter().map(|p| p.phase.as_str()).collect();
    let (cpu_usage, mem_usage) = usage_percentages(pods, metrics, host.total_memory_mib);

    App {
        app_name: deployment.name.clone(),
        namespace: deployment.namespace.clone(),
        status: classify(deployment.desired_replicas, &phases),
        pods: pods
            .iter()
            .map(|pod| PodSummary {
                name: pod.name.clone(),
                status: pod.phase.clone(),
                containers: pod
                    .containers
                    .iter()
                    .map(|c| ContainerSummary {
                        name: c.name.clone(),
                        image: c.image.clone(),
                    })
                    .collect(),
            })
            .collect(),
        replicas: Replicas {
            desired: deployment.desired_replicas,
            available: deployment.available_replicas,
            updated: deployment.updated_replicas,
            unavailable: deployment.unavailable_replicas,
        },
        cpu_usage,
        mem_usage,
        uptime: app_uptime(pods, host.boot_time, now),
        logs: None,
    }
}

fn percent(used: f64, baseline: f64) -> f64 {
    if baseline > 0.0 {
        round2(used / baseline * 100.0)
    } else {
        0.0
    }
}

/// CPU and memory usage percentages of an app.
///
/// Baselines are the summed container requests. Without CPU requests each pod
/// that reported metrics counts for one core; without memory requests the
/// host memory is used.
pub fn usage_percentages(
    pods: &[PodInfo],
    metrics: &[Option<Vec<ContainerUsage>>],
    total_memory_mib: f64,
) -> (f64, f64) {
    let reporting: Vec<&Vec<ContainerUsage>> = metrics.iter().flatten().collect();
    if reporting.is_empty() {
        return (0.0, 0.0);
    }

    let usages = || reporting.iter().flat_map(|u| u.iter());
    let cpu_used: f64 = usages().filter_map(|u| cpu_millicores(&u.cpu)).sum();
    let mem_used: f64 = usages().filter_map(|u| memory_mib(&u.memory)).sum();

    let containers = || pods.iter().flat_map(|p| p.containers.iter());
    let cpu_requests: f64 = containers()
        .filter_map(|c| c.cpu_request.as_deref())
        .filter_map(cpu_millicores)
        .sum();
    let mem_requests: f64 = containers()
        .filter_map(|c| c.memory_request.as_deref())
        .filter_map(memory_mib)
        .sum();

    let cpu_baseline = if cpu_requests > 0.0 {
        cpu_requests
    } else {
        1000.0 * reporting.len() as f64
    };
    let mem_baseline = if mem_requests > 0.0 {
        mem_requests
    } else {
        total_memory_mib
    };

    (percent(cpu_used, cpu_baseline), percent(mem_used, mem_baseline))
}

/// Uptime of the earliest started pod. Pods started before the last boot
/// count from the boot.
pub fn app_uptime(pods: &[PodInfo], boot_time: DateTime<Utc>, now: DateTime<Utc>) -> Option<i64> {
    pods.iter()
        .filter_map(|p| p.start_time)
        .map(|start| (now - start.max(boot_time)).num_seconds())
        .max()
}

async fn read_app_and_pods(
    control_plane: &dyn ControlPlane,
    name: &str,
    namespace: &str,
    host: &HostFacts,
) -> Result<Option<(App, Vec<PodInfo>)>, AgentError> {
    let Some(mut deployment) = control_plane.get_deployment(name, namespace).await? else {
        return Ok(None);
    };
    if deployment.namespace.is_empty() {
        deployment.namespace = namespace.to_string();
    }

    let pods = control_plane
        .list_pods(namespace, &deployment.match_labels)
        .await?;

    let metrics: Vec<Option<Vec<ContainerUsage>>> =
        join_all(pods.iter().map(|pod| control_plane.pod_metrics(namespace, &pod.name)))
            .await
            .into_iter()
            .zip(&pods)
            .map(|(usage, pod)| match usage {
                Ok(usage) => Some(usage),
                Err(e) => {
                    debug!("No metrics for pod {}/{}: {}", namespace, pod.name, e);
                    None
                }
            })
            .collect();

    let app = project(&deployment, &pods, &metrics, host, Utc::now());
    Ok(Some((app, pods)))
}

/// Current state of one app, `None` if its deployment does not exist
pub async fn read_app(
    control_plane: &dyn ControlPlane,
    name: &str,
    namespace: &str,
    host: &HostFacts,
) -> Result<Option<App>, AgentError> {
    Ok(read_app_and_pods(control_plane, name, namespace, host)
        .await?
        .map(|(app, _)| app))
}

/// Current state of one app with the log tail of every container.
///
/// Containers whose logs cannot be read (no previous instance) get an empty
/// tail.
pub async fn read_app_with_logs(
    control_plane: &dyn ControlPlane,
    name: &str,
    namespace: &str,
    tail_lines: i64,
    previous: bool,
    host: &HostFacts,
) -> Result<App, AgentError> {
    let Some((mut app, pods)) = read_app_and_pods(control_plane, name, namespace, host).await?
    else {
        return Err(AgentError::NotFound("app not found".to_string()));
    };

    let mut logs = Vec::new();
    for pod in &pods {
        for container in &pod.containers {
            let lines = match control_plane
                .pod_logs(namespace, &pod.name, &container.name, tail_lines, previous)
                .await
            {
                Ok(text) => text
                    .lines()
                    .filter(|line| !line.is_empty())
                    .map(str::to_string)
                    .collect(),
                Err(e) => {
                    debug!("No logs for {}/{}: {}", pod.name, container.name, e);
                    Vec::new()
                }
            };
            logs.push(ContainerLogs {
                pod: pod.name.clone(),
                container: container.name.clone(),
                logs: lines,
            });
        }
    }

    app.logs = Some(logs);
    Ok(app)
}

/// Every app outside the system namespace
pub async fn list_apps(
    control_plane: &dyn ControlPlane,
    system_namespace: &str,
    host: &HostFacts,
) -> Result<Vec<App>, AgentError> {
    let mut apps = Vec::new();
    for deployment in control_plane.list_deployments().await? {
        if deployment.namespace == system_namespace {
            continue;
        }
        if let Some(app) = read_app(control_plane, &deployment.name, &deployment.namespace, host).await? {
            apps.push(app);
        }
    }
    Ok(apps)
}
