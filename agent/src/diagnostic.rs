//! `--diagnostic` self checks

use colored::*;

use crate::k3s::cluster::KubeControlPlane;
use crate::k3s::ctr::CtrImageRuntime;
use crate::k3s::{ControlPlane, ImageRuntime};
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;

/// Result of one check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub name: &'static str,
    pub passed: bool,
    pub details: String,
}

impl Check {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, passed: true, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, passed: false, details: details.into() }
    }
}

/// Settings file check; falls back to defaults when it cannot be read
pub async fn check_settings(layout: &StorageLayout) -> (Check, Settings) {
    let file = layout.settings_file();
    if !file.exists().await {
        return (
            Check::fail("settings", format!("{} not found, using defaults", file.path().display())),
            Settings::default(),
        );
    }
    match file.read_json::<Settings>().await {
        Ok(settings) => (Check::pass("settings", file.path().display().to_string()), settings),
        Err(e) => (Check::fail("settings", e.to_string()), Settings::default()),
    }
}

pub fn check_broker(settings: &Settings) -> Check {
    let broker = &settings.mqtt_broker;
    if broker.host.is_empty() || broker.device_key.is_empty() {
        Check::fail("mqtt broker", "host and device_key must be configured")
    } else {
        Check::pass("mqtt broker", format!("{}:{}", broker.host, broker.port))
    }
}

async fn check_cluster(settings: &Settings) -> Vec<Check> {
    let kubeconfig = &settings.k3s.kubeconfig;
    if !std::path::Path::new(kubeconfig).exists() {
        return vec![Check::fail("kubeconfig", format!("{} not found", kubeconfig))];
    }

    let mut checks = vec![Check::pass("kubeconfig", kubeconfig.clone())];
    match KubeControlPlane::from_kubeconfig(kubeconfig).await {
        Ok(control_plane) => match control_plane.list_deployments().await {
            Ok(deployments) => checks.push(Check::pass(
                "cluster",
                format!("{} deployments", deployments.len()),
            )),
            Err(e) => checks.push(Check::fail("cluster", e.reason())),
        },
        Err(e) => checks.push(Check::fail("cluster", e.reason())),
    }
    checks
}

async fn check_runtime(settings: &Settings) -> Check {
    match CtrImageRuntime::new(settings.k3s.use_sudo).list_images().await {
        Ok(images) => Check::pass("image runtime", format!("{} images", images.len())),
        Err(e) => Check::fail("image runtime", e.reason()),
    }
}

fn print_check(check: &Check) {
    let status = if check.passed { "✓".green() } else { "✗".red() };
    println!("  {} {} - {}", status, check.name, check.details.dimmed());
}

/// Run every check and print the results
pub async fn run_diagnostic(layout: &StorageLayout) -> bool {
    println!("{}", "k3s edge agent diagnostic".bold());
    println!("Home: {}", layout.base_dir.display());

    let (settings_check, settings) = check_settings(layout).await;
    let mut checks = vec![settings_check, check_broker(&settings)];
    checks.extend(check_cluster(&settings).await);
    checks.push(check_runtime(&settings).await);

    for check in &checks {
        print_check(check);
    }

    let failed = checks.iter().filter(|c| !c.passed).count();
    if failed == 0 {
        println!("{}", "All checks passed".green());
    } else {
        println!("{}", format!("{} check(s) failed", failed).yellow());
    }
    failed == 0
}
