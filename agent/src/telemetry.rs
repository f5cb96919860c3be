//! Host resource collection

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sysinfo::{Disks, System};

use crate::k3s::app::App;
use crate::utils::round2;

/// CPU usage of the host
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CpuStats {
    /// Logical CPU count
    pub count: usize,
    pub usage_percent: f64,
}

/// Capacity and usage of memory, swap or disk, in KiB
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UsageStats {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub usage_percent: f64,
}

impl UsageStats {
    /// Build from byte counts
    pub fn from_bytes(total: u64, used: u64, free: u64) -> Self {
        let usage_percent = if total > 0 {
            round2(used as f64 / total as f64 * 100.0)
        } else {
            0.0
        };
        Self {
            total: total / 1024,
            used: used / 1024,
            free: free / 1024,
            usage_percent,
        }
    }
}

/// Host resource snapshot sent with app listings
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ResourceSnapshot {
    pub cpu: CpuStats,
    pub memory: UsageStats,
    pub swap: UsageStats,
    pub disk: UsageStats,
}

/// Host values the app projection depends on
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostFacts {
    pub boot_time: DateTime<Utc>,
    pub total_memory_mib: f64,
}

impl HostFacts {
    pub fn current() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        let boot_time = DateTime::<Utc>::from_timestamp(System::boot_time() as i64, 0)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        Self {
            boot_time,
            total_memory_mib: sys.total_memory() as f64 / (1024.0 * 1024.0),
        }
    }
}

/// Collect a resource snapshot. Sleeps one CPU sampling interval.
pub async fn collect_resources() -> ResourceSnapshot {
    let mut sys = System::new();
    sys.refresh_cpu_usage();
    tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
    sys.refresh_cpu_usage();
    sys.refresh_memory();

    let memory_used = sys.total_memory().saturating_sub(sys.available_memory());
    let memory = UsageStats::from_bytes(sys.total_memory(), memory_used, sys.available_memory());
    let swap = UsageStats::from_bytes(sys.total_swap(), sys.used_swap(), sys.free_swap());

    ResourceSnapshot {
        cpu: CpuStats {
            count: sys.cpus().len(),
            usage_percent: round2(sys.global_cpu_usage() as f64),
        },
        memory,
        swap,
        disk: root_disk_usage(),
    }
}

/// Usage of the filesystem mounted at `/`, else of all disks together
fn root_disk_usage() -> UsageStats {
    let disks = Disks::new_with_refreshed_list();

    if let Some(root) = disks.iter().find(|d| d.mount_point() == Path::new("/")) {
        let total = root.total_space();
        let free = root.available_space();
        return UsageStats::from_bytes(total, total.saturating_sub(free), free);
    }

    let (total, free) = disks.iter().fold((0u64, 0u64), |(total, free), disk| {
        (total + disk.total_space(), free + disk.available_space())
    });
    UsageStats::from_bytes(total, total.saturating_sub(free), free)
}

/// `{total, <status>: count}` over the given apps
pub fn app_counts(apps: &[App]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    counts.insert("total".to_string(), apps.len());
    for app in apps {
        *counts.entry(app.status.to_string()).or_insert(0) += 1;
    }
    counts
}
