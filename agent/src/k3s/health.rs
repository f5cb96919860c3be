//! Derived application health

use serde::{Deserialize, Serialize};

/// Coarse health of a deployed app, recomputed on every read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppStatus {
    Stopped,
    Stopping,
    Healthy,
    Pending,
    Partial,
    #[default]
    Unknown,
}

impl AppStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppStatus::Stopped => "Stopped",
            AppStatus::Stopping => "Stopping",
            AppStatus::Healthy => "Healthy",
            AppStatus::Pending => "Pending",
            AppStatus::Partial => "Partial",
            AppStatus::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for AppStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const RUNNING: &str = "Running";
const PENDING: &str = "Pending";

/// Classify an app from its desired replica count and the phases of its pods.
///
/// The zero-replica rules come first so a finished stop is told apart from a
/// stop still in flight.
pub fn classify<S: AsRef<str>>(desired: i32, phases: &[S]) -> AppStatus {
    let pod_count = phases.len();

    if desired <= 0 {
        return if pod_count == 0 {
            AppStatus::Stopped
        } else {
            AppStatus::Stopping
        };
    }

    if desired as usize != pod_count {
        return AppStatus::Unknown;
    }

    if phases.iter().all(|p| p.as_ref() == RUNNING) {
        AppStatus::Healthy
    } else if phases.iter().all(|p| p.as_ref() == PENDING) {
        AppStatus::Pending
    } else if phases.iter().any(|p| p.as_ref() == RUNNING) {
        AppStatus::Partial
    } else {
        AppStatus::Unknown
    }
}
