//! k3s edge agent library
//!
//! Receives lifecycle commands over MQTT and applies them to the local k3s
//! cluster, reporting progress and results back on the upstream topic.

pub mod app;
pub mod diagnostic;
pub mod errors;
pub mod filesys;
pub mod k3s;
pub mod logs;
pub mod mqtt;
pub mod orchestrator;
pub mod reporter;
pub mod storage;
pub mod telemetry;
pub mod tunnel;
pub mod utils;
pub mod workers;
