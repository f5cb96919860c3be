//! Local k3s cluster access

pub mod app;
pub mod client;
pub mod cluster;
pub mod ctr;
pub mod health;
pub mod poller;
pub mod quantity;

pub use client::{ControlPlane, ImageRuntime};
