//! Long-running background tasks

pub mod heartbeat;
pub mod mqtt;
pub mod pump;
