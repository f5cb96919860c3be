//! MQTT transport

pub mod client;
pub mod publisher;
pub mod topics;

pub use publisher::{MqttPublisher, Publisher};
