//! MQTT topic definitions

/// MQTT topic patterns
pub struct Topics;

impl Topics {
    /// Topic the agent publishes results, progress and broadcasts on
    pub fn upstream(user: &str, device_key: &str) -> String {
        format!("/{}/{}/upstream_edge_k3s", user, device_key)
    }

    /// Topic the agent receives commands on
    pub fn downstream(user: &str, device_key: &str) -> String {
        format!("/{}/{}/downstream_edge_k3s", user, device_key)
    }

    pub fn is_downstream_topic(topic: &str) -> bool {
        topic.ends_with("/downstream_edge_k3s")
    }
}
