//! Last known progress label per request

use std::collections::HashMap;
use std::sync::RwLock;

/// Thread-safe `request_id -> label` map shared by handlers and reporters
#[derive(Debug, Default)]
pub struct TaskStatusStore {
    entries: RwLock<HashMap<String, String>>,
}

impl TaskStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the current label of a request
    pub fn get(&self, request_id: &str) -> Option<String> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(request_id).cloned()
    }

    /// Set the current label of a request
    pub fn set(&self, request_id: &str, label: &str) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(request_id.to_string(), label.to_string());
    }

    /// Remove the entry of a request
    pub fn remove(&self, request_id: &str) -> Option<String> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(request_id)
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
