//! Wire types for the master's state endpoints.

use serde::{Deserialize, Serialize};

/// Task state for tasks that are currently running.
pub const TASK_RUNNING: &str = "TASK_RUNNING";

/// A registered framework.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Framework {
    pub id: String,
    pub name: String,
}

/// An agent as reported by the master.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,

    /// Process identity of shape `slave(n)@a.b.c.d:port`; the engine
    /// extracts the private IP from it.
    pub pid: String,

    #[serde(default)]
    pub hostname: String,
}

/// A task as reported by the master.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub name: String,
    pub slave_id: String,
    pub framework_id: String,
    pub state: String,
    #[serde(default)]
    pub labels: Vec<Label>,
}

/// A string-keyed task label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub key: String,
    pub value: String,
}

impl Task {
    /// True while the task occupies its agent.
    pub fn is_running(&self) -> bool {
        self.state == TASK_RUNNING
    }

    /// True when the task carries one of the protecting label keys with
    /// value `TRUE` (case-insensitive).
    pub fn has_protected_label(&self, protected_keys: &[String]) -> bool {
        self.labels.iter().any(|label| {
            protected_keys.contains(&label.key) && label.value.to_uppercase() == "TRUE"
        })
    }
}

/// Extract the private IP from an agent PID of shape
/// `slave(n)@a.b.c.d:port`: the substring after the first `@` and before
/// the first `:` that follows it. Malformed PIDs yield `None` and the
/// agent is omitted from the cache.
pub fn agent_ip_from_pid(pid: &str) -> Option<&str> {
    let (_, rest) = pid.split_once('@')?;
    let ip = rest.split(':').next()?;
    if ip.is_empty() {
        None
    } else {
        Some(ip)
    }
}
