//! Cached instance record.

use chrono::{DateTime, Utc};
use reaper_cloud::InstanceDescription;

/// One instance inside a monitored autoscaling group.
///
/// `marked_to_be_removed` is owned by the engine, not the cloud: once set
/// it never reverts, and only a successful terminate (or the instance
/// leaving the group for good) removes the entry from the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub instance_id: String,

    /// Private IPv4 address; joins the cloud view to the scheduler view.
    pub private_ip: String,

    pub launch_time: DateTime<Utc>,

    pub lifecycle_state: String,

    /// True once the instance has been chosen to die.
    pub marked_to_be_removed: bool,

    /// Consecutive refreshes this instance was absent from the group
    /// response. Only meaningful for marked instances.
    pub(crate) refresh_misses: u8,
}

impl Instance {
    /// Build a cache entry from a cloud description. The removal mark is
    /// seeded from the tag so victim selection survives engine restarts.
    pub fn from_description(desc: InstanceDescription, mark: &str) -> Self {
        Self {
            marked_to_be_removed: desc.tags.contains_key(mark),
            instance_id: desc.instance_id,
            private_ip: desc.private_ip,
            launch_time: desc.launch_time,
            lifecycle_state: desc.lifecycle_state,
            refresh_misses: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn description(tags: HashMap<String, String>) -> InstanceDescription {
        InstanceDescription {
            instance_id: "i-0a".into(),
            private_ip: "10.0.0.5".into(),
            launch_time: "2026-01-10T08:00:00Z".parse().unwrap(),
            lifecycle_state: "running".into(),
            tags,
        }
    }

    #[test]
    fn test_mark_seeded_from_tag() {
        let mut tags = HashMap::new();
        tags.insert("DEATH_NODE_MARK".to_string(), "true".to_string());

        let instance = Instance::from_description(description(tags), "DEATH_NODE_MARK");
        assert!(instance.marked_to_be_removed);
    }

    #[test]
    fn test_untagged_instance_starts_unmarked() {
        let instance = Instance::from_description(description(HashMap::new()), "DEATH_NODE_MARK");
        assert!(!instance.marked_to_be_removed);
        assert_eq!(instance.private_ip, "10.0.0.5");
    }
}
