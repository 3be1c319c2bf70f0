//! Wire-level descriptions returned by the cloud provider.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One autoscaling group as described by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsgDescription {
    /// Group name (unique within the account/region).
    pub name: String,

    /// Number of instances the group tries to maintain.
    pub desired_capacity: u32,

    /// Whether newly launched instances are protected from scale-in.
    ///
    /// When `false` the engine must repair protection before trusting
    /// the rest of the description.
    pub new_instances_protected: bool,

    /// Instances currently attached to the group.
    #[serde(default)]
    pub instances: Vec<AsgInstance>,
}

/// Instance membership entry inside an [`AsgDescription`].
///
/// The group listing only carries id and lifecycle state; IP, launch time
/// and tags require a per-instance describe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsgInstance {
    pub instance_id: String,
    pub lifecycle_state: String,
}

/// Full description of a single instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceDescription {
    pub instance_id: String,

    /// Private IPv4 address; the join key against the scheduler's agents.
    pub private_ip: String,

    pub launch_time: DateTime<Utc>,

    pub lifecycle_state: String,

    /// Instance tags. The deathnode mark lives here.
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asg_description_deserialization() {
        let json = r#"{
            "name": "web-prod",
            "desired_capacity": 2,
            "new_instances_protected": true,
            "instances": [
                {"instance_id": "i-0a", "lifecycle_state": "InService"},
                {"instance_id": "i-0b", "lifecycle_state": "InService"}
            ]
        }"#;

        let asg: AsgDescription = serde_json::from_str(json).unwrap();
        assert_eq!(asg.name, "web-prod");
        assert_eq!(asg.desired_capacity, 2);
        assert!(asg.new_instances_protected);
        assert_eq!(asg.instances.len(), 2);
        assert_eq!(asg.instances[0].instance_id, "i-0a");
    }

    #[test]
    fn test_instance_description_defaults_tags() {
        let json = r#"{
            "instance_id": "i-0a",
            "private_ip": "10.0.0.5",
            "launch_time": "2026-01-10T08:00:00Z",
            "lifecycle_state": "running"
        }"#;

        let desc: InstanceDescription = serde_json::from_str(json).unwrap();
        assert!(desc.tags.is_empty());
        assert_eq!(desc.private_ip, "10.0.0.5");
    }
}
