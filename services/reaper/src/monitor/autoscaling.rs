//! Autoscaling-group cache.
//!
//! `AsgMonitors` tracks every group matching the watched prefixes and the
//! instances inside them, diffing the cache against a fresh cloud view on
//! every refresh. The refresh also repairs scale-in protection: a group
//! reporting unprotected new instances is not trusted until protection is
//! back on, so the cloud can never race the engine on victim selection.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use reaper_cloud::{AsgDescription, CloudClient, CloudError};
use tracing::{debug, info, warn};

use super::instance::Instance;

/// Marked instances absent from this many consecutive refreshes are
/// dropped. The grace refresh keeps a detached-but-not-yet-terminated
/// instance visible so a failed terminate can be retried.
const MAX_REFRESH_MISSES: u8 = 2;

/// Cached state of one autoscaling group.
#[derive(Debug, Clone, PartialEq)]
pub struct AsgState {
    pub name: String,
    pub desired_capacity: u32,
    pub instances: BTreeMap<String, Instance>,
}

impl AsgState {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            desired_capacity: 0,
            instances: BTreeMap::new(),
        }
    }

    /// Instances already chosen to die.
    pub fn marked_instances(&self) -> Vec<&Instance> {
        self.instances
            .values()
            .filter(|i| i.marked_to_be_removed)
            .collect()
    }

    /// Instances still counting toward capacity.
    pub fn unmarked_instances(&self) -> Vec<&Instance> {
        self.instances
            .values()
            .filter(|i| !i.marked_to_be_removed)
            .collect()
    }

    /// Number of additional instances that must be marked for removal.
    ///
    /// Marked instances are on their way out and do not count toward
    /// capacity, so the answer is how far the unmarked population exceeds
    /// the desired capacity. The unmarked count never drops below the
    /// desired capacity as a result of marking this many.
    pub fn num_undesired_instances(&self) -> usize {
        let unmarked = self
            .instances
            .values()
            .filter(|i| !i.marked_to_be_removed)
            .count();
        unmarked.saturating_sub(self.desired_capacity as usize)
    }
}

/// Cache of every watched autoscaling group, keyed prefix → group name.
pub struct AsgMonitors {
    cloud: Arc<dyn CloudClient>,
    death_node_mark: String,
    monitors: BTreeMap<String, BTreeMap<String, AsgState>>,
}

impl AsgMonitors {
    pub fn new(cloud: Arc<dyn CloudClient>, prefixes: &[String], death_node_mark: &str) -> Self {
        let monitors = prefixes
            .iter()
            .map(|prefix| (prefix.clone(), BTreeMap::new()))
            .collect();

        Self {
            cloud,
            death_node_mark: death_node_mark.to_string(),
            monitors,
        }
    }

    /// Refresh every watched prefix against the cloud.
    ///
    /// A failed describe leaves that prefix's cache untouched for the
    /// tick. A group matching several prefixes is tracked under the first
    /// one only (prefixes iterate in sorted order, so the claim is
    /// deterministic and every instance id lives under exactly one group).
    pub async fn refresh(&mut self) {
        let cloud = Arc::clone(&self.cloud);
        let mark = self.death_node_mark.clone();
        let mut claimed: HashSet<String> = HashSet::new();
        let prefixes: Vec<String> = self.monitors.keys().cloned().collect();

        for prefix in prefixes {
            let described = match cloud.describe_asgs_matching(&prefix).await {
                Ok(described) => described,
                Err(err) => {
                    warn!(
                        prefix = %prefix,
                        error = %err,
                        "Failed to describe autoscaling groups; keeping cached view"
                    );
                    continue;
                }
            };
            if described.is_empty() {
                warn!(prefix = %prefix, "No autoscaling groups matched prefix");
            }

            let mut seen: HashSet<String> = HashSet::new();
            for asg in described {
                let name = asg.name.clone();
                if !claimed.insert(name.clone()) {
                    debug!(
                        asg_name = %name,
                        prefix = %prefix,
                        "Group already tracked under an earlier prefix; skipping"
                    );
                    continue;
                }
                seen.insert(name.clone());

                let groups = self.monitors.entry(prefix.clone()).or_default();
                let state = groups.entry(name.clone()).or_insert_with(|| {
                    info!(asg_name = %name, prefix = %prefix, "Found new autoscaling group to monitor");
                    AsgState::new(&name)
                });

                if let Err(err) = reconcile_group(&cloud, state, asg, &mark).await {
                    warn!(
                        asg_name = %name,
                        error = %err,
                        "Failed to reconcile autoscaling group; keeping previous state"
                    );
                }
            }

            // Groups the response no longer carries are gone.
            let groups = self.monitors.entry(prefix.clone()).or_default();
            let removed: Vec<String> = groups
                .keys()
                .filter(|name| !seen.contains(*name))
                .cloned()
                .collect();
            for name in removed {
                info!(asg_name = %name, "Autoscaling group removed; dropping it");
                groups.remove(&name);
            }
        }
    }

    /// Every cached group, across all prefixes.
    pub fn all(&self) -> impl Iterator<Item = &AsgState> {
        self.monitors.values().flat_map(|groups| groups.values())
    }

    /// Name of the group holding `instance_id`, if any. Linear scan;
    /// instance counts are in the hundreds.
    pub fn asg_name_for_instance(&self, instance_id: &str) -> Option<&str> {
        self.all()
            .find(|asg| asg.instances.contains_key(instance_id))
            .map(|asg| asg.name.as_str())
    }

    /// Flip the removal mark on a cached instance. The mark never clears;
    /// only a terminate (or the instance leaving the group) removes it.
    pub fn mark_instance(&mut self, asg_name: &str, instance_id: &str) {
        for groups in self.monitors.values_mut() {
            if let Some(state) = groups.get_mut(asg_name) {
                if let Some(instance) = state.instances.get_mut(instance_id) {
                    instance.marked_to_be_removed = true;
                }
                return;
            }
        }
    }

    /// Evict a terminated instance from the cache.
    pub fn remove_instance(&mut self, asg_name: &str, instance_id: &str) {
        for groups in self.monitors.values_mut() {
            if let Some(state) = groups.get_mut(asg_name) {
                state.instances.remove(instance_id);
                return;
            }
        }
    }

    /// Copy-out view of the whole cache, for read-only consumers.
    pub fn snapshot(&self) -> BTreeMap<String, BTreeMap<String, AsgState>> {
        self.monitors.clone()
    }
}

/// Fold one described group into its cached state.
async fn reconcile_group(
    cloud: &Arc<dyn CloudClient>,
    state: &mut AsgState,
    described: AsgDescription,
    mark: &str,
) -> Result<(), CloudError> {
    if !described.new_instances_protected {
        info!(
            asg_name = %described.name,
            instances = described.instances.len(),
            "Enabling scale-in protection on group and instances"
        );
        let ids: Vec<String> = described
            .instances
            .iter()
            .map(|i| i.instance_id.clone())
            .collect();
        // On failure the desired capacity stays untouched; the next tick
        // re-enters with the previous consistent view.
        cloud.set_instance_protection(&described.name, &ids).await?;
    }

    state.desired_capacity = described.desired_capacity;

    for member in &described.instances {
        if state.instances.contains_key(&member.instance_id) {
            continue;
        }
        match cloud.describe_instance(&member.instance_id).await {
            Ok(desc) => {
                let instance = Instance::from_description(desc, mark);
                if instance.marked_to_be_removed {
                    info!(
                        asg_name = %state.name,
                        instance_id = %member.instance_id,
                        "Instance already carries the removal mark; resuming its drain"
                    );
                } else {
                    debug!(
                        asg_name = %state.name,
                        instance_id = %member.instance_id,
                        "Found new instance to monitor"
                    );
                }
                state.instances.insert(member.instance_id.clone(), instance);
            }
            Err(CloudError::NotFound(_)) => {
                debug!(
                    instance_id = %member.instance_id,
                    "Instance disappeared before it could be described"
                );
            }
            Err(err) => {
                warn!(
                    instance_id = %member.instance_id,
                    error = %err,
                    "Failed to describe instance; retrying next tick"
                );
            }
        }
    }

    let present: HashSet<&str> = described
        .instances
        .iter()
        .map(|i| i.instance_id.as_str())
        .collect();
    let mut gone = Vec::new();
    for (id, instance) in state.instances.iter_mut() {
        if present.contains(id.as_str()) {
            instance.refresh_misses = 0;
            continue;
        }
        if instance.marked_to_be_removed {
            instance.refresh_misses += 1;
            if instance.refresh_misses < MAX_REFRESH_MISSES {
                debug!(
                    instance_id = %id,
                    "Marked instance missing from group; keeping it one refresh for terminate retry"
                );
                continue;
            }
        }
        gone.push(id.clone());
    }
    for id in gone {
        debug!(
            asg_name = %state.name,
            instance_id = %id,
            "Instance left the group; dropping it from the cache"
        );
        state.instances.remove(&id);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reaper_cloud::ReplayClient;

    fn records_dir() -> String {
        concat!(env!("CARGO_MANIFEST_DIR"), "/tests/records").to_string()
    }

    fn instance(id: &str, launch: &str, marked: bool) -> Instance {
        Instance {
            instance_id: id.to_string(),
            private_ip: format!("10.0.0.{}", id.len()),
            launch_time: launch.parse().unwrap(),
            lifecycle_state: "InService".to_string(),
            marked_to_be_removed: marked,
            refresh_misses: 0,
        }
    }

    fn state_with(desired: u32, instances: Vec<Instance>) -> AsgState {
        let mut state = AsgState::new("web-prod");
        state.desired_capacity = desired;
        for i in instances {
            state.instances.insert(i.instance_id.clone(), i);
        }
        state
    }

    #[test]
    fn test_num_undesired_counts_only_unmarked_surplus() {
        let state = state_with(
            2,
            vec![
                instance("i-0a", "2026-01-01T00:00:00Z", false),
                instance("i-0b", "2026-01-02T00:00:00Z", false),
                instance("i-0c", "2026-01-03T00:00:00Z", false),
            ],
        );
        assert_eq!(state.num_undesired_instances(), 1);
    }

    #[test]
    fn test_num_undesired_is_zero_once_marked() {
        let state = state_with(
            2,
            vec![
                instance("i-0a", "2026-01-01T00:00:00Z", true),
                instance("i-0b", "2026-01-02T00:00:00Z", false),
                instance("i-0c", "2026-01-03T00:00:00Z", false),
            ],
        );
        assert_eq!(state.num_undesired_instances(), 0);
    }

    #[test]
    fn test_num_undesired_never_breaks_capacity_floor() {
        // Four instances, one already marked: only one more may be marked,
        // or the unmarked population would fall below desired capacity.
        let state = state_with(
            2,
            vec![
                instance("i-0a", "2026-01-01T00:00:00Z", true),
                instance("i-0b", "2026-01-02T00:00:00Z", false),
                instance("i-0c", "2026-01-03T00:00:00Z", false),
                instance("i-0d", "2026-01-04T00:00:00Z", false),
            ],
        );
        assert_eq!(state.num_undesired_instances(), 1);
    }

    #[test]
    fn test_num_undesired_at_capacity() {
        let state = state_with(
            2,
            vec![
                instance("i-0b", "2026-01-02T00:00:00Z", false),
                instance("i-0c", "2026-01-03T00:00:00Z", false),
            ],
        );
        assert_eq!(state.num_undesired_instances(), 0);
    }

    #[tokio::test]
    async fn test_refresh_builds_cache_from_cloud_view() {
        let cloud = Arc::new(
            ReplayClient::new(records_dir())
                .with_records("DescribeAsgsMatching", &["web3"])
                .with_records("DescribeInstance", &["i-0a", "i-0b", "i-0c"]),
        );
        let mut monitors =
            AsgMonitors::new(cloud, &["web".to_string()], "DEATH_NODE_MARK");

        monitors.refresh().await;

        let asg = monitors.all().next().unwrap();
        assert_eq!(asg.name, "web-prod");
        assert_eq!(asg.desired_capacity, 2);
        assert_eq!(asg.instances.len(), 3);
        assert_eq!(asg.instances["i-0a"].private_ip, "10.0.0.5");
        assert_eq!(monitors.asg_name_for_instance("i-0b"), Some("web-prod"));
        assert_eq!(monitors.asg_name_for_instance("i-zz"), None);
    }

    #[tokio::test]
    async fn test_refresh_repairs_missing_protection() {
        let cloud = Arc::new(
            ReplayClient::new(records_dir())
                .with_records("DescribeAsgsMatching", &["web3_unprotected"])
                .with_records("DescribeInstance", &["i-0a", "i-0b", "i-0c"]),
        );
        let mut monitors = AsgMonitors::new(
            Arc::clone(&cloud) as Arc<dyn CloudClient>,
            &["web".to_string()],
            "DEATH_NODE_MARK",
        );

        monitors.refresh().await;

        let calls = cloud.requests_for("SetInstanceProtection");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], vec!["web-prod", "i-0a", "i-0b", "i-0c"]);
        // Protection succeeded, so the rest of the description was applied.
        assert_eq!(monitors.all().next().unwrap().desired_capacity, 2);
    }

    #[tokio::test]
    async fn test_failed_protection_defers_capacity_update() {
        let cloud = Arc::new(
            ReplayClient::new(records_dir())
                .with_records("DescribeAsgsMatching", &["web3_unprotected"])
                .with_failure(
                    "SetInstanceProtection",
                    CloudError::Transient("throttled".into()),
                ),
        );
        let mut monitors =
            AsgMonitors::new(cloud, &["web".to_string()], "DEATH_NODE_MARK");

        monitors.refresh().await;

        let asg = monitors.all().next().unwrap();
        assert_eq!(asg.desired_capacity, 0);
        assert!(asg.instances.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_twice_without_changes_is_idempotent() {
        let cloud = Arc::new(
            ReplayClient::new(records_dir())
                .with_records("DescribeAsgsMatching", &["web3", "web3"])
                .with_records("DescribeInstance", &["i-0a", "i-0b", "i-0c"]),
        );
        let mut monitors =
            AsgMonitors::new(cloud, &["web".to_string()], "DEATH_NODE_MARK");

        monitors.refresh().await;
        let first = monitors.snapshot();
        monitors.refresh().await;
        let second = monitors.snapshot();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_unmarked_instance_dropped_on_first_absence() {
        let cloud = Arc::new(
            ReplayClient::new(records_dir())
                .with_records("DescribeAsgsMatching", &["web3", "web2"])
                .with_records("DescribeInstance", &["i-0a", "i-0b", "i-0c"]),
        );
        let mut monitors =
            AsgMonitors::new(cloud, &["web".to_string()], "DEATH_NODE_MARK");

        monitors.refresh().await;
        monitors.refresh().await;

        let asg = monitors.all().next().unwrap();
        assert_eq!(asg.instances.len(), 2);
        assert!(!asg.instances.contains_key("i-0a"));
    }

    #[tokio::test]
    async fn test_marked_instance_survives_one_missed_refresh() {
        let cloud = Arc::new(
            ReplayClient::new(records_dir())
                .with_records("DescribeAsgsMatching", &["web3", "web2", "web2"])
                .with_records("DescribeInstance", &["i-0a", "i-0b", "i-0c"]),
        );
        let mut monitors =
            AsgMonitors::new(cloud, &["web".to_string()], "DEATH_NODE_MARK");

        monitors.refresh().await;
        monitors.mark_instance("web-prod", "i-0a");

        monitors.refresh().await;
        assert!(monitors
            .all()
            .next()
            .unwrap()
            .instances
            .contains_key("i-0a"));

        monitors.refresh().await;
        assert!(!monitors
            .all()
            .next()
            .unwrap()
            .instances
            .contains_key("i-0a"));
    }

    #[tokio::test]
    async fn test_group_matching_two_prefixes_tracked_once() {
        // Both prefixes match web-prod; the first (sorted) prefix claims it.
        let cloud = Arc::new(
            ReplayClient::new(records_dir())
                .with_records("DescribeAsgsMatching", &["web3", "web3"])
                .with_records("DescribeInstance", &["i-0a", "i-0b", "i-0c"]),
        );
        let mut monitors = AsgMonitors::new(
            cloud,
            &["w".to_string(), "web".to_string()],
            "DEATH_NODE_MARK",
        );

        monitors.refresh().await;

        assert_eq!(monitors.all().count(), 1);
        let snapshot = monitors.snapshot();
        assert!(snapshot["w"].contains_key("web-prod"));
        assert!(snapshot["web"].is_empty());
    }

    #[tokio::test]
    async fn test_mark_seeded_from_cloud_tag() {
        let cloud = Arc::new(
            ReplayClient::new(records_dir())
                .with_records("DescribeAsgsMatching", &["web3"])
                .with_records("DescribeInstance", &["i-0a_marked", "i-0b", "i-0c"]),
        );
        let mut monitors =
            AsgMonitors::new(cloud, &["web".to_string()], "DEATH_NODE_MARK");

        monitors.refresh().await;

        let asg = monitors.all().next().unwrap();
        assert!(asg.instances["i-0a"].marked_to_be_removed);
        assert_eq!(asg.marked_instances().len(), 1);
        assert_eq!(asg.num_undesired_instances(), 0);
    }

    #[tokio::test]
    async fn test_describe_failure_keeps_cached_view() {
        let cloud = Arc::new(
            ReplayClient::new(records_dir())
                .with_records("DescribeAsgsMatching", &["web3"])
                .with_records("DescribeInstance", &["i-0a", "i-0b", "i-0c"])
                .with_failure(
                    "DescribeAsgsMatching",
                    CloudError::Transient("throttled".into()),
                ),
        );
        let mut monitors =
            AsgMonitors::new(cloud, &["web".to_string()], "DEATH_NODE_MARK");

        // First refresh hits the injected failure; cache stays empty but
        // consistent. Second refresh succeeds.
        monitors.refresh().await;
        assert_eq!(monitors.all().count(), 0);

        monitors.refresh().await;
        assert_eq!(monitors.all().count(), 1);
    }
}
