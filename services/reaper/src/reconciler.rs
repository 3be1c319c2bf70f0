//! Reconciliation loop.
//!
//! One tick: refresh both monitors, mark surplus instances for removal
//! (oldest first), cordon their agents at the scheduler, then advance
//! every marked instance through the drain state machine: stay while
//! protected, stay while tasks run, otherwise detach and terminate.
//!
//! Ordering guarantees within a tick:
//! - all marking happens before any detach or terminate, so capacity is
//!   evaluated against the freshly observed desired capacity;
//! - maintenance is requested before any terminate;
//! - detach always precedes terminate for the same instance.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reaper_cloud::{CloudClient, CloudError};
use reaper_mesos::MesosClient;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::monitor::{AsgMonitors, MesosMonitor};

/// Copy-out snapshot published after every tick for read-only consumers.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineStatus {
    pub last_tick_at: Option<DateTime<Utc>>,
    pub asgs: Vec<AsgStatus>,
}

/// Per-group slice of the status snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct AsgStatus {
    pub name: String,
    pub desired_capacity: u32,
    pub instance_count: usize,
    pub marked_count: usize,
}

#[derive(Debug, Default)]
struct TickStats {
    terminated: usize,
    deferred_protected: usize,
    waiting_drain: usize,
}

/// The reconciliation engine. Owns both caches exclusively; everything
/// external reads through the published [`EngineStatus`].
pub struct Reconciler {
    cloud: Arc<dyn CloudClient>,
    asgs: AsgMonitors,
    mesos: MesosMonitor,
    death_node_mark: String,
    tick_interval: Duration,
    tick_deadline: Duration,
    status_tx: watch::Sender<EngineStatus>,
}

impl Reconciler {
    /// Create a reconciler and the receiver side of its status snapshot.
    pub fn new(
        cloud: Arc<dyn CloudClient>,
        mesos: Arc<dyn MesosClient>,
        config: &Config,
    ) -> (Self, watch::Receiver<EngineStatus>) {
        let asgs = AsgMonitors::new(
            Arc::clone(&cloud),
            &config.asg_prefixes,
            &config.death_node_mark,
        );
        let mesos = MesosMonitor::new(
            mesos,
            config.protected_frameworks.clone(),
            config.protected_tasks_labels.clone(),
        );
        let (status_tx, status_rx) = watch::channel(EngineStatus::default());

        (
            Self {
                cloud,
                asgs,
                mesos,
                death_node_mark: config.death_node_mark.clone(),
                tick_interval: config.tick_interval,
                tick_deadline: config.tick_deadline,
                status_tx,
            },
            status_rx,
        )
    }

    /// Run the reconciliation loop until shutdown.
    ///
    /// Shutdown is observed between ticks: an in-flight tick runs to
    /// completion (bounded by the tick deadline). A tick that overruns the
    /// interval makes the next one start immediately after, never
    /// concurrently.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            tick_interval_secs = self.tick_interval.as_secs(),
            tick_deadline_secs = self.tick_deadline.as_secs(),
            "Starting reconciliation loop"
        );

        let mut interval = tokio::time::interval(self.tick_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Reconciler shutting down");
                        break;
                    }
                    continue;
                }
            }

            if tokio::time::timeout(self.tick_deadline, self.tick())
                .await
                .is_err()
            {
                warn!(
                    deadline_secs = self.tick_deadline.as_secs(),
                    "Tick exceeded deadline; abandoning it until the next interval"
                );
            }

            if *shutdown.borrow() {
                info!("Reconciler shutting down");
                break;
            }
        }
    }

    /// Run a single reconciliation tick.
    pub async fn tick(&mut self) {
        debug!("Starting reconciliation tick");

        self.asgs.refresh().await;
        self.mesos.refresh().await;

        let newly_marked = self.mark_victims().await;
        self.cordon_marked().await;
        let stats = self.advance_marked().await;

        self.publish_status();
        info!(
            newly_marked,
            terminated = stats.terminated,
            protected = stats.deferred_protected,
            draining = stats.waiting_drain,
            "Reconciliation tick complete"
        );
    }

    /// Accessor for integration tests and the admin surface.
    pub fn asg_monitors(&self) -> &AsgMonitors {
        &self.asgs
    }

    /// Select and mark victims in every group with surplus capacity.
    ///
    /// Victims are the oldest unmarked instances (launch time ascending,
    /// instance id as the tie-break). The mark is persisted as a cloud tag
    /// before the in-memory flag flips, so a restart re-discovers it; if
    /// tagging fails the instance stays unmarked and is re-selected next
    /// tick.
    async fn mark_victims(&mut self) -> usize {
        let mut victims: Vec<(String, String)> = Vec::new();
        for asg in self.asgs.all() {
            let undesired = asg.num_undesired_instances();
            if undesired == 0 {
                continue;
            }
            info!(
                asg_name = %asg.name,
                undesired,
                desired_capacity = asg.desired_capacity,
                instances = asg.instances.len(),
                "Group has more instances than desired; selecting victims"
            );

            let mut candidates = asg.unmarked_instances();
            candidates.sort_by(|a, b| {
                a.launch_time
                    .cmp(&b.launch_time)
                    .then_with(|| a.instance_id.cmp(&b.instance_id))
            });
            victims.extend(
                candidates
                    .into_iter()
                    .take(undesired)
                    .map(|i| (asg.name.clone(), i.instance_id.clone())),
            );
        }

        let mut marked = 0;
        for (asg_name, instance_id) in victims {
            match self
                .cloud
                .tag_instance(&instance_id, &self.death_node_mark, "true")
                .await
            {
                Ok(()) => {
                    self.asgs.mark_instance(&asg_name, &instance_id);
                    info!(
                        asg_name = %asg_name,
                        instance_id = %instance_id,
                        "Marked instance for removal"
                    );
                    marked += 1;
                }
                Err(err) => warn!(
                    instance_id = %instance_id,
                    error = %err,
                    "Failed to persist removal mark; instance stays unmarked this tick"
                ),
            }
        }
        marked
    }

    /// Request scheduler maintenance for every marked instance whose agent
    /// is known. Covers previously marked instances too, so a restarted
    /// engine re-establishes maintenance for marks recovered from tags.
    async fn cordon_marked(&self) {
        let mut hosts: HashMap<String, String> = HashMap::new();
        for asg in self.asgs.all() {
            for instance in asg.marked_instances() {
                match self.mesos.agent_by_ip(&instance.private_ip) {
                    Some(agent) if !agent.hostname.is_empty() => {
                        hosts.insert(agent.hostname.clone(), instance.private_ip.clone());
                    }
                    Some(_) => warn!(
                        instance_id = %instance.instance_id,
                        "Agent has no hostname; cannot schedule maintenance for it"
                    ),
                    None => debug!(
                        instance_id = %instance.instance_id,
                        ip = %instance.private_ip,
                        "No agent registered at instance IP; skipping maintenance"
                    ),
                }
            }
        }

        if hosts.is_empty() {
            return;
        }
        if let Err(err) = self.mesos.set_agents_in_maintenance(&hosts).await {
            warn!(
                error = %err,
                hosts = hosts.len(),
                "Failed to schedule maintenance; retrying next tick"
            );
        }
    }

    /// Drive every marked instance forward: stay while protected, stay
    /// while tasks run, otherwise detach, terminate, and evict.
    async fn advance_marked(&mut self) -> TickStats {
        let mut stats = TickStats::default();

        let mut marked: Vec<(String, String, String)> = Vec::new();
        for asg in self.asgs.all() {
            for instance in asg.marked_instances() {
                marked.push((
                    asg.name.clone(),
                    instance.instance_id.clone(),
                    instance.private_ip.clone(),
                ));
            }
        }

        for (asg_name, instance_id, private_ip) in marked {
            if let Some(reason) = self.mesos.is_protected(&private_ip) {
                info!(
                    asg_name = %asg_name,
                    instance_id = %instance_id,
                    reason = %reason,
                    "Instance is protected; deferring removal"
                );
                stats.deferred_protected += 1;
                continue;
            }

            let draining = self
                .mesos
                .agent_by_ip(&private_ip)
                .map(|agent| self.mesos.has_running_tasks(&agent.id))
                .unwrap_or(false);
            if draining {
                debug!(
                    instance_id = %instance_id,
                    "Instance still has running tasks; waiting for natural drain"
                );
                stats.waiting_drain += 1;
                continue;
            }

            match self.cloud.detach_instance(&asg_name, &instance_id).await {
                Ok(()) => {}
                Err(CloudError::NotFound(_)) | Err(CloudError::PreconditionFailed(_)) => {
                    debug!(
                        instance_id = %instance_id,
                        "Instance already outside the group"
                    );
                }
                Err(err) => {
                    warn!(
                        instance_id = %instance_id,
                        error = %err,
                        "Failed to detach instance; retrying next tick"
                    );
                    continue;
                }
            }

            match self.cloud.terminate_instance(&instance_id).await {
                Ok(()) => {
                    info!(
                        asg_name = %asg_name,
                        instance_id = %instance_id,
                        "Instance detached and terminated"
                    );
                    self.asgs.remove_instance(&asg_name, &instance_id);
                    stats.terminated += 1;
                }
                Err(CloudError::NotFound(_)) => {
                    debug!(instance_id = %instance_id, "Instance already terminated");
                    self.asgs.remove_instance(&asg_name, &instance_id);
                    stats.terminated += 1;
                }
                Err(err) => {
                    warn!(
                        instance_id = %instance_id,
                        error = %err,
                        "Failed to terminate instance; retrying next tick"
                    );
                }
            }
        }

        stats
    }

    fn publish_status(&self) {
        let status = EngineStatus {
            last_tick_at: Some(Utc::now()),
            asgs: self
                .asgs
                .all()
                .map(|asg| AsgStatus {
                    name: asg.name.clone(),
                    desired_capacity: asg.desired_capacity,
                    instance_count: asg.instances.len(),
                    marked_count: asg.marked_instances().len(),
                })
                .collect(),
        };
        // Nobody listening is fine; the snapshot is best-effort.
        let _ = self.status_tx.send(status);
    }
}
