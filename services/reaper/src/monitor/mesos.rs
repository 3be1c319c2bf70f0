//! Scheduler cache and protection oracle.
//!
//! One refresh rebuilds four maps from fresh master snapshots: running
//! tasks by agent id, label-protected tasks by task name (computed in the
//! same pass), protected frameworks by id, and agents by private IP. The
//! maps make the protection predicate a pure lookup.

use std::collections::HashMap;
use std::sync::Arc;

use reaper_mesos::{agent_ip_from_pid, Agent, Framework, MesosClient, MesosError, Task};
use tracing::warn;

/// Why an instance must not be removed right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtectionReason {
    /// A task on the agent carries a protecting label.
    ProtectedTask { task_name: String },

    /// A task on the agent belongs to a protected framework.
    ProtectedFramework { framework_name: String },
}

impl std::fmt::Display for ProtectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProtectedTask { task_name } => {
                write!(f, "Task {task_name} is protected, preventing deletion")
            }
            Self::ProtectedFramework { framework_name } => {
                write!(
                    f,
                    "Framework {framework_name} is running on node, preventing deletion"
                )
            }
        }
    }
}

#[derive(Debug, Default)]
struct MesosCache {
    tasks_by_agent: HashMap<String, Vec<Task>>,
    protected_tasks_by_name: HashMap<String, Vec<Task>>,
    frameworks_by_id: HashMap<String, Framework>,
    agents_by_ip: HashMap<String, Agent>,
}

/// Cached view of the scheduler, refreshed once per tick.
pub struct MesosMonitor {
    client: Arc<dyn MesosClient>,
    protected_frameworks: Vec<String>,
    protected_tasks_labels: Vec<String>,
    cache: MesosCache,
}

impl MesosMonitor {
    pub fn new(
        client: Arc<dyn MesosClient>,
        protected_frameworks: Vec<String>,
        protected_tasks_labels: Vec<String>,
    ) -> Self {
        Self {
            client,
            protected_frameworks,
            protected_tasks_labels,
            cache: MesosCache::default(),
        }
    }

    /// Rebuild the cache from fresh snapshots. A failed fetch leaves the
    /// corresponding map(s) at their previous consistent state.
    pub async fn refresh(&mut self) {
        match self.client.list_tasks().await {
            Ok(tasks) => {
                let (by_agent, protected) = self.index_tasks(tasks);
                self.cache.tasks_by_agent = by_agent;
                self.cache.protected_tasks_by_name = protected;
            }
            Err(err) => warn!(error = %err, "Failed to list tasks; keeping cached view"),
        }

        match self.client.list_frameworks().await {
            Ok(frameworks) => {
                self.cache.frameworks_by_id = self.index_frameworks(frameworks);
            }
            Err(err) => warn!(error = %err, "Failed to list frameworks; keeping cached view"),
        }

        match self.client.list_agents().await {
            Ok(agents) => {
                self.cache.agents_by_ip = index_agents(agents);
            }
            Err(err) => warn!(error = %err, "Failed to list agents; keeping cached view"),
        }
    }

    /// Single pass over the task snapshot: running tasks grouped by agent,
    /// and the label-protected subset keyed by task name.
    fn index_tasks(
        &self,
        tasks: Vec<Task>,
    ) -> (HashMap<String, Vec<Task>>, HashMap<String, Vec<Task>>) {
        let mut by_agent: HashMap<String, Vec<Task>> = HashMap::new();
        let mut protected: HashMap<String, Vec<Task>> = HashMap::new();

        for task in tasks {
            if !task.is_running() {
                continue;
            }
            if task.has_protected_label(&self.protected_tasks_labels) {
                protected
                    .entry(task.name.clone())
                    .or_default()
                    .push(task.clone());
            }
            by_agent.entry(task.slave_id.clone()).or_default().push(task);
        }

        (by_agent, protected)
    }

    fn index_frameworks(&self, frameworks: Vec<Framework>) -> HashMap<String, Framework> {
        frameworks
            .into_iter()
            .filter(|f| self.protected_frameworks.contains(&f.name))
            .map(|f| (f.id.clone(), f))
            .collect()
    }

    /// The agent registered at `ip`, if the scheduler knows one.
    pub fn agent_by_ip(&self, ip: &str) -> Option<&Agent> {
        self.cache.agents_by_ip.get(ip)
    }

    /// True while the agent still runs any task.
    pub fn has_running_tasks(&self, agent_id: &str) -> bool {
        self.cache
            .tasks_by_agent
            .get(agent_id)
            .is_some_and(|tasks| !tasks.is_empty())
    }

    /// Is the instance at `ip` protected from removal?
    ///
    /// Label-protection is reported before framework-protection when both
    /// apply. An IP the scheduler does not know hosts no protected work by
    /// definition and answers `None`.
    pub fn is_protected(&self, ip: &str) -> Option<ProtectionReason> {
        let agent = self.cache.agents_by_ip.get(ip)?;
        let tasks = self
            .cache
            .tasks_by_agent
            .get(&agent.id)
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        for task in tasks {
            if self.cache.protected_tasks_by_name.contains_key(&task.name) {
                return Some(ProtectionReason::ProtectedTask {
                    task_name: task.name.clone(),
                });
            }
        }
        for task in tasks {
            if let Some(framework) = self.cache.frameworks_by_id.get(&task.framework_id) {
                return Some(ProtectionReason::ProtectedFramework {
                    framework_name: framework.name.clone(),
                });
            }
        }

        None
    }

    /// Put the given `{hostname: ip}` machines into maintenance so the
    /// scheduler stops placing new tasks on them.
    pub async fn set_agents_in_maintenance(
        &self,
        hosts: &HashMap<String, String>,
    ) -> Result<(), MesosError> {
        self.client.set_agents_in_maintenance(hosts).await
    }
}

fn index_agents(agents: Vec<Agent>) -> HashMap<String, Agent> {
    agents
        .into_iter()
        .filter_map(|agent| {
            let ip = agent_ip_from_pid(&agent.pid)?.to_string();
            Some((ip, agent))
        })
        .collect()
}
