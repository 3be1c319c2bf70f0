//! Programmable mock for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{Agent, Framework, MesosClient, MesosError, Task};

/// Mock master serving fixed snapshots.
///
/// Snapshots can be swapped between ticks (e.g. to let a task "finish"),
/// and every maintenance call is recorded for assertions.
#[derive(Default)]
pub struct MockMesosClient {
    frameworks: Mutex<Vec<Framework>>,
    agents: Mutex<Vec<Agent>>,
    tasks: Mutex<Vec<Task>>,
    fail_tasks: AtomicBool,
    maintenance_calls: Mutex<Vec<HashMap<String, String>>>,
}

impl MockMesosClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_frameworks(&self, frameworks: Vec<Framework>) {
        *self.frameworks.lock().unwrap() = frameworks;
    }

    pub fn set_agents(&self, agents: Vec<Agent>) {
        *self.agents.lock().unwrap() = agents;
    }

    pub fn set_tasks(&self, tasks: Vec<Task>) {
        *self.tasks.lock().unwrap() = tasks;
    }

    /// Make `list_tasks` fail until reset.
    pub fn fail_tasks(&self, fail: bool) {
        self.fail_tasks.store(fail, Ordering::SeqCst);
    }

    /// Every `{hostname: ip}` map passed to maintenance, in call order.
    pub fn maintenance_calls(&self) -> Vec<HashMap<String, String>> {
        self.maintenance_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MesosClient for MockMesosClient {
    async fn list_frameworks(&self) -> Result<Vec<Framework>, MesosError> {
        Ok(self.frameworks.lock().unwrap().clone())
    }

    async fn list_agents(&self) -> Result<Vec<Agent>, MesosError> {
        Ok(self.agents.lock().unwrap().clone())
    }

    async fn list_tasks(&self) -> Result<Vec<Task>, MesosError> {
        if self.fail_tasks.load(Ordering::SeqCst) {
            return Err(MesosError::Transient("mock configured to fail".into()));
        }
        Ok(self.tasks.lock().unwrap().clone())
    }

    async fn set_agents_in_maintenance(
        &self,
        hosts: &HashMap<String, String>,
    ) -> Result<(), MesosError> {
        self.maintenance_calls.lock().unwrap().push(hosts.clone());
        Ok(())
    }
}
