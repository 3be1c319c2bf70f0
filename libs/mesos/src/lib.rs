//! Mesos master API contract for the reaper downscaler.
//!
//! The engine reads three snapshots from the master (frameworks, agents,
//! and tasks; agents are "slaves" on the wire) and issues one mutation:
//! scheduling maintenance for the agents of instances chosen to die,
//! which stops new task placement while existing tasks finish.
//!
//! [`client::HttpMesosClient`] talks to a real master; [`mock::MockMesosClient`]
//! serves programmable snapshots and records maintenance calls for tests.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

pub mod client;
pub mod mock;
mod types;

pub use client::HttpMesosClient;
pub use mock::MockMesosClient;
pub use types::{agent_ip_from_pid, Agent, Framework, Label, Task, TASK_RUNNING};

/// Errors surfaced by [`MesosClient`] implementations.
#[derive(Debug, Clone, Error)]
pub enum MesosError {
    /// Network failure, timeout, or a 5xx from the master. Retried on the
    /// next refresh.
    #[error("transient mesos error: {0}")]
    Transient(String),

    /// The master answered with something we could not interpret.
    #[error("malformed mesos response: {0}")]
    Malformed(String),
}

/// Scheduler operations used by the downscaler.
///
/// The list operations are read-only snapshots; only
/// `set_agents_in_maintenance` mutates, and it is idempotent per host
/// within a maintenance window.
#[async_trait]
pub trait MesosClient: Send + Sync {
    async fn list_frameworks(&self) -> Result<Vec<Framework>, MesosError>;

    async fn list_agents(&self) -> Result<Vec<Agent>, MesosError>;

    async fn list_tasks(&self) -> Result<Vec<Task>, MesosError>;

    /// Put the given `{hostname: ip}` machines into maintenance.
    async fn set_agents_in_maintenance(
        &self,
        hosts: &HashMap<String, String>,
    ) -> Result<(), MesosError>;
}
