//! HTTP client for the Mesos master.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Agent, Framework, MesosClient, MesosError, Task};

/// Client for the master's operator endpoints.
pub struct HttpMesosClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMesosClient {
    /// Create a client for `master_url` (e.g. `http://10.0.0.1:5050`) with
    /// `call_deadline` applied to every request.
    pub fn new(master_url: &str, call_deadline: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(call_deadline)
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: master_url.trim_end_matches('/').to_string(),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, MesosError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "Fetching mesos snapshot");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| MesosError::Transient(format!("GET {url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                MesosError::Transient(format!("GET {url}: {status} - {body}"))
            } else {
                MesosError::Malformed(format!("GET {url}: {status} - {body}"))
            });
        }

        response
            .json()
            .await
            .map_err(|e| MesosError::Malformed(format!("GET {url}: {e}")))
    }
}

#[async_trait]
impl MesosClient for HttpMesosClient {
    async fn list_frameworks(&self) -> Result<Vec<Framework>, MesosError> {
        let response: FrameworksResponse = self.get_json("/master/frameworks").await?;
        Ok(response.frameworks)
    }

    async fn list_agents(&self) -> Result<Vec<Agent>, MesosError> {
        let response: AgentsResponse = self.get_json("/master/slaves").await?;
        Ok(response.slaves)
    }

    async fn list_tasks(&self) -> Result<Vec<Task>, MesosError> {
        let response: TasksResponse = self.get_json("/master/tasks").await?;
        Ok(response.tasks)
    }

    async fn set_agents_in_maintenance(
        &self,
        hosts: &HashMap<String, String>,
    ) -> Result<(), MesosError> {
        let url = format!("{}/master/maintenance/schedule", self.base_url);
        let schedule = MaintenanceSchedule::for_hosts(hosts);
        debug!(url = %url, hosts = hosts.len(), "Scheduling maintenance");

        let response = self
            .client
            .post(&url)
            .json(&schedule)
            .send()
            .await
            .map_err(|e| MesosError::Transient(format!("POST {url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                MesosError::Transient(format!("POST {url}: {status} - {body}"))
            } else {
                MesosError::Malformed(format!("POST {url}: {status} - {body}"))
            });
        }

        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct FrameworksResponse {
    frameworks: Vec<Framework>,
}

#[derive(Debug, Deserialize)]
struct AgentsResponse {
    slaves: Vec<Agent>,
}

#[derive(Debug, Deserialize)]
struct TasksResponse {
    tasks: Vec<Task>,
}

/// Maintenance schedule posted to the master. One window covering every
/// machine, starting now.
#[derive(Debug, Serialize)]
struct MaintenanceSchedule {
    windows: Vec<MaintenanceWindow>,
}

#[derive(Debug, Serialize)]
struct MaintenanceWindow {
    machine_ids: Vec<MachineId>,
    unavailability: Unavailability,
}

#[derive(Debug, Serialize)]
struct MachineId {
    hostname: String,
    ip: String,
}

#[derive(Debug, Serialize)]
struct Unavailability {
    start: TimeSpec,
}

#[derive(Debug, Serialize)]
struct TimeSpec {
    nanoseconds: i64,
}

impl MaintenanceSchedule {
    fn for_hosts(hosts: &HashMap<String, String>) -> Self {
        // Sorted for a deterministic payload.
        let mut machine_ids: Vec<MachineId> = hosts
            .iter()
            .map(|(hostname, ip)| MachineId {
                hostname: hostname.clone(),
                ip: ip.clone(),
            })
            .collect();
        machine_ids.sort_by(|a, b| a.hostname.cmp(&b.hostname));

        Self {
            windows: vec![MaintenanceWindow {
                machine_ids,
                unavailability: Unavailability {
                    start: TimeSpec {
                        nanoseconds: Utc::now().timestamp_nanos_opt().unwrap_or_default(),
                    },
                },
            }],
        }
    }
}
