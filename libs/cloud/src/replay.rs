//! Record-replay cloud client for tests.
//!
//! Read operations are replayed from JSON fixtures on disk: every method
//! owns a FIFO queue of scenario names, and each call pops one and loads
//! `<records>/<scenario>/<Method>.json`. Mutating operations succeed and
//! are recorded (method plus arguments, in call order) so tests can
//! assert on the exact sequence of side effects.
//!
//! Exhausting a queue or pointing at a missing fixture is a test-author
//! error and panics.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::{AsgDescription, CloudClient, CloudError, InstanceDescription};

/// One recorded mutating call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: String,
    pub args: Vec<String>,
}

/// Replay-from-fixtures implementation of [`CloudClient`].
pub struct ReplayClient {
    records_dir: PathBuf,
    queues: Mutex<HashMap<String, VecDeque<String>>>,
    failures: Mutex<HashMap<String, VecDeque<CloudError>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ReplayClient {
    pub fn new(records_dir: impl Into<PathBuf>) -> Self {
        Self {
            records_dir: records_dir.into(),
            queues: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue scenario names for a replayed method, in call order.
    pub fn with_records(self, method: &str, scenarios: &[&str]) -> Self {
        {
            let mut queues = self.queues.lock().unwrap();
            let queue = queues.entry(method.to_string()).or_default();
            queue.extend(scenarios.iter().map(|s| s.to_string()));
        }
        self
    }

    /// Make the next call to `method` fail with `error` instead of
    /// replaying or recording.
    pub fn with_failure(self, method: &str, error: CloudError) -> Self {
        self.failures
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(error);
        self
    }

    /// All mutating calls observed so far, in order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Argument lists of the recorded calls to one method.
    pub fn requests_for(&self, method: &str) -> Vec<Vec<String>> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method == method)
            .map(|r| r.args.clone())
            .collect()
    }

    fn take_failure(&self, method: &str) -> Option<CloudError> {
        self.failures
            .lock()
            .unwrap()
            .get_mut(method)
            .and_then(VecDeque::pop_front)
    }

    fn replay<T: DeserializeOwned>(&self, method: &str) -> T {
        let scenario = {
            let mut queues = self.queues.lock().unwrap();
            let queue = queues
                .get_mut(method)
                .unwrap_or_else(|| panic!("replay method {method} called but has no records"));
            queue
                .pop_front()
                .unwrap_or_else(|| panic!("replay queue for {method} is exhausted"))
        };

        let path = self
            .records_dir
            .join(&scenario)
            .join(format!("{method}.json"));
        let raw = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read replay fixture {}: {e}", path.display()));
        serde_json::from_str(&raw)
            .unwrap_or_else(|e| panic!("invalid replay fixture {}: {e}", path.display()))
    }

    fn record(&self, method: &str, args: &[&str]) {
        self.requests.lock().unwrap().push(RecordedRequest {
            method: method.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        });
    }
}

#[async_trait]
impl CloudClient for ReplayClient {
    async fn describe_asgs_matching(
        &self,
        _prefix: &str,
    ) -> Result<Vec<AsgDescription>, CloudError> {
        if let Some(err) = self.take_failure("DescribeAsgsMatching") {
            return Err(err);
        }
        Ok(self.replay("DescribeAsgsMatching"))
    }

    async fn describe_instance(
        &self,
        _instance_id: &str,
    ) -> Result<InstanceDescription, CloudError> {
        if let Some(err) = self.take_failure("DescribeInstance") {
            return Err(err);
        }
        Ok(self.replay("DescribeInstance"))
    }

    async fn set_instance_protection(
        &self,
        asg_name: &str,
        instance_ids: &[String],
    ) -> Result<(), CloudError> {
        if let Some(err) = self.take_failure("SetInstanceProtection") {
            return Err(err);
        }
        let mut args = vec![asg_name];
        args.extend(instance_ids.iter().map(String::as_str));
        self.record("SetInstanceProtection", &args);
        Ok(())
    }

    async fn tag_instance(
        &self,
        instance_id: &str,
        key: &str,
        value: &str,
    ) -> Result<(), CloudError> {
        if let Some(err) = self.take_failure("TagInstance") {
            return Err(err);
        }
        self.record("TagInstance", &[instance_id, key, value]);
        Ok(())
    }

    async fn detach_instance(
        &self,
        asg_name: &str,
        instance_id: &str,
    ) -> Result<(), CloudError> {
        if let Some(err) = self.take_failure("DetachInstance") {
            return Err(err);
        }
        self.record("DetachInstance", &[asg_name, instance_id]);
        Ok(())
    }

    async fn terminate_instance(&self, instance_id: &str) -> Result<(), CloudError> {
        if let Some(err) = self.take_failure("TerminateInstance") {
            return Err(err);
        }
        self.record("TerminateInstance", &[instance_id]);
        Ok(())
    }
}
