//! Engine configuration (env-driven).

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};

/// Reaper configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Autoscaling-group name prefixes to watch.
    pub asg_prefixes: Vec<String>,

    /// Framework names whose tasks are never killed.
    pub protected_frameworks: Vec<String>,

    /// Label keys that protect a task when present with value `TRUE`.
    pub protected_tasks_labels: Vec<String>,

    /// Tag key used to persist victim selection across restarts.
    pub death_node_mark: String,

    /// Mesos master base URL.
    pub mesos_master_url: String,

    /// Interval between reconciliation ticks.
    pub tick_interval: Duration,

    /// Deadline applied to each individual external call.
    pub call_deadline: Duration,

    /// Soft upper bound on a whole tick; on expiry the tick is abandoned.
    pub tick_deadline: Duration,

    /// Address of the read-only admin surface.
    pub listen_addr: SocketAddr,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let asg_prefixes = parse_list(&std::env::var("REAPER_ASG_PREFIXES").context(
            "Missing ASG selectors. Set REAPER_ASG_PREFIXES (comma-separated name prefixes).",
        )?);
        if asg_prefixes.is_empty() {
            anyhow::bail!("REAPER_ASG_PREFIXES must name at least one prefix");
        }

        let protected_frameworks = env_list("REAPER_PROTECTED_FRAMEWORKS");
        let protected_tasks_labels = env_list("REAPER_PROTECTED_TASKS_LABELS");

        let death_node_mark = std::env::var("REAPER_DEATH_NODE_MARK")
            .unwrap_or_else(|_| "DEATH_NODE_MARK".to_string());

        let mesos_master_url = std::env::var("REAPER_MESOS_MASTER_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:5050".to_string());

        let tick_interval = env_duration_secs("REAPER_TICK_INTERVAL_SECS", 30)?;
        let call_deadline = env_duration_secs("REAPER_CALL_DEADLINE_SECS", 10)?;
        let tick_deadline = env_duration_secs("REAPER_TICK_DEADLINE_SECS", 300)?;

        let listen_addr = std::env::var("REAPER_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()
            .context("REAPER_LISTEN_ADDR must be a socket address.")?;

        let log_level = std::env::var("REAPER_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            asg_prefixes,
            protected_frameworks,
            protected_tasks_labels,
            death_node_mark,
            mesos_master_url,
            tick_interval,
            call_deadline,
            tick_deadline,
            listen_addr,
            log_level,
        })
    }
}

fn env_list(name: &str) -> Vec<String> {
    std::env::var(name)
        .map(|value| parse_list(&value))
        .unwrap_or_default()
}

fn env_duration_secs(name: &str, default: u64) -> Result<Duration> {
    let secs = std::env::var(name)
        .ok()
        .map(|value| value.parse::<u64>())
        .transpose()
        .with_context(|| format!("{name} must be an integer (seconds)."))?
        .unwrap_or(default);
    Ok(Duration::from_secs(secs))
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list_trims_and_drops_empties() {
        assert_eq!(
            parse_list("web, api ,,batch"),
            vec!["web".to_string(), "api".to_string(), "batch".to_string()]
        );
        assert!(parse_list("").is_empty());
        assert!(parse_list(" , ").is_empty());
    }
}
