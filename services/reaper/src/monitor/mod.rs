//! Cached views of the two external systems.
//!
//! The engine joins an eventually-consistent cloud view (autoscaling
//! groups and their instances) with an eventually-consistent scheduler
//! view (agents, tasks, frameworks). Each side is cached by a monitor
//! that refreshes once per tick; the reconciler owns both caches
//! exclusively, so there is no locking.

pub mod autoscaling;
pub mod instance;
pub mod mesos;

pub use autoscaling::{AsgMonitors, AsgState};
pub use instance::Instance;
pub use mesos::{MesosMonitor, ProtectionReason};
