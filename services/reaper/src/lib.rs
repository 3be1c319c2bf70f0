//! Reaper — cluster downscaler.
//!
//! When an autoscaling group's desired capacity drops below its live
//! instance count, reaper chooses which instances must go and walks each
//! one through a safe removal sequence:
//!
//! ```text
//! UNMARKED ── mark ──▶ MARKED ── cordoned ──▶ DRAINING ──▶ DETACHED ──▶ TERMINATED
//!     │                   │                       │
//!     └── (stays)         └── (stays while        └── (stays while
//!                              protected)              tasks run)
//! ```
//!
//! The engine joins two eventually-consistent views — the cloud's
//! autoscaling groups and the scheduler's agents/tasks/frameworks — and
//! never detaches or terminates an instance that hosts protected work.
//!
//! ## Modules
//!
//! - `monitor`: the two caches (cloud side and scheduler side) plus the
//!   protection oracle
//! - `reconciler`: the per-tick drain state machine
//! - `api`: read-only admin surface over the published status snapshot
//! - `config`: env-driven configuration

pub mod api;
pub mod config;
pub mod monitor;
pub mod reconciler;

pub use config::Config;
pub use reconciler::{EngineStatus, Reconciler};
