//! Cloud provider contract for the reaper downscaler.
//!
//! The engine never talks to the cloud directly; everything goes through
//! the [`CloudClient`] trait:
//!
//! - **Describe**: autoscaling groups matching a name prefix, and single
//!   instances (IP, launch time, tags).
//! - **Protect**: enable scale-in protection so the cloud cannot race the
//!   engine on victim selection.
//! - **Remove**: tag an instance as chosen to die, detach it from its
//!   group, terminate it.
//!
//! Two implementations are provided: [`aws::AwsClient`] over the official
//! AWS SDK, and [`replay::ReplayClient`], a record-replay harness that
//! serves canned JSON fixtures and records mutating calls for assertions.
//!
//! # Invariants
//!
//! - All mutating operations are idempotent; retrying a call that already
//!   took effect maps to `Ok` or a terminal error kind, never to a second
//!   side effect.
//! - Detaching never decrements the group's desired capacity.

use async_trait::async_trait;

pub mod aws;
mod error;
pub mod replay;
mod types;

pub use error::CloudError;
pub use replay::{RecordedRequest, ReplayClient};
pub use types::{AsgDescription, AsgInstance, InstanceDescription};

/// Cloud provider operations used by the downscaler.
#[async_trait]
pub trait CloudClient: Send + Sync {
    /// Return every autoscaling group whose name starts with `prefix`,
    /// each with its full instance list.
    async fn describe_asgs_matching(
        &self,
        prefix: &str,
    ) -> Result<Vec<AsgDescription>, CloudError>;

    /// Describe a single instance: private IP, launch time, state, tags.
    ///
    /// Fails with [`CloudError::NotFound`] when the instance is gone;
    /// callers treat that as terminal and evict.
    async fn describe_instance(&self, instance_id: &str)
        -> Result<InstanceDescription, CloudError>;

    /// Enable scale-in protection on the group and on the given instances.
    async fn set_instance_protection(
        &self,
        asg_name: &str,
        instance_ids: &[String],
    ) -> Result<(), CloudError>;

    /// Apply a tag to an instance. Used to persist the deathnode mark so
    /// victim selection survives engine restarts.
    async fn tag_instance(
        &self,
        instance_id: &str,
        key: &str,
        value: &str,
    ) -> Result<(), CloudError>;

    /// Remove an instance from its autoscaling group without terminating
    /// it and without decrementing desired capacity.
    async fn detach_instance(&self, asg_name: &str, instance_id: &str)
        -> Result<(), CloudError>;

    /// Terminate an instance. Terminating an already-terminated instance
    /// surfaces as [`CloudError::NotFound`].
    async fn terminate_instance(&self, instance_id: &str) -> Result<(), CloudError>;
}
