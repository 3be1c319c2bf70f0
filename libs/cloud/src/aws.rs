//! AWS implementation of the cloud contract.
//!
//! Autoscaling-group operations go through the Auto Scaling API; instance
//! describe/tag/terminate go through EC2. Every operation carries the
//! configured per-call deadline via the SDK's operation timeout.

use std::time::Duration;

use async_trait::async_trait;
use aws_config::timeout::TimeoutConfig;
use aws_config::BehaviorVersion;
use aws_sdk_autoscaling::error::ProvideErrorMetadata;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::{AsgDescription, AsgInstance, CloudClient, CloudError, InstanceDescription};

/// SetInstanceProtection accepts at most 50 instance ids per call.
const MAX_PROTECTION_BATCH: usize = 50;

/// Cloud client backed by the AWS SDK.
pub struct AwsClient {
    autoscaling: aws_sdk_autoscaling::Client,
    ec2: aws_sdk_ec2::Client,
}

impl AwsClient {
    /// Build a client from the ambient AWS environment (credentials chain,
    /// region resolution) with `call_deadline` as the operation timeout.
    pub async fn new(call_deadline: Duration) -> Self {
        let timeouts = TimeoutConfig::builder()
            .operation_timeout(call_deadline)
            .build();

        let config = aws_config::defaults(BehaviorVersion::latest())
            .timeout_config(timeouts)
            .load()
            .await;

        Self {
            autoscaling: aws_sdk_autoscaling::Client::new(&config),
            ec2: aws_sdk_ec2::Client::new(&config),
        }
    }
}

#[async_trait]
impl CloudClient for AwsClient {
    async fn describe_asgs_matching(
        &self,
        prefix: &str,
    ) -> Result<Vec<AsgDescription>, CloudError> {
        // The API cannot filter by name prefix; list everything through
        // the paginator and match client-side.
        let mut pages = self
            .autoscaling
            .describe_auto_scaling_groups()
            .into_paginator()
            .send();

        let mut matched = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| map_sdk_error("DescribeAutoScalingGroups", e))?;
            for group in page.auto_scaling_groups() {
                let Some(name) = group.auto_scaling_group_name() else {
                    continue;
                };
                if !name.starts_with(prefix) {
                    continue;
                }

                let instances = group
                    .instances()
                    .iter()
                    .filter_map(|i| {
                        Some(AsgInstance {
                            instance_id: i.instance_id()?.to_string(),
                            lifecycle_state: i
                                .lifecycle_state()
                                .map(|s| s.as_str().to_string())
                                .unwrap_or_default(),
                        })
                    })
                    .collect();

                matched.push(AsgDescription {
                    name: name.to_string(),
                    desired_capacity: group.desired_capacity().unwrap_or(0).max(0) as u32,
                    new_instances_protected: group
                        .new_instances_protected_from_scale_in()
                        .unwrap_or(false),
                    instances,
                });
            }
        }

        debug!(prefix, matched = matched.len(), "Described autoscaling groups");
        Ok(matched)
    }

    async fn describe_instance(
        &self,
        instance_id: &str,
    ) -> Result<InstanceDescription, CloudError> {
        let output = self
            .ec2
            .describe_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .map_err(|e| map_sdk_error("DescribeInstances", e))?;

        let instance = output
            .reservations()
            .iter()
            .flat_map(|r| r.instances())
            .find(|i| i.instance_id() == Some(instance_id))
            .ok_or_else(|| {
                CloudError::NotFound(format!("instance {instance_id} not in describe response"))
            })?;

        let private_ip = instance
            .private_ip_address()
            .ok_or_else(|| {
                CloudError::Malformed(format!("instance {instance_id} has no private IP"))
            })?
            .to_string();

        let launch_time = instance
            .launch_time()
            .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos()))
            .ok_or_else(|| {
                CloudError::Malformed(format!("instance {instance_id} has no launch time"))
            })?;

        let lifecycle_state = instance
            .state()
            .and_then(|s| s.name())
            .map(|n| n.as_str().to_string())
            .unwrap_or_default();

        let tags = instance
            .tags()
            .iter()
            .filter_map(|t| {
                Some((
                    t.key()?.to_string(),
                    t.value().unwrap_or_default().to_string(),
                ))
            })
            .collect();

        Ok(InstanceDescription {
            instance_id: instance_id.to_string(),
            private_ip,
            launch_time,
            lifecycle_state,
            tags,
        })
    }

    async fn set_instance_protection(
        &self,
        asg_name: &str,
        instance_ids: &[String],
    ) -> Result<(), CloudError> {
        self.autoscaling
            .update_auto_scaling_group()
            .auto_scaling_group_name(asg_name)
            .new_instances_protected_from_scale_in(true)
            .send()
            .await
            .map_err(|e| map_sdk_error("UpdateAutoScalingGroup", e))?;

        for chunk in instance_ids.chunks(MAX_PROTECTION_BATCH) {
            self.autoscaling
                .set_instance_protection()
                .auto_scaling_group_name(asg_name)
                .set_instance_ids(Some(chunk.to_vec()))
                .protected_from_scale_in(true)
                .send()
                .await
                .map_err(|e| map_sdk_error("SetInstanceProtection", e))?;
        }

        debug!(asg_name, instances = instance_ids.len(), "Enabled scale-in protection");
        Ok(())
    }

    async fn tag_instance(
        &self,
        instance_id: &str,
        key: &str,
        value: &str,
    ) -> Result<(), CloudError> {
        self.ec2
            .create_tags()
            .resources(instance_id)
            .tags(
                aws_sdk_ec2::types::Tag::builder()
                    .key(key)
                    .value(value)
                    .build(),
            )
            .send()
            .await
            .map_err(|e| map_sdk_error("CreateTags", e))?;

        Ok(())
    }

    async fn detach_instance(
        &self,
        asg_name: &str,
        instance_id: &str,
    ) -> Result<(), CloudError> {
        self.autoscaling
            .detach_instances()
            .auto_scaling_group_name(asg_name)
            .instance_ids(instance_id)
            .should_decrement_desired_capacity(false)
            .send()
            .await
            .map_err(|e| map_sdk_error("DetachInstances", e))?;

        Ok(())
    }

    async fn terminate_instance(&self, instance_id: &str) -> Result<(), CloudError> {
        self.ec2
            .terminate_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .map_err(|e| map_sdk_error("TerminateInstances", e))?;

        Ok(())
    }
}

/// Map an SDK error onto the engine's taxonomy.
///
/// Unknown codes land on `Transient` so the reconciler retries them next
/// tick; only codes with terminal meaning get terminal variants.
fn map_sdk_error<E>(operation: &str, err: E) -> CloudError
where
    E: ProvideErrorMetadata + std::fmt::Display,
{
    let code = err.code().unwrap_or_default();

    if code.contains("NotFound") {
        return CloudError::NotFound(format!("{operation}: {err}"));
    }
    if matches!(
        code,
        "Throttling" | "ThrottlingException" | "RequestLimitExceeded"
    ) {
        return CloudError::Transient(format!("{operation}: {err}"));
    }
    // DetachInstances reports a non-member instance as a validation error.
    if code == "ValidationError" {
        return CloudError::PreconditionFailed(format!("{operation}: {err}"));
    }

    CloudError::Transient(format!("{operation}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_autoscaling::error::ErrorMetadata;

    struct FakeError(ErrorMetadata);

    impl ProvideErrorMetadata for FakeError {
        fn meta(&self) -> &ErrorMetadata {
            &self.0
        }
    }

    impl std::fmt::Display for FakeError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0.code().unwrap_or("unknown"))
        }
    }

    fn fake(code: &str) -> FakeError {
        FakeError(ErrorMetadata::builder().code(code).build())
    }

    #[test]
    fn test_not_found_codes_map_to_not_found() {
        let err = map_sdk_error("DescribeInstances", fake("InvalidInstanceID.NotFound"));
        assert!(matches!(err, CloudError::NotFound(_)));
    }

    #[test]
    fn test_throttling_maps_to_transient() {
        let err = map_sdk_error("DescribeAutoScalingGroups", fake("Throttling"));
        assert!(err.is_transient());
    }

    #[test]
    fn test_validation_error_maps_to_precondition() {
        let err = map_sdk_error("DetachInstances", fake("ValidationError"));
        assert!(matches!(err, CloudError::PreconditionFailed(_)));
    }

    #[test]
    fn test_unknown_code_is_retried() {
        let err = map_sdk_error("TerminateInstances", fake("InternalFailure"));
        assert!(err.is_transient());
    }
}
