//! Cloud error taxonomy.

use thiserror::Error;

/// Errors surfaced by [`crate::CloudClient`] implementations.
///
/// The reconciler keys its retry behavior off the variant, not the
/// message: `Transient` is retried next tick, `NotFound` and
/// `PreconditionFailed` are treated as a prior delete/detach having
/// already taken effect, `Malformed` skips the entity for the tick.
#[derive(Debug, Clone, Error)]
pub enum CloudError {
    /// Network failure, throttling, or a 5xx from the provider.
    #[error("transient cloud error: {0}")]
    Transient(String),

    /// The resource no longer exists.
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation's precondition does not hold (e.g. detaching an
    /// instance that is not a member of the group).
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// The provider answered with a response we could not interpret.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl CloudError {
    /// True when retrying the same call next tick may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(CloudError::Transient("throttled".into()).is_transient());
        assert!(!CloudError::NotFound("i-123".into()).is_transient());
        assert!(!CloudError::PreconditionFailed("detached".into()).is_transient());
    }

    #[test]
    fn test_display_includes_detail() {
        let err = CloudError::NotFound("i-0abc".into());
        assert_eq!(err.to_string(), "not found: i-0abc");
    }
}
