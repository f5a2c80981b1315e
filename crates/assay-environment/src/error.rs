//! Error types for resource provisioning
//!
//! Provides the two failure modes of the environment:
//! - [`EnvironmentError::Missing`] - resource type not offered (configuration error)
//! - [`EnvironmentError::Unavailable`] - exclusive resource not held or not
//!   acquired in time

/// Resource provisioning error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvironmentError {
    /// The environment does not offer this resource
    #[error("resource '{0}' is not offered by the environment")]
    Missing(String),

    /// The resource is offered but could not be obtained
    #[error("resource '{id}' is unavailable: {reason}")]
    Unavailable { id: String, reason: Unavailability },
}

impl EnvironmentError {
    /// Check if the operation may succeed when retried
    ///
    /// Only [`EnvironmentError::Unavailable`] is retryable, and only after the
    /// caller has released what it already holds.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    /// Id of the resource involved
    #[must_use]
    pub fn resource_id(&self) -> &str {
        match self {
            Self::Missing(id) | Self::Unavailable { id, .. } => id,
        }
    }
}

/// Why an offered resource could not be obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Unavailability {
    /// Acquisition did not complete before the deadline
    #[error("not acquired within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The environment was shut down
    #[error("environment closed")]
    Closed,

    /// Requested from a lease that does not hold it
    #[error("not held by this lease")]
    NotHeld,
}
