//! Error types for the scaling engine.

use thiserror::Error;

use crate::order::ExecutionResult;

/// Result type for scaling operations.
pub type Result<T> = std::result::Result<T, ScalingError>;

/// Errors that can occur while evaluating strategies and creating orders.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScalingError {
    /// Strategy configuration is invalid or ambiguous.
    #[error("invalid strategy: {reason}")]
    InvalidStrategy {
        /// Description of why the strategy is invalid.
        reason: String,
    },

    /// Engine configuration is invalid.
    #[error("invalid engine configuration: {reason}")]
    InvalidConfig {
        /// Description of why the configuration is invalid.
        reason: String,
    },

    /// Not enough daily snapshots to cover the required run length.
    #[error(
        "insufficient snapshots for cluster {cluster_id} ({resource_type}): {found} of {required} days"
    )]
    InsufficientSnapshots {
        /// Cluster the snapshots were read for.
        cluster_id: String,
        /// Resource pool the snapshots were read for.
        resource_type: String,
        /// Distinct days found.
        found: usize,
        /// Days required.
        required: u32,
    },

    /// No usable matching policy or query template id.
    #[error("invalid query template id: {reason}")]
    InvalidQueryTemplateId {
        /// Description of what was missing.
        reason: String,
    },

    /// The referenced query template does not exist.
    #[error("query template not found: {template_id}")]
    QueryTemplateNotFound {
        /// ID of the template that was not found.
        template_id: String,
    },

    /// The query template body could not be parsed.
    #[error("query template {template_id} could not be parsed: {reason}")]
    QueryTemplateUnmarshal {
        /// ID of the template.
        template_id: String,
        /// Parser error.
        reason: String,
    },

    /// Device search failed.
    #[error("device query failed: {message}")]
    DeviceQuery {
        /// Description of the search failure.
        message: String,
    },

    /// Persistence collaborator failed.
    #[error("database error: {message}")]
    Database {
        /// Description of the persistence failure.
        message: String,
    },

    /// Order header or detail could not be persisted.
    #[error("order creation failed: {message}")]
    OrderCreation {
        /// Description of the persistence failure.
        message: String,
    },

    /// Distributed lock collaborator failed.
    #[error("lock error for {key}: {message}")]
    Lock {
        /// Lock key.
        key: String,
        /// Description of the lock failure.
        message: String,
    },
}

impl ScalingError {
    /// Shorthand for a persistence failure.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    /// The history result this error is recorded as, if it is recorded at all.
    ///
    /// Lock and engine configuration errors are not tied to a single
    /// cluster/resource-type association and only reach the log.
    #[must_use]
    pub fn execution_result(&self) -> Option<ExecutionResult> {
        match self {
            Self::InvalidStrategy { .. } => Some(ExecutionResult::FailureInvalidStrategy),
            Self::InsufficientSnapshots { .. } => {
                Some(ExecutionResult::FailureNoSnapshotsForDuration)
            }
            Self::InvalidQueryTemplateId { .. } => {
                Some(ExecutionResult::FailureInvalidQueryTemplateId)
            }
            Self::QueryTemplateNotFound { .. } => {
                Some(ExecutionResult::FailureQueryTemplateNotFound)
            }
            Self::QueryTemplateUnmarshal { .. } => {
                Some(ExecutionResult::FailureQueryTemplateUnmarshalError)
            }
            Self::DeviceQuery { .. } => Some(ExecutionResult::FailureDeviceQueryError),
            Self::Database { .. } => Some(ExecutionResult::FailureDbError),
            Self::OrderCreation { .. } => Some(ExecutionResult::FailureOrderCreationFailed),
            Self::InvalidConfig { .. } | Self::Lock { .. } => None,
        }
    }
}
