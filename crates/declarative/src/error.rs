//! Error types for graph building, planning, state access and execution.
//!
//! Graph and plan errors are fatal and surface before any provider call.
//! Node errors are scoped to a single resource and end up in the apply
//! report instead of aborting the run.

use std::time::Duration;
use thiserror::Error;

use crate::types::Reference;

/// Errors raised while building the resource graph
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// The dependency edges form a cycle
    #[error("dependency cycle: {}", .nodes.join(" -> "))]
    Cycle {
        /// Ids participating in the cycle, in traversal order
        nodes: Vec<String>,
    },

    /// Two declarations share a name
    #[error("duplicate resource: {name}")]
    DuplicateResource { name: String },
}

/// Errors raised by a state store
#[derive(Debug, Error)]
pub enum StateError {
    /// Stored data failed schema validation
    #[error("state corruption: {reason}")]
    Corruption { reason: String },

    /// The backing storage could not be read or written
    #[error("state I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A record could not be encoded for storage
    #[error("state serialization error: {0}")]
    Serialization(String),

    /// The store is unusable for another reason
    #[error("state backend error: {0}")]
    Backend(String),
}

impl StateError {
    pub fn corruption(reason: impl Into<String>) -> Self {
        Self::Corruption {
            reason: reason.into(),
        }
    }
}

/// Errors raised while planning a change set
#[derive(Debug, Error)]
pub enum PlanError {
    /// A reference or explicit dependency names an undeclared resource
    #[error("resource {from} references undeclared resource {target}")]
    DanglingReference { from: String, target: String },

    /// A replace is required but the kind forbids it while referenced
    #[error(
        "resource {id} ({kind}) must be replaced, but its kind does not allow replacement while referenced by: {}",
        .dependents.join(", ")
    )]
    ReplacePolicy {
        id: String,
        kind: String,
        dependents: Vec<String>,
    },

    /// No provider handles the resource kind
    #[error("no provider registered for kind {kind} (resource {id})")]
    UnknownKind { id: String, kind: String },

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    State(#[from] StateError),
}

/// Errors that prevent a change set from being executed at all
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("failed to create worker pool: {0}")]
    Pool(String),

    #[error("confirmation failed: {0}")]
    Confirm(String),

    #[error("no provider registered for kind {kind} (resource {id})")]
    UnknownKind { id: String, kind: String },

    #[error("change set references resource {0} which is neither declared nor recorded")]
    UnknownResource(String),

    #[error(transparent)]
    State(#[from] StateError),
}

/// Error reported by a provider operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ProviderError {
    pub message: String,
    /// Whether the provider considers the failure transient
    pub retryable: bool,
}

impl ProviderError {
    /// A permanent failure
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    /// A transient failure worth retrying
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }
}

/// Failure of a single resource during execution
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeError {
    #[error("provider error: {0}")]
    Provider(ProviderError),

    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),

    #[error("cannot resolve {reference}: {reason}")]
    Resolution { reference: Reference, reason: String },

    #[error("state write failed: {0}")]
    State(String),
}

impl NodeError {
    /// Short name of the error kind for reports
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Provider(e) if e.retryable => "provider (retryable)",
            Self::Provider(_) => "provider",
            Self::Timeout(_) => "timeout",
            Self::Resolution { .. } => "resolution",
            Self::State(_) => "state",
        }
    }
}

impl From<StateError> for NodeError {
    fn from(e: StateError) -> Self {
        Self::State(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_names_nodes() {
        let err = GraphError::Cycle {
            nodes: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "dependency cycle: a -> b -> a");
    }

    #[test]
    fn test_node_error_kind() {
        assert_eq!(
            NodeError::Provider(ProviderError::retryable("throttled")).kind(),
            "provider (retryable)"
        );
        assert_eq!(NodeError::Timeout(Duration::from_secs(1)).kind(), "timeout");
    }
}
