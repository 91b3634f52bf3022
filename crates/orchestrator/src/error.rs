//! Error taxonomy (§7): `ValidationError`, `UpdateError`, `UpstreamError`,
//! `InternalError`. Validation and planning errors never touch the cluster;
//! execution errors abort the remaining procedures and are attached to the
//! history record.

use thiserror::Error;

/// Malformed change request. No side effects have occurred yet; multiple
/// validation failures across a batch are accumulated into one aggregate.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("change at index {index}: {reason}")]
    Invalid { index: usize, reason: String },

    #[error("{0} invalid change(s): {1}")]
    Aggregate(usize, String),
}

impl ValidationError {
    pub fn aggregate(errors: Vec<ValidationError>) -> Self {
        let summary = errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; ");
        ValidationError::Aggregate(errors.len(), summary)
    }
}

/// Semantically invalid plan: unknown service/instance/server, a conflict
/// between two changes, an unhandled change after coordination, or a
/// tripped safety gate.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("unknown service: {0}")]
    UnknownService(String),

    #[error("unknown instance: {0}")]
    UnknownInstance(String),

    #[error("unknown server: {0}")]
    UnknownServer(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("do not support the following changes: {0}")]
    UnsupportedChanges(String),

    #[error("safety gate: {0}")]
    SafetyGate(String),

    #[error("HA setup error: {0}")]
    HaSetupError(String),

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),
}

/// Failure from an external collaborator; carries which upstream and what
/// it said, per the "carries provenance" requirement.
#[derive(Debug, Error)]
#[error("upstream error from {upstream} during {operation}: {detail}")]
pub struct UpstreamError {
    pub upstream: String,
    pub operation: String,
    pub detail: String,
}

impl UpstreamError {
    pub fn new(upstream: impl Into<String>, operation: impl Into<String>, detail: impl std::fmt::Display) -> Self {
        Self { upstream: upstream.into(), operation: operation.into(), detail: detail.to_string() }
    }
}

/// Filesystem / lock / unexpected-state errors; carries the cause chain.
#[derive(Debug, Error)]
pub enum InternalError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("unsupported plan format version: {0}")]
    UnsupportedPlanVersion(u32),

    #[error("lock error: {0}")]
    Lock(String),

    #[error("unexpected state: {0}")]
    Unexpected(String),
}

/// The single error type threaded through the orchestrator's public API,
/// unifying the four-way taxonomy above plus `ResourceNotFound`, the one
/// "soft" error the image store raises and callers handle inline (§7).
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Update(#[from] UpdateError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Internal(#[from] InternalError),

    #[error("resource not found: {0}")]
    ResourceNotFound(String),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
