//! Workflow error taxonomy.

use thiserror::Error;

use crate::types::{PartId, PartsIssueItemId, PartsIssueStatus, WorkflowAction};

/// Errors raised by parts-issue operations.
///
/// Every operation is all-or-nothing: when one of these is returned the
/// aggregate is left exactly as it was.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    /// Malformed input (empty item list, missing serial number, non-positive quantity).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An item id that does not belong to the request.
    #[error("item {0} does not belong to this request")]
    UnknownItem(PartsIssueItemId),

    /// The operation is not permitted from the current status.
    #[error("cannot {action} a request in status {status}")]
    InvalidState {
        action: WorkflowAction,
        status: PartsIssueStatus,
    },

    /// A quantity would break `issued <= approved <= requested`.
    #[error("item {item_id}: quantity {requested} exceeds the {available} available")]
    QuantityExceeded {
        item_id: PartsIssueItemId,
        requested: i32,
        available: i32,
    },

    /// The caller acted on a stale copy of the request.
    #[error("request changed since it was read (expected version {expected}, current {actual})")]
    ConcurrencyConflict { expected: i32, actual: i32 },

    /// Approval asked for more than is on hand.
    #[error("part {part_id}: approving {requested} but only {available} in stock")]
    InsufficientStock {
        part_id: PartId,
        requested: i32,
        available: i32,
    },

    /// A line needs a sub-PO number that the caller did not allocate.
    #[error("no sub-PO number was allocated for item {0}")]
    MissingSubPoNumber(PartsIssueItemId),
}

impl WorkflowError {
    /// Shorthand for a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Stable machine-readable code for API clients.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) | Self::UnknownItem(_) => "validation_error",
            Self::InvalidState { .. } => "invalid_state",
            Self::QuantityExceeded { .. } => "quantity_exceeded",
            Self::ConcurrencyConflict { .. } => "concurrency_conflict",
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::MissingSubPoNumber(_) => "internal_error",
        }
    }
}
