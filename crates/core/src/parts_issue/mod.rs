//! The parts-issue request aggregate.
//!
//! A request moves a technician's list of parts from creation, through
//! service-center and central-admin approval, to dispatch. All mutation goes
//! through the methods in [`approval`] and [`dispatch`]; each one either
//! applies completely and returns a [`Transition`] for the audit trail, or
//! returns a [`WorkflowError`] and leaves the request untouched.
//!
//! Per-item quantities always satisfy
//! `0 <= issued_qty <= approved_qty <= requested_qty`.

pub mod approval;
pub mod dispatch;
pub mod error;
pub mod intake;
pub mod projection;
pub mod stock;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{
    JobCardId, PartId, PartsIssueId, PartsIssueItemId, PartsIssueStatus, PurchaseOrderId,
    ServiceCenterId, WorkflowAction,
};

pub use approval::ItemApproval;
pub use dispatch::{DispatchLine, DispatchPlan, PlannedLine};
pub use error::WorkflowError;
pub use intake::{
    CatalogPart, MAX_LINE_QUANTITY, NewPartsIssue, NewPartsIssueItem, OpenRequest, PricedLine,
    max_amount,
};
pub use projection::{Badge, BucketCounts, StatusBucket, StatusProjection, project, summarize};
pub use stock::{StockLevels, StockPolicy};

/// One requested part line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartsIssueItem {
    pub id: PartsIssueItemId,
    pub part_id: PartId,
    pub part_name: String,
    pub part_number: Option<String>,
    pub hsn_code: Option<String>,
    pub is_warranty: bool,
    pub serial_number: Option<String>,
    /// Set at creation, never changed.
    pub requested_qty: i32,
    /// Mirrors `requested_qty` until an admin approves; 0 means the line was rejected.
    pub approved_qty: i32,
    /// Accumulated by dispatches, never decreases.
    pub issued_qty: i32,
    pub unit_price: Decimal,
    /// `unit_price * approved_qty`.
    pub total_price: Decimal,
    /// Assigned on the first dispatch of this line, immutable afterwards.
    pub sub_po_number: Option<String>,
}

impl PartsIssueItem {
    /// Quantity still available for dispatch.
    #[must_use]
    pub const fn remaining_qty(&self) -> i32 {
        self.approved_qty - self.issued_qty
    }

    /// Whether every approved unit has been released.
    #[must_use]
    pub const fn is_fully_issued(&self) -> bool {
        self.issued_qty == self.approved_qty
    }

    fn recompute_total(&mut self) {
        self.total_price = self.unit_price * Decimal::from(self.approved_qty);
    }

    fn quantities_hold(&self) -> bool {
        0 <= self.issued_qty
            && self.issued_qty <= self.approved_qty
            && self.approved_qty <= self.requested_qty
    }
}

/// Informational shipping details recorded at dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TransportDetails {
    pub transporter: Option<String>,
    pub vehicle_number: Option<String>,
    pub consignment_number: Option<String>,
    pub remarks: Option<String>,
}

/// The parts-issue aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartsIssueRequest {
    pub id: PartsIssueId,
    pub issue_number: String,
    pub job_card_id: JobCardId,
    pub service_center_id: ServiceCenterId,
    /// Denormalized for numbering and display.
    pub service_center_code: String,
    pub service_center_name: String,
    pub purchase_order_id: Option<PurchaseOrderId>,
    pub items: Vec<PartsIssueItem>,
    pub status: PartsIssueStatus,
    pub notes: Option<String>,

    pub sc_manager_approved: bool,
    pub sc_manager_approved_by: Option<String>,
    pub sc_manager_approved_at: Option<DateTime<Utc>>,
    pub sc_rejected: bool,
    pub sc_rejected_by: Option<String>,
    pub sc_rejected_at: Option<DateTime<Utc>>,
    pub sc_rejected_reason: Option<String>,

    pub admin_approved: bool,
    pub admin_approved_by: Option<String>,
    pub admin_approved_at: Option<DateTime<Utc>>,
    pub admin_rejected: bool,
    pub admin_rejected_by: Option<String>,
    pub admin_rejected_at: Option<DateTime<Utc>>,
    pub admin_rejected_reason: Option<String>,

    pub sent_to_admin_at: Option<DateTime<Utc>>,
    pub resend_count: i32,

    /// The requesting technician.
    pub issued_by: String,
    pub issued_at: DateTime<Utc>,
    pub last_dispatched_by: Option<String>,
    pub last_dispatched_at: Option<DateTime<Utc>>,
    pub completed_by: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,

    pub transport_details: Option<TransportDetails>,
    /// Always the sum of item totals.
    pub total_amount: Decimal,
    /// Optimistic-concurrency token, bumped by every successful mutation.
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Audit record of a successful operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    pub action: WorkflowAction,
    pub from: PartsIssueStatus,
    pub to: PartsIssueStatus,
    pub actor: String,
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

impl PartsIssueRequest {
    /// Find an item by id.
    #[must_use]
    pub fn item(&self, id: PartsIssueItemId) -> Option<&PartsIssueItem> {
        self.items.iter().find(|item| item.id == id)
    }

    /// Fail with `ConcurrencyConflict` unless the caller read the current version.
    ///
    /// # Errors
    ///
    /// Returns `WorkflowError::ConcurrencyConflict` on a version mismatch.
    pub const fn ensure_version(&self, expected: i32) -> Result<(), WorkflowError> {
        if self.version == expected {
            Ok(())
        } else {
            Err(WorkflowError::ConcurrencyConflict {
                expected,
                actual: self.version,
            })
        }
    }

    /// Whether every line was approved at zero quantity.
    ///
    /// The status still reads `ADMIN_APPROVED` in that case; callers that act
    /// on approval must check this rather than the status alone.
    #[must_use]
    pub fn nothing_approved(&self) -> bool {
        self.admin_approved && self.items.iter().all(|item| item.approved_qty == 0)
    }

    /// Whether every line has released all of its approved quantity.
    #[must_use]
    pub fn fully_issued(&self) -> bool {
        self.items.iter().all(PartsIssueItem::is_fully_issued)
    }

    /// Whether any stock has been released yet.
    #[must_use]
    pub fn any_issued(&self) -> bool {
        self.items.iter().any(|item| item.issued_qty > 0)
    }

    /// Check the per-item quantity invariant and the derived total.
    #[must_use]
    pub fn invariants_hold(&self) -> bool {
        self.items.iter().all(PartsIssueItem::quantities_hold)
            && self.total_amount == self.items.iter().map(|item| item.total_price).sum()
    }

    fn recompute_totals(&mut self) {
        for item in &mut self.items {
            item.recompute_total();
        }
        self.total_amount = self.items.iter().map(|item| item.total_price).sum();
    }

    /// Move to `to`, bump the version and describe the change.
    fn transition(
        &mut self,
        action: WorkflowAction,
        to: PartsIssueStatus,
        actor: &str,
        detail: Option<String>,
        at: DateTime<Utc>,
    ) -> Transition {
        let from = self.status;
        self.status = to;
        self.version += 1;
        self.updated_at = at;
        Transition {
            action,
            from,
            to,
            actor: actor.to_string(),
            detail,
            at,
        }
    }

    fn invalid_state(&self, action: WorkflowAction) -> WorkflowError {
        WorkflowError::InvalidState {
            action,
            status: self.status,
        }
    }
}
