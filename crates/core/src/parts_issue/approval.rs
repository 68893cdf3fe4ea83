//! Service-center and central-admin approval transitions.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::intake::normalized;
use super::{PartsIssueRequest, Transition, WorkflowError};
use crate::types::{PartsIssueItemId, PartsIssueStatus, WorkflowAction};

/// Quantity an admin approves for one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemApproval {
    pub item_id: PartsIssueItemId,
    pub approved_qty: i32,
}

impl PartsIssueRequest {
    /// Service-center manager approval; forwards the request to central admin.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless the request is `PENDING_SC_APPROVAL`.
    pub fn sc_approve(&mut self, actor: &str, now: DateTime<Utc>) -> Result<Transition, WorkflowError> {
        if self.status != PartsIssueStatus::PendingScApproval {
            return Err(self.invalid_state(WorkflowAction::ScApprove));
        }

        self.sc_manager_approved = true;
        self.sc_manager_approved_by = Some(actor.to_string());
        self.sc_manager_approved_at = Some(now);
        self.sent_to_admin_at = Some(now);

        Ok(self.transition(
            WorkflowAction::ScApprove,
            PartsIssueStatus::PendingAdminApproval,
            actor,
            None,
            now,
        ))
    }

    /// Service-center manager rejection.
    ///
    /// # Errors
    ///
    /// `Validation` for a blank reason, `InvalidState` unless the request is
    /// `PENDING_SC_APPROVAL`.
    pub fn sc_reject(
        &mut self,
        actor: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Transition, WorkflowError> {
        if self.status != PartsIssueStatus::PendingScApproval {
            return Err(self.invalid_state(WorkflowAction::ScReject));
        }
        let reason = required_reason(reason)?;

        self.sc_rejected = true;
        self.sc_rejected_by = Some(actor.to_string());
        self.sc_rejected_at = Some(now);
        self.sc_rejected_reason = Some(reason.clone());

        Ok(self.transition(
            WorkflowAction::ScReject,
            PartsIssueStatus::ScRejected,
            actor,
            Some(reason),
            now,
        ))
    }

    /// Central-admin approval with per-line quantities.
    ///
    /// Lines missing from `approvals` keep their current approved quantity.
    /// Approving every line at zero is allowed and still yields
    /// `ADMIN_APPROVED`; see [`nothing_approved`](Self::nothing_approved).
    ///
    /// # Errors
    ///
    /// - `InvalidState` unless the request is awaiting admin review
    /// - `Validation` for a negative quantity, an unknown or repeated item id
    /// - `QuantityExceeded` when a quantity is above the requested one
    pub fn admin_approve(
        &mut self,
        actor: &str,
        approvals: &[ItemApproval],
        now: DateTime<Utc>,
    ) -> Result<Transition, WorkflowError> {
        if !self.status.awaits_admin() {
            return Err(self.invalid_state(WorkflowAction::AdminApprove));
        }

        // Validate everything before writing anything.
        let mut seen = HashSet::new();
        for approval in approvals {
            if !seen.insert(approval.item_id) {
                return Err(WorkflowError::validation(format!(
                    "item {} is listed more than once",
                    approval.item_id
                )));
            }
            let item = self
                .item(approval.item_id)
                .ok_or(WorkflowError::UnknownItem(approval.item_id))?;
            if approval.approved_qty < 0 {
                return Err(WorkflowError::validation(format!(
                    "item {}: approved quantity cannot be negative",
                    approval.item_id
                )));
            }
            if approval.approved_qty > item.requested_qty {
                return Err(WorkflowError::QuantityExceeded {
                    item_id: approval.item_id,
                    requested: approval.approved_qty,
                    available: item.requested_qty,
                });
            }
        }

        for approval in approvals {
            if let Some(item) = self.items.iter_mut().find(|i| i.id == approval.item_id) {
                item.approved_qty = approval.approved_qty;
            }
        }
        self.recompute_totals();

        self.admin_approved = true;
        self.admin_approved_by = Some(actor.to_string());
        self.admin_approved_at = Some(now);

        let approved: i64 = self.items.iter().map(|i| i64::from(i.approved_qty)).sum();
        let requested: i64 = self.items.iter().map(|i| i64::from(i.requested_qty)).sum();
        let detail = if approved == 0 {
            "nothing approved".to_string()
        } else {
            format!("approved {approved} of {requested} unit(s)")
        };

        Ok(self.transition(
            WorkflowAction::AdminApprove,
            PartsIssueStatus::AdminApproved,
            actor,
            Some(detail),
            now,
        ))
    }

    /// Central-admin rejection. Approved quantities are left as they were.
    ///
    /// # Errors
    ///
    /// `Validation` for a blank reason, `InvalidState` unless the request is
    /// awaiting admin review.
    pub fn admin_reject(
        &mut self,
        actor: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Transition, WorkflowError> {
        if !self.status.awaits_admin() {
            return Err(self.invalid_state(WorkflowAction::AdminReject));
        }
        let reason = required_reason(reason)?;

        self.admin_rejected = true;
        self.admin_rejected_by = Some(actor.to_string());
        self.admin_rejected_at = Some(now);
        self.admin_rejected_reason = Some(reason.clone());

        Ok(self.transition(
            WorkflowAction::AdminReject,
            PartsIssueStatus::AdminRejected,
            actor,
            Some(reason),
            now,
        ))
    }

    /// Send the request back for review.
    ///
    /// - awaiting admin: a reminder; only `sent_to_admin_at` moves
    /// - `ADMIN_REJECTED`: back to `PENDING_ADMIN_APPROVAL`
    /// - `SC_REJECTED`: back to `PENDING_SC_APPROVAL`
    ///
    /// Quantities are never touched. The rejection flag is cleared; its
    /// reason stays on the request and in the audit detail.
    ///
    /// # Errors
    ///
    /// `InvalidState` from any other status.
    pub fn resend(&mut self, actor: &str, now: DateTime<Utc>) -> Result<Transition, WorkflowError> {
        let (to, detail) = match self.status {
            status if status.awaits_admin() => {
                self.sent_to_admin_at = Some(now);
                (status, Some("reminder sent to admin".to_string()))
            }
            PartsIssueStatus::AdminRejected => {
                self.admin_rejected = false;
                self.sent_to_admin_at = Some(now);
                (
                    PartsIssueStatus::PendingAdminApproval,
                    self.admin_rejected_reason
                        .as_ref()
                        .map(|reason| format!("previously rejected: {reason}")),
                )
            }
            PartsIssueStatus::ScRejected => {
                self.sc_rejected = false;
                (
                    PartsIssueStatus::PendingScApproval,
                    self.sc_rejected_reason
                        .as_ref()
                        .map(|reason| format!("previously rejected: {reason}")),
                )
            }
            _ => return Err(self.invalid_state(WorkflowAction::Resend)),
        };

        self.resend_count += 1;
        Ok(self.transition(WorkflowAction::Resend, to, actor, detail, now))
    }

    /// Close a fully dispatched request.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless the request is `DISPATCHED`.
    pub fn complete(&mut self, actor: &str, now: DateTime<Utc>) -> Result<Transition, WorkflowError> {
        if self.status != PartsIssueStatus::Dispatched {
            return Err(self.invalid_state(WorkflowAction::Complete));
        }

        self.completed_by = Some(actor.to_string());
        self.completed_at = Some(now);

        Ok(self.transition(
            WorkflowAction::Complete,
            PartsIssueStatus::Completed,
            actor,
            None,
            now,
        ))
    }
}

fn required_reason(reason: &str) -> Result<String, WorkflowError> {
    normalized(Some(reason)).ok_or_else(|| WorkflowError::validation("a reason is required"))
}
