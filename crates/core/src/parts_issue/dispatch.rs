//! Releasing approved quantities from the warehouse.
//!
//! Dispatch is split in two so the caller can allocate sub-PO numbers between
//! the steps: [`PartsIssueRequest::plan_dispatch`] checks every precondition
//! and reports which lines are shipping for the first time, and
//! [`PartsIssueRequest::apply_dispatch`] writes the quantities once those
//! lines have numbers.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{PartsIssueRequest, Transition, TransportDetails, WorkflowError};
use crate::types::{PartsIssueItemId, PartsIssueStatus, WorkflowAction};

/// One line of a dispatch call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchLine {
    pub item_id: PartsIssueItemId,
    pub quantity: i32,
}

/// A line that passed every precondition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedLine {
    pub item_id: PartsIssueItemId,
    pub quantity: i32,
    /// First dispatch of this line; a sub-PO number must be allocated.
    pub needs_sub_po: bool,
}

/// A validated dispatch, bound to the version it was planned against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchPlan {
    pub version: i32,
    pub lines: Vec<PlannedLine>,
}

impl DispatchPlan {
    /// Items that need a sub-PO number before the plan can be applied.
    pub fn needs_sub_po(&self) -> impl Iterator<Item = PartsIssueItemId> + '_ {
        self.lines
            .iter()
            .filter(|line| line.needs_sub_po)
            .map(|line| line.item_id)
    }

    /// Total units released by this plan.
    #[must_use]
    pub fn units(&self) -> i64 {
        self.lines.iter().map(|line| i64::from(line.quantity)).sum()
    }
}

impl PartsIssueRequest {
    /// Check a dispatch against the current state without changing anything.
    ///
    /// # Errors
    ///
    /// - `InvalidState` unless the status allows dispatch
    /// - `Validation` for an empty list, a repeated item or a non-positive quantity
    /// - `UnknownItem` for an item outside this request
    /// - `QuantityExceeded` when a line asks for more than `approved - issued`
    pub fn plan_dispatch(&self, lines: &[DispatchLine]) -> Result<DispatchPlan, WorkflowError> {
        if !self.status.allows_dispatch() {
            return Err(self.invalid_state(WorkflowAction::Dispatch));
        }
        if lines.is_empty() {
            return Err(WorkflowError::validation(
                "a dispatch needs at least one line",
            ));
        }

        let mut seen = HashSet::new();
        let mut planned = Vec::with_capacity(lines.len());
        for line in lines {
            if !seen.insert(line.item_id) {
                return Err(WorkflowError::validation(format!(
                    "item {} is listed more than once",
                    line.item_id
                )));
            }
            if line.quantity <= 0 {
                return Err(WorkflowError::validation(format!(
                    "item {}: dispatch quantity must be positive",
                    line.item_id
                )));
            }
            let item = self
                .item(line.item_id)
                .ok_or(WorkflowError::UnknownItem(line.item_id))?;
            if line.quantity > item.remaining_qty() {
                return Err(WorkflowError::QuantityExceeded {
                    item_id: line.item_id,
                    requested: line.quantity,
                    available: item.remaining_qty(),
                });
            }
            planned.push(PlannedLine {
                item_id: line.item_id,
                quantity: line.quantity,
                needs_sub_po: item.sub_po_number.is_none(),
            });
        }

        Ok(DispatchPlan {
            version: self.version,
            lines: planned,
        })
    }

    /// Apply a plan produced by [`plan_dispatch`](Self::plan_dispatch).
    ///
    /// `sub_po_numbers` must hold a number for every line reported by
    /// [`DispatchPlan::needs_sub_po`]; numbers for other lines are ignored,
    /// so an assigned sub-PO is never replaced.
    ///
    /// # Errors
    ///
    /// `ConcurrencyConflict` if the request changed since planning,
    /// `MissingSubPoNumber` if a first-time line has no number.
    pub fn apply_dispatch(
        &mut self,
        plan: &DispatchPlan,
        sub_po_numbers: &HashMap<PartsIssueItemId, String>,
        transport: Option<TransportDetails>,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<Transition, WorkflowError> {
        self.ensure_version(plan.version)?;
        if let Some(missing) = plan
            .needs_sub_po()
            .find(|item_id| !sub_po_numbers.contains_key(item_id))
        {
            return Err(WorkflowError::MissingSubPoNumber(missing));
        }

        for line in &plan.lines {
            if let Some(item) = self.items.iter_mut().find(|i| i.id == line.item_id) {
                item.issued_qty += line.quantity;
                if item.sub_po_number.is_none() {
                    item.sub_po_number = sub_po_numbers.get(&line.item_id).cloned();
                }
            }
        }

        self.last_dispatched_by = Some(actor.to_string());
        self.last_dispatched_at = Some(now);
        if transport.is_some() {
            self.transport_details = transport;
        }

        let to = if self.fully_issued() {
            PartsIssueStatus::Dispatched
        } else {
            PartsIssueStatus::AdminApproved
        };
        let detail = format!("{} unit(s) on {} line(s)", plan.units(), plan.lines.len());

        Ok(self.transition(WorkflowAction::Dispatch, to, actor, Some(detail), now))
    }
}
