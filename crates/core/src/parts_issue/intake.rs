//! Creating a parts-issue request.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{PartsIssueItem, PartsIssueRequest, Transition, WorkflowError};
use crate::types::{
    JobCardId, PartId, PartsIssueId, PartsIssueItemId, PartsIssueStatus, PurchaseOrderId,
    ServiceCenterId, WorkflowAction,
};

/// Largest quantity a single line may request.
pub const MAX_LINE_QUANTITY: i32 = 100_000;

/// Largest line or request amount the store can hold (`NUMERIC(14, 2)`).
#[must_use]
pub fn max_amount() -> Decimal {
    Decimal::new(99_999_999_999_999, 2)
}

/// A line of a new request, as submitted by the technician.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPartsIssueItem {
    pub part_id: PartId,
    pub quantity: i32,
    #[serde(default)]
    pub is_warranty: bool,
    #[serde(default)]
    pub serial_number: Option<String>,
}

/// Body of a create-request call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPartsIssue {
    pub job_card_id: JobCardId,
    pub items: Vec<NewPartsIssueItem>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub purchase_order_id: Option<PurchaseOrderId>,
}

/// Catalog fields copied onto a request line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogPart {
    pub part_id: PartId,
    pub part_name: String,
    pub part_number: Option<String>,
    pub hsn_code: Option<String>,
    pub unit_price: Decimal,
}

/// A validated line with its catalog data resolved, not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedLine {
    pub part: CatalogPart,
    pub quantity: i32,
    pub is_warranty: bool,
    pub serial_number: Option<String>,
}

impl PricedLine {
    /// Build the stored item; approved quantity starts equal to the requested one.
    #[must_use]
    pub fn to_item(&self, id: PartsIssueItemId) -> PartsIssueItem {
        PartsIssueItem {
            id,
            part_id: self.part.part_id,
            part_name: self.part.part_name.clone(),
            part_number: self.part.part_number.clone(),
            hsn_code: self.part.hsn_code.clone(),
            is_warranty: self.is_warranty,
            serial_number: self.serial_number.clone(),
            requested_qty: self.quantity,
            approved_qty: self.quantity,
            issued_qty: 0,
            unit_price: self.part.unit_price,
            total_price: self.part.unit_price * Decimal::from(self.quantity),
            sub_po_number: None,
        }
    }
}

impl NewPartsIssue {
    /// Check the shape of the request before touching the catalog.
    ///
    /// # Errors
    ///
    /// Returns `WorkflowError::Validation` for an empty item list, a
    /// quantity outside `1..=MAX_LINE_QUANTITY` or a warranty line without a
    /// serial number.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.items.is_empty() {
            return Err(WorkflowError::validation(
                "a parts issue request needs at least one item",
            ));
        }

        for (index, item) in self.items.iter().enumerate() {
            let line = index + 1;
            if item.quantity <= 0 {
                return Err(WorkflowError::validation(format!(
                    "line {line}: quantity must be positive, got {}",
                    item.quantity
                )));
            }
            if item.quantity > MAX_LINE_QUANTITY {
                return Err(WorkflowError::validation(format!(
                    "line {line}: quantity {} is above the limit of {MAX_LINE_QUANTITY}",
                    item.quantity
                )));
            }
            if item.is_warranty && normalized(item.serial_number.as_deref()).is_none() {
                return Err(WorkflowError::validation(format!(
                    "line {line}: warranty parts require a serial number"
                )));
            }
        }

        Ok(())
    }

    /// Validate and resolve every line against the parts catalog.
    ///
    /// # Errors
    ///
    /// Returns `WorkflowError::Validation` when [`validate`](Self::validate)
    /// fails, a part is missing from `catalog`, or a line or the request
    /// total is above [`max_amount`].
    pub fn price(&self, catalog: &[CatalogPart]) -> Result<Vec<PricedLine>, WorkflowError> {
        self.validate()?;

        let too_large = || WorkflowError::validation(format!("amount exceeds {}", max_amount()));
        let mut total = Decimal::ZERO;
        let mut priced = Vec::with_capacity(self.items.len());
        for item in &self.items {
            let part = catalog
                .iter()
                .find(|part| part.part_id == item.part_id)
                .ok_or_else(|| WorkflowError::validation(format!("unknown part {}", item.part_id)))?;

            let line_total = part
                .unit_price
                .checked_mul(Decimal::from(item.quantity))
                .filter(|amount| *amount <= max_amount())
                .ok_or_else(too_large)?;
            total = total
                .checked_add(line_total)
                .filter(|amount| *amount <= max_amount())
                .ok_or_else(too_large)?;

            priced.push(PricedLine {
                part: part.clone(),
                quantity: item.quantity,
                is_warranty: item.is_warranty,
                serial_number: normalized(item.serial_number.as_deref()),
            });
        }
        Ok(priced)
    }

    /// Notes with surrounding whitespace removed; blank notes become `None`.
    #[must_use]
    pub fn notes(&self) -> Option<String> {
        normalized(self.notes.as_deref())
    }
}

/// Header fields of a request being opened.
#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub id: PartsIssueId,
    pub issue_number: String,
    pub job_card_id: JobCardId,
    pub service_center_id: ServiceCenterId,
    pub service_center_code: String,
    pub service_center_name: String,
    pub purchase_order_id: Option<PurchaseOrderId>,
    pub notes: Option<String>,
    pub requested_by: String,
    pub at: DateTime<Utc>,
}

impl PartsIssueRequest {
    /// Build a new request in `PENDING_SC_APPROVAL` at version 1.
    #[must_use]
    pub fn open(header: OpenRequest, items: Vec<PartsIssueItem>) -> (Self, Transition) {
        let mut request = Self {
            id: header.id,
            issue_number: header.issue_number,
            job_card_id: header.job_card_id,
            service_center_id: header.service_center_id,
            service_center_code: header.service_center_code,
            service_center_name: header.service_center_name,
            purchase_order_id: header.purchase_order_id,
            items,
            status: PartsIssueStatus::PendingScApproval,
            notes: header.notes,
            sc_manager_approved: false,
            sc_manager_approved_by: None,
            sc_manager_approved_at: None,
            sc_rejected: false,
            sc_rejected_by: None,
            sc_rejected_at: None,
            sc_rejected_reason: None,
            admin_approved: false,
            admin_approved_by: None,
            admin_approved_at: None,
            admin_rejected: false,
            admin_rejected_by: None,
            admin_rejected_at: None,
            admin_rejected_reason: None,
            sent_to_admin_at: None,
            resend_count: 0,
            issued_by: header.requested_by.clone(),
            issued_at: header.at,
            last_dispatched_by: None,
            last_dispatched_at: None,
            completed_by: None,
            completed_at: None,
            transport_details: None,
            total_amount: Decimal::ZERO,
            version: 1,
            created_at: header.at,
            updated_at: header.at,
        };
        request.recompute_totals();

        let transition = Transition {
            action: WorkflowAction::Create,
            from: PartsIssueStatus::PendingScApproval,
            to: PartsIssueStatus::PendingScApproval,
            actor: header.requested_by,
            detail: Some(format!("{} item(s)", request.items.len())),
            at: header.at,
        };
        (request, transition)
    }
}

/// Trim and drop blank strings.
pub(crate) fn normalized(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::super::fixtures;
    use super::*;

    fn line(part: i32, quantity: i32) -> NewPartsIssueItem {
        NewPartsIssueItem {
            part_id: PartId::new(part),
            quantity,
            is_warranty: false,
            serial_number: None,
        }
    }

    fn new_issue(items: Vec<NewPartsIssueItem>) -> NewPartsIssue {
        NewPartsIssue {
            job_card_id: JobCardId::new(1),
            items,
            notes: None,
            purchase_order_id: None,
        }
    }

    #[test]
    fn test_empty_items_rejected() {
        let err = new_issue(vec![]).validate().unwrap_err();
        assert!(matches!(err, WorkflowError::Validation(_)));
    }

    #[test]
    fn test_non_positive_quantity_rejected() {
        assert!(new_issue(vec![line(1, 0)]).validate().is_err());
        assert!(new_issue(vec![line(1, -3)]).validate().is_err());
    }

    #[test]
    fn test_quantity_above_limit_rejected() {
        assert!(new_issue(vec![line(1, MAX_LINE_QUANTITY)]).validate().is_ok());
        let err = new_issue(vec![line(1, MAX_LINE_QUANTITY + 1)])
            .validate()
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Validation(_)));
        assert!(new_issue(vec![line(1, i32::MAX)]).validate().is_err());
    }

    #[test]
    fn test_amount_above_storage_limit_rejected() {
        let catalog = [
            fixtures::catalog_part(1, "ENG-01", 9_000_000_000),
            fixtures::catalog_part(2, "ENG-02", 600_000_000),
        ];

        let err = new_issue(vec![line(1, 200)]).price(&catalog).unwrap_err();
        assert!(matches!(err, WorkflowError::Validation(_)));

        // Each line fits on its own; together they do not.
        let err = new_issue(vec![line(1, 100), line(2, 500)])
            .price(&catalog)
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Validation(_)));

        assert!(new_issue(vec![line(1, 111)]).price(&catalog).is_ok());
        assert!(new_issue(vec![line(1, 100), line(2, 100)]).price(&catalog).is_ok());
    }

    #[test]
    fn test_warranty_requires_serial() {
        let mut item = line(1, 1);
        item.is_warranty = true;
        item.serial_number = Some("   ".to_string());
        assert!(new_issue(vec![item.clone()]).validate().is_err());

        item.serial_number = Some(" VIN-123 ".to_string());
        let priced = new_issue(vec![item])
            .price(&[fixtures::catalog_part(1, "BRK-01", 450)])
            .unwrap();
        assert_eq!(priced[0].serial_number.as_deref(), Some("VIN-123"));
    }

    #[test]
    fn test_unknown_part_rejected() {
        let err = new_issue(vec![line(9, 1)])
            .price(&[fixtures::catalog_part(1, "BRK-01", 450)])
            .unwrap_err();
        assert!(err.to_string().contains("unknown part 9"));
    }

    #[test]
    fn test_open_starts_pending_at_version_one() {
        let request = fixtures::request(&[("BRK-01", 10, 250), ("FLT-02", 2, 80)]);

        assert_eq!(request.status, PartsIssueStatus::PendingScApproval);
        assert_eq!(request.version, 1);
        assert_eq!(request.issued_by, "tech-7");
        assert_eq!(request.items[0].approved_qty, 10);
        assert_eq!(request.items[0].issued_qty, 0);
        assert_eq!(request.total_amount, Decimal::new(2660, 0));
        assert!(request.invariants_hold());
    }

    #[test]
    fn test_blank_notes_dropped() {
        let mut issue = new_issue(vec![line(1, 1)]);
        issue.notes = Some("  ".to_string());
        assert_eq!(issue.notes(), None);
        issue.notes = Some(" urgent ".to_string());
        assert_eq!(issue.notes().as_deref(), Some("urgent"));
    }

    #[test]
    fn test_deserialize_create_body() {
        let body = r#"{"jobCardId":3,"items":[{"partId":5,"quantity":2}]}"#;
        let issue: NewPartsIssue = serde_json::from_str(body).unwrap();
        assert_eq!(issue.job_card_id, JobCardId::new(3));
        assert!(!issue.items[0].is_warranty);
    }
}
