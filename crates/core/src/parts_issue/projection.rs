//! User-facing status of a request, derived on every read and never stored.

use serde::{Deserialize, Serialize};

use super::PartsIssueRequest;
use crate::types::PartsIssueStatus;

/// Dashboard bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusBucket {
    Pending,
    Approved,
    Rejected,
    Issued,
}

impl StatusBucket {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Issued => "issued",
        }
    }
}

impl std::fmt::Display for StatusBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Secondary markers shown next to the bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Badge {
    AwaitingScApproval,
    AwaitingAdminApproval,
    ScApproved,
    ScRejected,
    AdminApproved,
    AdminRejected,
    /// At least one line approved below the requested quantity.
    PartiallyApproved,
    /// Admin approved every line at zero.
    NothingApproved,
    Resent,
    PartiallyDispatched,
    FullyDispatched,
    Completed,
}

/// Output of [`project`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusProjection {
    pub bucket: StatusBucket,
    pub badges: Vec<Badge>,
}

/// Derive the bucket and badges from the authoritative fields of a request.
#[must_use]
pub fn project(request: &PartsIssueRequest) -> StatusProjection {
    let bucket = match request.status {
        PartsIssueStatus::PendingScApproval
        | PartsIssueStatus::ScApproved
        | PartsIssueStatus::PendingAdminApproval => StatusBucket::Pending,
        PartsIssueStatus::ScRejected | PartsIssueStatus::AdminRejected => StatusBucket::Rejected,
        PartsIssueStatus::AdminApproved if request.nothing_approved() => StatusBucket::Rejected,
        PartsIssueStatus::AdminApproved => StatusBucket::Approved,
        PartsIssueStatus::Dispatched | PartsIssueStatus::Completed => StatusBucket::Issued,
    };

    let mut badges = Vec::new();
    match request.status {
        PartsIssueStatus::PendingScApproval => badges.push(Badge::AwaitingScApproval),
        status if status.awaits_admin() => badges.push(Badge::AwaitingAdminApproval),
        _ => {}
    }
    if request.sc_manager_approved {
        badges.push(Badge::ScApproved);
    }
    if request.sc_rejected {
        badges.push(Badge::ScRejected);
    }
    if request.admin_approved {
        badges.push(Badge::AdminApproved);
        if request.nothing_approved() {
            badges.push(Badge::NothingApproved);
        } else if request
            .items
            .iter()
            .any(|item| item.approved_qty < item.requested_qty)
        {
            badges.push(Badge::PartiallyApproved);
        }
    }
    if request.admin_rejected {
        badges.push(Badge::AdminRejected);
    }
    if request.resend_count > 0 {
        badges.push(Badge::Resent);
    }
    if request.any_issued() {
        if request.fully_issued() {
            badges.push(Badge::FullyDispatched);
        } else {
            badges.push(Badge::PartiallyDispatched);
        }
    }
    if request.status == PartsIssueStatus::Completed {
        badges.push(Badge::Completed);
    }

    StatusProjection { bucket, badges }
}

/// Bucket counts for a set of requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketCounts {
    pub pending: u64,
    pub approved: u64,
    pub rejected: u64,
    pub issued: u64,
    pub total: u64,
}

impl BucketCounts {
    fn add(&mut self, bucket: StatusBucket) {
        match bucket {
            StatusBucket::Pending => self.pending += 1,
            StatusBucket::Approved => self.approved += 1,
            StatusBucket::Rejected => self.rejected += 1,
            StatusBucket::Issued => self.issued += 1,
        }
        self.total += 1;
    }
}

/// Count how many requests fall in each bucket.
pub fn summarize<'a>(requests: impl IntoIterator<Item = &'a PartsIssueRequest>) -> BucketCounts {
    let mut counts = BucketCounts::default();
    for request in requests {
        counts.add(project(request).bucket);
    }
    counts
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use super::super::fixtures::{self, now};
    use super::super::{DispatchLine, ItemApproval};
    use super::*;
    use crate::types::PartsIssueItemId;

    fn approve(request: &mut PartsIssueRequest, qty: i32) {
        request
            .admin_approve(
                "admin-1",
                &[ItemApproval {
                    item_id: PartsIssueItemId::new(100),
                    approved_qty: qty,
                }],
                now(),
            )
            .unwrap();
    }

    fn dispatch(request: &mut PartsIssueRequest, qty: i32) {
        let plan = request
            .plan_dispatch(&[DispatchLine {
                item_id: PartsIssueItemId::new(100),
                quantity: qty,
            }])
            .unwrap();
        let numbers: HashMap<_, _> = plan
            .needs_sub_po()
            .map(|id| (id, "SPO-SC001-2025-03-0001".to_string()))
            .collect();
        request
            .apply_dispatch(&plan, &numbers, None, "warehouse-1", now())
            .unwrap();
    }

    #[test]
    fn test_new_request_is_pending() {
        let request = fixtures::request(&[("BRK-01", 10, 250)]);
        let projection = project(&request);
        assert_eq!(projection.bucket, StatusBucket::Pending);
        assert_eq!(projection.badges, vec![Badge::AwaitingScApproval]);
    }

    #[test]
    fn test_partial_approval_badges() {
        let mut request = fixtures::awaiting_admin(&[("BRK-01", 10, 250)]);
        approve(&mut request, 6);

        let projection = project(&request);
        assert_eq!(projection.bucket, StatusBucket::Approved);
        assert!(projection.badges.contains(&Badge::PartiallyApproved));
        assert!(projection.badges.contains(&Badge::ScApproved));
    }

    #[test]
    fn test_nothing_approved_lands_in_rejected_bucket() {
        let mut request = fixtures::awaiting_admin(&[("BRK-01", 10, 250)]);
        approve(&mut request, 0);

        let projection = project(&request);
        assert_eq!(projection.bucket, StatusBucket::Rejected);
        assert!(projection.badges.contains(&Badge::NothingApproved));
        assert!(!projection.badges.contains(&Badge::PartiallyApproved));
    }

    #[test]
    fn test_partial_dispatch_stays_approved() {
        let mut request = fixtures::approved(&[("BRK-01", 10, 250)]);
        dispatch(&mut request, 4);

        let projection = project(&request);
        assert_eq!(projection.bucket, StatusBucket::Approved);
        assert!(projection.badges.contains(&Badge::PartiallyDispatched));

        dispatch(&mut request, 6);
        let projection = project(&request);
        assert_eq!(projection.bucket, StatusBucket::Issued);
        assert!(projection.badges.contains(&Badge::FullyDispatched));
    }

    #[test]
    fn test_rejected_then_resent_is_pending_again() {
        let mut request = fixtures::awaiting_admin(&[("BRK-01", 10, 250)]);
        request.admin_reject("admin-1", "out of stock", now()).unwrap();
        assert_eq!(project(&request).bucket, StatusBucket::Rejected);

        request.resend("manager-1", now()).unwrap();
        let projection = project(&request);
        assert_eq!(projection.bucket, StatusBucket::Pending);
        assert!(projection.badges.contains(&Badge::Resent));
        assert!(!projection.badges.contains(&Badge::AdminRejected));
    }

    #[test]
    fn test_summarize_counts_each_bucket() {
        let pending = fixtures::request(&[("BRK-01", 1, 10)]);
        let approved = fixtures::approved(&[("BRK-01", 1, 10)]);
        let mut issued = fixtures::approved(&[("BRK-01", 1, 10)]);
        dispatch(&mut issued, 1);

        let counts = summarize([&pending, &approved, &issued, &pending]);
        assert_eq!(counts.pending, 2);
        assert_eq!(counts.approved, 1);
        assert_eq!(counts.issued, 1);
        assert_eq!(counts.rejected, 0);
        assert_eq!(counts.total, 4);
    }

    #[test]
    fn test_projection_serializes_for_clients() {
        let request = fixtures::request(&[("BRK-01", 1, 10)]);
        let json = serde_json::to_value(project(&request)).unwrap();
        assert_eq!(json["bucket"], "pending");
        assert_eq!(json["badges"][0], "AWAITING_SC_APPROVAL");
    }
}
