//! Optional check of approvals against on-hand stock.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::{ItemApproval, PartsIssueRequest, WorkflowError};
use crate::types::PartId;

/// How admin approval treats on-hand stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockPolicy {
    /// Stock is not consulted.
    #[default]
    Off,
    /// Approved quantities are lowered to what is on hand.
    Cap,
    /// Approval fails with `InsufficientStock`.
    Reject,
}

impl StockPolicy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Cap => "cap",
            Self::Reject => "reject",
        }
    }

    /// Rewrite `approvals` so they fit `stock`.
    ///
    /// The result lists every line of the request. Lines sharing a part draw
    /// from the same pool, in item order. Entries that are invalid on their
    /// own (unknown item, negative, above requested) are passed through
    /// untouched so approval reports them.
    ///
    /// # Errors
    ///
    /// Returns `WorkflowError::Validation` when an item id appears more than
    /// once, under every policy. Returns `WorkflowError::InsufficientStock`
    /// under [`StockPolicy::Reject`] when a part's total approved quantity
    /// exceeds its stock.
    pub fn apply(
        self,
        request: &PartsIssueRequest,
        approvals: &[ItemApproval],
        stock: &StockLevels,
    ) -> Result<Vec<ItemApproval>, WorkflowError> {
        let mut seen = HashSet::new();
        if let Some(repeated) = approvals.iter().find(|a| !seen.insert(a.item_id)) {
            return Err(WorkflowError::validation(format!(
                "item {} is listed more than once",
                repeated.item_id
            )));
        }

        if self == Self::Off {
            return Ok(approvals.to_vec());
        }

        let mut passthrough: Vec<ItemApproval> = approvals
            .iter()
            .filter(|a| request.item(a.item_id).is_none())
            .copied()
            .collect();

        let mut remaining: HashMap<PartId, i32> = HashMap::new();
        let mut wanted: HashMap<PartId, i64> = HashMap::new();
        let mut resolved = Vec::with_capacity(request.items.len());

        for item in &request.items {
            let qty = approvals
                .iter()
                .find(|a| a.item_id == item.id)
                .map_or(item.approved_qty, |a| a.approved_qty);
            if qty < 0 || qty > item.requested_qty {
                resolved.push(ItemApproval {
                    item_id: item.id,
                    approved_qty: qty,
                });
                continue;
            }

            let available = remaining
                .entry(item.part_id)
                .or_insert_with(|| stock.available(item.part_id));
            *wanted.entry(item.part_id).or_default() += i64::from(qty);

            let granted = match self {
                Self::Cap => qty.min(*available),
                _ => qty,
            };
            *available = (*available - granted).max(0);
            resolved.push(ItemApproval {
                item_id: item.id,
                approved_qty: granted,
            });
        }

        if self == Self::Reject {
            // First offending part in item order.
            for item in &request.items {
                let requested = wanted.get(&item.part_id).copied().unwrap_or_default();
                let available = stock.available(item.part_id);
                if requested > i64::from(available) {
                    return Err(WorkflowError::InsufficientStock {
                        part_id: item.part_id,
                        requested: i32::try_from(requested).unwrap_or(i32::MAX),
                        available,
                    });
                }
            }
        }

        resolved.append(&mut passthrough);
        Ok(resolved)
    }
}

impl std::fmt::Display for StockPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StockPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "" => Ok(Self::Off),
            "cap" => Ok(Self::Cap),
            "reject" => Ok(Self::Reject),
            other => Err(format!("invalid stock policy: {other}")),
        }
    }
}

/// On-hand quantity per part. Parts without an entry have none.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StockLevels {
    on_hand: HashMap<PartId, i32>,
}

impl StockLevels {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, part_id: PartId, quantity: i32) {
        self.on_hand.insert(part_id, quantity.max(0));
    }

    #[must_use]
    pub fn available(&self, part_id: PartId) -> i32 {
        self.on_hand.get(&part_id).copied().unwrap_or_default()
    }
}

impl FromIterator<(PartId, i32)> for StockLevels {
    fn from_iter<T: IntoIterator<Item = (PartId, i32)>>(iter: T) -> Self {
        let mut levels = Self::new();
        for (part_id, quantity) in iter {
            levels.set(part_id, quantity);
        }
        levels
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::super::fixtures::{self, now};
    use super::*;
    use crate::types::PartsIssueItemId;

    fn approval(item: i32, qty: i32) -> ItemApproval {
        ItemApproval {
            item_id: PartsIssueItemId::new(item),
            approved_qty: qty,
        }
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("off".parse::<StockPolicy>().unwrap(), StockPolicy::Off);
        assert_eq!("CAP".parse::<StockPolicy>().unwrap(), StockPolicy::Cap);
        assert_eq!(" reject ".parse::<StockPolicy>().unwrap(), StockPolicy::Reject);
        assert!("clamp".parse::<StockPolicy>().is_err());
    }

    #[test]
    fn test_off_passes_approvals_through() {
        let request = fixtures::awaiting_admin(&[("BRK-01", 10, 250)]);
        let approvals = vec![approval(100, 8)];
        let result = StockPolicy::Off
            .apply(&request, &approvals, &StockLevels::new())
            .unwrap();
        assert_eq!(result, approvals);
    }

    #[test]
    fn test_cap_limits_to_on_hand() {
        let mut request = fixtures::awaiting_admin(&[("BRK-01", 10, 250), ("FLT-02", 4, 80)]);
        let stock: StockLevels = [(PartId::new(1), 6), (PartId::new(2), 10)]
            .into_iter()
            .collect();

        let approvals = StockPolicy::Cap.apply(&request, &[], &stock).unwrap();
        assert_eq!(approvals, vec![approval(100, 6), approval(101, 4)]);

        request.admin_approve("admin-1", &approvals, now()).unwrap();
        assert_eq!(request.items[0].approved_qty, 6);
    }

    #[test]
    fn test_reject_reports_shortfall() {
        let request = fixtures::awaiting_admin(&[("BRK-01", 10, 250)]);
        let stock: StockLevels = [(PartId::new(1), 3)].into_iter().collect();

        let err = StockPolicy::Reject
            .apply(&request, &[approval(100, 5)], &stock)
            .unwrap_err();
        assert_eq!(
            err,
            WorkflowError::InsufficientStock {
                part_id: PartId::new(1),
                requested: 5,
                available: 3,
            }
        );

        assert!(StockPolicy::Reject
            .apply(&request, &[approval(100, 3)], &stock)
            .is_ok());
    }

    #[test]
    fn test_invalid_entries_survive_for_approval_to_report() {
        let mut request = fixtures::awaiting_admin(&[("BRK-01", 10, 250)]);
        let stock: StockLevels = [(PartId::new(1), 100)].into_iter().collect();

        let approvals = StockPolicy::Cap
            .apply(&request, &[approval(100, 12), approval(555, 1)], &stock)
            .unwrap();
        assert!(approvals.contains(&approval(100, 12)));
        assert!(approvals.contains(&approval(555, 1)));
        assert_eq!(
            request
                .admin_approve("admin-1", &approvals, now())
                .unwrap_err()
                .code(),
            "quantity_exceeded"
        );
    }

    #[test]
    fn test_repeated_item_rejected_under_every_policy() {
        let request = fixtures::awaiting_admin(&[("BRK-01", 10, 250)]);
        let stock: StockLevels = [(PartId::new(1), 100)].into_iter().collect();
        let approvals = [approval(100, 10), approval(100, 0)];

        for policy in [StockPolicy::Off, StockPolicy::Cap, StockPolicy::Reject] {
            let err = policy.apply(&request, &approvals, &stock).unwrap_err();
            assert!(matches!(err, WorkflowError::Validation(_)), "{policy}: {err:?}");
        }
    }

    #[test]
    fn test_reject_sums_shared_part_without_overflow() {
        let mut request = fixtures::awaiting_admin(&[("BRK-01", 10, 1), ("BRK-01", 10, 1)]);
        for item in &mut request.items {
            item.part_id = PartId::new(1);
            item.requested_qty = i32::MAX;
            item.approved_qty = i32::MAX;
        }
        let stock: StockLevels = [(PartId::new(1), 5)].into_iter().collect();

        let err = StockPolicy::Reject.apply(&request, &[], &stock).unwrap_err();
        assert_eq!(
            err,
            WorkflowError::InsufficientStock {
                part_id: PartId::new(1),
                requested: i32::MAX,
                available: 5,
            }
        );
    }
}
