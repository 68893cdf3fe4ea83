//! Status and role enums for the parts-issue workflow.
//!
//! The status set is closed: every spelling accepted on the wire or read from
//! the database must parse into one of these variants, and anything else is
//! rejected rather than guessed at.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a parts-issue request.
///
/// ```text
/// PENDING_SC_APPROVAL -> PENDING_ADMIN_APPROVAL -> ADMIN_APPROVED -> DISPATCHED -> COMPLETED
///        |                        |        ^
///        v                        v        | resend (nudge)
///   SC_REJECTED             ADMIN_REJECTED
/// ```
///
/// `SC_APPROVED` is only produced by legacy data; admin operations accept it
/// as an alias of `PENDING_ADMIN_APPROVAL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PartsIssueStatus {
    #[default]
    PendingScApproval,
    ScApproved,
    ScRejected,
    PendingAdminApproval,
    AdminApproved,
    AdminRejected,
    Dispatched,
    Completed,
}

impl PartsIssueStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [Self; 8] = [
        Self::PendingScApproval,
        Self::ScApproved,
        Self::ScRejected,
        Self::PendingAdminApproval,
        Self::AdminApproved,
        Self::AdminRejected,
        Self::Dispatched,
        Self::Completed,
    ];

    /// Canonical wire/database spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PendingScApproval => "PENDING_SC_APPROVAL",
            Self::ScApproved => "SC_APPROVED",
            Self::ScRejected => "SC_REJECTED",
            Self::PendingAdminApproval => "PENDING_ADMIN_APPROVAL",
            Self::AdminApproved => "ADMIN_APPROVED",
            Self::AdminRejected => "ADMIN_REJECTED",
            Self::Dispatched => "DISPATCHED",
            Self::Completed => "COMPLETED",
        }
    }

    /// Whether the request is waiting for central-admin review.
    #[must_use]
    pub const fn awaits_admin(self) -> bool {
        matches!(self, Self::PendingAdminApproval | Self::ScApproved)
    }

    /// Whether stock may be released against the request.
    #[must_use]
    pub const fn allows_dispatch(self) -> bool {
        matches!(self, Self::AdminApproved | Self::Dispatched)
    }

    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl std::fmt::Display for PartsIssueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PartsIssueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("invalid parts issue status: {s}"))
    }
}

/// An operation on a parts-issue request.
///
/// Used for authorization checks, audit events and error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowAction {
    Create,
    ScApprove,
    ScReject,
    AdminApprove,
    AdminReject,
    Resend,
    Dispatch,
    Complete,
}

impl WorkflowAction {
    /// All actions.
    pub const ALL: [Self; 8] = [
        Self::Create,
        Self::ScApprove,
        Self::ScReject,
        Self::AdminApprove,
        Self::AdminReject,
        Self::Resend,
        Self::Dispatch,
        Self::Complete,
    ];

    /// Canonical wire/database spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::ScApprove => "SC_APPROVE",
            Self::ScReject => "SC_REJECT",
            Self::AdminApprove => "ADMIN_APPROVE",
            Self::AdminReject => "ADMIN_REJECT",
            Self::Resend => "RESEND",
            Self::Dispatch => "DISPATCH",
            Self::Complete => "COMPLETE",
        }
    }
}

impl std::fmt::Display for WorkflowAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkflowAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| format!("invalid workflow action: {s}"))
    }
}

/// Staff role of the actor performing an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaffRole {
    /// Raises parts requests against job cards.
    Technician,
    /// Service-center manager: first approval gate.
    ServiceManager,
    /// Central admin: quantity approval gate.
    CentralAdmin,
    /// Releases stock against approved requests.
    Warehouse,
}

impl StaffRole {
    /// Whether this role may perform `action`.
    #[must_use]
    pub const fn permits(self, action: WorkflowAction) -> bool {
        match action {
            WorkflowAction::Create => matches!(self, Self::Technician | Self::ServiceManager),
            WorkflowAction::ScApprove | WorkflowAction::ScReject => {
                matches!(self, Self::ServiceManager)
            }
            WorkflowAction::AdminApprove | WorkflowAction::AdminReject => {
                matches!(self, Self::CentralAdmin)
            }
            WorkflowAction::Resend => matches!(self, Self::ServiceManager | Self::CentralAdmin),
            WorkflowAction::Dispatch | WorkflowAction::Complete => {
                matches!(self, Self::Warehouse | Self::CentralAdmin)
            }
        }
    }

    /// Whether this role may open job cards.
    #[must_use]
    pub const fn can_open_job_cards(self) -> bool {
        matches!(self, Self::Technician | Self::ServiceManager)
    }
}

impl std::fmt::Display for StaffRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Technician => write!(f, "technician"),
            Self::ServiceManager => write!(f, "service_manager"),
            Self::CentralAdmin => write!(f, "central_admin"),
            Self::Warehouse => write!(f, "warehouse"),
        }
    }
}

impl std::str::FromStr for StaffRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "technician" => Ok(Self::Technician),
            "service_manager" => Ok(Self::ServiceManager),
            "central_admin" => Ok(Self::CentralAdmin),
            "warehouse" => Ok(Self::Warehouse),
            _ => Err(format!("invalid staff role: {s}")),
        }
    }
}
