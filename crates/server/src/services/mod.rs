//! Business logic services.
//!
//! # Services
//!
//! - `parts_issue` - Parts-issue workflow: creation, approvals, resend, dispatch, completion
//! - `job_card` - Job-card creation with allocated numbers
//!
//! Every mutating operation runs in a single transaction with the affected
//! rows locked, and either commits completely or leaves nothing behind.

pub mod job_card;
pub mod parts_issue;

pub use job_card::JobCardService;
pub use parts_issue::{DispatchInput, PartsIssueService};
