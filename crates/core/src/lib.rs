//! PartsFlow Core - Domain types and workflow rules.
//!
//! This crate provides the types shared by every PartsFlow component:
//! - `server` - HTTP API and persistence for parts-issue requests
//! - `cli` - Migrations, sequence maintenance and the status watcher
//!
//! # Architecture
//!
//! The core crate contains types and pure domain logic only - no I/O, no
//! database access, no HTTP clients. Every state transition of a parts-issue
//! request is a plain method on the aggregate, so the rules can be exercised
//! without a running database.
//!
//! # Modules
//!
//! - [`types`] - Newtype IDs, statuses, roles and document numbers
//! - [`parts_issue`] - The parts-issue aggregate, its transitions and projection

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod parts_issue;
pub mod types;

pub use parts_issue::{
    Badge, BucketCounts, CatalogPart, DispatchLine, DispatchPlan, ItemApproval, NewPartsIssue,
    NewPartsIssueItem, OpenRequest, PartsIssueItem, PartsIssueRequest, PricedLine, StatusBucket,
    StatusProjection, StockLevels, StockPolicy, Transition, TransportDetails, WorkflowError,
    project, summarize,
};
pub use types::*;
