//! Parts-issue workflow service.
//!
//! Each mutation follows the same shape: begin a transaction, lock the
//! request row, check the caller's version, run the domain transition, write
//! the request back, append the audit event, commit. Document numbers are
//! allocated inside the same transaction, so a failed operation never
//! consumes one.

use std::collections::HashMap;

use chrono::Utc;
use partsflow_core::{
    BucketCounts, DispatchLine, DocumentKind, ItemApproval, NewPartsIssue, OpenRequest,
    PartsIssueId, PartsIssueRequest, SequenceScope, StockPolicy, Transition, TransportDetails,
    WorkflowError, summarize,
};
use serde::Deserialize;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::instrument;

use crate::config::ServerConfig;
use crate::db::parts_issue::{self as store, DispatchRecord, PartsIssueEvent, PartsIssueFilter};
use crate::db::{CatalogRepository, PartsIssueRepository, catalog, job_cards, sequences};
use crate::error::AppError;

/// Body of a dispatch call.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchInput {
    pub version: i32,
    pub items: Vec<DispatchLine>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub transport_details: Option<TransportDetails>,
}

/// Parts-issue workflow service.
pub struct PartsIssueService<'a> {
    pool: &'a PgPool,
    config: &'a ServerConfig,
}

impl<'a> PartsIssueService<'a> {
    /// Create a new parts-issue service.
    #[must_use]
    pub const fn new(pool: &'a PgPool, config: &'a ServerConfig) -> Self {
        Self { pool, config }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Get a request by ID.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the request does not exist.
    pub async fn get(&self, id: PartsIssueId) -> Result<PartsIssueRequest, AppError> {
        PartsIssueRepository::new(self.pool)
            .get(id)
            .await?
            .ok_or_else(|| not_found(id))
    }

    /// List requests matching `filter`, newest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Database` if the query fails.
    pub async fn list(&self, filter: &PartsIssueFilter) -> Result<Vec<PartsIssueRequest>, AppError> {
        Ok(PartsIssueRepository::new(self.pool).list(filter).await?)
    }

    /// Bucket counts over every request matching `filter`.
    ///
    /// Paging fields of the filter are ignored.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Database` if the query fails.
    pub async fn summary(&self, filter: &PartsIssueFilter) -> Result<BucketCounts, AppError> {
        let filter = PartsIssueFilter {
            limit: None,
            offset: None,
            ..filter.clone()
        };
        let requests = PartsIssueRepository::new(self.pool).list(&filter).await?;
        Ok(summarize(&requests))
    }

    /// Audit trail of a request.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the request does not exist.
    pub async fn events(&self, id: PartsIssueId) -> Result<Vec<PartsIssueEvent>, AppError> {
        let repo = PartsIssueRepository::new(self.pool);
        let events = repo.events(id).await?;
        // Every request has at least its creation event.
        if events.is_empty() && repo.get(id).await?.is_none() {
            return Err(not_found(id));
        }
        Ok(events)
    }

    // =========================================================================
    // Creation
    // =========================================================================

    /// Open a new request against a job card.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for malformed input or an unknown part, and
    /// `AppError::NotFound` for an unknown job card.
    #[instrument(skip(self, input), fields(job_card_id = %input.job_card_id, items = input.items.len()))]
    pub async fn create(
        &self,
        input: &NewPartsIssue,
        actor: &str,
    ) -> Result<PartsIssueRequest, AppError> {
        input.validate()?;

        let part_ids: Vec<_> = input.items.iter().map(|item| item.part_id).collect();
        let parts = CatalogRepository::new(self.pool).parts(&part_ids).await?;
        let lines = input.price(&parts)?;

        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(db)?;

        let job_card = job_cards::get(&mut tx, input.job_card_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("job card {}", input.job_card_id)))?;
        let service_center = catalog::service_center(&mut tx, job_card.service_center_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("service center {}", job_card.service_center_id))
            })?;

        let scope = SequenceScope::at(DocumentKind::PartsIssue, &service_center.code, now)
            .map_err(|e| AppError::Internal(e.to_string()))?;
        let issue_number = sequences::allocate(&mut tx, &scope).await?;

        let (id, item_ids) = store::reserve_ids(&mut tx, lines.len()).await?;
        let items = lines
            .iter()
            .zip(item_ids)
            .map(|(line, item_id)| line.to_item(item_id))
            .collect();

        let (request, transition) = PartsIssueRequest::open(
            OpenRequest {
                id,
                issue_number: issue_number.to_string(),
                job_card_id: job_card.id,
                service_center_id: service_center.id,
                service_center_code: service_center.code,
                service_center_name: service_center.name,
                purchase_order_id: input.purchase_order_id,
                notes: input.notes(),
                requested_by: actor.to_string(),
                at: now,
            },
            items,
        );

        store::insert(&mut tx, &request).await?;
        store::append_event(&mut tx, request.id, &transition, request.version).await?;
        tx.commit().await.map_err(db)?;

        log_transition(&request, &transition);
        Ok(request)
    }

    // =========================================================================
    // Approval
    // =========================================================================

    /// Service-center manager approval.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` or `ConcurrencyConflict` from the workflow.
    #[instrument(skip(self))]
    pub async fn sc_approve(
        &self,
        id: PartsIssueId,
        version: i32,
        actor: &str,
    ) -> Result<PartsIssueRequest, AppError> {
        let mut tx = self.pool.begin().await.map_err(db)?;
        let mut request = lock_at_version(&mut tx, id, version).await?;
        let transition = request.sc_approve(actor, Utc::now())?;
        finish(tx, &request, version, &transition).await?;
        Ok(request)
    }

    /// Service-center manager rejection.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for a blank reason, `InvalidState` or
    /// `ConcurrencyConflict` from the workflow.
    #[instrument(skip(self, reason))]
    pub async fn sc_reject(
        &self,
        id: PartsIssueId,
        version: i32,
        reason: &str,
        actor: &str,
    ) -> Result<PartsIssueRequest, AppError> {
        let mut tx = self.pool.begin().await.map_err(db)?;
        let mut request = lock_at_version(&mut tx, id, version).await?;
        let transition = request.sc_reject(actor, reason, Utc::now())?;
        finish(tx, &request, version, &transition).await?;
        Ok(request)
    }

    /// Central-admin approval with per-item quantities.
    ///
    /// Under a stock policy other than `off`, the on-hand rows of the
    /// request's parts are locked and the approvals checked against them.
    ///
    /// # Errors
    ///
    /// Returns `QuantityExceeded`, `InsufficientStock`, `InvalidState` or
    /// `ConcurrencyConflict` from the workflow.
    #[instrument(skip(self, approvals), fields(lines = approvals.len(), stock_policy = %self.config.stock_policy))]
    pub async fn admin_approve(
        &self,
        id: PartsIssueId,
        version: i32,
        approvals: &[ItemApproval],
        actor: &str,
    ) -> Result<PartsIssueRequest, AppError> {
        let mut tx = self.pool.begin().await.map_err(db)?;
        let mut request = lock_at_version(&mut tx, id, version).await?;

        let approvals = if self.config.stock_policy == StockPolicy::Off {
            approvals.to_vec()
        } else {
            let part_ids: Vec<_> = request.items.iter().map(|item| item.part_id).collect();
            let stock = catalog::lock_stock(&mut tx, &part_ids).await?;
            self.config
                .stock_policy
                .apply(&request, approvals, &stock)?
        };

        let transition = request.admin_approve(actor, &approvals, Utc::now())?;
        finish(tx, &request, version, &transition).await?;

        if request.nothing_approved() {
            tracing::warn!(parts_issue_id = %request.id, "Admin approved every line at zero");
        }
        Ok(request)
    }

    /// Central-admin rejection.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for a blank reason, `InvalidState` or
    /// `ConcurrencyConflict` from the workflow.
    #[instrument(skip(self, reason))]
    pub async fn admin_reject(
        &self,
        id: PartsIssueId,
        version: i32,
        reason: &str,
        actor: &str,
    ) -> Result<PartsIssueRequest, AppError> {
        let mut tx = self.pool.begin().await.map_err(db)?;
        let mut request = lock_at_version(&mut tx, id, version).await?;
        let transition = request.admin_reject(actor, reason, Utc::now())?;
        finish(tx, &request, version, &transition).await?;
        Ok(request)
    }

    /// Send the request back for review, or remind the admin.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` or `ConcurrencyConflict` from the workflow.
    #[instrument(skip(self))]
    pub async fn resend(
        &self,
        id: PartsIssueId,
        version: i32,
        actor: &str,
    ) -> Result<PartsIssueRequest, AppError> {
        let mut tx = self.pool.begin().await.map_err(db)?;
        let mut request = lock_at_version(&mut tx, id, version).await?;
        let transition = request.resend(actor, Utc::now())?;
        finish(tx, &request, version, &transition).await?;
        Ok(request)
    }

    // =========================================================================
    // Fulfillment
    // =========================================================================

    /// Release approved quantities, allocating sub-PO numbers for lines
    /// shipping for the first time.
    ///
    /// With an idempotency key, a replay of an applied dispatch returns the
    /// current state without applying anything. The key is checked before
    /// the version, so a retry carrying the version it originally read is
    /// still recognised.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for a malformed dispatch or a reused key,
    /// `QuantityExceeded`, `InvalidState` or `ConcurrencyConflict` from the
    /// workflow.
    #[instrument(
        skip(self, input),
        fields(lines = input.items.len(), idempotency_key = input.idempotency_key.as_deref())
    )]
    pub async fn dispatch(
        &self,
        id: PartsIssueId,
        input: DispatchInput,
        actor: &str,
    ) -> Result<PartsIssueRequest, AppError> {
        let key = input
            .idempotency_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(ToString::to_string);
        let fingerprint = dispatch_fingerprint(&input.items, input.transport_details.as_ref());

        let mut tx = self.pool.begin().await.map_err(db)?;

        if let Some(key) = key.as_deref()
            && let Some(record) = store::find_dispatch(&mut tx, key).await?
        {
            if record.parts_issue_id != id || record.request_fingerprint != fingerprint {
                return Err(WorkflowError::validation(format!(
                    "idempotency key {key} was already used for a different dispatch"
                ))
                .into());
            }
            let request = store::lock(&mut tx, id).await?.ok_or_else(|| not_found(id))?;
            tx.commit().await.map_err(db)?;
            tracing::info!(
                parts_issue_id = %id,
                resulting_version = record.resulting_version,
                "Dispatch replayed, nothing applied"
            );
            return Ok(request);
        }

        let mut request = lock_at_version(&mut tx, id, input.version).await?;
        let plan = request.plan_dispatch(&input.items)?;

        let now = Utc::now();
        let mut sub_po_numbers = HashMap::new();
        for item_id in plan.needs_sub_po() {
            let location = self.config.sub_po_location(&request.service_center_code);
            let scope = SequenceScope::at(DocumentKind::SubPurchaseOrder, location, now)
                .map_err(|e| AppError::Internal(e.to_string()))?;
            let number = sequences::allocate(&mut tx, &scope).await?;
            sub_po_numbers.insert(item_id, number.to_string());
        }

        let transition =
            request.apply_dispatch(&plan, &sub_po_numbers, input.transport_details, actor, now)?;

        store::save(&mut tx, &request, input.version).await?;
        store::append_event(&mut tx, request.id, &transition, request.version).await?;
        if let Some(key) = key {
            let record = DispatchRecord {
                idempotency_key: key,
                parts_issue_id: request.id,
                request_fingerprint: fingerprint,
                resulting_version: request.version,
            };
            store::record_dispatch(&mut tx, &record, actor, now).await?;
        }
        tx.commit().await.map_err(db)?;

        log_transition(&request, &transition);
        Ok(request)
    }

    /// Close a fully dispatched request.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` or `ConcurrencyConflict` from the workflow.
    #[instrument(skip(self))]
    pub async fn complete(
        &self,
        id: PartsIssueId,
        version: i32,
        actor: &str,
    ) -> Result<PartsIssueRequest, AppError> {
        let mut tx = self.pool.begin().await.map_err(db)?;
        let mut request = lock_at_version(&mut tx, id, version).await?;
        let transition = request.complete(actor, Utc::now())?;
        finish(tx, &request, version, &transition).await?;
        Ok(request)
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Lock the request and check the caller read its current version.
async fn lock_at_version(
    tx: &mut Transaction<'_, Postgres>,
    id: PartsIssueId,
    version: i32,
) -> Result<PartsIssueRequest, AppError> {
    let request = store::lock(tx, id).await?.ok_or_else(|| not_found(id))?;
    request.ensure_version(version)?;
    Ok(request)
}

/// Write the request and its audit event, then commit.
async fn finish(
    mut tx: Transaction<'_, Postgres>,
    request: &PartsIssueRequest,
    read_version: i32,
    transition: &Transition,
) -> Result<(), AppError> {
    store::save(&mut tx, request, read_version).await?;
    store::append_event(&mut tx, request.id, transition, request.version).await?;
    tx.commit().await.map_err(db)?;
    log_transition(request, transition);
    Ok(())
}

fn log_transition(request: &PartsIssueRequest, transition: &Transition) {
    tracing::info!(
        parts_issue_id = %request.id,
        issue_number = %request.issue_number,
        action = %transition.action,
        from = %transition.from,
        to = %transition.to,
        actor = %transition.actor,
        version = request.version,
        "Parts issue transition"
    );
}

/// Canonical form of a dispatch payload, independent of line order.
///
/// Free-text transport fields are JSON-escaped, so no field content can
/// imitate a separator.
fn dispatch_fingerprint(lines: &[DispatchLine], transport: Option<&TransportDetails>) -> String {
    let mut sorted: Vec<_> = lines.iter().map(|l| (l.item_id.as_i32(), l.quantity)).collect();
    sorted.sort_unstable();

    serde_json::json!({ "lines": sorted, "transport": transport }).to_string()
}

fn not_found(id: PartsIssueId) -> AppError {
    AppError::NotFound(format!("parts issue {id}"))
}

fn db(e: sqlx::Error) -> AppError {
    AppError::Database(e.into())
}
