//! Persistence of the parts-issue aggregate and its audit trail.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use partsflow_core::{
    JobCardId, PartId, PartsIssueEventId, PartsIssueId, PartsIssueItem, PartsIssueItemId,
    PartsIssueRequest, PartsIssueStatus, PurchaseOrderId, ServiceCenterId, Transition,
    TransportDetails, WorkflowAction,
};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};

use super::{RepositoryError, conflict_on_unique};

// =============================================================================
// Internal Row Types
// =============================================================================

const HEADER_COLUMNS: &str = "id, issue_number, job_card_id, service_center_id, \
     service_center_code, service_center_name, purchase_order_id, status, notes, \
     sc_manager_approved, sc_manager_approved_by, sc_manager_approved_at, \
     sc_rejected, sc_rejected_by, sc_rejected_at, sc_rejected_reason, \
     admin_approved, admin_approved_by, admin_approved_at, \
     admin_rejected, admin_rejected_by, admin_rejected_at, admin_rejected_reason, \
     sent_to_admin_at, resend_count, issued_by, issued_at, \
     last_dispatched_by, last_dispatched_at, completed_by, completed_at, \
     transport_details, total_amount, version, created_at, updated_at";

const ITEM_COLUMNS: &str = "id, parts_issue_id, part_id, part_name, part_number, hsn_code, \
     is_warranty, serial_number, requested_qty, approved_qty, issued_qty, \
     unit_price, total_price, sub_po_number";

#[derive(Debug, sqlx::FromRow)]
struct HeaderRow {
    id: i32,
    issue_number: String,
    job_card_id: i32,
    service_center_id: i32,
    service_center_code: String,
    service_center_name: String,
    purchase_order_id: Option<i32>,
    status: String,
    notes: Option<String>,
    sc_manager_approved: bool,
    sc_manager_approved_by: Option<String>,
    sc_manager_approved_at: Option<DateTime<Utc>>,
    sc_rejected: bool,
    sc_rejected_by: Option<String>,
    sc_rejected_at: Option<DateTime<Utc>>,
    sc_rejected_reason: Option<String>,
    admin_approved: bool,
    admin_approved_by: Option<String>,
    admin_approved_at: Option<DateTime<Utc>>,
    admin_rejected: bool,
    admin_rejected_by: Option<String>,
    admin_rejected_at: Option<DateTime<Utc>>,
    admin_rejected_reason: Option<String>,
    sent_to_admin_at: Option<DateTime<Utc>>,
    resend_count: i32,
    issued_by: String,
    issued_at: DateTime<Utc>,
    last_dispatched_by: Option<String>,
    last_dispatched_at: Option<DateTime<Utc>>,
    completed_by: Option<String>,
    completed_at: Option<DateTime<Utc>>,
    transport_details: Option<Json<TransportDetails>>,
    total_amount: Decimal,
    version: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct ItemRow {
    id: i32,
    parts_issue_id: i32,
    part_id: i32,
    part_name: String,
    part_number: Option<String>,
    hsn_code: Option<String>,
    is_warranty: bool,
    serial_number: Option<String>,
    requested_qty: i32,
    approved_qty: i32,
    issued_qty: i32,
    unit_price: Decimal,
    total_price: Decimal,
    sub_po_number: Option<String>,
}

impl From<ItemRow> for PartsIssueItem {
    fn from(row: ItemRow) -> Self {
        Self {
            id: PartsIssueItemId::new(row.id),
            part_id: PartId::new(row.part_id),
            part_name: row.part_name,
            part_number: row.part_number,
            hsn_code: row.hsn_code,
            is_warranty: row.is_warranty,
            serial_number: row.serial_number,
            requested_qty: row.requested_qty,
            approved_qty: row.approved_qty,
            issued_qty: row.issued_qty,
            unit_price: row.unit_price,
            total_price: row.total_price,
            sub_po_number: row.sub_po_number,
        }
    }
}

impl HeaderRow {
    fn into_request(self, items: Vec<PartsIssueItem>) -> Result<PartsIssueRequest, RepositoryError> {
        let status = self.status.parse::<PartsIssueStatus>().map_err(|e| {
            RepositoryError::DataCorruption(format!("parts issue {}: {e}", self.id))
        })?;

        let request = PartsIssueRequest {
            id: PartsIssueId::new(self.id),
            issue_number: self.issue_number,
            job_card_id: JobCardId::new(self.job_card_id),
            service_center_id: ServiceCenterId::new(self.service_center_id),
            service_center_code: self.service_center_code,
            service_center_name: self.service_center_name,
            purchase_order_id: self.purchase_order_id.map(PurchaseOrderId::new),
            items,
            status,
            notes: self.notes,
            sc_manager_approved: self.sc_manager_approved,
            sc_manager_approved_by: self.sc_manager_approved_by,
            sc_manager_approved_at: self.sc_manager_approved_at,
            sc_rejected: self.sc_rejected,
            sc_rejected_by: self.sc_rejected_by,
            sc_rejected_at: self.sc_rejected_at,
            sc_rejected_reason: self.sc_rejected_reason,
            admin_approved: self.admin_approved,
            admin_approved_by: self.admin_approved_by,
            admin_approved_at: self.admin_approved_at,
            admin_rejected: self.admin_rejected,
            admin_rejected_by: self.admin_rejected_by,
            admin_rejected_at: self.admin_rejected_at,
            admin_rejected_reason: self.admin_rejected_reason,
            sent_to_admin_at: self.sent_to_admin_at,
            resend_count: self.resend_count,
            issued_by: self.issued_by,
            issued_at: self.issued_at,
            last_dispatched_by: self.last_dispatched_by,
            last_dispatched_at: self.last_dispatched_at,
            completed_by: self.completed_by,
            completed_at: self.completed_at,
            transport_details: self.transport_details.map(|json| json.0),
            total_amount: self.total_amount,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        };

        if !request.invariants_hold() {
            return Err(RepositoryError::DataCorruption(format!(
                "parts issue {} violates its quantity invariants",
                request.id
            )));
        }
        Ok(request)
    }
}

/// One row of the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartsIssueEvent {
    pub id: PartsIssueEventId,
    pub parts_issue_id: PartsIssueId,
    pub action: WorkflowAction,
    pub from_status: PartsIssueStatus,
    pub to_status: PartsIssueStatus,
    pub actor: String,
    pub detail: Option<String>,
    /// Version of the request after the transition.
    pub version: i32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    id: i32,
    parts_issue_id: i32,
    action: String,
    from_status: String,
    to_status: String,
    actor: String,
    detail: Option<String>,
    version: i32,
    occurred_at: DateTime<Utc>,
}

impl TryFrom<EventRow> for PartsIssueEvent {
    type Error = RepositoryError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: PartsIssueEventId::new(row.id),
            parts_issue_id: PartsIssueId::new(row.parts_issue_id),
            action: row
                .action
                .parse()
                .map_err(RepositoryError::DataCorruption)?,
            from_status: row
                .from_status
                .parse()
                .map_err(RepositoryError::DataCorruption)?,
            to_status: row
                .to_status
                .parse()
                .map_err(RepositoryError::DataCorruption)?,
            actor: row.actor,
            detail: row.detail,
            version: row.version,
            occurred_at: row.occurred_at,
        })
    }
}

/// Filters for listing requests.
#[derive(Debug, Clone, Default)]
pub struct PartsIssueFilter {
    pub status: Option<PartsIssueStatus>,
    pub service_center_id: Option<ServiceCenterId>,
    pub job_card_id: Option<JobCardId>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// A dispatch recorded under an idempotency key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchRecord {
    pub idempotency_key: String,
    pub parts_issue_id: PartsIssueId,
    pub request_fingerprint: String,
    pub resulting_version: i32,
}

#[derive(Debug, sqlx::FromRow)]
struct DispatchRecordRow {
    idempotency_key: String,
    parts_issue_id: i32,
    request_fingerprint: String,
    resulting_version: i32,
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for parts-issue reads.
pub struct PartsIssueRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> PartsIssueRepository<'a> {
    /// Create a new parts-issue repository.
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Get a request with its items.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails, or
    /// `RepositoryError::DataCorruption` for an unreadable row.
    pub async fn get(&self, id: PartsIssueId) -> Result<Option<PartsIssueRequest>, RepositoryError> {
        let mut tx = snapshot(self.pool).await?;
        let header: Option<HeaderRow> = sqlx::query_as(&format!(
            "SELECT {HEADER_COLUMNS} FROM workshop.parts_issue WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let request = match header {
            Some(header) => {
                let items = items_for(&mut tx, &[header.id]).await?;
                Some(header.into_request(items.into_values().flatten().collect())?)
            }
            None => None,
        };
        tx.commit().await?;
        Ok(request)
    }

    /// List requests, newest first.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails, or
    /// `RepositoryError::DataCorruption` for an unreadable row.
    pub async fn list(
        &self,
        filter: &PartsIssueFilter,
    ) -> Result<Vec<PartsIssueRequest>, RepositoryError> {
        let mut tx = snapshot(self.pool).await?;
        let headers: Vec<HeaderRow> = sqlx::query_as(&format!(
            r"
            SELECT {HEADER_COLUMNS}
            FROM workshop.parts_issue
            WHERE ($1::TEXT IS NULL OR status = $1)
              AND ($2::INTEGER IS NULL OR service_center_id = $2)
              AND ($3::INTEGER IS NULL OR job_card_id = $3)
            ORDER BY created_at DESC, id DESC
            LIMIT $4 OFFSET $5
            "
        ))
        .bind(filter.status.map(PartsIssueStatus::as_str))
        .bind(filter.service_center_id)
        .bind(filter.job_card_id)
        .bind(filter.limit)
        .bind(filter.offset.unwrap_or(0))
        .fetch_all(&mut *tx)
        .await?;

        let ids: Vec<i32> = headers.iter().map(|h| h.id).collect();
        let mut items = items_for(&mut tx, &ids).await?;
        tx.commit().await?;

        headers
            .into_iter()
            .map(|header| {
                let lines = items.remove(&header.id).unwrap_or_default();
                header.into_request(lines)
            })
            .collect()
    }

    /// Audit trail of a request, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails, or
    /// `RepositoryError::DataCorruption` for an unreadable row.
    pub async fn events(&self, id: PartsIssueId) -> Result<Vec<PartsIssueEvent>, RepositoryError> {
        let rows: Vec<EventRow> = sqlx::query_as(
            r"
            SELECT id, parts_issue_id, action, from_status, to_status, actor,
                   detail, version, occurred_at
            FROM workshop.parts_issue_event
            WHERE parts_issue_id = $1
            ORDER BY id
            ",
        )
        .bind(id)
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(PartsIssueEvent::try_from).collect()
    }
}

// =============================================================================
// Transactional Operations
// =============================================================================

/// Load a request and lock its row until the transaction ends.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails, or
/// `RepositoryError::DataCorruption` for an unreadable row.
pub async fn lock(
    conn: &mut PgConnection,
    id: PartsIssueId,
) -> Result<Option<PartsIssueRequest>, RepositoryError> {
    let header: Option<HeaderRow> = sqlx::query_as(&format!(
        "SELECT {HEADER_COLUMNS} FROM workshop.parts_issue WHERE id = $1 FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    match header {
        Some(header) => {
            let items = items_for(conn, &[header.id]).await?;
            Ok(Some(header.into_request(items.into_values().flatten().collect())?))
        }
        None => Ok(None),
    }
}

/// Reserve ids for a new request and its items.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn reserve_ids(
    conn: &mut PgConnection,
    item_count: usize,
) -> Result<(PartsIssueId, Vec<PartsIssueItemId>), RepositoryError> {
    let id: i32 = sqlx::query_scalar(
        "SELECT nextval(pg_get_serial_sequence('workshop.parts_issue', 'id'))::INTEGER",
    )
    .fetch_one(&mut *conn)
    .await?;

    let count = i32::try_from(item_count)
        .map_err(|_| RepositoryError::Conflict("too many items".to_string()))?;
    let item_ids: Vec<i32> = sqlx::query_scalar(
        r"
        SELECT nextval(pg_get_serial_sequence('workshop.parts_issue_item', 'id'))::INTEGER
        FROM generate_series(1, $1)
        ",
    )
    .bind(count)
    .fetch_all(&mut *conn)
    .await?;

    Ok((
        PartsIssueId::new(id),
        item_ids.into_iter().map(PartsIssueItemId::new).collect(),
    ))
}

/// Insert a freshly opened request with its items.
///
/// # Errors
///
/// Returns `RepositoryError::Conflict` if the issue number is taken.
pub async fn insert(
    conn: &mut PgConnection,
    request: &PartsIssueRequest,
) -> Result<(), RepositoryError> {
    sqlx::query(
        r"
        INSERT INTO workshop.parts_issue (
            id, issue_number, job_card_id, service_center_id, service_center_code,
            service_center_name, purchase_order_id, status, notes,
            issued_by, issued_at, total_amount, version, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
        ",
    )
    .bind(request.id)
    .bind(&request.issue_number)
    .bind(request.job_card_id)
    .bind(request.service_center_id)
    .bind(&request.service_center_code)
    .bind(&request.service_center_name)
    .bind(request.purchase_order_id)
    .bind(request.status.as_str())
    .bind(&request.notes)
    .bind(&request.issued_by)
    .bind(request.issued_at)
    .bind(request.total_amount)
    .bind(request.version)
    .bind(request.created_at)
    .bind(request.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| conflict_on_unique(e, "issue number"))?;

    for (position, item) in request.items.iter().enumerate() {
        let position = i32::try_from(position)
            .map_err(|_| RepositoryError::Conflict("too many items".to_string()))?;
        sqlx::query(
            r"
            INSERT INTO workshop.parts_issue_item (
                id, parts_issue_id, position, part_id, part_name, part_number, hsn_code,
                is_warranty, serial_number, requested_qty, approved_qty, issued_qty,
                unit_price, total_price, sub_po_number
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ",
        )
        .bind(item.id)
        .bind(request.id)
        .bind(position)
        .bind(item.part_id)
        .bind(&item.part_name)
        .bind(&item.part_number)
        .bind(&item.hsn_code)
        .bind(item.is_warranty)
        .bind(&item.serial_number)
        .bind(item.requested_qty)
        .bind(item.approved_qty)
        .bind(item.issued_qty)
        .bind(item.unit_price)
        .bind(item.total_price)
        .bind(&item.sub_po_number)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

/// Write back a mutated request.
///
/// The update is conditional on `read_version`; the row lock taken by
/// [`lock`] makes a mismatch impossible unless the row was modified outside
/// the workflow, which is reported as a conflict.
///
/// # Errors
///
/// Returns `RepositoryError::Conflict` if the stored version moved or a
/// sub-PO number collides.
pub async fn save(
    conn: &mut PgConnection,
    request: &PartsIssueRequest,
    read_version: i32,
) -> Result<(), RepositoryError> {
    let updated = sqlx::query(
        r"
        UPDATE workshop.parts_issue SET
            status = $3,
            sc_manager_approved = $4, sc_manager_approved_by = $5, sc_manager_approved_at = $6,
            sc_rejected = $7, sc_rejected_by = $8, sc_rejected_at = $9, sc_rejected_reason = $10,
            admin_approved = $11, admin_approved_by = $12, admin_approved_at = $13,
            admin_rejected = $14, admin_rejected_by = $15, admin_rejected_at = $16,
            admin_rejected_reason = $17,
            sent_to_admin_at = $18, resend_count = $19,
            last_dispatched_by = $20, last_dispatched_at = $21,
            completed_by = $22, completed_at = $23,
            transport_details = $24, total_amount = $25,
            version = $26, updated_at = $27
        WHERE id = $1 AND version = $2
        ",
    )
    .bind(request.id)
    .bind(read_version)
    .bind(request.status.as_str())
    .bind(request.sc_manager_approved)
    .bind(&request.sc_manager_approved_by)
    .bind(request.sc_manager_approved_at)
    .bind(request.sc_rejected)
    .bind(&request.sc_rejected_by)
    .bind(request.sc_rejected_at)
    .bind(&request.sc_rejected_reason)
    .bind(request.admin_approved)
    .bind(&request.admin_approved_by)
    .bind(request.admin_approved_at)
    .bind(request.admin_rejected)
    .bind(&request.admin_rejected_by)
    .bind(request.admin_rejected_at)
    .bind(&request.admin_rejected_reason)
    .bind(request.sent_to_admin_at)
    .bind(request.resend_count)
    .bind(&request.last_dispatched_by)
    .bind(request.last_dispatched_at)
    .bind(&request.completed_by)
    .bind(request.completed_at)
    .bind(request.transport_details.clone().map(Json))
    .bind(request.total_amount)
    .bind(request.version)
    .bind(request.updated_at)
    .execute(&mut *conn)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(RepositoryError::Conflict(format!(
            "parts issue {} is no longer at version {read_version}",
            request.id
        )));
    }

    for item in &request.items {
        sqlx::query(
            r"
            UPDATE workshop.parts_issue_item SET
                approved_qty = $2, issued_qty = $3, total_price = $4, sub_po_number = $5
            WHERE id = $1
            ",
        )
        .bind(item.id)
        .bind(item.approved_qty)
        .bind(item.issued_qty)
        .bind(item.total_price)
        .bind(&item.sub_po_number)
        .execute(&mut *conn)
        .await
        .map_err(|e| conflict_on_unique(e, "sub-PO number"))?;
    }

    Ok(())
}

/// Append a transition to the audit trail.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the insert fails.
pub async fn append_event(
    conn: &mut PgConnection,
    id: PartsIssueId,
    transition: &Transition,
    version: i32,
) -> Result<(), RepositoryError> {
    sqlx::query(
        r"
        INSERT INTO workshop.parts_issue_event (
            parts_issue_id, action, from_status, to_status, actor, detail, version, occurred_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ",
    )
    .bind(id)
    .bind(transition.action.as_str())
    .bind(transition.from.as_str())
    .bind(transition.to.as_str())
    .bind(&transition.actor)
    .bind(&transition.detail)
    .bind(version)
    .bind(transition.at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Look up a dispatch idempotency key.
///
/// The key row is locked so a concurrent retry with the same key waits for
/// the first attempt to commit.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn find_dispatch(
    conn: &mut PgConnection,
    idempotency_key: &str,
) -> Result<Option<DispatchRecord>, RepositoryError> {
    let row: Option<DispatchRecordRow> = sqlx::query_as(
        r"
        SELECT idempotency_key, parts_issue_id, request_fingerprint, resulting_version
        FROM workshop.parts_issue_dispatch
        WHERE idempotency_key = $1
        FOR UPDATE
        ",
    )
    .bind(idempotency_key)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(|row| DispatchRecord {
        idempotency_key: row.idempotency_key,
        parts_issue_id: PartsIssueId::new(row.parts_issue_id),
        request_fingerprint: row.request_fingerprint,
        resulting_version: row.resulting_version,
    }))
}

/// Record an applied dispatch under its idempotency key.
///
/// # Errors
///
/// Returns `RepositoryError::Conflict` if the key was recorded concurrently.
pub async fn record_dispatch(
    conn: &mut PgConnection,
    record: &DispatchRecord,
    dispatched_by: &str,
    dispatched_at: DateTime<Utc>,
) -> Result<(), RepositoryError> {
    sqlx::query(
        r"
        INSERT INTO workshop.parts_issue_dispatch (
            idempotency_key, parts_issue_id, request_fingerprint,
            resulting_version, dispatched_by, dispatched_at
        )
        VALUES ($1, $2, $3, $4, $5, $6)
        ",
    )
    .bind(&record.idempotency_key)
    .bind(record.parts_issue_id)
    .bind(&record.request_fingerprint)
    .bind(record.resulting_version)
    .bind(dispatched_by)
    .bind(dispatched_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| conflict_on_unique(e, "idempotency key"))?;

    Ok(())
}

/// Read-only transaction whose statements all see one snapshot.
///
/// Headers and items are read by separate statements; under the default
/// READ COMMITTED a commit landing between them would pair one version's
/// header with another version's items.
async fn snapshot(pool: &PgPool) -> Result<Transaction<'static, Postgres>, RepositoryError> {
    let mut tx = pool.begin().await?;
    sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
        .execute(&mut *tx)
        .await?;
    Ok(tx)
}

/// Items of the given requests, grouped by request and kept in line order.
async fn items_for(
    conn: &mut PgConnection,
    ids: &[i32],
) -> Result<HashMap<i32, Vec<PartsIssueItem>>, RepositoryError> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let rows: Vec<ItemRow> = sqlx::query_as(&format!(
        r"
        SELECT {ITEM_COLUMNS}
        FROM workshop.parts_issue_item
        WHERE parts_issue_id = ANY($1)
        ORDER BY parts_issue_id, position
        "
    ))
    .bind(ids)
    .fetch_all(&mut *conn)
    .await?;

    let mut grouped: HashMap<i32, Vec<PartsIssueItem>> = HashMap::new();
    for row in rows {
        grouped.entry(row.parts_issue_id).or_default().push(row.into());
    }
    Ok(grouped)
}
