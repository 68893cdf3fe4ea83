//! Master data: service centers, the parts catalog and on-hand stock.

use chrono::{DateTime, Utc};
use partsflow_core::{CatalogPart, PartId, ServiceCenterId, StockLevels};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{PgConnection, PgPool};

use super::{RepositoryError, conflict_on_unique};

/// A service center.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceCenter {
    pub id: ServiceCenterId,
    /// Location code used in document numbers.
    pub code: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct ServiceCenterRow {
    id: i32,
    code: String,
    name: String,
    created_at: DateTime<Utc>,
}

impl From<ServiceCenterRow> for ServiceCenter {
    fn from(row: ServiceCenterRow) -> Self {
        Self {
            id: ServiceCenterId::new(row.id),
            code: row.code,
            name: row.name,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PartRow {
    id: i32,
    part_name: String,
    part_number: Option<String>,
    hsn_code: Option<String>,
    unit_price: Decimal,
}

impl From<PartRow> for CatalogPart {
    fn from(row: PartRow) -> Self {
        Self {
            part_id: PartId::new(row.id),
            part_name: row.part_name,
            part_number: row.part_number,
            hsn_code: row.hsn_code,
            unit_price: row.unit_price,
        }
    }
}

/// Repository for master-data reads.
pub struct CatalogRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> CatalogRepository<'a> {
    /// Create a new catalog repository.
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Get a service center by ID.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn service_center(
        &self,
        id: ServiceCenterId,
    ) -> Result<Option<ServiceCenter>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        service_center(&mut conn, id).await
    }

    /// Catalog entries for the given parts. Unknown ids are simply absent.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn parts(&self, ids: &[PartId]) -> Result<Vec<CatalogPart>, RepositoryError> {
        let ids: Vec<i32> = ids.iter().map(PartId::as_i32).collect();
        let rows: Vec<PartRow> = sqlx::query_as(
            r"
            SELECT id, part_name, part_number, hsn_code, unit_price
            FROM workshop.part
            WHERE id = ANY($1)
            ",
        )
        .bind(&ids)
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Register a service center, or return the existing one with that code.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn upsert_service_center(
        &self,
        code: &str,
        name: &str,
    ) -> Result<ServiceCenter, RepositoryError> {
        let row: ServiceCenterRow = sqlx::query_as(
            r"
            INSERT INTO workshop.service_center (code, name)
            VALUES ($1, $2)
            ON CONFLICT (code) DO UPDATE SET name = EXCLUDED.name
            RETURNING id, code, name, created_at
            ",
        )
        .bind(code)
        .bind(name)
        .fetch_one(self.pool)
        .await?;

        Ok(row.into())
    }

    /// Add a part to the catalog.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Conflict` if the part number is taken.
    pub async fn upsert_part(&self, part: &CatalogPart) -> Result<CatalogPart, RepositoryError> {
        let row: PartRow = sqlx::query_as(
            r"
            INSERT INTO workshop.part (part_name, part_number, hsn_code, unit_price)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (part_number) DO UPDATE
                SET part_name = EXCLUDED.part_name,
                    hsn_code = EXCLUDED.hsn_code,
                    unit_price = EXCLUDED.unit_price
            RETURNING id, part_name, part_number, hsn_code, unit_price
            ",
        )
        .bind(&part.part_name)
        .bind(&part.part_number)
        .bind(&part.hsn_code)
        .bind(part.unit_price)
        .fetch_one(self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, "part"))?;

        Ok(row.into())
    }

    /// Set the on-hand quantity of a part.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn set_stock(&self, part_id: PartId, on_hand: i32) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO workshop.part_stock (part_id, on_hand)
            VALUES ($1, $2)
            ON CONFLICT (part_id) DO UPDATE SET on_hand = EXCLUDED.on_hand, updated_at = NOW()
            ",
        )
        .bind(part_id)
        .bind(on_hand.max(0))
        .execute(self.pool)
        .await?;

        Ok(())
    }
}

/// Get a service center by ID on an existing connection.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn service_center(
    conn: &mut PgConnection,
    id: ServiceCenterId,
) -> Result<Option<ServiceCenter>, RepositoryError> {
    let row: Option<ServiceCenterRow> = sqlx::query_as(
        r"
        SELECT id, code, name, created_at
        FROM workshop.service_center
        WHERE id = $1
        ",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(Into::into))
}

/// On-hand stock for the given parts, locked until the transaction ends.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn lock_stock(
    conn: &mut PgConnection,
    ids: &[PartId],
) -> Result<StockLevels, RepositoryError> {
    let ids: Vec<i32> = ids.iter().map(PartId::as_i32).collect();
    let rows: Vec<(i32, i32)> = sqlx::query_as(
        r"
        SELECT part_id, on_hand
        FROM workshop.part_stock
        WHERE part_id = ANY($1)
        ORDER BY part_id
        FOR UPDATE
        ",
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(part_id, on_hand)| (PartId::new(part_id), on_hand))
        .collect())
}
