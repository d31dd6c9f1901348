//! Invoice number allocation.
//!
//! Numbers look like `INV-YYYYMMDD-NNNN`: a per-(tenant, calendar day)
//! sequence rendered zero-padded to four digits, widening naturally past
//! 9999. Allocation is an atomic upsert on a dedicated counter row, never a
//! scan of existing invoice numbers, which would race under concurrent
//! creation and hand two callers the same value. If the counter row cannot
//! be written the invoice creation aborts; there is no fallback.

use chrono::NaiveDate;
use sqlx::PgConnection;
use tracing::{info, instrument};
use uuid::Uuid;

use service_core::error::AppError;

/// Allocate the next sequence value for (tenant, day).
///
/// Runs on the caller's transaction so a rolled-back invoice creation also
/// rolls back the increment. The row-level lock taken by the upsert
/// serializes concurrent same-tenant-same-day allocations; distinct tenants
/// or days never contend.
pub async fn next_sequence(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    day: NaiveDate,
) -> Result<i64, AppError> {
    let value: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO invoice_number_counters (tenant_id, seq_date, last_value)
        VALUES ($1, $2, 1)
        ON CONFLICT (tenant_id, seq_date)
        DO UPDATE SET last_value = invoice_number_counters.last_value + 1
        RETURNING last_value
        "#,
    )
    .bind(tenant_id)
    .bind(day)
    .fetch_one(conn)
    .await
    .map_err(|e| {
        AppError::DatabaseError(anyhow::anyhow!("Failed to allocate invoice sequence: {}", e))
    })?;

    Ok(value)
}

/// Allocate and format in one step.
pub async fn next_invoice_number(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    day: NaiveDate,
) -> Result<String, AppError> {
    let seq = next_sequence(conn, tenant_id, day).await?;
    Ok(format_invoice_number(day, seq))
}

/// Render `INV-YYYYMMDD-NNNN`. Sequences beyond 9999 widen to more digits
/// rather than wrapping.
pub fn format_invoice_number(day: NaiveDate, seq: i64) -> String {
    format!("INV-{}-{:04}", day.format("%Y%m%d"), seq)
}

/// Extract the numeric suffix of an invoice number, if it has the expected
/// shape. Used only by the resync maintenance path.
pub fn parse_sequence_suffix(invoice_number: &str) -> Option<i64> {
    let suffix = invoice_number.rsplit('-').next()?;
    suffix.parse().ok()
}

/// One-time maintenance operation after a bulk load or migration: raise the
/// counter for (tenant, day) above the highest suffix already present in the
/// invoices table. Never lowers the counter, and is never called implicitly
/// by `next_sequence`.
#[instrument(skip(conn), fields(tenant_id = %tenant_id, day = %day))]
pub async fn resync_counter(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    day: NaiveDate,
) -> Result<i64, AppError> {
    let prefix = format!("INV-{}-%", day.format("%Y%m%d"));

    let numbers: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT invoice_number
        FROM invoices
        WHERE tenant_id = $1 AND invoice_number LIKE $2
        "#,
    )
    .bind(tenant_id)
    .bind(&prefix)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| {
        AppError::DatabaseError(anyhow::anyhow!("Failed to scan invoice numbers: {}", e))
    })?;

    let highest = numbers
        .iter()
        .filter_map(|n| parse_sequence_suffix(n))
        .max()
        .unwrap_or(0);

    let value: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO invoice_number_counters (tenant_id, seq_date, last_value)
        VALUES ($1, $2, $3)
        ON CONFLICT (tenant_id, seq_date)
        DO UPDATE SET last_value = GREATEST(invoice_number_counters.last_value, EXCLUDED.last_value)
        RETURNING last_value
        "#,
    )
    .bind(tenant_id)
    .bind(day)
    .bind(highest)
    .fetch_one(conn)
    .await
    .map_err(|e| {
        AppError::DatabaseError(anyhow::anyhow!("Failed to resync invoice counter: {}", e))
    })?;

    info!(highest_suffix = highest, counter = value, "Invoice counter resynced");

    Ok(value)
}
