//! Database service for billing-service.

use crate::models::{Invoice, InvoiceView, ListInvoicesFilter, Payment, Project};
use crate::services::metrics::DB_QUERY_DURATION;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "billing-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Project reference
    // -------------------------------------------------------------------------

    /// Look up a project under the tenant scope. Used to validate invoice
    /// creation; project CRUD lives elsewhere in the CRM.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, project_id = %project_id))]
    pub async fn get_project(
        &self,
        tenant_id: Uuid,
        project_id: Uuid,
    ) -> Result<Option<Project>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_project"])
            .start_timer();

        let project = sqlx::query_as::<_, Project>(
            r#"
            SELECT project_id, tenant_id, name, created_at
            FROM projects
            WHERE tenant_id = $1 AND project_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get project: {}", e)))?;

        timer.observe_duration();

        Ok(project)
    }

    // -------------------------------------------------------------------------
    // Invoice reads
    // -------------------------------------------------------------------------

    /// Get an invoice by ID.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    pub async fn get_invoice(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT invoice_id, tenant_id, project_id, invoice_number, amount, status,
                due_date, notes, paid_at, created_at, updated_at
            FROM invoices
            WHERE tenant_id = $1 AND invoice_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get invoice: {}", e)))?;

        timer.observe_duration();

        Ok(invoice)
    }

    /// Get an invoice together with its payments and derived fields.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    pub async fn get_invoice_view(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<InvoiceView>, AppError> {
        let invoice = match self.get_invoice(tenant_id, invoice_id).await? {
            Some(inv) => inv,
            None => return Ok(None),
        };
        let payments = self.list_payments(tenant_id, invoice_id).await?;
        Ok(Some(InvoiceView::assemble(invoice, payments)))
    }

    /// List invoices for a tenant.
    #[instrument(skip(self, filter), fields(tenant_id = %tenant_id))]
    pub async fn list_invoices(
        &self,
        tenant_id: Uuid,
        filter: &ListInvoicesFilter,
    ) -> Result<Vec<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_invoices"])
            .start_timer();

        let limit = filter.page_size.clamp(1, 100) as i64;
        let status_str = filter.status.map(|s| s.as_str().to_string());

        let invoices = if let Some(cursor) = filter.page_token {
            sqlx::query_as::<_, Invoice>(
                r#"
                SELECT invoice_id, tenant_id, project_id, invoice_number, amount, status,
                    due_date, notes, paid_at, created_at, updated_at
                FROM invoices
                WHERE tenant_id = $1
                  AND ($2::varchar IS NULL OR status = $2)
                  AND ($3::uuid IS NULL OR project_id = $3)
                  AND invoice_id > $4
                ORDER BY invoice_id
                LIMIT $5
                "#,
            )
            .bind(tenant_id)
            .bind(&status_str)
            .bind(filter.project_id)
            .bind(cursor)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, Invoice>(
                r#"
                SELECT invoice_id, tenant_id, project_id, invoice_number, amount, status,
                    due_date, notes, paid_at, created_at, updated_at
                FROM invoices
                WHERE tenant_id = $1
                  AND ($2::varchar IS NULL OR status = $2)
                  AND ($3::uuid IS NULL OR project_id = $3)
                ORDER BY invoice_id
                LIMIT $4
                "#,
            )
            .bind(tenant_id)
            .bind(&status_str)
            .bind(filter.project_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list invoices: {}", e)))?;

        timer.observe_duration();

        Ok(invoices)
    }

    /// Tenants that currently hold invoices eligible for the overdue sweep.
    /// Used by the sweep worker to scope its per-tenant passes.
    #[instrument(skip(self))]
    pub async fn tenants_with_due_invoices(
        &self,
        today: chrono::NaiveDate,
    ) -> Result<Vec<Uuid>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["tenants_with_due_invoices"])
            .start_timer();

        let tenants: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT tenant_id
            FROM invoices
            WHERE status IN ('sent', 'partially_paid')
              AND due_date IS NOT NULL
              AND due_date < $1
            "#,
        )
        .bind(today)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list tenants: {}", e)))?;

        timer.observe_duration();

        Ok(tenants)
    }

    // -------------------------------------------------------------------------
    // Payment reads
    // -------------------------------------------------------------------------

    /// Get a payment by ID.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, payment_id = %payment_id))]
    pub async fn get_payment(
        &self,
        tenant_id: Uuid,
        payment_id: Uuid,
    ) -> Result<Option<Payment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_payment"])
            .start_timer();

        let payment = sqlx::query_as::<_, Payment>(
            r#"
            SELECT payment_id, tenant_id, invoice_id, amount, payment_date, payment_method,
                external_reference, notes, created_by, created_at
            FROM payments
            WHERE tenant_id = $1 AND payment_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get payment: {}", e)))?;

        timer.observe_duration();

        Ok(payment)
    }

    /// List all payments for an invoice, oldest first.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    pub async fn list_payments(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Vec<Payment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_payments"])
            .start_timer();

        let payments = sqlx::query_as::<_, Payment>(
            r#"
            SELECT payment_id, tenant_id, invoice_id, amount, payment_date, payment_method,
                external_reference, notes, created_by, created_at
            FROM payments
            WHERE tenant_id = $1 AND invoice_id = $2
            ORDER BY payment_date, created_at
            "#,
        )
        .bind(tenant_id)
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list payments: {}", e)))?;

        timer.observe_duration();

        Ok(payments)
    }
}
