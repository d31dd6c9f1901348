//! Common test utilities for billing-service integration tests.
//!
//! Tests run against a real PostgreSQL instance pointed at by
//! TEST_DATABASE_URL and isolate themselves by operating under a fresh
//! tenant ID each, so they can share one database and run in parallel.

use billing_service::context::TenantContext;
use billing_service::models::{CreateInvoice, InvoiceView, PaymentMethod, RecordPayment};
use billing_service::services::{Database, LifecycleService};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::sync::Once;
use uuid::Uuid;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,billing_service=debug,sqlx=warn")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Connect, migrate, and hand back a service scoped to a fresh tenant.
pub async fn spawn_service() -> (LifecycleService, TenantContext) {
    init_tracing();

    let database_url = std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must be set to run integration tests");

    let db = Database::new(&database_url, 5, 1)
        .await
        .expect("Failed to connect to test database");
    db.run_migrations().await.expect("Failed to run migrations");

    let ctx = TenantContext::new(Uuid::new_v4(), Uuid::new_v4());
    (LifecycleService::new(db), ctx)
}

/// Insert a project row for the tenant and return its ID.
pub async fn seed_project(service: &LifecycleService, ctx: &TenantContext) -> Uuid {
    let project_id = Uuid::new_v4();
    sqlx::query("INSERT INTO projects (project_id, tenant_id, name) VALUES ($1, $2, $3)")
        .bind(project_id)
        .bind(ctx.tenant_id)
        .bind(format!("test-project-{}", &project_id.to_string()[..8]))
        .execute(service.database().pool())
        .await
        .expect("Failed to seed project");
    project_id
}

pub fn dec(s: &str) -> Decimal {
    s.parse().expect("Invalid decimal literal")
}

/// Create a draft invoice with the given amount and optional due date.
pub async fn create_invoice(
    service: &LifecycleService,
    ctx: &TenantContext,
    project_id: Uuid,
    amount: &str,
    due_date: Option<NaiveDate>,
) -> InvoiceView {
    service
        .create_invoice(
            ctx,
            &CreateInvoice {
                project_id,
                amount: dec(amount),
                due_date,
                notes: None,
            },
        )
        .await
        .expect("Failed to create invoice")
}

/// Create a draft invoice and immediately send it.
pub async fn create_sent_invoice(
    service: &LifecycleService,
    ctx: &TenantContext,
    project_id: Uuid,
    amount: &str,
    due_date: Option<NaiveDate>,
) -> InvoiceView {
    let view = create_invoice(service, ctx, project_id, amount, due_date).await;
    service
        .mark_as_sent(ctx, view.invoice.invoice_id)
        .await
        .expect("Failed to send invoice");
    service
        .get_invoice(ctx, view.invoice.invoice_id)
        .await
        .expect("Failed to reload invoice")
}

/// A cash payment input for the given amount.
pub fn cash_payment(amount: &str) -> RecordPayment {
    RecordPayment {
        amount: dec(amount),
        payment_method: PaymentMethod::Cash,
        payment_date: None,
        external_reference: None,
        notes: None,
    }
}

/// Force an invoice's due date directly in the database, bypassing the
/// service layer, to simulate the passage of time for overdue tests.
pub async fn backdate_due_date(
    service: &LifecycleService,
    ctx: &TenantContext,
    invoice_id: Uuid,
    due_date: NaiveDate,
) {
    sqlx::query("UPDATE invoices SET due_date = $3 WHERE tenant_id = $1 AND invoice_id = $2")
        .bind(ctx.tenant_id)
        .bind(invoice_id)
        .bind(due_date)
        .execute(service.database().pool())
        .await
        .expect("Failed to backdate due date");
}
