//! Invoice lifecycle service.
//!
//! The public surface of the reconciliation engine. Every operation takes an
//! explicit [`TenantContext`] and every mutation that depends on the live
//! payment sum runs inside one transaction with the invoice row locked
//! (`SELECT … FOR UPDATE`), so concurrent payments against the same invoice
//! serialize while different invoices never block each other. Reconciliation
//! runs synchronously inside that same transaction: no caller ever observes
//! an invoice whose status disagrees with its stored payments.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{PgConnection, Postgres, Transaction};
use tracing::{info, instrument};
use uuid::Uuid;

use service_core::error::AppError;

use crate::context::TenantContext;
use crate::models::{
    CreateInvoice, Invoice, InvoiceStatus, InvoiceView, ListInvoicesFilter, Payment,
    PaymentMethod, RecordPayment,
};
use crate::services::metrics::{INVOICES_TOTAL, OVERDUE_PROMOTIONS_TOTAL, PAYMENTS_TOTAL};
use crate::services::{reconcile, sequence, Database};

/// Public operations on invoices and payments.
#[derive(Clone)]
pub struct LifecycleService {
    db: Database,
}

impl LifecycleService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    // -------------------------------------------------------------------------
    // Creation and sending
    // -------------------------------------------------------------------------

    /// Create a draft invoice against a project, allocating its invoice
    /// number atomically inside the same transaction.
    #[instrument(skip(self, input), fields(tenant_id = %ctx.tenant_id, project_id = %input.project_id))]
    pub async fn create_invoice(
        &self,
        ctx: &TenantContext,
        input: &CreateInvoice,
    ) -> Result<InvoiceView, AppError> {
        if input.amount <= Decimal::ZERO {
            return Err(AppError::ValidationError(anyhow::anyhow!(
                "Invoice amount must be positive"
            )));
        }

        let project = self
            .db
            .get_project(ctx.tenant_id, input.project_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Project not found")))?;

        let mut tx = self.begin().await?;

        let today = Utc::now().date_naive();
        let invoice_number = sequence::next_invoice_number(&mut tx, ctx.tenant_id, today).await?;

        let invoice_id = Uuid::new_v4();
        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            INSERT INTO invoices (invoice_id, tenant_id, project_id, invoice_number, amount, status, due_date, notes)
            VALUES ($1, $2, $3, $4, $5, 'draft', $6, $7)
            RETURNING invoice_id, tenant_id, project_id, invoice_number, amount, status,
                due_date, notes, paid_at, created_at, updated_at
            "#,
        )
        .bind(invoice_id)
        .bind(ctx.tenant_id)
        .bind(input.project_id)
        .bind(&invoice_number)
        .bind(input.amount)
        .bind(input.due_date)
        .bind(&input.notes)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!(
                    "Invoice number {} already exists",
                    invoice_number
                ))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to create invoice: {}", e)),
        })?;

        self.commit(tx).await?;

        INVOICES_TOTAL.with_label_values(&["draft"]).inc();

        info!(
            invoice_id = %invoice.invoice_id,
            invoice_number = %invoice.invoice_number,
            amount = %invoice.amount,
            project = %project.name,
            "Draft invoice created"
        );

        Ok(InvoiceView::assemble(invoice, Vec::new()))
    }

    /// Transition a draft invoice to `sent`. The only legal source is `draft`.
    #[instrument(skip(self), fields(tenant_id = %ctx.tenant_id, invoice_id = %invoice_id))]
    pub async fn mark_as_sent(
        &self,
        ctx: &TenantContext,
        invoice_id: Uuid,
    ) -> Result<Invoice, AppError> {
        let existing = self
            .db
            .get_invoice(ctx.tenant_id, invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

        if existing.parsed_status() != InvoiceStatus::Draft {
            return Err(AppError::InvalidState(anyhow::anyhow!(
                "Only draft invoices can be sent (current status: {})",
                existing.status
            )));
        }

        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            UPDATE invoices
            SET status = 'sent', updated_at = NOW()
            WHERE tenant_id = $1 AND invoice_id = $2 AND status = 'draft'
            RETURNING invoice_id, tenant_id, project_id, invoice_number, amount, status,
                due_date, notes, paid_at, created_at, updated_at
            "#,
        )
        .bind(ctx.tenant_id)
        .bind(invoice_id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to send invoice: {}", e)))?
        .ok_or_else(|| {
            AppError::InvalidState(anyhow::anyhow!("Invoice is no longer in draft status"))
        })?;

        INVOICES_TOTAL.with_label_values(&["sent"]).inc();

        info!(invoice_id = %invoice.invoice_id, "Invoice sent");

        Ok(invoice)
    }

    /// Delete a draft invoice. Anything past draft is canceled instead, to
    /// preserve the audit trail.
    #[instrument(skip(self), fields(tenant_id = %ctx.tenant_id, invoice_id = %invoice_id))]
    pub async fn delete_draft_invoice(
        &self,
        ctx: &TenantContext,
        invoice_id: Uuid,
    ) -> Result<(), AppError> {
        let existing = self
            .db
            .get_invoice(ctx.tenant_id, invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

        if existing.parsed_status() != InvoiceStatus::Draft {
            return Err(AppError::InvalidState(anyhow::anyhow!(
                "Only draft invoices can be deleted (current status: {}); cancel it instead",
                existing.status
            )));
        }

        sqlx::query("DELETE FROM invoices WHERE tenant_id = $1 AND invoice_id = $2 AND status = 'draft'")
            .bind(ctx.tenant_id)
            .bind(invoice_id)
            .execute(self.db.pool())
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to delete invoice: {}", e)))?;

        info!(invoice_id = %invoice_id, "Draft invoice deleted");

        Ok(())
    }

    // -------------------------------------------------------------------------
    // Payments
    // -------------------------------------------------------------------------

    /// Record a payment against an invoice.
    ///
    /// The balance check reads the live payment sum under the invoice row
    /// lock, so two concurrent payments cannot both pass the check and
    /// jointly overpay.
    #[instrument(skip(self, input), fields(tenant_id = %ctx.tenant_id, invoice_id = %invoice_id))]
    pub async fn record_payment(
        &self,
        ctx: &TenantContext,
        invoice_id: Uuid,
        input: &RecordPayment,
    ) -> Result<(Payment, InvoiceView), AppError> {
        if input.amount <= Decimal::ZERO {
            return Err(AppError::ValidationError(anyhow::anyhow!(
                "Payment amount must be positive"
            )));
        }

        let mut tx = self.begin().await?;

        let invoice = lock_invoice(&mut tx, ctx.tenant_id, invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

        match invoice.parsed_status() {
            InvoiceStatus::Draft => {
                return Err(AppError::ValidationError(anyhow::anyhow!(
                    "Cannot record payment for draft invoice"
                )));
            }
            InvoiceStatus::Canceled => {
                return Err(AppError::ValidationError(anyhow::anyhow!(
                    "Cannot record payment for canceled invoice"
                )));
            }
            _ => {}
        }

        let existing = payments_for_invoice(&mut tx, ctx.tenant_id, invoice_id).await?;
        let paid: Decimal = existing.iter().map(|p| p.amount).sum();
        let remaining = invoice.amount - paid;

        if input.amount > remaining {
            return Err(AppError::ValidationError(anyhow::anyhow!(
                "Payment amount {} exceeds remaining balance {}",
                input.amount,
                remaining
            )));
        }

        let payment = insert_payment(
            &mut tx,
            ctx,
            invoice_id,
            input.amount,
            input.payment_method,
            input.payment_date.unwrap_or_else(Utc::now),
            input.external_reference.as_deref(),
            input.notes.as_deref(),
        )
        .await?;

        let view = reconcile_and_refresh(&mut tx, ctx.tenant_id, &invoice).await?;

        self.commit(tx).await?;

        PAYMENTS_TOTAL
            .with_label_values(&[input.payment_method.as_str()])
            .inc();
        if view.invoice.status != invoice.status {
            INVOICES_TOTAL
                .with_label_values(&[&view.invoice.status])
                .inc();
        }

        info!(
            payment_id = %payment.payment_id,
            amount = %payment.amount,
            status = %view.invoice.status,
            balance = %view.balance,
            "Payment recorded"
        );

        Ok((payment, view))
    }

    /// Remove a payment (correction workflow) and re-derive the invoice
    /// status, including reverting `paid`/`partially_paid` when the money is
    /// gone. Returns both the deleted payment and the refreshed invoice.
    #[instrument(skip(self), fields(tenant_id = %ctx.tenant_id, payment_id = %payment_id))]
    pub async fn delete_payment(
        &self,
        ctx: &TenantContext,
        payment_id: Uuid,
    ) -> Result<(Payment, InvoiceView), AppError> {
        let mut tx = self.begin().await?;

        let payment = sqlx::query_as::<_, Payment>(
            r#"
            SELECT payment_id, tenant_id, invoice_id, amount, payment_date, payment_method,
                external_reference, notes, created_by, created_at
            FROM payments
            WHERE tenant_id = $1 AND payment_id = $2
            "#,
        )
        .bind(ctx.tenant_id)
        .bind(payment_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get payment: {}", e)))?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Payment not found")))?;

        let invoice = lock_invoice(&mut tx, ctx.tenant_id, payment.invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

        let deleted = sqlx::query("DELETE FROM payments WHERE tenant_id = $1 AND payment_id = $2")
            .bind(ctx.tenant_id)
            .bind(payment_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to delete payment: {}", e))
            })?;

        // A concurrent delete can win the race between the lookup above and
        // the invoice lock.
        if deleted.rows_affected() == 0 {
            return Err(AppError::NotFound(anyhow::anyhow!("Payment not found")));
        }

        let view = reconcile_and_refresh(&mut tx, ctx.tenant_id, &invoice).await?;

        self.commit(tx).await?;

        info!(
            payment_id = %payment.payment_id,
            invoice_id = %invoice.invoice_id,
            status = %view.invoice.status,
            "Payment deleted"
        );

        Ok((payment, view))
    }

    /// Manual override: settle the remaining balance with a synthetic
    /// payment, then reconcile like any other payment. Rejected on an
    /// already-paid invoice.
    #[instrument(skip(self), fields(tenant_id = %ctx.tenant_id, invoice_id = %invoice_id))]
    pub async fn mark_as_paid(
        &self,
        ctx: &TenantContext,
        invoice_id: Uuid,
    ) -> Result<(Payment, InvoiceView), AppError> {
        let mut tx = self.begin().await?;

        let invoice = lock_invoice(&mut tx, ctx.tenant_id, invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

        let status = invoice.parsed_status();
        if status == InvoiceStatus::Paid {
            return Err(AppError::InvalidState(anyhow::anyhow!(
                "Invoice is already paid"
            )));
        }
        if !status.can_mark_paid() {
            return Err(AppError::InvalidState(anyhow::anyhow!(
                "Cannot mark a {} invoice as paid",
                invoice.status
            )));
        }

        let existing = payments_for_invoice(&mut tx, ctx.tenant_id, invoice_id).await?;
        let paid: Decimal = existing.iter().map(|p| p.amount).sum();
        let remaining = invoice.amount - paid;

        if remaining <= Decimal::ZERO {
            return Err(AppError::InvalidState(anyhow::anyhow!(
                "Invoice has no remaining balance"
            )));
        }

        let payment = insert_payment(
            &mut tx,
            ctx,
            invoice_id,
            remaining,
            PaymentMethod::Other,
            Utc::now(),
            None,
            Some("Manual mark-as-paid override"),
        )
        .await?;

        let view = reconcile_and_refresh(&mut tx, ctx.tenant_id, &invoice).await?;

        self.commit(tx).await?;

        PAYMENTS_TOTAL
            .with_label_values(&[PaymentMethod::Other.as_str()])
            .inc();
        INVOICES_TOTAL.with_label_values(&["paid"]).inc();

        info!(
            invoice_id = %invoice_id,
            amount = %payment.amount,
            "Invoice marked as paid via override"
        );

        Ok((payment, view))
    }

    // -------------------------------------------------------------------------
    // Cancellation and manual transitions
    // -------------------------------------------------------------------------

    /// Cancel an invoice. Legal from any status except `paid` and `canceled`.
    /// Existing payments are kept; the invoice rejects new ones from here on.
    #[instrument(skip(self), fields(tenant_id = %ctx.tenant_id, invoice_id = %invoice_id))]
    pub async fn cancel_invoice(
        &self,
        ctx: &TenantContext,
        invoice_id: Uuid,
    ) -> Result<Invoice, AppError> {
        let existing = self
            .db
            .get_invoice(ctx.tenant_id, invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

        match existing.parsed_status() {
            InvoiceStatus::Paid => {
                return Err(AppError::InvalidState(anyhow::anyhow!(
                    "Cannot cancel a paid invoice"
                )));
            }
            InvoiceStatus::Canceled => {
                return Err(AppError::InvalidState(anyhow::anyhow!(
                    "Invoice is already canceled"
                )));
            }
            _ => {}
        }

        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            UPDATE invoices
            SET status = 'canceled', updated_at = NOW()
            WHERE tenant_id = $1 AND invoice_id = $2
              AND status NOT IN ('paid', 'canceled')
            RETURNING invoice_id, tenant_id, project_id, invoice_number, amount, status,
                due_date, notes, paid_at, created_at, updated_at
            "#,
        )
        .bind(ctx.tenant_id)
        .bind(invoice_id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to cancel invoice: {}", e)))?
        .ok_or_else(|| {
            AppError::InvalidState(anyhow::anyhow!("Invoice can no longer be canceled"))
        })?;

        INVOICES_TOTAL.with_label_values(&["canceled"]).inc();

        info!(invoice_id = %invoice.invoice_id, "Invoice canceled");

        Ok(invoice)
    }

    /// Human-facing "set status to X" endpoint.
    ///
    /// `sent` is only reachable from `draft`; `paid` must go through
    /// record_payment/mark_as_paid; `partially_paid` is derived-only;
    /// `canceled` goes through cancel_invoice. Everything else is rejected
    /// with the current status and its valid targets.
    #[instrument(skip(self), fields(tenant_id = %ctx.tenant_id, invoice_id = %invoice_id, target = %target))]
    pub async fn set_status(
        &self,
        ctx: &TenantContext,
        invoice_id: Uuid,
        target: InvoiceStatus,
    ) -> Result<Invoice, AppError> {
        let existing = self
            .db
            .get_invoice(ctx.tenant_id, invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;
        let current = existing.parsed_status();

        match target {
            InvoiceStatus::Paid => Err(AppError::InvalidState(anyhow::anyhow!(
                "Status 'paid' cannot be assigned directly; record a payment or use mark_as_paid"
            ))),
            InvoiceStatus::PartiallyPaid => Err(AppError::InvalidState(anyhow::anyhow!(
                "Status 'partially_paid' is derived from payments and cannot be set directly"
            ))),
            InvoiceStatus::Canceled => Err(AppError::InvalidState(anyhow::anyhow!(
                "Use cancel_invoice to cancel an invoice"
            ))),
            InvoiceStatus::Sent if current == InvoiceStatus::Draft => {
                self.mark_as_sent(ctx, invoice_id).await
            }
            InvoiceStatus::Overdue if current.is_overdue_candidate() => {
                let today = Utc::now().date_naive();
                match existing.due_date {
                    Some(due) if due < today => {
                        self.promote_to_overdue(ctx.tenant_id, invoice_id, current)
                            .await
                    }
                    _ => Err(AppError::InvalidState(anyhow::anyhow!(
                        "Cannot mark invoice overdue before its due date has passed"
                    ))),
                }
            }
            _ => Err(AppError::InvalidState(anyhow::anyhow!(
                "Invalid transition from {} to {}, valid targets: {}",
                current,
                target,
                current.manual_targets_display()
            ))),
        }
    }

    /// Batch sweep: promote `sent` and `partially_paid` invoices whose due
    /// date has passed to `overdue`. Applies the same rule to both statuses
    /// regardless of partial payment, and never touches `paid`, `canceled`,
    /// or `draft`. Partial-payment data is untouched.
    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn update_overdue_invoices(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<Invoice>, AppError> {
        let today = Utc::now().date_naive();
        let mut promoted = Vec::new();

        for from_status in [InvoiceStatus::Sent, InvoiceStatus::PartiallyPaid] {
            let mut batch = sqlx::query_as::<_, Invoice>(
                r#"
                UPDATE invoices
                SET status = 'overdue', updated_at = NOW()
                WHERE tenant_id = $1
                  AND status = $2
                  AND due_date IS NOT NULL
                  AND due_date < $3
                RETURNING invoice_id, tenant_id, project_id, invoice_number, amount, status,
                    due_date, notes, paid_at, created_at, updated_at
                "#,
            )
            .bind(tenant_id)
            .bind(from_status.as_str())
            .bind(today)
            .fetch_all(self.db.pool())
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to sweep overdue invoices: {}", e))
            })?;

            OVERDUE_PROMOTIONS_TOTAL
                .with_label_values(&[from_status.as_str()])
                .inc_by(batch.len() as f64);

            promoted.append(&mut batch);
        }

        if !promoted.is_empty() {
            info!(count = promoted.len(), "Invoices promoted to overdue");
        }

        Ok(promoted)
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Get an invoice view (payments + derived fields).
    pub async fn get_invoice(
        &self,
        ctx: &TenantContext,
        invoice_id: Uuid,
    ) -> Result<InvoiceView, AppError> {
        self.db
            .get_invoice_view(ctx.tenant_id, invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))
    }

    /// List invoices under the tenant scope.
    pub async fn list_invoices(
        &self,
        ctx: &TenantContext,
        filter: &ListInvoicesFilter,
    ) -> Result<Vec<Invoice>, AppError> {
        self.db.list_invoices(ctx.tenant_id, filter).await
    }

    /// List an invoice's payments.
    pub async fn list_payments(
        &self,
        ctx: &TenantContext,
        invoice_id: Uuid,
    ) -> Result<Vec<Payment>, AppError> {
        self.db.list_payments(ctx.tenant_id, invoice_id).await
    }

    // -------------------------------------------------------------------------
    // Maintenance
    // -------------------------------------------------------------------------

    /// Administrative resync of the invoice number counter after a bulk load.
    #[instrument(skip(self), fields(tenant_id = %ctx.tenant_id, day = %day))]
    pub async fn resync_invoice_numbers(
        &self,
        ctx: &TenantContext,
        day: NaiveDate,
    ) -> Result<i64, AppError> {
        let mut conn = self.db.pool().acquire().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to acquire connection: {}", e))
        })?;
        sequence::resync_counter(&mut conn, ctx.tenant_id, day).await
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, AppError> {
        self.db.pool().begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })
    }

    async fn commit(&self, tx: Transaction<'static, Postgres>) -> Result<(), AppError> {
        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })
    }

    async fn promote_to_overdue(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        from_status: InvoiceStatus,
    ) -> Result<Invoice, AppError> {
        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            UPDATE invoices
            SET status = 'overdue', updated_at = NOW()
            WHERE tenant_id = $1 AND invoice_id = $2 AND status = $3
            RETURNING invoice_id, tenant_id, project_id, invoice_number, amount, status,
                due_date, notes, paid_at, created_at, updated_at
            "#,
        )
        .bind(tenant_id)
        .bind(invoice_id)
        .bind(from_status.as_str())
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to mark invoice overdue: {}", e))
        })?
        .ok_or_else(|| {
            AppError::InvalidState(anyhow::anyhow!("Invoice status changed concurrently"))
        })?;

        OVERDUE_PROMOTIONS_TOTAL
            .with_label_values(&[from_status.as_str()])
            .inc();

        Ok(invoice)
    }
}

/// Lock an invoice row for the duration of the surrounding transaction.
/// Serializes payment mutations per invoice without blocking other invoices.
async fn lock_invoice(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    invoice_id: Uuid,
) -> Result<Option<Invoice>, AppError> {
    sqlx::query_as::<_, Invoice>(
        r#"
        SELECT invoice_id, tenant_id, project_id, invoice_number, amount, status,
            due_date, notes, paid_at, created_at, updated_at
        FROM invoices
        WHERE tenant_id = $1 AND invoice_id = $2
        FOR UPDATE
        "#,
    )
    .bind(tenant_id)
    .bind(invoice_id)
    .fetch_optional(conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to lock invoice: {}", e)))
}

/// The full current payment set for an invoice, read on the transaction.
async fn payments_for_invoice(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    invoice_id: Uuid,
) -> Result<Vec<Payment>, AppError> {
    sqlx::query_as::<_, Payment>(
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
    .fetch_all(conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list payments: {}", e)))
}

#[allow(clippy::too_many_arguments)]
async fn insert_payment(
    conn: &mut PgConnection,
    ctx: &TenantContext,
    invoice_id: Uuid,
    amount: Decimal,
    method: PaymentMethod,
    payment_date: DateTime<Utc>,
    external_reference: Option<&str>,
    notes: Option<&str>,
) -> Result<Payment, AppError> {
    let payment_id = Uuid::new_v4();
    sqlx::query_as::<_, Payment>(
        r#"
        INSERT INTO payments (payment_id, tenant_id, invoice_id, amount, payment_date,
            payment_method, external_reference, notes, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING payment_id, tenant_id, invoice_id, amount, payment_date, payment_method,
            external_reference, notes, created_by, created_at
        "#,
    )
    .bind(payment_id)
    .bind(ctx.tenant_id)
    .bind(invoice_id)
    .bind(amount)
    .bind(payment_date)
    .bind(method.as_str())
    .bind(external_reference)
    .bind(notes)
    .bind(ctx.actor_id)
    .fetch_one(conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to insert payment: {}", e)))
}

/// Re-read the payment set, run reconciliation, persist the derived status
/// and paid_at, and return the refreshed view. Always called on the same
/// transaction as the payment mutation.
async fn reconcile_and_refresh(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    invoice: &Invoice,
) -> Result<InvoiceView, AppError> {
    let payments = payments_for_invoice(conn, tenant_id, invoice.invoice_id).await?;

    let outcome = reconcile(invoice.amount, invoice.parsed_status(), &payments);

    let refreshed = sqlx::query_as::<_, Invoice>(
        r#"
        UPDATE invoices
        SET status = $3, paid_at = $4, updated_at = NOW()
        WHERE tenant_id = $1 AND invoice_id = $2
        RETURNING invoice_id, tenant_id, project_id, invoice_number, amount, status,
            due_date, notes, paid_at, created_at, updated_at
        "#,
    )
    .bind(tenant_id)
    .bind(invoice.invoice_id)
    .bind(outcome.status.as_str())
    .bind(outcome.paid_at)
    .fetch_one(conn)
    .await
    .map_err(|e| {
        AppError::DatabaseError(anyhow::anyhow!("Failed to update invoice status: {}", e))
    })?;

    Ok(InvoiceView::assemble(refreshed, payments))
}
