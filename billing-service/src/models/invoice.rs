//! Invoice model and status state machine.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::Payment;

/// Invoice status.
///
/// `Draft` and `Canceled` are human-controlled and reject payments.
/// `PartiallyPaid` and `Paid` are derived by reconciliation and can never be
/// assigned directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    PartiallyPaid,
    Paid,
    Overdue,
    Canceled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Sent => "sent",
            InvoiceStatus::PartiallyPaid => "partially_paid",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Overdue => "overdue",
            InvoiceStatus::Canceled => "canceled",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "sent" => InvoiceStatus::Sent,
            "partially_paid" => InvoiceStatus::PartiallyPaid,
            "paid" => InvoiceStatus::Paid,
            "overdue" => InvoiceStatus::Overdue,
            "canceled" => InvoiceStatus::Canceled,
            _ => InvoiceStatus::Draft,
        }
    }

    /// Statuses that reject new payments outright.
    pub fn is_payment_rejecting(self) -> bool {
        matches!(self, InvoiceStatus::Draft | InvoiceStatus::Canceled)
    }

    /// Statuses the overdue sweep promotes when the due date has passed.
    pub fn is_overdue_candidate(self) -> bool {
        matches!(self, InvoiceStatus::Sent | InvoiceStatus::PartiallyPaid)
    }

    /// Cancellation is legal from any status except `paid` and `canceled`.
    pub fn can_cancel(self) -> bool {
        !matches!(self, InvoiceStatus::Paid | InvoiceStatus::Canceled)
    }

    /// Manual mark-as-paid override is usable from these statuses only.
    pub fn can_mark_paid(self) -> bool {
        matches!(
            self,
            InvoiceStatus::Sent | InvoiceStatus::Overdue | InvoiceStatus::PartiallyPaid
        )
    }

    /// Targets reachable through the human-facing status endpoint.
    /// `paid`/`partially_paid` are reconciliation-owned and `canceled` goes
    /// through cancel_invoice, so they never appear here.
    pub fn valid_manual_targets(self) -> &'static [InvoiceStatus] {
        match self {
            InvoiceStatus::Draft => &[InvoiceStatus::Sent],
            InvoiceStatus::Sent | InvoiceStatus::PartiallyPaid => &[InvoiceStatus::Overdue],
            _ => &[],
        }
    }

    /// Render the valid targets for an "invalid transition" message.
    pub fn manual_targets_display(self) -> String {
        let targets: Vec<&str> = self
            .valid_manual_targets()
            .iter()
            .map(|s| s.as_str())
            .collect();
        format!("[{}]", targets.join(", "))
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Invoice record.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub tenant_id: Uuid,
    pub project_id: Uuid,
    pub invoice_number: String,
    pub amount: Decimal,
    pub status: String,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    /// Get parsed status.
    pub fn parsed_status(&self) -> InvoiceStatus {
        InvoiceStatus::from_string(&self.status)
    }
}

/// Invoice together with its payments and the fields derived from them.
/// `paid_amount + balance == amount` holds by construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceView {
    pub invoice: Invoice,
    pub payments: Vec<Payment>,
    pub paid_amount: Decimal,
    pub balance: Decimal,
    pub payment_count: i64,
}

impl InvoiceView {
    /// Assemble the view from an invoice row and its full payment set.
    pub fn assemble(invoice: Invoice, payments: Vec<Payment>) -> Self {
        let paid_amount: Decimal = payments.iter().map(|p| p.amount).sum();
        let balance = invoice.amount - paid_amount;
        let payment_count = payments.len() as i64;
        Self {
            invoice,
            payments,
            paid_amount,
            balance,
            payment_count,
        }
    }
}

/// Input for creating a draft invoice.
#[derive(Debug, Clone)]
pub struct CreateInvoice {
    pub project_id: Uuid,
    pub amount: Decimal,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

/// Filter parameters for listing invoices.
#[derive(Debug, Clone, Default)]
pub struct ListInvoicesFilter {
    pub status: Option<InvoiceStatus>,
    pub project_id: Option<Uuid>,
    pub page_size: i32,
    pub page_token: Option<Uuid>,
}
