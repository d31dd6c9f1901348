//! Reconciliation: derive an invoice's status from its payment set.
//!
//! A pure function invoked by the lifecycle service inside the same
//! transaction as the payment insert or delete, always over the full current
//! payment set, so the result is correct regardless of the order payments
//! were added or removed. No trigger or background job touches status.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::models::{InvoiceStatus, Payment};

/// Result of reconciling an invoice against its payments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciliation {
    pub status: InvoiceStatus,
    pub paid_at: Option<DateTime<Utc>>,
}

/// Compute the status an invoice must hold given its total and payment set.
///
/// Rules, in priority order:
/// 1. `draft`/`canceled` are human-controlled: no change (payments are never
///    recordable against them, but a payment delete after cancellation still
///    lands here).
/// 2. Fully covered: `paid`, with `paid_at` taken from the most recent
///    payment date in the set, not the wall clock, so backdated payments
///    keep historical accuracy.
/// 3. Partially covered: `partially_paid`.
/// 4. Empty set while currently `paid`/`partially_paid`: revert to `sent`
///    (the last covering payment was deleted).
/// 5. Otherwise no change (`sent` stays `sent`, `overdue` stays `overdue`).
pub fn reconcile(
    invoice_amount: Decimal,
    current_status: InvoiceStatus,
    payments: &[Payment],
) -> Reconciliation {
    if matches!(
        current_status,
        InvoiceStatus::Canceled | InvoiceStatus::Draft
    ) {
        return Reconciliation {
            status: current_status,
            paid_at: None,
        };
    }

    let total_paid: Decimal = payments.iter().map(|p| p.amount).sum();

    if total_paid >= invoice_amount {
        let latest = payments.iter().map(|p| p.payment_date).max();
        return Reconciliation {
            status: InvoiceStatus::Paid,
            paid_at: latest,
        };
    }

    if total_paid > Decimal::ZERO {
        return Reconciliation {
            status: InvoiceStatus::PartiallyPaid,
            paid_at: None,
        };
    }

    if matches!(
        current_status,
        InvoiceStatus::Paid | InvoiceStatus::PartiallyPaid
    ) {
        return Reconciliation {
            status: InvoiceStatus::Sent,
            paid_at: None,
        };
    }

    Reconciliation {
        status: current_status,
        paid_at: None,
    }
}
