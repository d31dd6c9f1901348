//! Payment model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Payment method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Check,
    CreditCard,
    BankTransfer,
    ExternalProcessor,
    Other,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Check => "check",
            PaymentMethod::CreditCard => "credit_card",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::ExternalProcessor => "external_processor",
            PaymentMethod::Other => "other",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "cash" => PaymentMethod::Cash,
            "check" => PaymentMethod::Check,
            "credit_card" => PaymentMethod::CreditCard,
            "bank_transfer" => PaymentMethod::BankTransfer,
            "external_processor" => PaymentMethod::ExternalProcessor,
            _ => PaymentMethod::Other,
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payment record. Immutable once written; the only removal path is the
/// delete_payment correction workflow.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub payment_id: Uuid,
    pub tenant_id: Uuid,
    pub invoice_id: Uuid,
    pub amount: Decimal,
    pub payment_date: DateTime<Utc>,
    pub payment_method: String,
    pub external_reference: Option<String>,
    pub notes: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Payment {
    /// Get parsed payment method.
    pub fn parsed_method(&self) -> PaymentMethod {
        PaymentMethod::from_string(&self.payment_method)
    }
}

/// Input for recording a payment against an invoice.
#[derive(Debug, Clone)]
pub struct RecordPayment {
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    /// Defaults to now; may be backdated.
    pub payment_date: Option<DateTime<Utc>>,
    pub external_reference: Option<String>,
    pub notes: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_round_trips_through_strings() {
        for method in [
            PaymentMethod::Cash,
            PaymentMethod::Check,
            PaymentMethod::CreditCard,
            PaymentMethod::BankTransfer,
            PaymentMethod::ExternalProcessor,
            PaymentMethod::Other,
        ] {
            assert_eq!(PaymentMethod::from_string(method.as_str()), method);
        }
    }

    #[test]
    fn unknown_method_falls_back_to_other() {
        assert_eq!(PaymentMethod::from_string("crypto"), PaymentMethod::Other);
    }
}
