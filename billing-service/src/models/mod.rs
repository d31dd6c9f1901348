//! Domain models for billing-service.

mod invoice;
mod payment;
mod project;

pub use invoice::{CreateInvoice, Invoice, InvoiceStatus, InvoiceView, ListInvoicesFilter};
pub use payment::{Payment, PaymentMethod, RecordPayment};
pub use project::Project;
