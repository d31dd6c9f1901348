//! Billing Service - Invoice/payment reconciliation engine for the CRM
//! billing ledger.
//!
//! The engine tracks invoices issued against client projects, accepts
//! payments against each invoice, and keeps invoice status consistent with
//! money actually received. Request-handling code consumes it through
//! [`services::LifecycleService`], scoped per call by a [`context::TenantContext`].

pub mod config;
pub mod context;
pub mod models;
pub mod services;
