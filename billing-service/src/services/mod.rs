//! Services module for billing-service.

pub mod database;
pub mod lifecycle;
pub mod metrics;
pub mod reconcile;
pub mod sequence;

pub use database::Database;
pub use lifecycle::LifecycleService;
pub use metrics::{get_metrics, init_metrics};
pub use reconcile::{reconcile, Reconciliation};
