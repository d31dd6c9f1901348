//! Overdue sweep worker.
//!
//! Periodically promotes `sent` and `partially_paid` invoices whose due date
//! has passed to `overdue`. Runs as its own binary so operators can schedule
//! or scale it independently of any API surface.

use billing_service::config::BillingConfig;
use billing_service::services::metrics::ERRORS_TOTAL;
use billing_service::services::{init_metrics, Database, LifecycleService};

use service_core::observability::init_tracing;
use tokio::signal;
use tokio::time::{interval, Duration, MissedTickBehavior};

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

/// One pass: find tenants with due invoices, sweep each one.
async fn sweep_once(service: &LifecycleService) {
    let today = chrono::Utc::now().date_naive();

    let tenants = match service.database().tenants_with_due_invoices(today).await {
        Ok(tenants) => tenants,
        Err(e) => {
            ERRORS_TOTAL.with_label_values(&[e.error_type()]).inc();
            tracing::error!(error = %e, "Failed to list tenants with due invoices");
            return;
        }
    };

    if tenants.is_empty() {
        tracing::debug!("No tenants with due invoices");
        return;
    }

    let mut promoted = 0usize;
    for tenant_id in tenants {
        match service.update_overdue_invoices(tenant_id).await {
            Ok(invoices) => promoted += invoices.len(),
            // A failing tenant must not block the rest of the sweep.
            Err(e) => {
                ERRORS_TOTAL.with_label_values(&[e.error_type()]).inc();
                tracing::error!(tenant_id = %tenant_id, error = %e, "Overdue sweep failed for tenant");
            }
        }
    }

    tracing::info!(promoted = promoted, "Overdue sweep pass complete");
}

async fn run_sweep_loop(service: LifecycleService, interval_seconds: u64) {
    let mut ticker = interval(Duration::from_secs(interval_seconds));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        sweep_once(&service).await;
    }
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let config = BillingConfig::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        std::io::Error::other(format!("Configuration error: {}", e))
    })?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        sweep_interval_seconds = config.sweep.interval_seconds,
        "Starting overdue-sweep worker"
    );

    init_metrics();

    let db = Database::new(
        &config.database.url,
        config.database.max_connections,
        config.database.min_connections,
    )
    .await
    .map_err(|e| {
        tracing::error!(error = %e, "Failed to connect to database");
        std::io::Error::other(format!("Database error: {}", e))
    })?;

    db.run_migrations().await.map_err(|e| {
        tracing::error!(error = %e, "Failed to run migrations");
        std::io::Error::other(format!("Migration error: {}", e))
    })?;

    db.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Database health check failed");
        std::io::Error::other(format!("Health check error: {}", e))
    })?;

    let service = LifecycleService::new(db);

    tokio::select! {
        _ = run_sweep_loop(service, config.sweep.interval_seconds) => {}
        _ = shutdown_signal() => {
            tracing::info!("Graceful shutdown initiated");
        }
    }

    tracing::info!("Worker shutdown complete");
    Ok(())
}
