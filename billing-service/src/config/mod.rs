use serde::Deserialize;
use service_core::config::{get_env, Environment};
use service_core::error::AppError;

/// Database connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// Settings for the overdue-sweep worker.
#[derive(Debug, Clone, Deserialize)]
pub struct SweepConfig {
    pub interval_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BillingConfig {
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub sweep: SweepConfig,
}

impl BillingConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let environment = Environment::from_env()?;
        let is_prod = environment.is_prod();

        let config = BillingConfig {
            environment,
            service_name: get_env("SERVICE_NAME", Some("billing-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: std::env::var("OTLP_ENDPOINT").ok(),
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: get_env("DATABASE_MAX_CONNECTIONS", Some("10"), is_prod)?
                    .parse()
                    .map_err(|e: std::num::ParseIntError| {
                        AppError::ConfigError(anyhow::anyhow!(e.to_string()))
                    })?,
                min_connections: get_env("DATABASE_MIN_CONNECTIONS", Some("1"), is_prod)?
                    .parse()
                    .map_err(|e: std::num::ParseIntError| {
                        AppError::ConfigError(anyhow::anyhow!(e.to_string()))
                    })?,
            },
            sweep: SweepConfig {
                interval_seconds: get_env("SWEEP_INTERVAL_SECONDS", Some("3600"), is_prod)?
                    .parse()
                    .map_err(|e: std::num::ParseIntError| {
                        AppError::ConfigError(anyhow::anyhow!(e.to_string()))
                    })?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.database.max_connections == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "DATABASE_MAX_CONNECTIONS must be greater than 0"
            )));
        }
        if self.database.min_connections > self.database.max_connections {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "DATABASE_MIN_CONNECTIONS must not exceed DATABASE_MAX_CONNECTIONS"
            )));
        }
        if self.sweep.interval_seconds == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "SWEEP_INTERVAL_SECONDS must be greater than 0"
            )));
        }
        Ok(())
    }
}
