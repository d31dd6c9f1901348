use crate::error::AppError;
use serde::Deserialize;
use std::env;

/// Deployment environment. Prod refuses to fall back to defaults for
/// required variables.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

impl Environment {
    pub fn is_prod(self) -> bool {
        self == Environment::Prod
    }

    /// Read ENVIRONMENT, defaulting to dev.
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();
        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

/// Fetch an environment variable, falling back to `default` outside prod.
/// In prod every variable without a value is a configuration error.
pub fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dev_falls_back_to_default() {
        let value = get_env("CRM_BILLING_TEST_MISSING", Some("fallback"), false).unwrap();
        assert_eq!(value, "fallback");
    }

    #[test]
    fn prod_requires_value() {
        let err = get_env("CRM_BILLING_TEST_MISSING", Some("fallback"), true);
        assert!(err.is_err());
    }

    #[test]
    fn environment_parses_case_insensitively() {
        assert_eq!("PROD".parse::<Environment>().unwrap(), Environment::Prod);
        assert_eq!("dev".parse::<Environment>().unwrap(), Environment::Dev);
        assert!("staging".parse::<Environment>().is_err());
    }
}
