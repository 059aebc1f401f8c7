use crate::domain::{Currency, Money};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub default_currency: Currency,
    pub idempotency_ttl: Duration,
    pub store_timeout: Duration,
    pub credit_limits: CreditLimits,
    pub settled_webhook_url: Option<String>,
}

/// Optional bounds on a single client credit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreditLimits {
    pub min: Option<Money>,
    pub max: Option<Money>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = env_map
            .get("PORT")
            .map(|s| s.as_str())
            .unwrap_or("8080")
            .parse::<u16>()
            .map_err(|_| {
                ConfigError::InvalidValue("PORT".to_string(), "must be a valid u16".to_string())
            })?;

        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let default_currency = Currency::from_str(
            env_map
                .get("DEFAULT_CURRENCY")
                .map(|s| s.as_str())
                .unwrap_or("USD"),
        )
        .map_err(|e| ConfigError::InvalidValue("DEFAULT_CURRENCY".to_string(), e.to_string()))?;

        let idempotency_ttl = Duration::from_secs(parse_positive_u64(
            &env_map,
            "IDEMPOTENCY_TTL_SECS",
            86_400,
        )?);
        let store_timeout =
            Duration::from_millis(parse_positive_u64(&env_map, "STORE_TIMEOUT_MS", 5_000)?);

        let credit_limits = CreditLimits {
            min: parse_optional_money(&env_map, "CREDIT_MIN")?,
            max: parse_optional_money(&env_map, "CREDIT_MAX")?,
        };
        if let (Some(min), Some(max)) = (credit_limits.min, credit_limits.max) {
            if min > max {
                return Err(ConfigError::InvalidValue(
                    "CREDIT_MIN".to_string(),
                    format!("must be <= CREDIT_MAX ({})", max),
                ));
            }
        }

        let settled_webhook_url = env_map
            .get("SETTLED_WEBHOOK_URL")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Ok(Config {
            port,
            database_path,
            default_currency,
            idempotency_ttl,
            store_timeout,
            credit_limits,
            settled_webhook_url,
        })
    }
}

fn parse_positive_u64(
    env_map: &HashMap<String, String>,
    key: &str,
    default: u64,
) -> Result<u64, ConfigError> {
    let value = match env_map.get(key) {
        Some(raw) => raw.trim().parse::<u64>().map_err(|_| {
            ConfigError::InvalidValue(key.to_string(), "must be a valid u64".to_string())
        })?,
        None => default,
    };
    if value == 0 {
        return Err(ConfigError::InvalidValue(
            key.to_string(),
            "must be greater than zero".to_string(),
        ));
    }
    Ok(value)
}

fn parse_optional_money(
    env_map: &HashMap<String, String>,
    key: &str,
) -> Result<Option<Money>, ConfigError> {
    match env_map.get(key).map(|s| s.trim()).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(raw) => {
            let amount = Money::from_str(raw).map_err(|_| {
                ConfigError::InvalidValue(key.to_string(), "must be a decimal amount".to_string())
            })?;
            if !amount.is_positive() {
                return Err(ConfigError::InvalidValue(
                    key.to_string(),
                    "must be positive".to_string(),
                ));
            }
            Ok(Some(amount))
        }
    }
}
