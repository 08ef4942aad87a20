//! Environment-backed runtime configuration for `spots-smoke`.

use std::env;

use spots_core::{AdTimings, RetrySettings};
use thiserror::Error;

/// Runtime configuration for the smoke run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmokeConfig {
    /// Retry budget for reads and the review transaction.
    pub retry: RetrySettings,
    /// Request spacing and reload backoff of the ad slot.
    pub ad_timings: AdTimings,
}

impl SmokeConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let defaults = RetrySettings::default();
        let retry = RetrySettings {
            attempts: parse_or("SPOTS_RETRY_ATTEMPTS", defaults.attempts, &mut lookup)?,
            initial_delay_ms: parse_or(
                "SPOTS_RETRY_INITIAL_DELAY_MS",
                defaults.initial_delay_ms,
                &mut lookup,
            )?,
            max_delay_ms: parse_or("SPOTS_RETRY_MAX_DELAY_MS", defaults.max_delay_ms, &mut lookup)?,
            backoff_factor: parse_or(
                "SPOTS_RETRY_BACKOFF_FACTOR",
                defaults.backoff_factor,
                &mut lookup,
            )?,
        };

        let ad_defaults = AdTimings::default();
        let ad_timings = AdTimings {
            min_request_interval_ms: parse_or(
                "SPOTS_AD_MIN_REQUEST_INTERVAL_MS",
                ad_defaults.min_request_interval_ms,
                &mut lookup,
            )?,
            base_retry_delay_ms: parse_or(
                "SPOTS_AD_BASE_RETRY_DELAY_MS",
                ad_defaults.base_retry_delay_ms,
                &mut lookup,
            )?,
            max_retry_delay_ms: parse_or(
                "SPOTS_AD_MAX_RETRY_DELAY_MS",
                ad_defaults.max_retry_delay_ms,
                &mut lookup,
            )?,
        };

        if retry.attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "SPOTS_RETRY_ATTEMPTS",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }
        if !retry.backoff_factor.is_finite() || retry.backoff_factor < 1.0 {
            return Err(ConfigError::InvalidValue {
                key: "SPOTS_RETRY_BACKOFF_FACTOR",
                value: retry.backoff_factor.to_string(),
                reason: "must be a finite number of at least 1".to_owned(),
            });
        }
        if retry.initial_delay_ms > retry.max_delay_ms {
            return Err(ConfigError::InvalidValue {
                key: "SPOTS_RETRY_INITIAL_DELAY_MS",
                value: retry.initial_delay_ms.to_string(),
                reason: format!("exceeds SPOTS_RETRY_MAX_DELAY_MS ({})", retry.max_delay_ms),
            });
        }
        if ad_timings.base_retry_delay_ms > ad_timings.max_retry_delay_ms {
            return Err(ConfigError::InvalidValue {
                key: "SPOTS_AD_BASE_RETRY_DELAY_MS",
                value: ad_timings.base_retry_delay_ms.to_string(),
                reason: format!(
                    "exceeds SPOTS_AD_MAX_RETRY_DELAY_MS ({})",
                    ad_timings.max_retry_delay_ms
                ),
            });
        }

        Ok(Self { retry, ad_timings })
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    #[error("invalid {key}='{value}': {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

fn parse_or<T, F>(key: &'static str, default: T, lookup: &mut F) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
    else {
        return Ok(default);
    };
    value
        .parse::<T>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            reason: err.to_string(),
            value,
        })
}
