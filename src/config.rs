use std::env;
use std::time::Duration;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub event_buffer_size: usize,
    pub dispatch: DispatchSettings,
}

/// Retry and timing knobs of the assignment coordinator.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Candidates tried per `assign` before giving up.
    pub claim_attempts: u32,
    pub assign_timeout: Duration,
    pub publish_attempts: u32,
    pub publish_backoff: Duration,
    pub publish_backoff_max: Duration,
    pub sweep_interval: Duration,
    /// How long a notified courier has to accept before the order is re-matched.
    pub ack_timeout: Duration,
    /// How long released or expired assignments stay queryable before the sweeper drops them.
    pub closed_retention: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            claim_attempts: 5,
            assign_timeout: Duration::from_millis(2_000),
            publish_attempts: 3,
            publish_backoff: Duration::from_millis(50),
            publish_backoff_max: Duration::from_millis(1_000),
            sweep_interval: Duration::from_millis(5_000),
            ack_timeout: Duration::from_secs(300),
            closed_retention: Duration::from_secs(3_600),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let defaults = DispatchSettings::default();
        let dispatch = DispatchSettings {
            claim_attempts: parse_or_default("CLAIM_ATTEMPTS", defaults.claim_attempts)?,
            assign_timeout: Duration::from_millis(parse_or_default("ASSIGN_TIMEOUT_MS", 2_000)?),
            publish_attempts: parse_or_default("PUBLISH_ATTEMPTS", defaults.publish_attempts)?,
            publish_backoff: Duration::from_millis(parse_or_default("PUBLISH_BACKOFF_MS", 50)?),
            publish_backoff_max: Duration::from_millis(parse_or_default(
                "PUBLISH_BACKOFF_MAX_MS",
                1_000,
            )?),
            sweep_interval: Duration::from_millis(parse_or_default("SWEEP_INTERVAL_MS", 5_000)?),
            ack_timeout: Duration::from_secs(parse_or_default("ACK_TIMEOUT_SECS", 300)?),
            closed_retention: Duration::from_secs(parse_or_default(
                "CLOSED_RETENTION_SECS",
                3_600,
            )?),
        };

        if dispatch.claim_attempts == 0 || dispatch.publish_attempts == 0 {
            return Err(AppError::Internal(
                "CLAIM_ATTEMPTS and PUBLISH_ATTEMPTS must be > 0".to_string(),
            ));
        }
        if dispatch.sweep_interval.is_zero() {
            return Err(AppError::Internal("SWEEP_INTERVAL_MS must be > 0".to_string()));
        }

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            dispatch,
        })
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
