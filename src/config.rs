use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    pub log_level: String,

    // Enrichment settings
    pub title_preview_len: usize,
    pub comment_preview_len: usize,

    // Feed store settings
    pub command_buffer: usize,
    pub fetch_timeout_ms: u64,
}

impl FeedConfig {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let config = FeedConfig {
            log_level: env::var("LOG_LEVEL")
                .unwrap_or_else(|_| "activity_notify=debug".to_string()),

            title_preview_len: parse_var("NOTIFY_TITLE_PREVIEW_LEN", "50")?,
            comment_preview_len: parse_var("NOTIFY_COMMENT_PREVIEW_LEN", "100")?,

            command_buffer: parse_var("NOTIFY_COMMAND_BUFFER", "256")?,
            fetch_timeout_ms: parse_var("NOTIFY_FETCH_TIMEOUT_MS", "10000")?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.command_buffer == 0 {
            return Err(AppError::config("NOTIFY_COMMAND_BUFFER must be greater than zero"));
        }
        if self.fetch_timeout_ms == 0 {
            return Err(AppError::config("NOTIFY_FETCH_TIMEOUT_MS must be greater than zero"));
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

fn parse_var<T>(name: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|e| AppError::config(format!("{}: {}", name, e)))
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            log_level: "activity_notify=debug".to_string(),
            title_preview_len: 50,
            comment_preview_len: 100,
            command_buffer: 256,
            fetch_timeout_ms: 10_000,
        }
    }
}
