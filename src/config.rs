//! Environment-driven configuration.
//!
//! Every knob has a logged default so a bare `voucher-eng` starts up;
//! bearer tokens come from either a comma-separated env var or a secrets
//! file with one token per line.

use std::{env, fmt::Display, fs::read_to_string, path::Path, str::FromStr, time::Duration};

use tracing::{info, warn};

use crate::engine::RetryPolicy;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub sweep_interval: Duration,
    pub lock_timeout: Duration,
    pub redeem_retries: u32,
    pub api_tokens: Vec<String>,
}

impl Config {
    pub fn load() -> Self {
        Self {
            port: try_load("VOUCHER_PORT", "3000"),
            sweep_interval: Duration::from_secs(try_load("VOUCHER_SWEEP_SECS", "60")),
            lock_timeout: Duration::from_millis(try_load("VOUCHER_LOCK_TIMEOUT_MS", "1000")),
            redeem_retries: try_load("VOUCHER_REDEEM_RETRIES", "3"),
            api_tokens: load_tokens(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            lock_timeout: self.lock_timeout,
            attempts: self.redeem_retries.max(1),
            ..RetryPolicy::default()
        }
    }
}

fn var(key: &str) -> Result<String, ()> {
    env::var(key).map_err(|_| ())
}

fn try_load<T: FromStr>(key: &str, default: &str) -> T
where
    T::Err: Display,
{
    var(key)
        .unwrap_or_else(|()| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e| {
            warn!("Invalid {key} value: {e}");
        })
        .expect("Environment misconfigured!")
}

fn load_tokens() -> Vec<String> {
    let tokens = if let Ok(path) = var("VOUCHER_TOKENS_FILE") {
        read_tokens_file(&path)
    } else if let Ok(raw) = var("VOUCHER_API_TOKENS") {
        split_tokens(&raw)
    } else {
        Vec::new()
    };

    if tokens.is_empty() {
        warn!("no API tokens configured; every request will be rejected");
    }
    tokens
}

fn read_tokens_file(path: impl AsRef<Path>) -> Vec<String> {
    read_to_string(&path)
        .map_err(|e| {
            warn!("Failed to read tokens file: {e}");
        })
        .map(|contents| split_lines(&contents))
        .expect("Secrets misconfigured!")
}

fn split_tokens(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

fn split_lines(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}
