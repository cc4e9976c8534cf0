use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Result, anyhow, bail};

/// Server settings, read from `KINDRED_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub token_ttl_days: i64,
    /// Upper bound on the authority calls of one WebSocket handshake.
    pub handshake_timeout: Duration,
    pub heartbeat_interval: Duration,
    /// Sessions silent for longer than this are evicted by the sweep.
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let string = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        Ok(Self {
            host: string("KINDRED_HOST", "0.0.0.0"),
            port: parse(&lookup, "KINDRED_PORT", 3000)?,
            db_path: PathBuf::from(string("KINDRED_DB_PATH", "kindred.db")),
            jwt_secret: string("KINDRED_JWT_SECRET", "dev-secret-change-me"),
            token_ttl_days: parse(&lookup, "KINDRED_TOKEN_TTL_DAYS", 30)?,
            handshake_timeout: seconds(&lookup, "KINDRED_HANDSHAKE_TIMEOUT_SECS", 10)?,
            heartbeat_interval: seconds(&lookup, "KINDRED_HEARTBEAT_INTERVAL_SECS", 15)?,
            idle_timeout: seconds(&lookup, "KINDRED_IDLE_TIMEOUT_SECS", 60)?,
            sweep_interval: seconds(&lookup, "KINDRED_SWEEP_INTERVAL_SECS", 15)?,
        })
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("invalid {}={:?}: {}", key, raw, e)),
        None => Ok(default),
    }
}

fn seconds(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> Result<Duration> {
    let secs: u64 = parse(lookup, key, default)?;
    if secs == 0 {
        bail!("{} must be greater than zero", key);
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config(&[]).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.db_path, PathBuf::from("kindred.db"));
        assert_eq!(config.token_ttl_days, 30);
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(15));
        assert_eq!(config.idle_timeout, Duration::from_secs(60));
        assert_eq!(config.sweep_interval, Duration::from_secs(15));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = config(&[
            ("KINDRED_PORT", "8080"),
            ("KINDRED_IDLE_TIMEOUT_SECS", " 120 "),
            ("KINDRED_JWT_SECRET", "s3cret"),
        ])
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.idle_timeout, Duration::from_secs(120));
        assert_eq!(config.jwt_secret, "s3cret");
    }

    #[test]
    fn bad_numbers_are_startup_errors() {
        assert!(config(&[("KINDRED_PORT", "eighty")]).is_err());
        assert!(config(&[("KINDRED_PORT", "70000")]).is_err());
        assert!(config(&[("KINDRED_SWEEP_INTERVAL_SECS", "0")]).is_err());
    }
}
