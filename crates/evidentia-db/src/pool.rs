//! PostgreSQL pool sizing for the pipeline service.
//!
//! The service runs two cron-style jobs and a small read API, so the pool
//! stays small; `DATABASE_MAX_CONNECTIONS` and
//! `DATABASE_ACQUIRE_TIMEOUT_SECS` override the defaults.

use std::time::{Duration, Instant};

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use evidentia_core::logging::subsystem;
use evidentia_core::{Error, Result};

const MAX_CONNECTIONS: u32 = 5;
const ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Pool sizing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_connections: u32,
    /// How long a job waits for a free connection before failing its run.
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: MAX_CONNECTIONS,
            acquire_timeout: Duration::from_secs(ACQUIRE_TIMEOUT_SECS),
        }
    }
}

impl PoolConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let base = Self::default();
        let max_connections = lookup("DATABASE_MAX_CONNECTIONS")
            .and_then(|v| v.trim().parse::<u32>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(base.max_connections);
        let acquire_timeout = lookup("DATABASE_ACQUIRE_TIMEOUT_SECS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(base.acquire_timeout);
        Self {
            max_connections,
            acquire_timeout,
        }
    }
}

/// Open the pool. The first connection is established eagerly so a bad
/// `DATABASE_URL` fails at startup rather than on the first cron run.
pub async fn connect_pool(database_url: &str, config: &PoolConfig) -> Result<PgPool> {
    let start = Instant::now();
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(1)
        .acquire_timeout(config.acquire_timeout)
        .connect(database_url)
        .await
        .map_err(Error::Database)?;

    info!(
        subsystem = subsystem::DB,
        component = "pool",
        op = "connect",
        max_connections = config.max_connections,
        duration_ms = start.elapsed().as_millis() as u64,
        "Database pool ready"
    );
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_from_environment() {
        let config = PoolConfig::from_lookup(|key| match key {
            "DATABASE_MAX_CONNECTIONS" => Some("12".to_string()),
            "DATABASE_ACQUIRE_TIMEOUT_SECS" => Some(" 5 ".to_string()),
            _ => None,
        });
        assert_eq!(config.max_connections, 12);
        assert_eq!(config.acquire_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_unusable_values_fall_back() {
        let config = PoolConfig::from_lookup(|key| match key {
            "DATABASE_MAX_CONNECTIONS" => Some("0".to_string()),
            "DATABASE_ACQUIRE_TIMEOUT_SECS" => Some("soon".to_string()),
            _ => None,
        });
        assert_eq!(config, PoolConfig::default());
    }
}
