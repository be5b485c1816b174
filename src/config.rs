//! # config: read configuration from environment variables
//!
//! `.env` is loaded by `main` (dotenvy) before [`Config::from_env`] runs.
//! Every key has a default; a key that is present but malformed is an error
//! naming the variable, so a typo never silently becomes the default.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context};

/// Literal `MT5_BASE_URL` value that selects the synthetic source.
pub const MOCK_SOURCE: &str = "mock";

/// Nine bind parameters per row, 65535 per statement.
pub const MAX_PAGE_SIZE: usize = 65_535 / 9;

/// Beyond this `10^places` loses precision and spreads stop rounding.
pub const MAX_SPREAD_ROUND: u32 = 15;

// ─── Sections ─────────────────────────────────────────────────────────────────

/// MT5 terminal login and the HTTP bridge in front of it.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub login:    u64,
    pub password: String,
    pub server:   String,
    /// Terminal install path, forwarded to the bridge on initialize.
    pub path:     String,
    pub symbol:   String,
    /// Bridge base URL, or `"mock"`.
    pub base_url: String,
    pub timeout:  Duration,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub host:            String,
    pub port:            u16,
    pub user:            String,
    pub password:        String,
    pub dbname:          String,
    pub schema:          String,
    pub table:           String,
    /// Rows per INSERT statement inside one flush transaction.
    pub page_size:       usize,
    pub sslmode:         String,
    pub connect_timeout: Duration,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub batch_size:            usize,
    pub poll:                  Duration,
    pub retention_days:        u32,
    pub precreate_days:        u32,
    pub enable_partition_mgmt: bool,
    pub enable_pg_cron:        bool,
    pub pg_cron_schedule:      String,
    /// First-fetch window when there is no watermark yet.
    pub lookback:              Duration,
    pub max_fetch:             usize,
    pub drift_threshold:       Duration,
    /// `None` = size-triggered flushes only.
    pub flush_after:           Option<Duration>,
    /// `None` = maintenance runs at startup only.
    pub maintenance_every:     Option<Duration>,
}

/// Instrument constants used for spread derivation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickConfig {
    /// Price of one point, e.g. 0.01 for XAUUSD.
    pub point:        f64,
    /// Decimal places kept on `ask - bid`.
    pub spread_round: u32,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self { point: 0.01, spread_round: 5 }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub source:      SourceConfig,
    pub store:       StoreConfig,
    pub tracker:     TrackerConfig,
    pub tick:        TickConfig,
    pub status_addr: Option<SocketAddr>,
}

// ─── Loading ──────────────────────────────────────────────────────────────────

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let source = SourceConfig {
            login:    env.parse("MT5_LOGIN", 0)?,
            password: env.string("MT5_PASSWORD", ""),
            server:   env.string("MT5_SERVER", ""),
            path:     env.string("MT5_PATH", ""),
            symbol:   env.string("MT5_SYMBOL", "XAUUSD"),
            base_url: env.string("MT5_BASE_URL", "http://localhost:8081"),
            timeout:  Duration::from_millis(env.parse("MT5_TIMEOUT_MS", 5000)?),
        };

        let store = StoreConfig {
            host:            env.string("POSTGRES_HOST", "127.0.0.1"),
            port:            env.parse("POSTGRES_PORT", 5432)?,
            user:            env.string("POSTGRES_USER", "postgres"),
            password:        env.string("POSTGRES_PASSWORD", ""),
            dbname:          env.string("POSTGRES_DATABASE", "trading"),
            schema:          env.string("POSTGRES_SCHEMA", "public"),
            table:           env.string("POSTGRES_TABLE", "tick_log"),
            page_size:       env.parse("POSTGRES_PAGE_SIZE", 1000)?,
            sslmode:         env.string("POSTGRES_SSLMODE", "prefer"),
            connect_timeout: Duration::from_secs(env.parse("POSTGRES_TIMEOUT", 10)?),
            max_connections: env.parse("POSTGRES_MAX_CONNS", 4)?,
        };

        let flush_sec: u64 = env.parse("FLUSH_SEC", 0)?;
        let maintenance_secs: u64 = env.parse("PARTITION_MGMT_INTERVAL_SECS", 3600)?;

        let tracker = TrackerConfig {
            batch_size:            env.parse("BATCH_SIZE", 200)?,
            poll:                  Duration::from_millis(env.parse("POLL_MS", 200)?),
            retention_days:        env.parse("RETENTION_DAYS", 180)?,
            precreate_days:        env.parse("PRECREATE_DAYS", 3)?,
            enable_partition_mgmt: env.flag("ENABLE_PARTITION_MGMT", true)?,
            enable_pg_cron:        env.flag("ENABLE_PG_CRON", false)?,
            pg_cron_schedule:      env.string("PG_CRON_SCHEDULE", "15 02 * * *"),
            lookback:              Duration::from_millis(env.parse("TICK_LOOKBACK_MS", 3000)?),
            max_fetch:             env.parse("TICK_FETCH_MAX", 100_000)?,
            drift_threshold:       Duration::from_millis(env.parse("CLOCK_DRIFT_MS", 1000)?),
            flush_after:           (flush_sec > 0).then(|| Duration::from_secs(flush_sec)),
            maintenance_every:     (maintenance_secs > 0).then(|| Duration::from_secs(maintenance_secs)),
        };

        let tick = TickConfig {
            point:        env.parse("TICK_POINT", 0.01)?,
            spread_round: env.parse("TICK_SPREAD_ROUND", 5)?,
        };

        let status_addr = match env.get("STATUS_BIND_ADDR") {
            Some(raw) => Some(
                raw.parse()
                    .with_context(|| format!("STATUS_BIND_ADDR must be host:port, got '{raw}'"))?,
            ),
            None => None,
        };

        let config = Self { source, store, tracker, tick, status_addr };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.tracker.batch_size == 0 {
            bail!("BATCH_SIZE must be greater than 0");
        }
        if self.tracker.poll.is_zero() {
            bail!("POLL_MS must be greater than 0");
        }
        if self.tracker.max_fetch == 0 {
            bail!("TICK_FETCH_MAX must be greater than 0");
        }
        if self.store.page_size == 0 || self.store.page_size > MAX_PAGE_SIZE {
            bail!("POSTGRES_PAGE_SIZE must be between 1 and {MAX_PAGE_SIZE}");
        }
        if self.tracker.retention_days == 0 {
            bail!("RETENTION_DAYS must be at least 1");
        }
        if self.tick.point.is_nan() || self.tick.point <= 0.0 {
            bail!("TICK_POINT must be a positive number");
        }
        if self.tick.spread_round > MAX_SPREAD_ROUND {
            bail!("TICK_SPREAD_ROUND must be at most {MAX_SPREAD_ROUND}");
        }
        if self.source.symbol.trim().is_empty() {
            bail!("MT5_SYMBOL must not be empty");
        }
        for (key, value) in [
            ("POSTGRES_SCHEMA", &self.store.schema),
            ("POSTGRES_TABLE", &self.store.table),
        ] {
            if !is_plain_identifier(value) {
                bail!("{key} must match [a-z_][a-z0-9_]*, got '{value}'");
            }
        }
        Ok(())
    }

    pub fn uses_mock_source(&self) -> bool {
        self.source.base_url.eq_ignore_ascii_case(MOCK_SOURCE)
    }
}

/// Lower-case SQL identifier that needs no quoting and no regex escaping.
pub fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 48 && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T>(&self, key: &str, default: T) -> anyhow::Result<T>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match self.get(key) {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("{key} has an invalid value '{raw}'")),
            None => Ok(default),
        }
    }

    fn flag(&self, key: &str, default: bool) -> anyhow::Result<bool> {
        match self.get(key).map(|v| v.to_ascii_lowercase()) {
            None => Ok(default),
            Some(v) => match v.as_str() {
                "true" | "1" | "yes" | "on" => Ok(true),
                "false" | "0" | "no" | "off" => Ok(false),
                other => bail!("{key} must be true/false, got '{other}'"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> anyhow::Result<Config> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.source.symbol, "XAUUSD");
        assert_eq!(config.store.schema, "public");
        assert_eq!(config.store.table, "tick_log");
        assert_eq!(config.store.page_size, 1000);
        assert_eq!(config.store.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.tracker.batch_size, 200);
        assert_eq!(config.tracker.poll, Duration::from_millis(200));
        assert_eq!(config.tracker.retention_days, 180);
        assert_eq!(config.tracker.precreate_days, 3);
        assert!(config.tracker.enable_partition_mgmt);
        assert!(!config.tracker.enable_pg_cron);
        assert_eq!(config.tracker.pg_cron_schedule, "15 02 * * *");
        assert_eq!(config.tracker.flush_after, None);
        assert_eq!(config.tick, TickConfig { point: 0.01, spread_round: 5 });
        assert!(config.status_addr.is_none());
        assert!(!config.uses_mock_source());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("MT5_SYMBOL", "EURUSD"),
            ("MT5_BASE_URL", "mock"),
            ("BATCH_SIZE", "50"),
            ("ENABLE_PG_CRON", "TRUE"),
            ("ENABLE_PARTITION_MGMT", "off"),
            ("FLUSH_SEC", "2"),
            ("PARTITION_MGMT_INTERVAL_SECS", "0"),
            ("TICK_POINT", "0.00001"),
            ("STATUS_BIND_ADDR", "127.0.0.1:3001"),
        ])
        .unwrap();
        assert_eq!(config.source.symbol, "EURUSD");
        assert!(config.uses_mock_source());
        assert_eq!(config.tracker.batch_size, 50);
        assert!(config.tracker.enable_pg_cron);
        assert!(!config.tracker.enable_partition_mgmt);
        assert_eq!(config.tracker.flush_after, Some(Duration::from_secs(2)));
        assert_eq!(config.tracker.maintenance_every, None);
        assert_eq!(config.tick.point, 0.00001);
        assert_eq!(config.status_addr, Some("127.0.0.1:3001".parse().unwrap()));
    }

    #[test]
    fn test_malformed_value_names_the_key() {
        let err = load(&[("POLL_MS", "fast")]).unwrap_err();
        assert!(err.to_string().contains("POLL_MS"));
    }

    #[test]
    fn test_rejects_zero_batch_size() {
        assert!(load(&[("BATCH_SIZE", "0")]).is_err());
    }

    #[test]
    fn test_spread_round_is_bounded() {
        assert_eq!(load(&[("TICK_SPREAD_ROUND", "15")]).unwrap().tick.spread_round, 15);
        let err = load(&[("TICK_SPREAD_ROUND", "400")]).unwrap_err();
        assert!(err.to_string().contains("TICK_SPREAD_ROUND"));
    }

    #[test]
    fn test_rejects_page_over_bind_limit() {
        assert!(load(&[("POSTGRES_PAGE_SIZE", "7281")]).is_ok());
        assert!(load(&[("POSTGRES_PAGE_SIZE", "7282")]).is_err());
    }

    #[test]
    fn test_rejects_unsafe_table_name() {
        assert!(load(&[("POSTGRES_TABLE", "tick_log; drop table x")]).is_err());
        assert!(load(&[("POSTGRES_SCHEMA", "Public")]).is_err());
    }

    #[test]
    fn test_plain_identifier() {
        assert!(is_plain_identifier("tick_log"));
        assert!(is_plain_identifier("_t2"));
        assert!(!is_plain_identifier("2ticks"));
        assert!(!is_plain_identifier(""));
        assert!(!is_plain_identifier("tick-log"));
    }
}
