//! # db: PostgreSQL layer
//!
//! Uses `sqlx` (runtime queries, no compile-time `DATABASE_URL` needed).
//!
//! ## Layout
//! - [`store`]: [`TickStore`] seam + the batched conflict-skip insert
//! - [`partitions`]: parent/default partition, maintenance routine, pg_cron job
//! - [`inspect`]: read-only diagnostics used by the `verify_setup` / `check_cron` binaries

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::PgPool;
use tracing::info;

use crate::config::{is_plain_identifier, StoreConfig};
use crate::error::StoreError;
use crate::models::Tick;

pub mod inspect;
pub mod partitions;
pub mod store;

pub use partitions::{
    MaintenanceOutcome, MaintenanceSettings, PartitionMaintainer, PartitionManager, PartitionPlan,
};
pub use store::PgStore;

// ─── Store Seam ───────────────────────────────────────────────────────────────

/// Result of one transactional flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertOutcome {
    /// Rows handed to the INSERT.
    pub given:    usize,
    /// Rows actually written; conflict-skipped duplicates are not counted.
    pub inserted: u64,
}

/// Write side of the tick table, owned by the ingestion loop.
#[async_trait]
pub trait TickStore: Send + Sync {
    /// Insert all `ticks` in one transaction, skipping rows that already exist.
    /// On error nothing was written.
    async fn insert_ticks(&self, ticks: &[Tick]) -> Result<InsertOutcome, StoreError>;

    /// Release connections. Called once during shutdown.
    async fn close(&self);
}

// ─── Table Naming ─────────────────────────────────────────────────────────────

/// `<schema>.<table>` plus every name derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    schema: String,
    table:  String,
}

impl TableRef {
    pub fn new(schema: &str, table: &str) -> Result<Self, StoreError> {
        for name in [schema, table] {
            if !is_plain_identifier(name) {
                return Err(StoreError::InvalidIdentifier(name.to_string()));
            }
        }
        Ok(Self { schema: schema.to_string(), table: table.to_string() })
    }

    pub fn from_config(cfg: &StoreConfig) -> Result<Self, StoreError> {
        Self::new(&cfg.schema, &cfg.table)
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn qualified(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }

    pub fn default_partition(&self) -> String {
        format!("{}_default", self.table)
    }

    /// `<schema>.manage_<table>_partitions(retention_days, precreate_days)`
    pub fn routine(&self) -> String {
        format!("{}.{}", self.schema, self.routine_name())
    }

    /// [`Self::routine`] without the schema.
    pub fn routine_name(&self) -> String {
        format!("manage_{}_partitions", self.table)
    }

    /// Worker taking an explicit `as_of` date; the routine delegates to it.
    pub fn routine_at(&self) -> String {
        format!("{}_at", self.routine())
    }

    pub fn cron_job_name(&self) -> String {
        format!("{}_manage_partitions", self.qualified())
    }

    /// Text hashed into the advisory lock key.
    pub fn lock_name(&self) -> String {
        format!("{}:manage_partitions", self.qualified())
    }
}

// ─── Pool Init ────────────────────────────────────────────────────────────────

pub fn connect_options(cfg: &StoreConfig) -> PgConnectOptions {
    let ssl_mode = PgSslMode::from_str(&cfg.sslmode).unwrap_or(PgSslMode::Prefer);
    PgConnectOptions::new()
        .host(&cfg.host)
        .port(cfg.port)
        .username(&cfg.user)
        .password(&cfg.password)
        .database(&cfg.dbname)
        .ssl_mode(ssl_mode)
}

/// Open the pool and prove it with one round-trip.
pub async fn connect(cfg: &StoreConfig) -> Result<PgPool, StoreError> {
    info!(host = %cfg.host, port = cfg.port, db = %cfg.dbname, "[DB] connecting to PostgreSQL...");

    let pool = PgPoolOptions::new()
        .max_connections(cfg.max_connections.max(1))
        .acquire_timeout(cfg.connect_timeout)
        .connect_with(connect_options(cfg))
        .await
        .map_err(|source| StoreError::Connect {
            host:   cfg.host.clone(),
            port:   cfg.port,
            dbname: cfg.dbname.clone(),
            source,
        })?;

    info!("✅ [DB] connection established");
    Ok(pool)
}
