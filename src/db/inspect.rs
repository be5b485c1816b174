//! # db::inspect
//!
//! Read-only checks over the partitioned table and its pg_cron job.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Executor, PgPool};

use crate::db::partitions::GLOBAL_UNIQUE;
use crate::db::TableRef;
use crate::error::StoreError;

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct LatestRow {
    pub symbol:     String,
    pub time_utc:   DateTime<Utc>,
    pub bid:        Option<f64>,
    pub ask:        Option<f64>,
    pub spread_pts: Option<i32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchemaReport {
    pub parent_table:      bool,
    pub default_partition: bool,
    pub global_unique:     bool,
    pub routine:           bool,
    /// Newest first, at most ten.
    pub partitions:        Vec<String>,
    pub default_indexes:   Vec<String>,
    pub rows_default:      Option<i64>,
    pub rows_total:        Option<i64>,
    pub latest:            Vec<LatestRow>,
}

impl SchemaReport {
    pub fn is_ready(&self) -> bool {
        self.parent_table && self.default_partition && self.global_unique
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct CronJobStatus {
    pub jobid:    i64,
    pub schedule: String,
    pub command:  String,
    pub database: String,
    pub active:   bool,
}

pub async fn schema_report(pool: &PgPool, table: &TableRef) -> Result<SchemaReport, StoreError> {
    let parent_table = relation_exists(pool, table.schema(), table.table()).await?;
    let default_partition = relation_exists(pool, table.schema(), &table.default_partition()).await?;

    let global_unique = sqlx::query_scalar::<_, i32>(
        r#"
        SELECT 1
        FROM pg_constraint c
        JOIN pg_class t ON t.oid = c.conrelid
        JOIN pg_namespace n ON n.oid = t.relnamespace
        WHERE n.nspname = $1 AND t.relname = $2 AND c.conname = $3
        "#,
    )
    .bind(table.schema())
    .bind(table.table())
    .bind(GLOBAL_UNIQUE)
    .fetch_optional(pool)
    .await?
    .is_some();

    let routine_name = table.routine_name();
    let routine = sqlx::query_scalar::<_, i32>(
        r#"
        SELECT 1 FROM pg_proc p
        JOIN pg_namespace n ON n.oid = p.pronamespace
        WHERE p.proname = $1 AND n.nspname = $2
        LIMIT 1
        "#,
    )
    .bind(&routine_name)
    .bind(table.schema())
    .fetch_optional(pool)
    .await?
    .is_some();

    let mut report = SchemaReport {
        parent_table,
        default_partition,
        global_unique,
        routine,
        partitions: Vec::new(),
        default_indexes: Vec::new(),
        rows_default: None,
        rows_total: None,
        latest: Vec::new(),
    };

    if parent_table {
        report.partitions = sqlx::query_scalar(
            r#"
            SELECT c.relname::text
            FROM pg_inherits i
            JOIN pg_class c ON c.oid = i.inhrelid
            JOIN pg_class p ON p.oid = i.inhparent
            JOIN pg_namespace n ON n.oid = p.relnamespace
            WHERE n.nspname = $1 AND p.relname = $2
            ORDER BY 1 DESC
            LIMIT 10
            "#,
        )
        .bind(table.schema())
        .bind(table.table())
        .fetch_all(pool)
        .await?;

        report.rows_total = Some(
            sqlx::query_scalar(&format!("SELECT count(*) FROM {}", table.qualified()))
                .fetch_one(pool)
                .await?,
        );

        report.latest = sqlx::query_as(&format!(
            "SELECT symbol, time_utc, bid::float8 AS bid, ask::float8 AS ask, spread_pts \
             FROM {} ORDER BY time_utc DESC LIMIT 5",
            table.qualified()
        ))
        .fetch_all(pool)
        .await?;
    }

    if default_partition {
        report.default_indexes = sqlx::query_scalar(
            "SELECT indexname::text FROM pg_indexes WHERE schemaname = $1 AND tablename = $2 ORDER BY 1",
        )
        .bind(table.schema())
        .bind(table.default_partition())
        .fetch_all(pool)
        .await?;

        report.rows_default = Some(
            sqlx::query_scalar(&format!(
                "SELECT count(*) FROM {}.{}",
                table.schema(),
                table.default_partition()
            ))
            .fetch_one(pool)
            .await?,
        );
    }

    Ok(report)
}

/// `Ok(None)` when no job with that name is registered.
pub async fn cron_job_status(
    pool: &PgPool,
    job_name: &str,
) -> Result<Option<CronJobStatus>, StoreError> {
    pool.execute("CREATE EXTENSION IF NOT EXISTS pg_cron").await?;

    let status = sqlx::query_as::<_, CronJobStatus>(
        "SELECT jobid, schedule, command, database, active FROM cron.job WHERE jobname = $1",
    )
    .bind(job_name)
    .fetch_optional(pool)
    .await?;
    Ok(status)
}

async fn relation_exists(pool: &PgPool, schema: &str, name: &str) -> Result<bool, sqlx::Error> {
    let found: Option<i32> = sqlx::query_scalar(
        "SELECT 1 FROM information_schema.tables WHERE table_schema = $1 AND table_name = $2",
    )
    .bind(schema)
    .bind(name)
    .fetch_optional(pool)
    .await?;
    Ok(found.is_some())
}
