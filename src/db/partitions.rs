//! # db::partitions: daily range partitions over the tick table
//!
//! ```text
//! <schema>.<table>              PARTITION BY RANGE (time_utc), UNIQUE uq_tick_global
//!  ├─ <table>_default           catch-all, never dropped
//!  ├─ <table>_20240301          [2024-03-01, 2024-03-02) UTC
//!  ├─ <table>_20240302
//!  └─ ...                       [today - retention + 1, today + precreate]
//! ```
//!
//! Creation and expiry are done by a PL/pgSQL routine installed on the server
//! so that the inline call from the tracker and the pg_cron job run the very
//! same code. The routine takes a transaction-scoped advisory lock; a
//! concurrent run that loses the lock returns immediately.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use sqlx::{Connection, Executor, PgPool, Postgres, Transaction};
use tracing::{error, info, warn};

use crate::config::TrackerConfig;
use crate::db::TableRef;
use crate::error::{sqlstate, StoreError, UNDEFINED_FUNCTION};

/// Shared by creation (`to_char(d, 'YYYYMMDD')`) and the drop scan.
const DATE_FORMAT: &str = "%Y%m%d";

/// Name of the parent-level unique constraint.
pub const GLOBAL_UNIQUE: &str = "uq_tick_global";

// ─── Partition Plan ───────────────────────────────────────────────────────────

/// The retained window for a given UTC day, computed the same way the
/// server-side routine does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionPlan {
    pub keep_from: NaiveDate,
    pub create_to: NaiveDate,
}

impl PartitionPlan {
    pub fn for_day(today: NaiveDate, retention_days: u32, precreate_days: u32) -> Self {
        Self {
            keep_from: today - Duration::days(i64::from(retention_days)) + Duration::days(1),
            create_to: today + Duration::days(i64::from(precreate_days)),
        }
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.keep_from
            .iter_days()
            .take_while(move |d| *d <= self.create_to)
    }

    pub fn covers(&self, day: NaiveDate) -> bool {
        day >= self.keep_from && day <= self.create_to
    }

    /// `true` when an existing partition for `day` must be dropped.
    pub fn is_expired(&self, day: NaiveDate) -> bool {
        day < self.keep_from
    }
}

pub fn partition_name(table: &TableRef, day: NaiveDate) -> String {
    format!("{}_{}", table.table(), day.format(DATE_FORMAT))
}

/// Inverse of [`partition_name`]; `None` for the default partition or any
/// name that is not exactly `<table>_YYYYMMDD`.
pub fn parse_partition_date(table: &TableRef, name: &str) -> Option<NaiveDate> {
    let digits = name.strip_prefix(table.table())?.strip_prefix('_')?;
    if digits.len() != 8 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(digits, DATE_FORMAT).ok()
}

// ─── Outcomes ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SchemaChanges {
    pub created_parent:     bool,
    pub created_constraint: bool,
    pub created_default:    bool,
}

impl SchemaChanges {
    pub fn any(&self) -> bool {
        self.created_parent || self.created_constraint || self.created_default
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceOutcome {
    /// The routine ran to completion.
    Ran,
    /// Another session held the lock; nothing was done.
    SkippedLocked,
    /// Routine not installed; degraded to a no-op.
    RoutineMissing,
}

/// Settings for [`PartitionManager::bootstrap`].
#[derive(Debug, Clone)]
pub struct MaintenanceSettings {
    pub enabled:        bool,
    pub retention_days: u32,
    pub precreate_days: u32,
    pub enable_cron:    bool,
    pub cron_schedule:  String,
}

impl From<&TrackerConfig> for MaintenanceSettings {
    fn from(cfg: &TrackerConfig) -> Self {
        Self {
            enabled:        cfg.enable_partition_mgmt,
            retention_days: cfg.retention_days,
            precreate_days: cfg.precreate_days,
            enable_cron:    cfg.enable_pg_cron,
            cron_schedule:  cfg.pg_cron_schedule.clone(),
        }
    }
}

/// What the ingestion loop needs to keep the window rolling.
#[async_trait]
pub trait PartitionMaintainer: Send + Sync {
    async fn run_maintenance_now(
        &self,
        retention_days: u32,
        precreate_days: u32,
    ) -> Result<MaintenanceOutcome, StoreError>;
}

// ─── Partition Manager ────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct PartitionManager {
    pool:   PgPool,
    table:  TableRef,
    dbname: String,
}

impl PartitionManager {
    pub fn new(pool: PgPool, table: TableRef, dbname: impl Into<String>) -> Self {
        Self { pool, table, dbname: dbname.into() }
    }

    pub fn table(&self) -> &TableRef {
        &self.table
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Startup sequence: schema → routine → first run → cron job.
    ///
    /// Only schema / routine failures are fatal; a failed cron registration is
    /// logged and ingestion starts anyway.
    pub async fn bootstrap(&self, settings: &MaintenanceSettings) -> Result<(), StoreError> {
        self.ensure_parent_and_default().await?;

        if !settings.enabled {
            info!("[PART] partition management disabled by config");
            return Ok(());
        }

        info!(
            retention = settings.retention_days,
            precreate = settings.precreate_days,
            "[PART] installing and managing partitions"
        );
        self.install_maintenance_routine().await?;
        self.run_maintenance_now(settings.retention_days, settings.precreate_days)
            .await?;

        if settings.enable_cron {
            match self
                .ensure_scheduled_job(
                    settings.retention_days,
                    settings.precreate_days,
                    &settings.cron_schedule,
                )
                .await
            {
                Ok(job) => info!(job = %job, schedule = %settings.cron_schedule, "[PART] pg_cron job ensured"),
                Err(e) => error!(error = %e, "[PART] pg_cron job could not be ensured, relying on inline maintenance"),
            }
        }
        Ok(())
    }

    // ── ensureParentAndDefault ───────────────────────────────────────────────

    /// Create the partitioned parent, the global unique constraint and the
    /// default partition, each only if missing. Commits only when something
    /// changed.
    pub async fn ensure_parent_and_default(&self) -> Result<SchemaChanges, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut changes = SchemaChanges::default();
        let schema = self.table.schema();
        let qualified = self.table.qualified();
        let default_name = self.table.default_partition();

        // ── 1. Parent ────────────────────────────────────────────────────────
        if !table_exists(&mut tx, schema, self.table.table()).await? {
            info!(table = %qualified, "[DB] creating parent table");
            (&mut *tx).execute(
                format!(
                    r#"
                    CREATE TABLE {qualified} (
                      id           BIGSERIAL,
                      symbol       TEXT NOT NULL,
                      time_utc     TIMESTAMPTZ NOT NULL,
                      time_msc     BIGINT NOT NULL,
                      bid          NUMERIC(12,3),
                      ask          NUMERIC(12,3),
                      last         NUMERIC(12,3),
                      volume       BIGINT,
                      flags        INT,
                      spread_pts   INT
                    ) PARTITION BY RANGE (time_utc)
                    "#
                )
                .as_str(),
            )
            .await?;
            changes.created_parent = true;
        } else {
            info!(table = %qualified, "[DB] table already exists, skipping creation");
        }

        // ── 2. Global UNIQUE (must include the partition key) ────────────────
        let constraint_exists: Option<i32> = sqlx::query_scalar(
            r#"
            SELECT 1
            FROM pg_constraint c
            JOIN pg_class t ON t.oid = c.conrelid
            JOIN pg_namespace n ON n.oid = t.relnamespace
            WHERE n.nspname = $1 AND t.relname = $2 AND c.conname = $3
            "#,
        )
        .bind(schema)
        .bind(self.table.table())
        .bind(GLOBAL_UNIQUE)
        .fetch_optional(&mut *tx)
        .await?;

        if constraint_exists.is_none() {
            info!(table = %qualified, "[DB] creating global UNIQUE {GLOBAL_UNIQUE}");
            (&mut *tx).execute(
                format!(
                    "ALTER TABLE {qualified} ADD CONSTRAINT {GLOBAL_UNIQUE} UNIQUE (symbol, time_msc, time_utc)"
                )
                .as_str(),
            )
            .await?;
            changes.created_constraint = true;
        }

        // ── 3. Default partition ─────────────────────────────────────────────
        if !table_exists(&mut tx, schema, &default_name).await? {
            info!(partition = %default_name, "[DB] creating default partition");
            (&mut *tx).execute(
                format!("CREATE TABLE {schema}.{default_name} PARTITION OF {qualified} DEFAULT").as_str(),
            )
            .await?;
            (&mut *tx).execute(
                format!(
                    "CREATE UNIQUE INDEX IF NOT EXISTS {default_name}_uq ON {schema}.{default_name} (symbol, time_msc, time_utc)"
                )
                .as_str(),
            )
            .await?;
            changes.created_default = true;
        } else {
            info!(partition = %default_name, "[DB] default partition already exists, skipping creation");
        }

        if changes.any() {
            tx.commit().await?;
            info!(?changes, "[DB] parent/partition created and committed");
        } else {
            tx.rollback().await?;
            info!("[DB] schema already ready; no changes");
        }
        Ok(changes)
    }

    // ── installMaintenanceRoutine ────────────────────────────────────────────

    /// `CREATE OR REPLACE` both the dated worker and the two-argument entry
    /// point. Safe to repeat on every start.
    pub async fn install_maintenance_routine(&self) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        // Older installs return void; CREATE OR REPLACE cannot change that.
        let returns_void: Option<bool> = sqlx::query_scalar(
            r#"
            SELECT p.prorettype = 'void'::regtype
            FROM pg_proc p
            JOIN pg_namespace n ON n.oid = p.pronamespace
            WHERE n.nspname = $1 AND p.proname = $2 AND p.pronargs = 2
            "#,
        )
        .bind(self.table.schema())
        .bind(self.table.routine_name())
        .fetch_optional(&mut *tx)
        .await?;
        if returns_void == Some(true) {
            info!(routine = %self.table.routine(), "[DB] replacing void partition manager function");
            (&mut *tx)
                .execute(format!("DROP FUNCTION {}(integer, integer)", self.table.routine()).as_str())
                .await?;
        }

        (&mut *tx).execute(routine_at_sql(&self.table).as_str()).await?;
        (&mut *tx).execute(routine_sql(&self.table).as_str()).await?;
        tx.commit().await?;
        info!(routine = %self.table.routine(), "✅ [DB] partition manager function installed");
        Ok(())
    }

    // ── runMaintenanceNow ────────────────────────────────────────────────────

    /// Run the installed routine for today (UTC). A missing routine degrades
    /// to [`MaintenanceOutcome::RoutineMissing`], a held lock to
    /// [`MaintenanceOutcome::SkippedLocked`]; every other error is raised.
    pub async fn run_maintenance_now(
        &self,
        retention_days: u32,
        precreate_days: u32,
    ) -> Result<MaintenanceOutcome, StoreError> {
        info!(
            keep = retention_days,
            precreate = precreate_days,
            "[DB] managing partitions"
        );
        let routine = self.table.routine();
        let sql = format!("SELECT {routine}($1, $2)");

        let mut tx = self.pool.begin().await?;
        let result: Result<bool, sqlx::Error> = sqlx::query_scalar(&sql)
            .bind(days_param(retention_days))
            .bind(days_param(precreate_days))
            .fetch_one(&mut *tx)
            .await;

        match result {
            Ok(ran) => {
                tx.commit().await?;
                Ok(ran_or_skipped(ran))
            }
            Err(e) => self.fail_maintenance(tx, e, &routine).await,
        }
    }

    /// Same as [`Self::run_maintenance_now`] for an explicit "today".
    pub async fn run_maintenance_at(
        &self,
        retention_days: u32,
        precreate_days: u32,
        as_of: NaiveDate,
    ) -> Result<MaintenanceOutcome, StoreError> {
        let routine = self.table.routine_at();
        let sql = format!("SELECT {routine}($1, $2, $3)");

        let mut tx = self.pool.begin().await?;
        let result: Result<bool, sqlx::Error> = sqlx::query_scalar(&sql)
            .bind(days_param(retention_days))
            .bind(days_param(precreate_days))
            .bind(as_of)
            .fetch_one(&mut *tx)
            .await;

        match result {
            Ok(ran) => {
                tx.commit().await?;
                Ok(ran_or_skipped(ran))
            }
            Err(e) => self.fail_maintenance(tx, e, &routine).await,
        }
    }

    async fn fail_maintenance(
        &self,
        tx:      Transaction<'static, Postgres>,
        err:     sqlx::Error,
        routine: &str,
    ) -> Result<MaintenanceOutcome, StoreError> {
        tx.rollback().await?;
        match StoreError::classify(err, routine) {
            StoreError::MaintenanceRoutineMissing { .. } => {
                warn!(routine, "[DB] partition manager function missing, skipped");
                Ok(MaintenanceOutcome::RoutineMissing)
            }
            other => {
                error!(code = ?other.code(), error = %other, "[DB] partition manager error");
                Err(other)
            }
        }
    }

    // ── ensureScheduledJob ───────────────────────────────────────────────────

    /// Register (or update in place) the pg_cron job running the routine.
    /// Returns the job name.
    pub async fn ensure_scheduled_job(
        &self,
        retention_days: u32,
        precreate_days: u32,
        schedule:       &str,
    ) -> Result<String, StoreError> {
        let job_name = self.table.cron_job_name();
        let command = cron_command(&self.table, retention_days, precreate_days);

        info!(job = %job_name, schedule, "[DB] ensuring pg_cron job");

        let mut tx = self.pool.begin().await?;
        (&mut *tx).execute("CREATE EXTENSION IF NOT EXISTS pg_cron").await?;

        let job_id: Option<i64> = sqlx::query_scalar("SELECT jobid FROM cron.job WHERE jobname = $1")
            .bind(&job_name)
            .fetch_optional(&mut *tx)
            .await?;

        match job_id {
            Some(id) => {
                info!(job_id = id, "[DB] pg_cron job exists, updating schedule/command");
                sqlx::query("SELECT cron.alter_job($1, schedule => $2, command => $3)")
                    .bind(id)
                    .bind(schedule)
                    .bind(&command)
                    .execute(&mut *tx)
                    .await?;
            }
            None => {
                info!("[DB] pg_cron job missing, creating new schedule");
                // Savepoint: a failed call must not poison the outer transaction.
                let mut sp = tx.begin().await?;
                let primary = sqlx::query("SELECT cron.schedule_in_database($1, $2, $3, $4)")
                    .bind(&job_name)
                    .bind(schedule)
                    .bind(&command)
                    .bind(&self.dbname)
                    .execute(&mut *sp)
                    .await;

                match primary {
                    Ok(_) => sp.commit().await?,
                    Err(e) if sqlstate(&e).as_deref() == Some(UNDEFINED_FUNCTION) => {
                        sp.rollback().await?;
                        info!("[DB] cron.schedule_in_database unavailable, falling back to cron.schedule");
                        sqlx::query("SELECT cron.schedule($1, $2, $3)")
                            .bind(&job_name)
                            .bind(schedule)
                            .bind(&command)
                            .execute(&mut *tx)
                            .await?;
                    }
                    Err(e) => {
                        sp.rollback().await?;
                        tx.rollback().await?;
                        return Err(StoreError::Transient(e));
                    }
                }
            }
        }

        tx.commit().await?;
        Ok(job_name)
    }
}

#[async_trait]
impl PartitionMaintainer for PartitionManager {
    async fn run_maintenance_now(
        &self,
        retention_days: u32,
        precreate_days: u32,
    ) -> Result<MaintenanceOutcome, StoreError> {
        PartitionManager::run_maintenance_now(self, retention_days, precreate_days).await
    }
}

// ─── SQL ──────────────────────────────────────────────────────────────────────

async fn table_exists(
    tx:     &mut Transaction<'static, Postgres>,
    schema: &str,
    table:  &str,
) -> Result<bool, sqlx::Error> {
    let found: Option<i32> = sqlx::query_scalar(
        "SELECT 1 FROM information_schema.tables WHERE table_schema = $1 AND table_name = $2",
    )
    .bind(schema)
    .bind(table)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(found.is_some())
}

fn ran_or_skipped(ran: bool) -> MaintenanceOutcome {
    if ran {
        MaintenanceOutcome::Ran
    } else {
        info!("[DB] partition maintenance already running elsewhere, skipped");
        MaintenanceOutcome::SkippedLocked
    }
}

/// Routine parameters are `integer`.
fn days_param(days: u32) -> i32 {
    i32::try_from(days).unwrap_or(i32::MAX)
}

pub fn cron_command(table: &TableRef, retention_days: u32, precreate_days: u32) -> String {
    format!(
        "SELECT {}({}, {});",
        table.routine(),
        days_param(retention_days),
        days_param(precreate_days)
    )
}

const ROUTINE_AT_TEMPLATE: &str = r#"
CREATE OR REPLACE FUNCTION __ROUTINE_AT__(retention_days integer, precreate_days integer, as_of date)
RETURNS boolean
LANGUAGE plpgsql
AS $fn$
DECLARE
    keep_from_date date := as_of - retention_days + 1;
    create_to_date date := as_of + precreate_days;
    d              date;
    part_name      text;
    r              record;
BEGIN
    IF NOT pg_try_advisory_xact_lock(hashtext('__LOCK__')) THEN
        RETURN false;
    END IF;

    d := keep_from_date;
    WHILE d <= create_to_date LOOP
        part_name := format('__TABLE___%s', to_char(d, 'YYYYMMDD'));
        BEGIN
            EXECUTE format(
                'CREATE TABLE IF NOT EXISTS %I.%I PARTITION OF %I.%I FOR VALUES FROM (%L) TO (%L)',
                '__SCHEMA__', part_name, '__SCHEMA__', '__TABLE__',
                d::text || ' 00:00:00+00', (d + 1)::text || ' 00:00:00+00'
            );
            EXECUTE format('CREATE INDEX IF NOT EXISTS %I ON %I.%I (time_utc)',
                part_name || '_time_idx', '__SCHEMA__', part_name);
            EXECUTE format('CREATE UNIQUE INDEX IF NOT EXISTS %I ON %I.%I (symbol, time_msc, time_utc)',
                part_name || '_uq', '__SCHEMA__', part_name);
        EXCEPTION
            WHEN duplicate_table THEN
                NULL;
            WHEN check_violation THEN
                RAISE WARNING 'partition % overlaps rows in the default partition, skipped', part_name;
        END;
        d := d + 1;
    END LOOP;

    FOR r IN
        SELECT c.relname AS child_name,
               to_date(substring(c.relname FROM '^__TABLE___(\d{8})$'), 'YYYYMMDD') AS part_date
        FROM pg_inherits i
        JOIN pg_class c ON c.oid = i.inhrelid
        JOIN pg_class p ON p.oid = i.inhparent
        JOIN pg_namespace n ON n.oid = p.relnamespace
        WHERE n.nspname = '__SCHEMA__'
          AND p.relname = '__TABLE__'
          AND c.relkind = 'r'
    LOOP
        IF r.part_date IS NOT NULL AND r.part_date < keep_from_date THEN
            EXECUTE format('DROP TABLE IF EXISTS %I.%I', '__SCHEMA__', r.child_name);
        END IF;
    END LOOP;

    RETURN true;
END;
$fn$
"#;

const ROUTINE_TEMPLATE: &str = r#"
CREATE OR REPLACE FUNCTION __ROUTINE__(retention_days integer, precreate_days integer)
RETURNS boolean
LANGUAGE plpgsql
AS $fn$
BEGIN
    RETURN __ROUTINE_AT__(retention_days, precreate_days, (now() AT TIME ZONE 'UTC')::date);
END;
$fn$
"#;

fn render(template: &str, table: &TableRef) -> String {
    template
        .replace("__ROUTINE_AT__", &table.routine_at())
        .replace("__ROUTINE__", &table.routine())
        .replace("__LOCK__", &table.lock_name())
        .replace("__SCHEMA__", table.schema())
        .replace("__TABLE__", table.table())
}

pub fn routine_at_sql(table: &TableRef) -> String {
    render(ROUTINE_AT_TEMPLATE, table)
}

pub fn routine_sql(table: &TableRef) -> String {
    render(ROUTINE_TEMPLATE, table)
}
