//! # tick-tracker: MT5 tick harvester
//!
//! ## Startup Order
//!
//! ```text
//!  .env ─▶ tracing ─▶ Config ─▶ PgPool ─▶ PartitionManager::bootstrap
//!       ─▶ TickSource (initialize + select) ─▶ [status endpoint] ─▶ Tracker::run
//!                                                      ctrl-c / SIGTERM ─▶ shutdown
//! ```
//!
//! ## Environment Variables
//!
//! | Variable           | Default                 | Description                     |
//! |--------------------|-------------------------|---------------------------------|
//! | `MT5_SYMBOL`       | `XAUUSD`                | Symbol to harvest (CLI wins)    |
//! | `MT5_BASE_URL`     | `http://localhost:8081` | MT5 bridge, or `mock`           |
//! | `POSTGRES_*`       | see `config.rs`         | Target database and table       |
//! | `STATUS_BIND_ADDR` | unset                   | Serve `/api/tracker/health`     |
//! | `RUST_LOG`         | `tick_tracker=debug`    | Tracing filter                  |

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tick_tracker::config::Config;
use tick_tracker::db::{self, MaintenanceSettings, PartitionManager, PgStore, TableRef};
use tick_tracker::engine::Tracker;
use tick_tracker::routes;
use tick_tracker::source;
use tick_tracker::state::TrackerStats;

#[derive(Debug, Parser)]
#[command(name = "tick-tracker", version, about = "Harvest MT5 ticks into partitioned PostgreSQL")]
struct Cli {
    /// Overrides MT5_SYMBOL.
    symbol: Option<String>,
}

// ─── Entry Point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Load .env (optional: prod can use real env vars) ─────────────────
    dotenvy::dotenv().ok();

    // ── 2. Initialise structured logging ─────────────────────────────────────
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env()
            .add_directive("tick_tracker=debug".parse()?)
            .add_directive("sqlx=warn".parse()?)
            .add_directive("tower_http=info".parse()?))
        .init();

    info!(
        r#"

  ╔═══════════════════════════════════════════════╗
  ║        TICK TRACKER · MT5 → PostgreSQL        ║
  ║        watermark ingest · daily partitions    ║
  ╚═══════════════════════════════════════════════╝"#
    );

    // ── 3. Configuration ─────────────────────────────────────────────────────
    let cli = Cli::parse();
    let mut config = Config::from_env().context("Invalid configuration")?;
    if let Some(symbol) = cli.symbol.filter(|s| !s.trim().is_empty()) {
        config.source.symbol = symbol.trim().to_string();
    }
    let symbol = config.source.symbol.clone();
    info!(symbol = %symbol, batch = config.tracker.batch_size, poll_ms = config.tracker.poll.as_millis() as u64, "Configuration loaded");

    // ── 4. Database + partition topology ─────────────────────────────────────
    let pool = db::connect(&config.store).await?;
    let table = TableRef::from_config(&config.store)?;
    let partitions = Arc::new(PartitionManager::new(
        pool.clone(),
        table.clone(),
        config.store.dbname.clone(),
    ));
    partitions
        .bootstrap(&MaintenanceSettings::from(&config.tracker))
        .await
        .context("Partition bootstrap failed")?;

    // ── 5. Tick source ───────────────────────────────────────────────────────
    let source = source::from_config(&config.source)?;

    // ── 6. Status endpoint (optional) ────────────────────────────────────────
    let stats = TrackerStats::shared(&symbol);
    if let Some(addr) = config.status_addr {
        let stats = Arc::clone(&stats);
        tokio::spawn(async move {
            if let Err(e) = routes::serve(addr, stats).await {
                error!(error = %e, "[STATUS] health endpoint stopped");
            }
        });
    }

    // ── 7. Tracker ───────────────────────────────────────────────────────────
    let store = Arc::new(PgStore::new(pool, table, config.store.page_size));
    let mut tracker = Tracker::new(
        &symbol,
        &config.tracker,
        config.tick,
        source,
        store,
        Arc::clone(&stats),
    );
    let inline_every = config
        .tracker
        .maintenance_every
        .filter(|_| config.tracker.enable_partition_mgmt);
    if let Some(every) = inline_every {
        tracker = tracker.with_maintenance(
            partitions,
            every,
            config.tracker.retention_days,
            config.tracker.precreate_days,
        );
    }

    tracker.init().await.context("MT5 source initialization failed")?;
    tracker.run(shutdown_signal()).await;

    let snap = stats.snapshot();
    info!(
        cycles = snap.cycles,
        accepted = snap.accepted,
        flushed = snap.flushed_rows,
        "👋 tick-tracker exited"
    );
    Ok(())
}

/// Resolves on ctrl-c, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
