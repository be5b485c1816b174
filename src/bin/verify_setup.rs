//! Operator check: is the schema in place, and does the tick source answer?
//!
//! ```text
//! cargo run --bin verify_setup
//! ```

use std::process;

use anyhow::Context;
use chrono::Utc;

use tick_tracker::config::Config;
use tick_tracker::db::{self, inspect, TableRef};
use tick_tracker::engine::clock::{format_offset, measure_offset};
use tick_tracker::source;

fn present(ok: bool) -> &'static str {
    if ok {
        "ok"
    } else {
        "missing"
    }
}

fn list_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}

async fn db_verify(config: &Config) -> anyhow::Result<()> {
    println!("== DB VERIFY ==");
    let pool = db::connect(&config.store).await?;
    let table = TableRef::from_config(&config.store)?;
    let report = inspect::schema_report(&pool, &table).await?;

    println!("parent_table:              {}", present(report.parent_table));
    println!("default_partition:         {}", present(report.default_partition));
    println!("constraint_uq_tick_global: {}", present(report.global_unique));
    println!("function_manage_partitions:{}", present(report.routine));
    println!("partitions_top10:          {}", list_or_none(&report.partitions));
    println!("default_indexes:           {}", list_or_none(&report.default_indexes));
    if let Some(rows) = report.rows_default {
        println!("rows_default:              {rows}");
    }
    if let Some(rows) = report.rows_total {
        println!("rows_total_parent:         {rows}");
    }
    if report.latest.is_empty() {
        println!("latest_rows:               none");
    } else {
        println!("latest_rows:");
        for row in &report.latest {
            println!(
                "  {} {} bid={:?} ask={:?} spread_pts={:?}",
                row.symbol, row.time_utc, row.bid, row.ask, row.spread_pts
            );
        }
    }
    println!("schema_ready:              {}", report.is_ready());

    pool.close().await;
    Ok(())
}

async fn source_verify(config: &Config) -> anyhow::Result<()> {
    println!("== MT5 VERIFY ==");
    let symbol = &config.source.symbol;
    let mut src = source::from_config(&config.source)?;
    src.initialize().await.context("mt5_init_error")?;

    if let Err(e) = src.select_symbol(symbol).await {
        println!("symbol_select_failed: {symbol} ({e})");
        src.shutdown().await;
        return Ok(());
    }

    match src.current_tick(symbol).await? {
        Some(t) => {
            println!("tick: bid={} ask={} time_msc={}", t.bid, t.ask, t.time_msc);
            println!("server_offset: {}", format_offset(measure_offset(t.time, Utc::now())));

            let lookback_ms = config.tracker.lookback.as_millis() as i64;
            let ticks = src
                .fetch_since(symbol, t.time_msc - lookback_ms, 1000)
                .await?
                .unwrap_or_default();
            println!("ticks_{}ms_count: {}", lookback_ms, ticks.len());
        }
        None => println!("tick: none"),
    }

    src.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("verify_setup failed: {err:#}");
            process::exit(1);
        }
    };

    if let Err(err) = db_verify(&config).await {
        println!("DB_VERIFY_ERROR: {err:#}");
    }
    if let Err(err) = source_verify(&config).await {
        println!("MT5_VERIFY_ERROR: {err:#}");
    }
}
