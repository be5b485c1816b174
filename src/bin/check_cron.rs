//! Print the pg_cron job that runs partition maintenance.
//!
//! ```text
//! cargo run --bin check_cron [JOB_NAME]
//! ```

use std::process;

use clap::Parser;

use tick_tracker::config::Config;
use tick_tracker::db::{self, inspect, TableRef};

#[derive(Debug, Parser)]
#[command(name = "check_cron", about = "Show the partition maintenance pg_cron job")]
struct Cli {
    /// Defaults to `<schema>.<table>_manage_partitions`.
    job_name: Option<String>,
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::from_env()?;
    if !config.tracker.enable_pg_cron {
        println!("warning: ENABLE_PG_CRON is false, the job may never have been created");
    }

    let table = TableRef::from_config(&config.store)?;
    let job_name = cli.job_name.unwrap_or_else(|| table.cron_job_name());

    let pool = db::connect(&config.store).await?;
    let status = inspect::cron_job_status(&pool, &job_name).await;
    pool.close().await;

    println!("jobname:  {job_name}");
    match status? {
        Some(job) => {
            println!("jobid:    {}", job.jobid);
            println!("schedule: {}", job.schedule);
            println!("command:  {}", job.command);
            println!("database: {}", job.database);
            println!("active:   {}", job.active);
        }
        None => println!("status:   missing"),
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    println!("== PG_CRON STATUS ==");
    if let Err(err) = run(Cli::parse()).await {
        eprintln!("check_cron failed: {err:#}");
        process::exit(1);
    }
}
