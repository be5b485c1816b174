//! # engine::tracker
//!
//! The **Ingestion Loop**: one task, one symbol.
//!
//! ```text
//!  each poll:
//!    current_tick ─▶ ClockReconciler ─▶ offset
//!    fetch_since(source cursor) ─▶ TickNormalizer ─▶ Watermark::admit
//!    ─▶ BatchWriter (flush at batch_size / FLUSH_SEC) ─▶ TickStore
//!    ─▶ inline partition maintenance when due
//! ```
//!
//! The fetch window is kept on the source clock: the cursor is the server
//! time of the newest accepted tick, so a changed offset re-stamps later
//! ticks but never moves the window past unread ones.
//!
//! Cycles never overlap: the only await point that a shutdown signal can
//! abandon is the wait for the next interval tick.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::{TickConfig, TrackerConfig};
use crate::db::{InsertOutcome, MaintenanceOutcome, PartitionMaintainer, TickStore};
use crate::engine::batch::BatchWriter;
use crate::engine::clock::{to_source_millis, ClockReconciler};
use crate::engine::normalizer::TickNormalizer;
use crate::error::TrackerError;
use crate::models::{RawTick, Tick};
use crate::source::TickSource;
use crate::state::{SharedStats, TrackerState};

// ─── Watermark ────────────────────────────────────────────────────────────────

/// UTC millisecond of the newest accepted tick. Never moves backwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Watermark(Option<i64>);

impl Watermark {
    pub fn new() -> Self {
        Self(None)
    }

    pub fn value(&self) -> Option<i64> {
        self.0
    }

    /// Sort by `time_msc` (stable, so same-millisecond ticks keep source
    /// order), drop everything at or below the watermark, then advance it to
    /// the newest survivor.
    pub fn admit(&mut self, mut ticks: Vec<Tick>) -> Vec<Tick> {
        ticks.sort_by_key(|t| t.time_msc);
        if let Some(mark) = self.0 {
            ticks.retain(|t| t.time_msc > mark);
        }
        if let Some(newest) = ticks.last() {
            self.0 = Some(newest.time_msc);
        }
        ticks
    }
}

// ─── Cycle Report ─────────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Raw records returned by the source.
    pub fetched:     usize,
    /// Ticks appended to the buffer after normalization and the watermark.
    pub accepted:    usize,
    pub flushed:     Option<InsertOutcome>,
    pub maintenance: Option<MaintenanceOutcome>,
    /// The fetch was skipped because no clock offset is known.
    pub skipped:     bool,
}

// ─── Tracker ──────────────────────────────────────────────────────────────────

struct InlineMaintenance {
    maintainer:     Arc<dyn PartitionMaintainer>,
    every:          Duration,
    retention_days: u32,
    precreate_days: u32,
    last_run:       Instant,
}

pub struct Tracker {
    source:      Box<dyn TickSource>,
    store:       Arc<dyn TickStore>,
    clock:       ClockReconciler,
    normalizer:  TickNormalizer,
    watermark:   Watermark,
    /// Source-clock millis of the newest accepted tick.
    cursor:      Option<i64>,
    writer:      BatchWriter,
    maintenance: Option<InlineMaintenance>,
    poll:        Duration,
    lookback:    Duration,
    max_fetch:   usize,
    stats:       SharedStats,
    state:       TrackerState,
    utc_now:     fn() -> DateTime<Utc>,
}

impl Tracker {
    pub fn new(
        symbol: &str,
        cfg:    &TrackerConfig,
        tick:   TickConfig,
        source: Box<dyn TickSource>,
        store:  Arc<dyn TickStore>,
        stats:  SharedStats,
    ) -> Self {
        Self {
            source,
            store,
            clock:       ClockReconciler::new(cfg.drift_threshold),
            normalizer:  TickNormalizer::new(symbol, tick),
            watermark:   Watermark::new(),
            cursor:      None,
            writer:      BatchWriter::new(cfg.batch_size, cfg.flush_after),
            maintenance: None,
            poll:        cfg.poll,
            lookback:    cfg.lookback,
            max_fetch:   cfg.max_fetch,
            stats,
            state:       TrackerState::Init,
            utc_now:     Utc::now,
        }
    }

    /// Re-run partition maintenance from the loop every `every`. The first
    /// inline run is one interval from now; startup maintenance is done by
    /// the bootstrap.
    pub fn with_maintenance(
        mut self,
        maintainer:     Arc<dyn PartitionMaintainer>,
        every:          Duration,
        retention_days: u32,
        precreate_days: u32,
    ) -> Self {
        self.maintenance = Some(InlineMaintenance {
            maintainer,
            every,
            retention_days,
            precreate_days,
            last_run: Instant::now(),
        });
        self
    }

    /// Replace the wall clock used for offset measurement and the lookback.
    pub fn with_utc_clock(mut self, utc_now: fn() -> DateTime<Utc>) -> Self {
        self.utc_now = utc_now;
        self
    }

    pub fn symbol(&self) -> &str {
        self.normalizer.symbol()
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    pub fn watermark(&self) -> Option<i64> {
        self.watermark.value()
    }

    /// Server-clock lower bound of the next fetch once a tick was accepted.
    pub fn source_cursor(&self) -> Option<i64> {
        self.cursor
    }

    pub fn buffered(&self) -> &[Tick] {
        self.writer.buffered()
    }

    pub fn clock(&self) -> &ClockReconciler {
        &self.clock
    }

    fn set_state(&mut self, state: TrackerState) {
        self.state = state;
        self.stats.set_state(state);
    }

    // ── INIT ─────────────────────────────────────────────────────────────────

    /// Open the source session and select the symbol. Either failing is fatal.
    pub async fn init(&mut self) -> Result<(), TrackerError> {
        let symbol = self.symbol().to_string();
        self.source.initialize().await?;
        self.source.select_symbol(&symbol).await?;

        // A first offset is nice to have, not required: the first poll retries.
        self.sync_clock().await;

        info!(symbol = %symbol, "✅ [TRACKER] started");
        self.set_state(TrackerState::Polling);
        Ok(())
    }

    // ── POLLING ──────────────────────────────────────────────────────────────

    /// One fetch → normalize → admit → buffer → (flush) → (maintenance) cycle.
    pub async fn poll_once(&mut self, now: Instant) -> CycleReport {
        let mut report = CycleReport::default();

        match self.sync_clock().await {
            Some(offset) => {
                let offset_ms = offset.num_milliseconds();
                let mut raws = self.fetch(offset).await;
                report.fetched = raws.len();

                if let Some(cursor) = self.cursor {
                    raws.retain(|r| r.time_msc > cursor);
                }
                let ticks = self.normalizer.normalize_all(&raws, offset_ms);
                let admitted = self.watermark.admit(ticks);
                if let Some(newest) = admitted.last() {
                    self.cursor = Some(to_source_millis(newest.time_msc, offset));
                }

                report.accepted = admitted.len();
                if !admitted.is_empty() {
                    debug!(
                        fetched = report.fetched,
                        accepted = report.accepted,
                        watermark = ?self.watermark.value(),
                        "[TRACKER] ticks accepted"
                    );
                }
                self.writer.push_all(admitted, now);
            }
            None => {
                let err = TrackerError::ClockDriftUnresolvable { symbol: self.symbol().to_string() };
                warn!(error = %err, "[TRACKER] fetch skipped this cycle");
                report.skipped = true;
            }
        }

        if self.writer.should_flush(now) {
            report.flushed = self.flush().await;
        }

        report.maintenance = self.maintain_if_due(now).await;

        self.stats.record_cycle(report.fetched, report.accepted);
        self.stats.set_buffered(self.writer.len());
        self.stats.set_watermark(self.watermark.value());
        report
    }

    /// Poll on a fixed interval until `shutdown` resolves, then shut down.
    pub async fn run<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("[TRACKER] stop signal received");
                    break;
                }
                _ = ticker.tick() => {}
            }
            self.poll_once(Instant::now()).await;
        }

        self.shutdown().await;
    }

    // ── SHUTTING_DOWN ────────────────────────────────────────────────────────

    /// Final flush regardless of size, then store, then source.
    pub async fn shutdown(&mut self) {
        self.set_state(TrackerState::ShuttingDown);

        if !self.writer.is_empty() {
            let pending = self.writer.len();
            match self.writer.flush(self.store.as_ref()).await {
                Ok(outcome) => {
                    self.stats.record_flush(outcome.inserted);
                    info!(given = outcome.given, inserted = outcome.inserted, "[TRACKER] final flush done");
                }
                Err(e) => {
                    self.stats.record_flush_failure();
                    error!(lost = pending, error = %e, "[TRACKER] final flush failed, buffered ticks lost");
                }
            }
        }
        self.stats.set_buffered(self.writer.len());

        self.store.close().await;
        self.source.shutdown().await;

        self.set_state(TrackerState::Stopped);
        info!(symbol = %self.symbol(), "[TRACKER] stopped");
    }

    // ── Steps ────────────────────────────────────────────────────────────────

    /// Refresh the offset from the current server tick; fall back to the
    /// cached value when the tick cannot be read or has not changed.
    async fn sync_clock(&mut self) -> Option<chrono::Duration> {
        let symbol = self.symbol().to_string();
        match self.source.current_tick(&symbol).await {
            Ok(Some(tick)) => {
                self.clock.observe(&tick, (self.utc_now)());
            }
            Ok(None) => debug!(symbol = %symbol, "[TRACKER] no current tick"),
            Err(e) => warn!(error = %e, "[TRACKER] current tick read failed"),
        }
        self.stats.set_offset_ms(self.clock.current_offset_ms());
        self.clock.current_offset()
    }

    async fn fetch(&self, offset: chrono::Duration) -> Vec<RawTick> {
        let source_start = match self.cursor {
            Some(cursor) => cursor,
            None => {
                let lookback = chrono::Duration::from_std(self.lookback).unwrap_or(chrono::Duration::zero());
                to_source_millis(((self.utc_now)() - lookback).timestamp_millis(), offset)
            }
        };

        match self.source.fetch_since(self.symbol(), source_start, self.max_fetch).await {
            Ok(Some(raws)) => raws,
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "[TRACKER] tick fetch failed, no data this cycle");
                Vec::new()
            }
        }
    }

    async fn flush(&mut self) -> Option<InsertOutcome> {
        self.set_state(TrackerState::Flushing);
        let result = self.writer.flush(self.store.as_ref()).await;
        self.set_state(TrackerState::Polling);

        match result {
            Ok(outcome) => {
                self.stats.record_flush(outcome.inserted);
                Some(outcome)
            }
            Err(_) => {
                self.stats.record_flush_failure();
                None
            }
        }
    }

    async fn maintain_if_due(&mut self, now: Instant) -> Option<MaintenanceOutcome> {
        let job = self.maintenance.as_mut()?;
        if now.saturating_duration_since(job.last_run) < job.every {
            return None;
        }
        job.last_run = now;

        match job
            .maintainer
            .run_maintenance_now(job.retention_days, job.precreate_days)
            .await
        {
            Ok(outcome) => {
                debug!(?outcome, "[TRACKER] inline partition maintenance");
                Some(outcome)
            }
            Err(e) => {
                error!(error = %e, "[TRACKER] inline partition maintenance failed");
                None
            }
        }
    }
}
