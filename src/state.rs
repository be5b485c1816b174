//! # state
//!
//! Counters the ingestion loop publishes and the status endpoint reads.
//!
//! The loop is the only writer. Every field is an independent atomic, so a
//! [`TrackerStats::snapshot`] is not a consistent cut across fields; that is
//! fine for a health view.

use std::sync::atomic::{AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// Marks "no value yet" in the signed atomics.
const UNSET: i64 = i64::MIN;

// ─── Loop State ───────────────────────────────────────────────────────────────

/// `Init → Polling ⇄ Flushing → ShuttingDown → Stopped`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackerState {
    Init,
    Polling,
    Flushing,
    ShuttingDown,
    Stopped,
}

impl TrackerState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => TrackerState::Polling,
            2 => TrackerState::Flushing,
            3 => TrackerState::ShuttingDown,
            4 => TrackerState::Stopped,
            _ => TrackerState::Init,
        }
    }
}

// ─── Stats ────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct TrackerStats {
    symbol:         String,
    state:          AtomicU8,
    cycles:         AtomicU64,
    fetched:        AtomicU64,
    accepted:       AtomicU64,
    flushed_rows:   AtomicU64,
    flush_failures: AtomicU64,
    buffered:       AtomicU64,
    watermark:      AtomicI64,
    offset_ms:      AtomicI64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub symbol:          String,
    pub state:           TrackerState,
    pub cycles:          u64,
    pub fetched:         u64,
    pub accepted:        u64,
    pub flushed_rows:    u64,
    pub flush_failures:  u64,
    pub buffered:        u64,
    pub watermark_msc:   Option<i64>,
    pub clock_offset_ms: Option<i64>,
}

pub type SharedStats = Arc<TrackerStats>;

impl TrackerStats {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol:         symbol.into(),
            state:          AtomicU8::new(TrackerState::Init as u8),
            cycles:         AtomicU64::new(0),
            fetched:        AtomicU64::new(0),
            accepted:       AtomicU64::new(0),
            flushed_rows:   AtomicU64::new(0),
            flush_failures: AtomicU64::new(0),
            buffered:       AtomicU64::new(0),
            watermark:      AtomicI64::new(UNSET),
            offset_ms:      AtomicI64::new(UNSET),
        }
    }

    pub fn shared(symbol: impl Into<String>) -> SharedStats {
        Arc::new(Self::new(symbol))
    }

    pub fn set_state(&self, state: TrackerState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    pub fn state(&self) -> TrackerState {
        TrackerState::from_u8(self.state.load(Ordering::Relaxed))
    }

    pub fn record_cycle(&self, fetched: usize, accepted: usize) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        self.fetched.fetch_add(fetched as u64, Ordering::Relaxed);
        self.accepted.fetch_add(accepted as u64, Ordering::Relaxed);
    }

    pub fn record_flush(&self, inserted: u64) {
        self.flushed_rows.fetch_add(inserted, Ordering::Relaxed);
    }

    pub fn record_flush_failure(&self) {
        self.flush_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_buffered(&self, rows: usize) {
        self.buffered.store(rows as u64, Ordering::Relaxed);
    }

    pub fn set_watermark(&self, watermark: Option<i64>) {
        self.watermark.store(watermark.unwrap_or(UNSET), Ordering::Relaxed);
    }

    pub fn set_offset_ms(&self, offset_ms: Option<i64>) {
        self.offset_ms.store(offset_ms.unwrap_or(UNSET), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let signed = |a: &AtomicI64| Some(a.load(Ordering::Relaxed)).filter(|v| *v != UNSET);
        StatsSnapshot {
            symbol:          self.symbol.clone(),
            state:           self.state(),
            cycles:          self.cycles.load(Ordering::Relaxed),
            fetched:         self.fetched.load(Ordering::Relaxed),
            accepted:        self.accepted.load(Ordering::Relaxed),
            flushed_rows:    self.flushed_rows.load(Ordering::Relaxed),
            flush_failures:  self.flush_failures.load(Ordering::Relaxed),
            buffered:        self.buffered.load(Ordering::Relaxed),
            watermark_msc:   signed(&self.watermark),
            clock_offset_ms: signed(&self.offset_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_snapshot_has_no_watermark() {
        let snap = TrackerStats::new("XAUUSD").snapshot();
        assert_eq!(snap.state, TrackerState::Init);
        assert_eq!(snap.watermark_msc, None);
        assert_eq!(snap.clock_offset_ms, None);
    }

    #[test]
    fn test_counters_accumulate() {
        let stats = TrackerStats::new("XAUUSD");
        stats.record_cycle(10, 7);
        stats.record_cycle(5, 0);
        stats.record_flush(7);
        stats.set_watermark(Some(-1_850));
        stats.set_offset_ms(Some(-7_200_000));
        stats.set_state(TrackerState::Polling);

        let snap = stats.snapshot();
        assert_eq!((snap.cycles, snap.fetched, snap.accepted), (2, 15, 7));
        assert_eq!(snap.flushed_rows, 7);
        assert_eq!(snap.watermark_msc, Some(-1_850));
        assert_eq!(snap.clock_offset_ms, Some(-7_200_000));
        assert_eq!(snap.state, TrackerState::Polling);
    }

    #[test]
    fn test_state_serializes_upper_snake() {
        let json = serde_json::to_string(&TrackerState::ShuttingDown).unwrap();
        assert_eq!(json, "\"SHUTTING_DOWN\"");
    }
}
