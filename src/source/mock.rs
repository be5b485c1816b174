//! # source::mock
//!
//! Synthetic terminal: one tick every [`MockSource::cadence`] on a server
//! clock running a fixed offset ahead of UTC. Ticks are a pure function of
//! their timestamp, so two fetches over the same window return the same data.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::info;

use crate::error::TrackerError;
use crate::models::RawTick;
use crate::source::TickSource;

/// `TICK_FLAG_BID | TICK_FLAG_ASK`
const FLAGS_BID_ASK: u32 = 6;

const BASE_PRICE: f64 = 1900.0;

pub struct MockSource {
    server_offset: Duration,
    cadence_ms:    i64,
    now:           fn() -> DateTime<Utc>,
}

impl Default for MockSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSource {
    /// UTC+2 broker, four ticks per second.
    pub fn new() -> Self {
        Self::with_clock(Duration::hours(2), 250, Utc::now)
    }

    pub fn with_clock(server_offset: Duration, cadence_ms: i64, now: fn() -> DateTime<Utc>) -> Self {
        Self { server_offset, cadence_ms: cadence_ms.max(1), now }
    }

    pub fn cadence(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.cadence_ms as u64)
    }

    fn server_now_ms(&self) -> i64 {
        ((self.now)() + self.server_offset).timestamp_millis()
    }

    fn tick_at(&self, server_ms: i64) -> RawTick {
        let step = server_ms / self.cadence_ms;
        // Triangle wave, ±1.00 around the base price.
        let phase = (step % 400 - 200).abs() - 100;
        let bid = BASE_PRICE + phase as f64 * 0.01;
        let spread_pts = 15 + step % 11;

        RawTick {
            time:        server_ms.div_euclid(1000),
            bid,
            ask:         bid + spread_pts as f64 * 0.01,
            last:        0.0,
            volume:      0,
            time_msc:    server_ms,
            flags:       FLAGS_BID_ASK,
            volume_real: 0.0,
        }
    }
}

#[async_trait]
impl TickSource for MockSource {
    async fn initialize(&mut self) -> Result<(), TrackerError> {
        info!(offset_ms = self.server_offset.num_milliseconds(), "[MOCK] terminal initialized");
        Ok(())
    }

    async fn select_symbol(&mut self, symbol: &str) -> Result<(), TrackerError> {
        info!(symbol, "[MOCK] symbol selected");
        Ok(())
    }

    async fn current_tick(&self, _symbol: &str) -> Result<Option<RawTick>, TrackerError> {
        let now = self.server_now_ms();
        Ok(Some(self.tick_at(now - now.rem_euclid(self.cadence_ms))))
    }

    async fn fetch_since(
        &self,
        _symbol:         &str,
        source_start_ms: i64,
        max_count:       usize,
    ) -> Result<Option<Vec<RawTick>>, TrackerError> {
        let now = self.server_now_ms();
        let first = source_start_ms + (self.cadence_ms - source_start_ms.rem_euclid(self.cadence_ms)) % self.cadence_ms;

        let ticks: Vec<RawTick> = (0..)
            .map(|i| first + i * self.cadence_ms)
            .take_while(|ms| *ms <= now)
            .take(max_count)
            .map(|ms| self.tick_at(ms))
            .collect();

        Ok(Some(ticks))
    }

    async fn shutdown(&mut self) {
        info!("[MOCK] connection closed");
    }
}
