//! # engine::normalizer
//!
//! Turns [`RawTick`] records (server clock) into UTC [`Tick`] rows.
//! Records whose adjusted timestamp would be negative are dropped; that only
//! happens with an inconsistent record or a bogus offset. So are records with
//! a price too large for the price column.

use tracing::debug;

use crate::config::TickConfig;
use crate::engine::clock::to_utc_millis;
use crate::models::{RawTick, Tick};

#[derive(Debug, Clone)]
pub struct TickNormalizer {
    symbol: String,
    config: TickConfig,
}

impl TickNormalizer {
    pub fn new(symbol: impl Into<String>, config: TickConfig) -> Self {
        Self { symbol: symbol.into(), config }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// `offset_ms` is `server - utc`; see [`crate::engine::clock`].
    pub fn normalize(&self, raw: &RawTick, offset_ms: i64) -> Option<Tick> {
        let utc_ms = to_utc_millis(raw.time_msc, chrono::Duration::milliseconds(offset_ms));
        Tick::new(
            &self.symbol,
            raw.bid,
            raw.ask,
            raw.last,
            raw.effective_volume(),
            raw.flags,
            utc_ms,
            &self.config,
        )
    }

    /// Normalize a fetched batch, keeping source order. Discards are counted
    /// in the debug log only.
    pub fn normalize_all(&self, raws: &[RawTick], offset_ms: i64) -> Vec<Tick> {
        let ticks: Vec<Tick> = raws
            .iter()
            .filter_map(|raw| self.normalize(raw, offset_ms))
            .collect();

        let discarded = raws.len() - ticks.len();
        if discarded > 0 {
            debug!(symbol = %self.symbol, discarded, "Dropped raw ticks with negative UTC time or unstorable price");
        }
        ticks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_normalizer() -> TickNormalizer {
        TickNormalizer::new("XAUUSD", TickConfig { point: 0.01, spread_round: 5 })
    }

    fn make_raw(time_msc: i64) -> RawTick {
        RawTick {
            time: time_msc / 1000,
            bid: 1900.00,
            ask: 1900.23,
            last: 0.0,
            volume: 1,
            time_msc,
            flags: 6,
            volume_real: 0.0,
        }
    }

    #[test]
    fn test_subtracts_offset() {
        // broker two hours ahead of UTC
        let tick = make_normalizer()
            .normalize(&make_raw(1_700_007_200_500), 7_200_000)
            .unwrap();
        assert_eq!(tick.time_msc, 1_700_000_000_500);
        assert_eq!(tick.symbol, "XAUUSD");
        assert_eq!(tick.spread_value, Some(0.23));
        assert_eq!(tick.spread_pts, Some(23));
    }

    #[test]
    fn test_negative_adjusted_time_discarded() {
        let normalizer = make_normalizer();
        assert!(normalizer.normalize(&make_raw(100), 2_000).is_none());
        assert!(normalizer.normalize(&make_raw(2_000), 2_000).is_some());
    }

    #[test]
    fn test_normalize_all_keeps_source_order() {
        let raws = [make_raw(10_100), make_raw(500), make_raw(10_050)];
        let ticks = make_normalizer().normalize_all(&raws, 1_000);
        let times: Vec<i64> = ticks.iter().map(|t| t.time_msc).collect();
        assert_eq!(times, vec![9_100, 9_050]);
    }
}
