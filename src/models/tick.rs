//! # models::tick
//!
//! [`RawTick`] is the fixed-shape record the source adapter hands over (the
//! MQL5 `MqlTick` layout, times in the broker's server clock). [`Tick`] is the
//! canonical, UTC-stamped row that gets persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::TickConfig;

/// Prices are stored as `NUMERIC(12,3)`: under 1e9 once rounded to 3 places.
const NUMERIC_SCALED_LIMIT: f64 = 1e12;

/// One quote exactly as the terminal reports it.
///
/// `time` / `time_msc` are server-clock epochs, not UTC.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RawTick {
    /// Server time, seconds.
    #[serde(default)]
    pub time: i64,
    #[serde(default)]
    pub bid: f64,
    #[serde(default)]
    pub ask: f64,
    #[serde(default)]
    pub last: f64,
    #[serde(default)]
    pub volume: u64,
    /// Server time, milliseconds.
    #[serde(default)]
    pub time_msc: i64,
    #[serde(default)]
    pub flags: u32,
    #[serde(default)]
    pub volume_real: f64,
}

impl RawTick {
    /// `volume_real` when the feed provides it, integer `volume` otherwise.
    pub fn effective_volume(&self) -> i64 {
        if self.volume_real > 0.0 {
            self.volume_real as i64
        } else {
            self.volume as i64
        }
    }
}

/// A normalized quote. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tick {
    pub symbol:       String,
    pub bid:          f64,
    pub ask:          f64,
    pub last:         f64,
    pub volume:       i64,
    pub flags:        i32,
    /// UTC milliseconds since epoch.
    pub time_msc:     i64,
    /// `time_msc` as a timestamp; the partition key.
    pub time_utc:     DateTime<Utc>,
    /// `ask - bid` rounded to `spread_round` places; `None` on a one-sided quote.
    pub spread_value: Option<f64>,
    /// `spread_value / point`, rounded.
    pub spread_pts:   Option<i32>,
}

impl Tick {
    /// Returns `None` when `time_msc` is negative or outside the timestamp
    /// range, or when a price does not fit the price column.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol:   &str,
        bid:      f64,
        ask:      f64,
        last:     f64,
        volume:   i64,
        flags:    u32,
        time_msc: i64,
        cfg:      &TickConfig,
    ) -> Option<Self> {
        if time_msc < 0 || ![bid, ask, last].into_iter().all(fits_price_column) {
            return None;
        }
        let time_utc = DateTime::<Utc>::from_timestamp_millis(time_msc)?;
        let (spread_value, spread_pts) = derive_spread(bid, ask, cfg);

        Some(Self {
            symbol: symbol.to_string(),
            bid,
            ask,
            last,
            volume,
            flags: flags as i32,
            time_msc,
            time_utc,
            spread_value,
            spread_pts,
        })
    }

    /// Natural dedup key, mirrored by `uq_tick_global`.
    pub fn key(&self) -> (&str, i64, DateTime<Utc>) {
        (&self.symbol, self.time_msc, self.time_utc)
    }
}

/// Spread in price and in points. Both `None` unless bid and ask are non-zero.
pub fn derive_spread(bid: f64, ask: f64, cfg: &TickConfig) -> (Option<f64>, Option<i32>) {
    if bid == 0.0 || ask == 0.0 || !bid.is_finite() || !ask.is_finite() {
        return (None, None);
    }
    let value = round_to(ask - bid, cfg.spread_round);
    let pts = (value / cfg.point).round() as i32;
    (Some(value), Some(pts))
}

/// Non-finite prices are stored as NULL and always fit.
fn fits_price_column(price: f64) -> bool {
    !price.is_finite() || (price * 1000.0).round().abs() < NUMERIC_SCALED_LIMIT
}

fn round_to(value: f64, places: u32) -> f64 {
    let scale = 10f64.powi(places as i32);
    (value * scale).round() / scale
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_config() -> TickConfig {
        TickConfig { point: 0.01, spread_round: 5 }
    }

    #[test]
    fn test_spread_from_two_sided_quote() {
        let (value, pts) = derive_spread(1900.00, 1900.23, &make_config());
        assert_eq!(value, Some(0.23));
        assert_eq!(pts, Some(23));
    }

    #[test]
    fn test_spread_absent_on_one_sided_quote() {
        assert_eq!(derive_spread(0.0, 1900.23, &make_config()), (None, None));
        assert_eq!(derive_spread(1900.00, 0.0, &make_config()), (None, None));
    }

    #[test]
    fn test_negative_time_is_rejected() {
        assert!(Tick::new("XAUUSD", 1.0, 1.1, 0.0, 0, 0, -1, &make_config()).is_none());
    }

    #[test]
    fn test_price_overflowing_column_is_rejected() {
        let cfg = make_config();
        assert!(Tick::new("XAUUSD", 1e9, 1e9 + 1.0, 0.0, 0, 0, 1_000, &cfg).is_none());
        assert!(Tick::new("XAUUSD", 1.0, 1.1, -999_999_999.9996, 0, 0, 1_000, &cfg).is_none());
        assert!(Tick::new("XAUUSD", 999_999_999.999, 999_999_999.999, 0.0, 0, 0, 1_000, &cfg).is_some());
        assert!(Tick::new("XAUUSD", 1.0, 1.1, f64::NAN, 0, 0, 1_000, &cfg).is_some());
    }

    #[test]
    fn test_time_utc_matches_millis() {
        let tick = Tick::new("XAUUSD", 1900.0, 1900.2, 0.0, 3, 6, 1_700_000_000_123, &make_config())
            .unwrap();
        assert_eq!(tick.time_utc.timestamp_millis(), 1_700_000_000_123);
        assert_eq!(tick.flags, 6);
        assert_eq!(tick.spread_pts, Some(20));
    }

    #[test]
    fn test_effective_volume_prefers_real() {
        let raw = RawTick { volume: 4, volume_real: 7.9, ..Default::default() };
        assert_eq!(raw.effective_volume(), 7);
        let raw = RawTick { volume: 4, volume_real: 0.0, ..Default::default() };
        assert_eq!(raw.effective_volume(), 4);
    }
}
