//! # engine::clock
//!
//! **Clock Reconciler**: tracks `server_time - utc_now` for the broker.
//!
//! MT5 stamps ticks in the broker's server clock (often UTC+2/+3), so every
//! query boundary going out and every tick timestamp coming back must be
//! shifted by the measured offset.
//!
//! ```text
//! source_ms = utc_ms + offset_ms
//! utc_ms    = source_ms - offset_ms
//! ```

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::models::RawTick;

#[derive(Debug, Clone)]
pub struct ClockReconciler {
    offset:          Option<Duration>,
    drift_threshold: Duration,
    /// Server millis of the newest current tick measured against.
    last_reading:    Option<i64>,
}

impl ClockReconciler {
    pub fn new(drift_threshold: std::time::Duration) -> Self {
        Self {
            offset:          None,
            drift_threshold: Duration::from_std(drift_threshold)
                .unwrap_or_else(|_| Duration::seconds(1)),
            last_reading:    None,
        }
    }

    /// Cached offset; `None` until the first server tick was observed.
    pub fn current_offset(&self) -> Option<Duration> {
        self.offset
    }

    pub fn current_offset_ms(&self) -> Option<i64> {
        self.offset.map(|o| o.num_milliseconds())
    }

    /// Measure against the terminal's current tick, but only when it is newer
    /// than the last one measured. A repeated tick means the market is quiet:
    /// its time is the last quote's, not the server's now, and would read as
    /// a shrinking offset.
    ///
    /// Returns the measurement when one was taken.
    pub fn observe(&mut self, tick: &RawTick, utc_now: DateTime<Utc>) -> Option<Duration> {
        let reading = if tick.time_msc > 0 { tick.time_msc } else { tick.time * 1000 };
        if let Some(last) = self.last_reading {
            if reading <= last {
                debug!(reading, last, "Current tick unchanged, offset kept");
                return None;
            }
        }
        self.last_reading = Some(reading);
        Some(self.refresh(tick.time, utc_now))
    }

    /// Measure `server - utc` from a server epoch (seconds) and replace the
    /// cache when it is unset or the drift reaches the threshold.
    ///
    /// Returns the fresh measurement, whether or not it was adopted.
    pub fn refresh(&mut self, server_epoch: i64, utc_now: DateTime<Utc>) -> Duration {
        let measured = measure_offset(server_epoch, utc_now);

        match self.offset {
            None => {
                info!(offset = %format_offset(measured), "🕒 Broker clock offset measured");
                self.offset = Some(measured);
            }
            Some(cached) => {
                let drift = measured - cached;
                if drift.num_milliseconds().abs() >= self.drift_threshold.num_milliseconds() {
                    info!(
                        old = %format_offset(cached),
                        new = %format_offset(measured),
                        drift_ms = drift.num_milliseconds(),
                        "🕒 Broker clock offset drifted, replacing"
                    );
                    self.offset = Some(measured);
                }
            }
        }
        measured
    }
}

/// `server_epoch` (seconds) read as an instant, minus `utc_now`.
pub fn measure_offset(server_epoch: i64, utc_now: DateTime<Utc>) -> Duration {
    Duration::seconds(server_epoch) - Duration::milliseconds(utc_now.timestamp_millis())
}

pub fn to_source_time(utc: DateTime<Utc>, offset: Duration) -> DateTime<Utc> {
    utc + offset
}

pub fn to_source_millis(utc_ms: i64, offset: Duration) -> i64 {
    utc_ms + offset.num_milliseconds()
}

pub fn to_utc_millis(source_ms: i64, offset: Duration) -> i64 {
    source_ms - offset.num_milliseconds()
}

/// `±HH:MM:SS`, truncated to whole seconds.
pub fn format_offset(offset: Duration) -> String {
    let total = offset.num_seconds();
    let sign = if total >= 0 { '+' } else { '-' };
    let total = total.abs();
    format!(
        "{sign}{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}
