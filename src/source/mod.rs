//! # source: where raw ticks come from
//!
//! [`TickSource`] is the only seam between the tracker and an MT5 terminal.
//! Everything behind it speaks server-clock time; the tracker translates.
//!
//! - [`bridge`]: HTTP/JSON bridge in front of a running terminal
//! - [`mock`]: synthetic, deterministic stream for development

use async_trait::async_trait;
use tracing::warn;

use crate::config::{SourceConfig, MOCK_SOURCE};
use crate::error::TrackerError;
use crate::models::RawTick;

pub mod bridge;
pub mod mock;

pub use bridge::Mt5BridgeSource;
pub use mock::MockSource;

#[async_trait]
pub trait TickSource: Send + Sync {
    /// Open the terminal session. Failure is fatal at startup.
    async fn initialize(&mut self) -> Result<(), TrackerError>;

    /// Make `symbol` visible in Market Watch.
    async fn select_symbol(&mut self, symbol: &str) -> Result<(), TrackerError>;

    /// Latest quote, used to measure the server clock. `Ok(None)` when the
    /// terminal has no tick for the symbol yet.
    async fn current_tick(&self, symbol: &str) -> Result<Option<RawTick>, TrackerError>;

    /// Ticks with `time_msc >= source_start_ms` (server clock), oldest first
    /// as far as the terminal guarantees, at most `max_count`.
    async fn fetch_since(
        &self,
        symbol:          &str,
        source_start_ms: i64,
        max_count:       usize,
    ) -> Result<Option<Vec<RawTick>>, TrackerError>;

    async fn shutdown(&mut self);
}

/// Pick the adapter named by `MT5_BASE_URL`.
pub fn from_config(cfg: &SourceConfig) -> Result<Box<dyn TickSource>, TrackerError> {
    if cfg.base_url.eq_ignore_ascii_case(MOCK_SOURCE) {
        warn!("MT5_BASE_URL=mock, using MOCK tick source");
        return Ok(Box::new(MockSource::new()));
    }
    Ok(Box::new(Mt5BridgeSource::new(cfg)?))
}
