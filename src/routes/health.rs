//! # routes::health
//!
//! | Method | Path                  | Description                         |
//! |--------|-----------------------|-------------------------------------|
//! | GET    | `/api/tracker/health` | Loop state and ingestion counters   |

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::state::{SharedStats, TrackerState};

// ─── GET /api/tracker/health ──────────────────────────────────────────────────

/// `ok` is false once the loop has left the polling states.
pub async fn health_check(State(stats): State<SharedStats>) -> Json<Value> {
    let snap = stats.snapshot();
    let ok = matches!(snap.state, TrackerState::Polling | TrackerState::Flushing);

    Json(json!({
        "ok":              ok,
        "symbol":          snap.symbol,
        "state":           snap.state,
        "cycles":          snap.cycles,
        "fetched":         snap.fetched,
        "accepted":        snap.accepted,
        "flushed_rows":    snap.flushed_rows,
        "flush_failures":  snap.flush_failures,
        "buffered":        snap.buffered,
        "watermark_msc":   snap.watermark_msc,
        "clock_offset_ms": snap.clock_offset_ms,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::TrackerStats;

    #[tokio::test]
    async fn test_health_reports_counters() {
        let stats = TrackerStats::shared("XAUUSD");
        stats.set_state(TrackerState::Polling);
        stats.record_cycle(4, 3);
        stats.set_watermark(Some(1_700_000_000_500));

        let Json(body) = health_check(State(stats)).await;
        assert_eq!(body["ok"], true);
        assert_eq!(body["state"], "POLLING");
        assert_eq!(body["accepted"], 3);
        assert_eq!(body["watermark_msc"], 1_700_000_000_500i64);
        assert!(body["clock_offset_ms"].is_null());
    }

    #[tokio::test]
    async fn test_stopped_tracker_is_not_ok() {
        let stats = TrackerStats::shared("XAUUSD");
        stats.set_state(TrackerState::Stopped);
        let Json(body) = health_check(State(stats)).await;
        assert_eq!(body["ok"], false);
    }
}
