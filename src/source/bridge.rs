//! # source::bridge
//!
//! MT5 terminal behind a small HTTP/JSON bridge (the same `mt5-bridge`
//! process the trading side posts orders to).
//!
//! | call            | route                  |
//! |-----------------|------------------------|
//! | initialize      | `POST /initialize`     |
//! | select_symbol   | `POST /symbol/select`  |
//! | current_tick    | `GET  /symbol/tick`    |
//! | fetch_since     | `GET  /ticks/from`     |
//! | shutdown        | `POST /shutdown`       |

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::SourceConfig;
use crate::error::TrackerError;
use crate::models::RawTick;
use crate::source::TickSource;

/// `COPY_TICKS_ALL`
const COPY_TICKS_ALL: &str = "all";

#[derive(Debug, Serialize)]
struct InitializeRequest<'a> {
    login:    u64,
    password: &'a str,
    server:   &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    path:     &'a str,
}

#[derive(Debug, Serialize)]
struct SelectRequest<'a> {
    symbol: &'a str,
    enable: bool,
}

/// `{ "ok": false, "code": -6, "error": "Terminal: Authorization failed" }`
#[derive(Debug, Deserialize)]
struct BridgeStatus {
    ok:    bool,
    #[serde(default)]
    code:  Option<i64>,
    #[serde(default)]
    error: Option<String>,
}

impl BridgeStatus {
    fn describe(&self) -> String {
        match (&self.code, &self.error) {
            (Some(code), Some(msg)) => format!("({code}) {msg}"),
            (None, Some(msg)) => msg.clone(),
            (Some(code), None) => format!("error code {code}"),
            (None, None) => "unknown error".to_string(),
        }
    }
}

pub struct Mt5BridgeSource {
    client:   reqwest::Client,
    base_url: String,
    login:    u64,
    password: String,
    server:   String,
    path:     String,
}

impl Mt5BridgeSource {
    pub fn new(cfg: &SourceConfig) -> Result<Self, TrackerError> {
        let client = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(|e| TrackerError::SourceUnavailable(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            login:    cfg.login,
            password: cfg.password.clone(),
            server:   cfg.server.clone(),
            path:     cfg.path.clone(),
        })
    }

    fn url(&self, route: &str) -> String {
        format!("{}{route}", self.base_url)
    }

    /// POST a command and require `{ "ok": true }`.
    async fn command<B: Serialize + ?Sized>(&self, route: &str, body: &B) -> Result<(), String> {
        let resp = self
            .client
            .post(self.url(route))
            .json(body)
            .send()
            .await
            .map_err(|e| format!("MT5 bridge unreachable: {e}"))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(format!("MT5 bridge returned {status}: {body}"));
        }

        let reply: BridgeStatus = resp
            .json()
            .await
            .map_err(|e| format!("Failed to parse bridge reply: {e}"))?;
        if reply.ok {
            Ok(())
        } else {
            Err(reply.describe())
        }
    }

    /// GET a JSON payload; 404 and `null` both mean "nothing".
    async fn read<T: serde::de::DeserializeOwned>(
        &self,
        route: &str,
        query: &[(&str, String)],
    ) -> Result<Option<T>, TrackerError> {
        let resp = self
            .client
            .get(self.url(route))
            .query(query)
            .send()
            .await
            .map_err(|e| TrackerError::SourceRead(format!("{route}: {e}")))?;

        match resp.status() {
            StatusCode::NOT_FOUND => return Ok(None),
            status if !status.is_success() => {
                let body = resp.text().await.unwrap_or_default();
                return Err(TrackerError::SourceRead(format!("{route} returned {status}: {body}")));
            }
            _ => {}
        }

        resp.json::<Option<T>>()
            .await
            .map_err(|e| TrackerError::SourceRead(format!("{route}: failed to parse: {e}")))
    }
}

#[async_trait]
impl TickSource for Mt5BridgeSource {
    async fn initialize(&mut self) -> Result<(), TrackerError> {
        let req = InitializeRequest {
            login:    self.login,
            password: &self.password,
            server:   &self.server,
            path:     &self.path,
        };
        self.command("/initialize", &req).await.map_err(|e| {
            error!(error = %e, "[MT5] initialize failed");
            TrackerError::SourceUnavailable(format!("initialize() failed: {e}"))
        })?;
        info!(login = self.login, server = %self.server, "✅ [MT5] terminal initialized");
        Ok(())
    }

    async fn select_symbol(&mut self, symbol: &str) -> Result<(), TrackerError> {
        self.command("/symbol/select", &SelectRequest { symbol, enable: true })
            .await
            .map_err(|e| {
                TrackerError::SourceUnavailable(format!("symbol_select({symbol}) failed: {e}"))
            })?;
        info!(symbol, "[MT5] symbol selected");
        Ok(())
    }

    async fn current_tick(&self, symbol: &str) -> Result<Option<RawTick>, TrackerError> {
        self.read("/symbol/tick", &[("symbol", symbol.to_string())])
            .await
    }

    async fn fetch_since(
        &self,
        symbol:          &str,
        source_start_ms: i64,
        max_count:       usize,
    ) -> Result<Option<Vec<RawTick>>, TrackerError> {
        self.read(
            "/ticks/from",
            &[
                ("symbol", symbol.to_string()),
                ("from_msc", source_start_ms.to_string()),
                ("count", max_count.to_string()),
                ("flags", COPY_TICKS_ALL.to_string()),
            ],
        )
        .await
    }

    async fn shutdown(&mut self) {
        match self.command("/shutdown", &serde_json::json!({})).await {
            Ok(()) => info!("[MT5] connection closed"),
            Err(e) => warn!(error = %e, "[MT5] shutdown request failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn make_config(base_url: &str) -> SourceConfig {
        SourceConfig {
            login:    5_551_234,
            password: "secret".into(),
            server:   "Broker-Demo".into(),
            path:     String::new(),
            symbol:   "XAUUSD".into(),
            base_url: base_url.into(),
            timeout:  Duration::from_secs(2),
        }
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let source = Mt5BridgeSource::new(&make_config("http://localhost:8081/")).unwrap();
        assert_eq!(source.url("/ticks/from"), "http://localhost:8081/ticks/from");
    }

    #[test]
    fn test_initialize_body_omits_empty_path() {
        let req = InitializeRequest { login: 1, password: "p", server: "s", path: "" };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("path").is_none());
        assert_eq!(json["login"], 1);
    }

    #[test]
    fn test_tick_payload_decodes_mqltick_layout() {
        let body = r#"[
            {"time":1700007200,"bid":1900.0,"ask":1900.23,"last":0.0,"volume":0,
             "time_msc":1700007200500,"flags":6,"volume_real":0.0},
            {"time":1700007201,"bid":1900.1,"ask":1900.3,"time_msc":1700007201000,"flags":2}
        ]"#;
        let ticks: Option<Vec<RawTick>> = serde_json::from_str(body).unwrap();
        let ticks = ticks.unwrap();
        assert_eq!(ticks.len(), 2);
        assert_eq!(ticks[0].time_msc, 1_700_007_200_500);
        assert_eq!(ticks[1].volume, 0);
    }

    #[test]
    fn test_null_payload_is_none() {
        let tick: Option<RawTick> = serde_json::from_str("null").unwrap();
        assert!(tick.is_none());
    }

    #[test]
    fn test_status_describe() {
        let reply: BridgeStatus =
            serde_json::from_str(r#"{"ok":false,"code":-6,"error":"Authorization failed"}"#).unwrap();
        assert!(!reply.ok);
        assert_eq!(reply.describe(), "(-6) Authorization failed");
    }
}
