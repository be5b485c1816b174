//! # tick-tracker
//!
//! Harvests one MT5 symbol's tick stream into a daily range-partitioned
//! PostgreSQL table, without loss or duplication, and keeps the partition
//! window rolling.
//!
//! ```text
//!  ┌────────────┐  fetch_since   ┌──────────────────────────────┐  INSERT ... ON CONFLICT   ┌──────────────┐
//!  │  MT5       │ ─────────────▶ │  Tracker                     │ ────────────────────────▶ │  PostgreSQL  │
//!  │  terminal  │  current_tick  │  clock · normalizer ·        │                           │  <table>     │
//!  │  (bridge)  │ ◀───────────── │  watermark · batch           │  manage_<table>_partitions│   _YYYYMMDD  │
//!  └────────────┘                └──────────────────────────────┘ ────────────────────────▶ │   _default   │
//!                                                                    (inline / pg_cron)     └──────────────┘
//! ```

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod models;
pub mod routes;
pub mod source;
pub mod state;
