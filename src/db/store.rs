//! # db::store
//!
//! Batched, idempotent tick insert.
//!
//! One flush = one transaction = `ceil(n / page_size)` multi-row
//! `INSERT ... ON CONFLICT (symbol, time_msc, time_utc) DO NOTHING` statements.
//! Re-delivered ticks collide with `uq_tick_global` and are skipped silently.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::types::BigDecimal;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use tracing::{info, warn};

use crate::db::{InsertOutcome, TableRef, TickStore};
use crate::error::StoreError;
use crate::models::Tick;

pub struct PgStore {
    pool:      PgPool,
    table:     TableRef,
    page_size: usize,
}

impl PgStore {
    pub fn new(pool: PgPool, table: TableRef, page_size: usize) -> Self {
        Self { pool, table, page_size: page_size.max(1) }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn insert_pages(
        &self,
        tx:    &mut Transaction<'static, Postgres>,
        ticks: &[Tick],
    ) -> Result<u64, sqlx::Error> {
        let mut inserted = 0;

        for page in ticks.chunks(self.page_size) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                "INSERT INTO {} (symbol, time_utc, time_msc, bid, ask, last, volume, flags, spread_pts) ",
                self.table.qualified()
            ));
            qb.push_values(page, |mut row, tick| {
                row.push_bind(tick.symbol.clone())
                    .push_bind(tick.time_utc)
                    .push_bind(tick.time_msc)
                    .push_bind(to_numeric(tick.bid))
                    .push_bind(to_numeric(tick.ask))
                    .push_bind(to_numeric(tick.last))
                    .push_bind(tick.volume)
                    .push_bind(tick.flags)
                    .push_bind(tick.spread_pts);
            });
            qb.push(" ON CONFLICT (symbol, time_msc, time_utc) DO NOTHING");

            inserted += qb.build().execute(&mut **tx).await?.rows_affected();
        }

        Ok(inserted)
    }
}

#[async_trait]
impl TickStore for PgStore {
    async fn insert_ticks(&self, ticks: &[Tick]) -> Result<InsertOutcome, StoreError> {
        if ticks.is_empty() {
            return Ok(InsertOutcome { given: 0, inserted: 0 });
        }

        let mut tx = self.pool.begin().await?;

        match self.insert_pages(&mut tx, ticks).await {
            Ok(inserted) => {
                tx.commit().await?;
                info!(given = ticks.len(), inserted, table = %self.table.qualified(), "[DB] inserted ticks");
                Ok(InsertOutcome { given: ticks.len(), inserted })
            }
            Err(e) => {
                if let Err(rb) = tx.rollback().await {
                    warn!(error = %rb, "[DB] rollback after failed insert also failed");
                } else {
                    warn!(error = %e, "[DB] insert rolled back");
                }
                Err(StoreError::Transient(e))
            }
        }
    }

    async fn close(&self) {
        self.pool.close().await;
        info!("[DB] connection closed");
    }
}

/// NUMERIC(12,3) binding. Non-finite prices become NULL.
fn to_numeric(price: f64) -> Option<BigDecimal> {
    if !price.is_finite() {
        return None;
    }
    BigDecimal::from_str(&format!("{price:.3}")).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_rounds_to_three_places() {
        assert_eq!(to_numeric(1900.23), BigDecimal::from_str("1900.230").ok());
        assert_eq!(to_numeric(0.1 + 0.2), BigDecimal::from_str("0.300").ok());
    }

    #[test]
    fn test_non_finite_price_is_null() {
        assert_eq!(to_numeric(f64::NAN), None);
        assert_eq!(to_numeric(f64::INFINITY), None);
    }
}
