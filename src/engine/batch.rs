//! # engine::batch
//!
//! In-memory buffer between the poller and the store. The buffer is only
//! cleared after the store reports a committed flush; a failed flush keeps
//! every row for the next attempt.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{error, warn};

use crate::db::{InsertOutcome, TickStore};
use crate::error::StoreError;
use crate::models::Tick;

/// A failed flush holding this many batches is logged as an error.
const BACKLOG_BATCHES: usize = 10;

#[derive(Debug)]
pub struct BatchWriter {
    buffer:      Vec<Tick>,
    batch_size:  usize,
    flush_after: Option<Duration>,
    /// When the oldest buffered row arrived.
    oldest_at:   Option<Instant>,
}

impl BatchWriter {
    pub fn new(batch_size: usize, flush_after: Option<Duration>) -> Self {
        Self {
            buffer: Vec::with_capacity(batch_size),
            batch_size: batch_size.max(1),
            flush_after,
            oldest_at: None,
        }
    }

    pub fn push_all(&mut self, ticks: Vec<Tick>, now: Instant) {
        if ticks.is_empty() {
            return;
        }
        if self.buffer.is_empty() {
            self.oldest_at = Some(now);
        }
        self.buffer.extend(ticks);
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn buffered(&self) -> &[Tick] {
        &self.buffer
    }

    /// Size threshold reached, or the age trigger fired on a non-empty buffer.
    pub fn should_flush(&self, now: Instant) -> bool {
        if self.buffer.len() >= self.batch_size {
            return true;
        }
        match (self.flush_after, self.oldest_at) {
            (Some(max_age), Some(since)) => now.saturating_duration_since(since) >= max_age,
            _ => false,
        }
    }

    /// Retained rows past which a failed flush is logged as an error.
    pub fn backlog_limit(&self) -> usize {
        self.batch_size.saturating_mul(BACKLOG_BATCHES)
    }

    /// One transactional insert of the whole buffer.
    pub async fn flush(&mut self, store: &dyn TickStore) -> Result<InsertOutcome, StoreError> {
        if self.buffer.is_empty() {
            return Ok(InsertOutcome { given: 0, inserted: 0 });
        }

        match store.insert_ticks(&self.buffer).await {
            Ok(outcome) => {
                self.buffer.clear();
                self.oldest_at = None;
                Ok(outcome)
            }
            Err(e) => {
                let retained = self.buffer.len();
                if retained >= self.backlog_limit() {
                    error!(retained, error = %e, "[BATCH] flush keeps failing, buffer backlog growing");
                } else {
                    warn!(retained, error = %e, "[BATCH] flush failed, buffer kept");
                }
                Err(e)
            }
        }
    }
}
