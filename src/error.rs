//! # error
//!
//! Error taxonomy for the tracker.
//!
//! The store adapter classifies raw `sqlx` failures into [`StoreError`] so the
//! loop and the partition manager branch on meaning (retryable write failure,
//! missing maintenance routine) instead of on Postgres SQLSTATE codes.

use thiserror::Error;

/// SQLSTATE `undefined_function`.
pub const UNDEFINED_FUNCTION: &str = "42883";

#[derive(Debug, Error)]
pub enum StoreError {
    /// Could not open the pool at startup.
    #[error("Failed to connect to PostgreSQL at {host}:{port}/{dbname}: {source}")]
    Connect {
        host:   String,
        port:   u16,
        dbname: String,
        #[source]
        source: sqlx::Error,
    },

    /// Insert / commit / DDL failure. The transaction was rolled back.
    #[error("Store error: {0}")]
    Transient(#[source] sqlx::Error),

    /// The server-side partition routine is not installed (yet).
    #[error("Maintenance routine missing: {routine}")]
    MaintenanceRoutineMissing { routine: String },

    /// Schema / table names are interpolated into DDL and must stay plain.
    #[error("Invalid SQL identifier: {0:?}")]
    InvalidIdentifier(String),
}

impl StoreError {
    /// Map a raw driver error, singling out `undefined_function` when the
    /// caller was invoking `routine`.
    pub fn classify(err: sqlx::Error, routine: &str) -> Self {
        if sqlstate(&err).as_deref() == Some(UNDEFINED_FUNCTION) {
            return StoreError::MaintenanceRoutineMissing {
                routine: routine.to_string(),
            };
        }
        StoreError::Transient(err)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }

    /// SQLSTATE of the underlying database error, if any.
    pub fn code(&self) -> Option<String> {
        match self {
            StoreError::Connect { source, .. } | StoreError::Transient(source) => sqlstate(source),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Transient(err)
    }
}

pub fn sqlstate(err: &sqlx::Error) -> Option<String> {
    err.as_database_error()
        .and_then(|db| db.code())
        .map(|code| code.into_owned())
}

#[derive(Debug, Error)]
pub enum TrackerError {
    /// Terminal connect / login / symbol-select failure. Fatal at startup.
    #[error("Tick source unavailable: {0}")]
    SourceUnavailable(String),

    /// A single read failed mid-run; treated as "no data this cycle".
    #[error("Tick source read failed: {0}")]
    SourceRead(String),

    /// No server tick has ever been seen, so there is no offset to query with.
    #[error("Clock offset unresolved for {symbol}: no server tick available")]
    ClockDriftUnresolvable { symbol: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}
