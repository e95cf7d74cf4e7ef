//! Error types for the pipeline
//!
//! Storage errors abort the enclosing step and are retried on the next tick.
//! Delivery errors never escape the delivery cycle; they leave the record
//! pending. Input errors are rejected at the ingestion boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[source] rusqlite::Error),

    /// Foreign key or invariant violation; fatal to the current tick
    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection lock poisoned")]
    Poisoned,
}

impl StoreError {
    /// Classify a rusqlite error, separating foreign-key and invariant
    /// trigger failures from transient storage errors.
    pub fn classify(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, msg)
                if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY
                    || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_TRIGGER =>
            {
                StoreError::Integrity(msg.clone().unwrap_or_else(|| err.to_string()))
            }
            _ => StoreError::Sqlite(err),
        }
    }

    pub fn is_integrity(&self) -> bool {
        matches!(self, StoreError::Integrity(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::classify(err)
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Collector did not answer within {0}s")]
    Timeout(u64),

    #[error("Collector responded with status {0}")]
    Status(u16),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Payload encoding error: {0}")]
    Encode(String),
}

#[derive(Debug, Error)]
pub enum TickError {
    #[error("Retention sweep failed: {0}")]
    Retention(StoreError),

    #[error("Aggregation failed for container {container_id}: {source}")]
    Aggregation {
        container_id: String,
        source: StoreError,
    },

    #[error("Could not mark record {aggregate_id} delivered: {source}")]
    MarkDelivered {
        aggregate_id: i64,
        source: StoreError,
    },

    #[error("Store read failed: {0}")]
    Read(StoreError),
}
