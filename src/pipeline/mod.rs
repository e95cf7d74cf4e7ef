//! # Edge aggregation-and-delivery pipeline
//!
//! Data flow:
//!
//! ```text
//! sensors ──POST /push──▶ ingestion ──▶ EntityStore ◀── scheduler tick
//!                                                        ├─ aggregation (sweep + windowed mean)
//!                                                        └─ delivery ──▶ central collector
//! ```
//!
//! The ingestion handler and the scheduler are independent units. They talk
//! only through the `EntityStore` transactional interface, never through
//! shared in-memory state.
//!
//! ## Module Organization
//!
//! - `types` - Row types and wire payloads
//! - `error` - Storage, ingestion, delivery and tick errors
//! - `config` - Environment-driven node configuration
//! - `db` - EntityStore trait + SQLite implementation
//! - `ingestion` - Sensor batch handling, lazy entity creation
//! - `aggregation` - Retention sweep and windowed means
//! - `delivery` - Outbox delivery to the central collector
//! - `scheduler` - Periodic tick loop
//! - `server` - HTTP routes

pub mod aggregation;
pub mod config;
pub mod db;
pub mod delivery;
pub mod error;
pub mod ingestion;
pub mod scheduler;
pub mod server;
pub mod types;

// Re-export commonly used types
pub use aggregation::{run_aggregation, AggregationParams, AggregationReport};
pub use config::NodeConfig;
pub use db::{EntityStore, SqliteStore};
pub use delivery::{run_delivery, AggregateSink, DeliveryContext, DeliveryReport, HttpCollector};
pub use error::{DeliveryError, IngestError, StoreError, TickError};
pub use ingestion::{derive_container_id, ingest};
pub use scheduler::{run_tick, tick_scheduler_task, SchedulerSettings, TickReport};
pub use types::{
    AggregateRecord, Container, DeliveryPayload, IngestReceipt, Measurement, RawMeasurement,
    Sensor, SensorPacket, StoreSummary,
};
