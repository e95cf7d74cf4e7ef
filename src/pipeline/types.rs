//! Core data types for the edge aggregation pipeline
//!
//! Row types mirror the four tables in `db.rs`:
//! - `containers` → `Container`
//! - `sensors` → `Sensor`
//! - `raw_measurements` → `RawMeasurement`
//! - `aggregate_records` → `AggregateRecord`
//!
//! All timestamps are Unix epoch seconds (UTC). Timezone rendering only
//! happens at the delivery boundary.

use serde::{Deserialize, Serialize};

/// Container type assigned to containers created implicitly on ingestion
pub const DEFAULT_CONTAINER_TYPE: &str = "simulated";

/// A waste container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    pub id: String,
    pub container_type: String,
}

/// A field sensor bound to exactly one container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    pub id: String,
    pub container_id: String,
    pub installed_at: i64,
}

/// One fill-level reading as stored by the ingestion handler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMeasurement {
    pub id: i64,
    pub sensor_id: String,
    pub container_id: String,
    /// Sensor-reported time
    pub timestamp: i64,
    pub fill_level: f64,
    /// Time the node accepted the batch
    pub received_at: i64,
    /// Set once by the aggregation cycle, never changed afterwards
    pub aggregate_id: Option<i64>,
}

/// Windowed mean for one container, produced once per tick that has data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRecord {
    pub id: i64,
    pub container_id: String,
    /// Cycle time
    pub timestamp: i64,
    pub fill_level: f64,
    pub delivered: bool,
    pub created_at: i64,
}

/// A single `(fill_level, timestamp)` pair from a sensor packet
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub fill_level: f64,
    pub timestamp: i64,
}

/// Inbound batch posted by a sensor to `/push`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorPacket {
    pub sensor_id: String,
    /// Container the sensor believes it is attached to. Accepted but not
    /// authoritative: the bound container is derived from the sensor id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    pub measurements: Vec<Measurement>,
}

/// Outbound body sent to the central collector for one aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub container_id: String,
    /// RFC 3339 in the node's configured timezone
    pub timestamp: String,
    pub fill_level: f64,
    /// RFC 3339 in the node's configured timezone
    pub created_at: String,
}

/// Result of persisting one sensor batch
#[derive(Debug, Clone, PartialEq)]
pub struct IngestReceipt {
    /// Sensor the batch was attached to (possibly created by this call)
    pub sensor: Sensor,
    pub sensor_created: bool,
    pub container_created: bool,
    pub stored: usize,
}

/// Row counts reported by `GET /status`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSummary {
    pub containers: i64,
    pub sensors: i64,
    pub raw_measurements: i64,
    pub aggregates: i64,
    pub pending_deliveries: i64,
}
