//! Ingestion handler - attaches sensor batches to known entities
//!
//! Runs once per inbound request, possibly many at a time. Shares nothing with
//! the scheduler except the entity store.

use super::db::EntityStore;
use super::error::IngestError;
use super::types::{IngestReceipt, SensorPacket};

/// Deterministic container identity for a sensor seen for the first time
pub fn derive_container_id(sensor_id: &str) -> String {
    format!("container_{}", sensor_id)
}

/// Validate and persist one sensor batch
///
/// Rejects a blank sensor id or an empty measurement list before touching
/// the store. Fill levels outside 0-100 are stored as reported.
///
/// The whole batch lands in one transaction: on error nothing from this call
/// is persisted.
pub async fn ingest(
    store: &dyn EntityStore,
    packet: &SensorPacket,
    received_at: i64,
) -> Result<IngestReceipt, IngestError> {
    let sensor_id = packet.sensor_id.trim();

    if sensor_id.is_empty() {
        return Err(IngestError::InvalidInput("sensor_id is required".to_string()));
    }
    if packet.measurements.is_empty() {
        return Err(IngestError::InvalidInput(format!(
            "no measurements in packet from sensor {}",
            sensor_id
        )));
    }

    let container_id = derive_container_id(sensor_id);

    if let Some(hint) = packet.container_id.as_deref() {
        if hint != container_id {
            log::debug!(
                "Sensor {} reports container '{}', binding follows sensor id",
                sensor_id,
                hint
            );
        }
    }

    log::info!(
        "📥 Received data from sensor {} with {} measurements",
        sensor_id,
        packet.measurements.len()
    );

    let receipt = store
        .record_measurements(sensor_id, &container_id, &packet.measurements, received_at)
        .await?;

    if receipt.sensor_created {
        log::info!(
            "🆕 Registered sensor {} on container {}{}",
            sensor_id,
            receipt.sensor.container_id,
            if receipt.container_created { " (new container)" } else { "" }
        );
    }

    Ok(receipt)
}
