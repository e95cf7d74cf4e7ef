//! Entity store for the edge node
//!
//! Tables (see `/sql/` directory):
//! - `containers` - INSERT ... ON CONFLICT DO NOTHING (lazy, idempotent)
//! - `sensors` - INSERT ... ON CONFLICT DO NOTHING (lazy, idempotent)
//! - `raw_measurements` - INSERT per reading, aggregate_id set once, swept by age
//! - `aggregate_records` - INSERT per container per tick, delivered flipped once
//!
//! Every mutating method is a single transaction. Readers never observe a
//! half-written measurement batch or an aggregate without its linked rows.

use super::error::StoreError;
use super::types::{
    AggregateRecord, Container, IngestReceipt, Measurement, RawMeasurement, Sensor, StoreSummary,
    DEFAULT_CONTAINER_TYPE,
};
use crate::sqlite_pragma::apply_optimized_pragmas;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Ordered schema migrations; every statement uses IF NOT EXISTS
const MIGRATIONS: &[(&str, &str)] = &[
    ("01_containers.sql", include_str!("../../sql/01_containers.sql")),
    ("02_sensors.sql", include_str!("../../sql/02_sensors.sql")),
    (
        "03_aggregate_records.sql",
        include_str!("../../sql/03_aggregate_records.sql"),
    ),
    (
        "04_raw_measurements.sql",
        include_str!("../../sql/04_raw_measurements.sql"),
    ),
];

/// Storage operations used by the ingestion handler and the scheduler
///
/// The handler and the scheduler share nothing but this interface.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Persist a batch for one sensor, creating the sensor and its container
    /// on first sight. All-or-nothing.
    async fn record_measurements(
        &self,
        sensor_id: &str,
        container_id: &str,
        measurements: &[Measurement],
        received_at: i64,
    ) -> Result<IngestReceipt, StoreError>;

    /// Delete raw measurements with `timestamp < cutoff`, aggregated or not
    async fn sweep_raw_before(&self, cutoff: i64) -> Result<usize, StoreError>;

    /// Ids of every known container
    async fn container_ids(&self) -> Result<Vec<String>, StoreError>;

    /// Unconsumed raw measurements of a container with `start <= timestamp <= end`
    async fn unaggregated_in_window(
        &self,
        container_id: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<RawMeasurement>, StoreError>;

    /// Insert an aggregate record and link the given raw rows to it
    async fn commit_aggregate(
        &self,
        container_id: &str,
        timestamp: i64,
        fill_level: f64,
        raw_ids: &[i64],
    ) -> Result<AggregateRecord, StoreError>;

    /// Every aggregate record not yet acknowledged by the collector, oldest first
    async fn pending_aggregates(&self) -> Result<Vec<AggregateRecord>, StoreError>;

    /// Flip `delivered` to true
    async fn mark_delivered(&self, aggregate_id: i64) -> Result<(), StoreError>;

    /// Row counts for status reporting
    async fn summary(&self) -> Result<StoreSummary, StoreError>;
}

/// Run the embedded schema migrations
///
/// Idempotent: safe to call on every startup.
pub fn run_schema_migrations(conn: &Connection) -> Result<(), StoreError> {
    log::info!("🔧 Running schema migrations");

    for (name, sql) in MIGRATIONS {
        log::debug!("   ├─ Executing: {}", name);
        conn.execute_batch(sql)?;
    }

    log::info!("✅ All schema migrations completed successfully");
    Ok(())
}

/// SQLite implementation of EntityStore
///
/// One connection behind a mutex; SQLite transactions give atomicity,
/// the mutex gives serialization between the handler and the scheduler.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database at `db_path` and bring the schema up to date
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)?;
        apply_optimized_pragmas(&conn)?;
        run_schema_migrations(&conn)?;

        log::info!("📊 Entity store ready at {}", db_path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    pub fn get_container(&self, id: &str) -> Result<Option<Container>, StoreError> {
        let conn = self.lock()?;
        let container = conn
            .query_row(
                "SELECT id, type FROM containers WHERE id = ?1",
                [id],
                |row| {
                    Ok(Container {
                        id: row.get(0)?,
                        container_type: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(container)
    }

    pub fn get_sensor(&self, id: &str) -> Result<Option<Sensor>, StoreError> {
        let conn = self.lock()?;
        Ok(select_sensor(&conn, id)?)
    }

    /// All raw measurements of a container, oldest first
    pub fn raw_measurements(&self, container_id: &str) -> Result<Vec<RawMeasurement>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, sensor_id, container_id, timestamp, fill_level, received_at, aggregate_id
             FROM raw_measurements WHERE container_id = ?1 ORDER BY timestamp, id",
        )?;
        let rows = stmt
            .query_map([container_id], raw_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// All aggregate records of a container, oldest first
    pub fn aggregates(&self, container_id: &str) -> Result<Vec<AggregateRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, container_id, timestamp, fill_level, delivered, created_at
             FROM aggregate_records WHERE container_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map([container_id], aggregate_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

#[async_trait]
impl EntityStore for SqliteStore {
    async fn record_measurements(
        &self,
        sensor_id: &str,
        container_id: &str,
        measurements: &[Measurement],
        received_at: i64,
    ) -> Result<IngestReceipt, StoreError> {
        let mut conn = self.lock()?;

        // IMMEDIATE takes the write lock up front so the existence check and the
        // inserts below can't interleave with another writer.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut sensor_created = false;
        let mut container_created = false;

        if select_sensor(&tx, sensor_id)?.is_none() {
            container_created = tx.execute(
                "INSERT INTO containers (id, type) VALUES (?1, ?2)
                 ON CONFLICT(id) DO NOTHING",
                params![container_id, DEFAULT_CONTAINER_TYPE],
            )? == 1;

            sensor_created = tx.execute(
                "INSERT INTO sensors (id, container_id, installed_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO NOTHING",
                params![sensor_id, container_id, received_at],
            )? == 1;
        }

        // Re-read: the bound container is whatever the stored sensor says
        let sensor = select_sensor(&tx, sensor_id)?.ok_or_else(|| {
            StoreError::Integrity(format!("sensor {} missing after upsert", sensor_id))
        })?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO raw_measurements
                    (sensor_id, container_id, timestamp, fill_level, received_at, aggregate_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, NULL)",
            )?;
            for m in measurements {
                stmt.execute(params![
                    sensor.id,
                    sensor.container_id,
                    m.timestamp,
                    m.fill_level,
                    received_at,
                ])?;
            }
        }

        tx.commit()?;

        Ok(IngestReceipt {
            sensor,
            sensor_created,
            container_created,
            stored: measurements.len(),
        })
    }

    async fn sweep_raw_before(&self, cutoff: i64) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM raw_measurements WHERE timestamp < ?1",
            [cutoff],
        )?;
        Ok(deleted)
    }

    async fn container_ids(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id FROM containers ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    async fn unaggregated_in_window(
        &self,
        container_id: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<RawMeasurement>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, sensor_id, container_id, timestamp, fill_level, received_at, aggregate_id
             FROM raw_measurements
             WHERE container_id = ?1
               AND timestamp BETWEEN ?2 AND ?3
               AND aggregate_id IS NULL
             ORDER BY timestamp, id",
        )?;
        let rows = stmt
            .query_map(params![container_id, start, end], raw_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    async fn commit_aggregate(
        &self,
        container_id: &str,
        timestamp: i64,
        fill_level: f64,
        raw_ids: &[i64],
    ) -> Result<AggregateRecord, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute(
            "INSERT INTO aggregate_records (container_id, timestamp, fill_level, delivered, created_at)
             VALUES (?1, ?2, ?3, 0, ?2)",
            params![container_id, timestamp, fill_level],
        )?;
        let aggregate_id = tx.last_insert_rowid();

        {
            let mut stmt = tx.prepare(
                "UPDATE raw_measurements SET aggregate_id = ?1
                 WHERE id = ?2 AND container_id = ?3 AND aggregate_id IS NULL",
            )?;
            for raw_id in raw_ids {
                let updated = stmt.execute(params![aggregate_id, raw_id, container_id])?;
                if updated != 1 {
                    // Dropping tx rolls back the record insert as well
                    return Err(StoreError::Integrity(format!(
                        "raw measurement {} not linkable to aggregate for container {}",
                        raw_id, container_id
                    )));
                }
            }
        }

        tx.commit()?;

        Ok(AggregateRecord {
            id: aggregate_id,
            container_id: container_id.to_string(),
            timestamp,
            fill_level,
            delivered: false,
            created_at: timestamp,
        })
    }

    async fn pending_aggregates(&self) -> Result<Vec<AggregateRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, container_id, timestamp, fill_level, delivered, created_at
             FROM aggregate_records WHERE delivered = 0 ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], aggregate_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    async fn mark_delivered(&self, aggregate_id: i64) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE aggregate_records SET delivered = 1 WHERE id = ?1",
            [aggregate_id],
        )?;
        if updated != 1 {
            return Err(StoreError::Integrity(format!(
                "aggregate record {} does not exist",
                aggregate_id
            )));
        }
        Ok(())
    }

    async fn summary(&self) -> Result<StoreSummary, StoreError> {
        let conn = self.lock()?;
        let count = |sql: &str| conn.query_row(sql, [], |row| row.get::<_, i64>(0));

        Ok(StoreSummary {
            containers: count("SELECT COUNT(*) FROM containers")?,
            sensors: count("SELECT COUNT(*) FROM sensors")?,
            raw_measurements: count("SELECT COUNT(*) FROM raw_measurements")?,
            aggregates: count("SELECT COUNT(*) FROM aggregate_records")?,
            pending_deliveries: count("SELECT COUNT(*) FROM aggregate_records WHERE delivered = 0")?,
        })
    }
}

fn select_sensor(conn: &Connection, id: &str) -> rusqlite::Result<Option<Sensor>> {
    conn.query_row(
        "SELECT id, container_id, installed_at FROM sensors WHERE id = ?1",
        [id],
        |row| {
            Ok(Sensor {
                id: row.get(0)?,
                container_id: row.get(1)?,
                installed_at: row.get(2)?,
            })
        },
    )
    .optional()
}

fn raw_from_row(row: &Row<'_>) -> rusqlite::Result<RawMeasurement> {
    Ok(RawMeasurement {
        id: row.get(0)?,
        sensor_id: row.get(1)?,
        container_id: row.get(2)?,
        timestamp: row.get(3)?,
        fill_level: row.get(4)?,
        received_at: row.get(5)?,
        aggregate_id: row.get(6)?,
    })
}

fn aggregate_from_row(row: &Row<'_>) -> rusqlite::Result<AggregateRecord> {
    Ok(AggregateRecord {
        id: row.get(0)?,
        container_id: row.get(1)?,
        timestamp: row.get(2)?,
        fill_level: row.get(3)?,
        delivered: row.get(4)?,
        created_at: row.get(5)?,
    })
}
