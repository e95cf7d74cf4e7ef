//! Delivery cycle - forwards pending aggregates to the central collector
//!
//! Outbox semantics: `delivered` is only flipped after the collector answers
//! 200. Anything else leaves the record pending for the next tick. A crash
//! between the send and the flag update resends the record, so the collector
//! must accept duplicates.
//!
//! ## Collector endpoint
//!
//! `POST {CENTRAL_SERVER_URL}` with a JSON `DeliveryPayload`:
//!
//! ```json
//! {"container_id": "container_s1", "timestamp": "2024-03-01T12:00:00-03:00",
//!  "fill_level": 55.5, "created_at": "2024-03-01T12:00:00-03:00"}
//! ```

use super::db::EntityStore;
use super::error::{DeliveryError, TickError};
use super::types::{AggregateRecord, DeliveryPayload};
use async_trait::async_trait;
use chrono::DateTime;
use chrono_tz::Tz;
use std::time::Duration;

/// Downstream receiver of aggregate records
#[async_trait]
pub trait AggregateSink: Send + Sync {
    /// Hand one payload to the collector. `Ok` only on acknowledgment.
    async fn deliver(&self, payload: &DeliveryPayload) -> Result<(), DeliveryError>;
}

/// HTTP client for the central collector
pub struct HttpCollector {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpCollector {
    /// Build a collector client whose requests fail after `timeout`
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl AggregateSink for HttpCollector {
    async fn deliver(&self, payload: &DeliveryPayload) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DeliveryError::Timeout(self.timeout.as_secs())
                } else {
                    DeliveryError::Transport(e.to_string())
                }
            })?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(DeliveryError::Status(response.status().as_u16()));
        }

        Ok(())
    }
}

/// Settings applied to every outbound payload
#[derive(Debug, Clone)]
pub struct DeliveryContext {
    pub timezone: Tz,
    pub node_id: Option<String>,
}

/// Outcome of one delivery pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeliveryReport {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
}

fn to_rfc3339(ts: i64, tz: Tz) -> Result<String, DeliveryError> {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.with_timezone(&tz).to_rfc3339())
        .ok_or_else(|| DeliveryError::Encode(format!("timestamp {} out of range", ts)))
}

/// Build the collector payload for a record
pub fn build_payload(
    record: &AggregateRecord,
    ctx: &DeliveryContext,
) -> Result<DeliveryPayload, DeliveryError> {
    Ok(DeliveryPayload {
        node_id: ctx.node_id.clone(),
        container_id: record.container_id.clone(),
        timestamp: to_rfc3339(record.timestamp, ctx.timezone)?,
        fill_level: record.fill_level,
        created_at: to_rfc3339(record.created_at, ctx.timezone)?,
    })
}

/// Attempt delivery of every pending aggregate, oldest first
///
/// A failed record never stops the others. Only a storage failure while
/// reading the outbox or flipping the flag aborts the pass.
pub async fn run_delivery(
    store: &dyn EntityStore,
    sink: &dyn AggregateSink,
    ctx: &DeliveryContext,
) -> Result<DeliveryReport, TickError> {
    let pending = store.pending_aggregates().await.map_err(TickError::Read)?;
    let mut report = DeliveryReport::default();

    for record in pending {
        report.attempted += 1;

        let outcome = match build_payload(&record, ctx) {
            Ok(payload) => sink.deliver(&payload).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                store
                    .mark_delivered(record.id)
                    .await
                    .map_err(|source| TickError::MarkDelivered {
                        aggregate_id: record.id,
                        source,
                    })?;
                report.delivered += 1;
                log::info!(
                    "📤 Sent data for container {} (record {}) to central server",
                    record.container_id,
                    record.id
                );
            }
            Err(e) => {
                report.failed += 1;
                log::warn!(
                    "⚠️  Failed to send data for container {} (record {}): {}",
                    record.container_id,
                    record.id,
                    e
                );
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::db::SqliteStore;
    use crate::pipeline::types::Measurement;
    use axum::{http::StatusCode, routing::post, Router};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    /// Sink that records payloads and fails while `failing` is set
    #[derive(Default)]
    struct RecordingSink {
        failing: AtomicBool,
        received: Mutex<Vec<DeliveryPayload>>,
    }

    #[async_trait]
    impl AggregateSink for RecordingSink {
        async fn deliver(&self, payload: &DeliveryPayload) -> Result<(), DeliveryError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(DeliveryError::Status(503));
            }
            self.received.lock().unwrap().push(payload.clone());
            Ok(())
        }
    }

    fn ctx() -> DeliveryContext {
        DeliveryContext {
            timezone: chrono_tz::America::Santiago,
            node_id: Some("node-1".to_string()),
        }
    }

    async fn store_with_aggregates(levels: &[f64]) -> (NamedTempFile, SqliteStore) {
        let temp_file = NamedTempFile::new().unwrap();
        let store = SqliteStore::open(temp_file.path()).unwrap();
        let now = 1700000000;
        store
            .record_measurements(
                "s1",
                "container_s1",
                &[Measurement {
                    fill_level: 0.0,
                    timestamp: now,
                }],
                now,
            )
            .await
            .unwrap();
        for (i, level) in levels.iter().enumerate() {
            store
                .commit_aggregate("container_s1", now + i as i64 * 300, *level, &[])
                .await
                .unwrap();
        }
        (temp_file, store)
    }

    async fn spawn_collector(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/receive", addr)
    }

    fn sample_payload() -> DeliveryPayload {
        DeliveryPayload {
            node_id: None,
            container_id: "container_s1".to_string(),
            timestamp: "2023-11-14T19:13:20-03:00".to_string(),
            fill_level: 55.5,
            created_at: "2023-11-14T19:13:20-03:00".to_string(),
        }
    }

    #[test]
    fn test_payload_uses_configured_timezone() {
        let record = AggregateRecord {
            id: 1,
            container_id: "container_s1".to_string(),
            timestamp: 1700000000,
            fill_level: 55.5,
            delivered: false,
            created_at: 1700000000,
        };

        let payload = build_payload(&record, &ctx()).unwrap();
        // 2023-11-14T22:13:20Z, Santiago is UTC-3 in November
        assert_eq!(payload.timestamp, "2023-11-14T19:13:20-03:00");
        assert_eq!(payload.created_at, payload.timestamp);
        assert_eq!(payload.node_id.as_deref(), Some("node-1"));

        let utc = DeliveryContext {
            timezone: Tz::UTC,
            node_id: None,
        };
        let payload = build_payload(&record, &utc).unwrap();
        assert_eq!(payload.timestamp, "2023-11-14T22:13:20+00:00");
    }

    #[tokio::test]
    async fn test_successful_delivery_marks_records() {
        let (_temp, store) = store_with_aggregates(&[20.0, 30.0]).await;
        let sink = RecordingSink::default();

        let report = run_delivery(&store, &sink, &ctx()).await.unwrap();

        assert_eq!(
            report,
            DeliveryReport {
                attempted: 2,
                delivered: 2,
                failed: 0
            }
        );
        assert!(store.pending_aggregates().await.unwrap().is_empty());

        let received = sink.received.lock().unwrap();
        assert_eq!(received[0].fill_level, 20.0);
        assert_eq!(received[1].fill_level, 30.0);
    }

    #[tokio::test]
    async fn test_failed_delivery_stays_pending_and_retries() {
        let (_temp, store) = store_with_aggregates(&[42.0]).await;
        let sink = RecordingSink::default();
        sink.failing.store(true, Ordering::SeqCst);

        let report = run_delivery(&store, &sink, &ctx()).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.delivered, 0);
        assert_eq!(store.pending_aggregates().await.unwrap().len(), 1);

        // Collector recovers: next pass delivers the backlog
        sink.failing.store(false, Ordering::SeqCst);
        let report = run_delivery(&store, &sink, &ctx()).await.unwrap();
        assert_eq!(report.delivered, 1);
        assert!(store.aggregates("container_s1").unwrap()[0].delivered);

        // Delivered records are not attempted again
        let report = run_delivery(&store, &sink, &ctx()).await.unwrap();
        assert_eq!(report.attempted, 0);
        assert_eq!(sink.received.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_http_collector_accepts_200() {
        let url = spawn_collector(Router::new().route("/receive", post(|| async { StatusCode::OK }))).await;
        let collector = HttpCollector::new(url, Duration::from_secs(5)).unwrap();

        collector.deliver(&sample_payload()).await.unwrap();
    }

    #[tokio::test]
    async fn test_http_collector_non_200_is_failure() {
        let url = spawn_collector(
            Router::new()
                .route("/receive", post(|| async { StatusCode::CREATED })),
        )
        .await;
        let collector = HttpCollector::new(url, Duration::from_secs(5)).unwrap();

        let err = collector.deliver(&sample_payload()).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Status(201)));
    }

    #[tokio::test]
    async fn test_http_collector_times_out() {
        let url = spawn_collector(Router::new().route(
            "/receive",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                StatusCode::OK
            }),
        ))
        .await;
        let collector = HttpCollector::new(url, Duration::from_millis(200)).unwrap();

        let err = collector.deliver(&sample_payload()).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_http_collector_unreachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let collector =
            HttpCollector::new(format!("http://{}/receive", addr), Duration::from_secs(2)).unwrap();

        let err = collector.deliver(&sample_payload()).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Transport(_)));
    }
}
