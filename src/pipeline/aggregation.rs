//! Aggregation cycle - retention sweep + windowed mean per container
//!
//! Per tick:
//! 1. Delete raw measurements older than `now - retention`, aggregated or not
//! 2. For each container, average the unconsumed raw rows in `[now - window, now]`,
//!    write one AggregateRecord and link the rows to it
//!
//! Containers with nothing in the window produce no record. Each container is
//! its own transaction, so a failure leaves earlier containers committed and
//! this container untouched.

use super::db::EntityStore;
use super::error::TickError;
use super::types::AggregateRecord;
use std::time::Duration;

/// Window and retention settings for one aggregation pass
#[derive(Debug, Clone, Copy)]
pub struct AggregationParams {
    pub window: Duration,
    pub retention: Duration,
}

/// Outcome of one aggregation pass
#[derive(Debug, Clone, Default)]
pub struct AggregationReport {
    pub swept: usize,
    pub containers_scanned: usize,
    pub aggregates: Vec<AggregateRecord>,
}

/// Arithmetic mean rounded to two decimals, `None` for an empty slice
pub fn mean_fill_level(levels: &[f64]) -> Option<f64> {
    if levels.is_empty() {
        return None;
    }
    let mean = levels.iter().sum::<f64>() / levels.len() as f64;
    Some(round2(mean))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn secs(d: Duration) -> i64 {
    i64::try_from(d.as_secs()).unwrap_or(i64::MAX)
}

/// Run the retention sweep followed by windowed aggregation at time `now`
pub async fn run_aggregation(
    store: &dyn EntityStore,
    now: i64,
    params: AggregationParams,
) -> Result<AggregationReport, TickError> {
    let mut report = AggregationReport::default();

    let cutoff = now.saturating_sub(secs(params.retention));
    report.swept = store
        .sweep_raw_before(cutoff)
        .await
        .map_err(TickError::Retention)?;

    if report.swept > 0 {
        log::info!("🧹 Deleted {} old raw measurements", report.swept);
    }

    let window_start = now.saturating_sub(secs(params.window));
    let containers = store.container_ids().await.map_err(TickError::Read)?;
    report.containers_scanned = containers.len();

    for container_id in containers {
        let rows = store
            .unaggregated_in_window(&container_id, window_start, now)
            .await
            .map_err(TickError::Read)?;

        let levels: Vec<f64> = rows.iter().map(|r| r.fill_level).collect();
        let Some(fill_level) = mean_fill_level(&levels) else {
            continue;
        };

        let raw_ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        let record = store
            .commit_aggregate(&container_id, now, fill_level, &raw_ids)
            .await
            .map_err(|source| TickError::Aggregation {
                container_id: container_id.clone(),
                source,
            })?;

        log::info!(
            "📈 Aggregated {} for container {} ({} readings)",
            record.fill_level,
            container_id,
            raw_ids.len()
        );

        report.aggregates.push(record);
    }

    Ok(report)
}
