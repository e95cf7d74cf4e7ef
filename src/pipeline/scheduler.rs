//! Periodic tick driver for aggregation and delivery
//!
//! One tick = retention sweep + windowed aggregation + outbox delivery, in that
//! order. Delivery only runs once the aggregation step has committed.
//!
//! Ticks never overlap: the loop awaits each tick before polling the timer
//! again, and the timer uses `MissedTickBehavior::Skip`, so a tick that runs
//! past the period swallows the missed ticks and the next one fires on the
//! following period boundary.

use super::aggregation::{run_aggregation, AggregationParams, AggregationReport};
use super::config::NodeConfig;
use super::db::EntityStore;
use super::delivery::{run_delivery, AggregateSink, DeliveryContext, DeliveryReport};
use super::error::TickError;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Everything a tick needs besides the store and the sink
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub interval: Duration,
    pub aggregation: AggregationParams,
    pub delivery: DeliveryContext,
}

impl From<&NodeConfig> for SchedulerSettings {
    fn from(config: &NodeConfig) -> Self {
        Self {
            interval: config.aggregation_interval,
            aggregation: AggregationParams {
                window: config.window,
                retention: config.retention,
            },
            delivery: DeliveryContext {
                timezone: config.timezone,
                node_id: config.node_id.clone(),
            },
        }
    }
}

/// Outcome of one tick
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub aggregation: AggregationReport,
    pub delivery: DeliveryReport,
}

/// Run a single tick at time `now`
pub async fn run_tick(
    store: &dyn EntityStore,
    sink: &dyn AggregateSink,
    settings: &SchedulerSettings,
    now: i64,
) -> Result<TickReport, TickError> {
    let aggregation = run_aggregation(store, now, settings.aggregation).await?;
    let delivery = run_delivery(store, sink, &settings.delivery).await?;

    Ok(TickReport {
        aggregation,
        delivery,
    })
}

/// Scheduler task - runs a tick every `settings.interval` until shutdown
///
/// The first tick fires immediately. A failed tick is logged and the loop
/// carries on with the next period. When `shutdown` flips (or its sender is
/// dropped) the loop exits; a tick already running is allowed to finish.
pub async fn tick_scheduler_task(
    store: Arc<dyn EntityStore>,
    sink: Arc<dyn AggregateSink>,
    settings: SchedulerSettings,
    mut shutdown: watch::Receiver<bool>,
) {
    log::info!(
        "⏰ Starting aggregation scheduler (interval: {}s, window: {}s, retention: {}s)",
        settings.interval.as_secs(),
        settings.aggregation.window.as_secs(),
        settings.aggregation.retention.as_secs()
    );

    let mut timer = interval(settings.interval);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = timer.tick() => {}
            _ = shutdown.changed() => break,
        }

        if *shutdown.borrow() {
            break;
        }

        let tick_start = Instant::now();
        let now = chrono::Utc::now().timestamp();

        match run_tick(store.as_ref(), sink.as_ref(), &settings, now).await {
            Ok(report) => {
                log::info!(
                    "📊 Tick complete: {} aggregates, {} swept | delivery: {}/{} ok, {} failed | {}ms",
                    report.aggregation.aggregates.len(),
                    report.aggregation.swept,
                    report.delivery.delivered,
                    report.delivery.attempted,
                    report.delivery.failed,
                    tick_start.elapsed().as_millis()
                );
            }
            Err(e) => {
                log::error!("❌ Tick aborted: {}", e);
            }
        }

        let elapsed = tick_start.elapsed();
        if elapsed > settings.interval {
            log::warn!(
                "⚠️  Tick took {}ms, longer than the {}s period; missed ticks skipped",
                elapsed.as_millis(),
                settings.interval.as_secs()
            );
        }
    }

    log::info!("✅ Aggregation scheduler stopped");
}
