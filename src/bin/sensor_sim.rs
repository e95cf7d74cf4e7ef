//! Sensor Simulator - emulates a field fill-level sensor
//!
//! Every interval: take a random reading, append it to a bounded buffer and
//! POST the buffer to the processing node. The buffer is cleared once the node
//! answers; on transport errors it is kept (oldest readings dropped past the
//! limit) and resent with the next reading.
//!
//! Usage:
//!   cargo run --bin sensor_sim
//!
//! Environment variables:
//!   SENSOR_ID - Sensor identity (default: unknown)
//!   CONTAINER_ID - Container the sensor is mounted on (default: unknown)
//!   SERVER_ADDR - Processing node base URL (default: http://raspberry-pi:5000)
//!   SIM_INTERVAL_SECS - Seconds between readings (default: 3)
//!   SIM_BUFFER_LIMIT - Max unsent readings kept (default: 10)

use binflow::pipeline::types::{Measurement, SensorPacket};
use dotenv::dotenv;
use log::{info, warn};
use rand::Rng;
use std::collections::VecDeque;
use std::env;
use std::time::Duration;
use tokio::time::interval;

struct SimConfig {
    sensor_id: String,
    container_id: String,
    endpoint: String,
    interval: Duration,
    buffer_limit: usize,
}

impl SimConfig {
    fn from_env() -> Self {
        let server_addr =
            env::var("SERVER_ADDR").unwrap_or_else(|_| "http://raspberry-pi:5000".to_string());

        Self {
            sensor_id: env::var("SENSOR_ID").unwrap_or_else(|_| "unknown".to_string()),
            container_id: env::var("CONTAINER_ID").unwrap_or_else(|_| "unknown".to_string()),
            endpoint: format!("{}/push", server_addr.trim_end_matches('/')),
            interval: Duration::from_secs(
                env::var("SIM_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .filter(|&n| n > 0)
                    .unwrap_or(3),
            ),
            buffer_limit: env::var("SIM_BUFFER_LIMIT")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|&n| n > 0)
                .unwrap_or(10),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = SimConfig::from_env();
    info!("🚀 Sensor {} reporting to {}", config.sensor_id, config.endpoint);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?;

    let mut buffer: VecDeque<Measurement> = VecDeque::with_capacity(config.buffer_limit + 1);
    let mut timer = interval(config.interval);

    loop {
        tokio::select! {
            _ = timer.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("⚠️  Received CTRL+C, stopping simulator");
                break;
            }
        }

        buffer.push_back(Measurement {
            fill_level: rand::thread_rng().gen_range(0..=100) as f64,
            timestamp: chrono::Utc::now().timestamp(),
        });
        while buffer.len() > config.buffer_limit {
            buffer.pop_front();
        }

        let packet = SensorPacket {
            sensor_id: config.sensor_id.clone(),
            container_id: Some(config.container_id.clone()),
            measurements: buffer.iter().copied().collect(),
        };

        match client.post(&config.endpoint).json(&packet).send().await {
            Ok(response) => {
                info!(
                    "📤 Sent packet with {} readings: {}",
                    packet.measurements.len(),
                    response.status()
                );
                buffer.clear();
            }
            Err(e) => {
                warn!(
                    "⚠️  Error sending data ({} readings buffered): {}",
                    buffer.len(),
                    e
                );
            }
        }
    }

    Ok(())
}
