//! Node configuration from environment variables

use chrono_tz::Tz;
use std::env;
use std::time::Duration;

/// Configuration for the edge processing node
///
/// Loaded from environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Path to SQLite database file
    pub db_path: String,

    /// Address the ingestion endpoint binds to
    pub listen_addr: String,

    /// Central collector endpoint receiving aggregates
    pub collector_url: String,

    /// Timezone used to render delivery timestamps
    pub timezone: Tz,

    /// Period between aggregation+delivery ticks
    pub aggregation_interval: Duration,

    /// Trailing span of raw measurements eligible for one aggregate
    pub window: Duration,

    /// Maximum age of raw measurements before deletion
    pub retention: Duration,

    /// Per-request timeout for collector calls
    pub delivery_timeout: Duration,

    /// Identity of this node, forwarded with each delivery when set
    pub node_id: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            db_path: "/db/data.db".to_string(),
            listen_addr: "0.0.0.0:5000".to_string(),
            collector_url: "http://central-server:8000/receive".to_string(),
            timezone: chrono_tz::America::Santiago,
            aggregation_interval: Duration::from_secs(300),
            window: Duration::from_secs(30),
            retention: Duration::from_secs(24 * 60 * 60),
            delivery_timeout: Duration::from_secs(5),
            node_id: None,
        }
    }
}

impl NodeConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `NODE_DB_PATH` (default: /db/data.db)
    /// - `LISTEN_ADDR` (default: 0.0.0.0:5000)
    /// - `CENTRAL_SERVER_URL` (default: http://central-server:8000/receive)
    /// - `TZ` (default: America/Santiago)
    /// - `AGGREGATION_INTERVAL_SECS` (default: 300)
    /// - `AGGREGATION_WINDOW_SECS` (default: 30)
    /// - `RETENTION_SECS` (default: 86400)
    /// - `DELIVERY_TIMEOUT_SECS` (default: 5)
    /// - `NODE_ID` (default: unset)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let secs = |key: &str, default: Duration| {
            lookup(key)
                .and_then(|s| s.trim().parse::<u64>().ok())
                .filter(|&n| n > 0)
                .map(Duration::from_secs)
                .unwrap_or(default)
        };

        let timezone = match lookup("TZ") {
            Some(name) => name.trim().parse::<Tz>().unwrap_or_else(|_| {
                log::warn!("⚠️  Unknown timezone '{}', falling back to UTC", name);
                Tz::UTC
            }),
            None => defaults.timezone,
        };

        Self {
            db_path: lookup("NODE_DB_PATH").unwrap_or(defaults.db_path),
            listen_addr: lookup("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            collector_url: lookup("CENTRAL_SERVER_URL").unwrap_or(defaults.collector_url),
            timezone,
            aggregation_interval: secs("AGGREGATION_INTERVAL_SECS", defaults.aggregation_interval),
            window: secs("AGGREGATION_WINDOW_SECS", defaults.window),
            retention: secs("RETENTION_SECS", defaults.retention),
            delivery_timeout: secs("DELIVERY_TIMEOUT_SECS", defaults.delivery_timeout),
            node_id: lookup("NODE_ID").filter(|s| !s.trim().is_empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = NodeConfig::from_lookup(lookup_from(&[]));

        assert_eq!(config.db_path, "/db/data.db");
        assert_eq!(config.listen_addr, "0.0.0.0:5000");
        assert_eq!(config.collector_url, "http://central-server:8000/receive");
        assert_eq!(config.timezone, chrono_tz::America::Santiago);
        assert_eq!(config.aggregation_interval, Duration::from_secs(300));
        assert_eq!(config.window, Duration::from_secs(30));
        assert_eq!(config.retention, Duration::from_secs(86_400));
        assert_eq!(config.delivery_timeout, Duration::from_secs(5));
        assert!(config.node_id.is_none());
    }

    #[test]
    fn test_custom_config() {
        let config = NodeConfig::from_lookup(lookup_from(&[
            ("NODE_DB_PATH", "/tmp/test.db"),
            ("CENTRAL_SERVER_URL", "http://localhost:8000/api/report"),
            ("TZ", "Europe/Madrid"),
            ("AGGREGATION_INTERVAL_SECS", "10"),
            ("AGGREGATION_WINDOW_SECS", "60"),
            ("NODE_ID", "node-7"),
        ]));

        assert_eq!(config.db_path, "/tmp/test.db");
        assert_eq!(config.collector_url, "http://localhost:8000/api/report");
        assert_eq!(config.timezone, chrono_tz::Europe::Madrid);
        assert_eq!(config.aggregation_interval, Duration::from_secs(10));
        assert_eq!(config.window, Duration::from_secs(60));
        assert_eq!(config.node_id.as_deref(), Some("node-7"));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = NodeConfig::from_lookup(lookup_from(&[
            ("TZ", "Mars/Olympus_Mons"),
            ("AGGREGATION_INTERVAL_SECS", "soon"),
            ("RETENTION_SECS", "0"),
            ("NODE_ID", "  "),
        ]));

        assert_eq!(config.timezone, Tz::UTC);
        assert_eq!(config.aggregation_interval, Duration::from_secs(300));
        assert_eq!(config.retention, Duration::from_secs(86_400));
        assert!(config.node_id.is_none());
    }
}
