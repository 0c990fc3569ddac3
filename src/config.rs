use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use dotenvy::dotenv;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub kafka_bootstrap_servers: String,
    pub kafka_topic: String,
    pub kafka_updates_topic: Option<String>,
    pub kafka_group_id: String,
    pub kafka_auto_offset_reset: String,
    pub kafka_sasl_mechanism: String,
    pub kafka_username: String,
    pub kafka_password: String,
    pub kafka_security_protocol: String,
    pub kafka_max_retries: u32,
    pub kafka_circuit_breaker_cooldown: u64,
    pub database_url: String,
    pub db_max_connections: u32,
    pub ingest_gate_permits: usize,
    pub ingest_gate_timeout_ms: u64,
    pub broadcast_flush_interval_ms: u64,
    pub broadcast_max_pending: usize,
    pub broadcast_channel_capacity: usize,
    pub device_active_threshold_secs: i64,
    pub history_default_limit: i64,
    pub history_max_limit: i64,
    pub log_level: String,
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parsed_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        dotenv().ok();

        let kafka_bootstrap_servers = var_or("KAFKA_BOOTSTRAP_SERVERS", "localhost:9092");
        let kafka_topic = var_or("KAFKA_TOPIC", "geotrack-telemetry");
        let kafka_updates_topic = env::var("KAFKA_UPDATES_TOPIC")
            .ok()
            .filter(|t| !t.trim().is_empty());
        let kafka_group_id = var_or("KAFKA_GROUP_ID", "geotrack-ingest");
        let kafka_auto_offset_reset = var_or("KAFKA_AUTO_OFFSET_RESET", "latest");
        let kafka_sasl_mechanism = var_or("KAFKA_SASL_MECHANISM", "SCRAM-SHA-256");
        let kafka_username = env::var("KAFKA_USERNAME").unwrap_or_default();
        let kafka_password = env::var("KAFKA_PASSWORD").unwrap_or_default();
        let kafka_security_protocol = var_or("KAFKA_SECURITY_PROTOCOL", "SASL_PLAINTEXT");
        let kafka_max_retries = parsed_or("KAFKA_MAX_RETRIES", 5);
        let kafka_circuit_breaker_cooldown = parsed_or("KAFKA_CIRCUIT_BREAKER_COOLDOWN", 300);

        let db_host = var_or("DB_HOST", "localhost");
        let db_port = var_or("DB_PORT", "5432");
        let db_name = var_or("DB_DATABASE", "geotrack");
        let db_user = var_or("DB_USER", "geotrack");
        let db_pwd = var_or("DB_PWD", "geotrack");

        let database_url = format!(
            "postgres://{}:{}@{}:{}/{}",
            db_user, db_pwd, db_host, db_port, db_name
        );

        Ok(Self {
            kafka_bootstrap_servers,
            kafka_topic,
            kafka_updates_topic,
            kafka_group_id,
            kafka_auto_offset_reset,
            kafka_sasl_mechanism,
            kafka_username,
            kafka_password,
            kafka_security_protocol,
            kafka_max_retries,
            kafka_circuit_breaker_cooldown,
            database_url,
            db_max_connections: parsed_or("DB_MAX_CONNECTIONS", 50),
            ingest_gate_permits: parsed_or("INGEST_GATE_PERMITS", 4),
            ingest_gate_timeout_ms: parsed_or("INGEST_GATE_TIMEOUT_MS", 200),
            broadcast_flush_interval_ms: parsed_or("BROADCAST_FLUSH_INTERVAL_MS", 200),
            broadcast_max_pending: parsed_or("BROADCAST_MAX_PENDING", 10_000),
            broadcast_channel_capacity: parsed_or("BROADCAST_CHANNEL_CAPACITY", 1024),
            device_active_threshold_secs: parsed_or("DEVICE_ACTIVE_THRESHOLD_SECS", 120),
            history_default_limit: parsed_or("HISTORY_DEFAULT_LIMIT", 1000),
            history_max_limit: parsed_or("HISTORY_MAX_LIMIT", 5000),
            log_level: var_or("LOG_LEVEL", "info"),
        })
    }

    pub fn gate_timeout(&self) -> Duration {
        Duration::from_millis(self.ingest_gate_timeout_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast_flush_interval_ms.max(1))
    }

    pub fn active_threshold(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.device_active_threshold_secs)
    }

    pub fn history_limits(&self) -> crate::query::HistoryLimits {
        crate::query::HistoryLimits {
            default_limit: self.history_default_limit,
            max_limit: self.history_max_limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parsed_or_falls_back_on_garbage() {
        env::set_var("GEOTRACK_TEST_PERMITS", "not-a-number");
        assert_eq!(parsed_or("GEOTRACK_TEST_PERMITS", 4usize), 4);

        env::set_var("GEOTRACK_TEST_PERMITS", " 8 ");
        assert_eq!(parsed_or("GEOTRACK_TEST_PERMITS", 4usize), 8);

        env::remove_var("GEOTRACK_TEST_PERMITS");
        assert_eq!(parsed_or("GEOTRACK_TEST_PERMITS", 4usize), 4);
    }
}
