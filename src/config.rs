use anyhow::Result;
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::channel::KafkaSettings;
use crate::timeline::TimelineConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub kafka_bootstrap_servers: String,
    pub kafka_telemetry_topic: String,
    pub kafka_control_topic: String,
    pub kafka_group_id: String,
    pub kafka_auto_offset_reset: String,
    pub kafka_sasl_mechanism: String,
    pub kafka_username: String,
    pub kafka_password: String,
    pub kafka_security_protocol: String,
    pub kafka_max_retries: u32,
    pub kafka_circuit_breaker_cooldown: u64,
    pub database_url: String,
    pub log_level: String,
    pub fleet_org_id: String,
    pub status_summary_secs: u64,
    pub timeline_overspeed_kmh: f64,
    pub timeline_danger_speed_kmh: f64,
    pub timeline_min_trip_km: f64,
    pub timeline_max_idle_secs: i64,
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parsed_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        dotenv().ok();

        let db_host = var_or("DB_HOST", "localhost");
        let db_port = var_or("DB_PORT", "5432");
        let db_name = var_or("DB_DATABASE", "fleet");
        let db_user = var_or("DB_USER", "fleet");
        let db_pwd = var_or("DB_PWD", "fleet");
        let database_url = format!(
            "postgres://{}:{}@{}:{}/{}",
            db_user, db_pwd, db_host, db_port, db_name
        );

        let defaults = TimelineConfig::default();

        Ok(Self {
            kafka_bootstrap_servers: var_or("KAFKA_BOOTSTRAP_SERVERS", "localhost:9092"),
            kafka_telemetry_topic: var_or("KAFKA_TELEMETRY_TOPIC", "fleet-telemetry"),
            kafka_control_topic: var_or("KAFKA_CONTROL_TOPIC", "fleet-subscriptions"),
            kafka_group_id: var_or("KAFKA_GROUP_ID", "fleet-tracker"),
            kafka_auto_offset_reset: var_or("KAFKA_AUTO_OFFSET_RESET", "latest"),
            kafka_sasl_mechanism: var_or("KAFKA_SASL_MECHANISM", "SCRAM-SHA-256"),
            kafka_username: env::var("KAFKA_USERNAME").unwrap_or_default(),
            kafka_password: env::var("KAFKA_PASSWORD").unwrap_or_default(),
            kafka_security_protocol: var_or("KAFKA_SECURITY_PROTOCOL", "SASL_PLAINTEXT"),
            kafka_max_retries: parsed_or("KAFKA_MAX_RETRIES", 5),
            kafka_circuit_breaker_cooldown: parsed_or("KAFKA_CIRCUIT_BREAKER_COOLDOWN", 300),
            database_url,
            log_level: var_or("LOG_LEVEL", "info"),
            fleet_org_id: env::var("FLEET_ORG_ID").unwrap_or_default(),
            status_summary_secs: parsed_or("STATUS_SUMMARY_SECS", 60),
            timeline_overspeed_kmh: parsed_or("TIMELINE_OVERSPEED_KMH", defaults.overspeed_kmh),
            timeline_danger_speed_kmh: parsed_or("TIMELINE_DANGER_SPEED_KMH", defaults.danger_speed_kmh),
            timeline_min_trip_km: parsed_or("TIMELINE_MIN_TRIP_KM", defaults.min_overspeed_trip_km),
            timeline_max_idle_secs: parsed_or("TIMELINE_MAX_IDLE_SECS", defaults.max_idle.num_seconds()),
        })
    }

    pub fn kafka_settings(&self) -> KafkaSettings {
        KafkaSettings {
            bootstrap_servers: self.kafka_bootstrap_servers.clone(),
            telemetry_topic: self.kafka_telemetry_topic.clone(),
            control_topic: self.kafka_control_topic.clone(),
            group_id: self.kafka_group_id.clone(),
            auto_offset_reset: self.kafka_auto_offset_reset.clone(),
            security_protocol: self.kafka_security_protocol.clone(),
            sasl_mechanism: self.kafka_sasl_mechanism.clone(),
            username: self.kafka_username.clone(),
            password: self.kafka_password.clone(),
            max_retries: self.kafka_max_retries,
            circuit_breaker_cooldown: Duration::from_secs(self.kafka_circuit_breaker_cooldown),
        }
    }

    pub fn timeline_config(&self) -> TimelineConfig {
        TimelineConfig {
            overspeed_kmh: self.timeline_overspeed_kmh,
            danger_speed_kmh: self.timeline_danger_speed_kmh,
            min_overspeed_trip_km: self.timeline_min_trip_km,
            max_idle: chrono::Duration::seconds(self.timeline_max_idle_secs.max(0)),
        }
    }

    pub fn status_summary_interval(&self) -> Duration {
        Duration::from_secs(self.status_summary_secs.max(1))
    }
}
