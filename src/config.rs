//! Server Configuration
//!
//! Environment-derived settings for every component. Token validation
//! settings live in `network::auth::AuthConfig`, read from the same
//! environment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::events::log::TopicSpec;
use crate::events::types::{
    TOPIC_DEAD_LETTER, TOPIC_GAME_MOVE, TOPIC_MATCH_CREATED, TOPIC_QUEUE_EVENTS,
};

/// Default idle TTL for live sessions: two hours.
pub const DEFAULT_SESSION_TTL_SECS: u64 = 2 * 60 * 60;

/// Default AI oracle timeout: thirty seconds.
pub const DEFAULT_AI_TIMEOUT_SECS: u64 = 30;

/// Default partition count for the move and match topics.
pub const DEFAULT_EVENT_PARTITIONS: u32 = 3;

/// Default retention for the move and match topics, in days.
pub const DEFAULT_EVENT_RETENTION_DAYS: i64 = 7;

/// Retention for the dead-letter topic, in days.
pub const DEAD_LETTER_RETENTION_DAYS: i64 = 30;

/// Full server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Home of the embedded event log's segment files.
    pub event_data_dir: PathBuf,
    /// Home of the aggregator's snapshot store.
    pub state_dir: PathBuf,
    /// Idle TTL for live sessions.
    pub session_ttl: Duration,
    /// AI oracle base URL.
    pub ai_service_url: String,
    /// AI oracle hard timeout.
    pub ai_timeout: Duration,
    /// Partition count for move and match topics.
    pub event_partitions: u32,
    /// Retention for move and match topics.
    pub event_retention: chrono::Duration,
    /// REST bind address.
    pub http_addr: SocketAddr,
    /// WebSocket bind address.
    pub ws_addr: SocketAddr,
    /// Cadence of the janitor/sweeper/retention pass.
    pub maintenance_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            event_data_dir: PathBuf::from("./data/events"),
            state_dir: PathBuf::from("./data/state"),
            session_ttl: Duration::from_secs(DEFAULT_SESSION_TTL_SECS),
            ai_service_url: "http://localhost:5000".to_string(),
            ai_timeout: Duration::from_secs(DEFAULT_AI_TIMEOUT_SECS),
            event_partitions: DEFAULT_EVENT_PARTITIONS,
            event_retention: chrono::Duration::days(DEFAULT_EVENT_RETENTION_DAYS),
            http_addr: "0.0.0.0:8080".parse().expect("static addr"),
            ws_addr: "0.0.0.0:8081".parse().expect("static addr"),
            maintenance_interval: Duration::from_secs(60),
        }
    }
}

impl Config {
    /// Create config from environment variables, falling back to the
    /// defaults above.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            event_data_dir: env_path("GOMOKU_EVENT_DATA_DIR", defaults.event_data_dir),
            state_dir: env_path("GOMOKU_STATE_DIR", defaults.state_dir),
            session_ttl: env_secs("GOMOKU_SESSION_TTL_SECS", defaults.session_ttl),
            ai_service_url: std::env::var("GOMOKU_AI_SERVICE_URL")
                .unwrap_or(defaults.ai_service_url),
            ai_timeout: env_secs("GOMOKU_AI_TIMEOUT_SECS", defaults.ai_timeout),
            event_partitions: env_parse("GOMOKU_EVENT_PARTITIONS", defaults.event_partitions),
            event_retention: chrono::Duration::days(env_parse(
                "GOMOKU_EVENT_RETENTION_DAYS",
                DEFAULT_EVENT_RETENTION_DAYS,
            )),
            http_addr: env_parse("GOMOKU_HTTP_ADDR", defaults.http_addr),
            ws_addr: env_parse("GOMOKU_WS_ADDR", defaults.ws_addr),
            maintenance_interval: env_secs(
                "GOMOKU_MAINTENANCE_INTERVAL_SECS",
                defaults.maintenance_interval,
            ),
        }
    }

    /// Topic declarations for the embedded log. Queue events keep a
    /// single partition so their order is total; retention must outlive
    /// the aggregator's changelog horizon.
    pub fn topic_specs(&self) -> Vec<TopicSpec> {
        vec![
            TopicSpec::new(TOPIC_QUEUE_EVENTS, 1, self.event_retention),
            TopicSpec::new(TOPIC_MATCH_CREATED, self.event_partitions, self.event_retention),
            TopicSpec::new(TOPIC_GAME_MOVE, self.event_partitions, self.event_retention),
            TopicSpec::new(
                TOPIC_DEAD_LETTER,
                1,
                chrono::Duration::days(DEAD_LETTER_RETENTION_DAYS),
            ),
        ]
    }
}

fn env_path(name: &str, default: PathBuf) -> PathBuf {
    std::env::var(name).map(PathBuf::from).unwrap_or(default)
}

fn env_secs(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
