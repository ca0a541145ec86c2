//! Runtime configuration.
//!
//! A plain struct of the knobs recognised by the protocol, with the
//! documented defaults, loaded from environment variables when present.

use std::time::Duration;

/// Recognised configuration options.
#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string for the Operation Log / Element Store.
    pub database_url: String,
    /// Redis connection string for the cross-replica pub/sub bus. `None`
    /// runs the in-process `ReplicaBus` fake (single-replica mode).
    pub redis_url: Option<String>,
    /// Address the `/ws` upgrade endpoint binds to.
    pub bind_addr: String,

    pub max_clients_per_room: usize,
    pub session_outbound_queue: usize,
    pub room_cleanup_interval: Duration,
    pub ping_period: Duration,
    pub pong_wait: Duration,
    pub write_wait: Duration,
    pub max_frame_bytes: usize,
    pub sync_batch_limit: usize,
    pub shutdown_drain: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/hertzboard".to_string(),
            redis_url: None,
            bind_addr: "0.0.0.0:8080".to_string(),
            max_clients_per_room: 100,
            session_outbound_queue: 256,
            room_cleanup_interval: Duration::from_secs(5 * 60),
            ping_period: Duration::from_secs(54),
            pong_wait: Duration::from_secs(60),
            write_wait: Duration::from_secs(10),
            max_frame_bytes: 512 * 1024,
            sync_batch_limit: 1000,
            shutdown_drain: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Load configuration from the environment, falling back to defaults
    /// for any knob that isn't set.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            database_url: std::env::var("HERTZBOARD_DATABASE_URL")
                .unwrap_or(defaults.database_url),
            redis_url: std::env::var("HERTZBOARD_REDIS_URL").ok(),
            bind_addr: std::env::var("HERTZBOARD_BIND_ADDR").unwrap_or(defaults.bind_addr),
            max_clients_per_room: env_usize(
                "HERTZBOARD_MAX_CLIENTS_PER_ROOM",
                defaults.max_clients_per_room,
            ),
            session_outbound_queue: env_usize(
                "HERTZBOARD_SESSION_OUTBOUND_QUEUE",
                defaults.session_outbound_queue,
            ),
            room_cleanup_interval: env_secs(
                "HERTZBOARD_ROOM_CLEANUP_INTERVAL_SECS",
                defaults.room_cleanup_interval,
            ),
            ping_period: env_secs("HERTZBOARD_PING_PERIOD_SECS", defaults.ping_period),
            pong_wait: env_secs("HERTZBOARD_PONG_WAIT_SECS", defaults.pong_wait),
            write_wait: env_secs("HERTZBOARD_WRITE_WAIT_SECS", defaults.write_wait),
            max_frame_bytes: env_usize("HERTZBOARD_MAX_FRAME_BYTES", defaults.max_frame_bytes),
            sync_batch_limit: env_usize("HERTZBOARD_SYNC_BATCH_LIMIT", defaults.sync_batch_limit),
            shutdown_drain: defaults.shutdown_drain,
        }
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = Config::default();
        assert_eq!(config.max_clients_per_room, 100);
        assert_eq!(config.session_outbound_queue, 256);
        assert_eq!(config.ping_period, Duration::from_secs(54));
        assert_eq!(config.pong_wait, Duration::from_secs(60));
        assert_eq!(config.write_wait, Duration::from_secs(10));
        assert_eq!(config.max_frame_bytes, 512 * 1024);
        assert_eq!(config.sync_batch_limit, 1000);
    }
}
