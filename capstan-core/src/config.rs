use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::pool::PoolOptions;
use sqlx::Postgres;

// A pool config object, designed to be passable across API boundaries. A Queue
// and each of its Workers build independent pools from the same config.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PoolConfig {
    pub db_url: String,
    pub max_connections: Option<u32>,         // Default to 10
    pub min_connections: Option<u32>,         // Default to 1
    pub acquire_timeout_seconds: Option<u64>, // Default to 30
    pub max_lifetime_seconds: Option<u64>,    // Default to 300
    pub idle_timeout_seconds: Option<u64>,    // Default to 60
}

impl PoolConfig {
    pub fn new(db_url: &str) -> Self {
        Self {
            db_url: db_url.to_owned(),
            max_connections: None,
            min_connections: None,
            acquire_timeout_seconds: None,
            max_lifetime_seconds: None,
            idle_timeout_seconds: None,
        }
    }

    pub(crate) fn pool_options(&self) -> PoolOptions<Postgres> {
        PoolOptions::new()
            .max_connections(self.max_connections.unwrap_or(10))
            .min_connections(self.min_connections.unwrap_or(1))
            .max_lifetime(Duration::from_secs(
                self.max_lifetime_seconds.unwrap_or(300),
            ))
            .idle_timeout(Duration::from_secs(self.idle_timeout_seconds.unwrap_or(60)))
            .acquire_timeout(Duration::from_secs(
                self.acquire_timeout_seconds.unwrap_or(30),
            ))
    }
}

/// Options for constructing a `Queue`.
#[derive(Debug, Clone, Copy)]
pub struct QueueOptions {
    /// Start the queue as soon as it is created.
    pub autostart: bool,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self { autostart: true }
    }
}

/// Options for constructing a `Worker`.
#[derive(Debug, Clone, Copy)]
pub struct WorkerOptions {
    /// Start the worker on creation if its queue is running.
    pub autostart: bool,
    /// Sleep between successful acquire+process cycles.
    pub processing_interval: Duration,
    /// Sleep after a cycle that found no job or errored.
    pub waiting_interval: Duration,
    /// Total attempts the processor gets per lease, the first included.
    pub max_retries: u32,
    /// Sleep between processor attempts.
    pub retry_interval: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            autostart: true,
            processing_interval: Duration::from_millis(0),
            waiting_interval: Duration::from_millis(1000),
            max_retries: 3,
            retry_interval: Duration::from_millis(500),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_options_defaults() {
        let options = WorkerOptions::default();

        assert!(options.autostart);
        assert_eq!(options.processing_interval, Duration::from_millis(0));
        assert_eq!(options.waiting_interval, Duration::from_millis(1000));
        assert_eq!(options.max_retries, 3);
        assert_eq!(options.retry_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_pool_config_round_trips_through_json() {
        let config = PoolConfig {
            db_url: "postgres://localhost/jobs".to_owned(),
            max_connections: Some(4),
            ..PoolConfig::new("postgres://localhost/jobs")
        };

        let serialized = serde_json::to_string(&config).unwrap();
        let deserialized: PoolConfig = serde_json::from_str(&serialized).unwrap();

        assert_eq!(deserialized.db_url, config.db_url);
        assert_eq!(deserialized.max_connections, Some(4));
        assert_eq!(deserialized.min_connections, None);
    }
}
