use std::str::FromStr;

use sqlx::postgres::PgConnectOptions;
use sqlx::PgPool;

use crate::client::Client;
use crate::config::PoolConfig;
use crate::error::QueueError;

/// Owns the backend connections for one Queue or one Worker and hands out
/// short-lived `Client`s bound to a queue table. Holds no job state.
#[derive(Clone)]
pub struct Pool {
    pool: PgPool,
    /// Present when we built the pool ourselves; `sibling` uses it to give
    /// each Worker its own connections instead of sharing the Queue's.
    config: Option<PoolConfig>,
}

impl Pool {
    /// Build a pool from config. Connections are established lazily, so this
    /// performs no I/O and cannot observe an unreachable database.
    pub fn new(config: PoolConfig) -> Result<Self, QueueError> {
        let options = PgConnectOptions::from_str(&config.db_url)
            .map_err(|error| QueueError::PoolCreationError { error })?
            .application_name("capstan");
        let pool = config.pool_options().connect_lazy_with(options);

        Ok(Self {
            pool,
            config: Some(config),
        })
    }

    /// Adopt an externally owned `sqlx::PgPool`. Adopted pools are shared with
    /// the caller, so `close` leaves them open.
    pub fn from_pg_pool(pool: PgPool) -> Self {
        Self { pool, config: None }
    }

    /// Acquire one connection and bind it to `queue_name`'s table. The
    /// returned Client owns the connection until released.
    pub async fn get_client(&self, queue_name: &str) -> Result<Client, QueueError> {
        let conn = self
            .pool
            .acquire()
            .await
            .map_err(|error| QueueError::ConnectionError { error })?;

        Ok(Client::new(conn, queue_name))
    }

    /// Drain and close the pool. No-op for adopted pools.
    pub async fn close(&self) {
        if self.config.is_some() {
            self.pool.close().await;
        }
    }

    /// An independent pool over the same database for a Worker. Falls back to
    /// sharing the handle when this pool was adopted and no config is known.
    pub(crate) fn sibling(&self) -> Result<Pool, QueueError> {
        match &self.config {
            Some(config) => Pool::new(config.clone()),
            None => Ok(Self {
                pool: self.pool.clone(),
                config: None,
            }),
        }
    }
}
