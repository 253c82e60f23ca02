//! Every SQL statement in the crate lives here. A `Client` binds one pooled
//! connection to one queue's table for the duration of a logical operation.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::pool::PoolConnection;
use sqlx::Postgres;

use crate::error::QueueError;
use crate::types::{Job, JobState};

/// PostgreSQL codes signalling "object already exists": unique_violation
/// (raised by concurrent CREATE TYPE) and duplicate_object. `init_queue_data`
/// swallows exactly these and rethrows everything else.
const OBJECT_EXISTS_CODES: [&str; 2] = ["23505", "42710"];

/// A short-lived handle over one connection, bound to one queue's table.
/// Must be released (or dropped) on every exit path; dropping returns the
/// connection to its pool.
pub struct Client {
    conn: PoolConnection<Postgres>,
    queue_name: String,
}

impl Client {
    pub(crate) fn new(conn: PoolConnection<Postgres>, queue_name: &str) -> Self {
        Self {
            conn,
            queue_name: queue_name.to_owned(),
        }
    }

    /// Ensure the queue's DDL exists: the `job_state` enum, the table named
    /// after the queue, the dequeue index, and the trigger keeping
    /// `"updatedAt"` current. Safe to re-run against an initialised queue.
    pub async fn init_queue_data(&mut self) -> Result<(), QueueError> {
        // Bind parameters can't name identifiers, so the table name is
        // formatted into each statement here and below.
        let create_type =
            r#"CREATE TYPE job_state AS ENUM ('waiting', 'active', 'completed', 'failed')"#;

        let create_table = format!(
            r#"
CREATE TABLE IF NOT EXISTS "{0}" (
    id SERIAL PRIMARY KEY,
    payload JSON NOT NULL,
    state job_state NOT NULL DEFAULT 'waiting',
    priority INTEGER NOT NULL DEFAULT 5,
    "errorMessage" TEXT,
    "createdAt" TIMESTAMP(3) NOT NULL DEFAULT CURRENT_TIMESTAMP(3),
    "updatedAt" TIMESTAMP(3) NOT NULL DEFAULT CURRENT_TIMESTAMP(3)
)
            "#,
            &self.queue_name
        );

        let create_index = format!(
            r#"
CREATE INDEX IF NOT EXISTS "{0}_dequeue_idx"
ON "{0}" (state, priority DESC, "createdAt" ASC, id ASC)
            "#,
            &self.queue_name
        );

        let create_function = r#"
CREATE OR REPLACE FUNCTION update_modified_column() RETURNS TRIGGER AS $$
BEGIN
    NEW."updatedAt" = NOW();
    RETURN NEW;
END;
$$ LANGUAGE plpgsql
        "#;

        let create_trigger = format!(
            r#"
CREATE TRIGGER update_modified_column_trigger
BEFORE UPDATE ON "{0}"
FOR EACH ROW EXECUTE FUNCTION update_modified_column()
            "#,
            &self.queue_name
        );

        self.execute_ddl(create_type).await?;
        self.execute_ddl(&create_table).await?;
        self.execute_ddl(&create_index).await?;
        self.execute_ddl(create_function).await?;
        self.execute_ddl(&create_trigger).await?;

        Ok(())
    }

    /// Insert a job row and return it fully populated (id and timestamps are
    /// filled in by the database).
    pub async fn insert_job<J>(
        &mut self,
        payload: &J,
        state: JobState,
        priority: i32,
    ) -> Result<Job<J>, QueueError>
    where
        J: Serialize + DeserializeOwned + Send + Unpin + 'static,
    {
        let payload = serde_json::to_string(payload)
            .map_err(|error| QueueError::SerializationError { error })?;

        let base_query = format!(
            r#"
INSERT INTO "{0}"
    (payload, state, priority)
VALUES
    ($1::json, $2::job_state, $3)
RETURNING
    "{0}".*
            "#,
            &self.queue_name
        );

        sqlx::query_as(&base_query)
            .bind(payload)
            .bind(state.as_str())
            .bind(priority)
            .fetch_one(&mut *self.conn)
            .await
            .map_err(|error| QueueError::QueryError {
                command: "INSERT".to_owned(),
                error,
            })
    }

    /// Atomically lease the next waiting job and flip it to `active`.
    ///
    /// Runs as one explicit transaction: the waiting row is picked with
    /// `FOR UPDATE SKIP LOCKED`, so two workers polling concurrently never
    /// receive the same job and neither blocks on the other. Row locks are
    /// released at COMMIT, before the processor runs. Returns `Ok(None)` when
    /// no waiting job is available.
    pub async fn acquire_job<J>(&mut self) -> Result<Option<Job<J>>, QueueError>
    where
        J: DeserializeOwned + Send + Unpin + 'static,
    {
        self.begin_transaction().await?;

        let select_query = format!(
            r#"
SELECT
    *
FROM
    "{0}"
WHERE
    state = 'waiting'
ORDER BY
    priority DESC,
    "createdAt" ASC,
    id ASC
LIMIT 1
FOR UPDATE SKIP LOCKED
            "#,
            &self.queue_name
        );

        let waiting: Option<Job<J>> = match sqlx::query_as(&select_query)
            .fetch_optional(&mut *self.conn)
            .await
        {
            Ok(row) => row,
            Err(error) => {
                self.rollback_quietly().await;
                return Err(QueueError::QueryError {
                    command: "SELECT".to_owned(),
                    error,
                });
            }
        };

        let Some(job) = waiting else {
            self.rollback_transaction().await?;
            return Ok(None);
        };

        let update_query = format!(
            r#"
UPDATE
    "{0}"
SET
    state = 'active'::job_state
WHERE
    id = $1
RETURNING
    "{0}".*
            "#,
            &self.queue_name
        );

        match sqlx::query_as(&update_query)
            .bind(job.id)
            .fetch_one(&mut *self.conn)
            .await
        {
            Ok(leased) => {
                self.commit_transaction().await?;
                Ok(Some(leased))
            }
            Err(error) => {
                self.rollback_quietly().await;
                Err(QueueError::QueryError {
                    command: "UPDATE".to_owned(),
                    error,
                })
            }
        }
    }

    /// Move a job to `state` and return the updated row. `error_message` is
    /// written on every call: the failure text on `failed` transitions, NULL
    /// otherwise, so a completed job never carries a stale message.
    pub async fn update_job_state_by_id<J>(
        &mut self,
        id: i32,
        state: JobState,
        error_message: Option<&str>,
    ) -> Result<Job<J>, QueueError>
    where
        J: DeserializeOwned + Send + Unpin + 'static,
    {
        let base_query = format!(
            r#"
UPDATE
    "{0}"
SET
    state = $1::job_state,
    "errorMessage" = $2
WHERE
    id = $3
RETURNING
    "{0}".*
            "#,
            &self.queue_name
        );

        let updated: Option<Job<J>> = sqlx::query_as(&base_query)
            .bind(state.as_str())
            .bind(error_message)
            .bind(id)
            .fetch_optional(&mut *self.conn)
            .await
            .map_err(|error| QueueError::QueryError {
                command: "UPDATE".to_owned(),
                error,
            })?;

        updated.ok_or_else(|| QueueError::JobNotFoundError {
            queue: self.queue_name.clone(),
            id,
        })
    }

    /// Count jobs per state in one aggregate query. States with no rows are
    /// reported as zero; an empty `states` slice counts all four.
    pub async fn count_jobs_by_state(
        &mut self,
        states: &[JobState],
    ) -> Result<HashMap<JobState, i64>, QueueError> {
        let requested: &[JobState] = if states.is_empty() {
            &JobState::ALL
        } else {
            states
        };

        let base_query = format!(
            r#"
SELECT
    state::text AS state,
    COUNT(*) AS count
FROM
    "{0}"
WHERE
    state IN ({1})
GROUP BY
    state
            "#,
            &self.queue_name,
            state_list(requested)
        );

        let rows: Vec<(String, i64)> = sqlx::query_as(&base_query)
            .fetch_all(&mut *self.conn)
            .await
            .map_err(|error| QueueError::QueryError {
                command: "SELECT".to_owned(),
                error,
            })?;

        let mut counts: HashMap<JobState, i64> =
            requested.iter().map(|state| (*state, 0)).collect();
        for (state, count) in rows {
            counts.insert(state.parse()?, count);
        }

        Ok(counts)
    }

    /// Delete every job in the given states.
    pub async fn delete_jobs_by_state(&mut self, states: &[JobState]) -> Result<(), QueueError> {
        let base_query = format!(
            r#"DELETE FROM "{0}" WHERE state IN ({1})"#,
            &self.queue_name,
            state_list(states)
        );

        sqlx::query(&base_query)
            .execute(&mut *self.conn)
            .await
            .map_err(|error| QueueError::QueryError {
                command: "DELETE".to_owned(),
                error,
            })?;

        Ok(())
    }

    pub async fn begin_transaction(&mut self) -> Result<(), QueueError> {
        self.transaction_command("BEGIN").await
    }

    pub async fn commit_transaction(&mut self) -> Result<(), QueueError> {
        self.transaction_command("COMMIT").await
    }

    pub async fn rollback_transaction(&mut self) -> Result<(), QueueError> {
        self.transaction_command("ROLLBACK").await
    }

    /// Return the connection to its pool. Dropping the Client has the same
    /// effect; sqlx rolls back any transaction still open on the connection.
    pub fn release(self) {
        drop(self.conn);
    }

    async fn transaction_command(&mut self, command: &str) -> Result<(), QueueError> {
        sqlx::query(command)
            .execute(&mut *self.conn)
            .await
            .map_err(|error| QueueError::TransactionError {
                command: command.to_owned(),
                error,
            })?;

        Ok(())
    }

    /// Best-effort rollback on an error path that is already propagating a
    /// more interesting error.
    async fn rollback_quietly(&mut self) {
        if let Err(error) = self.rollback_transaction().await {
            tracing::error!(queue = %self.queue_name, "rollback after failed acquire failed: {}", error);
        }
    }

    async fn execute_ddl(&mut self, statement: &str) -> Result<(), QueueError> {
        match sqlx::query(statement).execute(&mut *self.conn).await {
            Ok(_) => Ok(()),
            Err(error) => {
                if object_already_exists(&error) {
                    return Ok(());
                }
                Err(QueueError::QueryError {
                    command: "DDL".to_owned(),
                    error,
                })
            }
        }
    }
}

fn object_already_exists(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db_error) => db_error
            .code()
            .is_some_and(|code| OBJECT_EXISTS_CODES.contains(&code.as_ref())),
        _ => false,
    }
}

fn state_list(states: &[JobState]) -> String {
    states
        .iter()
        .map(|state| format!("'{state}'::job_state"))
        .collect::<Vec<_>>()
        .join(", ")
}
