use std::cmp::Ordering;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// Priority assigned to a job when the caller does not provide one.
pub const DEFAULT_PRIORITY: i32 = 5;

/// Enumeration of possible states for a Job, backed by the `job_state`
/// PostgreSQL enum type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "job_state", rename_all = "lowercase")]
pub enum JobState {
    /// A job sitting in the queue, eligible for leasing by a worker.
    Waiting,
    /// A job currently leased by a worker.
    Active,
    /// A job whose processor finished successfully. Terminal.
    Completed,
    /// A job whose processor exhausted its attempts. Terminal.
    Failed,
}

impl JobState {
    /// Every state, in lifecycle order.
    pub const ALL: [JobState; 4] = [
        JobState::Waiting,
        JobState::Active,
        JobState::Completed,
        JobState::Failed,
    ];

    /// The lowercase form used in SQL and event payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Allow casting JobState from strings.
impl FromStr for JobState {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(JobState::Waiting),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            invalid => Err(QueueError::ParseJobStateError(invalid.to_owned())),
        }
    }
}

/// Payloads are stored and read to and from a JSON field, so we accept anything
/// that fits `sqlx::types::Json`.
pub type JobPayload<J> = sqlx::types::Json<J>;

/// One persisted unit of work: a row in the queue's table.
#[derive(sqlx::FromRow, Debug, Clone)]
pub struct Job<J> {
    /// A unique id identifying a job, assigned by the database on insert.
    pub id: i32,
    /// The caller-supplied payload, stored as JSON.
    pub payload: JobPayload<J>,
    /// The current state of the job.
    pub state: JobState,
    /// Dequeue rank. Higher runs earlier.
    pub priority: i32,
    /// Set when the job transitions to `failed`; NULL otherwise.
    #[sqlx(rename = "errorMessage")]
    pub error_message: Option<String>,
    /// When the row was inserted, millisecond precision.
    #[sqlx(rename = "createdAt")]
    pub created_at: NaiveDateTime,
    /// When the row last changed state, maintained by a trigger.
    #[sqlx(rename = "updatedAt")]
    pub updated_at: NaiveDateTime,
}

impl<J> Job<J> {
    /// The total order workers lease jobs in: priority descending, then
    /// creation time ascending, then id ascending. This is the semantic
    /// contract behind the ORDER BY clause of the acquire query and the
    /// dequeue index.
    pub fn dequeue_order(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.created_at.cmp(&other.created_at))
            .then_with(|| self.id.cmp(&other.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::DateTime;

    fn job(id: i32, priority: i32, created_ms: i64) -> Job<serde_json::Value> {
        Job {
            id,
            payload: sqlx::types::Json(serde_json::json!({})),
            state: JobState::Waiting,
            priority,
            error_message: None,
            created_at: DateTime::from_timestamp_millis(created_ms)
                .expect("valid timestamp")
                .naive_utc(),
            updated_at: DateTime::from_timestamp_millis(created_ms)
                .expect("valid timestamp")
                .naive_utc(),
        }
    }

    #[test]
    fn test_dequeue_order_prefers_higher_priority() {
        let low = job(1, 3, 0);
        let high = job(2, 5, 10);

        let mut jobs = vec![low, high];
        jobs.sort_by(|a, b| a.dequeue_order(b));

        assert_eq!(jobs[0].id, 2);
        assert_eq!(jobs[1].id, 1);
    }

    #[test]
    fn test_dequeue_order_breaks_priority_ties_by_creation_time() {
        let older = job(7, 5, 100);
        let newer = job(3, 5, 200);

        assert_eq!(older.dequeue_order(&newer), Ordering::Less);
        assert_eq!(newer.dequeue_order(&older), Ordering::Greater);
    }

    #[test]
    fn test_dequeue_order_breaks_full_ties_by_id() {
        let first = job(1, 5, 100);
        let second = job(2, 5, 100);

        assert_eq!(first.dequeue_order(&second), Ordering::Less);
    }

    #[test]
    fn test_job_state_round_trips_through_strings() {
        for state in JobState::ALL {
            assert_eq!(state.as_str().parse::<JobState>().unwrap(), state);
        }

        assert!("paused".parse::<JobState>().is_err());
    }
}
