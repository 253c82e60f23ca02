use thiserror::Error;

/// Enumeration of errors for operations on a queue.
/// Errors that can originate from sqlx are wrapped to carry the command that
/// failed, since every statement is built at runtime against a per-queue table.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("pool creation failed with: {error}")]
    PoolCreationError { error: sqlx::Error },
    #[error("connection failed with: {error}")]
    ConnectionError { error: sqlx::Error },
    #[error("{command} query failed with: {error}")]
    QueryError { command: String, error: sqlx::Error },
    #[error("could not serialize json payload: {error}")]
    SerializationError { error: serde_json::Error },
    #[error("transaction {command} failed with: {error}")]
    TransactionError { command: String, error: sqlx::Error },
    #[error("job {id} not found in queue '{queue}'")]
    JobNotFoundError { queue: String, id: i32 },
    #[error("Queue with name '{0}' already exists")]
    DuplicateQueueNameError(String),
    #[error("{0} is not a valid JobState")]
    ParseJobStateError(String),
}

/// The error a processor's final failed attempt is wrapped into. Its rendered
/// form is stored as the job's `errorMessage` and carried by `failed` events.
///
/// `attempts` counts every call, including the first; "retries" in the message
/// is kept for compatibility with that counting.
#[derive(Error, Debug)]
#[error("Function failed after {attempts} retries: {cause}")]
pub struct MaxRetriesError {
    pub attempts: u32,
    pub cause: anyhow::Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_retries_error_message_format() {
        let error = MaxRetriesError {
            attempts: 3,
            cause: anyhow::anyhow!("boom"),
        };

        assert_eq!(error.to_string(), "Function failed after 3 retries: boom");
    }

    #[test]
    fn test_duplicate_queue_name_message() {
        let error = QueueError::DuplicateQueueNameError("Q".to_owned());

        assert!(error.to_string().contains("Queue with name 'Q' already exists"));
    }
}
