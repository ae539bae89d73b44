use std::{error::Error, future::Future, time::Duration};
use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by storage backends regardless of the underlying database.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable: {message}")]
    /// The backend failed or could not be reached.
    Unavailable {
        /// What the backend was doing.
        message: String,
        /// Backend error.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    #[error("storage operation `{operation}` timed out after {elapsed:?}")]
    /// The operation exceeded its deadline.
    Timeout {
        /// Name of the timed-out operation.
        operation: &'static str,
        /// Deadline that was exceeded.
        elapsed: Duration,
    },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }
}

/// Run a storage operation with an upper bound on its duration, reporting an overrun as
/// [`StorageError::Timeout`].
pub async fn with_timeout<T, F>(operation: &'static str, limit: Duration, future: F) -> StorageResult<T>
where
    F: Future<Output = StorageResult<T>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(StorageError::Timeout {
            operation,
            elapsed: limit,
        }),
    }
}
