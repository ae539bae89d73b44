use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};
use thiserror::Error;

/// Result alias for MongoDB operations.
pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

const DUPLICATE_KEY_CODE: i32 = 11000;

/// Failures of the MongoDB backend, converted to `StorageError` at the trait boundary.
#[derive(Debug, Error)]
pub enum MongoDaoError {
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    /// The connection string could not be parsed.
    InvalidUri {
        /// Rejected connection string.
        uri: String,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    #[error("failed to build MongoDB client from options")]
    /// The driver refused the parsed options.
    ClientConstruction {
        /// Driver error.
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    /// The server never answered during startup.
    InitialPing {
        /// Pings sent before giving up.
        attempts: u32,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping health check failed")]
    /// A periodic health ping failed.
    HealthPing {
        /// Driver error.
        #[source]
        source: MongoError,
    },
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    /// A unique index could not be created.
    EnsureIndex {
        /// Collection the index belongs to.
        collection: &'static str,
        /// Index name.
        index: &'static str,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    #[error("failed to upsert pixel ({x}, {y})")]
    /// A cell write failed.
    UpsertPixel {
        /// Column of the cell.
        x: i32,
        /// Row of the cell.
        y: i32,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    #[error("upsert of pixel ({x}, {y}) returned no document")]
    /// An upsert returned no document.
    MissingPixel {
        /// Column of the cell.
        x: i32,
        /// Row of the cell.
        y: i32,
    },
    #[error("failed to load pixels")]
    /// The full scan failed.
    LoadPixels {
        /// Driver error.
        #[source]
        source: MongoError,
    },
    #[error("failed to clear pixels")]
    /// The reset failed.
    ClearPixels {
        /// Driver error.
        #[source]
        source: MongoError,
    },
    #[error("failed to save user `{user_id}`")]
    /// A user record write failed.
    SaveUser {
        /// Identity of the record.
        user_id: String,
        /// Driver error.
        #[source]
        source: MongoError,
    },
}

/// Whether `err` reports a unique index violation, which concurrent upserts on the same
/// coordinate can raise before one of them wins the insert.
pub fn is_duplicate_key(err: &MongoError) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Command(command) => command.code == DUPLICATE_KEY_CODE,
        ErrorKind::Write(WriteFailure::WriteError(write)) => write.code == DUPLICATE_KEY_CODE,
        _ => false,
    }
}
