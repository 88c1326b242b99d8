/// Structured error types for dbpipe-core.
///
/// Every failure path of the pipeline is a variant of [`DataError`], so callers
/// can match on the kind instead of inspecting messages. Binary crates
/// (dbpipe-cli) wrap these in `anyhow` at the edge.
use std::error::Error as StdError;
use thiserror::Error;

/// Boxed error used as the underlying cause of a [`DataError`].
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Main error type for pipeline operations
#[derive(Error, Debug)]
pub enum DataError {
    /// A handle could not be acquired or released
    #[error("connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Execution failed against the data source
    #[error("query error: {message}")]
    Query {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Begin, commit or rollback failed
    #[error("transaction error: {message}")]
    Transaction {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// The operation failed and the rollback issued afterwards failed too.
    /// `cause` is the original failure; `rollback` is the cleanup failure.
    #[error("{cause} (rollback also failed: {rollback})")]
    RollbackFailed {
        #[source]
        cause: Box<DataError>,
        rollback: Box<DataError>,
    },

    /// Caller-issued cancellation
    #[error("operation cancelled")]
    Cancelled,

    /// Invalid configuration
    #[error("configuration error: {reason}")]
    Config { reason: String },

    /// Failure raised by caller code running inside an operation
    #[error("operation failed: {0}")]
    Operation(#[source] BoxError),
}

/// Discriminant of a [`DataError`], for matching without borrowing payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Connection,
    Query,
    Transaction,
    Cancelled,
    Config,
    Operation,
}

/// Result type alias for dbpipe-core operations
pub type Result<T> = std::result::Result<T, DataError>;

impl DataError {
    /// Create a connection error without an underlying cause
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error wrapping its cause
    pub fn connection_with(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a query error without an underlying cause
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            source: None,
        }
    }

    /// Create a query error wrapping its cause
    pub fn query_with(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Query {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a transaction error without an underlying cause
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
            source: None,
        }
    }

    /// Create a transaction error wrapping its cause
    pub fn transaction_with(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Transaction {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a config error
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Wrap a failure from caller code
    pub fn operation(source: impl Into<BoxError>) -> Self {
        Self::Operation(source.into())
    }

    /// Chain a rollback failure onto the failure that triggered the rollback
    pub fn rollback_failed(cause: DataError, rollback: DataError) -> Self {
        Self::RollbackFailed {
            cause: Box::new(cause),
            rollback: Box::new(rollback),
        }
    }

    /// The failure that started it all, looking through cleanup chaining.
    pub fn root_cause(&self) -> &DataError {
        match self {
            Self::RollbackFailed { cause, .. } => cause.root_cause(),
            other => other,
        }
    }

    /// Kind of the root cause
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RollbackFailed { cause, .. } => cause.kind(),
            Self::Connection { .. } => ErrorKind::Connection,
            Self::Query { .. } => ErrorKind::Query,
            Self::Transaction { .. } => ErrorKind::Transaction,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Config { .. } => ErrorKind::Config,
            Self::Operation(_) => ErrorKind::Operation,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
