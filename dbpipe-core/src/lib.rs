pub mod cache;
pub mod condition;
pub mod config;
pub mod error;
pub mod mock;
pub mod pipeline;
pub mod query;
pub mod retry;
pub mod scope;
pub mod source;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod stream;
pub mod transaction;

pub use cache::QueryCache;
pub use condition::{CompareOp, Condition};
pub use config::{PipelineConfig, RetryConfig};
pub use error::{DataError, ErrorKind, Result};
pub use mock::{MockHandle, MockSource, MockStats};
pub use pipeline::{Pipeline, PipelineBuilder, Session, DEFAULT_BATCH_SIZE};
pub use query::{Batch, Query, Row, RowSet, Value};
pub use retry::RetryPolicy;
pub use scope::with_connection;
pub use source::{DataSource, RowCursor};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteHandle, SqliteSource};
pub use stream::{column_mean, filter_rows, stream_batches, BatchStream, FilterRows};
pub use tokio_util::sync::CancellationToken;
pub use transaction::with_transaction;
