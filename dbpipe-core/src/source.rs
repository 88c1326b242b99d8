//! The data source seam.
//!
//! A [`DataSource`] hands out exclusive handles and executes queries on them.
//! How the source is reached (driver, network) is up to the implementation;
//! see [`crate::sqlite::SqliteSource`] and [`crate::mock::MockSource`].

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;
use crate::query::{Query, Row};

/// Lazy row cursor borrowing the handle it runs on.
///
/// `StreamExt::next` is "next row"; `None` is end of data.
pub type RowCursor<'h> = BoxStream<'h, Result<Row>>;

#[async_trait]
pub trait DataSource: Send + Sync {
    /// Exclusive access token to one live connection
    type Handle: Send;

    /// Open a handle. Fails with [`crate::DataError::Connection`].
    async fn acquire(&self) -> Result<Self::Handle>;

    /// Give a handle back. Best-effort; callers log failures.
    async fn release(&self, handle: Self::Handle) -> Result<()>;

    /// Run `query` and return a cursor over its rows.
    async fn execute<'h>(
        &'h self,
        handle: &'h mut Self::Handle,
        query: &'h Query,
    ) -> Result<RowCursor<'h>>;

    async fn begin(&self, handle: &mut Self::Handle) -> Result<()>;

    async fn commit(&self, handle: &mut Self::Handle) -> Result<()>;

    async fn rollback(&self, handle: &mut Self::Handle) -> Result<()>;
}
