//! Composed data-access pipeline.
//!
//! A [`Pipeline`] wires the building blocks together around one
//! [`DataSource`]:
//!
//! ```text
//! fetch_all ──► QueryCache ──► query
//! query     ──► with_connection ──► RetryPolicy ──► execute + collect
//! transact  ──► with_connection ──► RetryPolicy ──► with_transaction ──► op
//! stream    ──► with_connection ──► execute ──► BatchStream ──► consume
//! ```
//!
//! Retries happen inside the connection scope, so every attempt reuses the
//! handle acquired for the call. Each call acquires its own handle; calls
//! never share one.

use std::sync::Arc;

use futures::future::try_join_all;
use futures::TryStreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::cache::QueryCache;
use crate::config::PipelineConfig;
use crate::error::{DataError, Result};
use crate::query::{Query, Row, RowSet};
use crate::retry::RetryPolicy;
use crate::scope::with_connection;
use crate::source::DataSource;
use crate::stream::{column_mean, filter_rows, stream_batches, BatchStream};
use crate::transaction::with_transaction;

/// Rows per batch when nothing else is configured
pub const DEFAULT_BATCH_SIZE: usize = 100;

fn log_query(query: &Query) {
    debug!(
        query = %query,
        positional = ?query.positional(),
        named = ?query.named(),
        "executing query"
    );
}

async fn collect_rows<S>(source: &S, handle: &mut S::Handle, query: &Query) -> Result<RowSet>
where
    S: DataSource + ?Sized,
{
    log_query(query);
    let rows: Vec<Row> = source.execute(handle, query).await?.try_collect().await?;
    debug!(rows = rows.len(), "query returned");
    Ok(rows.into())
}

/// A source together with one of its live handles, lent to operations run
/// through [`Pipeline::with_connection`] and [`Pipeline::transact`].
pub struct Session<'a, S: DataSource + ?Sized> {
    source: &'a S,
    handle: &'a mut S::Handle,
}

impl<'a, S: DataSource + ?Sized> Session<'a, S> {
    pub fn new(source: &'a S, handle: &'a mut S::Handle) -> Self {
        Self { source, handle }
    }

    /// Execute `query` and collect every row.
    pub async fn fetch(&mut self, query: &Query) -> Result<RowSet> {
        collect_rows(self.source, &mut *self.handle, query).await
    }

    /// Execute `query`, discarding its rows. Returns how many were produced.
    pub async fn execute(&mut self, query: &Query) -> Result<usize> {
        log_query(query);
        let cursor = self.source.execute(&mut *self.handle, query).await?;
        cursor
            .try_fold(0, |n, _| async move { Ok::<_, DataError>(n + 1) })
            .await
    }

    pub fn source(&self) -> &S {
        self.source
    }

    pub fn handle(&mut self) -> &mut S::Handle {
        &mut *self.handle
    }
}

/// Builder for [`Pipeline`].
#[derive(Debug)]
pub struct PipelineBuilder<S> {
    source: Arc<S>,
    retry: RetryPolicy,
    batch_size: usize,
    cancel: Option<CancellationToken>,
}

impl<S: DataSource> PipelineBuilder<S> {
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Share an existing token instead of creating a fresh one
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn build(self) -> Result<Pipeline<S>> {
        if self.batch_size == 0 {
            return Err(DataError::config("batch_size must be at least 1"));
        }
        Ok(Pipeline {
            source: self.source,
            retry: self.retry,
            cache: QueryCache::new(),
            batch_size: self.batch_size,
            cancel: self.cancel.unwrap_or_default(),
        })
    }
}

#[derive(Debug)]
pub struct Pipeline<S> {
    source: Arc<S>,
    retry: RetryPolicy,
    cache: QueryCache<RowSet>,
    batch_size: usize,
    cancel: CancellationToken,
}

impl<S: DataSource> Pipeline<S> {
    /// Pipeline with the default retry policy and batch size.
    pub fn new(source: Arc<S>) -> Self {
        Self {
            source,
            retry: RetryPolicy::default(),
            cache: QueryCache::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            cancel: CancellationToken::new(),
        }
    }

    pub fn builder(source: Arc<S>) -> PipelineBuilder<S> {
        PipelineBuilder {
            source,
            retry: RetryPolicy::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            cancel: None,
        }
    }

    pub fn from_config(source: Arc<S>, config: &PipelineConfig) -> Result<Self> {
        config.validate()?;
        Self::builder(source)
            .retry(config.retry.policy())
            .batch_size(config.batch_size)
            .build()
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn cache(&self) -> &QueryCache<RowSet> {
        &self.cache
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cancel pending acquisitions and retry delays of every call on this
    /// pipeline, now and later.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Run `operation` on a freshly acquired handle, releasing it afterwards.
    pub async fn with_connection<T>(
        &self,
        operation: impl AsyncFnOnce(&mut Session<'_, S>) -> Result<T>,
    ) -> Result<T> {
        let source = &*self.source;
        with_connection(source, &self.cancel, async |handle: &mut S::Handle| {
            let mut session = Session::new(source, handle);
            operation(&mut session).await
        })
        .await
    }

    /// Execute one query on its own connection and collect the rows.
    /// No retry and no cache.
    #[instrument(skip_all, fields(query = %query))]
    pub async fn execute_query(&self, query: &Query) -> Result<RowSet> {
        self.with_connection(async |session: &mut Session<'_, S>| session.fetch(query).await)
            .await
    }

    /// Execute and collect `query`, retrying failed attempts on the same
    /// connection.
    #[instrument(skip_all, fields(query = %query))]
    pub async fn query(&self, query: &Query) -> Result<RowSet> {
        let source = &*self.source;
        let retry = &self.retry;
        let cancel = &self.cancel;
        with_connection(source, cancel, async |handle: &mut S::Handle| {
            retry
                .run_on(handle, cancel, async |handle: &mut S::Handle| {
                    collect_rows(source, handle, query).await
                })
                .await
        })
        .await
    }

    /// [`query`](Self::query), served from the cache when the same query
    /// has succeeded before.
    pub async fn fetch_all(&self, query: &Query) -> Result<RowSet> {
        self.cache
            .cached_fetch(query, async |q: &Query| self.query(q).await)
            .await
    }

    /// Run `operation` as one transaction. A failed attempt is rolled back
    /// and, if the policy allows, the whole operation is run again.
    #[instrument(skip_all)]
    pub async fn transact<T>(
        &self,
        mut operation: impl AsyncFnMut(&mut Session<'_, S>) -> Result<T>,
    ) -> Result<T> {
        let source = &*self.source;
        let retry = &self.retry;
        let cancel = &self.cancel;
        with_connection(source, cancel, async |handle: &mut S::Handle| {
            retry
                .run_on(handle, cancel, async |handle: &mut S::Handle| {
                    with_transaction(source, handle, async |handle: &mut S::Handle| {
                        let mut session = Session::new(source, handle);
                        operation(&mut session).await
                    })
                    .await
                })
                .await
        })
        .await
    }

    /// Execute `statements` in order inside one transaction. Returns the
    /// number of statements executed.
    pub async fn execute_all(&self, statements: &[Query]) -> Result<usize> {
        self.transact(async |session: &mut Session<'_, S>| {
            for statement in statements {
                session.execute(statement).await?;
            }
            Ok(statements.len())
        })
        .await
    }

    /// Run [`query`](Self::query) for every query at once, each on its own
    /// connection. Results come back in input order; the first failure is
    /// returned and the remaining calls are dropped.
    pub async fn fetch_concurrently(&self, queries: &[Query]) -> Result<Vec<RowSet>> {
        debug!(count = queries.len(), "fetching concurrently");
        try_join_all(queries.iter().map(|query| self.query(query))).await
    }

    /// Execute `query` and hand its batches to `consume`. The connection is
    /// held until `consume` returns.
    #[instrument(skip_all, fields(query = %query, batch_size = self.batch_size))]
    pub async fn stream<T>(
        &self,
        query: &Query,
        consume: impl AsyncFnOnce(BatchStream<'_>) -> Result<T>,
    ) -> Result<T> {
        let source = &*self.source;
        let batch_size = self.batch_size;
        with_connection(source, &self.cancel, async |handle: &mut S::Handle| {
            log_query(query);
            let cursor = source.execute(handle, query).await?;
            consume(stream_batches(cursor, batch_size)?).await
        })
        .await
    }

    /// Stream `query` and collect the rows matching `predicate`.
    pub async fn collect_filtered<P>(&self, query: &Query, predicate: P) -> Result<Vec<Row>>
    where
        P: FnMut(&Row) -> bool + Unpin,
    {
        self.stream(query, async move |batches: BatchStream<'_>| {
            filter_rows(batches, predicate).try_collect::<Vec<Row>>().await
        })
        .await
    }

    /// Streaming mean of `column` over the rows matching `predicate`.
    pub async fn mean<P>(&self, query: &Query, column: &str, predicate: P) -> Result<Option<f64>>
    where
        P: FnMut(&Row) -> bool + Unpin,
    {
        self.stream(query, async move |batches: BatchStream<'_>| {
            column_mean(filter_rows(batches, predicate), column).await
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::mock::{MockHandle, MockSource};
    use crate::query::Value;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn users(n: i64) -> Vec<Row> {
        (0..n)
            .map(|i| {
                Row::from_pairs([
                    ("user_id", Value::from(i)),
                    ("name", Value::from(format!("user{i}"))),
                    ("age", Value::from(20 + i)),
                ])
            })
            .collect()
    }

    fn pipeline(source: &Arc<MockSource>) -> Pipeline<MockSource> {
        Pipeline::builder(Arc::clone(source))
            .retry(RetryPolicy::new(3, Duration::ZERO))
            .batch_size(3)
            .build()
            .unwrap()
    }

    fn age(row: &Row) -> i64 {
        match row.get("age") {
            Some(Value::Int(age)) => *age,
            _ => -1,
        }
    }

    #[tokio::test]
    async fn fetch_all_hits_source_once() {
        let source = Arc::new(MockSource::new());
        let query = Query::new("SELECT * FROM users");
        source.add_rows(query.clone(), users(4));
        let pipeline = pipeline(&source);

        let first = pipeline.fetch_all(&query).await.unwrap();
        let second = pipeline.fetch_all(&query).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.len(), 4);
        assert_eq!(source.stats().executes(), 1);
        assert_eq!(source.stats().acquires(), 1);
        assert_eq!(pipeline.cache().len(), 1);
    }

    #[tokio::test]
    async fn query_retries_on_same_connection() {
        let source = Arc::new(MockSource::new());
        source.fail_statement("SELECT * FROM flaky");
        let pipeline = pipeline(&source);

        let err = pipeline.query(&Query::new("SELECT * FROM flaky")).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Query);
        assert_eq!(source.stats().executes(), 3);
        assert_eq!(source.stats().acquires(), 1);
        assert_eq!(source.stats().releases(), 1);
    }

    #[tokio::test]
    async fn execute_query_does_not_retry() {
        let source = Arc::new(MockSource::new());
        source.fail_statement("SELECT 1");
        let pipeline = pipeline(&source);

        assert!(pipeline.execute_query(&Query::new("SELECT 1")).await.is_err());
        assert_eq!(source.stats().executes(), 1);
        assert_eq!(source.stats().open_handles(), 0);
    }

    #[tokio::test]
    async fn failed_transaction_leaves_nothing_behind() {
        let source = Arc::new(MockSource::new());
        source.fail_statement("INSERT INTO users VALUES (2)");
        let pipeline = Pipeline::builder(Arc::clone(&source))
            .retry(RetryPolicy::none())
            .build()
            .unwrap();

        let statements = [
            Query::new("INSERT INTO users VALUES (1)"),
            Query::new("INSERT INTO users VALUES (2)"),
            Query::new("INSERT INTO users VALUES (3)"),
        ];
        let err = pipeline.execute_all(&statements).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Query);
        assert!(source.committed().is_empty());
        assert_eq!(source.stats().rollbacks(), 1);
        assert_eq!(source.stats().commits(), 0);
        assert_eq!(source.stats().releases(), 1);
    }

    #[tokio::test]
    async fn execute_all_commits_every_statement() {
        let source = Arc::new(MockSource::new());
        let pipeline = pipeline(&source);
        let statements = [
            Query::new("INSERT INTO users VALUES (?)").bind(1),
            Query::new("UPDATE users SET age = ?").bind(30),
        ];

        assert_eq!(pipeline.execute_all(&statements).await.unwrap(), 2);
        assert_eq!(source.committed(), statements.to_vec());
    }

    #[tokio::test]
    async fn transact_reruns_whole_transaction() {
        let source = Arc::new(MockSource::new());
        let pipeline = pipeline(&source);
        let calls = AtomicU32::new(0);

        let ids = pipeline
            .transact(async |session: &mut Session<'_, MockSource>| {
                let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
                session.execute(&Query::new("INSERT INTO audit VALUES (1)")).await?;
                if attempt < 3 {
                    return Err(DataError::operation(format!("attempt {attempt} failed")));
                }
                let id: &mut MockHandle = session.handle();
                Ok(id.id())
            })
            .await
            .unwrap();

        assert_eq!(ids, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(source.stats().begins(), 3);
        assert_eq!(source.stats().rollbacks(), 2);
        assert_eq!(source.stats().commits(), 1);
        assert_eq!(source.committed().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_fetch_keeps_input_order() {
        let source = Arc::new(MockSource::new());
        let all = Query::new("SELECT * FROM users");
        let older = Query::new("SELECT * FROM users WHERE age > ?").bind(40);
        source.add_rows(all.clone(), users(5));
        source.add_rows(older.clone(), users(2));
        let pipeline = pipeline(&source);

        let results = pipeline.fetch_concurrently(&[all, older]).await.unwrap();

        assert_eq!(results.iter().map(|r| r.len()).collect::<Vec<_>>(), vec![5, 2]);
        assert_eq!(source.stats().acquires(), 2);
        assert_eq!(source.stats().open_handles(), 0);
    }

    #[tokio::test]
    async fn concurrent_fetch_reports_failure() {
        let source = Arc::new(MockSource::new());
        source.fail_statement("SELECT broken");
        let pipeline = pipeline(&source);

        let err = pipeline
            .fetch_concurrently(&[Query::new("SELECT 1"), Query::new("SELECT broken")])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Query);
    }

    #[tokio::test]
    async fn stream_pulls_only_what_is_consumed() {
        let source = Arc::new(MockSource::new());
        let query = Query::new("SELECT * FROM users");
        source.add_rows(query.clone(), users(10));
        let pipeline = pipeline(&source);

        let first = pipeline
            .stream(&query, async |mut batches: BatchStream<'_>| {
                Ok(batches.try_next().await?.map(|batch| batch.len()))
            })
            .await
            .unwrap();

        assert_eq!(first, Some(3));
        assert_eq!(source.stats().rows_pulled(), 3);
        assert_eq!(source.stats().releases(), 1);
    }

    #[tokio::test]
    async fn filter_pulls_next_batch_only_when_current_is_drained() {
        let source = Arc::new(MockSource::new());
        let query = Query::new("SELECT * FROM users");
        source.add_rows(query.clone(), users(10));
        let pipeline = pipeline(&source);

        let pulled = pipeline
            .stream(&query, async |batches: BatchStream<'_>| {
                let mut rows = filter_rows(batches, |_: &Row| true);
                let mut pulled = Vec::new();
                for _ in 0..4 {
                    rows.try_next().await?;
                    pulled.push(source.stats().rows_pulled());
                }
                Ok(pulled)
            })
            .await
            .unwrap();

        assert_eq!(pulled, vec![3, 3, 3, 6]);
        assert_eq!(source.stats().releases(), 1);
    }

    #[tokio::test]
    async fn collect_filtered_and_mean() {
        let source = Arc::new(MockSource::new());
        let query = Query::new("SELECT * FROM user_data");
        source.add_rows(query.clone(), users(10));
        let pipeline = pipeline(&source);

        let older = pipeline
            .collect_filtered(&query, |row| age(row) > 25)
            .await
            .unwrap();
        assert_eq!(older.iter().map(age).collect::<Vec<_>>(), vec![26, 27, 28, 29]);

        let mean = pipeline.mean(&query, "age", |_| true).await.unwrap();
        assert_eq!(mean, Some(24.5));

        let none = pipeline.mean(&query, "age", |row| age(row) > 100).await.unwrap();
        assert_eq!(none, None);
        assert_eq!(source.stats().open_handles(), 0);
    }

    #[tokio::test]
    async fn cancelled_pipeline_acquires_nothing() {
        let source = Arc::new(MockSource::new());
        let pipeline = pipeline(&source);
        pipeline.cancel();

        let err = pipeline.query(&Query::new("SELECT 1")).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(source.stats().acquires(), 0);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let err = Pipeline::builder(Arc::new(MockSource::new()))
            .batch_size(0)
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn from_config_applies_settings() {
        let config = PipelineConfig::from_toml_str(
            "batch_size = 25\n[retry]\nmax_attempts = 5\ndelay_ms = 10\n",
        )
        .unwrap();
        let pipeline = Pipeline::from_config(Arc::new(MockSource::new()), &config).unwrap();

        assert_eq!(pipeline.batch_size(), 25);
        assert_eq!(pipeline.retry_policy().max_attempts(), 5);
        assert_eq!(pipeline.retry_policy().delay(), Duration::from_millis(10));
    }
}
