//! Lazy batch streaming over a row cursor.
//!
//! # Architecture
//!
//! Two hand-written [`Stream`]s form a pull pipeline:
//!
//! ```text
//! RowCursor ──► BatchStream ──► FilterRows ──► consumer
//!   rows         Vec<Row> ≤ n     matching rows
//! ```
//!
//! [`BatchStream`] polls the cursor until it has `batch_size` rows, yields them
//! as one [`Batch`], and only then touches the cursor again. [`FilterRows`]
//! drains one batch at a time and asks for the next batch only when the current
//! one is exhausted. At most one batch is buffered at any point, regardless of
//! result size.
//!
//! Both streams are single-pass: each traversal needs its own cursor.
//!
//! ## Failure
//!
//! A cursor error is yielded at the point it occurs and ends the stream. Rows
//! buffered for the unfinished batch are dropped; batches that were already
//! yielded stay with the consumer.
//!
//! ## Example
//!
//! ```no_run
//! use dbpipe_core::stream::{filter_rows, stream_batches};
//! use dbpipe_core::{DataSource, MockSource, Query, Value};
//! use futures::TryStreamExt;
//!
//! # async fn demo(source: MockSource) -> dbpipe_core::Result<()> {
//! let mut conn = source.acquire().await?;
//! let query = Query::new("SELECT * FROM user_data");
//! let cursor = source.execute(&mut conn, &query).await?;
//! let adults: Vec<_> = filter_rows(stream_batches(cursor, 50)?, |row| {
//!     row.get("age").and_then(Value::as_f64).is_some_and(|age| age > 25.0)
//! })
//! .try_collect()
//! .await?;
//! # drop(adults);
//! # Ok(())
//! # }
//! ```

use std::mem;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use futures::{Stream, StreamExt, TryStream, TryStreamExt};

use crate::error::{DataError, Result};
use crate::query::{Batch, Row};
use crate::source::RowCursor;

/// Stream of fixed-size batches pulled from one cursor.
pub struct BatchStream<'a> {
    cursor: RowCursor<'a>,
    batch_size: usize,
    buffer: Vec<Row>,
    finished: bool,
}

impl<'a> BatchStream<'a> {
    /// Wrap `cursor`; `batch_size` must be at least 1.
    pub fn new(cursor: RowCursor<'a>, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(DataError::config("batch_size must be at least 1"));
        }
        Ok(Self {
            cursor,
            batch_size,
            buffer: Vec::with_capacity(batch_size),
            finished: false,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn take_buffer(&mut self) -> Batch {
        Batch::new(mem::replace(
            &mut self.buffer,
            Vec::with_capacity(self.batch_size),
        ))
    }
}

impl Stream for BatchStream<'_> {
    type Item = Result<Batch>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        loop {
            match ready!(this.cursor.poll_next_unpin(cx)) {
                Some(Ok(row)) => {
                    this.buffer.push(row);
                    if this.buffer.len() == this.batch_size {
                        return Poll::Ready(Some(Ok(this.take_buffer())));
                    }
                }
                Some(Err(err)) => {
                    this.finished = true;
                    this.buffer.clear();
                    return Poll::Ready(Some(Err(err)));
                }
                None => {
                    this.finished = true;
                    if this.buffer.is_empty() {
                        return Poll::Ready(None);
                    }
                    return Poll::Ready(Some(Ok(this.take_buffer())));
                }
            }
        }
    }
}

/// Group the rows of `cursor` into batches of `batch_size`.
pub fn stream_batches(cursor: RowCursor<'_>, batch_size: usize) -> Result<BatchStream<'_>> {
    BatchStream::new(cursor, batch_size)
}

/// Rows of a [`BatchStream`] that satisfy a predicate, in source order.
pub struct FilterRows<'a, P> {
    batches: BatchStream<'a>,
    current: std::vec::IntoIter<Row>,
    predicate: P,
    finished: bool,
}

impl<'a, P> FilterRows<'a, P>
where
    P: FnMut(&Row) -> bool,
{
    pub fn new(batches: BatchStream<'a>, predicate: P) -> Self {
        Self {
            batches,
            current: Vec::new().into_iter(),
            predicate,
            finished: false,
        }
    }
}

impl<P> Stream for FilterRows<'_, P>
where
    P: FnMut(&Row) -> bool + Unpin,
{
    type Item = Result<Row>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        loop {
            for row in this.current.by_ref() {
                if (this.predicate)(&row) {
                    return Poll::Ready(Some(Ok(row)));
                }
            }

            match ready!(this.batches.poll_next_unpin(cx)) {
                Some(Ok(batch)) => this.current = batch.into_iter(),
                Some(Err(err)) => {
                    this.finished = true;
                    return Poll::Ready(Some(Err(err)));
                }
                None => {
                    this.finished = true;
                    return Poll::Ready(None);
                }
            }
        }
    }
}

/// Keep only the rows of `batches` for which `predicate` returns true.
pub fn filter_rows<P>(batches: BatchStream<'_>, predicate: P) -> FilterRows<'_, P>
where
    P: FnMut(&Row) -> bool,
{
    FilterRows::new(batches, predicate)
}

/// Mean of a numeric column over a row stream, without collecting the rows.
///
/// Nulls are skipped; `None` means no non-null values were seen. A row that
/// lacks `column` or holds a non-numeric value fails with a query error.
pub async fn column_mean<S>(rows: S, column: &str) -> Result<Option<f64>>
where
    S: TryStream<Ok = Row, Error = DataError>,
{
    let (total, count) = rows
        .try_fold((0.0_f64, 0_u64), |(total, count), row| async move {
            match row.get(column) {
                None => Err(DataError::query(format!("column '{column}' not in result"))),
                Some(value) if value.is_null() => Ok((total, count)),
                Some(value) => value
                    .as_f64()
                    .map(|n| (total + n, count + 1))
                    .ok_or_else(|| {
                        DataError::query(format!("column '{column}' holds non-numeric value {value}"))
                    }),
            }
        })
        .await?;

    Ok((count > 0).then(|| total / count as f64))
}
