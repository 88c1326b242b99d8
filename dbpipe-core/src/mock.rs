//! Scripted in-memory data source for tests and benchmarks.
//!
//! Result sets are registered per [`Query`]; anything else executes as an empty
//! statement. Statements run on a handle are staged on that handle and only
//! show up in [`MockSource::committed`] after a commit, so transaction
//! atomicity is observable. Every interaction is counted in [`MockStats`].

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, StreamExt};

use crate::error::{DataError, Result};
use crate::query::{Query, Row};
use crate::source::{DataSource, RowCursor};

/// Counters for every call made against a [`MockSource`].
#[derive(Debug, Default)]
pub struct MockStats {
    acquires: AtomicUsize,
    releases: AtomicUsize,
    begins: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    executes: AtomicUsize,
    rows_pulled: Arc<AtomicUsize>,
    open_handles: AtomicUsize,
    peak_open_handles: AtomicUsize,
}

impl MockStats {
    pub fn acquires(&self) -> usize {
        self.acquires.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn begins(&self) -> usize {
        self.begins.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }

    pub fn executes(&self) -> usize {
        self.executes.load(Ordering::SeqCst)
    }

    /// Rows handed out by cursors so far
    pub fn rows_pulled(&self) -> usize {
        self.rows_pulled.load(Ordering::SeqCst)
    }

    /// Handles acquired and not yet released
    pub fn open_handles(&self) -> usize {
        self.open_handles.load(Ordering::SeqCst)
    }

    /// Highest number of handles that were open at the same time
    pub fn peak_open_handles(&self) -> usize {
        self.peak_open_handles.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
struct ResultSet {
    rows: Vec<Row>,
    fail_at: Option<usize>,
}

#[derive(Debug, Default)]
struct Faults {
    acquire_failures: usize,
    acquire_delay: Option<Duration>,
    release: bool,
    commit: bool,
    rollback: bool,
    statements: HashSet<String>,
}

/// Exclusive handle issued by [`MockSource`].
#[derive(Debug)]
pub struct MockHandle {
    id: u64,
    staged: Vec<Query>,
}

impl MockHandle {
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[derive(Debug, Default)]
pub struct MockSource {
    results: Mutex<HashMap<Query, ResultSet>>,
    faults: Mutex<Faults>,
    committed: Mutex<Vec<Query>>,
    next_id: AtomicU64,
    stats: MockStats,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `rows` whenever `query` is executed
    pub fn add_rows(&self, query: Query, rows: Vec<Row>) {
        lock(&self.results).insert(query, ResultSet { rows, fail_at: None });
    }

    /// Serve `rows` for `query`, but fail when the cursor reaches `fail_at`
    pub fn add_failing_rows(&self, query: Query, rows: Vec<Row>, fail_at: usize) {
        lock(&self.results).insert(
            query,
            ResultSet {
                rows,
                fail_at: Some(fail_at),
            },
        );
    }

    /// Fail the next `count` acquisitions
    pub fn fail_acquires(&self, count: usize) {
        lock(&self.faults).acquire_failures = count;
    }

    pub fn set_acquire_delay(&self, delay: Duration) {
        lock(&self.faults).acquire_delay = Some(delay);
    }

    pub fn fail_release(&self, fail: bool) {
        lock(&self.faults).release = fail;
    }

    pub fn fail_commit(&self, fail: bool) {
        lock(&self.faults).commit = fail;
    }

    pub fn fail_rollback(&self, fail: bool) {
        lock(&self.faults).rollback = fail;
    }

    /// Make every execution of a statement with this text fail
    pub fn fail_statement(&self, text: impl Into<String>) {
        lock(&self.faults).statements.insert(text.into());
    }

    /// Stop failing a statement registered with [`fail_statement`](Self::fail_statement)
    pub fn heal_statement(&self, text: &str) {
        lock(&self.faults).statements.remove(text);
    }

    /// Statements made durable by a commit, in commit order
    pub fn committed(&self) -> Vec<Query> {
        lock(&self.committed).clone()
    }

    pub fn stats(&self) -> &MockStats {
        &self.stats
    }
}

#[async_trait]
impl DataSource for MockSource {
    type Handle = MockHandle;

    async fn acquire(&self) -> Result<MockHandle> {
        let delay = lock(&self.faults).acquire_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        {
            let mut faults = lock(&self.faults);
            if faults.acquire_failures > 0 {
                faults.acquire_failures -= 1;
                return Err(DataError::connection("mock source refused connection"));
            }
        }

        self.stats.acquires.fetch_add(1, Ordering::SeqCst);
        let open = self.stats.open_handles.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.peak_open_handles.fetch_max(open, Ordering::SeqCst);

        Ok(MockHandle {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            staged: Vec::new(),
        })
    }

    async fn release(&self, _handle: MockHandle) -> Result<()> {
        self.stats.releases.fetch_add(1, Ordering::SeqCst);
        self.stats.open_handles.fetch_sub(1, Ordering::SeqCst);
        if lock(&self.faults).release {
            return Err(DataError::connection("mock source failed to close handle"));
        }
        Ok(())
    }

    async fn execute<'h>(
        &'h self,
        handle: &'h mut MockHandle,
        query: &'h Query,
    ) -> Result<RowCursor<'h>> {
        self.stats.executes.fetch_add(1, Ordering::SeqCst);
        if lock(&self.faults).statements.contains(query.text()) {
            return Err(DataError::query(format!("mock statement failed: {query}")));
        }
        handle.staged.push(query.clone());

        let result = lock(&self.results).get(query).cloned();
        let Some(ResultSet { rows, fail_at }) = result else {
            return Ok(stream::empty::<Result<Row>>().boxed());
        };

        let pulled = Arc::clone(&self.stats.rows_pulled);
        let cursor = stream::iter(rows.into_iter().enumerate()).map(move |(idx, row)| {
            if fail_at == Some(idx) {
                return Err(DataError::query(format!("mock cursor failed at row {idx}")));
            }
            pulled.fetch_add(1, Ordering::SeqCst);
            Ok(row)
        });
        Ok(cursor.boxed())
    }

    async fn begin(&self, handle: &mut MockHandle) -> Result<()> {
        self.stats.begins.fetch_add(1, Ordering::SeqCst);
        handle.staged.clear();
        Ok(())
    }

    async fn commit(&self, handle: &mut MockHandle) -> Result<()> {
        if lock(&self.faults).commit {
            return Err(DataError::transaction("mock commit failed"));
        }
        self.stats.commits.fetch_add(1, Ordering::SeqCst);
        lock(&self.committed).append(&mut handle.staged);
        Ok(())
    }

    async fn rollback(&self, handle: &mut MockHandle) -> Result<()> {
        self.stats.rollbacks.fetch_add(1, Ordering::SeqCst);
        handle.staged.clear();
        if lock(&self.faults).rollback {
            return Err(DataError::transaction("mock rollback failed"));
        }
        Ok(())
    }
}
