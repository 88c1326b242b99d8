//! Query-result cache keyed by the full [`Query`].
//!
//! Entries live until they are invalidated or the cache is dropped; there is
//! no expiry and no size bound. Two concurrent misses on the same query both
//! run their fetch and the later insert wins.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use tracing::debug;

use crate::query::Query;

#[derive(Debug)]
pub struct QueryCache<T> {
    entries: RwLock<HashMap<Query, T>>,
}

impl<T> Default for QueryCache<T> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<T: Clone> QueryCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached result for `query`, or run `fetch`, store its result
    /// and return it. A failed fetch stores nothing and its error is returned
    /// unchanged.
    pub async fn cached_fetch<E>(
        &self,
        query: &Query,
        fetch: impl AsyncFnOnce(&Query) -> Result<T, E>,
    ) -> Result<T, E> {
        if let Some(hit) = self.get(query) {
            debug!(query = %query, "cache hit");
            return Ok(hit);
        }

        let value = fetch(query).await?;
        self.insert(query.clone(), value.clone());
        debug!(query = %query, "cached query result");
        Ok(value)
    }

    pub fn get(&self, query: &Query) -> Option<T> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(query)
            .cloned()
    }

    pub fn insert(&self, query: Query, value: T) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(query, value);
    }

    /// Drop the entry for `query`; returns whether one existed.
    pub fn invalidate(&self, query: &Query) -> bool {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(query)
            .is_some()
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
