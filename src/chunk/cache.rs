//! Unit-of-work scoped caches
//!
//! A [`UnitOfWorkCache`] lives exactly as long as one unit of work:
//!
//! ```text
//! Uninitialized ──insert──▶ Active ──release──▶ Uninitialized
//! ```
//!
//! Storage is allocated on the first insert and freed on release, never
//! merely marked stale. Lookups hand out clones so no caller can hold a
//! reference past the release.

use crate::chunk::types::{Chunk, Dimension, PartitionedTable, QualifiedName};
use std::collections::HashMap;
use std::hash::Hash;

/// Lifecycle state of a cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Uninitialized,
    Active,
}

/// Hit/miss counters since the last release
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total > 0 {
            self.hits as f64 / total as f64
        } else {
            0.0
        }
    }
}

/// A map whose storage exists only while a unit of work is active
#[derive(Debug)]
pub struct UnitOfWorkCache<K, V> {
    name: &'static str,
    entries: Option<HashMap<K, V>>,
    hits: u64,
    misses: u64,
}

impl<K: Eq + Hash, V: Clone> UnitOfWorkCache<K, V> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: None,
            hits: 0,
            misses: 0,
        }
    }

    /// Copy of the cached value, if any
    pub fn lookup(&mut self, key: &K) -> Option<V> {
        let found = self.entries.as_ref().and_then(|m| m.get(key)).cloned();
        if found.is_some() {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
        found
    }

    /// Insert or overwrite; allocates storage on first use
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.entries
            .get_or_insert_with(HashMap::new)
            .insert(key, value)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.as_mut().and_then(|m| m.remove(key))
    }

    /// Keep only the entries matching `keep`
    pub fn retain(&mut self, keep: impl FnMut(&K, &mut V) -> bool) {
        if let Some(entries) = self.entries.as_mut() {
            entries.retain(keep);
        }
    }

    /// Free every entry and return to `Uninitialized`
    ///
    /// Returns the number of entries released. Releasing an uninitialized
    /// cache is a no-op.
    pub fn release(&mut self) -> usize {
        let released = self.entries.take().map(|m| m.len()).unwrap_or(0);
        if released > 0 {
            tracing::trace!(
                cache = self.name,
                released,
                hits = self.hits,
                misses = self.misses,
                "Cache released"
            );
        }
        self.hits = 0;
        self.misses = 0;
        released
    }

    pub fn len(&self) -> usize {
        self.entries.as_ref().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn state(&self) -> CacheState {
        if self.entries.is_some() {
            CacheState::Active
        } else {
            CacheState::Uninitialized
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            entries: self.len(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Key of the chunk cache: one entry per bucket of a table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkCacheKey {
    pub table_id: i64,
    pub bucket_start: i64,
}

impl ChunkCacheKey {
    pub fn new(table_id: i64, bucket_start: i64) -> Self {
        Self {
            table_id,
            bucket_start,
        }
    }
}

/// `(table, bucket_start) → chunk`
pub type ChunkCache = UnitOfWorkCache<ChunkCacheKey, Chunk>;

/// `table id → time dimension`
pub type DimensionCache = UnitOfWorkCache<i64, Dimension>;

/// `name → partitioned table or None`; remembers negative answers too
pub type TableCache = UnitOfWorkCache<QualifiedName, Option<PartitionedTable>>;
