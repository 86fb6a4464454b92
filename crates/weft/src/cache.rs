//! Cache substrate.
//!
//! Keyed byte store with `get`/`set` semantics and one hard rule: a cache
//! must never fail a build. Backend errors are logged and reported as misses.
//!
//! The durable backend is a redb database file per cache directory. An
//! in-process write-through map sits on top so a `set` is observable by a
//! subsequent `get` without waiting for the blocking write.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use rustc_hash::FxHashMap as HashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::task;
use tracing::warn;

const CACHE_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("cache");

/// Internal cache failure. Logged at the trait boundary, never surfaced.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache database error: {0}")]
    Database(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<redb::DatabaseError> for CacheError {
    fn from(err: redb::DatabaseError) -> Self {
        CacheError::Database(err.to_string())
    }
}

impl From<redb::TableError> for CacheError {
    fn from(err: redb::TableError) -> Self {
        CacheError::Database(err.to_string())
    }
}

impl From<redb::TransactionError> for CacheError {
    fn from(err: redb::TransactionError) -> Self {
        CacheError::Database(err.to_string())
    }
}

impl From<redb::StorageError> for CacheError {
    fn from(err: redb::StorageError) -> Self {
        CacheError::Database(err.to_string())
    }
}

impl From<redb::CommitError> for CacheError {
    fn from(err: redb::CommitError) -> Self {
        CacheError::Database(err.to_string())
    }
}

/// Ordered tuple key, rendered to a deterministic string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(Vec<String>);

impl CacheKey {
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Deterministic string form (a JSON array).
    pub fn render(&self) -> String {
        serde_json::to_string(&self.0).expect("a string tuple always serializes")
    }
}

/// Keyed value store. Both operations swallow backend failures.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Returns the stored value, or `None` on miss or backend error.
    async fn get(&self, key: &CacheKey) -> Option<Value>;

    /// Persists a value. Errors are logged, never surfaced.
    async fn set(&self, key: &CacheKey, value: Value);
}

/// Non-persistent cache with the identical contract; backs tests and
/// profiling runs.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &CacheKey) -> Option<Value> {
        self.entries.lock().get(&key.render()).cloned()
    }

    async fn set(&self, key: &CacheKey, value: Value) {
        self.entries.lock().insert(key.render(), value);
    }
}

/// Durable cache backed by a redb database at `<dir>/cache.redb`.
pub struct DiskCache {
    db: Arc<Database>,
    staged: Mutex<HashMap<String, Value>>,
}

impl DiskCache {
    /// Open or create a cache under the given directory.
    pub fn open(dir: &Path) -> Result<Self, CacheError> {
        std::fs::create_dir_all(dir)?;
        let db = Database::create(dir.join("cache.redb"))?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(CACHE_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self {
            db: Arc::new(db),
            staged: Mutex::new(HashMap::default()),
        })
    }

    fn read_entry(db: &Database, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(CACHE_TABLE)?;
        Ok(table.get(key)?.map(|value| value.value().to_vec()))
    }

    fn write_entry(db: &Database, key: &str, bytes: &[u8]) -> Result<(), CacheError> {
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(CACHE_TABLE)?;
            table.insert(key, bytes)?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

#[async_trait]
impl Cache for DiskCache {
    async fn get(&self, key: &CacheKey) -> Option<Value> {
        let rendered = key.render();
        if let Some(value) = self.staged.lock().get(&rendered) {
            return Some(value.clone());
        }

        let db = self.db.clone();
        let lookup = rendered.clone();
        let bytes = match task::spawn_blocking(move || DiskCache::read_entry(&db, &lookup)).await {
            Ok(Ok(bytes)) => bytes?,
            Ok(Err(err)) => {
                warn!(key = %rendered, error = %err, "cache read failed");
                return None;
            }
            Err(err) => {
                warn!(key = %rendered, error = %err, "cache read task failed");
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(key = %rendered, error = %err, "cache entry is not valid JSON");
                None
            }
        }
    }

    async fn set(&self, key: &CacheKey, value: Value) {
        let rendered = key.render();
        let bytes = match serde_json::to_vec(&value) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(key = %rendered, error = %err, "cache value failed to serialize");
                return;
            }
        };

        self.staged.lock().insert(rendered.clone(), value);

        let db = self.db.clone();
        let written = rendered.clone();
        let result =
            task::spawn_blocking(move || DiskCache::write_entry(&db, &written, &bytes)).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(key = %rendered, error = %err, "cache write failed"),
            Err(err) => warn!(key = %rendered, error = %err, "cache write task failed"),
        }
    }
}

/// Per-record cache annotations.
///
/// Partial entries are valid: absent keys are recomputed by their producing
/// jobs and written back on the next [`CacheSet::write`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Annotations {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dependency_identifiers: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolve_path_dependencies: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolve_package_dependencies: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_map: Option<String>,
}

impl Annotations {
    /// Overlay `other` onto `self`, keeping existing keys when `other` lacks
    /// them.
    fn merge(&mut self, other: Annotations) {
        if other.dependency_identifiers.is_some() {
            self.dependency_identifiers = other.dependency_identifiers;
        }
        if other.resolve_path_dependencies.is_some() {
            self.resolve_path_dependencies = other.resolve_path_dependencies;
        }
        if other.resolve_package_dependencies.is_some() {
            self.resolve_package_dependencies = other.resolve_package_dependencies;
        }
        if other.code.is_some() {
            self.code = other.code;
        }
        if other.source_map.is_some() {
            self.source_map = other.source_map;
        }
    }
}

/// The four persisted cache directories, presented as one logical job cache.
///
/// Layout:
///
/// ```text
/// <root>/ast_cache/                       code, source maps
/// <root>/dependency_cache/                dependency identifiers
/// <root>/package_resolver_cache/<hash>/   package resolutions
/// <root>/module_resolver_cache/<hash>/    path resolutions under node_modules
/// ```
///
/// The resolver caches are namespaced by the dependency-tree hash, so a
/// dependency upgrade invalidates resolutions without touching parsed code.
#[derive(Clone)]
pub struct CacheSet {
    ast: Arc<dyn Cache>,
    dependency: Arc<dyn Cache>,
    package_resolver: Arc<dyn Cache>,
    module_resolver: Arc<dyn Cache>,
}

impl CacheSet {
    /// Open the durable cache directories under `root`.
    pub fn open(root: &Path, dependency_tree_hash: &str) -> Result<Self, CacheError> {
        Ok(Self {
            ast: Arc::new(DiskCache::open(&root.join("ast_cache"))?),
            dependency: Arc::new(DiskCache::open(&root.join("dependency_cache"))?),
            package_resolver: Arc::new(DiskCache::open(
                &root.join("package_resolver_cache").join(dependency_tree_hash),
            )?),
            module_resolver: Arc::new(DiskCache::open(
                &root.join("module_resolver_cache").join(dependency_tree_hash),
            )?),
        })
    }

    /// A fully in-memory cache set for tests and profiling.
    pub fn in_memory() -> Self {
        Self {
            ast: Arc::new(MemoryCache::new()),
            dependency: Arc::new(MemoryCache::new()),
            package_resolver: Arc::new(MemoryCache::new()),
            module_resolver: Arc::new(MemoryCache::new()),
        }
    }

    /// Read and merge the annotations stored for `key`, normalizing misses
    /// to an empty map.
    pub async fn read(&self, key: &CacheKey) -> Annotations {
        let mut merged = Annotations::default();
        for cache in [
            &self.ast,
            &self.dependency,
            &self.package_resolver,
            &self.module_resolver,
        ] {
            if let Some(value) = cache.get(key).await {
                match serde_json::from_value::<Annotations>(value) {
                    Ok(part) => merged.merge(part),
                    Err(err) => warn!(key = %key.render(), error = %err, "discarding malformed cache entry"),
                }
            }
        }
        merged
    }

    /// Partition a snapshot across the four caches and persist each
    /// non-empty partition.
    pub async fn write(&self, key: &CacheKey, snapshot: &Annotations) {
        if snapshot.code.is_some() || snapshot.source_map.is_some() {
            self.store(
                &self.ast,
                key,
                Annotations {
                    code: snapshot.code.clone(),
                    source_map: snapshot.source_map.clone(),
                    ..Annotations::default()
                },
            )
            .await;
        }
        if snapshot.dependency_identifiers.is_some() {
            self.store(
                &self.dependency,
                key,
                Annotations {
                    dependency_identifiers: snapshot.dependency_identifiers.clone(),
                    ..Annotations::default()
                },
            )
            .await;
        }
        if snapshot.resolve_package_dependencies.is_some() {
            self.store(
                &self.package_resolver,
                key,
                Annotations {
                    resolve_package_dependencies: snapshot.resolve_package_dependencies.clone(),
                    ..Annotations::default()
                },
            )
            .await;
        }
        if snapshot.resolve_path_dependencies.is_some() {
            self.store(
                &self.module_resolver,
                key,
                Annotations {
                    resolve_path_dependencies: snapshot.resolve_path_dependencies.clone(),
                    ..Annotations::default()
                },
            )
            .await;
        }
    }

    async fn store(&self, cache: &Arc<dyn Cache>, key: &CacheKey, partition: Annotations) {
        match serde_json::to_value(&partition) {
            Ok(value) => cache.set(key, value).await,
            Err(err) => warn!(key = %key.render(), error = %err, "cache partition failed to serialize"),
        }
    }
}
