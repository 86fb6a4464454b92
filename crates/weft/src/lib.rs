//! Core content pipeline for the weft bundler.
//!
//! The centerpiece is the [`RecordStore`]: a per-file memoized job DAG that
//! turns source files into content-addressed, servable artifacts (module
//! definitions, URLs, source maps). Around it sit the cache substrate, the
//! module resolver, and thin adapters over the JS and CSS toolchains.

pub mod cache;
pub mod css;
pub mod error;
pub mod file_ref;
pub mod js;
pub mod lockfile;
pub mod options;
pub mod record;
pub mod resolver;

pub use cache::{Annotations, Cache, CacheKey, CacheSet, DiskCache, MemoryCache};
pub use css::CssArtifacts;
pub use error::{JobError, JobResult};
pub use file_ref::FileRef;
pub use js::JsArtifacts;
pub use lockfile::dependency_tree_hash;
pub use options::StoreOptions;
pub use record::{FileStat, Record, RecordStore};
pub use resolver::{BoundResolver, Resolver};
