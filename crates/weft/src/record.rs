//! The record job store.
//!
//! A [`Record`] is a per-file lazy evaluation context. Every derivation over
//! a file — its content hash, its servable code, its module definition — is a
//! job: a pure function of the file, the shared options, and other jobs
//! invoked through the store handle. The job set is statically enumerated;
//! each suspendable job memoizes into its own cell on the record, so a job
//! runs at most once per record lifetime, concurrent callers share the
//! pending future, and a failure poisons the cell for every later caller.
//!
//! Jobs that own a cache annotation consult the per-record cache entry first
//! and only compute on miss; `write_cache` persists the accumulated
//! annotations keyed by `(path, mtime, content hash)`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap as HashMap;
use tokio::sync::OnceCell;
use tokio::task;
use tracing::debug;
use xxhash_rust::xxh32::xxh32;

use crate::cache::{Annotations, CacheKey, CacheSet};
use crate::css::{self, CssArtifacts};
use crate::error::{JobError, JobResult};
use crate::file_ref::FileRef;
use crate::js::{self, JsArtifacts, JsCompileOptions};
use crate::options::StoreOptions;
use crate::resolver::{BoundResolver, Resolver};

/// File metadata relevant to cache identity.
#[derive(Debug, Clone, Copy)]
pub struct FileStat {
    /// Modification time in integer milliseconds since the epoch.
    pub mtime_ms: u64,
    /// File size in bytes.
    pub size: u64,
}

/// One memoization cell per suspendable job.
///
/// Each cell transitions `unstarted -> pending -> resolved|failed` exactly
/// once; the stored value is the job's full result, so failures re-raise on
/// every later call.
#[derive(Default)]
struct JobCells {
    read_text: OnceCell<JobResult<Arc<str>>>,
    stat: OnceCell<JobResult<FileStat>>,
    js: OnceCell<JobResult<Arc<JsArtifacts>>>,
    css: OnceCell<JobResult<Arc<CssArtifacts>>>,
    annotations: OnceCell<JobResult<Arc<Mutex<Annotations>>>>,
    dependency_identifiers: OnceCell<JobResult<Arc<Vec<String>>>>,
    resolved_path_dependencies: OnceCell<JobResult<Arc<BTreeMap<String, PathBuf>>>>,
    resolved_package_dependencies: OnceCell<JobResult<Arc<BTreeMap<String, PathBuf>>>>,
    code: OnceCell<JobResult<Option<Arc<str>>>>,
    source_map: OnceCell<JobResult<Option<Arc<str>>>>,
    module_definition: OnceCell<JobResult<Option<Arc<str>>>>,
    file_dependencies: OnceCell<JobResult<Arc<Vec<PathBuf>>>>,
    write_cache: OnceCell<JobResult<()>>,
}

/// Per-file memoized job context.
pub struct Record {
    file: FileRef,
    cells: JobCells,
}

impl Record {
    fn new(file: FileRef) -> Self {
        Self {
            file,
            cells: JobCells::default(),
        }
    }

    pub fn file(&self) -> &FileRef {
        &self.file
    }
}

/// The store: records by path, shared options, caches, and the resolver.
///
/// Records are created by [`RecordStore::create`] and discarded by
/// [`RecordStore::remove`] when the graph prunes their node.
pub struct RecordStore {
    options: StoreOptions,
    caches: CacheSet,
    resolver: Resolver,
    records: RwLock<HashMap<PathBuf, Arc<Record>>>,
}

impl RecordStore {
    pub fn new(options: StoreOptions, caches: CacheSet) -> Self {
        let resolver = Resolver::new(&options);
        Self {
            options,
            caches,
            resolver,
            records: RwLock::new(HashMap::default()),
        }
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Get or create the record for a file.
    pub fn create(&self, file: FileRef) -> Arc<Record> {
        let mut records = self.records.write();
        records
            .entry(file.path().to_path_buf())
            .or_insert_with(|| Arc::new(Record::new(file)))
            .clone()
    }

    pub fn get(&self, path: &Path) -> Option<Arc<Record>> {
        self.records.read().get(path).cloned()
    }

    /// Discard a record, dropping every memoized job with it.
    pub fn remove(&self, path: &Path) -> Option<Arc<Record>> {
        self.records.write().remove(path)
    }

    pub fn records(&self) -> Vec<Arc<Record>> {
        self.records.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    // --- path-shaped jobs -------------------------------------------------

    pub fn basename(&self, record: &Record) -> String {
        record.file.basename()
    }

    pub fn ext(&self, record: &Record) -> String {
        record.file.ext()
    }

    pub fn is_text_file(&self, record: &Record) -> bool {
        matches!(record.file.ext().as_str(), ".js" | ".css" | ".json")
    }

    pub fn mime_type(&self, record: &Record) -> Option<&'static str> {
        mime_for_ext(&record.file.ext())
    }

    /// Eligibility for source transforms: everything outside the root
    /// `node_modules` and the vendor root.
    pub fn should_transform(&self, record: &Record) -> bool {
        self.options.should_transform(record.file.path())
    }

    /// Path resolutions are only worth caching under the root
    /// `node_modules`, where the dependency-tree hash governs invalidation.
    pub fn should_cache_resolved_path_dependencies(&self, record: &Record) -> bool {
        record.file.path().starts_with(&self.options.root_node_modules)
    }

    /// Non-JS assets are wrapped in an interop shim exposing the contents as
    /// a default export.
    pub fn should_shim_module_definition(&self, record: &Record) -> bool {
        record.file.ext() != ".js"
    }

    // --- filesystem jobs --------------------------------------------------

    /// UTF-8 contents of the file.
    pub async fn read_text(&self, record: &Record) -> JobResult<Arc<str>> {
        record
            .cells
            .read_text
            .get_or_init(|| async {
                let path = record.file.path().to_path_buf();
                match task::spawn_blocking(move || std::fs::read_to_string(&path)).await {
                    Ok(Ok(text)) => Ok(Arc::from(text)),
                    Ok(Err(err)) => Err(JobError::io(record.file.path(), err)),
                    Err(err) => Err(JobError::io(record.file.path(), err)),
                }
            })
            .await
            .clone()
    }

    pub async fn stat(&self, record: &Record) -> JobResult<FileStat> {
        record
            .cells
            .stat
            .get_or_init(|| async {
                let path = record.file.path().to_path_buf();
                match task::spawn_blocking(move || std::fs::metadata(&path)).await {
                    Ok(Ok(metadata)) => {
                        let mtime_ms = metadata
                            .modified()
                            .ok()
                            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
                            .map(|elapsed| elapsed.as_millis() as u64)
                            .unwrap_or(0);
                        Ok(FileStat {
                            mtime_ms,
                            size: metadata.len(),
                        })
                    }
                    Ok(Err(err)) => Err(JobError::io(record.file.path(), err)),
                    Err(err) => Err(JobError::io(record.file.path(), err)),
                }
            })
            .await
            .clone()
    }

    pub async fn mtime(&self, record: &Record) -> JobResult<u64> {
        Ok(self.stat(record).await?.mtime_ms)
    }

    // --- identity jobs ----------------------------------------------------

    /// Non-cryptographic 32-bit hash of the text contents, rendered in
    /// decimal.
    pub async fn hash_text(&self, record: &Record) -> JobResult<String> {
        let text = self.read_text(record).await?;
        Ok(xxh32(text.as_bytes(), 0).to_string())
    }

    /// The record's content identity: text hash for text files, mtime for
    /// everything else.
    pub async fn hash(&self, record: &Record) -> JobResult<String> {
        if self.is_text_file(record) {
            self.hash_text(record).await
        } else {
            Ok(self.mtime(record).await?.to_string())
        }
    }

    pub async fn hashed_filename(&self, record: &Record) -> JobResult<String> {
        let hash = self.hash(record).await?;
        Ok(format!(
            "{}-{}{}",
            record.file.basename(),
            hash,
            record.file.ext()
        ))
    }

    pub async fn hashed_name(&self, record: &Record) -> JobResult<PathBuf> {
        Ok(record.file.dir().join(self.hashed_filename(record).await?))
    }

    // --- cache jobs -------------------------------------------------------

    /// `[name, mtime, hash]` for text files, `[name, mtime]` for binary.
    pub async fn cache_key(&self, record: &Record) -> JobResult<CacheKey> {
        let name = record.file.name().into_owned();
        let mtime = self.mtime(record).await?.to_string();
        if self.is_text_file(record) {
            let hash = self.hash(record).await?;
            Ok(CacheKey::new([name, mtime, hash]))
        } else {
            Ok(CacheKey::new([name, mtime]))
        }
    }

    async fn annotations(&self, record: &Record) -> JobResult<Arc<Mutex<Annotations>>> {
        record
            .cells
            .annotations
            .get_or_init(|| async {
                let key = self.cache_key(record).await?;
                Ok(Arc::new(Mutex::new(self.caches.read(&key).await)))
            })
            .await
            .clone()
    }

    /// Snapshot of the record's cache entry, normalized to an empty map on
    /// miss.
    pub async fn read_cache(&self, record: &Record) -> JobResult<Annotations> {
        Ok(self.annotations(record).await?.lock().clone())
    }

    /// Persist the accumulated annotations.
    pub async fn write_cache(&self, record: &Record) -> JobResult<()> {
        record
            .cells
            .write_cache
            .get_or_init(|| async {
                let key = self.cache_key(record).await?;
                let snapshot = self.annotations(record).await?.lock().clone();
                self.caches.write(&key, &snapshot).await;
                debug!(file = %record.file, "persisted cache annotations");
                Ok(())
            })
            .await
            .clone()
    }

    // --- url jobs ---------------------------------------------------------

    /// Cache-busting URL for the served artifact. Text files use the hashed
    /// filename; binary files are served under their plain name.
    pub async fn url(&self, record: &Record) -> JobResult<String> {
        let name = if self.is_text_file(record) {
            self.hashed_name(record).await?
        } else {
            record.file.path().to_path_buf()
        };
        let text = match name.strip_prefix(&self.options.source_root) {
            Ok(relative) => relative.to_string_lossy().into_owned(),
            // Outside the source root the absolute path is kept, double
            // slash and all; the runtime loader depends on the exact shape.
            Err(_) => name.to_string_lossy().into_owned(),
        };
        let slashed = text.replace(std::path::MAIN_SEPARATOR, "/");
        Ok(format!("{}{}", self.options.root_url, slashed))
    }

    /// Cache-busted `file://` URL of the original, for source maps.
    pub async fn source_url(&self, record: &Record) -> JobResult<String> {
        let hash = self.hash(record).await?;
        Ok(format!("file://{}?{}", record.file.name(), hash))
    }

    /// Inline base64 source-map comment appropriate to the file type.
    pub async fn source_map_annotation(&self, record: &Record) -> JobResult<Option<String>> {
        let ext = record.file.ext();
        if !matches!(ext.as_str(), ".js" | ".json" | ".css") {
            return Ok(None);
        }
        let Some(map) = self.source_map(record).await? else {
            return Ok(None);
        };
        Ok(Some(source_map_comment(&ext, &map)))
    }

    // --- parse and analysis jobs ------------------------------------------

    /// Parsed and regenerated JS artifacts. Only `.js` files have an AST;
    /// anything else is an unknown extension for this job.
    ///
    /// Transform-eligible files go through the full pipeline; ineligible
    /// files are regenerated from a plain module-parse AST, minified when
    /// they sit under the vendor root.
    pub async fn js_artifacts(&self, record: &Record) -> JobResult<Arc<JsArtifacts>> {
        record
            .cells
            .js
            .get_or_init(|| async {
                let ext = record.file.ext();
                if ext != ".js" {
                    return Err(JobError::unknown_extension(record.file.path(), &ext));
                }
                let source = self.read_text(record).await?;
                let options = JsCompileOptions {
                    transform: self.should_transform(record),
                    source_maps: true,
                    minify: self.options.is_vendored(record.file.path()),
                };
                let path = record.file.path().to_path_buf();
                match task::spawn_blocking(move || js::compile_js(&path, &source, &options)).await
                {
                    Ok(result) => result.map(Arc::new),
                    Err(err) => Err(JobError::io(record.file.path(), err)),
                }
            })
            .await
            .clone()
    }

    /// Post-processed CSS artifacts for `.css` files.
    pub async fn css_artifacts(&self, record: &Record) -> JobResult<Arc<CssArtifacts>> {
        record
            .cells
            .css
            .get_or_init(|| async {
                let ext = record.file.ext();
                if ext != ".css" {
                    return Err(JobError::unknown_extension(record.file.path(), &ext));
                }
                let source = self.read_text(record).await?;
                let passes = self.options.css_passes.clone();
                let path = record.file.path().to_path_buf();
                match task::spawn_blocking(move || css::compile_css(&path, &source, &passes)).await
                {
                    Ok(result) => result.map(Arc::new),
                    Err(err) => Err(JobError::io(record.file.path(), err)),
                }
            })
            .await
            .clone()
    }

    /// Raw dependency sources: the CSS post-processor's list for `.css`,
    /// the static import/require walk for `.js`, nothing for `.json` and
    /// binary assets.
    pub async fn analyze_dependencies(&self, record: &Record) -> JobResult<Vec<String>> {
        match record.file.ext().as_str() {
            ".css" => Ok(self.css_artifacts(record).await?.dependencies.clone()),
            ".js" => Ok(self.js_artifacts(record).await?.dependencies.clone()),
            _ => Ok(Vec::new()),
        }
    }

    /// Dependency sources with URL-loader suffixes stripped.
    pub async fn dependency_identifiers(&self, record: &Record) -> JobResult<Arc<Vec<String>>> {
        record
            .cells
            .dependency_identifiers
            .get_or_init(|| async {
                let annotations = self.annotations(record).await?;
                if let Some(cached) = annotations.lock().dependency_identifiers.clone() {
                    return Ok(Arc::new(cached));
                }

                let identifiers: Vec<String> = self
                    .analyze_dependencies(record)
                    .await?
                    .iter()
                    .map(|identifier| strip_loader_suffix(identifier).to_string())
                    .collect();
                annotations.lock().dependency_identifiers = Some(identifiers.clone());
                Ok(Arc::new(identifiers))
            })
            .await
            .clone()
    }

    /// Identifiers addressing the filesystem directly.
    pub async fn path_dependency_identifiers(&self, record: &Record) -> JobResult<Vec<String>> {
        Ok(self
            .dependency_identifiers(record)
            .await?
            .iter()
            .filter(|identifier| is_path_identifier(identifier))
            .cloned()
            .collect())
    }

    /// Identifiers naming packages.
    pub async fn package_dependency_identifiers(&self, record: &Record) -> JobResult<Vec<String>> {
        Ok(self
            .dependency_identifiers(record)
            .await?
            .iter()
            .filter(|identifier| !is_path_identifier(identifier))
            .cloned()
            .collect())
    }

    // --- resolution jobs --------------------------------------------------

    /// Resolutions of the path identifiers, cached only for files under the
    /// root `node_modules`.
    pub async fn resolve_path_dependencies(
        &self,
        record: &Record,
    ) -> JobResult<Arc<BTreeMap<String, PathBuf>>> {
        record
            .cells
            .resolved_path_dependencies
            .get_or_init(|| async {
                let cacheable = self.should_cache_resolved_path_dependencies(record);
                let annotations = self.annotations(record).await?;
                if cacheable {
                    if let Some(cached) = annotations.lock().resolve_path_dependencies.clone() {
                        return Ok(Arc::new(paths_from_cache(cached)));
                    }
                }

                let identifiers = self.path_dependency_identifiers(record).await?;
                let resolved = self.resolve_identifiers(record, identifiers).await?;
                if cacheable {
                    annotations.lock().resolve_path_dependencies = Some(paths_to_cache(&resolved));
                }
                Ok(Arc::new(resolved))
            })
            .await
            .clone()
    }

    /// Resolutions of the package identifiers; always cached.
    pub async fn resolve_package_dependencies(
        &self,
        record: &Record,
    ) -> JobResult<Arc<BTreeMap<String, PathBuf>>> {
        record
            .cells
            .resolved_package_dependencies
            .get_or_init(|| async {
                let annotations = self.annotations(record).await?;
                if let Some(cached) = annotations.lock().resolve_package_dependencies.clone() {
                    return Ok(Arc::new(paths_from_cache(cached)));
                }

                let identifiers = self.package_dependency_identifiers(record).await?;
                let resolved = self.resolve_identifiers(record, identifiers).await?;
                annotations.lock().resolve_package_dependencies = Some(paths_to_cache(&resolved));
                Ok(Arc::new(resolved))
            })
            .await
            .clone()
    }

    /// Union of path and package resolutions; path entries win collisions.
    pub async fn resolved_dependencies(
        &self,
        record: &Record,
    ) -> JobResult<BTreeMap<String, PathBuf>> {
        let (packages, paths) = tokio::try_join!(
            self.resolve_package_dependencies(record),
            self.resolve_path_dependencies(record)
        )?;
        let mut resolved = (*packages).clone();
        for (identifier, path) in paths.iter() {
            resolved.insert(identifier.clone(), path.clone());
        }
        Ok(resolved)
    }

    /// Resolver bound to the record's containing directory.
    pub fn resolver(&self, record: &Record) -> BoundResolver {
        BoundResolver::new(self.resolver.clone(), record.file.dir().to_path_buf())
    }

    async fn resolve_identifiers(
        &self,
        record: &Record,
        identifiers: Vec<String>,
    ) -> JobResult<BTreeMap<String, PathBuf>> {
        let resolver = self.resolver(record);
        match task::spawn_blocking(move || {
            let mut resolved = BTreeMap::new();
            for identifier in identifiers {
                let path = resolver.resolve(&identifier)?;
                resolved.insert(identifier, path);
            }
            Ok(resolved)
        })
        .await
        {
            Ok(result) => result,
            Err(err) => Err(JobError::io(record.file.path(), err)),
        }
    }

    // --- output jobs ------------------------------------------------------

    /// The textual output to serve: post-processed CSS, generated JS, raw
    /// text for JSON and the bootstrap runtime, nothing for binary assets.
    pub async fn code(&self, record: &Record) -> JobResult<Option<Arc<str>>> {
        record
            .cells
            .code
            .get_or_init(|| async {
                if !self.is_text_file(record) {
                    return Ok(None);
                }
                if self.options.is_bootstrap(record.file.path()) {
                    return Ok(Some(self.read_text(record).await?));
                }
                match record.file.ext().as_str() {
                    ".css" => {
                        let annotations = self.annotations(record).await?;
                        if let Some(cached) = annotations.lock().code.clone() {
                            return Ok(Some(Arc::from(cached)));
                        }
                        let artifacts = self.css_artifacts(record).await?;
                        annotations.lock().code = Some(artifacts.css.clone());
                        Ok(Some(Arc::from(artifacts.css.as_str())))
                    }
                    ".js" => {
                        let annotations = self.annotations(record).await?;
                        if let Some(cached) = annotations.lock().code.clone() {
                            return Ok(Some(Arc::from(cached)));
                        }
                        let artifacts = self.js_artifacts(record).await?;
                        annotations.lock().code = Some(artifacts.code.clone());
                        Ok(Some(Arc::from(artifacts.code.as_str())))
                    }
                    ".json" => Ok(Some(self.read_text(record).await?)),
                    other => Err(JobError::unknown_extension(record.file.path(), other)),
                }
            })
            .await
            .clone()
    }

    /// What the factory body closes over: the code itself for JS and JSON,
    /// the served URL as a JSON string for every other asset.
    pub async fn module_contents(&self, record: &Record) -> JobResult<String> {
        match record.file.ext().as_str() {
            ".js" | ".json" => match self.code(record).await? {
                Some(code) => Ok(code.to_string()),
                None => Err(JobError::unknown_extension(
                    record.file.path(),
                    &record.file.ext(),
                )),
            },
            _ => {
                let url = self.url(record).await?;
                serde_json::to_string(&url)
                    .map_err(|err| JobError::io(record.file.path(), err))
            }
        }
    }

    /// Module contents, shim-wrapped for non-JS assets.
    pub async fn module_code(&self, record: &Record) -> JobResult<String> {
        let contents = self.module_contents(record).await?;
        if self.should_shim_module_definition(record) {
            Ok(shim_module_code(&contents))
        } else {
            Ok(contents)
        }
    }

    /// The module-definition envelope the runtime loader parses. `None` for
    /// the bootstrap runtime, which is served verbatim.
    pub async fn module_definition(&self, record: &Record) -> JobResult<Option<Arc<str>>> {
        record
            .cells
            .module_definition
            .get_or_init(|| async {
                if self.options.is_bootstrap(record.file.path()) {
                    return Ok(None);
                }
                let name = record.file.name().into_owned();
                let dependencies = self.resolved_dependencies(record).await?;
                let hash = self.hash(record).await?;
                let module_code = self.module_code(record).await?;
                let definition =
                    render_module_definition(record.file.path(), &name, &dependencies, &hash, &module_code)?;
                Ok(Some(Arc::from(definition)))
            })
            .await
            .clone()
    }

    /// The served response body.
    pub async fn content(&self, record: &Record) -> JobResult<Option<Arc<str>>> {
        let ext = record.file.ext();
        if self.options.is_bootstrap(record.file.path()) || ext == ".css" {
            return self.code(record).await;
        }
        match ext.as_str() {
            ".js" | ".json" => self.module_definition(record).await,
            _ if !self.is_text_file(record) => Ok(None),
            other => Err(JobError::unknown_extension(record.file.path(), other)),
        }
    }

    /// Serialized source map: the post-processor's map for CSS, the
    /// generator's map shifted one line for the module envelope for JS,
    /// nothing for JSON and binary assets.
    pub async fn source_map(&self, record: &Record) -> JobResult<Option<Arc<str>>> {
        record
            .cells
            .source_map
            .get_or_init(|| async {
                if !self.is_text_file(record) {
                    return Ok(None);
                }
                match record.file.ext().as_str() {
                    ".json" => Ok(None),
                    ".css" => {
                        let annotations = self.annotations(record).await?;
                        if let Some(cached) = annotations.lock().source_map.clone() {
                            return Ok(Some(Arc::from(cached)));
                        }
                        let artifacts = self.css_artifacts(record).await?;
                        match &artifacts.map {
                            Some(map) => {
                                annotations.lock().source_map = Some(map.clone());
                                Ok(Some(Arc::from(map.as_str())))
                            }
                            None => Ok(None),
                        }
                    }
                    ".js" => {
                        let annotations = self.annotations(record).await?;
                        if let Some(cached) = annotations.lock().source_map.clone() {
                            return Ok(Some(Arc::from(cached)));
                        }
                        let artifacts = self.js_artifacts(record).await?;
                        match &artifacts.map {
                            Some(map) => {
                                let shifted = js::offset_source_map(map);
                                annotations.lock().source_map = Some(shifted.clone());
                                Ok(Some(Arc::from(shifted)))
                            }
                            None => Ok(None),
                        }
                    }
                    other => Err(JobError::unknown_extension(record.file.path(), other)),
                }
            })
            .await
            .clone()
    }

    /// Extra files the record depends on; hook point for multi-file
    /// compilers, default empty.
    pub async fn file_dependencies(&self, record: &Record) -> JobResult<Arc<Vec<PathBuf>>> {
        record
            .cells
            .file_dependencies
            .get_or_init(|| async {
                let dependencies = match &self.options.file_dependencies {
                    Some(hook) => hook(&record.file),
                    None => Vec::new(),
                };
                Ok(Arc::new(dependencies))
            })
            .await
            .clone()
    }

    /// Force everything a server needs for this record, concurrently.
    pub async fn ready(&self, record: &Record) -> JobResult<()> {
        tokio::try_join!(
            self.hash(record),
            self.content(record),
            self.module_definition(record),
            self.url(record),
            self.source_map_annotation(record),
            self.hashed_filename(record),
            self.file_dependencies(record),
            async { Ok::<_, JobError>(self.is_text_file(record)) },
            async { Ok::<_, JobError>(self.mime_type(record)) },
        )?;
        Ok(())
    }
}

/// Strip URL-loader suffixes: everything from the first `!`, `?`, or `#`.
fn strip_loader_suffix(identifier: &str) -> &str {
    match identifier.find(['!', '?', '#']) {
        Some(index) => &identifier[..index],
        None => identifier,
    }
}

fn is_path_identifier(identifier: &str) -> bool {
    identifier.starts_with('.') || Path::new(identifier).is_absolute()
}

fn paths_from_cache(cached: BTreeMap<String, String>) -> BTreeMap<String, PathBuf> {
    cached
        .into_iter()
        .map(|(identifier, path)| (identifier, PathBuf::from(path)))
        .collect()
}

fn paths_to_cache(resolved: &BTreeMap<String, PathBuf>) -> BTreeMap<String, String> {
    resolved
        .iter()
        .map(|(identifier, path)| (identifier.clone(), path.to_string_lossy().into_owned()))
        .collect()
}

/// Inline source-map comment: a block comment for CSS, a line comment for
/// JS and JSON.
pub fn source_map_comment(ext: &str, map: &str) -> String {
    let encoded = STANDARD.encode(map);
    if ext == ".css" {
        format!("\n/*# sourceMappingURL=data:application/json;charset=utf-8;base64,{encoded} */")
    } else {
        format!("\n//# sourceMappingURL=data:application/json;charset=utf-8;base64,{encoded}")
    }
}

/// The interop shim for non-JS assets. The runtime loader and the hot
/// replacement hook both parse this exact shape.
fn shim_module_code(contents: &str) -> String {
    format!(
        "Object.defineProperty(exports, \"__esModule\", {{\n  value: true\n}});\nexports[\"default\"] = {contents};\nif (module.hot) {{\n  module.hot.accept();\n}}"
    )
}

/// The single-line module-definition envelope. Whitespace and quoting are
/// load-bearing: the downstream runtime parses this string directly.
fn render_module_definition(
    path: &Path,
    name: &str,
    dependencies: &BTreeMap<String, PathBuf>,
    hash: &str,
    module_code: &str,
) -> JobResult<String> {
    let deps: BTreeMap<&String, String> = dependencies
        .iter()
        .map(|(identifier, target)| (identifier, target.to_string_lossy().into_owned()))
        .collect();
    let name_json = serde_json::to_string(name).map_err(|err| JobError::io(path, err))?;
    let deps_json = serde_json::to_string(&deps).map_err(|err| JobError::io(path, err))?;
    let hash_json = serde_json::to_string(hash).map_err(|err| JobError::io(path, err))?;
    Ok(format!(
        "__modules.defineModule({{name: {name_json}, deps: {deps_json}, hash: {hash_json}, factory: function(module, exports, require, process, global) {{\n{module_code}\n}}}});"
    ))
}

fn mime_for_ext(ext: &str) -> Option<&'static str> {
    match ext {
        ".js" => Some("application/javascript"),
        ".json" => Some("application/json"),
        ".css" => Some("text/css"),
        ".html" => Some("text/html"),
        ".png" => Some("image/png"),
        ".jpg" | ".jpeg" => Some("image/jpeg"),
        ".gif" => Some("image/gif"),
        ".svg" => Some("image/svg+xml"),
        ".webp" => Some("image/webp"),
        ".ico" => Some("image/x-icon"),
        ".woff" => Some("font/woff"),
        ".woff2" => Some("font/woff2"),
        ".ttf" => Some("font/ttf"),
        ".eot" => Some("application/vnd.ms-fontobject"),
        ".txt" => Some("text/plain"),
        _ => None,
    }
}
