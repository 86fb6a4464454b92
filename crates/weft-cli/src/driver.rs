//! The tracer driver.
//!
//! Seeds the graph with entry files (each marked permanent), bridges the
//! graph's dependency provider to the record store's resolved dependencies,
//! waits for quiescence, then forces artifacts and persists cache
//! annotations for every surviving node.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use tracing::{debug, info, warn};

use weft::{dependency_tree_hash, CacheSet, FileRef, RecordStore, StoreOptions};
use weft_graph::{DependencyGraph, GraphEvent};

use crate::cli::Cli;

/// Summary of one trace run.
#[derive(Debug)]
pub struct TraceReport {
    /// Every node in the graph at quiescence.
    pub nodes: Vec<PathBuf>,
    /// Files whose trace or artifact build failed, with the failure text.
    pub errors: Vec<(PathBuf, String)>,
    pub elapsed: Duration,
}

/// Run a trace over an existing store.
///
/// The graph asks the store for each node's resolved dependencies; newly
/// discovered files recurse until the pending-job set drains. Trace failures
/// are reported, not fatal: other branches keep tracing.
pub async fn trace_graph(
    store: Arc<RecordStore>,
    entries: &[FileRef],
) -> anyhow::Result<TraceReport> {
    if entries.is_empty() {
        bail!("no entry files given");
    }

    let started = Instant::now();

    let provider_store = store.clone();
    let (graph, mut events) = DependencyGraph::new(move |id: PathBuf| {
        let store = provider_store.clone();
        async move {
            let record = store.create(FileRef::new(&id)?);
            let resolved = store.resolved_dependencies(&record).await?;
            Ok(resolved.into_values().collect())
        }
    });

    for entry in entries {
        graph.set_permanent(entry.path());
        graph.trace(entry.path());
    }

    // A `Completed` can be stale when a later entry was seeded after an
    // earlier one drained the pending set; quiescence is confirmed against
    // the graph before breaking, and anything already queued behind the
    // final event is drained first.
    let mut errors: Vec<(PathBuf, String)> = Vec::new();
    while let Some(event) = events.recv().await {
        let completed = handle_event(&store, &mut errors, event);
        if completed && !graph.has_pending() {
            while let Ok(event) = events.try_recv() {
                handle_event(&store, &mut errors, event);
            }
            break;
        }
    }

    // Force servable artifacts and persist annotations for every node the
    // trace kept.
    let nodes = graph.node_ids();
    for id in &nodes {
        let Some(record) = store.get(id) else {
            continue;
        };
        match store.ready(&record).await {
            Ok(()) => {
                if let Err(err) = store.write_cache(&record).await {
                    warn!(file = %id.display(), error = %err, "cache write skipped");
                }
            }
            Err(err) => {
                warn!(file = %id.display(), error = %err, "artifact build failed");
                errors.push((id.clone(), err.to_string()));
            }
        }
    }

    let elapsed = started.elapsed();
    info!(
        nodes = nodes.len(),
        errors = errors.len(),
        elapsed_ms = elapsed.as_millis() as u64,
        "trace complete"
    );

    Ok(TraceReport {
        nodes,
        errors,
        elapsed,
    })
}

/// Build the store from CLI arguments and run a trace.
pub async fn execute(args: Cli) -> anyhow::Result<TraceReport> {
    let cwd = std::env::current_dir().context("failed to read the current directory")?;
    let source_root = match args.source_root {
        Some(root) if root.is_absolute() => root,
        Some(root) => cwd.join(root),
        None => cwd.clone(),
    };

    let mut options = StoreOptions::new(&source_root).with_root_url(args.root_url);
    if let Some(vendor) = args.vendor_root {
        options = options.with_vendor_root(absolutize(&cwd, vendor));
    }
    if let Some(bootstrap) = args.bootstrap {
        options = options.with_bootstrap_runtime(absolutize(&cwd, bootstrap));
    }
    for shim in &args.shims {
        let Some((name, path)) = shim.split_once('=') else {
            bail!("invalid --shim '{shim}': expected name=path");
        };
        options = options.with_core_shim(name, absolutize(&cwd, PathBuf::from(path)));
    }

    let caches = if args.no_cache {
        CacheSet::in_memory()
    } else {
        let cache_dir = args
            .cache_dir
            .map(|dir| absolutize(&cwd, dir))
            .unwrap_or_else(|| source_root.join(".weft-cache"));
        let tree_hash = dependency_tree_hash(&source_root);
        debug!(dir = %cache_dir.display(), tree_hash = %tree_hash, "opening caches");
        CacheSet::open(&cache_dir, &tree_hash).context("failed to open the cache directories")?
    };

    let mut entries = Vec::with_capacity(args.entries.len());
    for entry in args.entries {
        let entry = FileRef::new(absolutize(&cwd, entry))?;
        entries.push(entry);
    }

    let store = Arc::new(RecordStore::new(options, caches));
    trace_graph(store, &entries).await
}

/// Apply one graph event; returns true for `Completed`.
fn handle_event(
    store: &Arc<RecordStore>,
    errors: &mut Vec<(PathBuf, String)>,
    event: GraphEvent,
) -> bool {
    match event {
        GraphEvent::Added(id) => debug!(file = %id.display(), "added to graph"),
        GraphEvent::Traced(id) => debug!(file = %id.display(), "traced"),
        GraphEvent::Pruned(id) => {
            store.remove(&id);
        }
        GraphEvent::Failed { id, error } => {
            warn!(file = %id.display(), error = %format!("{error:#}"), "trace failed");
            errors.push((id, format!("{error:#}")));
        }
        GraphEvent::Completed => return true,
        GraphEvent::Started | GraphEvent::Tracing(_) => {}
    }
    false
}

fn absolutize(cwd: &std::path::Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        cwd.join(path)
    }
}
