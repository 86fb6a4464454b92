//! Graph state, trace scheduling, and pruning.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};
use tokio::sync::mpsc;
use tracing::debug;

/// Produces the dependency list for a node.
///
/// The provider may suspend (file reads, parsing, resolution). Errors are
/// reported through [`GraphEvent::Failed`] and leave the graph untouched.
pub type DependencyProvider = Arc<
    dyn Fn(PathBuf) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<PathBuf>>> + Send>>
        + Send
        + Sync,
>;

/// A node in the dependency graph.
///
/// Invariant: for every edge `a -> b`, `b` is in `a.dependencies` iff `a` is
/// in `b.dependents`.
#[derive(Debug, Clone, Default)]
pub struct Node {
    pub dependencies: HashSet<PathBuf>,
    pub dependents: HashSet<PathBuf>,
}

/// Events emitted by the graph as tracing progresses.
#[derive(Debug)]
pub enum GraphEvent {
    /// The pending-job set became non-empty.
    Started,
    /// The pending-job set drained after at least one trace was dispatched.
    Completed,
    /// A node was inserted into the graph.
    Added(PathBuf),
    /// A node was removed by a prune.
    Pruned(PathBuf),
    /// A trace job was dispatched for a node.
    Tracing(PathBuf),
    /// A trace job finished and its results were spliced into the graph.
    Traced(PathBuf),
    /// The dependency provider failed; the node was not added.
    Failed { id: PathBuf, error: anyhow::Error },
}

struct PendingTrace {
    id: PathBuf,
    valid: AtomicBool,
}

#[derive(Default)]
struct GraphState {
    nodes: HashMap<PathBuf, Node>,
    permanent: HashSet<PathBuf>,
    pending: Vec<Arc<PendingTrace>>,
}

/// Cyclic dependency graph traced by cooperative async jobs.
///
/// All structural mutation happens under a single lock, so edge symmetry and
/// the pending-set accounting hold at every observable point. Cycles are
/// stored as-is; traversals are iterative and never assume acyclicity.
#[derive(Clone)]
pub struct DependencyGraph {
    state: Arc<Mutex<GraphState>>,
    events: mpsc::UnboundedSender<GraphEvent>,
    provider: DependencyProvider,
}

impl DependencyGraph {
    /// Create a graph around a dependency provider.
    ///
    /// Returns the graph together with the receiving end of its event
    /// channel. Dropping the receiver is allowed; events are then discarded.
    pub fn new<P, F>(provider: P) -> (Self, mpsc::UnboundedReceiver<GraphEvent>)
    where
        P: Fn(PathBuf) -> F + Send + Sync + 'static,
        F: Future<Output = anyhow::Result<Vec<PathBuf>>> + Send + 'static,
    {
        Self::from_provider(Arc::new(move |id| Box::pin(provider(id))))
    }

    /// Create a graph from an already-boxed provider.
    pub fn from_provider(provider: DependencyProvider) -> (Self, mpsc::UnboundedReceiver<GraphEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let graph = Self {
            state: Arc::new(Mutex::new(GraphState::default())),
            events,
            provider,
        };
        (graph, receiver)
    }

    /// Enqueue a trace job for `id`.
    ///
    /// The job runs on the next scheduler tick. If it is invalidated before
    /// (or while) the provider runs, it never mutates the graph.
    pub fn trace(&self, id: impl Into<PathBuf>) {
        let id = id.into();
        let job = Arc::new(PendingTrace {
            id: id.clone(),
            valid: AtomicBool::new(true),
        });

        {
            let mut state = self.state.lock();
            if state.pending.is_empty() {
                let _ = self.events.send(GraphEvent::Started);
            }
            state.pending.push(job.clone());
        }

        let _ = self.events.send(GraphEvent::Tracing(id));
        let graph = self.clone();
        tokio::spawn(async move { graph.run_trace(job).await });
    }

    /// Idempotently mark a node id as a permanent root.
    pub fn set_permanent(&self, id: impl Into<PathBuf>) {
        self.state.lock().permanent.insert(id.into());
    }

    /// Returns true if `id` is a node in the graph.
    pub fn is_defined(&self, id: &Path) -> bool {
        self.state.lock().nodes.contains_key(id)
    }

    /// Snapshot of a node's edges, if the node exists.
    pub fn node(&self, id: &Path) -> Option<Node> {
        self.state.lock().nodes.get(id).cloned()
    }

    /// Ids of every node currently in the graph.
    pub fn node_ids(&self) -> Vec<PathBuf> {
        self.state.lock().nodes.keys().cloned().collect()
    }

    /// Number of nodes in the graph.
    pub fn len(&self) -> usize {
        self.state.lock().nodes.len()
    }

    /// Returns true while trace jobs are pending.
    pub fn has_pending(&self) -> bool {
        !self.state.lock().pending.is_empty()
    }

    /// Returns true if the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove `id` and every successor the remaining permanent roots can no
    /// longer reach.
    ///
    /// Removal is computed by iterative reachability, so dependent cycles
    /// that hang off the pruned node are removed as a unit. Pending trace
    /// jobs for removed ids are invalidated. If `id` is not a node but has a
    /// pending job, that job is invalidated and `Pruned` is emitted for the
    /// id directly.
    pub fn prune(&self, id: &Path) {
        let mut state = self.state.lock();

        if !state.nodes.contains_key(id) {
            let had_pending = state.pending.iter().any(|job| job.id == id);
            if had_pending {
                Self::invalidate_pending(&mut state, id);
                let _ = self.events.send(GraphEvent::Pruned(id.to_path_buf()));
                self.check_complete(&state);
            }
            return;
        }

        let candidates = Self::forward_reachable(&state, id);
        let kept = Self::reachable_from_roots(&state, id);
        let removed: Vec<PathBuf> = candidates
            .into_iter()
            .filter(|candidate| !kept.contains(candidate))
            .collect();

        debug!(pruned = removed.len(), root = %id.display(), "pruning nodes");

        for target in &removed {
            state.permanent.remove(target);
            if let Some(node) = state.nodes.remove(target) {
                for dep in node.dependencies {
                    if let Some(dep_node) = state.nodes.get_mut(&dep) {
                        dep_node.dependents.remove(target);
                    }
                }
                for parent in node.dependents {
                    if let Some(parent_node) = state.nodes.get_mut(&parent) {
                        parent_node.dependencies.remove(target);
                    }
                }
            }
            Self::invalidate_pending(&mut state, target);
            let _ = self.events.send(GraphEvent::Pruned(target.clone()));
        }

        self.check_complete(&state);
    }

    fn run_trace(&self, job: Arc<PendingTrace>) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(self.run_trace_inner(job))
    }

    async fn run_trace_inner(&self, job: Arc<PendingTrace>) {
        // Invalidated before dispatch: prune already dropped the pending
        // entry and ran the completion check.
        if !job.valid.load(Ordering::SeqCst) {
            return;
        }

        let result = (self.provider)(job.id.clone()).await;

        let mut state = self.state.lock();
        // Invalidated while the provider ran: the graph must not be touched.
        if !job.valid.load(Ordering::SeqCst) {
            return;
        }

        match result {
            Err(error) => {
                Self::remove_pending(&mut state, &job);
                let _ = self.events.send(GraphEvent::Failed {
                    id: job.id.clone(),
                    error,
                });
                self.check_complete(&state);
            }
            Ok(dependencies) => {
                // Dependencies that are neither nodes nor covered by a valid
                // pending job get their own trace. The check runs while this
                // job is still pending, so a self-dependency does not
                // re-enqueue the node.
                let mut spawned = Vec::new();
                for dep in &dependencies {
                    let known = state.nodes.contains_key(dep)
                        || state
                            .pending
                            .iter()
                            .any(|pending| pending.id == *dep && pending.valid.load(Ordering::SeqCst));
                    if !known {
                        let child = Arc::new(PendingTrace {
                            id: dep.clone(),
                            valid: AtomicBool::new(true),
                        });
                        state.pending.push(child.clone());
                        spawned.push(child);
                    }
                }

                let mut added = Vec::new();
                if Self::ensure_node(&mut state, &job.id) {
                    added.push(job.id.clone());
                }
                for dep in &dependencies {
                    if Self::ensure_node(&mut state, dep) {
                        added.push(dep.clone());
                    }
                    Self::add_edge(&mut state, &job.id, dep);
                }

                Self::remove_pending(&mut state, &job);

                for id in added {
                    let _ = self.events.send(GraphEvent::Added(id));
                }
                let _ = self.events.send(GraphEvent::Traced(job.id.clone()));
                self.check_complete(&state);
                drop(state);

                for child in spawned {
                    let _ = self.events.send(GraphEvent::Tracing(child.id.clone()));
                    let graph = self.clone();
                    tokio::spawn(async move { graph.run_trace(child).await });
                }
            }
        }
    }

    /// Forward-reachable set from `start`, including `start` itself.
    fn forward_reachable(state: &GraphState, start: &Path) -> HashSet<PathBuf> {
        let mut seen = HashSet::default();
        let mut queue = vec![start.to_path_buf()];
        while let Some(current) = queue.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(node) = state.nodes.get(&current) {
                for dep in &node.dependencies {
                    if !seen.contains(dep) {
                        queue.push(dep.clone());
                    }
                }
            }
        }
        seen
    }

    /// Nodes reachable from the permanent roots once `removed` is gone.
    fn reachable_from_roots(state: &GraphState, removed: &Path) -> HashSet<PathBuf> {
        let mut seen = HashSet::default();
        let mut queue: Vec<PathBuf> = state
            .permanent
            .iter()
            .filter(|root| root.as_path() != removed && state.nodes.contains_key(*root))
            .cloned()
            .collect();
        while let Some(current) = queue.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(node) = state.nodes.get(&current) {
                for dep in &node.dependencies {
                    if dep.as_path() != removed && !seen.contains(dep) {
                        queue.push(dep.clone());
                    }
                }
            }
        }
        seen
    }

    fn ensure_node(state: &mut GraphState, id: &Path) -> bool {
        if state.nodes.contains_key(id) {
            return false;
        }
        state.nodes.insert(id.to_path_buf(), Node::default());
        true
    }

    fn add_edge(state: &mut GraphState, from: &Path, to: &Path) {
        if let Some(node) = state.nodes.get_mut(from) {
            node.dependencies.insert(to.to_path_buf());
        }
        if let Some(node) = state.nodes.get_mut(to) {
            node.dependents.insert(from.to_path_buf());
        }
    }

    fn remove_pending(state: &mut GraphState, job: &Arc<PendingTrace>) {
        state.pending.retain(|pending| !Arc::ptr_eq(pending, job));
    }

    fn invalidate_pending(state: &mut GraphState, id: &Path) {
        for pending in &state.pending {
            if pending.id == id {
                pending.valid.store(false, Ordering::SeqCst);
            }
        }
        state.pending.retain(|pending| pending.id != id);
    }

    fn check_complete(&self, state: &GraphState) {
        if state.pending.is_empty() {
            let _ = self.events.send(GraphEvent::Completed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_permanent_is_idempotent() {
        let (graph, _events) = DependencyGraph::new(|_| async { Ok(vec![]) });
        graph.set_permanent("/a");
        graph.set_permanent("/a");
        assert_eq!(graph.state.lock().permanent.len(), 1);
    }

    #[tokio::test]
    async fn prune_of_unknown_id_is_a_no_op() {
        let (graph, mut events) = DependencyGraph::new(|_| async { Ok(vec![]) });
        graph.prune(Path::new("/missing"));
        assert!(graph.is_empty());
        assert!(events.try_recv().is_err());
    }
}
