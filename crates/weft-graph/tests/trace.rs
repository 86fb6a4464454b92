//! End-to-end trace, prune, and cancellation behavior.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashMap as HashMap;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

use weft_graph::{DependencyGraph, GraphEvent};

fn edges(pairs: &[(&str, &[&str])]) -> Arc<HashMap<PathBuf, Vec<PathBuf>>> {
    let mut map = HashMap::default();
    for (from, deps) in pairs {
        map.insert(
            PathBuf::from(*from),
            deps.iter().map(|dep| PathBuf::from(*dep)).collect(),
        );
    }
    Arc::new(map)
}

fn graph_over(
    map: Arc<HashMap<PathBuf, Vec<PathBuf>>>,
) -> (DependencyGraph, UnboundedReceiver<GraphEvent>) {
    DependencyGraph::new(move |id: PathBuf| {
        let map = map.clone();
        async move { Ok(map.get(&id).cloned().unwrap_or_default()) }
    })
}

/// Drain events until `Completed`, with a timeout guarding against hangs.
async fn drain_until_complete(events: &mut UnboundedReceiver<GraphEvent>) -> Vec<GraphEvent> {
    let mut seen = Vec::new();
    loop {
        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("trace did not complete")
            .expect("event channel closed");
        let done = matches!(event, GraphEvent::Completed);
        seen.push(event);
        if done {
            return seen;
        }
    }
}

fn added_ids(events: &[GraphEvent]) -> Vec<&Path> {
    events
        .iter()
        .filter_map(|event| match event {
            GraphEvent::Added(id) => Some(id.as_path()),
            _ => None,
        })
        .collect()
}

fn pruned_ids(events: &[GraphEvent]) -> Vec<&Path> {
    events
        .iter()
        .filter_map(|event| match event {
            GraphEvent::Pruned(id) => Some(id.as_path()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn traces_a_cycle_and_completes_once() {
    let map = edges(&[("/a", &["/b"]), ("/b", &["/c"]), ("/c", &["/b"])]);
    let (graph, mut events) = graph_over(map);

    graph.trace("/a");
    let seen = drain_until_complete(&mut events).await;

    assert_eq!(graph.len(), 3);
    assert!(graph.is_defined(Path::new("/a")));
    assert!(graph.is_defined(Path::new("/b")));
    assert!(graph.is_defined(Path::new("/c")));

    // The cycle edge is stored without special-casing.
    let c = graph.node(Path::new("/c")).unwrap();
    assert!(c.dependencies.contains(Path::new("/b")));

    assert_eq!(added_ids(&seen).len(), 3);
    assert_eq!(
        seen.iter()
            .filter(|event| matches!(event, GraphEvent::Completed))
            .count(),
        1
    );

    // Quiescence: nothing further arrives.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn every_edge_is_symmetric() {
    let map = edges(&[
        ("/a", &["/b", "/c"]),
        ("/b", &["/c"]),
        ("/c", &["/b"]),
    ]);
    let (graph, mut events) = graph_over(map);

    graph.trace("/a");
    drain_until_complete(&mut events).await;

    for id in graph.node_ids() {
        let node = graph.node(&id).unwrap();
        for dep in &node.dependencies {
            let dep_node = graph.node(dep).unwrap();
            assert!(
                dep_node.dependents.contains(&id),
                "edge {} -> {} lost its reverse edge",
                id.display(),
                dep.display()
            );
        }
        for parent in &node.dependents {
            let parent_node = graph.node(parent).unwrap();
            assert!(parent_node.dependencies.contains(&id));
        }
    }
}

#[tokio::test]
async fn prune_without_roots_removes_the_whole_component() {
    let map = edges(&[("/a", &["/b"]), ("/b", &["/c"]), ("/c", &["/b"])]);
    let (graph, mut events) = graph_over(map);

    graph.trace("/a");
    drain_until_complete(&mut events).await;

    graph.prune(Path::new("/a"));

    assert!(graph.is_empty());
    let mut pruned = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let GraphEvent::Pruned(id) = event {
            pruned.push(id);
        }
    }
    assert_eq!(pruned.len(), 3);
}

#[tokio::test]
async fn prune_keeps_everything_a_permanent_root_reaches() {
    let map = edges(&[("/a", &["/b"]), ("/b", &["/c"]), ("/c", &["/b"])]);
    let (graph, mut events) = graph_over(map);

    graph.trace("/a");
    drain_until_complete(&mut events).await;

    graph.set_permanent("/c");
    graph.prune(Path::new("/a"));

    assert!(!graph.is_defined(Path::new("/a")));
    assert!(graph.is_defined(Path::new("/b")));
    assert!(graph.is_defined(Path::new("/c")));

    let mut pruned = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let GraphEvent::Pruned(id) = event {
            pruned.push(id);
        }
    }
    assert_eq!(pruned, vec![PathBuf::from("/a")]);

    // Survivors no longer list the pruned node as a dependent.
    let b = graph.node(Path::new("/b")).unwrap();
    assert!(!b.dependents.contains(Path::new("/a")));
}

#[tokio::test]
async fn prune_is_idempotent() {
    let map = edges(&[("/a", &[])]);
    let (graph, mut events) = graph_over(map);

    graph.trace("/a");
    drain_until_complete(&mut events).await;

    graph.prune(Path::new("/a"));
    graph.prune(Path::new("/a"));

    let mut rest = Vec::new();
    while let Ok(event) = events.try_recv() {
        rest.push(event);
    }
    assert_eq!(pruned_ids(&rest), vec![Path::new("/a")]);
}

#[tokio::test]
async fn invalidated_pending_trace_adds_nothing() {
    let (graph, mut events) = DependencyGraph::new(|_id: PathBuf| async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(vec![PathBuf::from("/b")])
    });

    graph.trace("/a");
    // Let the job dispatch, then invalidate it mid-flight.
    tokio::time::sleep(Duration::from_millis(10)).await;
    graph.prune(Path::new("/a"));
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(graph.is_empty());
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(added_ids(&seen).is_empty());
    assert_eq!(pruned_ids(&seen), vec![Path::new("/a")]);
}

#[tokio::test]
async fn provider_failure_emits_error_and_still_completes() {
    let (graph, mut events) = DependencyGraph::new(|id: PathBuf| async move {
        if id == Path::new("/broken") {
            anyhow::bail!("unreadable: {}", id.display());
        }
        Ok(vec![PathBuf::from("/broken")])
    });

    graph.trace("/ok");
    let seen = drain_until_complete(&mut events).await;

    // The failing node was never added; the edge source still exists.
    assert!(graph.is_defined(Path::new("/ok")));
    assert!(graph.is_defined(Path::new("/broken")));

    let failed: Vec<_> = seen
        .iter()
        .filter_map(|event| match event {
            GraphEvent::Failed { id, .. } => Some(id.as_path()),
            _ => None,
        })
        .collect();
    assert_eq!(failed, vec![Path::new("/broken")]);
}
