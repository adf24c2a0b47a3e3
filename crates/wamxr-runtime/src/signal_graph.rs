//! Native signal graph.
//!
//! Stand-in for the audio engine's node graph: every connectable handle is a
//! vertex, every wired connection an edge. DSP is out of scope; the graph
//! keeps the topology and refuses edges between unknown or mismatched
//! handles.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use wamxr_core::SignalKind;
use wamxr_node::{NodeError, SignalBackend, SignalHandle};

/// A vertex in the signal graph
#[derive(Debug, Clone)]
pub struct SignalNode {
    pub handle: SignalHandle,
    pub label: String,
}

/// Directed edge between two handles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Edge {
    pub from: u64,
    pub to: u64,
}

#[derive(Default)]
struct GraphState {
    nodes: HashMap<u64, SignalNode>,
    edges: HashSet<Edge>,
    next_id: u64,
}

/// The session's signal graph
#[derive(Default)]
pub struct SignalGraph {
    state: Mutex<GraphState>,
    host_groups: AtomicUsize,
}

impl SignalGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.state.lock().nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.state.lock().edges.len()
    }

    pub fn edges(&self) -> Vec<Edge> {
        let mut edges: Vec<Edge> = self.state.lock().edges.iter().copied().collect();
        edges.sort_unstable_by_key(|e| (e.from, e.to));
        edges
    }

    pub fn node(&self, id: u64) -> Option<SignalNode> {
        self.state.lock().nodes.get(&id).cloned()
    }

    /// Handles downstream of `from`
    pub fn outgoing(&self, from: u64) -> Vec<u64> {
        let mut out: Vec<u64> = self
            .state
            .lock()
            .edges
            .iter()
            .filter(|e| e.from == from)
            .map(|e| e.to)
            .collect();
        out.sort_unstable();
        out
    }

    /// How many times a host group was registered
    pub fn host_group_registrations(&self) -> usize {
        self.host_groups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignalBackend for SignalGraph {
    fn create_handle(&self, kind: SignalKind, label: &str) -> SignalHandle {
        let mut state = self.state.lock();
        let handle = SignalHandle {
            id: state.next_id,
            kind,
        };
        state.next_id += 1;
        state.nodes.insert(
            handle.id,
            SignalNode {
                handle,
                label: label.to_string(),
            },
        );
        tracing::debug!("Created {} handle {} ({})", kind, handle.id, label);
        handle
    }

    fn release_handle(&self, handle: SignalHandle) {
        let mut state = self.state.lock();
        state
            .edges
            .retain(|e| e.from != handle.id && e.to != handle.id);
        if state.nodes.remove(&handle.id).is_some() {
            tracing::debug!("Released handle {}", handle.id);
        }
    }

    fn connect(&self, from: SignalHandle, to: SignalHandle) -> Result<(), NodeError> {
        let mut state = self.state.lock();
        let Some(source) = state.nodes.get(&from.id) else {
            return Err(NodeError::Signal(format!("Source handle {} not found", from.id)));
        };
        let Some(destination) = state.nodes.get(&to.id) else {
            return Err(NodeError::Signal(format!(
                "Destination handle {} not found",
                to.id
            )));
        };
        if source.handle.kind != destination.handle.kind {
            return Err(NodeError::Signal(format!(
                "Cannot route {} handle {} into {} handle {}",
                source.handle.kind, from.id, destination.handle.kind, to.id
            )));
        }

        if state.edges.insert(Edge {
            from: from.id,
            to: to.id,
        }) {
            tracing::debug!("Connected {} -> {}", from.id, to.id);
        }
        Ok(())
    }

    fn disconnect(&self, from: SignalHandle, to: SignalHandle) {
        let mut state = self.state.lock();
        if state.edges.remove(&Edge {
            from: from.id,
            to: to.id,
        }) {
            tracing::debug!("Disconnected {} -> {}", from.id, to.id);
        }
    }

    fn is_connected(&self, from: SignalHandle, to: SignalHandle) -> bool {
        self.state.lock().edges.contains(&Edge {
            from: from.id,
            to: to.id,
        })
    }

    async fn register_host_group(&self) -> String {
        let n = self.host_groups.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        format!("wamxr-host-{n}")
    }
}
