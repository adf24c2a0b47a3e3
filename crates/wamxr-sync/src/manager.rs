//! Sync manager: one peer's view of the shared world.
//!
//! Observer callbacks from instances and the connection manager only queue
//! operations; the document is written later, in [`SyncManager::flush`],
//! where reading a state value may await. Updates leave through
//! [`SyncManager::take_update`] or [`SyncManager::pump`].
//!
//! Two peers may concurrently plug different cables into the same
//! single-connection endpoint. Every peer settles that the same way: the
//! cable with the lowest key stays, the others are withdrawn.

use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::{Arc, Weak};
use wamxr_comms::{PeerLink, SyncMessage};
use wamxr_core::StableId;
use wamxr_node::{Cardinality, EndpointKey};
use wamxr_runtime::{
    ConnectionKey, ConnectionObserver, InstanceEvent, InstanceObserver, Node3DInstance,
    RuntimeWorld,
};

use crate::SyncError;
use crate::collection::{EntryHandler, SharedDoc, SyncedCollection};
use crate::document::SharedDocument;
use crate::handlers::{CONNECTION_KIND, ConnectionHandler, NodeHandler};

/// Collection holding Node3D instances
pub const NODES: &str = "nodes";
/// Collection holding patch cables
pub const CONNECTIONS: &str = "connections";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Op {
    State { id: StableId, key: String },
    RemoveNode(StableId),
    Connect(ConnectionKey),
    Disconnect(ConnectionKey),
}

fn connection_id(key: &ConnectionKey) -> StableId {
    StableId::from(key.to_string())
}

/// How an endpoint takes part in settling cable conflicts
enum Claim {
    /// No node for it here, or the node has no such connectable
    Dangling,
    /// Its node is still being built
    Unknown,
    Exclusive,
    Shared,
}

pub struct SyncManager {
    document: SharedDoc,
    nodes: SyncedCollection<NodeHandler>,
    connections: SyncedCollection<ConnectionHandler>,
    ops: Mutex<Vec<Op>>,
    /// Update the link refused, sent again on the next pump
    unsent: Mutex<Option<Vec<u8>>>,
}

impl SyncManager {
    /// Attach a document to `world`.
    ///
    /// Only instances created after this call are observed.
    pub fn new(world: &RuntimeWorld, document: SharedDocument) -> Arc<Self> {
        let document: SharedDoc = Arc::new(Mutex::new(document));
        let manager = Arc::new(Self {
            nodes: SyncedCollection::new(
                NODES,
                document.clone(),
                NodeHandler::new(world.builder.clone()),
            ),
            connections: SyncedCollection::new(
                CONNECTIONS,
                document.clone(),
                ConnectionHandler::new(world.connections.clone()),
            ),
            document,
            ops: Mutex::new(Vec::new()),
            unsent: Mutex::new(None),
        });
        world
            .builder
            .add_observer(Arc::downgrade(&manager) as Weak<dyn InstanceObserver>);
        world
            .connections
            .add_observer(Arc::downgrade(&manager) as Weak<dyn ConnectionObserver>);
        manager
    }

    pub fn document(&self) -> &SharedDoc {
        &self.document
    }

    pub fn node(&self, id: &StableId) -> Option<Node3DInstance> {
        self.nodes.get(id)
    }

    pub fn node_ids(&self) -> Vec<StableId> {
        self.nodes.ids()
    }

    /// Cables known to the document whose endpoints have not appeared yet
    pub fn pending_connections(&self) -> Vec<ConnectionKey> {
        self.connections.handler().pending()
    }

    /// Create a node of `kind` under a fresh id, here and for every peer
    pub async fn create_node(&self, kind: &str) -> Result<Node3DInstance, SyncError> {
        self.create_node_with_id(StableId::generate(), kind).await
    }

    pub async fn create_node_with_id(
        &self,
        id: StableId,
        kind: &str,
    ) -> Result<Node3DInstance, SyncError> {
        tracing::debug!("Creating {} ({})", id, kind);
        self.nodes.create(id, kind).await
    }

    fn queue(&self, op: Op) {
        let mut ops = self.ops.lock();
        // Repeated state notifications collapse; the value is read at flush
        if matches!(op, Op::State { .. }) && ops.contains(&op) {
            return;
        }
        ops.push(op);
    }

    /// Write queued local changes into the document, in order.
    ///
    /// A failing operation is logged and skipped.
    pub async fn flush(&self) -> usize {
        let ops = std::mem::take(&mut *self.ops.lock());
        let mut written = 0;
        for op in ops {
            let result = match &op {
                Op::State { id, key } => self.nodes.push_state(id, key).await,
                Op::RemoveNode(id) => self.nodes.remove_local(id).map(|l| l.is_some()),
                Op::Connect(key) => self
                    .connections
                    .adopt(connection_id(key), CONNECTION_KIND, key.clone())
                    .map(|()| true),
                Op::Disconnect(key) => self
                    .connections
                    .remove_local(&connection_id(key))
                    .map(|l| l.is_some()),
            };
            match result {
                Ok(true) => written += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!("Could not record {:?}: {}", op, e),
            }
        }
        written
    }

    /// Local changes since the last call, as incremental document bytes
    pub async fn take_update(&self) -> Option<Vec<u8>> {
        self.flush().await;
        self.document.lock().take_update()
    }

    /// Merge a peer's update (or whole document) and bring the world in line.
    ///
    /// Queued local changes are written first so that conflicts between
    /// them and the update are settled now.
    pub async fn apply_update(&self, bytes: &[u8]) -> Result<(), SyncError> {
        self.flush().await;
        self.document.lock().apply_update(bytes)?;
        self.refresh().await
    }

    /// Bring the world in line with the document.
    ///
    /// Nodes go first so that cables find their endpoints.
    pub async fn refresh(&self) -> Result<(), SyncError> {
        self.nodes.apply_remote_changes().await?;
        self.connections.apply_remote_changes().await?;
        self.settle_conflicts()?;
        self.connections.handler().retry_pending();
        Ok(())
    }

    fn claim(&self, endpoint: &EndpointKey) -> Claim {
        if !self.document.lock().contains(NODES, &endpoint.instance) {
            return Claim::Dangling;
        }
        // Not live at all: it failed to build here
        let Some(instance) = self.nodes.get(&endpoint.instance) else {
            return Claim::Dangling;
        };
        if !instance.is_active() {
            return Claim::Unknown;
        }
        match instance.connectable(&endpoint.connectable) {
            Some(c) if c.cardinality() == Cardinality::Single => Claim::Exclusive,
            Some(_) => Claim::Shared,
            None => Claim::Dangling,
        }
    }

    /// Withdraw every cable that lost a single-connection endpoint to a
    /// cable with a lower key. Returns how many were withdrawn.
    ///
    /// Waits while any cable has an endpoint whose node is still being
    /// built, so that every peer decides with the same knowledge.
    pub fn settle_conflicts(&self) -> Result<usize, SyncError> {
        let mut keys: Vec<ConnectionKey> = self
            .document
            .lock()
            .snapshot(CONNECTIONS)
            .keys()
            .filter_map(|id| ConnectionKey::parse(id.as_str()))
            .collect();
        keys.sort();

        let mut claimed: BTreeSet<EndpointKey> = BTreeSet::new();
        let mut losers = Vec::new();
        for key in keys {
            let mut exclusive = Vec::new();
            let mut dangling = false;
            for endpoint in [&key.output, &key.input] {
                match self.claim(endpoint) {
                    Claim::Unknown => {
                        tracing::debug!("Not settling cables yet, {} is not up", endpoint);
                        return Ok(0);
                    }
                    Claim::Dangling => dangling = true,
                    Claim::Exclusive => exclusive.push(endpoint.clone()),
                    Claim::Shared => {}
                }
            }
            if dangling {
                continue;
            }
            if exclusive.iter().any(|e| claimed.contains(e)) {
                losers.push(key);
            } else {
                claimed.extend(exclusive);
            }
        }

        for key in &losers {
            tracing::info!("Withdrawing {}, its endpoint belongs to an earlier cable", key);
            self.connections.remove_local(&connection_id(key))?;
            self.connections.handler().destroy(key);
        }
        Ok(losers.len())
    }

    /// Whole document, local changes included
    pub async fn save(&self) -> Vec<u8> {
        self.flush().await;
        self.document.lock().save()
    }

    /// Ask the other end of `link` for its whole document
    pub fn request_snapshot(&self, link: &PeerLink) -> bool {
        link.send(SyncMessage::RequestSnapshot)
    }

    /// Exchange pending messages with one peer. Returns how many documents
    /// or updates were applied.
    pub async fn pump(&self, link: &PeerLink) -> usize {
        let mut applied = 0;
        for message in link.drain() {
            match message {
                SyncMessage::Update(bytes) | SyncMessage::Snapshot(bytes) => {
                    match self.apply_update(&bytes).await {
                        Ok(()) => applied += 1,
                        Err(e) => tracing::warn!("Ignoring update from peer: {}", e),
                    }
                }
                SyncMessage::RequestSnapshot => {
                    let snapshot = self.save().await;
                    if !link.send(SyncMessage::Snapshot(snapshot)) {
                        tracing::warn!("Peer link refused a snapshot");
                    }
                }
            }
        }

        let earlier = self.unsent.lock().take();
        let fresh = self.take_update().await;
        let outgoing = match (earlier, fresh) {
            (Some(mut earlier), Some(fresh)) => {
                earlier.extend(fresh);
                Some(earlier)
            }
            (earlier, fresh) => earlier.or(fresh),
        };
        let Some(update) = outgoing else {
            return applied;
        };
        if !link.send(SyncMessage::Update(update.clone())) {
            tracing::debug!("Peer link busy, keeping {} bytes", update.len());
            *self.unsent.lock() = Some(update);
        }
        applied
    }
}

impl InstanceObserver for SyncManager {
    fn on_instance_event(&self, instance: &Node3DInstance, event: &InstanceEvent) {
        match event {
            InstanceEvent::StateChanged(key) => self.queue(Op::State {
                id: instance.id().clone(),
                key: key.clone(),
            }),
            InstanceEvent::DeleteRequested => self.queue(Op::RemoveNode(instance.id().clone())),
            InstanceEvent::Activated => {
                self.connections.handler().retry_pending();
            }
            InstanceEvent::ConnectableRemoved { .. } | InstanceEvent::Disposed => {}
        }
    }
}

impl ConnectionObserver for SyncManager {
    fn on_connected(&self, key: &ConnectionKey) {
        self.queue(Op::Connect(key.clone()));
    }

    fn on_disconnected(&self, key: &ConnectionKey) {
        self.queue(Op::Disconnect(key.clone()));
    }
}
