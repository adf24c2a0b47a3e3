//! Entry handlers for the two synced collections.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use wamxr_core::StableId;
use wamxr_node::{Incompatibility, NodeError, StateValue};
use wamxr_runtime::{BuilderRegistry, ConnectError, ConnectionKey, ConnectionManager, Node3DInstance};

use crate::SyncError;
use crate::collection::EntryHandler;

/// Kind recorded for every connection entry
pub const CONNECTION_KIND: &str = "connection";

/// Entries are Node3D instances built through the builder registry
pub struct NodeHandler {
    builder: Arc<BuilderRegistry>,
}

impl NodeHandler {
    pub const fn new(builder: Arc<BuilderRegistry>) -> Self {
        Self { builder }
    }
}

#[async_trait]
impl EntryHandler for NodeHandler {
    type Live = Node3DInstance;

    fn construct(&self, id: &StableId, kind: &str) -> Option<Node3DInstance> {
        Some(self.builder.new_instance(id.clone(), kind))
    }

    async fn activate(&self, live: &Node3DInstance) -> Result<(), SyncError> {
        live.instantiate().await?;
        Ok(())
    }

    fn destroy(&self, live: &Node3DInstance) {
        live.dispose();
    }

    fn apply_state(
        &self,
        live: &Node3DInstance,
        key: &str,
        value: StateValue,
    ) -> Result<(), NodeError> {
        live.set_state(key, value)
    }

    async fn read_state(&self, live: &Node3DInstance, key: &str) -> Option<StateValue> {
        live.get_state(key).await
    }
}

/// Entries are patch cables, keyed by `out_instance:out_id>in_instance:in_id`.
///
/// A cable whose endpoints are not there yet, or are held by another cable,
/// waits in `pending` and is retried whenever an instance activates or a
/// conflict is settled.
pub struct ConnectionHandler {
    connections: Arc<ConnectionManager>,
    pending: Mutex<BTreeSet<ConnectionKey>>,
}

impl ConnectionHandler {
    pub fn new(connections: Arc<ConnectionManager>) -> Self {
        Self {
            connections,
            pending: Mutex::new(BTreeSet::new()),
        }
    }

    /// Errors that may clear up later
    const fn can_wait(error: &ConnectError) -> bool {
        matches!(
            error,
            ConnectError::UnknownEndpoint(_)
                | ConnectError::Incompatible(
                    Incompatibility::InputOccupied | Incompatibility::OutputOccupied
                )
        )
    }

    pub fn pending(&self) -> Vec<ConnectionKey> {
        self.pending.lock().iter().cloned().collect()
    }

    /// Try every waiting cable again. Returns how many got connected.
    pub fn retry_pending(&self) -> usize {
        let waiting = self.pending();
        let mut connected = 0;
        for key in waiting {
            match self.connections.connect_replicated(&key) {
                Ok(()) | Err(ConnectError::AlreadyConnected(_)) => {
                    self.pending.lock().remove(&key);
                    connected += 1;
                }
                Err(e) if Self::can_wait(&e) => {}
                Err(e) => {
                    tracing::warn!("Dropping replicated connection {}: {}", key, e);
                    self.pending.lock().remove(&key);
                }
            }
        }
        connected
    }
}

#[async_trait]
impl EntryHandler for ConnectionHandler {
    type Live = ConnectionKey;

    fn construct(&self, id: &StableId, kind: &str) -> Option<ConnectionKey> {
        if kind != CONNECTION_KIND {
            tracing::warn!("Connection entry {} has kind {}", id, kind);
            return None;
        }
        ConnectionKey::parse(id.as_str())
    }

    async fn activate(&self, live: &ConnectionKey) -> Result<(), SyncError> {
        match self.connections.connect_replicated(live) {
            Ok(()) | Err(ConnectError::AlreadyConnected(_)) => Ok(()),
            Err(e) if Self::can_wait(&e) => {
                tracing::debug!("{} waits: {}", live, e);
                self.pending.lock().insert(live.clone());
                Ok(())
            }
            Err(e) => Err(SyncError::Rejected(format!("{live}: {e}"))),
        }
    }

    fn destroy(&self, live: &ConnectionKey) {
        self.pending.lock().remove(live);
        self.connections.disconnect_replicated(live);
    }

    fn apply_state(&self, _live: &ConnectionKey, key: &str, _value: StateValue) -> Result<(), NodeError> {
        Err(NodeError::InvalidState {
            key: key.to_string(),
            reason: "connections carry no state".to_string(),
        })
    }

    async fn read_state(&self, _live: &ConnectionKey, _key: &str) -> Option<StateValue> {
        None
    }
}
