//! Generic synced collection.
//!
//! Maps stable ids in one collection of the shared document to live
//! objects. What "live" means (a Node3D instance, a patch cable) is up to
//! the [`EntryHandler`]; the collection takes care of the document side:
//! writing local creations, removals and state keys, and turning remote
//! changes into construct / destroy / apply-state calls.
//!
//! Remote changes are found by diffing the document against the last
//! snapshot this collection applied or wrote, then handled in a fixed
//! order: removals, additions, state changes. New entries get every known
//! key replayed once activated (`ask_states`), so a key arriving before
//! its instance is ready is never lost.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use wamxr_core::StableId;
use wamxr_node::{NodeError, StateValue};

use crate::SyncError;
use crate::document::{CollectionSnapshot, EntrySnapshot, SharedDocument};

/// Document handle shared by every collection of a session
pub type SharedDoc = Arc<Mutex<SharedDocument>>;

/// Kind-specific side of a synced collection
#[async_trait]
pub trait EntryHandler: Send + Sync {
    type Live: Clone + Send + Sync + 'static;

    /// Build the live object for an entry, not yet activated
    fn construct(&self, id: &StableId, kind: &str) -> Option<Self::Live>;

    /// Bring the live object up
    async fn activate(&self, live: &Self::Live) -> Result<(), SyncError>;

    /// Release the live object of an entry that went away
    fn destroy(&self, live: &Self::Live);

    fn apply_state(&self, live: &Self::Live, key: &str, value: StateValue)
    -> Result<(), NodeError>;

    async fn read_state(&self, live: &Self::Live, key: &str) -> Option<StateValue>;
}

pub struct SyncedCollection<H: EntryHandler> {
    name: &'static str,
    document: SharedDoc,
    handler: H,
    live: Mutex<BTreeMap<StableId, H::Live>>,
    /// What this collection last saw in the document
    known: Mutex<CollectionSnapshot>,
}

impl<H: EntryHandler> SyncedCollection<H> {
    pub fn new(name: &'static str, document: SharedDoc, handler: H) -> Self {
        Self {
            name,
            document,
            handler,
            live: Mutex::new(BTreeMap::new()),
            known: Mutex::new(CollectionSnapshot::new()),
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }

    pub const fn handler(&self) -> &H {
        &self.handler
    }

    pub fn get(&self, id: &StableId) -> Option<H::Live> {
        self.live.lock().get(id).cloned()
    }

    pub fn ids(&self) -> Vec<StableId> {
        self.live.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.live.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.lock().is_empty()
    }

    /// Record a local creation: write `(id, kind)`, then construct and
    /// activate. The entry is withdrawn again when activation fails.
    pub async fn create(&self, id: StableId, kind: &str) -> Result<H::Live, SyncError> {
        let Some(live) = self.handler.construct(&id, kind) else {
            return Err(SyncError::Rejected(format!("{}/{id}", self.name)));
        };
        self.adopt(id.clone(), kind, live.clone())?;
        if let Err(e) = self.handler.activate(&live).await {
            self.remove_local(&id)?;
            self.handler.destroy(&live);
            return Err(e);
        }
        Ok(live)
    }

    /// Record a live object that already exists locally
    pub fn adopt(&self, id: StableId, kind: &str, live: H::Live) -> Result<(), SyncError> {
        self.document.lock().insert_entry(self.name, &id, kind)?;
        self.known.lock().insert(
            id.clone(),
            EntrySnapshot {
                kind: kind.to_string(),
                state: BTreeMap::new(),
            },
        );
        self.live.lock().insert(id, live);
        Ok(())
    }

    /// Withdraw a local entry. The live object is handed back, not destroyed.
    pub fn remove_local(&self, id: &StableId) -> Result<Option<H::Live>, SyncError> {
        let removed = self.document.lock().remove_entry(self.name, id)?;
        if removed {
            tracing::debug!("Removed {}/{} from the document", self.name, id);
        }
        self.known.lock().remove(id);
        Ok(self.live.lock().remove(id))
    }

    /// Read `key` from the live object and write it, touching nothing else.
    /// A value equal to the one last seen is not written again.
    pub async fn push_state(&self, id: &StableId, key: &str) -> Result<bool, SyncError> {
        let Some(live) = self.get(id) else {
            return Ok(false);
        };
        let Some(value) = self.handler.read_state(&live, key).await else {
            tracing::debug!("{}/{} has no value for {}", self.name, id, key);
            return Ok(false);
        };
        let json = serde_json::to_string(&value).map_err(|source| SyncError::Json {
            key: key.to_string(),
            source,
        })?;

        let unchanged = self
            .known
            .lock()
            .get(id)
            .is_some_and(|entry| entry.state.get(key) == Some(&json));
        if unchanged {
            return Ok(false);
        }

        let mut document = self.document.lock();
        if !document.contains(self.name, id) {
            // Removed while the value was being read
            return Ok(false);
        }
        document.put_state(self.name, id, key, &json)?;
        drop(document);

        if let Some(entry) = self.known.lock().get_mut(id) {
            entry.state.insert(key.to_string(), json);
        }
        Ok(true)
    }

    /// Apply every key the document holds for `id`
    pub fn ask_states(&self, id: &StableId) -> Result<usize, SyncError> {
        let Some(live) = self.get(id) else {
            return Ok(0);
        };
        let entry = self.document.lock().entry(self.name, id)?;
        let Some(entry) = entry else {
            return Ok(0);
        };
        let mut applied = 0;
        for (key, json) in &entry.state {
            if self.apply_one(id, &live, key, json) {
                applied += 1;
            }
        }
        Ok(applied)
    }

    fn apply_one(&self, id: &StableId, live: &H::Live, key: &str, json: &str) -> bool {
        let value: StateValue = match serde_json::from_str(json) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("{}/{}: unreadable value for {}: {}", self.name, id, key, e);
                return false;
            }
        };
        match self.handler.apply_state(live, key, value) {
            Ok(()) => true,
            Err(NodeError::NotReady(_)) => {
                // Replayed by ask_states once active
                tracing::debug!("{}/{} not ready, dropping {}", self.name, id, key);
                false
            }
            Err(e) => {
                tracing::warn!("{}/{} rejected {}: {}", self.name, id, key, e);
                false
            }
        }
    }

    /// Bring live objects in line with the document
    pub async fn apply_remote_changes(&self) -> Result<(), SyncError> {
        let current = self.document.lock().snapshot(self.name);
        let previous = std::mem::replace(&mut *self.known.lock(), current.clone());

        for id in previous.keys().filter(|id| !current.contains_key(*id)) {
            let removed = self.live.lock().remove(id);
            if let Some(live) = removed {
                tracing::info!("{}/{} removed by a peer", self.name, id);
                self.handler.destroy(&live);
            }
        }

        let mut added = Vec::new();
        for (id, entry) in &current {
            match previous.get(id) {
                None => {
                    if self.live.lock().contains_key(id) {
                        continue;
                    }
                    if let Some(live) = self.handler.construct(id, &entry.kind) {
                        self.live.lock().insert(id.clone(), live.clone());
                        added.push((id.clone(), live));
                    }
                }
                Some(before) => {
                    let Some(live) = self.get(id) else {
                        continue;
                    };
                    for (key, json) in &entry.state {
                        if before.state.get(key) != Some(json) {
                            self.apply_one(id, &live, key, json);
                        }
                    }
                }
            }
        }

        for (id, live) in added {
            tracing::info!("{}/{} created by a peer", self.name, id);
            match self.handler.activate(&live).await {
                Ok(()) => {
                    self.ask_states(&id)?;
                }
                Err(e) => {
                    tracing::warn!("{}/{} could not be brought up: {}", self.name, id, e);
                    self.live.lock().remove(&id);
                    self.handler.destroy(&live);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Live object is a map of applied state
    #[derive(Clone, Default)]
    struct Cell {
        kind: String,
        active: Arc<AtomicBool>,
        state: Arc<Mutex<BTreeMap<String, StateValue>>>,
        destroyed: Arc<AtomicBool>,
    }

    #[derive(Default)]
    struct CellHandler {
        refuse_activation: bool,
    }

    #[async_trait]
    impl EntryHandler for CellHandler {
        type Live = Cell;

        fn construct(&self, _id: &StableId, kind: &str) -> Option<Cell> {
            (kind != "forbidden").then(|| Cell {
                kind: kind.to_string(),
                ..Cell::default()
            })
        }

        async fn activate(&self, live: &Cell) -> Result<(), SyncError> {
            tokio::task::yield_now().await;
            if self.refuse_activation {
                return Err(SyncError::Rejected("refused".to_string()));
            }
            live.active.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn destroy(&self, live: &Cell) {
            live.destroyed.store(true, Ordering::SeqCst);
        }

        fn apply_state(&self, live: &Cell, key: &str, value: StateValue) -> Result<(), NodeError> {
            if !live.active.load(Ordering::SeqCst) {
                return Err(NodeError::NotReady(key.to_string()));
            }
            live.state.lock().insert(key.to_string(), value);
            Ok(())
        }

        async fn read_state(&self, live: &Cell, key: &str) -> Option<StateValue> {
            live.state.lock().get(key).cloned()
        }
    }

    fn pair() -> (
        SyncedCollection<CellHandler>,
        SharedDoc,
        SyncedCollection<CellHandler>,
        SharedDoc,
    ) {
        let a_doc: SharedDoc = Arc::new(Mutex::new(SharedDocument::with_peer_name("a")));
        let b_doc: SharedDoc = Arc::new(Mutex::new(SharedDocument::with_peer_name("b")));
        (
            SyncedCollection::new("cells", a_doc.clone(), CellHandler::default()),
            a_doc,
            SyncedCollection::new("cells", b_doc.clone(), CellHandler::default()),
            b_doc,
        )
    }

    fn ship(from: &SharedDoc, to: &SharedDoc) {
        let update = from.lock().take_update();
        if let Some(update) = update {
            to.lock().apply_update(&update).unwrap();
        }
    }

    #[tokio::test]
    async fn test_remote_creation_and_removal() {
        let (a, a_doc, b, b_doc) = pair();
        let id = StableId::from("c1");
        a.create(id.clone(), "counter").await.unwrap();

        ship(&a_doc, &b_doc);
        b.apply_remote_changes().await.unwrap();
        let remote = b.get(&id).unwrap();
        assert_eq!(remote.kind, "counter");
        assert!(remote.active.load(Ordering::SeqCst));

        a.remove_local(&id).unwrap();
        ship(&a_doc, &b_doc);
        b.apply_remote_changes().await.unwrap();
        assert!(b.get(&id).is_none());
        assert!(remote.destroyed.load(Ordering::SeqCst));

        // Idempotent
        b.apply_remote_changes().await.unwrap();
        assert!(b.is_empty());
    }

    #[tokio::test]
    async fn test_state_is_key_scoped() {
        let (a, a_doc, b, b_doc) = pair();
        let id = StableId::from("c1");
        let local = a.create(id.clone(), "counter").await.unwrap();
        ship(&a_doc, &b_doc);
        b.apply_remote_changes().await.unwrap();
        let remote = b.get(&id).unwrap();

        local.state.lock().insert("x".to_string(), serde_json::json!(1));
        local.state.lock().insert("y".to_string(), serde_json::json!(2));
        assert!(a.push_state(&id, "x").await.unwrap());
        ship(&a_doc, &b_doc);
        b.apply_remote_changes().await.unwrap();
        assert_eq!(remote.state.lock().len(), 1);

        assert!(a.push_state(&id, "y").await.unwrap());
        ship(&a_doc, &b_doc);
        b.apply_remote_changes().await.unwrap();
        assert_eq!(
            remote.state.lock().get("y"),
            Some(&serde_json::json!(2))
        );
        assert!(!a.push_state(&id, "missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_state_written_before_join_is_replayed() {
        let (a, a_doc, b, b_doc) = pair();
        let id = StableId::from("c1");
        let local = a.create(id.clone(), "counter").await.unwrap();
        local.state.lock().insert("x".to_string(), serde_json::json!(7));
        a.push_state(&id, "x").await.unwrap();

        ship(&a_doc, &b_doc);
        b.apply_remote_changes().await.unwrap();

        let remote = b.get(&id).unwrap();
        assert_eq!(remote.state.lock().get("x"), Some(&serde_json::json!(7)));
    }

    #[tokio::test]
    async fn test_failed_remote_activation_leaves_nothing_live() {
        let a_doc: SharedDoc = Arc::new(Mutex::new(SharedDocument::with_peer_name("a")));
        let b_doc: SharedDoc = Arc::new(Mutex::new(SharedDocument::with_peer_name("b")));
        let a = SyncedCollection::new("cells", a_doc.clone(), CellHandler::default());
        let b = SyncedCollection::new(
            "cells",
            b_doc.clone(),
            CellHandler {
                refuse_activation: true,
            },
        );
        let id = StableId::from("c1");
        a.create(id.clone(), "counter").await.unwrap();

        ship(&a_doc, &b_doc);
        b.apply_remote_changes().await.unwrap();
        assert!(b.get(&id).is_none());
        assert!(b.is_empty());
        // The entry itself is still there for peers that can build it
        assert!(b_doc.lock().contains("cells", &id));

        // Removed and created again by the peer: a fresh attempt
        a.remove_local(&id).unwrap();
        ship(&a_doc, &b_doc);
        b.apply_remote_changes().await.unwrap();
        a.create(id.clone(), "counter").await.unwrap();
        ship(&a_doc, &b_doc);
        b.apply_remote_changes().await.unwrap();
        assert!(b.get(&id).is_none());
    }

    #[tokio::test]
    async fn test_failed_local_creation_withdraws_entry() {
        let doc: SharedDoc = Arc::new(Mutex::new(SharedDocument::new()));
        let cells = SyncedCollection::new(
            "cells",
            doc.clone(),
            CellHandler {
                refuse_activation: true,
            },
        );
        assert!(cells.create(StableId::from("c1"), "counter").await.is_err());
        assert!(cells.create(StableId::from("c2"), "forbidden").await.is_err());
        assert!(doc.lock().snapshot("cells").is_empty());
        assert!(cells.is_empty());
    }
}
