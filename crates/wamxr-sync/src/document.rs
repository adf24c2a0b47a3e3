//! The replicated document.
//!
//! Every synced collection lives in one Automerge document. Entries sit
//! directly under the root as `"{collection}/{id}"`:
//!
//! ```text
//! nodes/abc123      { kind: "oscillator", state: { frequency: "440.0" } }
//! connections/a:x>b:y { kind: "connection", state: {} }
//! ```
//!
//! Keeping entries flat means two peers never race to create a shared
//! parent map. State values are stored as JSON strings, one register per
//! key, so concurrent writes to different keys of the same entry both
//! survive and writes to the same key resolve last-writer-wins.

use automerge::transaction::Transactable;
use automerge::{ActorId, AutoCommit, ObjId, ObjType, ROOT, ReadDoc, ScalarValue, Value};
use std::collections::BTreeMap;
use wamxr_core::StableId;

use crate::SyncError;

const KIND: &str = "kind";
const STATE: &str = "state";

/// One entry as read from the document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntrySnapshot {
    pub kind: String,
    /// Key -> JSON text
    pub state: BTreeMap<String, String>,
}

/// Every entry of one collection
pub type CollectionSnapshot = BTreeMap<StableId, EntrySnapshot>;

fn entry_key(collection: &str, id: &StableId) -> String {
    format!("{collection}/{id}")
}

fn scalar_text(value: &Value<'_>) -> Option<String> {
    match value {
        Value::Scalar(scalar) => match scalar.as_ref() {
            ScalarValue::Str(text) => Some(text.to_string()),
            _ => None,
        },
        Value::Object(_) => None,
    }
}

pub struct SharedDocument {
    doc: AutoCommit,
    /// Local changes saved while applying a remote update, not yet taken
    outbox: Vec<u8>,
    /// Label used in logs only; the actor id is always random
    peer: String,
}

impl Default for SharedDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedDocument {
    pub fn new() -> Self {
        Self::with_peer_name("local")
    }

    /// Fresh document labelled `peer` in logs.
    ///
    /// Every document gets its own random actor, so peers sharing a name
    /// still write distinct change sequences.
    pub fn with_peer_name(peer: &str) -> Self {
        let actor = ActorId::random();
        tracing::debug!("Document for {} writes as actor {}", peer, actor);
        Self {
            doc: AutoCommit::new().with_actor(actor),
            outbox: Vec::new(),
            peer: peer.to_string(),
        }
    }

    pub fn peer_name(&self) -> &str {
        &self.peer
    }

    /// Restore a document written by [`save`](Self::save)
    pub fn load(bytes: &[u8]) -> Result<Self, SyncError> {
        let mut doc = AutoCommit::load(bytes)?.with_actor(ActorId::random());
        // Everything loaded is already known to whoever saved it
        doc.save_incremental();
        Ok(Self {
            doc,
            outbox: Vec::new(),
            peer: "restored".to_string(),
        })
    }

    /// Whole document, for snapshots and late joiners
    pub fn save(&mut self) -> Vec<u8> {
        let pending = self.doc.save_incremental();
        self.outbox.extend(pending);
        self.doc.save()
    }

    /// Local changes since the last call, `None` when there are none
    pub fn take_update(&mut self) -> Option<Vec<u8>> {
        let mut update = std::mem::take(&mut self.outbox);
        update.extend(self.doc.save_incremental());
        (!update.is_empty()).then_some(update)
    }

    /// Merge changes from a peer. They are not echoed back by `take_update`.
    pub fn apply_update(&mut self, bytes: &[u8]) -> Result<(), SyncError> {
        let pending = self.doc.save_incremental();
        self.outbox.extend(pending);
        let ops = self.doc.load_incremental(bytes)?;
        tracing::trace!("{} merged {} ops", self.peer, ops);
        // Advance the save cursor past what we just received
        self.doc.save_incremental();
        Ok(())
    }

    fn entry_obj(&self, collection: &str, id: &StableId) -> Result<Option<ObjId>, SyncError> {
        match self.doc.get(ROOT, entry_key(collection, id))? {
            Some((Value::Object(ObjType::Map), obj)) => Ok(Some(obj)),
            Some(_) => Err(SyncError::MalformedEntry(entry_key(collection, id))),
            None => Ok(None),
        }
    }

    /// Create an entry. An existing entry with the same id is replaced.
    pub fn insert_entry(
        &mut self,
        collection: &str,
        id: &StableId,
        kind: &str,
    ) -> Result<(), SyncError> {
        let entry = self
            .doc
            .put_object(ROOT, entry_key(collection, id), ObjType::Map)?;
        self.doc.put(&entry, KIND, kind)?;
        self.doc.put_object(&entry, STATE, ObjType::Map)?;
        Ok(())
    }

    /// Remove an entry. False when it was not there.
    pub fn remove_entry(&mut self, collection: &str, id: &StableId) -> Result<bool, SyncError> {
        if self.entry_obj(collection, id)?.is_none() {
            return Ok(false);
        }
        self.doc.delete(ROOT, entry_key(collection, id))?;
        Ok(true)
    }

    pub fn contains(&self, collection: &str, id: &StableId) -> bool {
        matches!(self.entry_obj(collection, id), Ok(Some(_)))
    }

    /// Write one state key of one entry, leaving every other key alone
    pub fn put_state(
        &mut self,
        collection: &str,
        id: &StableId,
        key: &str,
        json: &str,
    ) -> Result<(), SyncError> {
        let Some(entry) = self.entry_obj(collection, id)? else {
            return Err(SyncError::UnknownEntry(entry_key(collection, id)));
        };
        let state = match self.doc.get(&entry, STATE)? {
            Some((Value::Object(ObjType::Map), state)) => state,
            _ => return Err(SyncError::MalformedEntry(entry_key(collection, id))),
        };
        self.doc.put(&state, key, json)?;
        Ok(())
    }

    pub fn entry(&self, collection: &str, id: &StableId) -> Result<Option<EntrySnapshot>, SyncError> {
        let Some(obj) = self.entry_obj(collection, id)? else {
            return Ok(None);
        };
        let kind = self
            .doc
            .get(&obj, KIND)?
            .and_then(|(value, _)| scalar_text(&value))
            .ok_or_else(|| SyncError::MalformedEntry(entry_key(collection, id)))?;

        let mut state = BTreeMap::new();
        if let Some((Value::Object(ObjType::Map), state_obj)) = self.doc.get(&obj, STATE)? {
            for key in self.doc.keys(&state_obj) {
                let value = self
                    .doc
                    .get(&state_obj, key.as_str())?
                    .and_then(|(value, _)| scalar_text(&value));
                if let Some(value) = value {
                    state.insert(key, value);
                }
            }
        }
        Ok(Some(EntrySnapshot { kind, state }))
    }

    /// Every entry of `collection`. Malformed entries are skipped.
    pub fn snapshot(&self, collection: &str) -> CollectionSnapshot {
        let prefix = format!("{collection}/");
        let mut snapshot = CollectionSnapshot::new();
        for key in self.doc.keys(ROOT) {
            let Some(id) = key.strip_prefix(&prefix) else {
                continue;
            };
            let id = StableId::from(id);
            match self.entry(collection, &id) {
                Ok(Some(entry)) => {
                    snapshot.insert(id, entry);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("Skipping entry {}: {}", key, e),
            }
        }
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(text: &str) -> StableId {
        StableId::from(text)
    }

    #[test]
    fn test_entry_round_trip() {
        let mut doc = SharedDocument::new();
        doc.insert_entry("nodes", &id("abc123"), "oscillator").unwrap();
        doc.put_state("nodes", &id("abc123"), "frequency", "440.0").unwrap();

        let entry = doc.entry("nodes", &id("abc123")).unwrap().unwrap();
        assert_eq!(entry.kind, "oscillator");
        assert_eq!(entry.state.get("frequency").map(String::as_str), Some("440.0"));
        assert!(doc.contains("nodes", &id("abc123")));
        assert!(!doc.contains("connections", &id("abc123")));
    }

    #[test]
    fn test_snapshot_is_per_collection() {
        let mut doc = SharedDocument::new();
        doc.insert_entry("nodes", &id("a"), "oscillator").unwrap();
        doc.insert_entry("nodes", &id("b"), "speaker").unwrap();
        doc.insert_entry("connections", &id("a:x>b:y"), "connection").unwrap();

        let nodes = doc.snapshot("nodes");
        assert_eq!(nodes.keys().cloned().collect::<Vec<_>>(), vec![id("a"), id("b")]);
        assert_eq!(doc.snapshot("connections").len(), 1);
    }

    #[test]
    fn test_remove_entry() {
        let mut doc = SharedDocument::new();
        doc.insert_entry("nodes", &id("a"), "oscillator").unwrap();
        assert!(doc.remove_entry("nodes", &id("a")).unwrap());
        assert!(!doc.remove_entry("nodes", &id("a")).unwrap());
        assert!(doc.snapshot("nodes").is_empty());
        assert!(matches!(
            doc.put_state("nodes", &id("a"), "frequency", "1"),
            Err(SyncError::UnknownEntry(_))
        ));
    }

    #[test]
    fn test_updates_are_not_echoed() {
        let mut a = SharedDocument::with_peer_name("peer-a");
        let mut b = SharedDocument::with_peer_name("peer-b");

        a.insert_entry("nodes", &id("abc123"), "oscillator").unwrap();
        let update = a.take_update().unwrap();
        assert_eq!(a.take_update(), None);

        b.apply_update(&update).unwrap();
        assert!(b.contains("nodes", &id("abc123")));
        assert_eq!(b.take_update(), None);
    }

    #[test]
    fn test_local_changes_survive_a_remote_update() {
        let mut a = SharedDocument::with_peer_name("peer-a");
        let mut b = SharedDocument::with_peer_name("peer-b");
        a.insert_entry("nodes", &id("x"), "oscillator").unwrap();
        b.apply_update(&a.take_update().unwrap()).unwrap();

        // b writes locally, then receives a's next change before sending
        b.put_state("nodes", &id("x"), "position", "[1.0,0.0,0.0]").unwrap();
        a.put_state("nodes", &id("x"), "frequency", "440.0").unwrap();
        b.apply_update(&a.take_update().unwrap()).unwrap();

        let from_b = b.take_update().unwrap();
        a.apply_update(&from_b).unwrap();
        let entry = a.entry("nodes", &id("x")).unwrap().unwrap();
        assert_eq!(entry.state.len(), 2);
        assert_eq!(entry, b.entry("nodes", &id("x")).unwrap().unwrap());
    }

    #[test]
    fn test_same_named_peers_still_merge() {
        let mut a = SharedDocument::with_peer_name("local");
        let mut b = SharedDocument::with_peer_name("local");
        a.insert_entry("nodes", &id("x"), "oscillator").unwrap();
        b.insert_entry("nodes", &id("y"), "speaker").unwrap();

        let from_a = a.take_update().unwrap();
        let from_b = b.take_update().unwrap();
        a.apply_update(&from_b).unwrap();
        b.apply_update(&from_a).unwrap();

        assert_eq!(a.snapshot("nodes").len(), 2);
        assert_eq!(a.snapshot("nodes"), b.snapshot("nodes"));
    }

    #[test]
    fn test_restored_documents_write_as_new_actors() {
        let mut origin = SharedDocument::new();
        origin.insert_entry("nodes", &id("a"), "note_box").unwrap();
        let bytes = origin.save();

        let mut first = SharedDocument::load(&bytes).unwrap();
        let mut second = SharedDocument::load(&bytes).unwrap();
        first.put_state("nodes", &id("a"), "pattern", "[60]").unwrap();
        second.put_state("nodes", &id("a"), "position", "[0.0,1.0,0.0]").unwrap();

        let from_first = first.take_update().unwrap();
        second.apply_update(&from_first).unwrap();
        first.apply_update(&second.take_update().unwrap()).unwrap();
        assert_eq!(first.entry("nodes", &id("a")).unwrap().unwrap().state.len(), 2);
        assert_eq!(first.snapshot("nodes"), second.snapshot("nodes"));
    }

    #[test]
    fn test_save_and_load() {
        let mut doc = SharedDocument::new();
        doc.insert_entry("nodes", &id("a"), "note_box").unwrap();
        doc.put_state("nodes", &id("a"), "pattern", "[60,64]").unwrap();
        let bytes = doc.save();

        let restored = SharedDocument::load(&bytes).unwrap();
        assert_eq!(restored.snapshot("nodes"), doc.snapshot("nodes"));
        assert!(SharedDocument::load(b"not a document").is_err());

        // What save stashed is still delivered as an update
        assert!(doc.take_update().is_some());
    }
}
