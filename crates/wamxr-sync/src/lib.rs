//! Replication of Node3D instances and connections between peers.
//!
//! One Automerge document holds every synced collection. Local changes are
//! written per `(id, key)`; remote changes are applied by diffing the
//! document against what each collection last saw. The [`SyncManager`]
//! ties the collections to a [`RuntimeWorld`](wamxr_runtime::RuntimeWorld)
//! and pumps updates over a [`PeerLink`](wamxr_comms::PeerLink).

pub mod collection;
pub mod document;
pub mod handlers;
pub mod manager;

pub use collection::{EntryHandler, SharedDoc, SyncedCollection};
pub use document::{CollectionSnapshot, EntrySnapshot, SharedDocument};
pub use handlers::{CONNECTION_KIND, ConnectionHandler, NodeHandler};
pub use manager::{CONNECTIONS, NODES, SyncManager};

use wamxr_runtime::BuildError;

/// Errors raised by the replication layer
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Document error: {0}")]
    Document(#[from] automerge::AutomergeError),

    #[error("Malformed entry: {0}")]
    MalformedEntry(String),

    #[error("No such entry: {0}")]
    UnknownEntry(String),

    #[error("Entry could not be brought up: {0}")]
    Rejected(String),

    #[error("Value for {key} is not valid JSON: {source}")]
    Json {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Build(#[from] BuildError),
}
