//! Channels between peers and towards the user.
//!
//! The real network transport is out of scope; a [`PeerLink`] is the
//! in-process stand-in the sync manager pumps document updates through, and
//! the message channel carries transient user-visible notices (failed
//! creations, unknown kinds) to whatever UI shows them.

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError};

/// Messages exchanged between two peers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMessage {
    /// Incremental document changes
    Update(Vec<u8>),
    /// Late joiner asks for the whole document
    RequestSnapshot,
    /// Whole document, answer to `RequestSnapshot`
    Snapshot(Vec<u8>),
}

/// Severity of a user-visible message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLevel {
    Info,
    Warning,
    Error,
}

/// Transient message shown to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserMessage {
    pub level: MessageLevel,
    pub text: String,
}

/// Sender side of the user message channel
pub type MessageSender = Sender<UserMessage>;
/// Receiver side of the user message channel (UI)
pub type MessageReceiver = Receiver<UserMessage>;

/// Create the channel carrying user messages
pub fn create_message_channel(capacity: usize) -> (MessageSender, MessageReceiver) {
    crossbeam_channel::bounded(capacity)
}

/// One end of a bidirectional link to another peer
pub struct PeerLink {
    tx: Sender<SyncMessage>,
    rx: Receiver<SyncMessage>,
}

impl PeerLink {
    /// Queue a message for the other peer.
    ///
    /// Never blocks; returns false when the link is full or closed, in which
    /// case the caller keeps the data and retries on the next pump.
    pub fn send(&self, message: SyncMessage) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => false,
        }
    }

    /// Next pending message, if any
    pub fn try_recv(&self) -> Option<SyncMessage> {
        match self.rx.try_recv() {
            Ok(message) => Some(message),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Every message currently queued
    pub fn drain(&self) -> Vec<SyncMessage> {
        self.rx.try_iter().collect()
    }
}

/// Create two connected link ends
pub fn create_link_pair(capacity: usize) -> (PeerLink, PeerLink) {
    let (a_tx, b_rx) = crossbeam_channel::bounded(capacity);
    let (b_tx, a_rx) = crossbeam_channel::bounded(capacity);
    (
        PeerLink { tx: a_tx, rx: a_rx },
        PeerLink { tx: b_tx, rx: b_rx },
    )
}
