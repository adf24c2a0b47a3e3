//! Native signal handles.
//!
//! A handle stands for the engine object that actually produces or consumes
//! a signal (a Web Audio node, a MIDI port). Connectables wire handles
//! together through a [`SignalBackend`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use wamxr_core::SignalKind;

use crate::NodeError;

/// Engine-side endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignalHandle {
    pub id: u64,
    pub kind: SignalKind,
}

/// Native signal graph the connectables drive
#[async_trait]
pub trait SignalBackend: Send + Sync {
    /// Allocate a new engine endpoint
    fn create_handle(&self, kind: SignalKind, label: &str) -> SignalHandle;

    /// Release an endpoint and every edge touching it
    fn release_handle(&self, handle: SignalHandle);

    /// Route `from` into `to`
    fn connect(&self, from: SignalHandle, to: SignalHandle) -> Result<(), NodeError>;

    fn disconnect(&self, from: SignalHandle, to: SignalHandle);

    fn is_connected(&self, from: SignalHandle, to: SignalHandle) -> bool;

    /// Register this process as a plugin host group. Only called once per
    /// session, the result is cached by the builder registry.
    async fn register_host_group(&self) -> String;
}
