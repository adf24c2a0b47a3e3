//! Node3D abstraction layer.
//!
//! This crate defines the contract every instrument, effect or utility in the
//! world implements: a factory producing a GUI object and a logic object, the
//! Host Context capabilities a logic object receives, and the typed
//! connectable protocol used to patch nodes together. The runtime works with
//! nodes in a kind-agnostic way through these traits.

pub mod connectable;
pub mod host;
pub mod node;
pub mod scene;
pub mod signal;

pub use connectable::{
    Cardinality, Connectable, DynamicInput, DynamicOutput, EndpointKey, Incompatibility, Input,
    ListOutput, Output, Sender, SignalPayload, check_compatible,
};
pub use host::{ButtonSpec, HOST_CONTEXT_VERSION, Host, HostContext, MenuEntry, ParameterSpec};
pub use node::{Node3DFactory, Node3DGui, Node3DLogic, SharedContext, StateValue};
pub use scene::{MeshId, PlayerInput, Scene};
pub use signal::{SignalBackend, SignalHandle};

/// Node-related errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NodeError {
    #[error("GUI construction failed: {0}")]
    GuiFailed(String),

    #[error("Logic construction failed: {0}")]
    CreateFailed(String),

    #[error("Instance already disposed")]
    Disposed,

    #[error("Instance not ready: {0}")]
    NotReady(String),

    #[error("Duplicate id: {0}")]
    Duplicate(String),

    #[error("Invalid state value for '{key}': {reason}")]
    InvalidState { key: String, reason: String },

    #[error("Signal routing failed: {0}")]
    Signal(String),
}
