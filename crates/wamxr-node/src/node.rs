//! Node3D factory, GUI and logic contract.
//!
//! A kind is described by a [`Node3DFactory`]. Construction is two-phase:
//! `create_gui` builds the visuals only (enough for shop thumbnails), then
//! `create` builds the behaviour on top of an existing GUI, receiving a
//! [`HostContext`](crate::HostContext) to talk to the world.

use async_trait::async_trait;
use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::NodeError;
use crate::host::HostContext;
use crate::scene::{MeshId, PlayerInput, Scene};
use crate::signal::SignalBackend;

/// Serialized value of one state key
pub type StateValue = serde_json::Value;

/// Session-wide infrastructure shared read-only by every instance
#[derive(Clone)]
pub struct SharedContext {
    pub scene: Arc<dyn Scene>,
    pub signal: Arc<dyn SignalBackend>,
    pub input: Arc<dyn PlayerInput>,
    /// Plugin host group, computed once per session
    pub host_group_id: Arc<str>,
}

impl fmt::Debug for SharedContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedContext")
            .field("host_group_id", &self.host_group_id)
            .finish_non_exhaustive()
    }
}

/// Visual side of a Node3D
pub trait Node3DGui: Send + Sync {
    /// Root of the GUI's scene subtree
    fn root(&self) -> MeshId;

    /// Scale that brings this instrument to the common presentation size
    fn world_size(&self) -> f32 {
        1.0
    }

    /// Release every mesh and material
    fn dispose(&self);

    fn as_any(&self) -> &dyn Any;
}

impl dyn Node3DGui {
    /// Concrete GUI type, for logic constructors that need its meshes
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

/// Behavioural side of a Node3D
#[async_trait]
pub trait Node3DLogic: Send + Sync {
    /// Apply a replicated state value
    fn set_state(&self, key: &str, value: StateValue) -> Result<(), NodeError>;

    /// Current value of one state key
    async fn get_state(&self, key: &str) -> Option<StateValue>;

    /// Every key this logic synchronizes
    fn state_keys(&self) -> Vec<String>;

    /// Release logic resources. Must pair every `create_*` made through the
    /// host context with its `remove_*`.
    fn dispose(&self);
}

/// Descriptor of one kind
#[async_trait]
pub trait Node3DFactory: Send + Sync {
    fn label(&self) -> &str;

    fn description(&self) -> &str;

    fn tags(&self) -> &BTreeSet<String>;

    /// Build the visuals. No audio side effects beyond allocation.
    async fn create_gui(&self, context: &SharedContext) -> Result<Arc<dyn Node3DGui>, NodeError>;

    /// Build the behaviour on top of an already created GUI
    async fn create(
        &self,
        host: HostContext,
        gui: Arc<dyn Node3DGui>,
    ) -> Result<Arc<dyn Node3DLogic>, NodeError>;
}
