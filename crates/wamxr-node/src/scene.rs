//! Scene and input collaborators.
//!
//! The runtime never talks to a rendering engine directly. GUI factories and
//! the instance runtime go through these traits; the runtime crate ships a
//! headless implementation.

use std::fmt;
use wamxr_core::{Bounds, PointerRay, Vec3};

/// Handle to a mesh living in the scene
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshId(pub u64);

impl fmt::Display for MeshId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mesh#{}", self.0)
    }
}

/// 3D scene graph
pub trait Scene: Send + Sync {
    /// Create a mesh whose extents are `local` around its own origin
    fn create_mesh(&self, name: &str, local: Bounds) -> MeshId;

    /// Remove a mesh. Children are detached and keep their world position.
    fn dispose_mesh(&self, mesh: MeshId);

    fn contains(&self, mesh: MeshId) -> bool;

    /// Reparent, keeping the mesh's world position
    fn set_parent(&self, mesh: MeshId, parent: Option<MeshId>);

    fn parent(&self, mesh: MeshId) -> Option<MeshId>;

    /// Move a mesh so its origin sits at `position` in world space
    fn set_world_position(&self, mesh: MeshId, position: Vec3);

    fn world_position(&self, mesh: MeshId) -> Option<Vec3>;

    fn world_bounds(&self, mesh: MeshId) -> Option<Bounds>;

    fn set_visible(&self, mesh: MeshId, visible: bool);

    fn set_highlight(&self, mesh: MeshId, highlighted: bool);

    /// Number of live meshes
    fn mesh_count(&self) -> usize;
}

/// XR/pointer input
pub trait PlayerInput: Send + Sync {
    /// Current pointer ray of the active controller
    fn pointer_ray(&self) -> PointerRay;

    /// Head position of the local player
    fn player_position(&self) -> Vec3;
}
