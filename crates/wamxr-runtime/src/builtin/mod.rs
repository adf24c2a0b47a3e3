//! Built-in kinds.
//!
//! These are simple, essential nodes implemented directly in Rust. They
//! implement [`Node3DFactory`] just like descriptor-built kinds, with no
//! fetch involved.

pub mod midi_sink;
pub mod note_box;
pub mod oscillator;
pub mod speaker;

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use wamxr_core::{Bounds, Vec3};
use wamxr_node::{Host, MeshId, Node3DFactory, Node3DGui, NodeError, Scene};

/// Kind names dispatched by [`create_builtin`]
pub const BUILTIN_KINDS: [&str; 4] = ["oscillator", "speaker", "note_box", "midi_sink"];

/// Create a built-in factory by kind name
///
/// Returns `None` if the name doesn't match any built-in kind.
///
/// # Examples
///
/// ```
/// use wamxr_node::Node3DFactory;
/// use wamxr_runtime::builtin;
///
/// let oscillator = builtin::create_builtin("oscillator").expect("oscillator exists");
/// assert_eq!(oscillator.label(), "Oscillator");
/// ```
pub fn create_builtin(kind: &str) -> Option<Arc<dyn Node3DFactory>> {
    match kind {
        "oscillator" => Some(Arc::new(oscillator::OscillatorFactory::default())),
        "speaker" => Some(Arc::new(speaker::SpeakerFactory::default())),
        "note_box" => Some(Arc::new(note_box::NoteBoxFactory::default())),
        "midi_sink" => Some(Arc::new(midi_sink::MidiSinkFactory::default())),
        _ => None,
    }
}

pub(crate) fn tags(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|t| (*t).to_string()).collect()
}

/// GUI made of a root panel and named child parts
pub struct PanelGui {
    scene: Arc<dyn Scene>,
    root: MeshId,
    parts: BTreeMap<String, MeshId>,
    world_size: f32,
}

impl PanelGui {
    pub fn new(scene: &Arc<dyn Scene>, name: &str, size: Vec3) -> Self {
        let root = scene.create_mesh(name, Bounds::from_center_size(Vec3::ZERO, size));
        Self {
            scene: scene.clone(),
            root,
            parts: BTreeMap::new(),
            world_size: 1.0,
        }
    }

    pub fn with_world_size(mut self, world_size: f32) -> Self {
        self.world_size = world_size;
        self
    }

    /// Add a part at `offset` from the root's origin
    pub fn add_part(&mut self, name: &str, offset: Vec3, size: Vec3) -> MeshId {
        let mesh = self
            .scene
            .create_mesh(name, Bounds::from_center_size(Vec3::ZERO, size));
        let origin = self.scene.world_position(self.root).unwrap_or(Vec3::ZERO);
        self.scene.set_world_position(mesh, origin + offset);
        self.scene.set_parent(mesh, Some(self.root));
        self.parts.insert(name.to_string(), mesh);
        mesh
    }

    pub fn part(&self, name: &str) -> Result<MeshId, NodeError> {
        self.parts
            .get(name)
            .copied()
            .ok_or_else(|| NodeError::CreateFailed(format!("GUI has no part '{name}'")))
    }

    /// Root followed by every part
    pub fn meshes(&self) -> Vec<MeshId> {
        std::iter::once(self.root)
            .chain(self.parts.values().copied())
            .collect()
    }
}

impl Node3DGui for PanelGui {
    fn root(&self) -> MeshId {
        self.root
    }

    fn world_size(&self) -> f32 {
        self.world_size
    }

    fn dispose(&self) {
        for mesh in self.parts.values() {
            self.scene.dispose_mesh(*mesh);
        }
        self.scene.dispose_mesh(self.root);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// The panel a logic constructor was handed
pub(crate) fn panel(gui: &Arc<dyn Node3DGui>) -> Result<&PanelGui, NodeError> {
    gui.downcast_ref::<PanelGui>()
        .ok_or_else(|| NodeError::CreateFailed("expected a panel GUI".to_string()))
}

/// Add every mesh to the instance's bounding box
pub(crate) fn frame(host: &dyn Host, meshes: &[MeshId]) {
    for mesh in meshes {
        host.add_to_bounding_box(*mesh);
    }
}

pub(crate) fn unframe(host: &dyn Host, meshes: &[MeshId]) {
    for mesh in meshes {
        host.remove_from_bounding_box(*mesh);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::EcsScene;

    #[test]
    fn test_create_every_builtin() {
        for kind in BUILTIN_KINDS {
            assert!(create_builtin(kind).is_some(), "{kind} missing");
        }
    }

    #[test]
    fn test_unknown_builtin() {
        assert!(create_builtin("nonexistent").is_none());
    }

    #[test]
    fn test_panel_parts_follow_root() {
        let scene: Arc<dyn Scene> = Arc::new(EcsScene::new());
        let mut gui = PanelGui::new(&scene, "panel", Vec3::ONE);
        let knob = gui.add_part("knob", Vec3::new(0.25, 0.0, 0.0), Vec3::splat(0.1));

        scene.set_world_position(gui.root(), Vec3::new(0.0, 1.0, 0.0));

        assert_eq!(scene.world_position(knob), Some(Vec3::new(0.25, 1.0, 0.0)));
        assert_eq!(gui.meshes(), vec![gui.root(), knob]);
        assert!(gui.part("missing").is_err());

        gui.dispose();
        assert_eq!(scene.mesh_count(), 0);
    }
}
