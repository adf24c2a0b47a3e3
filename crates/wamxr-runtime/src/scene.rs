//! Headless scene over a Bevy ECS world.
//!
//! Meshes are entities carrying their local extents and an offset from their
//! parent. Rendering is not involved: the runtime only needs parenting,
//! world-space bounds and visibility flags, which is exactly what this keeps.

use bevy::ecs::component::Component;
use bevy::ecs::entity::Entity;
use bevy::ecs::world::World;
use parking_lot::Mutex;
use std::collections::HashMap;
use wamxr_core::{Bounds, PointerRay, Vec3};
use wamxr_node::{MeshId, PlayerInput, Scene};

/// Debug name of a mesh
#[derive(Component, Debug, Clone)]
struct MeshName(String);

/// Extents around the mesh's own origin
#[derive(Component, Debug, Clone, Copy)]
struct LocalBounds(Bounds);

/// Position relative to the parent (or the world when unparented)
#[derive(Component, Debug, Clone, Copy)]
struct Offset(Vec3);

#[derive(Component, Debug, Clone, Copy)]
struct ParentMesh(MeshId);

#[derive(Component, Debug, Clone, Copy)]
struct Visible(bool);

#[derive(Component, Debug, Clone, Copy)]
struct Highlight(bool);

struct SceneState {
    world: World,
    entities: HashMap<MeshId, Entity>,
    next_id: u64,
}

impl SceneState {
    fn entity(&self, mesh: MeshId) -> Option<Entity> {
        self.entities.get(&mesh).copied()
    }

    fn parent(&self, mesh: MeshId) -> Option<MeshId> {
        let entity = self.entity(mesh)?;
        self.world.get::<ParentMesh>(entity).map(|p| p.0)
    }

    fn offset(&self, mesh: MeshId) -> Vec3 {
        self.entity(mesh)
            .and_then(|e| self.world.get::<Offset>(e))
            .map_or(Vec3::ZERO, |o| o.0)
    }

    fn world_position(&self, mesh: MeshId) -> Option<Vec3> {
        self.entity(mesh)?;
        let mut position = self.offset(mesh);
        let mut current = self.parent(mesh);
        while let Some(parent) = current {
            position += self.offset(parent);
            current = self.parent(parent);
        }
        Some(position)
    }

    fn set_offset(&mut self, mesh: MeshId, offset: Vec3) {
        let Some(entity) = self.entity(mesh) else {
            return;
        };
        if let Some(mut current) = self.world.get_mut::<Offset>(entity) {
            current.0 = offset;
        }
    }

    /// True when `ancestor` is `mesh` or one of its parents
    fn is_ancestor(&self, ancestor: MeshId, mesh: MeshId) -> bool {
        let mut current = Some(mesh);
        while let Some(m) = current {
            if m == ancestor {
                return true;
            }
            current = self.parent(m);
        }
        false
    }

    fn reparent(&mut self, mesh: MeshId, parent: Option<MeshId>) {
        let Some(world_position) = self.world_position(mesh) else {
            return;
        };
        let parent_position = parent
            .and_then(|p| self.world_position(p))
            .unwrap_or(Vec3::ZERO);
        let Some(entity) = self.entity(mesh) else {
            return;
        };
        if let Ok(mut entity_mut) = self.world.get_entity_mut(entity) {
            match parent {
                Some(p) => {
                    entity_mut.insert(ParentMesh(p));
                }
                None => {
                    entity_mut.remove::<ParentMesh>();
                }
            }
        }
        self.set_offset(mesh, world_position - parent_position);
    }

    fn children(&self, mesh: MeshId) -> Vec<MeshId> {
        let mut children: Vec<MeshId> = self
            .entities
            .keys()
            .copied()
            .filter(|&m| self.parent(m) == Some(mesh))
            .collect();
        children.sort_unstable();
        children
    }
}

/// Scene implementation used by the headless app and the tests
pub struct EcsScene {
    state: Mutex<SceneState>,
}

impl Default for EcsScene {
    fn default() -> Self {
        Self::new()
    }
}

impl EcsScene {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SceneState {
                world: World::new(),
                entities: HashMap::new(),
                next_id: 1,
            }),
        }
    }

    pub fn name(&self, mesh: MeshId) -> Option<String> {
        let state = self.state.lock();
        let entity = state.entity(mesh)?;
        state.world.get::<MeshName>(entity).map(|n| n.0.clone())
    }

    pub fn is_visible(&self, mesh: MeshId) -> bool {
        let state = self.state.lock();
        state
            .entity(mesh)
            .and_then(|e| state.world.get::<Visible>(e))
            .is_some_and(|v| v.0)
    }

    pub fn is_highlighted(&self, mesh: MeshId) -> bool {
        let state = self.state.lock();
        state
            .entity(mesh)
            .and_then(|e| state.world.get::<Highlight>(e))
            .is_some_and(|h| h.0)
    }

    /// Direct children of `mesh`
    pub fn children(&self, mesh: MeshId) -> Vec<MeshId> {
        self.state.lock().children(mesh)
    }

    /// Meshes whose name starts with `prefix`, sorted by id
    pub fn find_by_name(&self, prefix: &str) -> Vec<MeshId> {
        let state = self.state.lock();
        let mut found: Vec<MeshId> = state
            .entities
            .iter()
            .filter(|&(_, &entity)| {
                state
                    .world
                    .get::<MeshName>(entity)
                    .is_some_and(|n| n.0.starts_with(prefix))
            })
            .map(|(&mesh, _)| mesh)
            .collect();
        found.sort_unstable();
        found
    }
}

impl Scene for EcsScene {
    fn create_mesh(&self, name: &str, local: Bounds) -> MeshId {
        let mut state = self.state.lock();
        let mesh = MeshId(state.next_id);
        state.next_id += 1;
        let entity = state
            .world
            .spawn((
                MeshName(name.to_string()),
                LocalBounds(local),
                Offset(Vec3::ZERO),
                Visible(true),
                Highlight(false),
            ))
            .id();
        state.entities.insert(mesh, entity);
        tracing::trace!("Created {} ({})", mesh, name);
        mesh
    }

    fn dispose_mesh(&self, mesh: MeshId) {
        let mut state = self.state.lock();
        if state.entity(mesh).is_none() {
            return;
        }
        for child in state.children(mesh) {
            state.reparent(child, None);
        }
        if let Some(entity) = state.entities.remove(&mesh) {
            state.world.despawn(entity);
            tracing::trace!("Disposed {}", mesh);
        }
    }

    fn contains(&self, mesh: MeshId) -> bool {
        self.state.lock().entities.contains_key(&mesh)
    }

    fn set_parent(&self, mesh: MeshId, parent: Option<MeshId>) {
        let mut state = self.state.lock();
        if let Some(p) = parent {
            if state.entity(p).is_none() {
                tracing::warn!("Cannot parent {} under missing {}", mesh, p);
                return;
            }
            if state.is_ancestor(mesh, p) {
                tracing::warn!("Refusing to parent {} under its own descendant {}", mesh, p);
                return;
            }
        }
        state.reparent(mesh, parent);
    }

    fn parent(&self, mesh: MeshId) -> Option<MeshId> {
        self.state.lock().parent(mesh)
    }

    fn set_world_position(&self, mesh: MeshId, position: Vec3) {
        let mut state = self.state.lock();
        let parent_position = state
            .parent(mesh)
            .and_then(|p| state.world_position(p))
            .unwrap_or(Vec3::ZERO);
        state.set_offset(mesh, position - parent_position);
    }

    fn world_position(&self, mesh: MeshId) -> Option<Vec3> {
        self.state.lock().world_position(mesh)
    }

    fn world_bounds(&self, mesh: MeshId) -> Option<Bounds> {
        let state = self.state.lock();
        let entity = state.entity(mesh)?;
        let local = state.world.get::<LocalBounds>(entity)?.0;
        let position = state.world_position(mesh)?;
        Some(local.translated(position))
    }

    fn set_visible(&self, mesh: MeshId, visible: bool) {
        let mut state = self.state.lock();
        let Some(entity) = state.entity(mesh) else {
            return;
        };
        if let Some(mut v) = state.world.get_mut::<Visible>(entity) {
            v.0 = visible;
        }
    }

    fn set_highlight(&self, mesh: MeshId, highlighted: bool) {
        let mut state = self.state.lock();
        let Some(entity) = state.entity(mesh) else {
            return;
        };
        if let Some(mut h) = state.world.get_mut::<Highlight>(entity) {
            h.0 = highlighted;
        }
    }

    fn mesh_count(&self) -> usize {
        self.state.lock().entities.len()
    }
}

/// Fixed input used when no XR device is attached
#[derive(Default)]
pub struct StaticInput {
    ray: Mutex<PointerRay>,
    player: Mutex<Vec3>,
}

impl StaticInput {
    pub fn new(player: Vec3) -> Self {
        Self {
            ray: Mutex::new(PointerRay::looking_forward(player)),
            player: Mutex::new(player),
        }
    }

    pub fn set_pointer_ray(&self, ray: PointerRay) {
        *self.ray.lock() = ray;
    }

    pub fn set_player_position(&self, position: Vec3) {
        *self.player.lock() = position;
    }
}

impl PlayerInput for StaticInput {
    fn pointer_ray(&self) -> PointerRay {
        *self.ray.lock()
    }

    fn player_position(&self) -> Vec3 {
        *self.player.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit() -> Bounds {
        Bounds::from_center_size(Vec3::ZERO, Vec3::ONE)
    }

    #[test]
    fn test_create_and_dispose() {
        let scene = EcsScene::new();
        let a = scene.create_mesh("a", unit());
        assert!(scene.contains(a));
        assert_eq!(scene.mesh_count(), 1);
        assert_eq!(scene.name(a).as_deref(), Some("a"));

        scene.dispose_mesh(a);
        assert!(!scene.contains(a));
        assert_eq!(scene.mesh_count(), 0);
        // Disposing twice is harmless
        scene.dispose_mesh(a);
    }

    #[test]
    fn test_world_bounds_follow_parent() {
        let scene = EcsScene::new();
        let parent = scene.create_mesh("parent", unit());
        let child = scene.create_mesh("child", unit());
        scene.set_world_position(child, Vec3::new(1.0, 0.0, 0.0));
        scene.set_parent(child, Some(parent));

        scene.set_world_position(parent, Vec3::new(0.0, 2.0, 0.0));

        assert_eq!(scene.world_position(child), Some(Vec3::new(1.0, 2.0, 0.0)));
        let bounds = scene.world_bounds(child).unwrap();
        assert_eq!(bounds.center(), Vec3::new(1.0, 2.0, 0.0));
    }

    #[test]
    fn test_reparent_keeps_world_position() {
        let scene = EcsScene::new();
        let parent = scene.create_mesh("parent", unit());
        scene.set_world_position(parent, Vec3::new(5.0, 0.0, 0.0));
        let child = scene.create_mesh("child", unit());
        scene.set_world_position(child, Vec3::new(1.0, 1.0, 1.0));

        scene.set_parent(child, Some(parent));
        assert_eq!(scene.world_position(child), Some(Vec3::new(1.0, 1.0, 1.0)));
        assert_eq!(scene.parent(child), Some(parent));

        scene.set_parent(child, None);
        assert_eq!(scene.world_position(child), Some(Vec3::new(1.0, 1.0, 1.0)));
        assert_eq!(scene.parent(child), None);
    }

    #[test]
    fn test_dispose_detaches_children() {
        let scene = EcsScene::new();
        let parent = scene.create_mesh("parent", unit());
        scene.set_world_position(parent, Vec3::new(0.0, 3.0, 0.0));
        let child = scene.create_mesh("child", unit());
        scene.set_parent(child, Some(parent));
        assert_eq!(scene.children(parent), vec![child]);

        scene.dispose_mesh(parent);

        assert!(scene.contains(child));
        assert_eq!(scene.parent(child), None);
        assert_eq!(scene.world_position(child), Some(Vec3::new(0.0, 3.0, 0.0)));
    }

    #[test]
    fn test_parent_cycle_refused() {
        let scene = EcsScene::new();
        let a = scene.create_mesh("a", unit());
        let b = scene.create_mesh("b", unit());
        scene.set_parent(b, Some(a));
        scene.set_parent(a, Some(b));
        assert_eq!(scene.parent(a), None);
    }

    #[test]
    fn test_visibility_and_highlight() {
        let scene = EcsScene::new();
        let a = scene.create_mesh("a", unit());
        assert!(scene.is_visible(a));
        scene.set_visible(a, false);
        scene.set_highlight(a, true);
        assert!(!scene.is_visible(a));
        assert!(scene.is_highlighted(a));
    }

    #[test]
    fn test_find_by_name() {
        let scene = EcsScene::new();
        let a = scene.create_mesh("cable x", unit());
        scene.create_mesh("knob", unit());
        assert_eq!(scene.find_by_name("cable"), vec![a]);
    }

    #[test]
    fn test_static_input() {
        let input = StaticInput::new(Vec3::new(0.0, 1.6, 0.0));
        assert_eq!(input.player_position(), Vec3::new(0.0, 1.6, 0.0));
        assert_eq!(input.pointer_ray().origin, Vec3::new(0.0, 1.6, 0.0));
        input.set_player_position(Vec3::ZERO);
        assert_eq!(input.player_position(), Vec3::ZERO);
    }
}
