//! Node3D instance runtime.
//!
//! An instance pairs one GUI with one logic object and keeps the books on
//! everything the logic registers through its host context: parameters,
//! connectables, buttons, bounding-box members and the context menu.
//!
//! Construction is two-phase and asynchronous:
//!
//! ```text
//! Uninitialized -> GuiCreated -> LogicCreated -> Active -> Disposed
//! ```
//!
//! `dispose()` may be called at any point, including while `instantiate()`
//! is suspended. The `disposed` flag is checked after every await; whatever
//! the await produced is released instead of installed.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use wamxr_core::{Bounds, PointerRay, StableId, Vec3};
use wamxr_node::{
    ButtonSpec, Connectable, EndpointKey, Host, HostContext, MenuEntry, MeshId, Node3DGui,
    Node3DLogic, NodeError, ParameterSpec, SharedContext, StateValue,
};

use crate::builder::{BuildError, BuilderRegistry};
use crate::parameter::ParameterInstance;

/// State key handled by the runtime itself: world position of the instance
pub const POSITION_KEY: &str = "position";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Uninitialized,
    GuiCreated,
    LogicCreated,
    Active,
    Disposed,
}

/// Something observers of an instance need to react to
#[derive(Clone)]
pub enum InstanceEvent {
    /// Construction finished, the instance accepts state
    Activated,
    /// The logic asked for `key` to be replicated
    StateChanged(String),
    /// The logic asked for its own deletion
    DeleteRequested,
    /// A connectable left the instance; edges touching it must go
    ConnectableRemoved {
        endpoint: EndpointKey,
        connectable: Arc<dyn Connectable>,
    },
    Disposed,
}

impl fmt::Debug for InstanceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Activated => f.write_str("Activated"),
            Self::StateChanged(key) => f.debug_tuple("StateChanged").field(key).finish(),
            Self::DeleteRequested => f.write_str("DeleteRequested"),
            Self::ConnectableRemoved { endpoint, .. } => f
                .debug_struct("ConnectableRemoved")
                .field("endpoint", endpoint)
                .finish_non_exhaustive(),
            Self::Disposed => f.write_str("Disposed"),
        }
    }
}

/// Receives events from every instance it was attached to
pub trait InstanceObserver: Send + Sync {
    fn on_instance_event(&self, instance: &Node3DInstance, event: &InstanceEvent);
}

/// Registrations still outstanding when the logic finished disposing
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LeakReport {
    pub parameters: Vec<String>,
    pub connectables: Vec<String>,
    pub buttons: Vec<String>,
    pub bounding_box: Vec<MeshId>,
}

impl LeakReport {
    pub fn is_clean(&self) -> bool {
        self.parameters.is_empty()
            && self.connectables.is_empty()
            && self.buttons.is_empty()
            && self.bounding_box.is_empty()
    }
}

struct MenuState {
    entries: Vec<MenuEntry>,
    printed: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
struct MoveDrag {
    distance: f32,
    grab_offset: Vec3,
}

#[derive(Default)]
struct Parts {
    shared: Option<SharedContext>,
    gui: Option<Arc<dyn Node3DGui>>,
    logic: Option<Arc<dyn Node3DLogic>>,
    parameters: BTreeMap<String, Arc<ParameterInstance>>,
    connectables: BTreeMap<String, Arc<dyn Connectable>>,
    buttons: BTreeMap<String, ButtonSpec>,
    box_members: Vec<MeshId>,
    bounding_box: Option<MeshId>,
    box_dirty: bool,
    menu: Option<MenuState>,
    move_drag: Option<MoveDrag>,
    leaks: LeakReport,
}

struct InstanceInner {
    id: StableId,
    kind: String,
    builder: Arc<BuilderRegistry>,
    started: AtomicBool,
    disposed: AtomicBool,
    state: Mutex<InstanceState>,
    parts: Mutex<Parts>,
    observers: Mutex<Vec<Weak<dyn InstanceObserver>>>,
}

/// Live Node3D. Cloning shares the same instance.
#[derive(Clone)]
pub struct Node3DInstance {
    inner: Arc<InstanceInner>,
}

impl fmt::Debug for Node3DInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node3DInstance")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("state", &self.state())
            .finish()
    }
}

impl PartialEq for Node3DInstance {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Node3DInstance {
    pub fn new(id: StableId, kind: impl Into<String>, builder: Arc<BuilderRegistry>) -> Self {
        Self {
            inner: Arc::new(InstanceInner {
                id,
                kind: kind.into(),
                builder,
                started: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
                state: Mutex::new(InstanceState::Uninitialized),
                parts: Mutex::new(Parts::default()),
                observers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn id(&self) -> &StableId {
        &self.inner.id
    }

    pub fn kind(&self) -> &str {
        &self.inner.kind
    }

    pub fn state(&self) -> InstanceState {
        *self.inner.state.lock()
    }

    pub fn is_active(&self) -> bool {
        self.state() == InstanceState::Active
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    pub fn add_observer(&self, observer: Weak<dyn InstanceObserver>) {
        self.inner.observers.lock().push(observer);
    }

    /// Build GUI then logic.
    ///
    /// Failures dispose whatever was built and are reported through the
    /// builder's message sink. A disposal that lands while suspended yields
    /// [`BuildError::Cancelled`].
    pub async fn instantiate(&self) -> Result<(), BuildError> {
        let inner = &self.inner;
        if inner.started.swap(true, Ordering::SeqCst) {
            return Err(BuildError::AlreadyStarted(inner.id.clone()));
        }
        tracing::debug!("Instantiating {} ({})", inner.id, inner.kind);

        let factory = match inner.builder.resolve(&inner.kind).await {
            Ok(factory) => factory,
            Err(e) => return Err(self.fail(e)),
        };
        if self.is_disposed() {
            return Err(self.cancelled());
        }

        let shared = inner.builder.shared_context().await;
        if self.is_disposed() {
            return Err(self.cancelled());
        }

        let gui = match factory.create_gui(&shared).await {
            Ok(gui) => gui,
            Err(e) => return Err(self.fail(BuildError::Construction(e))),
        };
        {
            let mut parts = inner.parts.lock();
            if self.is_disposed() {
                drop(parts);
                gui.dispose();
                return Err(self.cancelled());
            }
            parts.shared = Some(shared.clone());
            parts.gui = Some(gui.clone());
        }
        self.set_state_machine(InstanceState::GuiCreated);

        let host: HostContext = Arc::new(InstanceHost {
            inner: Arc::downgrade(inner),
            id: inner.id.clone(),
            shared,
        });
        let logic = match factory.create(host, gui).await {
            Ok(logic) => logic,
            Err(e) => return Err(self.fail(BuildError::Construction(e))),
        };
        {
            let mut parts = inner.parts.lock();
            if self.is_disposed() {
                drop(parts);
                logic.dispose();
                self.release_leftovers();
                return Err(self.cancelled());
            }
            parts.logic = Some(logic);
        }
        self.set_state_machine(InstanceState::LogicCreated);
        self.set_state_machine(InstanceState::Active);

        tracing::info!("Instance {} ({}) is active", inner.id, inner.kind);
        self.emit(&InstanceEvent::Activated);
        Ok(())
    }

    fn set_state_machine(&self, state: InstanceState) {
        let mut current = self.inner.state.lock();
        if *current != InstanceState::Disposed {
            *current = state;
        }
    }

    fn fail(&self, error: BuildError) -> BuildError {
        if self.is_disposed() {
            // Nobody is waiting for this instance any more
            tracing::debug!("{} failed after disposal: {}", self.inner.id, error);
            return self.cancelled();
        }
        tracing::error!(
            "Failed to create {} ({}): {}",
            self.inner.id,
            self.inner.kind,
            error
        );
        self.dispose();
        self.inner
            .builder
            .messages()
            .error(&format!("Could not create {}: {}", self.inner.kind, error));
        error
    }

    fn cancelled(&self) -> BuildError {
        tracing::debug!("Creation of {} cancelled by disposal", self.inner.id);
        BuildError::Cancelled(self.inner.id.clone())
    }

    /// Release everything, exactly once.
    ///
    /// Order: GUI, logic, leftover parameters, leftover connectables,
    /// bounding box.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.inner.state.lock() = InstanceState::Disposed;
        tracing::debug!("Disposing {} ({})", self.inner.id, self.inner.kind);

        let (gui, logic) = {
            let mut parts = self.inner.parts.lock();
            parts.move_drag = None;
            parts.menu = None;
            (parts.gui.take(), parts.logic.take())
        };
        if let Some(gui) = gui {
            gui.dispose();
        }
        // The logic pairs its registrations with remove_* calls here
        if let Some(logic) = logic {
            logic.dispose();
        }
        self.release_leftovers();
        self.emit(&InstanceEvent::Disposed);
    }

    /// Release registrations the logic did not remove, recording them as leaks
    fn release_leftovers(&self) {
        let (parameters, connectables, buttons, members, bounding_box, scene) = {
            let mut parts = self.inner.parts.lock();
            let parameters = std::mem::take(&mut parts.parameters);
            let connectables = std::mem::take(&mut parts.connectables);
            let buttons = std::mem::take(&mut parts.buttons);
            let members = std::mem::take(&mut parts.box_members);
            parts.leaks.parameters.extend(parameters.keys().cloned());
            parts.leaks.connectables.extend(connectables.keys().cloned());
            parts.leaks.buttons.extend(buttons.keys().cloned());
            parts.leaks.bounding_box.extend(members.iter().copied());
            (
                parameters,
                connectables,
                buttons,
                members,
                parts.bounding_box.take(),
                parts.shared.as_ref().map(|s| s.scene.clone()),
            )
        };

        if !(parameters.is_empty()
            && connectables.is_empty()
            && buttons.is_empty()
            && members.is_empty())
        {
            tracing::warn!(
                "Instance {} leaked {} parameters, {} connectables, {} buttons, {} box members",
                self.inner.id,
                parameters.len(),
                connectables.len(),
                buttons.len(),
                members.len()
            );
        }

        for parameter in parameters.values() {
            parameter.dispose();
        }
        for (id, connectable) in connectables {
            self.emit(&InstanceEvent::ConnectableRemoved {
                endpoint: EndpointKey::new(self.inner.id.clone(), id),
                connectable,
            });
        }
        if let (Some(scene), Some(bounding_box)) = (scene, bounding_box) {
            scene.dispose_mesh(bounding_box);
        }
    }

    /// Registrations left behind by the logic's `dispose`
    pub fn leak_report(&self) -> LeakReport {
        self.inner.parts.lock().leaks.clone()
    }

    /// Delete locally and ask observers (replication) to delete everywhere
    pub fn delete(&self) {
        if self.is_disposed() {
            return;
        }
        self.emit(&InstanceEvent::DeleteRequested);
        self.dispose();
    }

    fn emit(&self, event: &InstanceEvent) {
        let observers: Vec<Arc<dyn InstanceObserver>> = {
            let mut observers = self.inner.observers.lock();
            observers.retain(|o| o.strong_count() > 0);
            observers.iter().filter_map(Weak::upgrade).collect()
        };
        for observer in observers {
            observer.on_instance_event(self, event);
        }
    }

    // --- State -----------------------------------------------------------

    /// Apply a replicated state value.
    ///
    /// Fails with `NotReady` until the instance is active; the caller drops
    /// the value and replays the document once activation completes.
    pub fn set_state(&self, key: &str, value: StateValue) -> Result<(), NodeError> {
        if self.is_disposed() {
            return Err(NodeError::Disposed);
        }
        if !self.is_active() {
            return Err(NodeError::NotReady(self.inner.id.to_string()));
        }
        if key == POSITION_KEY {
            let [x, y, z]: [f32; 3] =
                serde_json::from_value(value).map_err(|e| NodeError::InvalidState {
                    key: key.to_string(),
                    reason: e.to_string(),
                })?;
            self.set_position(Vec3::new(x, y, z));
            return Ok(());
        }
        let logic = self.inner.parts.lock().logic.clone();
        match logic {
            Some(logic) => logic.set_state(key, value),
            None => Err(NodeError::NotReady(self.inner.id.to_string())),
        }
    }

    pub async fn get_state(&self, key: &str) -> Option<StateValue> {
        if self.is_disposed() {
            return None;
        }
        if key == POSITION_KEY {
            let position = self.position()?;
            return Some(serde_json::json!([position.x, position.y, position.z]));
        }
        let logic = self.inner.parts.lock().logic.clone()?;
        logic.get_state(key).await
    }

    /// Keys this instance synchronizes, position included
    pub fn state_keys(&self) -> Vec<String> {
        let logic = self.inner.parts.lock().logic.clone();
        let mut keys = logic.map(|l| l.state_keys()).unwrap_or_default();
        keys.push(POSITION_KEY.to_string());
        keys
    }

    // --- Scene -----------------------------------------------------------

    pub fn gui(&self) -> Option<Arc<dyn Node3DGui>> {
        self.inner.parts.lock().gui.clone()
    }

    pub fn bounding_box(&self) -> Option<MeshId> {
        self.inner.parts.lock().bounding_box
    }

    pub fn bounding_box_members(&self) -> Vec<MeshId> {
        self.inner.parts.lock().box_members.clone()
    }

    /// Mesh that carries the instance's transform: the bounding box once
    /// built, the GUI root before that
    fn transform_mesh(&self) -> Option<(MeshId, SharedContext)> {
        let parts = self.inner.parts.lock();
        let shared = parts.shared.clone()?;
        let mesh = parts
            .bounding_box
            .or_else(|| parts.gui.as_ref().map(|g| g.root()))?;
        Some((mesh, shared))
    }

    pub fn position(&self) -> Option<Vec3> {
        let (mesh, shared) = self.transform_mesh()?;
        shared.scene.world_position(mesh)
    }

    pub fn set_position(&self, position: Vec3) {
        if let Some((mesh, shared)) = self.transform_mesh() {
            shared.scene.set_world_position(mesh, position);
        }
    }

    /// Grab the instance with the pointer
    pub fn begin_move(&self, ray: &PointerRay) {
        let Some(position) = self.position() else {
            return;
        };
        let distance = (position - ray.origin).length();
        let grab_offset = position - ray.point_at(distance);
        self.inner.parts.lock().move_drag = Some(MoveDrag {
            distance,
            grab_offset,
        });
    }

    pub fn drag_move(&self, ray: &PointerRay) {
        let Some(drag) = self.inner.parts.lock().move_drag else {
            return;
        };
        self.set_position(ray.point_at(drag.distance) + drag.grab_offset);
    }

    /// Release the grab and replicate the new position
    pub fn end_move(&self) {
        let was_moving = self.inner.parts.lock().move_drag.take().is_some();
        if was_moving {
            self.emit(&InstanceEvent::StateChanged(POSITION_KEY.to_string()));
        }
    }

    /// Recompute the bounding box now. Normally run from the frame tick.
    fn recompute_bounding_box(&self) {
        if self.is_disposed() {
            return;
        }
        let (members, old_box, root, shared) = {
            let mut parts = self.inner.parts.lock();
            parts.box_dirty = false;
            let Some(shared) = parts.shared.clone() else {
                return;
            };
            (
                parts.box_members.clone(),
                parts.bounding_box.take(),
                parts.gui.as_ref().map(|g| g.root()),
                shared,
            )
        };
        let scene = &shared.scene;

        // Detach first so the root keeps its world position
        if let Some(root) = root {
            scene.set_parent(root, None);
        }
        if let Some(old_box) = old_box {
            scene.dispose_mesh(old_box);
        }

        let union = Bounds::union_all(members.iter().filter_map(|m| scene.world_bounds(*m)));
        let new_box = union.map(|bounds| {
            let mesh = scene.create_mesh(
                &format!("{}-bounds", self.inner.id),
                Bounds::from_center_size(Vec3::ZERO, bounds.size()),
            );
            scene.set_world_position(mesh, bounds.center());
            scene.set_visible(mesh, false);
            if let Some(root) = root {
                scene.set_parent(root, Some(mesh));
            }
            mesh
        });

        let mut parts = self.inner.parts.lock();
        if self.is_disposed() {
            drop(parts);
            if let Some(mesh) = new_box {
                scene.dispose_mesh(mesh);
            }
            return;
        }
        parts.bounding_box = new_box;
        tracing::trace!(
            "Bounding box of {} rebuilt over {} meshes",
            self.inner.id,
            members.len()
        );
    }

    // --- Registrations ---------------------------------------------------

    pub fn parameter(&self, id: &str) -> Option<Arc<ParameterInstance>> {
        self.inner.parts.lock().parameters.get(id).cloned()
    }

    pub fn parameter_for_mesh(&self, mesh: MeshId) -> Option<Arc<ParameterInstance>> {
        self.inner
            .parts
            .lock()
            .parameters
            .values()
            .find(|p| p.mesh() == mesh)
            .cloned()
    }

    pub fn parameter_ids(&self) -> Vec<String> {
        self.inner.parts.lock().parameters.keys().cloned().collect()
    }

    pub fn connectable(&self, id: &str) -> Option<Arc<dyn Connectable>> {
        self.inner.parts.lock().connectables.get(id).cloned()
    }

    pub fn connectable_for_mesh(&self, mesh: MeshId) -> Option<Arc<dyn Connectable>> {
        self.inner
            .parts
            .lock()
            .connectables
            .values()
            .find(|c| c.meshes().contains(&mesh))
            .cloned()
    }

    pub fn connectables(&self) -> Vec<Arc<dyn Connectable>> {
        self.inner.parts.lock().connectables.values().cloned().collect()
    }

    pub fn button_ids(&self) -> Vec<String> {
        self.inner.parts.lock().buttons.keys().cloned().collect()
    }

    /// Fire a button's action. False when there is no such button.
    pub fn press_button(&self, id: &str) -> bool {
        let action = self
            .inner
            .parts
            .lock()
            .buttons
            .get(id)
            .map(|b| b.on_press.clone());
        action.is_some_and(|action| {
            action();
            true
        })
    }

    /// Hover feedback for whatever owns `mesh`
    pub fn set_hover(&self, mesh: MeshId, hovered: bool) {
        if let Some(parameter) = self.parameter_for_mesh(mesh) {
            parameter.set_hover(hovered);
            return;
        }
        let Some(connectable) = self.connectable_for_mesh(mesh) else {
            return;
        };
        let scene = self.inner.parts.lock().shared.as_ref().map(|s| s.scene.clone());
        if let Some(scene) = scene {
            for m in connectable.meshes() {
                scene.set_highlight(*m, hovered);
            }
        }
    }

    // --- Menu --------------------------------------------------------------

    pub fn menu_labels(&self) -> Option<Vec<String>> {
        self.inner
            .parts
            .lock()
            .menu
            .as_ref()
            .map(|m| m.entries.iter().map(|e| e.label.clone()).collect())
    }

    pub fn menu_output(&self) -> Vec<String> {
        self.inner
            .parts
            .lock()
            .menu
            .as_ref()
            .map(|m| m.printed.clone())
            .unwrap_or_default()
    }

    pub fn select_menu(&self, index: usize) -> bool {
        let action = self
            .inner
            .parts
            .lock()
            .menu
            .as_ref()
            .and_then(|m| m.entries.get(index))
            .map(|e| e.action.clone());
        action.is_some_and(|action| {
            action();
            true
        })
    }
}

impl InstanceInner {
    fn instance(self: &Arc<Self>) -> Node3DInstance {
        Node3DInstance {
            inner: self.clone(),
        }
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Collapse every registration made before the next tick into one recompute
    fn schedule_bounding_box(self: &Arc<Self>) {
        {
            let mut parts = self.parts.lock();
            if parts.box_dirty {
                return;
            }
            parts.box_dirty = true;
        }
        let weak = Arc::downgrade(self);
        self.builder.scheduler().defer(move || {
            if let Some(inner) = weak.upgrade() {
                inner.instance().recompute_bounding_box();
            }
        });
    }
}

/// Host context handed to the logic. Holds the instance weakly so a logic
/// keeping its context alive does not keep the instance alive.
struct InstanceHost {
    inner: Weak<InstanceInner>,
    id: StableId,
    shared: SharedContext,
}

impl InstanceHost {
    fn live(&self) -> Result<Arc<InstanceInner>, NodeError> {
        let inner = self.inner.upgrade().ok_or(NodeError::Disposed)?;
        if inner.is_disposed() {
            return Err(NodeError::Disposed);
        }
        Ok(inner)
    }
}

impl Host for InstanceHost {
    fn instance_id(&self) -> &StableId {
        &self.id
    }

    fn shared(&self) -> &SharedContext {
        &self.shared
    }

    fn create_parameter(&self, spec: ParameterSpec) -> Result<(), NodeError> {
        let inner = self.live()?;
        let mut parts = inner.parts.lock();
        if parts.parameters.contains_key(&spec.id) {
            return Err(NodeError::Duplicate(spec.id));
        }
        tracing::debug!("{}: parameter {} registered", self.id, spec.id);
        let id = spec.id.clone();
        parts.parameters.insert(
            id,
            Arc::new(ParameterInstance::new(spec, self.shared.scene.clone())),
        );
        Ok(())
    }

    fn remove_parameter(&self, id: &str) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let removed = inner.parts.lock().parameters.remove(id);
        if let Some(parameter) = removed {
            parameter.dispose();
        }
    }

    fn parameter_value(&self, id: &str) -> Option<f32> {
        let inner = self.inner.upgrade()?;
        let parameter = inner.parts.lock().parameters.get(id).cloned()?;
        Some(parameter.value())
    }

    fn set_parameter_value(&self, id: &str, value: f32) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let parameter = inner.parts.lock().parameters.get(id).cloned();
        match parameter {
            Some(parameter) => parameter.set_value_silent(value),
            None => tracing::debug!("{}: no parameter {}", self.id, id),
        }
    }

    fn create_connectable(&self, connectable: Arc<dyn Connectable>) -> Result<(), NodeError> {
        let inner = self.live()?;
        let mut parts = inner.parts.lock();
        let id = connectable.id().to_string();
        if parts.connectables.contains_key(&id) {
            return Err(NodeError::Duplicate(id));
        }
        tracing::debug!(
            "{}: {} {} connectable {} registered",
            self.id,
            connectable.kind(),
            if connectable.direction() == wamxr_core::Direction::Input {
                "input"
            } else {
                "output"
            },
            id
        );
        parts.connectables.insert(id, connectable);
        Ok(())
    }

    fn remove_connectable(&self, id: &str) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let removed = inner.parts.lock().connectables.remove(id);
        if let Some(connectable) = removed {
            inner.instance().emit(&InstanceEvent::ConnectableRemoved {
                endpoint: EndpointKey::new(self.id.clone(), id),
                connectable,
            });
        }
    }

    fn create_button(&self, spec: ButtonSpec) -> Result<(), NodeError> {
        let inner = self.live()?;
        let mut parts = inner.parts.lock();
        if parts.buttons.contains_key(&spec.id) {
            return Err(NodeError::Duplicate(spec.id));
        }
        parts.buttons.insert(spec.id.clone(), spec);
        Ok(())
    }

    fn remove_button(&self, id: &str) {
        if let Some(inner) = self.inner.upgrade() {
            inner.parts.lock().buttons.remove(id);
        }
    }

    fn add_to_bounding_box(&self, mesh: MeshId) {
        let Ok(inner) = self.live() else {
            return;
        };
        {
            let mut parts = inner.parts.lock();
            if parts.box_members.contains(&mesh) {
                return;
            }
            parts.box_members.push(mesh);
        }
        inner.schedule_bounding_box();
    }

    fn remove_from_bounding_box(&self, mesh: MeshId) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let removed = {
            let mut parts = inner.parts.lock();
            let before = parts.box_members.len();
            parts.box_members.retain(|m| *m != mesh);
            before != parts.box_members.len()
        };
        if removed && !inner.is_disposed() {
            inner.schedule_bounding_box();
        }
    }

    fn open_menu(&self, entries: Vec<MenuEntry>) {
        if let Ok(inner) = self.live() {
            inner.parts.lock().menu = Some(MenuState {
                entries,
                printed: Vec::new(),
            });
        }
    }

    fn close_menu(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.parts.lock().menu = None;
        }
    }

    fn print_menu(&self, text: &str) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let mut parts = inner.parts.lock();
        match parts.menu.as_mut() {
            Some(menu) => menu.printed.push(text.to_string()),
            None => tracing::debug!("{}: no menu open for '{}'", self.id, text),
        }
    }

    fn player_position(&self) -> Vec3 {
        self.shared.input.player_position()
    }

    fn delete(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.instance().delete();
        }
    }

    fn notify_state_change(&self, key: &str) {
        if let Ok(inner) = self.live() {
            inner
                .instance()
                .emit(&InstanceEvent::StateChanged(key.to_string()));
        }
    }
}
