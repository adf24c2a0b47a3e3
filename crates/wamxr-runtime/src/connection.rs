//! Patch-cable connections between instances.
//!
//! The manager owns every live edge. An edge always runs from an
//! output-direction connectable to an input-direction one; it is made by
//! handing the input a [`Sender`] that forwards to the output's `receive`,
//! so the input pushes its native handle and the output wires itself.
//!
//! Edges come from two places. Local drag gestures (`begin_drag` /
//! `update_drag` / `end_drag`) and explicit `connect` calls notify the
//! [`ConnectionObserver`]s so the edge can be replicated. Replicated edges
//! arriving from peers go through `connect_replicated` and stay silent.
//!
//! When a connectable leaves its instance (deletion, or a logic removing it)
//! every edge touching it is torn down and the other endpoint is told.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};
use wamxr_core::{Bounds, Direction, Vec3};
use wamxr_node::{
    Connectable, EndpointKey, Incompatibility, MeshId, PlayerInput, Scene, Sender,
    check_compatible,
};

use crate::instance::{InstanceEvent, InstanceObserver, Node3DInstance};
use crate::registry::InstanceRegistry;

/// Distance along the pointer ray the loose end of a cable follows
pub const DRAG_DISTANCE: f32 = 1.0;

/// Size of the mesh standing in for the loose end of a cable
const DRAG_HANDLE_SIZE: f32 = 0.05;

/// Identity of one edge: `output>input`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionKey {
    pub output: EndpointKey,
    pub input: EndpointKey,
}

impl ConnectionKey {
    pub const fn new(output: EndpointKey, input: EndpointKey) -> Self {
        Self { output, input }
    }

    /// Parse the form produced by `Display`
    pub fn parse(text: &str) -> Option<Self> {
        let (output, input) = text.split_once('>')?;
        Some(Self::new(
            EndpointKey::parse(output)?,
            EndpointKey::parse(input)?,
        ))
    }

    pub fn touches(&self, endpoint: &EndpointKey) -> bool {
        self.output == *endpoint || self.input == *endpoint
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}>{}", self.output, self.input)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    #[error("No connectable at {0}")]
    UnknownEndpoint(EndpointKey),

    #[error(transparent)]
    Incompatible(#[from] Incompatibility),

    #[error("{0} already exists")]
    AlreadyConnected(ConnectionKey),

    #[error("Input refused {0}")]
    Refused(ConnectionKey),
}

/// How a drag gesture ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DragOutcome {
    Connected(ConnectionKey),
    Rejected(ConnectError),
    /// Released over nothing connectable, or no drag was in progress
    Aborted,
}

/// Told about locally authored edges
pub trait ConnectionObserver: Send + Sync {
    fn on_connected(&self, key: &ConnectionKey);

    fn on_disconnected(&self, key: &ConnectionKey);
}

struct Record {
    sender: Sender,
    input: Arc<dyn Connectable>,
    cable: MeshId,
}

struct Drag {
    from: EndpointKey,
    connectable: Arc<dyn Connectable>,
    handle: MeshId,
}

pub struct ConnectionManager {
    registry: Arc<InstanceRegistry>,
    scene: Arc<dyn Scene>,
    input: Arc<dyn PlayerInput>,
    connections: Mutex<BTreeMap<ConnectionKey, Record>>,
    drag: Mutex<Option<Drag>>,
    observers: Mutex<Vec<Weak<dyn ConnectionObserver>>>,
}

impl ConnectionManager {
    pub fn new(
        registry: Arc<InstanceRegistry>,
        scene: Arc<dyn Scene>,
        input: Arc<dyn PlayerInput>,
    ) -> Self {
        Self {
            registry,
            scene,
            input,
            connections: Mutex::new(BTreeMap::new()),
            drag: Mutex::new(None),
            observers: Mutex::new(Vec::new()),
        }
    }

    pub fn add_observer(&self, observer: Weak<dyn ConnectionObserver>) {
        self.observers.lock().push(observer);
    }

    /// Every live edge, sorted
    pub fn connections(&self) -> Vec<ConnectionKey> {
        self.connections.lock().keys().cloned().collect()
    }

    pub fn is_connected(&self, key: &ConnectionKey) -> bool {
        self.connections.lock().contains_key(key)
    }

    /// Cable mesh drawn for an edge
    pub fn cable(&self, key: &ConnectionKey) -> Option<MeshId> {
        self.connections.lock().get(key).map(|r| r.cable)
    }

    /// Connectable under `mesh`, if any
    pub fn pick(&self, mesh: MeshId) -> Option<(EndpointKey, Arc<dyn Connectable>)> {
        self.registry.connectable_for_mesh(mesh)
    }

    // --- Gestures ----------------------------------------------------------

    /// Pointer down on `mesh`. Returns true when a cable drag started.
    ///
    /// Grabbing an input that already has a source lifts that cable off the
    /// input: the edge is removed and the drag continues from its output.
    pub fn begin_drag(&self, mesh: MeshId) -> bool {
        if self.drag.lock().is_some() {
            return false;
        }
        let Some((mut from, mut connectable)) = self.pick(mesh) else {
            return false;
        };

        if connectable.direction() == Direction::Input {
            let lifted = self
                .connections
                .lock()
                .keys()
                .rev()
                .find(|k| k.input == from)
                .cloned();
            if let Some(lifted) = lifted {
                self.disconnect(&lifted);
                match self.registry.find_connectable(&lifted.output) {
                    Some(output) => {
                        from = lifted.output;
                        connectable = output;
                    }
                    None => return false,
                }
            }
        }

        let start = self.endpoint_center(connectable.as_ref()).unwrap_or(Vec3::ZERO);
        let handle = self.scene.create_mesh(
            "cable handle",
            Bounds::from_center_size(Vec3::ZERO, Vec3::splat(DRAG_HANDLE_SIZE)),
        );
        self.scene.set_world_position(handle, start);
        self.highlight(connectable.as_ref(), true);

        tracing::debug!("Dragging a cable from {}", from);
        *self.drag.lock() = Some(Drag {
            from,
            connectable,
            handle,
        });
        true
    }

    /// Move the loose end of the cable with the pointer
    pub fn update_drag(&self) {
        let handle = self.drag.lock().as_ref().map(|d| d.handle);
        if let Some(handle) = handle {
            let ray = self.input.pointer_ray();
            self.scene.set_world_position(handle, ray.point_at(DRAG_DISTANCE));
        }
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.lock().is_some()
    }

    /// Pointer up, over `target` (or over nothing)
    pub fn end_drag(&self, target: Option<MeshId>) -> DragOutcome {
        let Some(drag) = self.drag.lock().take() else {
            return DragOutcome::Aborted;
        };
        self.scene.dispose_mesh(drag.handle);
        self.highlight(drag.connectable.as_ref(), false);

        let Some((to, _)) = target.and_then(|mesh| self.pick(mesh)) else {
            tracing::debug!("Cable from {} dropped on nothing", drag.from);
            return DragOutcome::Aborted;
        };
        match self.connect(&drag.from, &to) {
            Ok(key) => DragOutcome::Connected(key),
            Err(e) => {
                tracing::warn!("Rejected cable {} -> {}: {}", drag.from, to, e);
                DragOutcome::Rejected(e)
            }
        }
    }

    /// Drop the cable in progress without connecting anything
    pub fn cancel_drag(&self) {
        let drag = self.drag.lock().take();
        if let Some(drag) = drag {
            self.scene.dispose_mesh(drag.handle);
            self.highlight(drag.connectable.as_ref(), false);
        }
    }

    // --- Edges -------------------------------------------------------------

    /// Connect two endpoints, in either order, and tell the observers
    pub fn connect(&self, a: &EndpointKey, b: &EndpointKey) -> Result<ConnectionKey, ConnectError> {
        let key = self.link(a, b)?;
        self.notify(|o| o.on_connected(&key));
        Ok(key)
    }

    /// Re-establish an edge authored by a peer
    pub fn connect_replicated(&self, key: &ConnectionKey) -> Result<(), ConnectError> {
        self.link(&key.output, &key.input).map(|_| ())
    }

    fn link(&self, a: &EndpointKey, b: &EndpointKey) -> Result<ConnectionKey, ConnectError> {
        let first = self
            .registry
            .find_connectable(a)
            .ok_or_else(|| ConnectError::UnknownEndpoint(a.clone()))?;
        let second = self
            .registry
            .find_connectable(b)
            .ok_or_else(|| ConnectError::UnknownEndpoint(b.clone()))?;

        let ((output_key, output), (input_key, input)) = if first.direction() == Direction::Output
        {
            ((a.clone(), first), (b.clone(), second))
        } else {
            ((b.clone(), second), (a.clone(), first))
        };
        let key = ConnectionKey::new(output_key.clone(), input_key);
        if self.connections.lock().contains_key(&key) {
            return Err(ConnectError::AlreadyConnected(key));
        }
        check_compatible(output.as_ref(), input.as_ref())?;

        let receiver = output.clone();
        let sender = Sender::new(output_key, move |payload| receiver.receive(payload));
        let input_before = input.connection_count();
        let output_before = output.connection_count();
        input.connect(sender.clone());
        if input.connection_count() == input_before {
            return Err(ConnectError::Refused(key));
        }
        // The output drops the edge again when the backend cannot wire it
        if output.connection_count() == output_before {
            tracing::warn!("Signal backend could not wire {}", key);
            input.disconnect(&sender);
            return Err(ConnectError::Refused(key));
        }

        let cable = self.create_cable(&key, output.as_ref(), input.as_ref());
        self.connections.lock().insert(
            key.clone(),
            Record {
                sender,
                input,
                cable,
            },
        );
        tracing::info!("Connected {}", key);
        Ok(key)
    }

    /// Remove an edge and tell the observers. False if it did not exist.
    pub fn disconnect(&self, key: &ConnectionKey) -> bool {
        let removed = self.unlink(key);
        if removed {
            self.notify(|o| o.on_disconnected(key));
        }
        removed
    }

    /// Remove an edge a peer removed
    pub fn disconnect_replicated(&self, key: &ConnectionKey) -> bool {
        self.unlink(key)
    }

    fn unlink(&self, key: &ConnectionKey) -> bool {
        let Some(record) = self.connections.lock().remove(key) else {
            return false;
        };
        record.input.disconnect(&record.sender);
        self.scene.dispose_mesh(record.cable);
        tracing::info!("Disconnected {}", key);
        true
    }

    fn create_cable(
        &self,
        key: &ConnectionKey,
        output: &dyn Connectable,
        input: &dyn Connectable,
    ) -> MeshId {
        let from = self.endpoint_center(output).unwrap_or(Vec3::ZERO);
        let to = self.endpoint_center(input).unwrap_or(Vec3::ZERO);
        let cable = self.scene.create_mesh(
            &format!("cable {key}"),
            Bounds::from_center_size(Vec3::ZERO, (to - from).abs()),
        );
        self.scene.set_world_position(cable, (from + to) / 2.0);
        cable
    }

    fn endpoint_center(&self, connectable: &dyn Connectable) -> Option<Vec3> {
        let mesh = connectable.meshes().first()?;
        self.scene.world_bounds(*mesh).map(|b| b.center())
    }

    fn highlight(&self, connectable: &dyn Connectable, highlighted: bool) {
        for mesh in connectable.meshes() {
            self.scene.set_highlight(*mesh, highlighted);
        }
    }

    fn notify(&self, f: impl Fn(&dyn ConnectionObserver)) {
        let observers: Vec<Arc<dyn ConnectionObserver>> = {
            let mut observers = self.observers.lock();
            observers.retain(|o| o.strong_count() > 0);
            observers.iter().filter_map(Weak::upgrade).collect()
        };
        for observer in observers {
            f(observer.as_ref());
        }
    }

    /// Tear down every edge touching `endpoint`
    fn release_endpoint(&self, endpoint: &EndpointKey) {
        let touching: Vec<ConnectionKey> = self
            .connections
            .lock()
            .keys()
            .filter(|k| k.touches(endpoint))
            .cloned()
            .collect();
        for key in touching {
            self.disconnect(&key);
        }
        let dragging_from = self
            .drag
            .lock()
            .as_ref()
            .is_some_and(|d| d.from == *endpoint);
        if dragging_from {
            self.cancel_drag();
        }
    }
}

impl InstanceObserver for ConnectionManager {
    fn on_instance_event(&self, _instance: &Node3DInstance, event: &InstanceEvent) {
        if let InstanceEvent::ConnectableRemoved { endpoint, .. } = event {
            self.release_endpoint(endpoint);
        }
    }
}
