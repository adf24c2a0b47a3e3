//! Typed plug protocol.
//!
//! A connection is a directed edge from one output-direction connectable to
//! one input-direction connectable of the same [`SignalKind`]. The edge is
//! made by handing the input a [`Sender`] that forwards to the output's
//! `receive`: the input immediately pushes a `Connect*` payload carrying its
//! native handle through it, and the output wires itself to that handle.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use wamxr_core::{Direction, Rgba, SignalKind, StableId};

use crate::scene::MeshId;
use crate::signal::{SignalBackend, SignalHandle};

/// Identity of a connectable across the world: owning instance + local id
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointKey {
    pub instance: StableId,
    pub connectable: String,
}

impl EndpointKey {
    pub fn new(instance: StableId, connectable: impl Into<String>) -> Self {
        Self {
            instance,
            connectable: connectable.into(),
        }
    }

    /// Parse the `instance:connectable` form produced by `Display`
    pub fn parse(text: &str) -> Option<Self> {
        let (instance, connectable) = text.split_once(':')?;
        if instance.is_empty() || connectable.is_empty() {
            return None;
        }
        Some(Self::new(StableId::from(instance), connectable))
    }
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.instance, self.connectable)
    }
}

/// Control message exchanged between the two ends of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalPayload {
    ConnectAudio(SignalHandle),
    DisconnectAudio(SignalHandle),
    ConnectMidi(SignalHandle),
    DisconnectMidi(SignalHandle),
}

impl SignalPayload {
    /// Connect payload matching the handle's kind
    pub const fn connect(handle: SignalHandle) -> Self {
        match handle.kind {
            SignalKind::Audio => Self::ConnectAudio(handle),
            SignalKind::Midi => Self::ConnectMidi(handle),
        }
    }

    /// Disconnect payload matching the handle's kind
    pub const fn disconnect(handle: SignalHandle) -> Self {
        match handle.kind {
            SignalKind::Audio => Self::DisconnectAudio(handle),
            SignalKind::Midi => Self::DisconnectMidi(handle),
        }
    }

    pub const fn handle(&self) -> SignalHandle {
        match *self {
            Self::ConnectAudio(h)
            | Self::DisconnectAudio(h)
            | Self::ConnectMidi(h)
            | Self::DisconnectMidi(h) => h,
        }
    }

    pub const fn is_connect(&self) -> bool {
        matches!(self, Self::ConnectAudio(_) | Self::ConnectMidi(_))
    }
}

type SendFn = dyn Fn(SignalPayload) + Send + Sync;

/// Callback an input pushes control payloads through.
///
/// Two senders are equal when they come from the same endpoint, which is
/// what `disconnect` matches on.
#[derive(Clone)]
pub struct Sender {
    source: EndpointKey,
    send: Arc<SendFn>,
}

impl Sender {
    pub fn new<F>(source: EndpointKey, send: F) -> Self
    where
        F: Fn(SignalPayload) + Send + Sync + 'static,
    {
        Self {
            source,
            send: Arc::new(send),
        }
    }

    pub fn send(&self, payload: SignalPayload) {
        (self.send)(payload);
    }

    pub fn source(&self) -> &EndpointKey {
        &self.source
    }
}

impl PartialEq for Sender {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl fmt::Debug for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sender").field("source", &self.source).finish()
    }
}

/// How many simultaneous edges an endpoint accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Cardinality {
    /// One edge at a time; further attempts are rejected while occupied
    #[default]
    Single,
    /// Any number of edges (summing input, fan-out output)
    Many,
}

/// A typed plug on a Node3D
pub trait Connectable: Send + Sync {
    /// Unique within the owning instance
    fn id(&self) -> &str;

    fn direction(&self) -> Direction;

    fn kind(&self) -> SignalKind;

    fn color(&self) -> Rgba {
        self.kind().color()
    }

    /// Pickable meshes
    fn meshes(&self) -> &[MeshId];

    fn cardinality(&self) -> Cardinality;

    /// Number of live edges on this endpoint
    fn connection_count(&self) -> usize;

    fn is_occupied(&self) -> bool {
        self.cardinality() == Cardinality::Single && self.connection_count() > 0
    }

    /// Called when something gets wired to this endpoint
    fn connect(&self, sender: Sender);

    fn disconnect(&self, sender: &Sender);

    /// Handle an inbound control payload
    fn receive(&self, payload: SignalPayload);
}

/// Why two connectables cannot be joined
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Incompatibility {
    #[error("both endpoints are {0:?}")]
    SameDirection(Direction),

    #[error("cannot connect {output} output to {input} input")]
    KindMismatch {
        output: SignalKind,
        input: SignalKind,
    },

    #[error("input already has a source")]
    InputOccupied,

    #[error("output already has a target")]
    OutputOccupied,
}

/// Check whether `a` and `b` may be connected, in either order
pub fn check_compatible(a: &dyn Connectable, b: &dyn Connectable) -> Result<(), Incompatibility> {
    if a.direction() == b.direction() {
        return Err(Incompatibility::SameDirection(a.direction()));
    }
    let (output, input) = if a.direction() == Direction::Output {
        (a, b)
    } else {
        (b, a)
    };
    if output.kind() != input.kind() {
        return Err(Incompatibility::KindMismatch {
            output: output.kind(),
            input: input.kind(),
        });
    }
    if input.is_occupied() {
        return Err(Incompatibility::InputOccupied);
    }
    if output.is_occupied() {
        return Err(Incompatibility::OutputOccupied);
    }
    Ok(())
}

/// Register `sender`, returning false when it must not be added
fn register_sender(
    senders: &mut Vec<Sender>,
    sender: &Sender,
    cardinality: Cardinality,
    id: &str,
) -> bool {
    if senders.contains(sender) {
        return false;
    }
    if cardinality == Cardinality::Single && !senders.is_empty() {
        tracing::warn!(
            "Input {} is occupied, refusing sender from {}",
            id,
            sender.source()
        );
        return false;
    }
    senders.push(sender.clone());
    true
}

fn unregister_sender(senders: &mut Vec<Sender>, sender: &Sender) -> bool {
    senders
        .iter()
        .position(|s| s == sender)
        .map(|index| senders.remove(index))
        .is_some()
}

/// Input backed by a fixed native handle
pub struct Input {
    id: String,
    handle: SignalHandle,
    meshes: Vec<MeshId>,
    cardinality: Cardinality,
    senders: Mutex<Vec<Sender>>,
}

impl Input {
    pub fn new(id: impl Into<String>, handle: SignalHandle, meshes: Vec<MeshId>) -> Self {
        Self {
            id: id.into(),
            handle,
            meshes,
            cardinality: Cardinality::Single,
            senders: Mutex::new(Vec::new()),
        }
    }

    /// Accept several sources at once (native summing)
    pub fn with_cardinality(mut self, cardinality: Cardinality) -> Self {
        self.cardinality = cardinality;
        self
    }

    pub fn handle(&self) -> SignalHandle {
        self.handle
    }

    /// Endpoints currently feeding this input
    pub fn sources(&self) -> Vec<EndpointKey> {
        self.senders
            .lock()
            .iter()
            .map(|s| s.source().clone())
            .collect()
    }
}

impl Connectable for Input {
    fn id(&self) -> &str {
        &self.id
    }

    fn direction(&self) -> Direction {
        Direction::Input
    }

    fn kind(&self) -> SignalKind {
        self.handle.kind
    }

    fn meshes(&self) -> &[MeshId] {
        &self.meshes
    }

    fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    fn connection_count(&self) -> usize {
        self.senders.lock().len()
    }

    fn connect(&self, sender: Sender) {
        let added = register_sender(&mut self.senders.lock(), &sender, self.cardinality, &self.id);
        if added {
            sender.send(SignalPayload::connect(self.handle));
        }
    }

    fn disconnect(&self, sender: &Sender) {
        let removed = unregister_sender(&mut self.senders.lock(), sender);
        if removed {
            sender.send(SignalPayload::disconnect(self.handle));
        }
    }

    fn receive(&self, payload: SignalPayload) {
        tracing::trace!("Input {} ignores {:?}", self.id, payload);
    }
}

/// Output with exactly one downstream target
pub struct Output {
    id: String,
    handle: SignalHandle,
    meshes: Vec<MeshId>,
    backend: Arc<dyn SignalBackend>,
    target: Mutex<Option<SignalHandle>>,
}

impl Output {
    pub fn new(
        id: impl Into<String>,
        handle: SignalHandle,
        meshes: Vec<MeshId>,
        backend: Arc<dyn SignalBackend>,
    ) -> Self {
        Self {
            id: id.into(),
            handle,
            meshes,
            backend,
            target: Mutex::new(None),
        }
    }

    pub fn handle(&self) -> SignalHandle {
        self.handle
    }

    pub fn target(&self) -> Option<SignalHandle> {
        *self.target.lock()
    }
}

impl Connectable for Output {
    fn id(&self) -> &str {
        &self.id
    }

    fn direction(&self) -> Direction {
        Direction::Output
    }

    fn kind(&self) -> SignalKind {
        self.handle.kind
    }

    fn meshes(&self) -> &[MeshId] {
        &self.meshes
    }

    fn cardinality(&self) -> Cardinality {
        Cardinality::Single
    }

    fn connection_count(&self) -> usize {
        usize::from(self.target.lock().is_some())
    }

    fn connect(&self, _sender: Sender) {}

    fn disconnect(&self, _sender: &Sender) {}

    fn receive(&self, payload: SignalPayload) {
        let handle = payload.handle();
        if handle.kind != self.handle.kind {
            tracing::warn!(
                "Output {} ({}) ignores {} payload",
                self.id,
                self.handle.kind,
                handle.kind
            );
            return;
        }

        if payload.is_connect() {
            let previous = self.target.lock().replace(handle);
            if let Some(previous) = previous.filter(|p| *p != handle) {
                self.backend.disconnect(self.handle, previous);
            }
            if let Err(e) = self.backend.connect(self.handle, handle) {
                tracing::warn!("Output {} failed to wire: {}", self.id, e);
                *self.target.lock() = None;
            }
        } else {
            let removed = {
                let mut target = self.target.lock();
                if *target == Some(handle) {
                    target.take()
                } else {
                    None
                }
            };
            if let Some(removed) = removed {
                self.backend.disconnect(self.handle, removed);
            }
        }
    }
}

type HandleCallback = Box<dyn Fn(SignalHandle) + Send + Sync>;

/// Output fanning out to any number of consumers
pub struct ListOutput {
    id: String,
    kind: SignalKind,
    meshes: Vec<MeshId>,
    connections: Mutex<Vec<SignalHandle>>,
    on_add: HandleCallback,
    on_remove: HandleCallback,
}

impl ListOutput {
    pub fn new(id: impl Into<String>, kind: SignalKind, meshes: Vec<MeshId>) -> Self {
        Self {
            id: id.into(),
            kind,
            meshes,
            connections: Mutex::new(Vec::new()),
            on_add: Box::new(|_| {}),
            on_remove: Box::new(|_| {}),
        }
    }

    pub fn on_add<F>(mut self, callback: F) -> Self
    where
        F: Fn(SignalHandle) + Send + Sync + 'static,
    {
        self.on_add = Box::new(callback);
        self
    }

    pub fn on_remove<F>(mut self, callback: F) -> Self
    where
        F: Fn(SignalHandle) + Send + Sync + 'static,
    {
        self.on_remove = Box::new(callback);
        self
    }

    /// Connected consumers in connection order
    pub fn connections(&self) -> Vec<SignalHandle> {
        self.connections.lock().clone()
    }
}

impl Connectable for ListOutput {
    fn id(&self) -> &str {
        &self.id
    }

    fn direction(&self) -> Direction {
        Direction::Output
    }

    fn kind(&self) -> SignalKind {
        self.kind
    }

    fn meshes(&self) -> &[MeshId] {
        &self.meshes
    }

    fn cardinality(&self) -> Cardinality {
        Cardinality::Many
    }

    fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    fn connect(&self, _sender: Sender) {}

    fn disconnect(&self, _sender: &Sender) {}

    fn receive(&self, payload: SignalPayload) {
        let handle = payload.handle();
        if handle.kind != self.kind {
            tracing::warn!("ListOutput {} ignores {} payload", self.id, handle.kind);
            return;
        }

        if payload.is_connect() {
            let added = {
                let mut connections = self.connections.lock();
                if connections.contains(&handle) {
                    false
                } else {
                    connections.push(handle);
                    true
                }
            };
            if added {
                (self.on_add)(handle);
            }
        } else {
            let removed = {
                let mut connections = self.connections.lock();
                connections
                    .iter()
                    .position(|h| *h == handle)
                    .map(|index| connections.remove(index))
                    .is_some()
            };
            if removed {
                (self.on_remove)(handle);
            }
        }
    }
}

struct DynamicInputState {
    handle: SignalHandle,
    senders: Vec<Sender>,
}

/// Input whose native handle can be swapped while connected
pub struct DynamicInput {
    id: String,
    kind: SignalKind,
    meshes: Vec<MeshId>,
    cardinality: Cardinality,
    state: Mutex<DynamicInputState>,
}

impl DynamicInput {
    pub fn new(id: impl Into<String>, handle: SignalHandle, meshes: Vec<MeshId>) -> Self {
        Self {
            id: id.into(),
            kind: handle.kind,
            meshes,
            cardinality: Cardinality::Single,
            state: Mutex::new(DynamicInputState {
                handle,
                senders: Vec::new(),
            }),
        }
    }

    pub fn with_cardinality(mut self, cardinality: Cardinality) -> Self {
        self.cardinality = cardinality;
        self
    }

    pub fn handle(&self) -> SignalHandle {
        self.state.lock().handle
    }

    /// Swap the backing handle. Every registered sender is disconnected from
    /// the old handle and reconnected to the new one.
    pub fn set_handle(&self, handle: SignalHandle) {
        if handle.kind != self.kind {
            tracing::warn!(
                "DynamicInput {} ({}) refuses {} handle",
                self.id,
                self.kind,
                handle.kind
            );
            return;
        }
        let (old, senders) = {
            let mut state = self.state.lock();
            let old = std::mem::replace(&mut state.handle, handle);
            (old, state.senders.clone())
        };
        if old == handle {
            return;
        }
        for sender in &senders {
            sender.send(SignalPayload::disconnect(old));
        }
        for sender in &senders {
            sender.send(SignalPayload::connect(handle));
        }
    }
}

impl Connectable for DynamicInput {
    fn id(&self) -> &str {
        &self.id
    }

    fn direction(&self) -> Direction {
        Direction::Input
    }

    fn kind(&self) -> SignalKind {
        self.kind
    }

    fn meshes(&self) -> &[MeshId] {
        &self.meshes
    }

    fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    fn connection_count(&self) -> usize {
        self.state.lock().senders.len()
    }

    fn connect(&self, sender: Sender) {
        let handle = {
            let mut state = self.state.lock();
            if !register_sender(&mut state.senders, &sender, self.cardinality, &self.id) {
                return;
            }
            state.handle
        };
        sender.send(SignalPayload::connect(handle));
    }

    fn disconnect(&self, sender: &Sender) {
        let handle = {
            let mut state = self.state.lock();
            if !unregister_sender(&mut state.senders, sender) {
                return;
            }
            state.handle
        };
        sender.send(SignalPayload::disconnect(handle));
    }

    fn receive(&self, payload: SignalPayload) {
        tracing::trace!("DynamicInput {} ignores {:?}", self.id, payload);
    }
}

struct DynamicOutputState {
    handle: SignalHandle,
    targets: Vec<SignalHandle>,
}

/// Output whose native handle can be swapped while connected
pub struct DynamicOutput {
    id: String,
    kind: SignalKind,
    meshes: Vec<MeshId>,
    backend: Arc<dyn SignalBackend>,
    state: Mutex<DynamicOutputState>,
}

impl DynamicOutput {
    pub fn new(
        id: impl Into<String>,
        handle: SignalHandle,
        meshes: Vec<MeshId>,
        backend: Arc<dyn SignalBackend>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: handle.kind,
            meshes,
            backend,
            state: Mutex::new(DynamicOutputState {
                handle,
                targets: Vec::new(),
            }),
        }
    }

    pub fn handle(&self) -> SignalHandle {
        self.state.lock().handle
    }

    pub fn targets(&self) -> Vec<SignalHandle> {
        self.state.lock().targets.clone()
    }

    /// Swap the backing handle, moving every downstream edge onto it
    pub fn set_handle(&self, handle: SignalHandle) {
        if handle.kind != self.kind {
            tracing::warn!(
                "DynamicOutput {} ({}) refuses {} handle",
                self.id,
                self.kind,
                handle.kind
            );
            return;
        }
        let (old, targets) = {
            let mut state = self.state.lock();
            let old = std::mem::replace(&mut state.handle, handle);
            (old, state.targets.clone())
        };
        if old == handle {
            return;
        }
        for target in &targets {
            self.backend.disconnect(old, *target);
        }
        for target in &targets {
            if let Err(e) = self.backend.connect(handle, *target) {
                tracing::warn!("DynamicOutput {} failed to rewire: {}", self.id, e);
            }
        }
    }
}

impl Connectable for DynamicOutput {
    fn id(&self) -> &str {
        &self.id
    }

    fn direction(&self) -> Direction {
        Direction::Output
    }

    fn kind(&self) -> SignalKind {
        self.kind
    }

    fn meshes(&self) -> &[MeshId] {
        &self.meshes
    }

    fn cardinality(&self) -> Cardinality {
        Cardinality::Many
    }

    fn connection_count(&self) -> usize {
        self.state.lock().targets.len()
    }

    fn connect(&self, _sender: Sender) {}

    fn disconnect(&self, _sender: &Sender) {}

    fn receive(&self, payload: SignalPayload) {
        let target = payload.handle();
        if target.kind != self.kind {
            tracing::warn!("DynamicOutput {} ignores {} payload", self.id, target.kind);
            return;
        }

        let own = if payload.is_connect() {
            let mut state = self.state.lock();
            if state.targets.contains(&target) {
                return;
            }
            state.targets.push(target);
            state.handle
        } else {
            let mut state = self.state.lock();
            let Some(index) = state.targets.iter().position(|t| *t == target) else {
                return;
            };
            state.targets.remove(index);
            state.handle
        };

        if payload.is_connect() {
            if let Err(e) = self.backend.connect(own, target) {
                tracing::warn!("DynamicOutput {} failed to wire: {}", self.id, e);
                self.state.lock().targets.retain(|t| *t != target);
            }
        } else {
            self.backend.disconnect(own, target);
        }
    }
}
