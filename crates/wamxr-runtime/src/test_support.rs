//! Shared fixtures for unit tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Deref;
use std::sync::Arc;
use tokio::sync::Notify;
use wamxr_core::{SignalKind, StableId, Vec3};
use wamxr_node::{
    ButtonSpec, HostContext, Input, MeshId, Node3DFactory, Node3DGui, Node3DLogic, NodeError,
    ParameterSpec, SharedContext, SignalHandle, StateValue,
};

use crate::builtin::{PanelGui, panel};
use crate::config_source::ConfigSource;
use crate::instance::Node3DInstance;
use crate::message::CollectingMessages;
use crate::world::RuntimeWorld;

pub(crate) struct TestWorld {
    world: RuntimeWorld,
    pub messages: Arc<CollectingMessages>,
}

impl TestWorld {
    pub fn new() -> Self {
        let messages = Arc::new(CollectingMessages::new());
        Self {
            world: RuntimeWorld::new(messages.clone(), None),
            messages,
        }
    }

    pub fn with_config(source: Arc<dyn ConfigSource>) -> Self {
        let messages = Arc::new(CollectingMessages::new());
        Self {
            world: RuntimeWorld::new(messages.clone(), Some(source)),
            messages,
        }
    }

    pub fn register_probe(&self, kind: &str, probe: ProbeFactory) -> Arc<ProbeFactory> {
        let probe = Arc::new(probe);
        self.builder.register(kind, probe.clone());
        probe
    }

    pub fn instance(&self, id: &str, kind: &str) -> Node3DInstance {
        self.world.new_instance(StableId::from(id), kind)
    }
}

impl Deref for TestWorld {
    type Target = RuntimeWorld;

    fn deref(&self) -> &RuntimeWorld {
        &self.world
    }
}

/// Factory recording what happened to it, with switchable failures
#[derive(Default)]
pub(crate) struct ProbeFactory {
    pub(crate) log: Arc<Mutex<Vec<String>>>,
    pub(crate) host: Mutex<Option<HostContext>>,
    pub(crate) tags: BTreeSet<String>,
    pub fail_gui: bool,
    pub fail_create: bool,
    /// Skip every remove_* in dispose
    pub leak: bool,
    /// The input's handle is released before it is exposed
    pub stale_input: bool,
    /// create_gui waits for this before building anything
    pub gate: Option<Arc<Notify>>,
}

impl ProbeFactory {
    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    pub fn host(&self) -> Option<HostContext> {
        self.host.lock().clone()
    }
}

#[async_trait]
impl Node3DFactory for ProbeFactory {
    fn label(&self) -> &str {
        "Probe"
    }

    fn description(&self) -> &str {
        "Test node"
    }

    fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    async fn create_gui(&self, context: &SharedContext) -> Result<Arc<dyn Node3DGui>, NodeError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.log.lock().push("gui".to_string());
        if self.fail_gui {
            return Err(NodeError::GuiFailed("probe asked to fail".to_string()));
        }
        let mut gui = PanelGui::new(&context.scene, "probe", Vec3::new(0.5, 0.25, 0.25));
        gui.add_part("panel", Vec3::new(0.0, 0.25, 0.0), Vec3::new(0.5, 0.25, 0.25));
        gui.add_part("jack", Vec3::new(0.25, 0.0, 0.0), Vec3::splat(0.0625));
        Ok(Arc::new(gui))
    }

    async fn create(
        &self,
        host: HostContext,
        gui: Arc<dyn Node3DGui>,
    ) -> Result<Arc<dyn Node3DLogic>, NodeError> {
        if host.shared().scene.contains(gui.root()) {
            self.log.lock().push("create:root-present".to_string());
        }
        *self.host.lock() = Some(host.clone());
        if self.fail_create {
            return Err(NodeError::CreateFailed("probe asked to fail".to_string()));
        }

        let panel = panel(&gui)?;
        let jack = panel.part("jack")?;
        let face = panel.part("panel")?;
        let meshes = vec![gui.root(), face];
        let handle = host
            .shared()
            .signal
            .create_handle(SignalKind::Audio, "probe");
        if self.stale_input {
            host.shared().signal.release_handle(handle);
        }

        host.create_parameter(ParameterSpec::new("level", "Level", 0.0..=1.0, 0.5, face))?;
        host.create_connectable(Arc::new(Input::new("in", handle, vec![jack])))?;
        let log = self.log.clone();
        host.create_button(ButtonSpec::new("reset", "Reset", jack, move || {
            log.lock().push("reset".to_string());
        }))?;
        for mesh in &meshes {
            host.add_to_bounding_box(*mesh);
        }

        Ok(Arc::new(ProbeLogic {
            host,
            handle,
            meshes,
            leak: self.leak,
            state: Mutex::new(BTreeMap::new()),
        }))
    }
}

struct ProbeLogic {
    host: HostContext,
    handle: SignalHandle,
    meshes: Vec<MeshId>,
    leak: bool,
    state: Mutex<BTreeMap<String, StateValue>>,
}

#[async_trait]
impl Node3DLogic for ProbeLogic {
    fn set_state(&self, key: &str, value: StateValue) -> Result<(), NodeError> {
        self.state.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn get_state(&self, key: &str) -> Option<StateValue> {
        self.state.lock().get(key).cloned()
    }

    fn state_keys(&self) -> Vec<String> {
        vec!["mode".to_string()]
    }

    fn dispose(&self) {
        if self.leak {
            return;
        }
        self.host.remove_parameter("level");
        self.host.remove_connectable("in");
        self.host.remove_button("reset");
        for mesh in &self.meshes {
            self.host.remove_from_bounding_box(*mesh);
        }
        self.host.shared().signal.release_handle(self.handle);
    }
}
