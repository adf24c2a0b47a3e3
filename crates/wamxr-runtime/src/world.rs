//! Headless runtime assembly.
//!
//! Wires the ECS scene, the signal graph, the builder registry, the live
//! instance registry and the connection manager together. Binaries and the
//! replication layer build on top of this; nothing here is global.

use std::sync::{Arc, Weak};
use wamxr_core::{StableId, Vec3};

use crate::builder::{BuilderRegistry, SceneServices};
use crate::config_source::ConfigSource;
use crate::connection::ConnectionManager;
use crate::instance::{InstanceObserver, Node3DInstance};
use crate::message::MessageSink;
use crate::registry::InstanceRegistry;
use crate::scene::{EcsScene, StaticInput};
use crate::scheduler::FrameScheduler;
use crate::signal_graph::SignalGraph;

/// Head height of a standing player
pub const DEFAULT_PLAYER_POSITION: Vec3 = Vec3::new(0.0, 1.6, 0.0);

pub struct RuntimeWorld {
    pub scene: Arc<EcsScene>,
    pub signal: Arc<SignalGraph>,
    pub input: Arc<StaticInput>,
    pub scheduler: FrameScheduler,
    pub builder: Arc<BuilderRegistry>,
    pub instances: Arc<InstanceRegistry>,
    pub connections: Arc<ConnectionManager>,
}

impl RuntimeWorld {
    /// Assemble a world with every built-in kind registered
    pub fn new(messages: Arc<dyn MessageSink>, config: Option<Arc<dyn ConfigSource>>) -> Self {
        let scene = Arc::new(EcsScene::new());
        let signal = Arc::new(SignalGraph::new());
        let input = Arc::new(StaticInput::new(DEFAULT_PLAYER_POSITION));
        let scheduler = FrameScheduler::new();

        let services = SceneServices {
            scene: scene.clone(),
            signal: signal.clone(),
            input: input.clone(),
        };
        let mut builder = BuilderRegistry::new(services, scheduler.clone(), messages).with_builtins();
        if let Some(config) = config {
            builder = builder.with_config_source(config);
        }
        let builder = Arc::new(builder);

        let instances = Arc::new(InstanceRegistry::new());
        let connections = Arc::new(ConnectionManager::new(
            instances.clone(),
            scene.clone(),
            input.clone(),
        ));
        builder.add_observer(Arc::downgrade(&instances) as Weak<dyn InstanceObserver>);
        builder.add_observer(Arc::downgrade(&connections) as Weak<dyn InstanceObserver>);

        Self {
            scene,
            signal,
            input,
            scheduler,
            builder,
            instances,
            connections,
        }
    }

    /// New instance of `kind`, observed by the registry and the connection manager
    pub fn new_instance(&self, id: StableId, kind: &str) -> Node3DInstance {
        self.builder.new_instance(id, kind)
    }

    /// Run one frame tick of deferred work
    pub fn tick(&self) -> usize {
        self.scheduler.run_pending()
    }

    /// Dispose every live instance
    pub fn clear(&self) {
        for id in self.instances.ids() {
            if let Some(instance) = self.instances.get(&id) {
                instance.dispose();
            }
        }
    }
}
