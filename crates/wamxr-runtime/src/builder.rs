//! Kind registry.
//!
//! Maps a kind name to the factory that builds it. Built-in kinds are
//! registered up front; anything else is looked up through the configured
//! [`ConfigSource`] and, when its descriptor embeds a generator, turned into
//! a [`GeneratorFactory`]. Remote factories are cached per kind.
//!
//! The registry also owns the session's shared context. The host group id is
//! registered with the signal backend once, on first use, and reused by every
//! later instance.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tokio::sync::OnceCell;
use wamxr_core::StableId;
use wamxr_node::{Node3DFactory, Node3DGui, NodeError, PlayerInput, Scene, SharedContext, SignalBackend};

use crate::builtin;
use crate::config_source::ConfigSource;
use crate::dynamic::{GeneratorDescriptor, GeneratorFactory};
use crate::instance::{InstanceObserver, Node3DInstance};
use crate::message::MessageSink;
use crate::scheduler::FrameScheduler;

/// Why a kind could not be built. Fatal to that one creation only.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("Unknown kind: {0}")]
    UnknownKind(String),

    #[error("Failed to fetch descriptor for '{kind}': {reason}")]
    Fetch { kind: String, reason: String },

    #[error("Descriptor for '{0}' has no generator")]
    NoGenerator(String),

    #[error("Invalid descriptor for '{kind}': {reason}")]
    InvalidDescriptor { kind: String, reason: String },

    #[error(transparent)]
    Construction(#[from] NodeError),

    #[error("Creation of {0} was cancelled")]
    Cancelled(StableId),

    #[error("Instance {0} was already instantiated")]
    AlreadyStarted(StableId),
}

/// Session collaborators every instance shares
#[derive(Clone)]
pub struct SceneServices {
    pub scene: Arc<dyn Scene>,
    pub signal: Arc<dyn SignalBackend>,
    pub input: Arc<dyn PlayerInput>,
}

pub struct BuilderRegistry {
    services: SceneServices,
    shared: OnceCell<SharedContext>,
    factories: Mutex<BTreeMap<String, Arc<dyn Node3DFactory>>>,
    remote: Mutex<BTreeMap<String, Arc<dyn Node3DFactory>>>,
    config: Option<Arc<dyn ConfigSource>>,
    scheduler: FrameScheduler,
    messages: Arc<dyn MessageSink>,
    observers: Mutex<Vec<Weak<dyn InstanceObserver>>>,
}

impl BuilderRegistry {
    pub fn new(
        services: SceneServices,
        scheduler: FrameScheduler,
        messages: Arc<dyn MessageSink>,
    ) -> Self {
        Self {
            services,
            shared: OnceCell::new(),
            factories: Mutex::new(BTreeMap::new()),
            remote: Mutex::new(BTreeMap::new()),
            config: None,
            scheduler,
            messages,
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Look unknown kinds up through `source`
    pub fn with_config_source(mut self, source: Arc<dyn ConfigSource>) -> Self {
        self.config = Some(source);
        self
    }

    /// Register every built-in kind
    pub fn with_builtins(self) -> Self {
        for kind in builtin::BUILTIN_KINDS {
            if let Some(factory) = builtin::create_builtin(kind) {
                self.register(kind, factory);
            }
        }
        self
    }

    /// Register (or replace) the factory for `kind`
    pub fn register(&self, kind: &str, factory: Arc<dyn Node3DFactory>) {
        tracing::debug!("Registered kind {}", kind);
        self.factories.lock().insert(kind.to_string(), factory);
    }

    /// Attach `observer` to every instance created from now on
    pub fn add_observer(&self, observer: Weak<dyn InstanceObserver>) {
        self.observers.lock().push(observer);
    }

    pub fn scheduler(&self) -> &FrameScheduler {
        &self.scheduler
    }

    pub fn messages(&self) -> &Arc<dyn MessageSink> {
        &self.messages
    }

    pub fn services(&self) -> &SceneServices {
        &self.services
    }

    /// New, not yet instantiated, instance of `kind`
    pub fn new_instance(self: &Arc<Self>, id: StableId, kind: &str) -> Node3DInstance {
        let instance = Node3DInstance::new(id, kind, self.clone());
        let observers: Vec<Weak<dyn InstanceObserver>> = {
            let mut observers = self.observers.lock();
            observers.retain(|o| o.strong_count() > 0);
            observers.clone()
        };
        for observer in observers {
            instance.add_observer(observer);
        }
        instance
    }

    /// Shared context, initialised on first use
    pub async fn shared_context(&self) -> SharedContext {
        self.shared
            .get_or_init(|| async {
                let host_group_id = self.services.signal.register_host_group().await;
                tracing::info!("Registered host group {}", host_group_id);
                SharedContext {
                    scene: self.services.scene.clone(),
                    signal: self.services.signal.clone(),
                    input: self.services.input.clone(),
                    host_group_id: Arc::from(host_group_id),
                }
            })
            .await
            .clone()
    }

    /// Factory for `kind`: built-in, cached remote, or freshly fetched
    pub async fn resolve(&self, kind: &str) -> Result<Arc<dyn Node3DFactory>, BuildError> {
        if let Some(factory) = self.factories.lock().get(kind).cloned() {
            return Ok(factory);
        }
        if let Some(factory) = self.remote.lock().get(kind).cloned() {
            return Ok(factory);
        }

        let Some(config) = self.config.as_ref() else {
            return Err(BuildError::UnknownKind(kind.to_string()));
        };
        let fetched = config.fetch(kind).await.map_err(|e| BuildError::Fetch {
            kind: kind.to_string(),
            reason: e.to_string(),
        })?;
        let Some(wam) = fetched else {
            return Err(BuildError::UnknownKind(kind.to_string()));
        };

        let descriptor = GeneratorDescriptor::from_wam3d(kind, &wam.wam3d)?;
        tracing::info!("Built dynamic kind {} ({})", kind, wam.name);
        let factory: Arc<dyn Node3DFactory> = Arc::new(GeneratorFactory::new(descriptor));
        // A concurrent resolve of the same kind may have won; keep the first
        let factory = self
            .remote
            .lock()
            .entry(kind.to_string())
            .or_insert(factory)
            .clone();
        Ok(factory)
    }

    /// Every kind the shop can offer, sorted and deduplicated
    pub async fn list_kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.factories.lock().keys().cloned().collect();
        if let Some(config) = self.config.as_ref() {
            match config.list().await {
                Ok(remote) => kinds.extend(remote),
                Err(e) => tracing::warn!("Could not list remote kinds: {}", e),
            }
        }
        kinds.sort();
        kinds.dedup();
        kinds
    }

    /// GUI without logic, for shop thumbnails. The caller disposes it.
    pub async fn create_preview(&self, kind: &str) -> Result<Arc<dyn Node3DGui>, BuildError> {
        let factory = self.resolve(kind).await?;
        let shared = self.shared_context().await;
        Ok(factory.create_gui(&shared).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_source::DirConfigSource;
    use crate::test_support::TestWorld;

    #[tokio::test]
    async fn test_builtin_kinds_resolve() {
        let world = TestWorld::new();
        for kind in builtin::BUILTIN_KINDS {
            let factory = world.builder.resolve(kind).await.unwrap();
            assert!(!factory.label().is_empty());
        }
    }

    #[tokio::test]
    async fn test_unknown_kind_without_config() {
        let world = TestWorld::new();
        assert_eq!(
            world.builder.resolve("theremin").await.err(),
            Some(BuildError::UnknownKind("theremin".to_string()))
        );
    }

    #[tokio::test]
    async fn test_shared_context_initialised_once() {
        let world = TestWorld::new();
        let a = world.builder.shared_context().await;
        let b = world.builder.shared_context().await;
        assert_eq!(a.host_group_id, b.host_group_id);
        assert_eq!(world.signal.host_group_registrations(), 1);
    }

    #[tokio::test]
    async fn test_remote_generator_kind_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("drone.json"),
            r#"{
                "name": "Drone",
                "wam3d": {
                    "generator": {
                        "label": "Drone",
                        "outputs": [{ "id": "audioOut", "kind": "audio" }],
                        "parameters": [{ "id": "pitch", "min": 0.0, "max": 1.0, "default": 0.5 }]
                    }
                }
            }"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("plugin.json"),
            r#"{ "name": "Plugin", "wam3d": { "url": "https://example.org/wam.js" } }"#,
        )
        .unwrap();

        let world = TestWorld::with_config(Arc::new(DirConfigSource::new(dir.path())));

        let first = world.builder.resolve("drone").await.unwrap();
        let second = world.builder.resolve("drone").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.label(), "Drone");

        assert_eq!(
            world.builder.resolve("plugin").await.err(),
            Some(BuildError::NoGenerator("plugin".to_string()))
        );
        assert_eq!(
            world.builder.resolve("missing").await.err(),
            Some(BuildError::UnknownKind("missing".to_string()))
        );

        let kinds = world.builder.list_kinds().await;
        assert!(kinds.contains(&"drone".to_string()));
        assert!(kinds.contains(&"oscillator".to_string()));
        assert!(kinds.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_preview_has_no_logic() {
        let world = TestWorld::new();
        let gui = world.builder.create_preview("oscillator").await.unwrap();
        assert!(world.scene.contains(gui.root()));
        // No native endpoint is allocated for a preview
        assert_eq!(world.signal.node_count(), 0);
        gui.dispose();
        assert_eq!(world.scene.mesh_count(), 0);
    }

    #[tokio::test]
    async fn test_new_instance_gets_registry_observers() {
        let world = TestWorld::new();
        let instance = world.builder.new_instance(StableId::from("abc123"), "oscillator");
        instance.instantiate().await.unwrap();
        assert!(world.instances.get(&StableId::from("abc123")).is_some());
    }
}
