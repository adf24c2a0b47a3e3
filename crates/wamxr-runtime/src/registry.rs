//! Live instance lookup.
//!
//! Tracks every active instance by stable id. Attached to the builder
//! registry as an observer: activation inserts, disposal removes.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use wamxr_core::StableId;
use wamxr_node::{Connectable, EndpointKey, MeshId};

use crate::instance::{InstanceEvent, InstanceObserver, Node3DInstance};

#[derive(Default)]
pub struct InstanceRegistry {
    instances: Mutex<BTreeMap<StableId, Node3DInstance>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &StableId) -> Option<Node3DInstance> {
        self.instances.lock().get(id).cloned()
    }

    pub fn ids(&self) -> Vec<StableId> {
        self.instances.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.instances.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.lock().is_empty()
    }

    pub fn find_connectable(&self, endpoint: &EndpointKey) -> Option<Arc<dyn Connectable>> {
        self.get(&endpoint.instance)?
            .connectable(&endpoint.connectable)
    }

    /// Connectable owning `mesh`, across every instance
    pub fn connectable_for_mesh(&self, mesh: MeshId) -> Option<(EndpointKey, Arc<dyn Connectable>)> {
        let instances: Vec<Node3DInstance> = self.instances.lock().values().cloned().collect();
        instances.into_iter().find_map(|instance| {
            instance.connectable_for_mesh(mesh).map(|connectable| {
                (
                    EndpointKey::new(instance.id().clone(), connectable.id()),
                    connectable,
                )
            })
        })
    }
}

impl InstanceObserver for InstanceRegistry {
    fn on_instance_event(&self, instance: &Node3DInstance, event: &InstanceEvent) {
        match event {
            InstanceEvent::Activated => {
                let previous = self
                    .instances
                    .lock()
                    .insert(instance.id().clone(), instance.clone());
                if let Some(previous) = previous.filter(|p| p != instance) {
                    tracing::warn!("Instance {} replaced a live instance", instance.id());
                    previous.dispose();
                }
            }
            InstanceEvent::Disposed => {
                let mut instances = self.instances.lock();
                if instances.get(instance.id()) == Some(instance) {
                    instances.remove(instance.id());
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::{ProbeFactory, TestWorld};
    use wamxr_core::StableId;
    use wamxr_node::EndpointKey;

    #[tokio::test]
    async fn test_tracks_activation_and_disposal() {
        let world = TestWorld::new();
        world.register_probe("probe", ProbeFactory::default());
        let instance = world.instance("p1", "probe");
        assert!(world.instances.is_empty());

        instance.instantiate().await.unwrap();
        assert_eq!(world.instances.ids(), vec![StableId::from("p1")]);

        instance.dispose();
        assert!(world.instances.is_empty());
    }

    #[tokio::test]
    async fn test_finds_connectables() {
        let world = TestWorld::new();
        world.register_probe("probe", ProbeFactory::default());
        let instance = world.instance("p1", "probe");
        instance.instantiate().await.unwrap();

        let key = EndpointKey::new(StableId::from("p1"), "in");
        let input = world.instances.find_connectable(&key).unwrap();
        let (found, _) = world
            .instances
            .connectable_for_mesh(input.meshes()[0])
            .unwrap();
        assert_eq!(found, key);
        assert!(
            world
                .instances
                .find_connectable(&EndpointKey::new(StableId::from("p2"), "in"))
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_failed_instance_never_registers() {
        let world = TestWorld::new();
        world.register_probe(
            "broken",
            ProbeFactory {
                fail_create: true,
                ..ProbeFactory::default()
            },
        );
        let instance = world.instance("b1", "broken");
        assert!(instance.instantiate().await.is_err());
        assert_eq!(world.instances.len(), 0);
    }
}
