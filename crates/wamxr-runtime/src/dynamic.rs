//! Descriptor-built kinds.
//!
//! A remote kind whose `wam3d` descriptor embeds a `generator` section is
//! built without any kind-specific code: every declared port becomes a
//! connectable backed by its own signal handle, every declared parameter a
//! knob whose value is also a state key.
//!
//! ```json
//! {
//!   "generator": {
//!     "label": "Drone",
//!     "outputs": [{ "id": "audioOut", "kind": "audio" }],
//!     "parameters": [{ "id": "pitch", "min": 0.0, "max": 1.0, "default": 0.5 }]
//!   }
//! }
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use wamxr_core::{SignalKind, Vec3};
use wamxr_node::{
    Cardinality, Connectable, HostContext, Input, ListOutput, MeshId, Node3DFactory, Node3DGui,
    Node3DLogic, NodeError, Output, ParameterSpec, SharedContext, SignalBackend, SignalHandle,
    StateValue,
};

use crate::builder::BuildError;
use crate::builtin::{PanelGui, frame, panel, unframe};

/// Edge length of one port or knob mesh
const PART_SIZE: f32 = 0.0625;
/// Horizontal spacing between parts
const PART_SPACING: f32 = 0.125;

/// One declared connectable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortDescriptor {
    pub id: String,
    pub kind: SignalKind,
    /// Input: accept many sources. Output: fan out to many targets.
    #[serde(default)]
    pub list: bool,
}

/// One declared parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDescriptor {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    pub min: f32,
    pub max: f32,
    pub default: f32,
}

impl ParameterDescriptor {
    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }
}

/// The `generator` section of a kind descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorDescriptor {
    pub label: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub inputs: Vec<PortDescriptor>,
    #[serde(default)]
    pub outputs: Vec<PortDescriptor>,
    #[serde(default)]
    pub parameters: Vec<ParameterDescriptor>,
}

impl GeneratorDescriptor {
    /// Extract and validate the generator of a fetched `wam3d` value
    pub fn from_wam3d(kind: &str, wam3d: &serde_json::Value) -> Result<Self, BuildError> {
        let Some(generator) = wam3d.get("generator") else {
            return Err(BuildError::NoGenerator(kind.to_string()));
        };
        let invalid = |reason: String| BuildError::InvalidDescriptor {
            kind: kind.to_string(),
            reason,
        };

        let descriptor: Self =
            serde_json::from_value(generator.clone()).map_err(|e| invalid(e.to_string()))?;

        let mut ports = BTreeSet::new();
        for port in descriptor.inputs.iter().chain(&descriptor.outputs) {
            // Ports are addressed as `instance:port` inside `output>input` keys
            if port.id.is_empty() || port.id.contains([':', '>']) {
                return Err(invalid(format!("port id '{}' cannot be addressed", port.id)));
            }
            if !ports.insert(port.id.as_str()) {
                return Err(invalid(format!("duplicate port '{}'", port.id)));
            }
        }
        let mut parameters = BTreeSet::new();
        for parameter in &descriptor.parameters {
            if !parameters.insert(parameter.id.as_str()) {
                return Err(invalid(format!("duplicate parameter '{}'", parameter.id)));
            }
            if parameter.min >= parameter.max {
                return Err(invalid(format!(
                    "parameter '{}' has an empty range {}..{}",
                    parameter.id, parameter.min, parameter.max
                )));
            }
        }
        Ok(descriptor)
    }

    fn ports(&self) -> impl Iterator<Item = &PortDescriptor> {
        self.inputs.iter().chain(&self.outputs)
    }
}

fn port_part(id: &str) -> String {
    format!("port:{id}")
}

fn parameter_part(id: &str) -> String {
    format!("param:{id}")
}

/// Factory for a descriptor-built kind
pub struct GeneratorFactory {
    descriptor: GeneratorDescriptor,
}

impl GeneratorFactory {
    pub const fn new(descriptor: GeneratorDescriptor) -> Self {
        Self { descriptor }
    }

    pub const fn descriptor(&self) -> &GeneratorDescriptor {
        &self.descriptor
    }

    fn create_connectable(
        port: &PortDescriptor,
        direction_is_input: bool,
        handle: SignalHandle,
        mesh: MeshId,
        signal: &Arc<dyn SignalBackend>,
    ) -> Arc<dyn Connectable> {
        if direction_is_input {
            let cardinality = if port.list {
                Cardinality::Many
            } else {
                Cardinality::Single
            };
            return Arc::new(
                Input::new(port.id.clone(), handle, vec![mesh]).with_cardinality(cardinality),
            );
        }
        if !port.list {
            return Arc::new(Output::new(port.id.clone(), handle, vec![mesh], signal.clone()));
        }

        let wire = signal.clone();
        let unwire = signal.clone();
        let id = port.id.clone();
        Arc::new(
            ListOutput::new(port.id.clone(), port.kind, vec![mesh])
                .on_add(move |target| {
                    if let Err(e) = wire.connect(handle, target) {
                        tracing::warn!("Output {} failed to wire: {}", id, e);
                    }
                })
                .on_remove(move |target| unwire.disconnect(handle, target)),
        )
    }

    fn register(
        &self,
        host: &HostContext,
        gui: &PanelGui,
        logic: &GeneratorLogic,
        handles: &mut Vec<SignalHandle>,
    ) -> Result<(), NodeError> {
        let signal = host.shared().signal.clone();
        let inputs = self.descriptor.inputs.iter().map(|p| (p, true));
        let outputs = self.descriptor.outputs.iter().map(|p| (p, false));
        for (port, is_input) in inputs.chain(outputs) {
            let mesh = gui.part(&port_part(&port.id))?;
            let handle = signal.create_handle(
                port.kind,
                &format!("{} {} {}", self.descriptor.label, host.instance_id(), port.id),
            );
            handles.push(handle);
            host.create_connectable(Self::create_connectable(
                port, is_input, handle, mesh, &signal,
            ))?;
        }

        for parameter in &self.descriptor.parameters {
            let mesh = gui.part(&parameter_part(&parameter.id))?;
            let values = logic.values.clone();
            let notify = host.clone();
            let id = parameter.id.clone();
            let spec = ParameterSpec::new(
                parameter.id.clone(),
                parameter.label(),
                parameter.min..=parameter.max,
                parameter.default,
                mesh,
            )
            .on_change(move |value| {
                values.lock().insert(id.clone(), value);
                notify.notify_state_change(&id);
            });
            host.create_parameter(spec)?;
        }
        Ok(())
    }
}

#[async_trait]
impl Node3DFactory for GeneratorFactory {
    fn label(&self) -> &str {
        &self.descriptor.label
    }

    fn description(&self) -> &str {
        &self.descriptor.description
    }

    fn tags(&self) -> &BTreeSet<String> {
        &self.descriptor.tags
    }

    async fn create_gui(&self, context: &SharedContext) -> Result<Arc<dyn Node3DGui>, NodeError> {
        let ports: Vec<&PortDescriptor> = self.descriptor.ports().collect();
        let columns = ports.len().max(self.descriptor.parameters.len()).max(1);
        #[allow(clippy::cast_precision_loss)]
        let width = PART_SPACING * columns as f32 + PART_SPACING;
        let left = -width / 2.0 + PART_SPACING;

        let mut gui = PanelGui::new(
            &context.scene,
            &self.descriptor.label,
            Vec3::new(width, 0.25, 0.125),
        );
        #[allow(clippy::cast_precision_loss)]
        for (column, port) in ports.iter().enumerate() {
            gui.add_part(
                &port_part(&port.id),
                Vec3::new(left + PART_SPACING * column as f32, -0.0625, 0.0625),
                Vec3::splat(PART_SIZE),
            );
        }
        #[allow(clippy::cast_precision_loss)]
        for (column, parameter) in self.descriptor.parameters.iter().enumerate() {
            gui.add_part(
                &parameter_part(&parameter.id),
                Vec3::new(left + PART_SPACING * column as f32, 0.0625, 0.0625),
                Vec3::splat(PART_SIZE),
            );
        }
        Ok(Arc::new(gui))
    }

    async fn create(
        &self,
        host: HostContext,
        gui: Arc<dyn Node3DGui>,
    ) -> Result<Arc<dyn Node3DLogic>, NodeError> {
        let panel = panel(&gui)?;
        let defaults = self
            .descriptor
            .parameters
            .iter()
            .map(|p| (p.id.clone(), p.default.clamp(p.min, p.max)))
            .collect();
        let mut logic = GeneratorLogic {
            host: host.clone(),
            handles: Vec::new(),
            ports: self.descriptor.ports().map(|p| p.id.clone()).collect(),
            ranges: self
                .descriptor
                .parameters
                .iter()
                .map(|p| (p.id.clone(), (p.min, p.max)))
                .collect(),
            values: Arc::new(Mutex::new(defaults)),
            meshes: panel.meshes(),
        };

        let mut handles = Vec::new();
        if let Err(e) = self.register(&host, panel, &logic, &mut handles) {
            let signal = &host.shared().signal;
            for handle in handles {
                signal.release_handle(handle);
            }
            return Err(e);
        }
        logic.handles = handles;
        frame(host.as_ref(), &logic.meshes);
        Ok(Arc::new(logic))
    }
}

pub struct GeneratorLogic {
    host: HostContext,
    handles: Vec<SignalHandle>,
    ports: Vec<String>,
    ranges: BTreeMap<String, (f32, f32)>,
    values: Arc<Mutex<BTreeMap<String, f32>>>,
    meshes: Vec<MeshId>,
}

#[async_trait]
impl Node3DLogic for GeneratorLogic {
    fn set_state(&self, key: &str, value: StateValue) -> Result<(), NodeError> {
        let Some((min, max)) = self.ranges.get(key).copied() else {
            return Err(NodeError::InvalidState {
                key: key.to_string(),
                reason: "unknown key".to_string(),
            });
        };
        let value = value.as_f64().ok_or_else(|| NodeError::InvalidState {
            key: key.to_string(),
            reason: "expected a number".to_string(),
        })? as f32;
        let value = value.clamp(min, max);
        self.values.lock().insert(key.to_string(), value);
        self.host.set_parameter_value(key, value);
        Ok(())
    }

    async fn get_state(&self, key: &str) -> Option<StateValue> {
        self.values
            .lock()
            .get(key)
            .map(|value| serde_json::json!(value))
    }

    fn state_keys(&self) -> Vec<String> {
        self.ranges.keys().cloned().collect()
    }

    fn dispose(&self) {
        for id in self.ranges.keys() {
            self.host.remove_parameter(id);
        }
        for id in &self.ports {
            self.host.remove_connectable(id);
        }
        unframe(self.host.as_ref(), &self.meshes);
        let signal = &self.host.shared().signal;
        for handle in &self.handles {
            signal.release_handle(*handle);
        }
    }
}
