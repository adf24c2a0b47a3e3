//! MIDI sink - single MIDI input, the end of a note chain.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use wamxr_core::{SignalKind, Vec3};
use wamxr_node::{
    HostContext, Input, MeshId, Node3DFactory, Node3DGui, Node3DLogic, NodeError, SharedContext,
    SignalHandle, StateValue,
};

use super::{PanelGui, frame, panel, tags, unframe};

pub const MIDI_IN: &str = "midiIn";

pub struct MidiSinkFactory {
    tags: BTreeSet<String>,
}

impl Default for MidiSinkFactory {
    fn default() -> Self {
        Self {
            tags: tags(&["midi", "output"]),
        }
    }
}

#[async_trait]
impl Node3DFactory for MidiSinkFactory {
    fn label(&self) -> &str {
        "MIDI Sink"
    }

    fn description(&self) -> &str {
        "Receives notes from one MIDI source"
    }

    fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    async fn create_gui(&self, context: &SharedContext) -> Result<Arc<dyn Node3DGui>, NodeError> {
        let mut gui = PanelGui::new(&context.scene, "midi_sink", Vec3::new(0.25, 0.25, 0.25));
        gui.add_part(MIDI_IN, Vec3::new(-0.125, 0.0, 0.0), Vec3::splat(0.0625));
        Ok(Arc::new(gui))
    }

    async fn create(
        &self,
        host: HostContext,
        gui: Arc<dyn Node3DGui>,
    ) -> Result<Arc<dyn Node3DLogic>, NodeError> {
        let panel = panel(&gui)?;
        let jack = panel.part(MIDI_IN)?;
        let signal = host.shared().signal.clone();
        let handle = signal.create_handle(
            SignalKind::Midi,
            &format!("midi sink {}", host.instance_id()),
        );

        if let Err(e) = host.create_connectable(Arc::new(Input::new(MIDI_IN, handle, vec![jack]))) {
            signal.release_handle(handle);
            return Err(e);
        }
        let meshes = panel.meshes();
        frame(host.as_ref(), &meshes);
        Ok(Arc::new(MidiSinkLogic {
            host,
            handle,
            meshes,
        }))
    }
}

pub struct MidiSinkLogic {
    host: HostContext,
    handle: SignalHandle,
    meshes: Vec<MeshId>,
}

#[async_trait]
impl Node3DLogic for MidiSinkLogic {
    fn set_state(&self, key: &str, _value: StateValue) -> Result<(), NodeError> {
        Err(NodeError::InvalidState {
            key: key.to_string(),
            reason: "MIDI sink has no state".to_string(),
        })
    }

    async fn get_state(&self, _key: &str) -> Option<StateValue> {
        None
    }

    fn state_keys(&self) -> Vec<String> {
        Vec::new()
    }

    fn dispose(&self) {
        self.host.remove_connectable(MIDI_IN);
        unframe(self.host.as_ref(), &self.meshes);
        self.host.shared().signal.release_handle(self.handle);
    }
}
