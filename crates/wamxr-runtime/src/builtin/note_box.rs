//! Note box - MIDI pattern source fanning out to any number of consumers.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use wamxr_core::{SignalKind, Vec3};
use wamxr_node::{
    ButtonSpec, HostContext, ListOutput, MeshId, Node3DFactory, Node3DGui, Node3DLogic, NodeError,
    SharedContext, SignalHandle, StateValue,
};

use super::{PanelGui, frame, panel, tags, unframe};

pub const PATTERN: &str = "pattern";
pub const MIDI_OUT: &str = "midiOut";
pub const CLEAR: &str = "clear";

pub struct NoteBoxFactory {
    tags: BTreeSet<String>,
}

impl Default for NoteBoxFactory {
    fn default() -> Self {
        Self {
            tags: tags(&["midi", "sequencer"]),
        }
    }
}

#[async_trait]
impl Node3DFactory for NoteBoxFactory {
    fn label(&self) -> &str {
        "Note Box"
    }

    fn description(&self) -> &str {
        "Loops a note pattern to every connected MIDI input"
    }

    fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    async fn create_gui(&self, context: &SharedContext) -> Result<Arc<dyn Node3DGui>, NodeError> {
        let mut gui = PanelGui::new(&context.scene, "note_box", Vec3::new(0.5, 0.25, 0.25));
        gui.add_part(MIDI_OUT, Vec3::new(0.25, 0.0, 0.0), Vec3::splat(0.0625));
        gui.add_part(CLEAR, Vec3::new(-0.1875, 0.125, 0.0), Vec3::splat(0.0625));
        Ok(Arc::new(gui))
    }

    async fn create(
        &self,
        host: HostContext,
        gui: Arc<dyn Node3DGui>,
    ) -> Result<Arc<dyn Node3DLogic>, NodeError> {
        let panel = panel(&gui)?;
        let jack = panel.part(MIDI_OUT)?;
        let clear = panel.part(CLEAR)?;

        let logic = Arc::new(NoteBoxLogic {
            host: host.clone(),
            pattern: Arc::new(Mutex::new(Vec::new())),
            targets: Arc::new(Mutex::new(Vec::new())),
            meshes: panel.meshes(),
        });

        let added = logic.targets.clone();
        let removed = logic.targets.clone();
        let output = ListOutput::new(MIDI_OUT, SignalKind::Midi, vec![jack])
            .on_add(move |target| {
                tracing::debug!("Note box now drives MIDI handle {}", target.id);
                added.lock().push(target);
            })
            .on_remove(move |target| {
                removed.lock().retain(|t| *t != target);
            });

        let pattern = logic.pattern.clone();
        let notify = host.clone();
        let button = ButtonSpec::new(CLEAR, "Clear", clear, move || {
            pattern.lock().clear();
            notify.notify_state_change(PATTERN);
        });

        host.create_connectable(Arc::new(output))?;
        host.create_button(button)?;
        frame(host.as_ref(), &logic.meshes);
        Ok(logic as Arc<dyn Node3DLogic>)
    }
}

pub struct NoteBoxLogic {
    host: HostContext,
    /// MIDI note numbers, one per step
    pattern: Arc<Mutex<Vec<u8>>>,
    targets: Arc<Mutex<Vec<SignalHandle>>>,
    meshes: Vec<MeshId>,
}

impl NoteBoxLogic {
    /// Replace the pattern as a user edit and replicate it
    pub fn set_pattern(&self, notes: Vec<u8>) {
        *self.pattern.lock() = notes;
        self.host.notify_state_change(PATTERN);
    }

    /// MIDI handles currently receiving the pattern
    pub fn targets(&self) -> Vec<SignalHandle> {
        self.targets.lock().clone()
    }
}

#[async_trait]
impl Node3DLogic for NoteBoxLogic {
    fn set_state(&self, key: &str, value: StateValue) -> Result<(), NodeError> {
        if key != PATTERN {
            return Err(NodeError::InvalidState {
                key: key.to_string(),
                reason: "unknown key".to_string(),
            });
        }
        let notes: Vec<u8> = serde_json::from_value(value).map_err(|e| NodeError::InvalidState {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        if let Some(bad) = notes.iter().find(|n| **n > 127) {
            return Err(NodeError::InvalidState {
                key: key.to_string(),
                reason: format!("note {bad} out of MIDI range"),
            });
        }
        *self.pattern.lock() = notes;
        Ok(())
    }

    async fn get_state(&self, key: &str) -> Option<StateValue> {
        (key == PATTERN).then(|| serde_json::json!(*self.pattern.lock()))
    }

    fn state_keys(&self) -> Vec<String> {
        vec![PATTERN.to_string()]
    }

    fn dispose(&self) {
        self.host.remove_button(CLEAR);
        self.host.remove_connectable(MIDI_OUT);
        unframe(self.host.as_ref(), &self.meshes);
        self.targets.lock().clear();
    }
}
