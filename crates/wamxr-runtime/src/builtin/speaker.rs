//! Speaker - audio destination summing every source plugged into it.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use wamxr_core::{SignalKind, Vec3};
use wamxr_node::{
    Cardinality, HostContext, Input, MeshId, Node3DFactory, Node3DGui, Node3DLogic, NodeError,
    ParameterSpec, SharedContext, SignalHandle, StateValue,
};

use super::{PanelGui, frame, panel, tags, unframe};

pub const VOLUME: &str = "volume";
pub const AUDIO_IN: &str = "audioIn";

pub struct SpeakerFactory {
    tags: BTreeSet<String>,
}

impl Default for SpeakerFactory {
    fn default() -> Self {
        Self {
            tags: tags(&["audio", "output"]),
        }
    }
}

#[async_trait]
impl Node3DFactory for SpeakerFactory {
    fn label(&self) -> &str {
        "Speaker"
    }

    fn description(&self) -> &str {
        "Plays whatever is plugged into it"
    }

    fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    async fn create_gui(&self, context: &SharedContext) -> Result<Arc<dyn Node3DGui>, NodeError> {
        let mut gui = PanelGui::new(&context.scene, "speaker", Vec3::new(0.3, 0.5, 0.3))
            .with_world_size(0.8);
        gui.add_part(AUDIO_IN, Vec3::new(-0.125, -0.125, 0.1875), Vec3::splat(0.0625));
        gui.add_part("volume", Vec3::new(0.125, -0.125, 0.1875), Vec3::splat(0.0625));
        Ok(Arc::new(gui))
    }

    async fn create(
        &self,
        host: HostContext,
        gui: Arc<dyn Node3DGui>,
    ) -> Result<Arc<dyn Node3DLogic>, NodeError> {
        let panel = panel(&gui)?;
        let jack = panel.part(AUDIO_IN)?;
        let knob = panel.part("volume")?;
        let signal = host.shared().signal.clone();
        let handle = signal.create_handle(
            SignalKind::Audio,
            &format!("speaker {}", host.instance_id()),
        );

        let logic = Arc::new(SpeakerLogic {
            host: host.clone(),
            handle,
            volume: Arc::new(AtomicU32::new(0.8_f32.to_bits())),
            meshes: panel.meshes(),
        });

        let volume = logic.volume.clone();
        let notify = host.clone();
        let spec = ParameterSpec::new(VOLUME, "Volume", 0.0..=1.0, 0.8, knob).on_change(move |v| {
            volume.store(v.to_bits(), Ordering::Release);
            notify.notify_state_change(VOLUME);
        });

        let input = Input::new(AUDIO_IN, handle, vec![jack]).with_cardinality(Cardinality::Many);
        let registered = host
            .create_parameter(spec)
            .and_then(|()| host.create_connectable(Arc::new(input)));
        if let Err(e) = registered {
            signal.release_handle(handle);
            return Err(e);
        }
        frame(host.as_ref(), &logic.meshes);
        Ok(logic as Arc<dyn Node3DLogic>)
    }
}

pub struct SpeakerLogic {
    host: HostContext,
    handle: SignalHandle,
    volume: Arc<AtomicU32>,
    meshes: Vec<MeshId>,
}

#[async_trait]
impl Node3DLogic for SpeakerLogic {
    fn set_state(&self, key: &str, value: StateValue) -> Result<(), NodeError> {
        if key != VOLUME {
            return Err(NodeError::InvalidState {
                key: key.to_string(),
                reason: "unknown key".to_string(),
            });
        }
        let volume = value.as_f64().ok_or_else(|| NodeError::InvalidState {
            key: key.to_string(),
            reason: "expected a number".to_string(),
        })? as f32;
        let volume = volume.clamp(0.0, 1.0);
        self.volume.store(volume.to_bits(), Ordering::Release);
        self.host.set_parameter_value(VOLUME, volume);
        Ok(())
    }

    async fn get_state(&self, key: &str) -> Option<StateValue> {
        (key == VOLUME).then(|| {
            serde_json::json!(f32::from_bits(self.volume.load(Ordering::Acquire)))
        })
    }

    fn state_keys(&self) -> Vec<String> {
        vec![VOLUME.to_string()]
    }

    fn dispose(&self) {
        self.host.remove_parameter(VOLUME);
        self.host.remove_connectable(AUDIO_IN);
        unframe(self.host.as_ref(), &self.meshes);
        self.host.shared().signal.release_handle(self.handle);
    }
}
