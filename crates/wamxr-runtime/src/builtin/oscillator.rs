//! Oscillator - audio source with a frequency knob.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use wamxr_core::{SignalKind, Vec3};
use wamxr_node::{
    HostContext, MeshId, Node3DFactory, Node3DGui, Node3DLogic, NodeError, Output, ParameterSpec,
    SharedContext, SignalHandle, StateValue,
};

use super::{PanelGui, frame, panel, tags, unframe};

pub const FREQUENCY: &str = "frequency";
pub const AUDIO_OUT: &str = "audioOut";

/// Frequency range in Hz
const MIN_FREQUENCY: f32 = 20.0;
const MAX_FREQUENCY: f32 = 2000.0;
const DEFAULT_FREQUENCY: f32 = 220.0;

pub struct OscillatorFactory {
    tags: BTreeSet<String>,
}

impl Default for OscillatorFactory {
    fn default() -> Self {
        Self {
            tags: tags(&["audio", "source"]),
        }
    }
}

#[async_trait]
impl Node3DFactory for OscillatorFactory {
    fn label(&self) -> &str {
        "Oscillator"
    }

    fn description(&self) -> &str {
        "Tone generator with a frequency knob"
    }

    fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    async fn create_gui(&self, context: &SharedContext) -> Result<Arc<dyn Node3DGui>, NodeError> {
        let mut gui = PanelGui::new(&context.scene, "oscillator", Vec3::new(0.4, 0.25, 0.1));
        gui.add_part("knob", Vec3::new(-0.1, 0.0, 0.0625), Vec3::splat(0.0625));
        gui.add_part(AUDIO_OUT, Vec3::new(0.125, 0.0, 0.0625), Vec3::splat(0.0625));
        Ok(Arc::new(gui))
    }

    async fn create(
        &self,
        host: HostContext,
        gui: Arc<dyn Node3DGui>,
    ) -> Result<Arc<dyn Node3DLogic>, NodeError> {
        let panel = panel(&gui)?;
        let knob = panel.part("knob")?;
        let jack = panel.part(AUDIO_OUT)?;
        let signal = host.shared().signal.clone();
        let handle = signal.create_handle(
            SignalKind::Audio,
            &format!("oscillator {}", host.instance_id()),
        );

        let logic = Arc::new(OscillatorLogic {
            host: host.clone(),
            handle,
            frequency: Arc::new(AtomicU32::new(DEFAULT_FREQUENCY.to_bits())),
            meshes: panel.meshes(),
        });

        let frequency = logic.frequency.clone();
        let notify = host.clone();
        let spec = ParameterSpec::new(
            FREQUENCY,
            "Frequency",
            MIN_FREQUENCY..=MAX_FREQUENCY,
            DEFAULT_FREQUENCY,
            knob,
        )
        .on_change(move |hz| {
            frequency.store(hz.to_bits(), Ordering::Release);
            notify.notify_state_change(FREQUENCY);
        });

        let registered = host.create_parameter(spec).and_then(|()| {
            host.create_connectable(Arc::new(Output::new(
                AUDIO_OUT,
                handle,
                vec![jack],
                signal.clone(),
            )))
        });
        if let Err(e) = registered {
            signal.release_handle(handle);
            return Err(e);
        }
        frame(host.as_ref(), &logic.meshes);
        Ok(logic as Arc<dyn Node3DLogic>)
    }
}

pub struct OscillatorLogic {
    host: HostContext,
    handle: SignalHandle,
    /// Hz, stored as f32 bits
    frequency: Arc<AtomicU32>,
    meshes: Vec<MeshId>,
}

impl OscillatorLogic {
    pub fn frequency(&self) -> f32 {
        f32::from_bits(self.frequency.load(Ordering::Acquire))
    }
}

#[async_trait]
impl Node3DLogic for OscillatorLogic {
    fn set_state(&self, key: &str, value: StateValue) -> Result<(), NodeError> {
        if key != FREQUENCY {
            return Err(NodeError::InvalidState {
                key: key.to_string(),
                reason: "unknown key".to_string(),
            });
        }
        let hz = value.as_f64().ok_or_else(|| NodeError::InvalidState {
            key: key.to_string(),
            reason: "expected a number".to_string(),
        })? as f32;
        let hz = hz.clamp(MIN_FREQUENCY, MAX_FREQUENCY);
        self.frequency.store(hz.to_bits(), Ordering::Release);
        self.host.set_parameter_value(FREQUENCY, hz);
        Ok(())
    }

    async fn get_state(&self, key: &str) -> Option<StateValue> {
        (key == FREQUENCY).then(|| serde_json::json!(self.frequency()))
    }

    fn state_keys(&self) -> Vec<String> {
        vec![FREQUENCY.to_string()]
    }

    fn dispose(&self) {
        self.host.remove_parameter(FREQUENCY);
        self.host.remove_connectable(AUDIO_OUT);
        unframe(self.host.as_ref(), &self.meshes);
        self.host.shared().signal.release_handle(self.handle);
    }
}
