//! Host Context: the capabilities the world grants a logic object.

use std::fmt;
use std::ops::RangeInclusive;
use std::sync::Arc;
use wamxr_core::{StableId, Vec3};

use crate::NodeError;
use crate::connectable::Connectable;
use crate::node::SharedContext;
use crate::scene::MeshId;

/// Bumped whenever a method is added to or changed on [`Host`]
pub const HOST_CONTEXT_VERSION: u32 = 1;

/// Capability object handed to a logic constructor
pub type HostContext = Arc<dyn Host>;

type ValueCallback = Arc<dyn Fn(f32) + Send + Sync>;
type Action = Arc<dyn Fn() + Send + Sync>;

/// A draggable parameter knob
#[derive(Clone)]
pub struct ParameterSpec {
    pub id: String,
    pub label: String,
    pub min: f32,
    pub max: f32,
    pub default: f32,
    /// Mesh the user grabs to change the value
    pub mesh: MeshId,
    /// Called with the new value after a user interaction
    pub on_change: ValueCallback,
}

impl ParameterSpec {
    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        range: RangeInclusive<f32>,
        default: f32,
        mesh: MeshId,
    ) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            min: *range.start(),
            max: *range.end(),
            default,
            mesh,
            on_change: Arc::new(|_| {}),
        }
    }

    pub fn on_change<F>(mut self, callback: F) -> Self
    where
        F: Fn(f32) + Send + Sync + 'static,
    {
        self.on_change = Arc::new(callback);
        self
    }
}

impl fmt::Debug for ParameterSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParameterSpec")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("min", &self.min)
            .field("max", &self.max)
            .field("default", &self.default)
            .field("mesh", &self.mesh)
            .finish_non_exhaustive()
    }
}

/// A pressable button
#[derive(Clone)]
pub struct ButtonSpec {
    pub id: String,
    pub label: String,
    pub mesh: MeshId,
    pub on_press: Action,
}

impl ButtonSpec {
    pub fn new<F>(id: impl Into<String>, label: impl Into<String>, mesh: MeshId, on_press: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            label: label.into(),
            mesh,
            on_press: Arc::new(on_press),
        }
    }
}

impl fmt::Debug for ButtonSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ButtonSpec")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("mesh", &self.mesh)
            .finish_non_exhaustive()
    }
}

/// One line of an instance's context menu
#[derive(Clone)]
pub struct MenuEntry {
    pub label: String,
    pub action: Action,
}

impl MenuEntry {
    pub fn new<F>(label: impl Into<String>, action: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            action: Arc::new(action),
        }
    }
}

impl fmt::Debug for MenuEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MenuEntry")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// World capabilities available to one logic instance.
///
/// Every `create_*` must be paired with the matching `remove_*` before the
/// logic's `dispose` returns. The runtime releases leftovers itself but
/// reports them as leaks.
pub trait Host: Send + Sync {
    fn version(&self) -> u32 {
        HOST_CONTEXT_VERSION
    }

    /// Stable id of the owning instance
    fn instance_id(&self) -> &StableId;

    fn shared(&self) -> &SharedContext;

    fn create_parameter(&self, spec: ParameterSpec) -> Result<(), NodeError>;

    fn remove_parameter(&self, id: &str);

    fn parameter_value(&self, id: &str) -> Option<f32>;

    /// Update a parameter's value and display without firing `on_change`
    fn set_parameter_value(&self, id: &str, value: f32);

    fn create_connectable(&self, connectable: Arc<dyn Connectable>) -> Result<(), NodeError>;

    fn remove_connectable(&self, id: &str);

    fn create_button(&self, spec: ButtonSpec) -> Result<(), NodeError>;

    fn remove_button(&self, id: &str);

    fn add_to_bounding_box(&self, mesh: MeshId);

    fn remove_from_bounding_box(&self, mesh: MeshId);

    fn open_menu(&self, entries: Vec<MenuEntry>);

    fn close_menu(&self);

    fn print_menu(&self, text: &str);

    fn player_position(&self) -> Vec3;

    /// Delete the owning instance (locally and on every peer)
    fn delete(&self);

    /// Ask for `key` to be read back and replicated
    fn notify_state_change(&self, key: &str);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_parameter_spec_builder() {
        let seen = Arc::new(AtomicU32::new(0));
        let sink = seen.clone();
        let spec = ParameterSpec::new("frequency", "Freq", 20.0..=2000.0, 220.0, MeshId(3))
            .on_change(move |v| sink.store(v.to_bits(), Ordering::SeqCst));

        assert_eq!(spec.min, 20.0);
        assert_eq!(spec.max, 2000.0);
        (spec.on_change)(440.0);
        assert_eq!(f32::from_bits(seen.load(Ordering::SeqCst)), 440.0);
        assert!(format!("{spec:?}").contains("frequency"));
    }
}
