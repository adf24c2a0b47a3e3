//! Live parameter knobs.
//!
//! A parameter owns its value, display text and drag-to-change interaction.
//! Dragging maps the vertical swing of the pointer ray onto the value range.

use parking_lot::Mutex;
use std::sync::Arc;
use wamxr_core::PointerRay;
use wamxr_node::{MeshId, ParameterSpec, Scene};

/// Full range is covered by swinging the pointer this far vertically
const DRAG_SWING: f32 = 1.0;

#[derive(Debug, Clone, Copy)]
struct DragStart {
    value: f32,
    pointer_y: f32,
}

pub struct ParameterInstance {
    spec: ParameterSpec,
    scene: Arc<dyn Scene>,
    value: Mutex<f32>,
    drag: Mutex<Option<DragStart>>,
}

impl ParameterInstance {
    pub fn new(spec: ParameterSpec, scene: Arc<dyn Scene>) -> Self {
        let value = spec.default.clamp(spec.min, spec.max);
        Self {
            spec,
            scene,
            value: Mutex::new(value),
            drag: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.spec.id
    }

    pub fn mesh(&self) -> MeshId {
        self.spec.mesh
    }

    pub fn value(&self) -> f32 {
        *self.value.lock()
    }

    fn clamp(&self, value: f32) -> f32 {
        value.clamp(self.spec.min, self.spec.max)
    }

    /// User-driven change: store and fire `on_change`
    pub fn set_value(&self, value: f32) {
        let value = self.clamp(value);
        *self.value.lock() = value;
        (self.spec.on_change)(value);
    }

    /// Programmatic change (replicated state): store only
    pub fn set_value_silent(&self, value: f32) {
        *self.value.lock() = self.clamp(value);
    }

    pub fn display_text(&self) -> String {
        format!("{}: {:.2}", self.spec.label, self.value())
    }

    pub fn set_hover(&self, hovered: bool) {
        self.scene.set_highlight(self.spec.mesh, hovered);
    }

    pub fn begin_drag(&self, ray: &PointerRay) {
        *self.drag.lock() = Some(DragStart {
            value: self.value(),
            pointer_y: ray.forward.y,
        });
        self.set_hover(true);
    }

    pub fn drag(&self, ray: &PointerRay) {
        let Some(start) = *self.drag.lock() else {
            return;
        };
        let range = self.spec.max - self.spec.min;
        let delta = (ray.forward.y - start.pointer_y) / DRAG_SWING * range;
        self.set_value(start.value + delta);
    }

    pub fn end_drag(&self) {
        self.drag.lock().take();
        self.set_hover(false);
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.lock().is_some()
    }

    /// Release interaction state
    pub fn dispose(&self) {
        self.drag.lock().take();
        self.scene.set_highlight(self.spec.mesh, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::EcsScene;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use wamxr_core::{Bounds, Vec3};

    fn knob(scene: &Arc<EcsScene>) -> MeshId {
        scene.create_mesh("knob", Bounds::from_center_size(Vec3::ZERO, Vec3::splat(0.1)))
    }

    #[test]
    fn test_value_is_clamped() {
        let scene = Arc::new(EcsScene::new());
        let spec = ParameterSpec::new("gain", "Gain", 0.0..=1.0, 2.0, knob(&scene));
        let param = ParameterInstance::new(spec, scene);
        assert_eq!(param.value(), 1.0);
        param.set_value_silent(-3.0);
        assert_eq!(param.value(), 0.0);
    }

    #[test]
    fn test_silent_set_does_not_fire_callback() {
        let scene = Arc::new(EcsScene::new());
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let spec = ParameterSpec::new("gain", "Gain", 0.0..=1.0, 0.5, knob(&scene)).on_change(
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );
        let param = ParameterInstance::new(spec, scene);

        param.set_value_silent(0.2);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        param.set_value(0.3);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drag_maps_pointer_swing() {
        let scene = Arc::new(EcsScene::new());
        let seen = Arc::new(AtomicU32::new(0));
        let sink = seen.clone();
        let mesh = knob(&scene);
        let spec = ParameterSpec::new("frequency", "Freq", 0.0..=100.0, 50.0, mesh)
            .on_change(move |v| sink.store(v.to_bits(), Ordering::SeqCst));
        let param = ParameterInstance::new(spec, scene.clone());

        let mut ray = PointerRay::default();
        ray.forward = Vec3::new(0.0, 0.0, -1.0);
        param.begin_drag(&ray);
        assert!(scene.is_highlighted(mesh));

        ray.forward = Vec3::new(0.0, 0.25, -1.0);
        param.drag(&ray);
        assert_eq!(param.value(), 75.0);
        assert_eq!(f32::from_bits(seen.load(Ordering::SeqCst)), 75.0);

        param.end_drag();
        assert!(!param.is_dragging());
        assert!(!scene.is_highlighted(mesh));

        // Dragging without a grab does nothing
        ray.forward = Vec3::new(0.0, -1.0, -1.0);
        param.drag(&ray);
        assert_eq!(param.value(), 75.0);
    }

    #[test]
    fn test_display_text() {
        let scene = Arc::new(EcsScene::new());
        let spec = ParameterSpec::new("frequency", "Freq", 20.0..=2000.0, 440.0, knob(&scene));
        let param = ParameterInstance::new(spec, scene);
        assert_eq!(param.display_text(), "Freq: 440.00");
    }
}
