//! Node3D runtime.
//!
//! This crate brings Node3D kinds to life: the builder registry resolves a
//! kind to a factory, the instance runtime runs the two-phase construction
//! and keeps the books on every registration, and the connection manager
//! owns the patch cables between instances. A headless scene over a Bevy ECS
//! `World` and an in-memory signal graph stand in for the rendering and
//! audio engines.

pub mod builder;
pub mod builtin;
pub mod config_source;
pub mod connection;
pub mod dynamic;
pub mod instance;
pub mod message;
pub mod parameter;
pub mod registry;
pub mod scene;
pub mod scheduler;
pub mod signal_graph;
pub mod world;

#[cfg(test)]
mod test_support;

pub use builder::{BuildError, BuilderRegistry, SceneServices};
pub use config_source::{ConfigError, ConfigSource, DirConfigSource, HttpConfigSource, WamConfig};
pub use connection::{
    ConnectError, ConnectionKey, ConnectionManager, ConnectionObserver, DragOutcome,
};
pub use instance::{
    InstanceEvent, InstanceObserver, InstanceState, LeakReport, Node3DInstance, POSITION_KEY,
};
pub use message::{ChannelMessages, CollectingMessages, MessageSink, TracingMessages};
pub use registry::InstanceRegistry;
pub use scene::{EcsScene, StaticInput};
pub use scheduler::FrameScheduler;
pub use signal_graph::SignalGraph;
pub use world::RuntimeWorld;
