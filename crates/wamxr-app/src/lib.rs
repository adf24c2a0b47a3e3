//! wamxr application layer.
//!
//! Builds a peer from a [`WorldConfig`]: the headless runtime, the
//! replicated document and the user message channel, with nothing global.

pub mod config;
pub mod world;

pub use config::{ConfigFileError, WorldConfig};
pub use world::WamWorld;
