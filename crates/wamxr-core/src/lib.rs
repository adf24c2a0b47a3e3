//! Core types shared across the wamxr workspace.
//!
//! Everything here is plain data: signal kinds, endpoint directions, stable
//! replication ids and the world-space bounds used by the instance runtime.

pub mod bounds;
pub mod id;

pub use bevy::math::Vec3;
pub use bounds::Bounds;
pub use id::StableId;

use serde::{Deserialize, Serialize};
use std::fmt;

/// RGBA color used for visual affordances
pub type Rgba = [f32; 4];

/// Kind of signal carried by a connectable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    /// Audio-rate signal (native audio node)
    Audio,
    /// MIDI event stream
    Midi,
}

impl SignalKind {
    /// Tag used in descriptors and replicated entries
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Midi => "midi",
        }
    }

    /// Parse a descriptor tag
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "audio" => Some(Self::Audio),
            "midi" => Some(Self::Midi),
            _ => None,
        }
    }

    /// Plug color so users can tell audio from MIDI at a glance
    pub const fn color(self) -> Rgba {
        match self {
            Self::Audio => [0.1, 0.4, 1.0, 1.0],
            Self::Midi => [1.0, 0.55, 0.0, 1.0],
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which way a signal flows through a connectable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    pub const fn opposite(self) -> Self {
        match self {
            Self::Input => Self::Output,
            Self::Output => Self::Input,
        }
    }
}

/// Pointer ray from the XR controller (or mouse)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerRay {
    pub origin: Vec3,
    pub forward: Vec3,
    pub up: Vec3,
    pub right: Vec3,
}

impl PointerRay {
    /// Ray looking down -Z from `origin`
    pub const fn looking_forward(origin: Vec3) -> Self {
        Self {
            origin,
            forward: Vec3::NEG_Z,
            up: Vec3::Y,
            right: Vec3::X,
        }
    }

    /// Point at `distance` along the ray
    pub fn point_at(&self, distance: f32) -> Vec3 {
        self.origin + self.forward * distance
    }
}

impl Default for PointerRay {
    fn default() -> Self {
        Self::looking_forward(Vec3::ZERO)
    }
}

/// Common error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Node construction or contract violation
    #[error("Node error: {0}")]
    Node(String),

    /// Replication error
    #[error("Sync error: {0}")]
    Sync(String),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other unclassified error
    #[error("Other error: {0}")]
    Other(String),
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;
