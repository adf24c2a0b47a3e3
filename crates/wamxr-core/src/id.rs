//! Replication-wide identity of a Node3D.

use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of generated ids. 62^10 values keeps collisions negligible
/// for the number of nodes a session holds.
pub const STABLE_ID_LEN: usize = 10;

/// Stable id shared by every peer's copy of the same node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StableId(String);

impl StableId {
    /// Random short alphanumeric token
    pub fn generate() -> Self {
        let token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(STABLE_ID_LEN)
            .map(char::from)
            .collect();
        Self(token)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StableId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for StableId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for StableId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generate_is_alphanumeric() {
        let id = StableId::generate();
        assert_eq!(id.as_str().len(), STABLE_ID_LEN);
        assert!(id.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_generate_unique() {
        let ids: HashSet<StableId> = (0..1000).map(|_| StableId::generate()).collect();
        assert_eq!(ids.len(), 1000);
    }
}
