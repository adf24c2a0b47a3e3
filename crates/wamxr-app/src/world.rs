//! Composition root: one peer's runtime, document and message channel.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use wamxr_comms::{MessageReceiver, PeerLink, UserMessage, create_message_channel};
use wamxr_runtime::{ChannelMessages, RuntimeWorld};
use wamxr_sync::{SharedDocument, SyncManager};

use crate::config::WorldConfig;

pub struct WamWorld {
    pub runtime: RuntimeWorld,
    pub sync: Arc<SyncManager>,
    messages: MessageReceiver,
}

impl WamWorld {
    /// Empty world with a fresh document
    pub fn new(config: &WorldConfig) -> Self {
        Self::with_document(config, SharedDocument::with_peer_name(&config.peer_name))
    }

    pub fn with_document(config: &WorldConfig, document: SharedDocument) -> Self {
        let (tx, messages) = create_message_channel(config.channel_capacity);
        let runtime = RuntimeWorld::new(Arc::new(ChannelMessages::new(tx)), config.config_source());
        let sync = SyncManager::new(&runtime, document);
        Self {
            runtime,
            sync,
            messages,
        }
    }

    /// World restored from a session snapshot file
    pub async fn load_snapshot(config: &WorldConfig, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
        let document = SharedDocument::load(&bytes)
            .with_context(|| format!("{} is not a session snapshot", path.display()))?;

        let world = Self::with_document(config, document);
        world
            .sync
            .refresh()
            .await
            .context("Failed to materialise the snapshot")?;
        tracing::info!(
            "Loaded {} nodes from {}",
            world.sync.node_ids().len(),
            path.display()
        );
        Ok(world)
    }

    pub async fn save_snapshot(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let bytes = self.sync.save().await;
        tokio::fs::write(path, bytes)
            .await
            .with_context(|| format!("Failed to write snapshot {}", path.display()))?;
        tracing::info!("Saved session to {}", path.display());
        Ok(())
    }

    /// One frame: deferred work, then replication with `link` if any.
    /// Returns how many peer updates were applied.
    pub async fn frame(&self, link: Option<&PeerLink>) -> usize {
        self.runtime.tick();
        let applied = match link {
            Some(link) => self.sync.pump(link).await,
            None => {
                self.sync.flush().await;
                0
            }
        };
        // Work queued by remote construction lands this frame too
        self.runtime.tick();
        applied
    }

    /// User messages raised since the last call
    pub fn drain_messages(&self) -> Vec<UserMessage> {
        self.messages.try_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wamxr_comms::{MessageLevel, create_link_pair};
    use wamxr_core::StableId;

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let config = WorldConfig::default();
        let world = WamWorld::new(&config);
        let notes = world.sync.create_node("note_box").await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.automerge");
        world.save_snapshot(&path).await.unwrap();

        let restored = WamWorld::load_snapshot(&config, &path).await.unwrap();
        assert_eq!(restored.sync.node_ids(), vec![notes.id().clone()]);
        assert!(restored.sync.node(notes.id()).unwrap().is_active());
    }

    #[tokio::test]
    async fn test_bad_snapshot_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.automerge");
        std::fs::write(&path, b"definitely not automerge").unwrap();
        let config = WorldConfig::default();
        assert!(WamWorld::load_snapshot(&config, &path).await.is_err());
        assert!(
            WamWorld::load_snapshot(&config, dir.path().join("missing"))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_unknown_kind_reaches_the_message_channel() {
        let world = WamWorld::new(&WorldConfig::default());
        assert!(world.sync.create_node("theremin").await.is_err());
        let messages = world.drain_messages();
        assert!(messages.iter().any(|m| m.level == MessageLevel::Error));
        assert!(world.drain_messages().is_empty());
    }

    #[tokio::test]
    async fn test_frames_replicate_between_worlds() {
        let (a_link, b_link) = create_link_pair(16);
        let a = WamWorld::new(&WorldConfig {
            peer_name: "a".to_string(),
            ..WorldConfig::default()
        });
        let b = WamWorld::new(&WorldConfig {
            peer_name: "b".to_string(),
            ..WorldConfig::default()
        });

        a.sync
            .create_node_with_id(StableId::from("osc1"), "oscillator")
            .await
            .unwrap();
        a.frame(Some(&a_link)).await;
        assert_eq!(b.frame(Some(&b_link)).await, 1);
        assert!(b.runtime.instances.get(&StableId::from("osc1")).is_some());
    }
}
