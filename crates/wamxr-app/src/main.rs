//! wamxr - shared world of patchable instruments
//!
//! Runs one headless peer: optionally restores a session snapshot, creates
//! the requested nodes, ticks for a number of frames and saves on the way
//! out.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wamxr_app::{WamWorld, WorldConfig};

#[derive(Parser, Debug)]
#[command(name = "wamxr")]
#[command(about = "Run a headless wamxr peer", long_about = None)]
struct Args {
    /// World config file (.ron)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides the peer name from the config file
    #[arg(long)]
    peer_name: Option<String>,

    /// Base URL of the kind config service
    #[arg(long)]
    config_url: Option<String>,

    /// Directory of kind configs
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// Session snapshot to restore
    #[arg(short, long)]
    load: Option<PathBuf>,

    /// Where to write the session snapshot on exit
    #[arg(short, long)]
    save: Option<PathBuf>,

    /// Node kinds to create, in order
    #[arg(long = "create", value_name = "KIND")]
    kinds: Vec<String>,

    /// Frames to run before exiting
    #[arg(long, default_value_t = 60)]
    frames: u32,
}

impl Args {
    fn world_config(&self) -> Result<WorldConfig> {
        let mut config = match &self.config {
            Some(path) => WorldConfig::load(path)
                .with_context(|| format!("Failed to load {}", path.display()))?,
            None => WorldConfig::default(),
        };
        if let Some(name) = &self.peer_name {
            config.peer_name.clone_from(name);
        }
        if let Some(url) = &self.config_url {
            config.config_url = Some(url.clone());
        }
        if let Some(dir) = &self.config_dir {
            config.config_dir = Some(dir.clone());
        }
        Ok(config)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wamxr=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = args.world_config()?;
    tracing::info!("Starting wamxr peer {}", config.peer_name);

    let world = match &args.load {
        Some(path) => WamWorld::load_snapshot(&config, path).await?,
        None => WamWorld::new(&config),
    };

    for kind in &args.kinds {
        match world.sync.create_node(kind).await {
            Ok(instance) => tracing::info!("Created {} as {}", kind, instance.id()),
            Err(e) => tracing::error!("Could not create {}: {}", kind, e),
        }
    }

    let mut interval = tokio::time::interval(config.frame_interval());
    for _ in 0..args.frames {
        interval.tick().await;
        world.frame(None).await;
        for message in world.drain_messages() {
            tracing::warn!("{:?}: {}", message.level, message.text);
        }
    }

    for id in world.sync.node_ids() {
        if let Some(instance) = world.sync.node(&id) {
            tracing::info!("{} {} {:?}", id, instance.kind(), instance.state());
        }
    }
    tracing::info!(
        "{} nodes, {} connections",
        world.runtime.instances.len(),
        world.runtime.connections.connections().len()
    );

    if let Some(path) = &args.save {
        world.save_snapshot(path).await?;
    }

    tracing::info!("wamxr shutting down");
    Ok(())
}
