//! Two-peer session demonstration
//!
//! Peer A builds a small patch, peer B joins late and receives it, then the
//! session is saved and restored into a third, fresh world.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wamxr_comms::{PeerLink, create_link_pair};
use wamxr_core::StableId;
use wamxr_node::EndpointKey;
use wamxr_runtime::Node3DInstance;
use wamxr_runtime::builtin::{oscillator, speaker};

use wamxr_app::{WamWorld, WorldConfig};

/// Session demo
#[derive(Parser, Debug)]
#[command(name = "session-demo")]
#[command(about = "Replicate a patch between two peers and save it", long_about = None)]
struct Args {
    /// Session snapshot path
    #[arg(short, long, default_value = "session.automerge")]
    session: PathBuf,

    /// Oscillator frequency set on peer A
    #[arg(short, long, default_value_t = 440.0)]
    frequency: f32,
}

fn peer(name: &str) -> WamWorld {
    WamWorld::new(&WorldConfig {
        peer_name: name.to_string(),
        ..WorldConfig::default()
    })
}

async fn exchange(a: &WamWorld, a_link: &PeerLink, b: &WamWorld, b_link: &PeerLink) {
    for _ in 0..2 {
        a.frame(Some(a_link)).await;
        b.frame(Some(b_link)).await;
    }
}

async fn describe(label: &str, world: &WamWorld) {
    println!("  [{label}]");
    for id in world.sync.node_ids() {
        let Some(instance) = world.sync.node(&id) else {
            continue;
        };
        println!("    {} {}{}", id, instance.kind(), state_summary(&instance).await);
    }
    for key in world.runtime.connections.connections() {
        println!("    cable {key}");
    }
}

async fn state_summary(instance: &Node3DInstance) -> String {
    let mut summary = String::new();
    for key in instance.state_keys() {
        if let Some(value) = instance.get_state(&key).await {
            summary.push_str(&format!(" {key}={value}"));
        }
    }
    summary
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wamxr=info,session_demo=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    println!("=== Session Demo ===\n");

    println!("Step 1: Peer A builds a patch...");
    let a = peer("peer-a");
    let osc = a
        .sync
        .create_node_with_id(StableId::from("abc123"), "oscillator")
        .await
        .context("Failed to create the oscillator")?;
    a.sync
        .create_node_with_id(StableId::from("spk001"), "speaker")
        .await
        .context("Failed to create the speaker")?;
    a.runtime
        .connections
        .connect(
            &EndpointKey::new(StableId::from("abc123"), oscillator::AUDIO_OUT),
            &EndpointKey::new(StableId::from("spk001"), speaker::AUDIO_IN),
        )
        .context("Failed to connect oscillator to speaker")?;
    if let Some(frequency) = osc.parameter(oscillator::FREQUENCY) {
        frequency.set_value(args.frequency);
    }
    describe("A", &a).await;

    println!("\nStep 2: Peer B joins late and asks for the world...");
    let (a_link, b_link) = create_link_pair(64);
    let b = peer("peer-b");
    b.sync.request_snapshot(&b_link);
    exchange(&a, &a_link, &b, &b_link).await;
    describe("B", &b).await;

    println!("\nStep 3: Peer A deletes the speaker...");
    if let Some(speaker) = a.sync.node(&StableId::from("spk001")) {
        speaker.delete();
    }
    exchange(&a, &a_link, &b, &b_link).await;
    describe("B", &b).await;

    println!("\nStep 4: Saving session to {}...", args.session.display());
    b.save_snapshot(&args.session).await?;
    println!("  ✓ Session saved");

    println!("\nStep 5: Restoring into a fresh world...");
    let c = WamWorld::load_snapshot(&WorldConfig::default(), &args.session).await?;
    describe("C", &c).await;

    println!("\n=== Demo Complete ===");
    Ok(())
}
