//! Two peers sharing one world over an in-process link.

use serde_json::json;
use std::sync::Arc;
use wamxr_comms::{PeerLink, create_link_pair};
use wamxr_core::{PointerRay, StableId, Vec3};
use wamxr_node::EndpointKey;
use wamxr_runtime::builtin::{midi_sink, note_box, oscillator, speaker};
use wamxr_runtime::{CollectingMessages, ConnectionKey, Node3DInstance, RuntimeWorld};
use wamxr_sync::{CONNECTIONS, NODES, SharedDocument, SyncManager};

struct Peer {
    world: RuntimeWorld,
    sync: Arc<SyncManager>,
    link: PeerLink,
}

impl Peer {
    fn new(name: &str, link: PeerLink) -> Self {
        Self::with_document(SharedDocument::with_peer_name(name), link)
    }

    fn with_document(document: SharedDocument, link: PeerLink) -> Self {
        let world = RuntimeWorld::new(Arc::new(CollectingMessages::new()), None);
        let sync = SyncManager::new(&world, document);
        Self { world, sync, link }
    }

    fn node(&self, id: &str) -> Option<Node3DInstance> {
        self.sync.node(&StableId::from(id))
    }

    async fn pump(&self) -> usize {
        self.sync.pump(&self.link).await
    }
}

fn pair() -> (Peer, Peer) {
    let (a_link, b_link) = create_link_pair(64);
    (Peer::new("peer-a", a_link), Peer::new("peer-b", b_link))
}

/// Both peers write before either has seen the other's change
async fn cross(a: &Peer, b: &Peer) {
    let from_a = a.sync.take_update().await;
    let from_b = b.sync.take_update().await;
    if let Some(update) = from_b {
        a.sync.apply_update(&update).await.unwrap();
    }
    if let Some(update) = from_a {
        b.sync.apply_update(&update).await.unwrap();
    }
}

fn documents_agree(a: &Peer, b: &Peer) {
    for collection in [NODES, CONNECTIONS] {
        assert_eq!(
            a.sync.document().lock().snapshot(collection),
            b.sync.document().lock().snapshot(collection),
            "{collection} differ"
        );
    }
}

/// Two rounds, so each side also sees what the other wrote in reply
async fn exchange(a: &Peer, b: &Peer) {
    for _ in 0..2 {
        a.pump().await;
        b.pump().await;
    }
}

fn endpoint(instance: &str, id: &str) -> EndpointKey {
    EndpointKey::new(StableId::from(instance), id)
}

fn move_to(instance: &Node3DInstance, target: Vec3) {
    let Some(start) = instance.position() else {
        panic!("{} has no position", instance.id());
    };
    let mut ray = PointerRay::looking_forward(start - Vec3::new(0.0, 0.0, -2.0));
    instance.begin_move(&ray);
    ray.origin += target - start;
    instance.drag_move(&ray);
    instance.end_move();
}

#[tokio::test]
async fn oscillator_created_tuned_and_deleted_across_peers() {
    let (a, b) = pair();

    let local = a
        .sync
        .create_node_with_id(StableId::from("abc123"), "oscillator")
        .await
        .unwrap();
    exchange(&a, &b).await;

    let remote = b.node("abc123").expect("replicated to b");
    assert_eq!(remote.kind(), "oscillator");
    assert!(remote.is_active());

    local
        .parameter(oscillator::FREQUENCY)
        .unwrap()
        .set_value(440.0);
    exchange(&a, &b).await;
    assert_eq!(
        remote.get_state(oscillator::FREQUENCY).await,
        Some(json!(440.0))
    );

    local.delete();
    exchange(&a, &b).await;
    assert!(b.node("abc123").is_none());
    assert!(remote.is_disposed());
    assert!(b.world.instances.get(&StableId::from("abc123")).is_none());
    assert!(b.sync.document().lock().snapshot(NODES).is_empty());
}

#[tokio::test]
async fn state_updates_touch_only_their_key() {
    let (a, b) = pair();
    let local = a
        .sync
        .create_node_with_id(StableId::from("osc1"), "oscillator")
        .await
        .unwrap();
    exchange(&a, &b).await;
    let remote = b.node("osc1").unwrap();

    local
        .parameter(oscillator::FREQUENCY)
        .unwrap()
        .set_value(330.0);
    exchange(&a, &b).await;

    let target = Vec3::new(1.0, 0.0, -2.0);
    move_to(&local, target);
    exchange(&a, &b).await;

    let entry = b
        .sync
        .document()
        .lock()
        .entry(NODES, &StableId::from("osc1"))
        .unwrap()
        .unwrap();
    assert_eq!(entry.state.len(), 2);
    assert_eq!(
        remote.get_state(oscillator::FREQUENCY).await,
        Some(json!(330.0))
    );
    assert_eq!(remote.position(), local.position());
}

#[tokio::test]
async fn concurrent_writes_to_different_keys_both_survive() {
    let (a, b) = pair();
    let on_a = a
        .sync
        .create_node_with_id(StableId::from("osc1"), "oscillator")
        .await
        .unwrap();
    exchange(&a, &b).await;
    let on_b = b.node("osc1").unwrap();

    // Neither side has seen the other's change when it writes
    on_a.parameter(oscillator::FREQUENCY).unwrap().set_value(880.0);
    move_to(&on_b, Vec3::new(0.0, 1.0, -3.0));
    let from_a = a.sync.take_update().await.unwrap();
    let from_b = b.sync.take_update().await.unwrap();
    a.sync.apply_update(&from_b).await.unwrap();
    b.sync.apply_update(&from_a).await.unwrap();

    assert_eq!(on_b.get_state(oscillator::FREQUENCY).await, Some(json!(880.0)));
    assert_eq!(on_a.position(), on_b.position());
    assert_eq!(
        a.sync.document().lock().snapshot(NODES),
        b.sync.document().lock().snapshot(NODES)
    );
}

#[tokio::test]
async fn concurrent_writes_to_one_key_settle_on_one_value() {
    let (a, b) = pair();
    let on_a = a
        .sync
        .create_node_with_id(StableId::from("osc1"), "oscillator")
        .await
        .unwrap();
    exchange(&a, &b).await;
    let on_b = b.node("osc1").unwrap();

    on_a.parameter(oscillator::FREQUENCY).unwrap().set_value(880.0);
    on_b.parameter(oscillator::FREQUENCY).unwrap().set_value(220.0);
    cross(&a, &b).await;
    exchange(&a, &b).await;

    let winner = on_a.get_state(oscillator::FREQUENCY).await.unwrap();
    assert!(winner == json!(880.0) || winner == json!(220.0), "{winner}");
    assert_eq!(on_b.get_state(oscillator::FREQUENCY).await, Some(winner));
    documents_agree(&a, &b);
}

#[tokio::test]
async fn peers_sharing_a_name_still_converge() {
    let (a_link, b_link) = create_link_pair(64);
    let a = Peer::new("local", a_link);
    let b = Peer::new("local", b_link);

    a.sync
        .create_node_with_id(StableId::from("osc1"), "oscillator")
        .await
        .unwrap();
    b.sync
        .create_node_with_id(StableId::from("spk1"), "speaker")
        .await
        .unwrap();
    cross(&a, &b).await;
    exchange(&a, &b).await;

    for peer in [&a, &b] {
        let mut ids = peer.sync.node_ids();
        ids.sort();
        assert_eq!(ids, vec![StableId::from("osc1"), StableId::from("spk1")]);
    }
    documents_agree(&a, &b);
}

#[tokio::test]
async fn concurrent_cables_into_one_input_keep_the_same_winner() {
    let (a, b) = pair();
    for (id, kind) in [("n1", "note_box"), ("n2", "note_box"), ("sink", "midi_sink")] {
        a.sync
            .create_node_with_id(StableId::from(id), kind)
            .await
            .unwrap();
    }
    exchange(&a, &b).await;

    let first = a
        .world
        .connections
        .connect(
            &endpoint("n1", note_box::MIDI_OUT),
            &endpoint("sink", midi_sink::MIDI_IN),
        )
        .unwrap();
    let second = b
        .world
        .connections
        .connect(
            &endpoint("n2", note_box::MIDI_OUT),
            &endpoint("sink", midi_sink::MIDI_IN),
        )
        .unwrap();
    assert!(first < second);

    cross(&a, &b).await;
    exchange(&a, &b).await;

    assert_eq!(a.world.connections.connections(), vec![first.clone()]);
    assert_eq!(b.world.connections.connections(), vec![first.clone()]);
    assert!(a.sync.pending_connections().is_empty());
    assert!(b.sync.pending_connections().is_empty());
    let loser = b.node("n2").unwrap();
    assert_eq!(
        loser
            .connectable(note_box::MIDI_OUT)
            .unwrap()
            .connection_count(),
        0
    );
    let cables = a.sync.document().lock().snapshot(CONNECTIONS);
    assert_eq!(
        cables.keys().map(ToString::to_string).collect::<Vec<_>>(),
        vec![first.to_string()]
    );
    documents_agree(&a, &b);
}

#[tokio::test]
async fn late_joiner_receives_every_known_key() {
    let (a_link, b_link) = create_link_pair(64);
    let a = Peer::new("peer-a", a_link);
    let local = a
        .sync
        .create_node_with_id(StableId::from("osc1"), "oscillator")
        .await
        .unwrap();
    local.parameter(oscillator::FREQUENCY).unwrap().set_value(523.25);
    move_to(&local, Vec3::new(-1.0, 0.5, -2.0));
    a.sync.flush().await;

    // b shows up only now
    let b = Peer::new("peer-b", b_link);
    assert!(b.sync.request_snapshot(&b.link));
    exchange(&a, &b).await;

    let remote = b.node("osc1").unwrap();
    assert_eq!(
        remote.get_state(oscillator::FREQUENCY).await,
        Some(json!(523.25))
    );
    assert_eq!(remote.position(), local.position());
}

#[tokio::test]
async fn connections_follow_their_nodes() {
    let (a, b) = pair();
    a.sync
        .create_node_with_id(StableId::from("osc1"), "oscillator")
        .await
        .unwrap();
    a.sync
        .create_node_with_id(StableId::from("spk1"), "speaker")
        .await
        .unwrap();
    let key = a
        .world
        .connections
        .connect(
            &endpoint("osc1", oscillator::AUDIO_OUT),
            &endpoint("spk1", speaker::AUDIO_IN),
        )
        .unwrap();
    exchange(&a, &b).await;

    assert!(b.world.connections.is_connected(&key));
    assert_eq!(b.world.signal.edge_count(), 1);

    assert!(a.world.connections.disconnect(&key));
    exchange(&a, &b).await;
    assert!(!b.world.connections.is_connected(&key));
    assert_eq!(b.world.signal.edge_count(), 0);

    // Deleting an endpoint takes the cable with it, on both peers
    a.world
        .connections
        .connect(
            &endpoint("osc1", oscillator::AUDIO_OUT),
            &endpoint("spk1", speaker::AUDIO_IN),
        )
        .unwrap();
    exchange(&a, &b).await;
    assert!(b.world.connections.is_connected(&key));

    a.node("spk1").unwrap().delete();
    exchange(&a, &b).await;
    assert!(a.world.connections.connections().is_empty());
    assert!(b.world.connections.connections().is_empty());
    assert!(b.node("spk1").is_none());
}

#[tokio::test]
async fn saved_session_restores_into_a_fresh_world() {
    let (a_link, _b_link) = create_link_pair(4);
    let a = Peer::new("peer-a", a_link);
    a.sync
        .create_node_with_id(StableId::from("osc1"), "oscillator")
        .await
        .unwrap();
    let spk = a
        .sync
        .create_node_with_id(StableId::from("spk1"), "speaker")
        .await
        .unwrap();
    spk.parameter(speaker::VOLUME).unwrap().set_value(0.25);
    a.world
        .connections
        .connect(
            &endpoint("osc1", oscillator::AUDIO_OUT),
            &endpoint("spk1", speaker::AUDIO_IN),
        )
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.automerge");
    std::fs::write(&path, a.sync.save().await).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    let (c_link, _d_link) = create_link_pair(4);
    let c = Peer::with_document(SharedDocument::load(&bytes).unwrap(), c_link);
    c.sync.refresh().await.unwrap();

    let mut ids = c.sync.node_ids();
    ids.sort();
    assert_eq!(ids, vec![StableId::from("osc1"), StableId::from("spk1")]);
    assert_eq!(
        c.node("spk1").unwrap().get_state(speaker::VOLUME).await,
        Some(json!(0.25))
    );
    assert_eq!(
        c.world.connections.connections(),
        vec![ConnectionKey::new(
            endpoint("osc1", oscillator::AUDIO_OUT),
            endpoint("spk1", speaker::AUDIO_IN),
        )]
    );
    // Restoring is not a local change
    assert!(c.sync.take_update().await.is_none());
}
