use std::sync::Arc;
use std::time::Duration;

use crate::consensus::types::{Block, NotarizedBlock, NotarizedBlockchain, Proposal, ProposalSigned};
use crate::consensus::{quorum_threshold, PlayerRegistry, ProtocolService, VotingEngine};
use crate::crypto::{LocalSigner, SignatureService};
use crate::network::{codec, InboundMessage, NetworkClient, NetworkEvent, ProtocolMessage};
use crate::node::{self, ProtocolConfig, ServiceHandle};
use crate::tests::support::{peer_event, signed_vote, LoopbackClient, LoopbackHub};
use crate::utils::init_logging;

type Node = ProtocolService<String, LoopbackClient>;

/// Virtual seconds to wait for progress. Timers run at one second per delta.
const PATIENCE: Duration = Duration::from_secs(600);

struct Player {
    id: String,
    signer: Arc<dyn SignatureService>,
}

fn players(n: usize) -> Vec<Player> {
    (0..n)
        .map(|i| Player { id: format!("p{i}"), signer: Arc::new(LocalSigner::default()) })
        .collect()
}

fn config(id: &str) -> ProtocolConfig {
    ProtocolConfig { local_player_id: Some(id.to_string()), ..ProtocolConfig::default() }
}

/// Start the first `live` players on `hub`. Every running node knows all
/// players, live or not, before its round loop starts.
fn start_live(hub: &Arc<LoopbackHub>, all: &[Player], live: usize) -> Vec<(Arc<Node>, ServiceHandle)> {
    let joined: Vec<_> = all[..live].iter().map(|p| hub.join(&p.id, 1)).collect();

    let nodes: Vec<Arc<Node>> = all
        .iter()
        .zip(&joined)
        .map(|(p, (client, _))| Arc::new(ProtocolService::new(&config(&p.id), p.signer.clone(), client.clone())))
        .collect();
    for node in &nodes {
        for p in all.iter().filter(|p| p.id != node.local_player_id()) {
            node.process_network_message(&peer_event(NetworkEvent::PeerConnected, &p.id, &p.signer)).unwrap();
        }
        assert_eq!(node.players().len(), all.len() - 1);
    }
    if let Some(leader) = nodes.get(1) {
        // iteration 1 leader in sorted order
        leader.process_transactions(vec!["tx-a".to_string(), "tx-b".to_string()]);
    }

    nodes
        .into_iter()
        .zip(joined)
        .map(|(node, (_, rx))| {
            let handle = node::spawn(node.clone(), rx);
            (node, handle)
        })
        .collect()
}

async fn wait_for_height(nodes: &[(Arc<Node>, ServiceHandle)], len: usize) {
    tokio::time::timeout(PATIENCE, async {
        while nodes.iter().any(|(n, _)| n.blockchain().len() < len) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("players did not reach the expected height");
}

async fn shutdown_all(nodes: Vec<(Arc<Node>, ServiceHandle)>) -> Vec<NotarizedBlockchain<String>> {
    let mut chains = Vec::new();
    for (node, handle) in nodes {
        handle.shutdown().await.unwrap();
        assert!(node.is_shutdown());
        chains.push(node.blockchain());
    }
    chains
}

/// Every chain holds the same blocks up to `len`. Votes may differ: each
/// player notarizes with the quorum it collected.
fn assert_same_blocks(chains: &[NotarizedBlockchain<String>], len: usize) -> Vec<Block<String>> {
    let reference: Vec<Block<String>> = chains[0].blocks[..len].iter().map(|nb| nb.block.clone()).collect();
    for chain in chains {
        let blocks: Vec<&Block<String>> = chain.blocks[..len].iter().map(|nb| &nb.block).collect();
        assert_eq!(blocks, reference.iter().collect::<Vec<_>>());
    }
    reference
}

fn assert_quorum_votes(chain: &NotarizedBlockchain<String>, players: usize) {
    for (height, notarized) in chain.blocks.iter().enumerate().skip(1) {
        assert_eq!(notarized.block.height, height as u64);
        assert!(notarized.votes.len() >= quorum_threshold(players));
        assert!(notarized.votes.iter().all(|v| v.vote().iteration as usize == height));
    }
}

#[tokio::test(start_paused = true)]
async fn test_four_players_notarize_the_same_chain() {
    init_logging();
    let all = players(4);
    let hub = LoopbackHub::new();
    let nodes = start_live(&hub, &all, 4);
    wait_for_height(&nodes, 6).await;

    let chains = shutdown_all(nodes).await;
    let blocks = assert_same_blocks(&chains, 6);
    assert_eq!(blocks[1].transactions, vec!["tx-a", "tx-b"]);
    assert!(blocks.iter().skip(1).all(|b| !b.is_dummy()));
    for chain in &chains {
        assert_quorum_votes(chain, 4);
    }
}

#[tokio::test(start_paused = true)]
async fn test_silent_leader_is_skipped_with_a_dummy_block() {
    init_logging();
    let all = players(4);
    let hub = LoopbackHub::new();
    // p3 leads iteration 3 and never runs
    let nodes = start_live(&hub, &all, 3);
    wait_for_height(&nodes, 6).await;

    let chains = shutdown_all(nodes).await;
    let blocks = assert_same_blocks(&chains, 6);
    assert!(blocks[3].is_dummy());
    assert_eq!(blocks[3].height, 3);
    for height in [1, 2, 4, 5] {
        assert!(!blocks[height].is_dummy(), "height {height} should carry a proposed block");
    }
    for chain in &chains {
        assert_quorum_votes(chain, 4);
        let dummy_voters: Vec<&str> = chain.blocks[3].votes.iter().map(|v| v.vote().player_id.as_str()).collect();
        assert_eq!(dummy_voters, vec!["p0", "p1", "p2"]);
    }
}

#[tokio::test(start_paused = true)]
async fn test_unregistered_player_cannot_inject_blocks() {
    init_logging();
    let all = players(4);
    let hub = LoopbackHub::new();
    let nodes = start_live(&hub, &all, 4);

    let mallory: Arc<dyn SignatureService> = Arc::new(LocalSigner::default());
    let (client, _inbox) = hub.join("mallory", 1);
    let genesis: Block<String> = Block::genesis();
    let loot = Block::new(1, mallory.compute_block_hash(&genesis).unwrap(), vec!["steal".to_string()]);
    let sign = |proposal: Proposal<String>| {
        let sig = mallory.generate_signature(&codec::to_bytes(&proposal).unwrap()).unwrap();
        ProtocolMessage::proposal(codec::to_bytes(&ProposalSigned::new(proposal, &sig)).unwrap())
    };

    // a parent chain notarized by names mallory made up or borrowed
    let forged_votes = ["mallory", "p0", "p2"].iter().map(|id| signed_vote(&mallory, id, 1, &loot)).collect();
    let forged = NotarizedBlockchain::new(vec![
        NotarizedBlock::new(genesis.clone(), Vec::new()),
        NotarizedBlock::new(loot.clone(), forged_votes),
    ]);
    client.broadcast_proposal(sign(Proposal {
        iteration: 2,
        player_id: "mallory".into(),
        new_block: Block::new(2, mallory.compute_block_hash(&loot).unwrap(), vec!["steal".to_string()]),
        parent_chain: forged,
    }));
    // the right parent chain, posing as the leader of iteration 1
    client.broadcast_proposal(sign(Proposal {
        iteration: 1,
        player_id: all[1].id.clone(),
        new_block: loot.clone(),
        parent_chain: NotarizedBlockchain::new(vec![NotarizedBlock::new(genesis.clone(), Vec::new())]),
    }));

    wait_for_height(&nodes, 4).await;
    let chains = shutdown_all(nodes).await;
    assert_same_blocks(&chains, 4);
    for chain in &chains {
        assert!(chain.blocks.iter().all(|nb| !nb.block.transactions.iter().any(|tx| tx == "steal")));
        assert_quorum_votes(chain, 4);
    }
}

#[tokio::test(start_paused = true)]
async fn test_peer_events_through_the_dispatcher() {
    init_logging();
    let all = players(2);
    let hub = LoopbackHub::new();
    let (client, rx) = hub.join(&all[0].id, 1000);
    let node: Arc<Node> = Arc::new(ProtocolService::new(&config(&all[0].id), all[0].signer.clone(), client));
    // p1 leads iteration 1 and never shows up, so the round just waits
    node.process_network_message(&peer_event(NetworkEvent::PeerConnected, &all[1].id, &all[1].signer)).unwrap();
    assert_eq!(node.players().len(), 1);

    let (tx, inbound) = tokio::sync::mpsc::unbounded_channel();
    drop(rx);
    let handle = node::spawn(node.clone(), inbound);

    let newcomer: Arc<dyn SignatureService> = Arc::new(LocalSigner::default());
    tx.send(InboundMessage::Network(peer_event(NetworkEvent::PeerConnected, "late", &newcomer))).unwrap();
    tx.send(InboundMessage::Network(peer_event(NetworkEvent::PeerDisconnected, "late", &newcomer))).unwrap();
    tx.send(InboundMessage::Network(peer_event(NetworkEvent::PeerDisconnected, &all[1].id, &all[1].signer))).unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while !node.players().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(node.players().len(), 0);
    assert_eq!(node.players().get_public_key("late"), None);
    assert_eq!(node.blockchain().len(), 1);

    handle.shutdown().await.unwrap();
}

#[test]
fn test_registry_round_trip_through_events() {
    let registry = PlayerRegistry::new();
    let signer: Arc<dyn SignatureService> = Arc::new(LocalSigner::default());
    let event = peer_event(NetworkEvent::PeerConnected, "peer", &signer);
    let info = codec::peer_info_from_json(&event.details).unwrap();

    registry.add_player(info.peer_id(), signer.public_key_from_bytes(info.public_key_bytes()).unwrap());
    assert_eq!(registry.len(), 1);
    registry.remove_player(info.peer_id());
    assert_eq!(registry.len(), 0);
    assert_eq!(registry.get_public_key("peer"), None);
}

#[test]
fn test_quorum_sequence_for_three_players() {
    let all = players(3);
    // the local player p0 is counted without being announced
    let registry = Arc::new(PlayerRegistry::with_players(all[1..].iter().map(|p| (p.id.clone(), p.signer.public_key()))));
    let engine: VotingEngine<String> = VotingEngine::new(all[0].id.clone(), all[0].signer.clone(), registry);

    let genesis: Block<String> = Block::genesis();
    let parent_hash = all[0].signer.compute_block_hash(&genesis).unwrap();
    let proposal = Proposal {
        iteration: 1,
        player_id: all[1].id.clone(),
        new_block: Block::new(1, parent_hash, vec!["tx".to_string()]),
        parent_chain: NotarizedBlockchain::new(vec![]),
    };
    engine.initialize_for_iteration(1, &proposal).unwrap();

    let results: Vec<bool> = all
        .iter()
        .map(|p| engine.process_vote(&signed_vote(&p.signer, &p.id, 1, &proposal.new_block)).unwrap())
        .collect();
    assert_eq!(results, vec![false, false, true]);
    let notarized = engine.take_notarized_block().unwrap();
    assert_eq!(notarized.block.height, 1);
    assert_eq!(notarized.votes.len(), 3);
    assert!(engine.is_notarized(&notarized).unwrap());
}
