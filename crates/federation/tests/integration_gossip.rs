//! # Agora Integration Tests: Two-Node Gossip
//!
//! End-to-end tests across the real component boundaries: envelope
//! codec ↔ ingest pipelines ↔ HTTP handlers ↔ orchestrator. Two
//! in-process nodes (A and B) exchange real export bodies; no network.
//!
//! ## Test Categories
//!
//! | Category | What It Tests |
//! |----------|---------------|
//! | A. Handler Round-Trip | A exports ledger+votes, B ingests via handlers, counts converge, re-gossip adds zero |
//! | B. Orchestrator Pull | B pulls A's real export bodies through a scripted transport |
//! | C. Signed Exchange | A signs envelopes, B verifies with A's public key; forgery rejected |
//! | D. Policy Divergence | B on a different policy id rejects A's envelopes without mutation |
//! | E. Preview Propagation | observe/allow-previews node accepts preview, strict node never sees it |

use std::sync::Arc;

use axum::extract::{Json, State};
use axum::http::StatusCode;

use agora_common::NodeConfig;
use agora_federation::handlers::{
    circle_gossip, circle_ledger, federation_status, votes_gossip, votes_ledger, CircleGossipReq,
    VotesGossipReq,
};
use agora_federation::{
    AppState, FederationState, GossipEndpoint, GossipOrchestrator, GossipTransport, MemoryStore,
    MockTransport, VoteEnvelope,
};

const NOW: u64 = 1_700_000_000_000;

fn node(issuer: &str, configure: impl FnOnce(&mut NodeConfig)) -> Arc<AppState> {
    let mut cfg = NodeConfig::default();
    cfg.issuer = issuer.to_string();
    configure(&mut cfg);
    let federation =
        Arc::new(FederationState::new(cfg, Arc::new(MemoryStore::new())).expect("state"));
    let transport = Arc::new(MockTransport::new()) as Arc<dyn GossipTransport>;
    let orchestrator = Arc::new(GossipOrchestrator::new(Arc::clone(&federation), transport));
    Arc::new(AppState {
        federation,
        orchestrator,
    })
}

fn default_node(issuer: &str) -> Arc<AppState> {
    node(issuer, |_| {})
}

/// Seed node A with the local records the out-of-scope petition logic
/// would have produced.
fn seed_node_a(app: &AppState) {
    app.federation
        .record_local_ledger_entries(&["sig-hash-1".to_string(), "sig-hash-2".to_string()])
        .expect("ledger");
    app.federation
        .record_local_vote("petition-1", "author-1", "yes", NOW)
        .expect("vote");
    app.federation
        .record_local_vote("petition-2", "author-2", "no", NOW + 1)
        .expect("vote");
}

// ═══════════════════════════════════════════════════════════════════════════
// A. HANDLER ROUND-TRIP
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_two_nodes_converge_via_handlers_and_regossip_is_idempotent() {
    let a = default_node("http://node-a.example.org");
    let b = default_node("http://node-b.example.org");
    seed_node_a(&a);

    // A exports its ledger.
    let (status, Json(ledger_export)) = circle_ledger(State(a.clone())).await;
    assert_eq!(status, StatusCode::OK);
    let envelope = serde_json::from_value(ledger_export["envelope"].clone()).expect("envelope");

    // B ingests A's ledger.
    let req = CircleGossipReq {
        envelope: Some(envelope),
        hashes: None,
        peer: None,
        status: None,
    };
    let (status, Json(body)) = circle_gossip(State(b.clone()), Json(req)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["added"], 2);
    // B's ledger hash now equals A's.
    assert_eq!(body["ledgerHash"], ledger_export["ledgerHash"]);

    // A exports its votes; B ingests them.
    let (status, Json(votes_export)) = votes_ledger(State(a.clone())).await;
    assert_eq!(status, StatusCode::OK);
    let entries: Vec<VoteEnvelope> =
        serde_json::from_value(votes_export["entries"].clone()).expect("entries");
    let (status, Json(body)) =
        votes_gossip(State(b.clone()), Json(VotesGossipReq { entries: entries.clone() })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["added"], 2);

    // Counts converge.
    let Json(status_a) = federation_status(State(a.clone())).await;
    let Json(status_b) = federation_status(State(b.clone())).await;
    assert_eq!(status_a["counts"]["ledger"], status_b["counts"]["ledger"]);
    assert_eq!(status_a["counts"]["votes"], status_b["counts"]["votes"]);

    // Re-running the same gossip calls produces zero further additions.
    let (status, Json(ledger_export)) = circle_ledger(State(a.clone())).await;
    assert_eq!(status, StatusCode::OK);
    let envelope = serde_json::from_value(ledger_export["envelope"].clone()).expect("envelope");
    let req = CircleGossipReq {
        envelope: Some(envelope),
        hashes: None,
        peer: None,
        status: None,
    };
    let (status, Json(body)) = circle_gossip(State(b.clone()), Json(req)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["added"], 0);

    let (_, Json(body)) = votes_gossip(State(b), Json(VotesGossipReq { entries })).await;
    assert_eq!(body["added"], 0);
}

// ═══════════════════════════════════════════════════════════════════════════
// B. ORCHESTRATOR PULL
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_orchestrator_pull_syncs_from_peer_exports() {
    let a = default_node("http://node-a.example.org");
    seed_node_a(&a);

    // Collect A's real export bodies.
    let (_, Json(ledger_export)) = circle_ledger(State(a.clone())).await;
    let (_, Json(votes_export)) = votes_ledger(State(a.clone())).await;

    // B's transport serves A's exports at A's URL.
    const PEER_A: &str = "http://node-a.example.org";
    let b_state = Arc::new(
        FederationState::new(
            {
                let mut cfg = NodeConfig::default();
                cfg.issuer = "http://node-b.example.org".to_string();
                cfg.peers = vec!["node-a.example.org".to_string()];
                cfg
            },
            Arc::new(MemoryStore::new()),
        )
        .expect("state"),
    );
    let transport = Arc::new(MockTransport::new());
    transport.script_sticky(
        PEER_A,
        GossipEndpoint::CircleLedger,
        Ok(agora_federation::transport::TransportReply::new(
            200,
            ledger_export,
        )),
    );
    transport.script_sticky(
        PEER_A,
        GossipEndpoint::VotesLedger,
        Ok(agora_federation::transport::TransportReply::new(
            200,
            votes_export,
        )),
    );
    // Transactions endpoint absent on A: default 404 → skipped.

    let orchestrator = GossipOrchestrator::new(
        Arc::clone(&b_state),
        transport.clone() as Arc<dyn GossipTransport>,
    );

    let summary = orchestrator.pull_once(false).await;
    assert!(summary.ok);
    assert_eq!(summary.ledger.added, 2);
    assert_eq!(summary.votes.added, 2);
    assert_eq!(summary.transactions.skipped, 1);

    // B converged with A.
    assert_eq!(b_state.ledger_snapshot(), a.federation.ledger_snapshot());
    assert_eq!(b_state.votes.read().len(), 2);

    // Second pull of identical exports adds nothing.
    let summary = orchestrator.pull_once(false).await;
    assert_eq!(summary.ledger.added, 0);
    assert_eq!(summary.votes.added, 0);

    // The skipped transactions endpoint never hurt A's trust score.
    let trust = b_state.trust.read();
    let entry = trust.get(PEER_A).expect("entry");
    assert!(entry.score > 0);
    assert_eq!(entry.strikes, 0);
}

// ═══════════════════════════════════════════════════════════════════════════
// C. SIGNED EXCHANGE
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_signed_envelopes_verify_across_nodes_and_forgery_is_rejected() {
    // A signs with its configured key.
    let keypair_hex = agora_common::crypto::generate_keypair_hex();
    let keypair_bytes = hex::decode(&keypair_hex).expect("hex");
    let public_hex = hex::encode(&keypair_bytes[32..64]);

    let a = node("http://node-a.example.org", |cfg| {
        cfg.signing_key_hex = Some(keypair_hex.clone());
    });
    // B verifies inbound envelopes against A's public key.
    let b = node("http://node-b.example.org", move |cfg| {
        cfg.peer_public_key_hex = Some(public_hex);
    });
    seed_node_a(&a);

    let (_, Json(ledger_export)) = circle_ledger(State(a.clone())).await;
    let envelope: agora_federation::LedgerEnvelope =
        serde_json::from_value(ledger_export["envelope"].clone()).expect("envelope");
    assert!(envelope.signature.is_some());

    // Genuine envelope is accepted.
    let req = CircleGossipReq {
        envelope: Some(envelope.clone()),
        hashes: None,
        peer: None,
        status: None,
    };
    let (status, Json(body)) = circle_gossip(State(b.clone()), Json(req)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["added"], 2);

    // Forged entries under the old signature are rejected and do not
    // mutate B further.
    let mut forged = envelope;
    forged.entries.push("forged-hash".to_string());
    forged.ledger_hash = agora_federation::compute_ledger_hash(&forged.entries);
    let req = CircleGossipReq {
        envelope: Some(forged),
        hashes: None,
        peer: None,
        status: None,
    };
    let (status, Json(body)) = circle_gossip(State(b.clone()), Json(req)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "signature_invalid");
    assert_eq!(b.federation.ledger.read().len(), 2);
}

// ═══════════════════════════════════════════════════════════════════════════
// D. POLICY DIVERGENCE
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_policy_divergent_node_rejects_without_mutation() {
    let a = default_node("http://node-a.example.org");
    let b = node("http://node-b.example.org", |cfg| {
        cfg.policy_id = "community-fork".to_string();
    });
    seed_node_a(&a);

    let (_, Json(ledger_export)) = circle_ledger(State(a.clone())).await;
    let envelope = serde_json::from_value(ledger_export["envelope"].clone()).expect("envelope");
    let req = CircleGossipReq {
        envelope: Some(envelope),
        hashes: None,
        peer: None,
        status: None,
    };
    let (status, Json(body)) = circle_gossip(State(b.clone()), Json(req)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "policy_mismatch");
    assert!(b.federation.ledger.read().is_empty());

    let (_, Json(votes_export)) = votes_ledger(State(a)).await;
    let entries: Vec<VoteEnvelope> =
        serde_json::from_value(votes_export["entries"].clone()).expect("entries");
    let (status, _) = votes_gossip(State(b.clone()), Json(VotesGossipReq { entries })).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(b.federation.votes.read().is_empty());
}

// ═══════════════════════════════════════════════════════════════════════════
// E. PREVIEW PROPAGATION
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_preview_visible_only_where_allowed() {
    // Observer node accepts previews; strict node does not.
    let observer = node("http://node-obs.example.org", |cfg| {
        cfg.validation_level = "observe".to_string();
        cfg.allow_previews = true;
    });
    let strict = default_node("http://node-strict.example.org");

    let preview_vote = VoteEnvelope {
        issuer: "http://node-src.example.org".to_string(),
        policy: None,
        status: Some("preview".to_string()),
        petition_id: "petition-1".to_string(),
        author_hash: "author-1".to_string(),
        choice: "yes".to_string(),
        created_at: NOW,
        signature: None,
    };

    // Strict node: 202, nothing stored.
    let (status, Json(body)) = votes_gossip(
        State(strict.clone()),
        Json(VotesGossipReq {
            entries: vec![preview_vote.clone()],
        }),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["added"], 0);
    assert!(strict.federation.votes.read().is_empty());

    // Observer node: stored as preview...
    let (status, Json(body)) = votes_gossip(
        State(observer.clone()),
        Json(VotesGossipReq {
            entries: vec![preview_vote],
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["added"], 1);

    // ...and exported with preview status, which a third strict node
    // would in turn refuse to apply.
    let (_, Json(votes_export)) = votes_ledger(State(observer)).await;
    assert_eq!(votes_export["entries"][0]["status"], "preview");
    let entries: Vec<VoteEnvelope> =
        serde_json::from_value(votes_export["entries"].clone()).expect("entries");
    let (status, Json(body)) =
        votes_gossip(State(strict.clone()), Json(VotesGossipReq { entries })).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["added"], 0);
    assert!(strict.federation.votes.read().is_empty());
}
