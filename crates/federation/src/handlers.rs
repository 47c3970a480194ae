//! handlers.rs — HTTP surface of the federation subsystem (15C.9)
//!
//! # Endpoints
//!
//! | Endpoint | Method | Description |
//! |----------|--------|-------------|
//! | `/circle/gossip` | POST | Ingest a ledger envelope (or legacy hash list) |
//! | `/circle/ledger` | GET | Export local ledger + envelope |
//! | `/votes/gossip` | POST | Ingest a batch of vote envelopes |
//! | `/votes/ledger` | GET | Export visible votes as envelopes |
//! | `/transactions/gossip` | POST | Ingest a transactions-summary envelope |
//! | `/transactions/ledger` | GET | Export local transaction-log envelope |
//! | `/federation/status` | GET | Read-only observability snapshot |
//! | `/federation/push` | POST | Admin: run one push cycle now (forced) |
//! | `/federation/pull` | POST | Admin: run one pull cycle now (forced) |
//!
//! # Status Codes
//!
//! `200` applied; `202` accepted-but-not-applied (preview rejected by
//! local policy, or duplicate with no change); `400` malformed payload,
//! missing fields, invalid signature, or ledger-hash mismatch; `403`
//! module disabled, gossip disabled, or peer quarantined; `409` policy
//! id/version mismatch; `500` persistence failure.
//!
//! Error bodies: `{"error": "<code>", "detail": "..."}`.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::envelope::{
    compute_ledger_hash, LedgerEnvelope, TransactionsSummaryEnvelope, VoteEnvelope,
};
use crate::ingest::{ingest_ledger, ingest_transactions, ingest_votes, IngestError};
use crate::orchestrator::GossipOrchestrator;
use crate::peers::collect_gossip_peers;
use crate::state::{now_ms, FederationState};

// ════════════════════════════════════════════════════════════════════════════
// APP STATE
// ════════════════════════════════════════════════════════════════════════════

/// Shared application state for the HTTP layer.
pub struct AppState {
    pub federation: Arc<FederationState>,
    pub orchestrator: Arc<GossipOrchestrator>,
}

// ════════════════════════════════════════════════════════════════════════════
// REQUEST TYPES
// ════════════════════════════════════════════════════════════════════════════

/// POST /circle/gossip body: either a full envelope or the legacy
/// `{hashes, peer, status}` form.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircleGossipReq {
    #[serde(default)]
    pub envelope: Option<LedgerEnvelope>,
    #[serde(default)]
    pub hashes: Option<Vec<String>>,
    #[serde(default)]
    pub peer: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// POST /votes/gossip body.
#[derive(Debug, Deserialize)]
pub struct VotesGossipReq {
    #[serde(default)]
    pub entries: Vec<VoteEnvelope>,
}

/// POST /transactions/gossip body.
#[derive(Debug, Deserialize)]
pub struct TransactionsGossipReq {
    #[serde(default)]
    pub envelope: Option<TransactionsSummaryEnvelope>,
    #[serde(default)]
    pub peer: Option<String>,
}

// ════════════════════════════════════════════════════════════════════════════
// ERROR MAPPING
// ════════════════════════════════════════════════════════════════════════════

fn error_response(err: &IngestError) -> (StatusCode, Json<Value>) {
    let status = match err {
        IngestError::ModuleDisabled { .. }
        | IngestError::GossipDisabled
        | IngestError::PeerQuarantined { .. } => StatusCode::FORBIDDEN,
        IngestError::SignatureInvalid
        | IngestError::LedgerHashMismatch
        | IngestError::MissingFields { .. }
        | IngestError::Malformed { .. } => StatusCode::BAD_REQUEST,
        IngestError::PolicyIncompatible { .. } => StatusCode::CONFLICT,
        IngestError::Store { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(json!({ "error": err.code(), "detail": err.to_string() })),
    )
}

/// Gate shared by every gossip endpoint: federation on, gossip allowed
/// by the replication profile.
fn gossip_gate(state: &FederationState) -> Result<(), (StatusCode, Json<Value>)> {
    if !state.config.federation_enabled {
        return Err((
            StatusCode::FORBIDDEN,
            Json(json!({ "error": "federation_disabled" })),
        ));
    }
    if !state.profile.gossip_enabled() {
        return Err((
            StatusCode::FORBIDDEN,
            Json(json!({ "error": "gossip_disabled" })),
        ));
    }
    Ok(())
}

fn known_peer_count(state: &FederationState) -> usize {
    let learned = state.peers.read().clone();
    collect_gossip_peers(&state.config, &learned).len()
}

// ════════════════════════════════════════════════════════════════════════════
// CIRCLE (LEDGER) HANDLERS
// ════════════════════════════════════════════════════════════════════════════

pub async fn circle_gossip(
    State(app): State<Arc<AppState>>,
    Json(req): Json<CircleGossipReq>,
) -> (StatusCode, Json<Value>) {
    let state = &app.federation;
    if let Err(resp) = gossip_gate(state) {
        return resp;
    }

    let envelope = match (req.envelope, req.hashes) {
        (Some(env), _) => env,
        // Legacy form: treat as an unsigned envelope with no policy.
        (None, Some(hashes)) => LedgerEnvelope {
            issuer: req.peer.clone().unwrap_or_default(),
            policy: None,
            status: req.status.clone(),
            ledger_hash: compute_ledger_hash(&hashes),
            entries: hashes,
            signature: None,
        },
        (None, None) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "malformed", "detail": "envelope or hashes required" })),
            );
        }
    };

    match ingest_ledger(state, &envelope, req.peer.as_deref(), now_ms()) {
        Ok(outcome) => {
            let status = if outcome.applied && outcome.added > 0 {
                StatusCode::OK
            } else {
                StatusCode::ACCEPTED
            };
            let mut body = json!({
                "added": outcome.added,
                "total": outcome.total,
                "peers": known_peer_count(state),
                "ledgerHash": outcome.ledger_hash,
                "replication": state.profile,
            });
            if let Some(reason) = outcome.reason {
                body["detail"] = Value::String(reason);
            }
            (status, Json(body))
        }
        Err(err) => error_response(&err),
    }
}

pub async fn circle_ledger(State(app): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    let state = &app.federation;
    if let Err(resp) = gossip_gate(state) {
        return resp;
    }

    let entries = state.ledger_snapshot();
    let envelope = LedgerEnvelope::build(
        &state.config.issuer,
        state.policy.clone(),
        &entries,
        &state.keys,
    );
    (
        StatusCode::OK,
        Json(json!({
            "entries": entries,
            "ledgerHash": envelope.ledger_hash,
            "envelope": envelope,
            "replication": state.profile,
        })),
    )
}

// ════════════════════════════════════════════════════════════════════════════
// VOTES HANDLERS
// ════════════════════════════════════════════════════════════════════════════

pub async fn votes_gossip(
    State(app): State<Arc<AppState>>,
    Json(req): Json<VotesGossipReq>,
) -> (StatusCode, Json<Value>) {
    let state = &app.federation;
    if let Err(resp) = gossip_gate(state) {
        return resp;
    }

    match ingest_votes(state, &req.entries, now_ms()) {
        Ok(outcome) => {
            let status = if outcome.added > 0 {
                StatusCode::OK
            } else {
                StatusCode::ACCEPTED
            };
            (
                status,
                Json(json!({
                    "added": outcome.added,
                    "total": outcome.total,
                    "replication": state.profile,
                })),
            )
        }
        Err(err) => error_response(&err),
    }
}

pub async fn votes_ledger(State(app): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    let state = &app.federation;
    if let Err(resp) = gossip_gate(state) {
        return resp;
    }
    if !state.config.votes_enabled {
        return error_response(&IngestError::ModuleDisabled { module: "votes" });
    }

    let entries: Vec<VoteEnvelope> = state
        .visible_votes()
        .iter()
        .map(|v| {
            VoteEnvelope::build(
                &state.config.issuer,
                state.policy.clone(),
                v.validation_status.as_str(),
                &v.petition_id,
                &v.author_hash,
                &v.choice,
                v.created_at,
                &state.keys,
            )
        })
        .collect();

    (
        StatusCode::OK,
        Json(json!({ "entries": entries, "replication": state.profile })),
    )
}

// ════════════════════════════════════════════════════════════════════════════
// TRANSACTIONS HANDLERS
// ════════════════════════════════════════════════════════════════════════════

pub async fn transactions_gossip(
    State(app): State<Arc<AppState>>,
    Json(req): Json<TransactionsGossipReq>,
) -> (StatusCode, Json<Value>) {
    let state = &app.federation;
    if let Err(resp) = gossip_gate(state) {
        return resp;
    }

    let Some(envelope) = req.envelope else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "malformed", "detail": "envelope required" })),
        );
    };

    match ingest_transactions(state, &envelope, req.peer.as_deref(), now_ms()) {
        Ok(outcome) => {
            let status = if outcome.applied && (outcome.added + outcome.updated) > 0 {
                StatusCode::OK
            } else {
                StatusCode::ACCEPTED
            };
            let mut body = json!({
                "added": outcome.added,
                "updated": outcome.updated,
                "total": outcome.total,
                "summary": outcome.summary,
                "issuer": outcome.issuer,
                "replication": state.profile,
            });
            if let Some(reason) = outcome.reason {
                body["detail"] = Value::String(reason);
            }
            (status, Json(body))
        }
        Err(err) => error_response(&err),
    }
}

pub async fn transactions_ledger(State(app): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    let state = &app.federation;
    if let Err(resp) = gossip_gate(state) {
        return resp;
    }
    if !state.config.transactions_enabled {
        return error_response(&IngestError::ModuleDisabled {
            module: "transactions",
        });
    }

    let log = match state.store.load_transaction_log() {
        Ok(log) => log,
        Err(err) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "store_error", "detail": err.to_string() })),
            );
        }
    };
    let envelope = TransactionsSummaryEnvelope::build(
        &state.config.issuer,
        state.policy.clone(),
        &log,
        &state.keys,
    );
    (StatusCode::OK, Json(json!({ "envelope": envelope })))
}

// ════════════════════════════════════════════════════════════════════════════
// OBSERVABILITY & ADMIN
// ════════════════════════════════════════════════════════════════════════════

pub async fn federation_status(State(app): State<Arc<AppState>>) -> Json<Value> {
    let state = &app.federation;
    let learned = state.peers.read().clone();
    let peers = collect_gossip_peers(&state.config, &learned);
    Json(json!({
        "issuer": state.config.issuer,
        "replication": state.profile,
        "policy": state.policy,
        "peers": peers,
        "counts": {
            "ledger": state.ledger.read().len(),
            "votes": state.visible_votes().len(),
            "transactionSummaries": state.visible_summaries().len(),
        },
        "lastPush": state.last_push.read().clone(),
        "lastPull": state.last_pull.read().clone(),
        "peerResults": state.peer_results.read().clone(),
        "trust": state.trust.read().summarize(20, now_ms()),
    }))
}

/// Admin trigger: one forced push cycle, awaiting the same code path
/// the scheduler uses.
pub async fn federation_push(State(app): State<Arc<AppState>>) -> Json<Value> {
    let summary = app.orchestrator.push_once(true).await;
    Json(json!({ "summary": summary }))
}

/// Admin trigger: one forced pull cycle.
pub async fn federation_pull(State(app): State<Arc<AppState>>) -> Json<Value> {
    let summary = app.orchestrator.pull_once(true).await;
    Json(json!({ "summary": summary }))
}

// ════════════════════════════════════════════════════════════════════════════
// ROUTER
// ════════════════════════════════════════════════════════════════════════════

/// Build the axum router for the federation subsystem.
pub fn router(app: Arc<AppState>) -> Router {
    Router::new()
        .route("/circle/gossip", post(circle_gossip))
        .route("/circle/ledger", get(circle_ledger))
        .route("/votes/gossip", post(votes_gossip))
        .route("/votes/ledger", get(votes_ledger))
        .route("/transactions/gossip", post(transactions_gossip))
        .route("/transactions/ledger", get(transactions_ledger))
        .route("/federation/status", get(federation_status))
        .route("/federation/push", post(federation_push))
        .route("/federation/pull", post(federation_pull))
        .with_state(app)
}

// ════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{EnvelopeKeys, PolicyRef};
    use crate::state::MemoryStore;
    use crate::transport::{GossipTransport, MockTransport};
    use agora_common::NodeConfig;

    fn app_with(cfg: NodeConfig) -> Arc<AppState> {
        let federation =
            Arc::new(FederationState::new(cfg, Arc::new(MemoryStore::new())).expect("state"));
        let transport = Arc::new(MockTransport::new()) as Arc<dyn GossipTransport>;
        let orchestrator = Arc::new(GossipOrchestrator::new(Arc::clone(&federation), transport));
        Arc::new(AppState {
            federation,
            orchestrator,
        })
    }

    fn default_app() -> Arc<AppState> {
        app_with(NodeConfig::default())
    }

    fn local_policy() -> PolicyRef {
        PolicyRef {
            id: "agora-default".to_string(),
            version: "1".to_string(),
        }
    }

    fn ledger_envelope(entries: &[&str]) -> LedgerEnvelope {
        LedgerEnvelope::build(
            "http://peer-a.example.org",
            local_policy(),
            &entries.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
            &EnvelopeKeys::none(),
        )
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Circle Gossip Tests
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_circle_gossip_applies_then_202_on_repeat() {
        let app = default_app();
        let req = || CircleGossipReq {
            envelope: Some(ledger_envelope(&["h1"])),
            hashes: None,
            peer: None,
            status: None,
        };

        let (status, Json(body)) = circle_gossip(State(app.clone()), Json(req())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["added"], 1);
        assert_eq!(body["total"], 1);

        let (status, Json(body)) = circle_gossip(State(app), Json(req())).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["added"], 0);
    }

    #[tokio::test]
    async fn test_circle_gossip_legacy_hashes_form() {
        let app = default_app();
        let req = CircleGossipReq {
            envelope: None,
            hashes: Some(vec!["h1".to_string(), "h2".to_string()]),
            peer: Some("peer-b.example.org".to_string()),
            status: None,
        };
        let (status, Json(body)) = circle_gossip(State(app.clone()), Json(req)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["added"], 2);
        // Peer learned from the hint.
        assert!(app
            .federation
            .peers
            .read()
            .contains(&"http://peer-b.example.org".to_string()));
    }

    #[tokio::test]
    async fn test_circle_gossip_empty_body_is_400() {
        let app = default_app();
        let req = CircleGossipReq {
            envelope: None,
            hashes: None,
            peer: None,
            status: None,
        };
        let (status, Json(body)) = circle_gossip(State(app), Json(req)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "malformed");
    }

    #[tokio::test]
    async fn test_circle_gossip_policy_mismatch_is_409() {
        let app = default_app();
        let mut env = ledger_envelope(&["h1"]);
        env.policy = Some(PolicyRef {
            id: "other".to_string(),
            version: "1".to_string(),
        });
        env.signature = None;
        let req = CircleGossipReq {
            envelope: Some(env),
            hashes: None,
            peer: None,
            status: None,
        };
        let (status, Json(body)) = circle_gossip(State(app.clone()), Json(req)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "policy_mismatch");
        assert!(app.federation.ledger.read().is_empty());
    }

    #[tokio::test]
    async fn test_circle_gossip_hash_mismatch_is_400() {
        let app = default_app();
        let mut env = ledger_envelope(&["h1"]);
        env.entries.push("h2".to_string());
        let req = CircleGossipReq {
            envelope: Some(env),
            hashes: None,
            peer: None,
            status: None,
        };
        let (status, Json(body)) = circle_gossip(State(app), Json(req)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "ledger_hash_mismatch");
    }

    #[tokio::test]
    async fn test_gossip_gate_403_when_disabled() {
        let mut cfg = NodeConfig::default();
        cfg.federation_enabled = false;
        let app = app_with(cfg);
        let req = CircleGossipReq {
            envelope: Some(ledger_envelope(&["h1"])),
            hashes: None,
            peer: None,
            status: None,
        };
        let (status, Json(body)) = circle_gossip(State(app), Json(req)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "federation_disabled");

        let mut cfg = NodeConfig::default();
        cfg.replication_mode = "centralized".to_string();
        let app = app_with(cfg);
        let (status, Json(body)) = circle_ledger(State(app)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "gossip_disabled");
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Votes Handler Tests
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_votes_gossip_preview_rejected_is_202() {
        let app = default_app();
        let mut env = VoteEnvelope::build(
            "http://peer-a.example.org",
            local_policy(),
            "preview",
            "p1",
            "a1",
            "yes",
            1,
            &EnvelopeKeys::none(),
        );
        env.signature = None;
        let (status, Json(body)) =
            votes_gossip(State(app.clone()), Json(VotesGossipReq { entries: vec![env] })).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["added"], 0);
        assert!(app.federation.votes.read().is_empty());
    }

    #[tokio::test]
    async fn test_votes_ledger_exports_visible_envelopes() {
        let app = default_app();
        app.federation
            .record_local_vote("p1", "a1", "yes", 7)
            .expect("vote");

        let (status, Json(body)) = votes_ledger(State(app)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["entries"][0]["petitionId"], "p1");
        assert_eq!(body["entries"][0]["status"], "validated");
    }

    #[tokio::test]
    async fn test_votes_module_disabled_403() {
        let mut cfg = NodeConfig::default();
        cfg.votes_enabled = false;
        let app = app_with(cfg);
        let (status, _) = votes_ledger(State(app.clone())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let env = VoteEnvelope::build(
            "http://peer-a.example.org",
            local_policy(),
            "validated",
            "p1",
            "a1",
            "yes",
            1,
            &EnvelopeKeys::none(),
        );
        let (status, Json(body)) =
            votes_gossip(State(app), Json(VotesGossipReq { entries: vec![env] })).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "module_disabled");
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Transactions Handler Tests
    // ─────────────────────────────────────────────────────────────────────────

    fn tx_envelope() -> TransactionsSummaryEnvelope {
        let digest = crate::envelope::TransactionDigest {
            id: "t1".to_string(),
            kind: "petition.sign".to_string(),
            petition_id: "p1".to_string(),
            actor_hash: "a1".to_string(),
            digest: "d1".to_string(),
            created_at: 1,
        };
        TransactionsSummaryEnvelope::build(
            "http://peer-a.example.org",
            local_policy(),
            &[digest],
            &EnvelopeKeys::none(),
        )
    }

    #[tokio::test]
    async fn test_transactions_gossip_roundtrip() {
        let app = default_app();
        let req = TransactionsGossipReq {
            envelope: Some(tx_envelope()),
            peer: None,
        };
        let (status, Json(body)) = transactions_gossip(State(app.clone()), Json(req)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["added"], 1);
        assert_eq!(body["updated"], 0);

        // Same envelope again: replaced in place.
        let req = TransactionsGossipReq {
            envelope: Some(tx_envelope()),
            peer: None,
        };
        let (status, Json(body)) = transactions_gossip(State(app), Json(req)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["updated"], 1);
    }

    #[tokio::test]
    async fn test_transactions_gossip_missing_envelope_400() {
        let app = default_app();
        let req = TransactionsGossipReq {
            envelope: None,
            peer: None,
        };
        let (status, Json(body)) = transactions_gossip(State(app), Json(req)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "malformed");
    }

    #[tokio::test]
    async fn test_transactions_gossip_missing_policy_409() {
        let app = default_app();
        let mut env = tx_envelope();
        env.policy = None;
        env.signature = None;
        let req = TransactionsGossipReq {
            envelope: Some(env),
            peer: None,
        };
        let (status, Json(body)) = transactions_gossip(State(app), Json(req)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "policy_mismatch");
    }

    #[tokio::test]
    async fn test_transactions_ledger_exports_envelope() {
        let app = default_app();
        let (status, Json(body)) = transactions_ledger(State(app)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["envelope"].get("summary").is_some());
        assert_eq!(body["envelope"]["entryCount"], 0);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Status Endpoint Tests
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_federation_status_shape() {
        let app = default_app();
        app.federation
            .record_local_vote("p1", "a1", "yes", 7)
            .expect("vote");

        let Json(body) = federation_status(State(app)).await;
        assert_eq!(body["issuer"], "agora-node");
        assert_eq!(body["counts"]["votes"], 1);
        assert_eq!(body["replication"]["mode"], "hybrid");
        assert!(body["lastPush"].is_null());
        assert_eq!(body["trust"]["total"], 0);
    }
}
