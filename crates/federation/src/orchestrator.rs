//! Gossip Orchestrator (15C.8)
//!
//! Module ini menjalankan push dan pull cycles terhadap semua peer yang
//! dikenal dan tidak sedang quarantine, meng-agregasi outcome per peer
//! per payload menjadi run summaries, meng-update peer trust dari
//! outcomes, dan berjalan di atas timer.
//!
//! # State Machine (per direction)
//!
//! ```text
//! idle → running → (peers resolved) → per-peer calls → aggregate → idle
//! ```
//!
//! Skip conditions yang short-circuit ke summary "skipped" tanpa
//! menghubungi peer manapun: direction sudah running (kecuali forced),
//! federation disabled, gossip dimatikan replication profile, atau
//! tidak ada peer eligible.
//!
//! # Concurrency
//!
//! - Push fan-out concurrent per peer (JoinSet)
//! - Pull sequential by design: hasil pull di-apply ke shared state
//!   lewat ingest pipelines yang tidak dirancang untuk mutasi
//!   concurrent atas koleksi yang sama
//! - `running` flags adalah advisory guard terhadap re-entrant
//!   scheduling, bukan lock penuh; forced run (admin) boleh bypass
//!
//! # Skip vs Fail
//!
//! `404/405/410/501`, atau `403` yang body error-nya menunjukkan
//! module/gossip disabled, diklasifikasikan **skipped**: peer sekadar
//! tidak menjalankan fitur itu, trust TIDAK disentuh. Failure asli
//! (non-2xx lain, timeout, network error) masuk counter failed dan
//! menurunkan trust.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::envelope::{LedgerEnvelope, TransactionsSummaryEnvelope, VoteEnvelope};
use crate::ingest::{ingest_ledger, ingest_transactions, ingest_votes, IngestError};
use crate::peers::collect_gossip_peers;
use crate::state::{now_ms, FederationState};
use crate::transport::{GossipEndpoint, GossipTransport, TransportReply};
use crate::trust::PENALTY_GENERIC;

/// Initial scheduler tick delay setelah startup.
const INITIAL_TICK_DELAY: Duration = Duration::from_secs(2);

// ════════════════════════════════════════════════════════════════════════════════
// RUN SUMMARY TYPES
// ════════════════════════════════════════════════════════════════════════════════

/// Counter per payload type dalam satu run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadCounters {
    /// Jumlah attempt yang dikirim/di-fetch.
    pub sent: usize,
    /// Attempt yang sukses (2xx atau ingest sukses).
    pub ok: usize,
    /// Attempt yang gagal (transport/HTTP/payload failure).
    pub failed: usize,
    /// Attempt yang di-skip (peer tidak menjalankan fitur).
    pub skipped: usize,
    /// Total record yang ditambah.
    pub added: usize,
    /// Total record yang diganti.
    pub updated: usize,
}

/// Satu error per peer per scope dalam run summary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerScopeError {
    pub peer: String,
    pub scope: String,
    pub error: String,
}

/// Summary satu push cycle atau satu pull cycle.
///
/// `ok == true` berarti run berjalan sampai selesai (termasuk run yang
/// di-skip); per-peer failure tetap terlihat di counters dan `errors`.
/// `ok == false` hanya untuk run yang putus karena persistence failure.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GossipRunSummary {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub started_at: u64,
    pub finished_at: u64,
    /// Jumlah peer eligible yang dihubungi.
    pub peers: usize,
    pub ledger: PayloadCounters,
    pub votes: PayloadCounters,
    pub transactions: PayloadCounters,
    pub errors: Vec<PeerScopeError>,
}

impl GossipRunSummary {
    /// Summary kosong untuk run yang baru mulai.
    #[must_use]
    pub fn begin(at: u64) -> Self {
        GossipRunSummary {
            ok: true,
            reason: None,
            started_at: at,
            finished_at: at,
            peers: 0,
            ledger: PayloadCounters::default(),
            votes: PayloadCounters::default(),
            transactions: PayloadCounters::default(),
            errors: Vec::new(),
        }
    }

    /// Summary untuk run yang di-skip tanpa menghubungi peer.
    #[must_use]
    pub fn skipped(reason: &str, at: u64) -> Self {
        let mut summary = Self::begin(at);
        summary.reason = Some(reason.to_string());
        summary
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// PER-PEER RESULT
// ════════════════════════════════════════════════════════════════════════════════

/// Status satu payload terhadap satu peer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadStatus {
    /// False jika payload tidak dicoba (module off / tidak ada data).
    pub attempted: bool,
    pub ok: bool,
    pub skipped: bool,
    pub failed: bool,
    pub added: usize,
    pub updated: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// True jika failure ini harus dihitung dalam post-run trust
    /// update. Payload-validation failure di pull path sudah dihukum
    /// oleh ingest pipeline, jadi tidak dihitung dua kali.
    #[serde(skip)]
    pub counts_for_trust: bool,
}

impl PayloadStatus {
    fn ok_with(added: usize, updated: usize) -> Self {
        PayloadStatus {
            attempted: true,
            ok: true,
            added,
            updated,
            ..Default::default()
        }
    }

    fn skipped_with(reason: &str) -> Self {
        PayloadStatus {
            attempted: true,
            skipped: true,
            error: Some(reason.to_string()),
            ..Default::default()
        }
    }

    fn failed_with(error: String, counts_for_trust: bool) -> Self {
        PayloadStatus {
            attempted: true,
            failed: true,
            error: Some(error),
            counts_for_trust,
            ..Default::default()
        }
    }
}

/// Hasil kontak satu peer dalam satu direction.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerResult {
    pub peer: String,
    /// "push" atau "pull".
    pub direction: String,
    pub at: u64,
    pub ledger: PayloadStatus,
    pub votes: PayloadStatus,
    pub transactions: PayloadStatus,
}

impl PeerResult {
    /// Result kosong (belum ada payload yang dicoba).
    #[must_use]
    pub fn empty(peer: &str) -> Self {
        PeerResult {
            peer: peer.to_string(),
            ..Default::default()
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// REPLY CLASSIFICATION
// ════════════════════════════════════════════════════════════════════════════════

/// Klasifikasi satu HTTP reply / transport error.
enum Classified {
    /// 2xx: payload diterima (atau soft-rejected, tetap sukses).
    Ok(TransportReply),
    /// Peer tidak menjalankan fitur ini.
    Skipped(String),
    /// Failure asli.
    Failed(String),
}

/// Status codes yang berarti "endpoint tidak ada di peer".
fn is_absent_status(status: u16) -> bool {
    matches!(status, 404 | 405 | 410 | 501)
}

/// 403 dengan body yang menunjukkan module/gossip disabled adalah skip,
/// bukan failure.
fn is_disabled_forbidden(reply: &TransportReply) -> bool {
    if reply.status != 403 {
        return false;
    }
    match reply.body.get("error").and_then(Value::as_str) {
        Some(code) => code.contains("disabled"),
        None => false,
    }
}

fn classify(result: Result<TransportReply, crate::transport::TransportError>) -> Classified {
    match result {
        Err(err) => Classified::Failed(err.to_string()),
        Ok(reply) if reply.is_success() => Classified::Ok(reply),
        Ok(reply) if is_absent_status(reply.status) => {
            Classified::Skipped(format!("http_{}", reply.status))
        }
        Ok(reply) if is_disabled_forbidden(&reply) => {
            let code = reply
                .body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("disabled");
            Classified::Skipped(code.to_string())
        }
        Ok(reply) => Classified::Failed(format!("http_{}", reply.status)),
    }
}

fn counter_of(body: &Value, key: &str) -> usize {
    body.get(key).and_then(Value::as_u64).unwrap_or(0) as usize
}

// ════════════════════════════════════════════════════════════════════════════════
// SCHEDULER ERROR
// ════════════════════════════════════════════════════════════════════════════════

/// Error type untuk scheduler start failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerError {
    pub reason: String,
}

impl std::fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "scheduler error: {}", self.reason)
    }
}

impl std::error::Error for SchedulerError {}

// ════════════════════════════════════════════════════════════════════════════════
// ORCHESTRATOR
// ════════════════════════════════════════════════════════════════════════════════

/// Penggerak push/pull gossip cycles.
pub struct GossipOrchestrator {
    state: Arc<FederationState>,
    transport: Arc<dyn GossipTransport>,
    scheduler_running: AtomicBool,
    shutdown: Notify,
}

impl GossipOrchestrator {
    #[must_use]
    pub fn new(state: Arc<FederationState>, transport: Arc<dyn GossipTransport>) -> Self {
        GossipOrchestrator {
            state,
            transport,
            scheduler_running: AtomicBool::new(false),
            shutdown: Notify::new(),
        }
    }

    /// Reference ke federation state (untuk handlers/tests).
    #[must_use]
    pub fn state(&self) -> &Arc<FederationState> {
        &self.state
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Eligibility
    // ─────────────────────────────────────────────────────────────────────────

    /// Skip check bersama kedua direction. Return daftar peer eligible
    /// atau reason untuk skip.
    fn eligible_peers(&self, now: u64) -> Result<Vec<String>, &'static str> {
        if !self.state.config.federation_enabled {
            return Err("federation_disabled");
        }
        if !self.state.profile.gossip_enabled() {
            return Err("gossip_disabled");
        }
        let learned = self.state.peers.read().clone();
        let all = collect_gossip_peers(&self.state.config, &learned);
        let mut trust = self.state.trust.write();
        let eligible: Vec<String> = all
            .into_iter()
            .filter(|peer| !trust.is_quarantined(peer, now))
            .collect();
        if eligible.is_empty() {
            return Err("no_peers");
        }
        Ok(eligible)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Push
    // ─────────────────────────────────────────────────────────────────────────

    /// Jalankan satu push cycle. `force` bypass guard `running`
    /// (dipakai admin-triggered runs).
    pub async fn push_once(&self, force: bool) -> GossipRunSummary {
        let started = now_ms();
        if self.state.push_running.swap(true, Ordering::SeqCst) && !force {
            // Flag milik run yang masih in-flight; jangan disentuh.
            let summary = GossipRunSummary::skipped("already_running", started);
            *self.state.last_push.write() = Some(summary.clone());
            return summary;
        }

        let peers = match self.eligible_peers(started) {
            Ok(peers) => peers,
            Err(reason) => {
                return self.finish_push(GossipRunSummary::skipped(reason, started));
            }
        };

        // Assemble payloads sekali untuk semua peer.
        let ledger_env = LedgerEnvelope::build(
            &self.state.config.issuer,
            self.state.policy.clone(),
            &self.state.ledger_snapshot(),
            &self.state.keys,
        );
        let ledger_body = json!({ "envelope": to_value_or_null(&ledger_env) });

        let votes_body = if self.state.config.votes_enabled {
            let visible = self.state.visible_votes();
            if visible.is_empty() {
                None
            } else {
                let entries: Vec<Value> = visible
                    .iter()
                    .map(|v| {
                        to_value_or_null(&VoteEnvelope::build(
                            &self.state.config.issuer,
                            self.state.policy.clone(),
                            v.validation_status.as_str(),
                            &v.petition_id,
                            &v.author_hash,
                            &v.choice,
                            v.created_at,
                            &self.state.keys,
                        ))
                    })
                    .collect();
                Some(json!({ "entries": entries }))
            }
        } else {
            None
        };

        let mut summary = GossipRunSummary::begin(started);
        summary.peers = peers.len();

        let transactions_body = if self.state.config.transactions_enabled {
            match self.state.store.load_transaction_log() {
                Ok(log) if log.is_empty() => None,
                Ok(log) => {
                    let env = TransactionsSummaryEnvelope::build(
                        &self.state.config.issuer,
                        self.state.policy.clone(),
                        &log,
                        &self.state.keys,
                    );
                    Some(json!({ "envelope": to_value_or_null(&env) }))
                }
                Err(err) => {
                    summary.ok = false;
                    summary.reason = Some(format!("store_error: {}", err));
                    summary.finished_at = now_ms();
                    return self.finish_push(summary);
                }
            }
        } else {
            None
        };

        // Fan out concurrent per peer.
        let mut tasks: JoinSet<PeerResult> = JoinSet::new();
        for peer in &peers {
            let peer = peer.clone();
            let transport = Arc::clone(&self.transport);
            let ledger_body = ledger_body.clone();
            let votes_body = votes_body.clone();
            let transactions_body = transactions_body.clone();
            tasks.spawn(async move {
                push_one_peer(
                    transport.as_ref(),
                    &peer,
                    ledger_body,
                    votes_body,
                    transactions_body,
                )
                .await
            });
        }

        let mut results = Vec::with_capacity(peers.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(err) => warn!(error = %err, "push peer task panicked"),
            }
        }

        self.aggregate(&mut summary, &results);
        self.update_trust(&results);
        summary.finished_at = now_ms();
        info!(
            peers = summary.peers,
            ledger_ok = summary.ledger.ok,
            votes_ok = summary.votes.ok,
            failed = summary.ledger.failed + summary.votes.failed + summary.transactions.failed,
            "gossip push cycle finished"
        );
        for result in results {
            self.state.push_peer_result(result);
        }
        self.finish_push(summary)
    }

    fn finish_push(&self, summary: GossipRunSummary) -> GossipRunSummary {
        self.state.push_running.store(false, Ordering::SeqCst);
        *self.state.last_push.write() = Some(summary.clone());
        summary
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Pull
    // ─────────────────────────────────────────────────────────────────────────

    /// Jalankan satu pull cycle. Peer diproses sequential: hasil fetch
    /// di-apply ke shared state lewat ingest pipelines.
    pub async fn pull_once(&self, force: bool) -> GossipRunSummary {
        let started = now_ms();
        if self.state.pull_running.swap(true, Ordering::SeqCst) && !force {
            // Flag milik run yang masih in-flight; jangan disentuh.
            let summary = GossipRunSummary::skipped("already_running", started);
            *self.state.last_pull.write() = Some(summary.clone());
            return summary;
        }

        let peers = match self.eligible_peers(started) {
            Ok(peers) => peers,
            Err(reason) => {
                return self.finish_pull(GossipRunSummary::skipped(reason, started));
            }
        };

        let mut summary = GossipRunSummary::begin(started);
        summary.peers = peers.len();

        let mut results = Vec::with_capacity(peers.len());
        'peers: for peer in &peers {
            let mut result = PeerResult::empty(peer);
            result.direction = "pull".to_string();
            result.at = now_ms();

            result.ledger = self.pull_ledger(peer).await;
            if is_store_failure(&result.ledger) {
                summary.ok = false;
                summary.reason = Some("store_error".to_string());
                results.push(result);
                break 'peers;
            }

            if self.state.config.votes_enabled {
                result.votes = self.pull_votes(peer).await;
                if is_store_failure(&result.votes) {
                    summary.ok = false;
                    summary.reason = Some("store_error".to_string());
                    results.push(result);
                    break 'peers;
                }
            }

            if self.state.config.transactions_enabled {
                result.transactions = self.pull_transactions(peer).await;
                if is_store_failure(&result.transactions) {
                    summary.ok = false;
                    summary.reason = Some("store_error".to_string());
                    results.push(result);
                    break 'peers;
                }
            }

            results.push(result);
        }

        self.aggregate(&mut summary, &results);
        self.update_trust(&results);
        summary.finished_at = now_ms();
        info!(
            peers = summary.peers,
            ledger_added = summary.ledger.added,
            votes_added = summary.votes.added,
            transactions_added = summary.transactions.added,
            "gossip pull cycle finished"
        );
        for result in results {
            self.state.push_peer_result(result);
        }
        self.finish_pull(summary)
    }

    fn finish_pull(&self, summary: GossipRunSummary) -> GossipRunSummary {
        self.state.pull_running.store(false, Ordering::SeqCst);
        *self.state.last_pull.write() = Some(summary.clone());
        summary
    }

    async fn pull_ledger(&self, peer: &str) -> PayloadStatus {
        let reply = self
            .transport
            .get_json(peer, GossipEndpoint::CircleLedger)
            .await;
        let reply = match classify(reply) {
            Classified::Ok(reply) => reply,
            Classified::Skipped(reason) => return PayloadStatus::skipped_with(&reason),
            Classified::Failed(error) => return PayloadStatus::failed_with(error, true),
        };

        let envelope = match reply.body.get("envelope") {
            Some(raw) if !raw.is_null() => {
                match serde_json::from_value::<LedgerEnvelope>(raw.clone()) {
                    Ok(env) => env,
                    Err(err) => {
                        return PayloadStatus::failed_with(format!("malformed: {}", err), true)
                    }
                }
            }
            // Export tanpa envelope: bentuk unsigned envelope dari entries.
            _ => match reply.body.get("entries").and_then(Value::as_array) {
                Some(entries) => {
                    let entries: Vec<String> = entries
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect();
                    LedgerEnvelope {
                        issuer: peer.to_string(),
                        policy: None,
                        status: None,
                        ledger_hash: crate::envelope::compute_ledger_hash(&entries),
                        entries,
                        signature: None,
                    }
                }
                None => {
                    return PayloadStatus::failed_with("malformed: no envelope".to_string(), true)
                }
            },
        };

        match ingest_ledger(&self.state, &envelope, Some(peer), now_ms()) {
            Ok(outcome) => PayloadStatus::ok_with(outcome.added, 0),
            Err(err) => ingest_failure_status(err),
        }
    }

    async fn pull_votes(&self, peer: &str) -> PayloadStatus {
        let reply = self
            .transport
            .get_json(peer, GossipEndpoint::VotesLedger)
            .await;
        let reply = match classify(reply) {
            Classified::Ok(reply) => reply,
            Classified::Skipped(reason) => return PayloadStatus::skipped_with(&reason),
            Classified::Failed(error) => return PayloadStatus::failed_with(error, true),
        };

        let entries = match reply.body.get("entries") {
            Some(raw) => match serde_json::from_value::<Vec<VoteEnvelope>>(raw.clone()) {
                Ok(entries) => entries,
                Err(err) => {
                    return PayloadStatus::failed_with(format!("malformed: {}", err), true)
                }
            },
            None => return PayloadStatus::failed_with("malformed: no entries".to_string(), true),
        };
        if entries.is_empty() {
            return PayloadStatus::ok_with(0, 0);
        }

        match ingest_votes(&self.state, &entries, now_ms()) {
            Ok(outcome) => PayloadStatus::ok_with(outcome.added, 0),
            Err(err) => ingest_failure_status(err),
        }
    }

    async fn pull_transactions(&self, peer: &str) -> PayloadStatus {
        let reply = self
            .transport
            .get_json(peer, GossipEndpoint::TransactionsLedger)
            .await;
        let reply = match classify(reply) {
            Classified::Ok(reply) => reply,
            Classified::Skipped(reason) => return PayloadStatus::skipped_with(&reason),
            Classified::Failed(error) => return PayloadStatus::failed_with(error, true),
        };

        let envelope = match reply.body.get("envelope") {
            Some(raw) if !raw.is_null() => {
                match serde_json::from_value::<TransactionsSummaryEnvelope>(raw.clone()) {
                    Ok(env) => env,
                    Err(err) => {
                        return PayloadStatus::failed_with(format!("malformed: {}", err), true)
                    }
                }
            }
            _ => return PayloadStatus::failed_with("malformed: no envelope".to_string(), true),
        };

        match ingest_transactions(&self.state, &envelope, Some(peer), now_ms()) {
            Ok(outcome) if outcome.applied => PayloadStatus::ok_with(outcome.added, outcome.updated),
            Ok(_) => PayloadStatus::ok_with(0, 0),
            Err(err) => ingest_failure_status(err),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Aggregation & Trust
    // ─────────────────────────────────────────────────────────────────────────

    fn aggregate(&self, summary: &mut GossipRunSummary, results: &[PeerResult]) {
        for result in results {
            for (scope, status) in [
                ("ledger", &result.ledger),
                ("votes", &result.votes),
                ("transactions", &result.transactions),
            ] {
                let counters = match scope {
                    "ledger" => &mut summary.ledger,
                    "votes" => &mut summary.votes,
                    _ => &mut summary.transactions,
                };
                if !status.attempted {
                    continue;
                }
                counters.sent += 1;
                counters.added += status.added;
                counters.updated += status.updated;
                if status.ok {
                    counters.ok += 1;
                } else if status.skipped {
                    counters.skipped += 1;
                } else if status.failed {
                    counters.failed += 1;
                    if let Some(error) = &status.error {
                        summary.errors.push(PeerScopeError {
                            peer: result.peer.clone(),
                            scope: scope.to_string(),
                            error: error.clone(),
                        });
                    }
                }
            }
        }
    }

    /// Update trust sekali per peer atas klasifikasi gabungan ketiga
    /// payload. Reason failure mengikuti precedence
    /// ledger > votes > transactions. Skip tidak menyentuh trust.
    fn update_trust(&self, results: &[PeerResult]) {
        let now = now_ms();
        let mut trust = self.state.trust.write();
        let mut changed = false;

        for result in results {
            let scopes = [
                ("ledger", &result.ledger),
                ("votes", &result.votes),
                ("transactions", &result.transactions),
            ];

            let failure = scopes
                .iter()
                .find(|(_, s)| s.failed && s.counts_for_trust)
                .map(|(scope, s)| {
                    format!(
                        "{}: {}",
                        scope,
                        s.error.as_deref().unwrap_or("failed")
                    )
                });

            if let Some(reason) = failure {
                trust.record_failure(&result.peer, &reason, PENALTY_GENERIC, now);
                changed = true;
            } else if scopes.iter().any(|(_, s)| s.ok) {
                trust.record_success(&result.peer, now);
                changed = true;
            }
            // Semua skipped / tidak dicoba: trust tidak berubah.
        }
        drop(trust);

        if changed {
            if let Err(err) = self.state.persist_trust() {
                warn!(error = %err, "failed to persist peer health");
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Cycle & Scheduler
    // ─────────────────────────────────────────────────────────────────────────

    /// Satu push-then-pull cycle (jalur yang sama dipakai scheduler dan
    /// admin-triggered runs).
    pub async fn run_cycle(&self, force: bool) -> (GossipRunSummary, GossipRunSummary) {
        let push = self.push_once(force).await;
        let pull = self.pull_once(force).await;
        (push, pull)
    }

    /// Start periodic scheduler: initial tick dalam 2 detik, lalu satu
    /// cycle per interval. Tick di-skip jika salah satu direction masih
    /// running.
    pub fn start_scheduler(self: &Arc<Self>) -> Result<(), SchedulerError> {
        if self.scheduler_running.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError {
                reason: "scheduler already running".to_string(),
            });
        }

        let orchestrator = Arc::clone(self);
        let interval_secs = self.state.config.gossip_interval_secs.max(1);
        tokio::spawn(async move {
            // Initial tick segera setelah startup, bukan menunggu satu
            // interval penuh.
            tokio::select! {
                _ = tokio::time::sleep(INITIAL_TICK_DELAY) => {
                    orchestrator.tick().await;
                }
                _ = orchestrator.shutdown.notified() => {
                    orchestrator.scheduler_running.store(false, Ordering::SeqCst);
                    return;
                }
            }

            let mut ticker = interval(Duration::from_secs(interval_secs));
            // Tick pertama interval() selesai langsung; sudah ter-cover
            // oleh initial tick di atas.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        orchestrator.tick().await;
                    }
                    _ = orchestrator.shutdown.notified() => {
                        break;
                    }
                }
            }
            orchestrator.scheduler_running.store(false, Ordering::SeqCst);
        });

        Ok(())
    }

    /// Signal scheduler untuk berhenti. Return langsung; pakai
    /// [`Self::is_scheduler_running`] untuk memantau.
    pub fn stop_scheduler(&self) {
        if self.scheduler_running.load(Ordering::SeqCst) {
            self.shutdown.notify_one();
        }
    }

    #[must_use]
    pub fn is_scheduler_running(&self) -> bool {
        self.scheduler_running.load(Ordering::SeqCst)
    }

    async fn tick(&self) {
        if self.state.push_running.load(Ordering::SeqCst)
            || self.state.pull_running.load(Ordering::SeqCst)
        {
            debug!("gossip tick skipped: previous run still in flight");
            return;
        }
        let _ = self.run_cycle(false).await;
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// HELPERS
// ════════════════════════════════════════════════════════════════════════════════

fn to_value_or_null<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Push semua payload ke satu peer (sequential per payload; fan-out
/// terjadi di level peer).
async fn push_one_peer(
    transport: &dyn GossipTransport,
    peer: &str,
    ledger_body: Value,
    votes_body: Option<Value>,
    transactions_body: Option<Value>,
) -> PeerResult {
    let mut result = PeerResult::empty(peer);
    result.direction = "push".to_string();
    result.at = now_ms();

    result.ledger = push_payload(transport, peer, GossipEndpoint::CircleGossip, ledger_body).await;
    if let Some(body) = votes_body {
        result.votes = push_payload(transport, peer, GossipEndpoint::VotesGossip, body).await;
    }
    if let Some(body) = transactions_body {
        result.transactions =
            push_payload(transport, peer, GossipEndpoint::TransactionsGossip, body).await;
    }
    result
}

async fn push_payload(
    transport: &dyn GossipTransport,
    peer: &str,
    endpoint: GossipEndpoint,
    body: Value,
) -> PayloadStatus {
    let reply = transport.post_json(peer, endpoint, body).await;
    match classify(reply) {
        Classified::Ok(reply) => PayloadStatus::ok_with(
            counter_of(&reply.body, "added"),
            counter_of(&reply.body, "updated"),
        ),
        Classified::Skipped(reason) => PayloadStatus::skipped_with(&reason),
        Classified::Failed(error) => PayloadStatus::failed_with(error, true),
    }
}

/// Status untuk ingest failure di pull path. Trust atas pelanggaran
/// signature/policy sudah dicatat pipeline; store failure ditandai
/// supaya run berhenti keras.
fn ingest_failure_status(err: IngestError) -> PayloadStatus {
    let is_store = matches!(err, IngestError::Store { .. });
    let mut status = PayloadStatus::failed_with(err.code().to_string(), false);
    if is_store {
        status.error = Some(format!("store_error: {}", err));
    }
    status
}

fn is_store_failure(status: &PayloadStatus) -> bool {
    status
        .error
        .as_deref()
        .is_some_and(|e| e.starts_with("store_error"))
}

// ════════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════════
