//! # Federation State (15C.5)
//!
//! Provides [`FederationState`], the explicitly-owned application
//! context for the gossip subsystem, plus the record types it stores
//! and the [`FederationStore`] persistence contract.
//!
//! ## Ownership Model
//!
//! One `FederationState` is constructed at process start, wrapped in
//! `Arc`, and passed by reference into handlers, ingest pipelines, and
//! the orchestrator. There is no ambient/singleton access: every
//! mutation goes through this struct's locks.
//!
//! ## Shared Resource Discipline
//!
//! The peer-health map and the three record collections (ledger set,
//! votes list, transaction-summaries list) are mutated only by the
//! ingest pipelines and by the orchestrator's post-run trust update.
//! Handlers and exports take read locks only.
//!
//! ## Persistence
//!
//! The storage layer is an external collaborator exposed as
//! whole-collection `load*`/`save*` calls with no transactional
//! semantics. Saves are invoked only after an in-memory mutation
//! actually changed something; save errors propagate to the caller as
//! hard errors (losing a confirmed in-memory mutation is worse than
//! failing loudly).

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use agora_common::NodeConfig;

use crate::envelope::{EnvelopeKeys, PolicyRef, TransactionDigest};
use crate::orchestrator::{GossipRunSummary, PeerResult};
use crate::policy::{
    stamp_local_entry, filter_visible_entries, Provenance, Replicated, ReplicationProfile,
    ValidationStatus,
};
use crate::trust::PeerTrustStore;

/// Cap on the ingested transaction-summaries collection (most recent kept).
pub const SUMMARY_CAP: usize = 200;
/// Cap on the retained per-peer gossip results list.
pub const PEER_RESULTS_CAP: usize = 50;

/// Milliseconds since the Unix epoch; 0 if the system clock is broken
/// (does not panic).
#[inline]
#[must_use]
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ════════════════════════════════════════════════════════════════════════════════
// RECORD TYPES
// ════════════════════════════════════════════════════════════════════════════════

/// A vote in the local store, keyed by `(petition_id, author_hash)`.
///
/// Exactly one record exists per key. Replacement on key match is
/// unconditional (last writer wins); records are never hard-deleted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRecord {
    pub petition_id: String,
    pub author_hash: String,
    pub choice: String,
    pub created_at: u64,
    pub validation_status: ValidationStatus,
    pub issuer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validated_at: Option<u64>,
}

impl Replicated for VoteRecord {
    fn validation_status(&self) -> ValidationStatus {
        self.validation_status
    }
}

/// An ingested transaction-log summary, keyed by `(issuer, summary)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionSummaryRecord {
    pub issuer: String,
    pub summary: String,
    pub entry_count: u64,
    pub entries: Vec<TransactionDigest>,
    pub validation_status: ValidationStatus,
    pub received_at: u64,
}

impl Replicated for TransactionSummaryRecord {
    fn validation_status(&self) -> ValidationStatus {
        self.validation_status
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// STORE CONTRACT
// ════════════════════════════════════════════════════════════════════════════════

/// Error type for persistence failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError {
    /// Description of the failure.
    pub reason: String,
}

impl StoreError {
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        StoreError {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "store error: {}", self.reason)
    }
}

impl std::error::Error for StoreError {}

/// Persistence contract for the gossip subsystem.
///
/// Whole-collection load/save pairs; the implementation decides where
/// the bytes go. `load_transaction_log` is read-only here — the node's
/// own transaction digests are produced by business logic outside this
/// subsystem.
pub trait FederationStore: Send + Sync {
    fn load_ledger(&self) -> Result<Vec<String>, StoreError>;
    fn save_ledger(&self, entries: &[String]) -> Result<(), StoreError>;

    fn load_peers(&self) -> Result<Vec<String>, StoreError>;
    fn save_peers(&self, peers: &[String]) -> Result<(), StoreError>;

    fn load_votes(&self) -> Result<Vec<VoteRecord>, StoreError>;
    fn save_votes(&self, votes: &[VoteRecord]) -> Result<(), StoreError>;

    fn load_transaction_summaries(&self) -> Result<Vec<TransactionSummaryRecord>, StoreError>;
    fn save_transaction_summaries(
        &self,
        summaries: &[TransactionSummaryRecord],
    ) -> Result<(), StoreError>;

    fn load_peer_health(&self) -> Result<HashMap<String, crate::trust::PeerHealthRecord>, StoreError>;
    fn save_peer_health(
        &self,
        health: &HashMap<String, crate::trust::PeerHealthRecord>,
    ) -> Result<(), StoreError>;

    fn load_transaction_log(&self) -> Result<Vec<TransactionDigest>, StoreError>;
}

// ════════════════════════════════════════════════════════════════════════════════
// MEMORY STORE
// ════════════════════════════════════════════════════════════════════════════════

/// In-memory [`FederationStore`]. Used by tests and by nodes running
/// with the `memory` adapter.
///
/// `set_fail_saves(true)` makes every save call fail, for testing the
/// propagation of persistence errors.
#[derive(Default)]
pub struct MemoryStore {
    ledger: RwLock<Vec<String>>,
    peers: RwLock<Vec<String>>,
    votes: RwLock<Vec<VoteRecord>>,
    summaries: RwLock<Vec<TransactionSummaryRecord>>,
    health: RwLock<HashMap<String, crate::trust::PeerHealthRecord>>,
    transaction_log: RwLock<Vec<TransactionDigest>>,
    fail_saves: AtomicBool,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle save-failure injection.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    /// Seed the node-local transaction log (stands in for the
    /// out-of-scope business logic that produces it).
    pub fn seed_transaction_log(&self, log: Vec<TransactionDigest>) {
        *self.transaction_log.write() = log;
    }

    fn check_fail(&self) -> Result<(), StoreError> {
        if self.fail_saves.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(StoreError::new("injected save failure"));
        }
        Ok(())
    }
}

impl FederationStore for MemoryStore {
    fn load_ledger(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.ledger.read().clone())
    }

    fn save_ledger(&self, entries: &[String]) -> Result<(), StoreError> {
        self.check_fail()?;
        *self.ledger.write() = entries.to_vec();
        Ok(())
    }

    fn load_peers(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.peers.read().clone())
    }

    fn save_peers(&self, peers: &[String]) -> Result<(), StoreError> {
        self.check_fail()?;
        *self.peers.write() = peers.to_vec();
        Ok(())
    }

    fn load_votes(&self) -> Result<Vec<VoteRecord>, StoreError> {
        Ok(self.votes.read().clone())
    }

    fn save_votes(&self, votes: &[VoteRecord]) -> Result<(), StoreError> {
        self.check_fail()?;
        *self.votes.write() = votes.to_vec();
        Ok(())
    }

    fn load_transaction_summaries(&self) -> Result<Vec<TransactionSummaryRecord>, StoreError> {
        Ok(self.summaries.read().clone())
    }

    fn save_transaction_summaries(
        &self,
        summaries: &[TransactionSummaryRecord],
    ) -> Result<(), StoreError> {
        self.check_fail()?;
        *self.summaries.write() = summaries.to_vec();
        Ok(())
    }

    fn load_peer_health(
        &self,
    ) -> Result<HashMap<String, crate::trust::PeerHealthRecord>, StoreError> {
        Ok(self.health.read().clone())
    }

    fn save_peer_health(
        &self,
        health: &HashMap<String, crate::trust::PeerHealthRecord>,
    ) -> Result<(), StoreError> {
        self.check_fail()?;
        *self.health.write() = health.clone();
        Ok(())
    }

    fn load_transaction_log(&self) -> Result<Vec<TransactionDigest>, StoreError> {
        Ok(self.transaction_log.read().clone())
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// FEDERATION STATE
// ════════════════════════════════════════════════════════════════════════════════

/// The gossip subsystem's application context.
pub struct FederationState {
    /// Node configuration (read-only after construction).
    pub config: NodeConfig,
    /// Effective replication profile, immutable per gossip run.
    pub profile: ReplicationProfile,
    /// Local policy identity embedded in envelopes.
    pub policy: PolicyRef,
    /// Optional signing/verifying capability.
    pub keys: EnvelopeKeys,
    /// External persistence collaborator.
    pub store: Arc<dyn FederationStore>,

    /// Uniqueness-ledger hash set (additive union).
    pub ledger: RwLock<BTreeSet<String>>,
    /// Learned peers (normalized URLs), beyond the configured set.
    pub peers: RwLock<Vec<String>>,
    /// Vote records, unique per `(petition_id, author_hash)`.
    pub votes: RwLock<Vec<VoteRecord>>,
    /// Ingested transaction summaries, capped to [`SUMMARY_CAP`].
    pub summaries: RwLock<Vec<TransactionSummaryRecord>>,
    /// Peer reputation store.
    pub trust: RwLock<PeerTrustStore>,

    /// Re-entrancy guards for the two gossip directions. Advisory:
    /// a forced run bypasses them.
    pub push_running: AtomicBool,
    pub pull_running: AtomicBool,

    /// Last run summaries and bounded per-peer results, retained for
    /// observability.
    pub last_push: RwLock<Option<GossipRunSummary>>,
    pub last_pull: RwLock<Option<GossipRunSummary>>,
    pub peer_results: RwLock<Vec<PeerResult>>,
}

impl FederationState {
    /// Construct state from configuration and a store, hydrating all
    /// collections from persisted data.
    ///
    /// Invalid configured key material and store load failures are
    /// hard errors: a node must not silently start without the state
    /// it was configured to have.
    pub fn new(config: NodeConfig, store: Arc<dyn FederationStore>) -> agora_common::Result<Self> {
        let profile = ReplicationProfile::from_config(&config);
        let policy = PolicyRef::from_config(&config);
        let keys = EnvelopeKeys::from_config(&config)?;

        let ledger: BTreeSet<String> = store.load_ledger()?.into_iter().collect();
        let peers = store.load_peers()?;
        let votes = store.load_votes()?;
        let summaries = store.load_transaction_summaries()?;
        let trust = PeerTrustStore::from_map(store.load_peer_health()?);

        Ok(FederationState {
            config,
            profile,
            policy,
            keys,
            store,
            ledger: RwLock::new(ledger),
            peers: RwLock::new(peers),
            votes: RwLock::new(votes),
            summaries: RwLock::new(summaries),
            trust: RwLock::new(trust),
            push_running: AtomicBool::new(false),
            pull_running: AtomicBool::new(false),
            last_push: RwLock::new(None),
            last_pull: RwLock::new(None),
            peer_results: RwLock::new(Vec::new()),
        })
    }

    /// Ledger snapshot in canonical (sorted) order.
    #[must_use]
    pub fn ledger_snapshot(&self) -> Vec<String> {
        self.ledger.read().iter().cloned().collect()
    }

    /// Votes visible under the local profile (previews stripped when
    /// disallowed). Every read path uses this, not the raw collection.
    #[must_use]
    pub fn visible_votes(&self) -> Vec<VoteRecord> {
        filter_visible_entries(&self.votes.read(), &self.profile)
    }

    /// Transaction summaries visible under the local profile.
    #[must_use]
    pub fn visible_summaries(&self) -> Vec<TransactionSummaryRecord> {
        filter_visible_entries(&self.summaries.read(), &self.profile)
    }

    /// Record a locally-authored vote: stamp it validated with local
    /// provenance, upsert by key, persist.
    ///
    /// This is the entry point the (out-of-scope) petition logic calls
    /// when a user casts a vote; it makes locally-authored records
    /// structurally identical to peer-ingested ones.
    pub fn record_local_vote(
        &self,
        petition_id: &str,
        author_hash: &str,
        choice: &str,
        now_ms: u64,
    ) -> Result<VoteRecord, StoreError> {
        let stamp = stamp_local_entry(&self.profile, &self.config.issuer, now_ms);
        let record = VoteRecord {
            petition_id: petition_id.to_string(),
            author_hash: author_hash.to_string(),
            choice: choice.to_string(),
            created_at: now_ms,
            validation_status: stamp.validation_status,
            issuer: stamp.issuer,
            provenance: Some(stamp.provenance),
            validated_at: Some(stamp.validated_at),
        };

        {
            let mut votes = self.votes.write();
            if let Some(existing) = votes
                .iter_mut()
                .find(|v| v.petition_id == petition_id && v.author_hash == author_hash)
            {
                *existing = record.clone();
            } else {
                votes.push(record.clone());
            }
            self.store.save_votes(&votes)?;
        }
        Ok(record)
    }

    /// Append hashes to the local ledger (local authoring path).
    /// Persists only when the set actually grew.
    pub fn record_local_ledger_entries(&self, hashes: &[String]) -> Result<usize, StoreError> {
        let mut ledger = self.ledger.write();
        let before = ledger.len();
        for h in hashes {
            ledger.insert(h.clone());
        }
        let added = ledger.len() - before;
        if added > 0 {
            let snapshot: Vec<String> = ledger.iter().cloned().collect();
            self.store.save_ledger(&snapshot)?;
        }
        Ok(added)
    }

    /// Append a per-peer gossip result, keeping the list bounded.
    pub fn push_peer_result(&self, result: PeerResult) {
        let mut results = self.peer_results.write();
        results.push(result);
        let len = results.len();
        if len > PEER_RESULTS_CAP {
            results.drain(0..len - PEER_RESULTS_CAP);
        }
    }

    /// Persist the current peer-health map.
    pub fn persist_trust(&self) -> Result<(), StoreError> {
        let trust = self.trust.read();
        self.store.save_peer_health(trust.as_map())
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════════
