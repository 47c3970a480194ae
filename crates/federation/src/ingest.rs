//! Ingest Pipelines (15C.6)
//!
//! Module ini menyediakan merge pipeline per record type. Pipelines ini
//! adalah SATU-SATUNYA pintu masuk payload → state mutation, dipakai
//! baik oleh inbound HTTP gossip calls maupun oleh pull phase
//! orchestrator.
//!
//! # Invariants
//!
//! - Satu logical item di-apply maksimal sekali (idempotent merge)
//! - Policy mismatch TIDAK PERNAH memutasi collections (validate dulu,
//!   apply belakangan)
//! - Persistence dipanggil hanya setelah in-memory mutation benar-benar
//!   mengubah sesuatu
//! - Store failure propagate sebagai hard error
//! - Soft rejection (preview tidak diizinkan, duplicate tanpa
//!   perubahan) BUKAN error: outcome sukses dengan `applied == false`
//!
//! # Trust Side Effects
//!
//! Pelanggaran signature/policy dicatat sebagai trust penalty (2) jika
//! peer key bisa di-resolve; pipeline transactions juga mencatat
//! success. Soft rejection tidak pernah menyentuh trust.

use std::fmt;

use serde::Serialize;
use tracing::{debug, warn};

use crate::envelope::{
    validate_policy_compatibility, LedgerEnvelope, PolicyCompatError, TransactionsSummaryEnvelope,
    VoteEnvelope, TX_ENTRY_CAP,
};
use crate::peers::normalize_peer_url;
use crate::policy::{decide_status, ValidationStatus};
use crate::state::{FederationState, StoreError, TransactionSummaryRecord, VoteRecord, SUMMARY_CAP};
use crate::trust::{PeerTrustStore, PENALTY_VIOLATION};

// ════════════════════════════════════════════════════════════════════════════════
// INGEST ERROR
// ════════════════════════════════════════════════════════════════════════════════

/// Error type untuk ingest failures, membawa klasifikasi wire-nya.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestError {
    /// Module yang dituju tidak aktif di node ini.
    ModuleDisabled {
        /// Nama module ("votes", "transactions", "federation").
        module: &'static str,
    },

    /// Gossip dimatikan oleh replication profile.
    GossipDisabled,

    /// Peer sedang quarantine; payload ditolak sebelum diproses.
    PeerQuarantined {
        /// Peer key yang di-quarantine.
        peer: String,
    },

    /// Signature ada, verifying key ada, dan verifikasi gagal.
    SignatureInvalid,

    /// Claimed ledger hash tidak cocok dengan claimed entries.
    LedgerHashMismatch,

    /// Field wajib kosong atau absen.
    MissingFields {
        /// Deskripsi field yang hilang.
        detail: String,
    },

    /// Payload tidak bisa dibentuk menjadi request yang valid.
    Malformed {
        /// Deskripsi masalah.
        detail: String,
    },

    /// Policy id/version tidak kompatibel (atau absen saat wajib).
    PolicyIncompatible {
        /// Inner compatibility error.
        error: PolicyCompatError,
    },

    /// Persistence gagal setelah in-memory mutation.
    Store {
        /// Inner store error.
        error: StoreError,
    },
}

impl IngestError {
    /// Kode error pendek untuk wire body.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            IngestError::ModuleDisabled { .. } => "module_disabled",
            IngestError::GossipDisabled => "gossip_disabled",
            IngestError::PeerQuarantined { .. } => "peer_quarantined",
            IngestError::SignatureInvalid => "signature_invalid",
            IngestError::LedgerHashMismatch => "ledger_hash_mismatch",
            IngestError::MissingFields { .. } => "missing_fields",
            IngestError::Malformed { .. } => "malformed",
            IngestError::PolicyIncompatible { .. } => "policy_mismatch",
            IngestError::Store { .. } => "store_error",
        }
    }
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestError::ModuleDisabled { module } => {
                write!(f, "module disabled: {}", module)
            }
            IngestError::GossipDisabled => {
                write!(f, "gossip disabled by replication profile")
            }
            IngestError::PeerQuarantined { peer } => {
                write!(f, "peer quarantined: {}", peer)
            }
            IngestError::SignatureInvalid => {
                write!(f, "envelope signature verification failed")
            }
            IngestError::LedgerHashMismatch => {
                write!(f, "claimed ledger hash does not match entries")
            }
            IngestError::MissingFields { detail } => {
                write!(f, "missing fields: {}", detail)
            }
            IngestError::Malformed { detail } => {
                write!(f, "malformed payload: {}", detail)
            }
            IngestError::PolicyIncompatible { error } => {
                write!(f, "policy incompatible: {}", error)
            }
            IngestError::Store { error } => {
                write!(f, "{}", error)
            }
        }
    }
}

impl std::error::Error for IngestError {}

impl From<StoreError> for IngestError {
    fn from(error: StoreError) -> Self {
        IngestError::Store { error }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// OUTCOME TYPES
// ════════════════════════════════════════════════════════════════════════════════

/// Hasil ledger ingest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerIngestOutcome {
    /// Jumlah hash baru yang masuk set.
    pub added: usize,
    /// Ukuran ledger set setelah merge.
    pub total: usize,
    /// Hash ledger lokal setelah merge.
    pub ledger_hash: String,
    /// True jika payload benar-benar di-apply (bukan soft rejection).
    pub applied: bool,
    /// Reason untuk soft rejection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Hasil votes ingest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VotesIngestOutcome {
    /// Jumlah vote yang ditambah atau diganti.
    pub added: usize,
    /// Ukuran koleksi votes setelah merge.
    pub total: usize,
}

/// Hasil transactions ingest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionsIngestOutcome {
    /// 1 jika summary baru ditambahkan.
    pub added: usize,
    /// 1 jika summary dengan key sama diganti.
    pub updated: usize,
    /// Ukuran koleksi summaries setelah merge.
    pub total: usize,
    /// Summary digest yang diproses.
    pub summary: String,
    /// Issuer envelope.
    pub issuer: String,
    /// True jika payload benar-benar di-apply.
    pub applied: bool,
    /// Reason untuk soft rejection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// ════════════════════════════════════════════════════════════════════════════════
// LEDGER INGEST
// ════════════════════════════════════════════════════════════════════════════════

/// Apply satu inbound ledger envelope ke state lokal.
///
/// Urutan: verify signature → policy compatibility (absen = permissive)
/// → hash integrity → policy decision atas hinted status (soft) →
/// set union → learn peer → persist jika berubah.
pub fn ingest_ledger(
    state: &FederationState,
    envelope: &LedgerEnvelope,
    peer_hint: Option<&str>,
    now_ms: u64,
) -> Result<LedgerIngestOutcome, IngestError> {
    let peer_key = PeerTrustStore::resolve_peer_key(peer_hint, Some(&envelope.issuer));

    let outcome = envelope.verify(&state.keys);
    if !outcome.valid {
        penalize(state, peer_key.as_deref(), "signature_invalid", now_ms);
        return Err(IngestError::SignatureInvalid);
    }

    if let Err(error) =
        validate_policy_compatibility(&state.policy, envelope.policy.as_ref(), false)
    {
        penalize(state, peer_key.as_deref(), "policy_mismatch", now_ms);
        return Err(IngestError::PolicyIncompatible { error });
    }

    if !envelope.hash_matches() {
        penalize(state, peer_key.as_deref(), "ledger_hash_mismatch", now_ms);
        return Err(IngestError::LedgerHashMismatch);
    }

    let decision = decide_status(&state.profile, envelope.status.as_deref());
    if decision.status == ValidationStatus::Rejected {
        let snapshot = state.ledger_snapshot();
        return Ok(LedgerIngestOutcome {
            added: 0,
            total: snapshot.len(),
            ledger_hash: crate::envelope::compute_ledger_hash(&snapshot),
            applied: false,
            reason: decision.reason,
        });
    }

    let (added, total, snapshot) = {
        let mut ledger = state.ledger.write();
        let before = ledger.len();
        for h in &envelope.entries {
            ledger.insert(h.clone());
        }
        let added = ledger.len() - before;
        let snapshot: Vec<String> = ledger.iter().cloned().collect();
        (added, ledger.len(), snapshot)
    };

    if added > 0 {
        state.store.save_ledger(&snapshot)?;
    }

    learn_peer(state, peer_hint, &envelope.issuer)?;

    debug!(added, total, issuer = %envelope.issuer, "ledger gossip merged");

    Ok(LedgerIngestOutcome {
        added,
        total,
        ledger_hash: crate::envelope::compute_ledger_hash(&snapshot),
        applied: true,
        reason: None,
    })
}

// ════════════════════════════════════════════════════════════════════════════════
// VOTES INGEST
// ════════════════════════════════════════════════════════════════════════════════

/// Apply satu batch vote envelopes ke state lokal.
///
/// Dua pass: validasi policy atas SEMUA entries dulu (mismatch manapun
/// menolak seluruh request tanpa mutasi), baru apply. Per entry:
/// signature skip-tolerant (verified-invalid → entry dibuang), policy
/// decision (rejected → dibuang), field wajib, upsert by
/// `(petition_id, author_hash)`.
///
/// Replacement on key match sengaja unconditional — last writer wins,
/// tanpa tie-break `created_at`. Peer yang resend selalu menang atas
/// value lokal sebelumnya.
pub fn ingest_votes(
    state: &FederationState,
    entries: &[VoteEnvelope],
    now_ms: u64,
) -> Result<VotesIngestOutcome, IngestError> {
    if !state.config.votes_enabled {
        return Err(IngestError::ModuleDisabled { module: "votes" });
    }
    if entries.is_empty() {
        return Err(IngestError::Malformed {
            detail: "entries required".to_string(),
        });
    }

    // Pass 1: policy compatibility. Mismatch menolak seluruh batch
    // sebelum mutasi apapun.
    for env in entries {
        if let Err(error) = validate_policy_compatibility(&state.policy, env.policy.as_ref(), false)
        {
            let peer_key = PeerTrustStore::resolve_peer_key(None, Some(&env.issuer));
            penalize(state, peer_key.as_deref(), "policy_mismatch", now_ms);
            return Err(IngestError::PolicyIncompatible { error });
        }
    }

    // Pass 2: apply entry per entry.
    let mut added = 0usize;
    let mut changed = false;
    {
        let mut votes = state.votes.write();
        for env in entries {
            let outcome = env.verify(&state.keys);
            if !outcome.valid {
                let peer_key = PeerTrustStore::resolve_peer_key(None, Some(&env.issuer));
                penalize(state, peer_key.as_deref(), "signature_invalid", now_ms);
                warn!(issuer = %env.issuer, "vote envelope failed signature verification");
                continue;
            }

            let decision = decide_status(&state.profile, env.status.as_deref());
            if decision.status == ValidationStatus::Rejected {
                debug!(issuer = %env.issuer, "vote dropped by policy");
                continue;
            }

            if env.petition_id.trim().is_empty() || env.author_hash.trim().is_empty() {
                debug!(issuer = %env.issuer, "vote missing petitionId/authorHash");
                continue;
            }

            let record = VoteRecord {
                petition_id: env.petition_id.clone(),
                author_hash: env.author_hash.clone(),
                choice: env.choice.clone(),
                created_at: env.created_at,
                validation_status: decision.status,
                issuer: env.issuer.clone(),
                provenance: None,
                validated_at: Some(now_ms),
            };

            if let Some(existing) = votes
                .iter_mut()
                .find(|v| v.petition_id == env.petition_id && v.author_hash == env.author_hash)
            {
                if *existing != record {
                    *existing = record;
                    added += 1;
                    changed = true;
                }
            } else {
                votes.push(record);
                added += 1;
                changed = true;
            }
        }

        if changed {
            state.store.save_votes(&votes)?;
        }
    }

    Ok(VotesIngestOutcome {
        added,
        total: state.votes.read().len(),
    })
}

// ════════════════════════════════════════════════════════════════════════════════
// TRANSACTIONS INGEST
// ════════════════════════════════════════════════════════════════════════════════

/// Apply satu inbound transactions-summary envelope ke state lokal.
///
/// Urutan ketat: quarantine gate → signature (hard) → policy
/// compatibility (kehadiran policy WAJIB di sini) → policy decision
/// (soft) → field wajib → cap entries → upsert by `(issuer, summary)`
/// → cap koleksi → trust success.
pub fn ingest_transactions(
    state: &FederationState,
    envelope: &TransactionsSummaryEnvelope,
    peer_hint: Option<&str>,
    now_ms: u64,
) -> Result<TransactionsIngestOutcome, IngestError> {
    if !state.config.transactions_enabled {
        return Err(IngestError::ModuleDisabled {
            module: "transactions",
        });
    }

    let peer_key = PeerTrustStore::resolve_peer_key(peer_hint, Some(&envelope.issuer));

    // Quarantine gate sebelum kerja lain apapun.
    if let Some(key) = peer_key.as_deref() {
        if state.trust.write().is_quarantined(key, now_ms) {
            return Err(IngestError::PeerQuarantined {
                peer: key.to_string(),
            });
        }
    }

    let outcome = envelope.verify(&state.keys);
    if !outcome.valid {
        penalize(state, peer_key.as_deref(), "signature_invalid", now_ms);
        return Err(IngestError::SignatureInvalid);
    }

    if let Err(error) = validate_policy_compatibility(&state.policy, envelope.policy.as_ref(), true)
    {
        penalize(state, peer_key.as_deref(), "policy_mismatch", now_ms);
        return Err(IngestError::PolicyIncompatible { error });
    }

    let decision = decide_status(&state.profile, envelope.status.as_deref());
    if decision.status == ValidationStatus::Rejected {
        return Ok(TransactionsIngestOutcome {
            added: 0,
            updated: 0,
            total: state.summaries.read().len(),
            summary: envelope.summary.clone(),
            issuer: envelope.issuer.clone(),
            applied: false,
            reason: decision.reason,
        });
    }

    if envelope.summary.trim().is_empty() || envelope.issuer.trim().is_empty() {
        return Err(IngestError::MissingFields {
            detail: "summary and issuer are required".to_string(),
        });
    }

    let mut entries: Vec<_> = envelope.entries.iter().take(TX_ENTRY_CAP).cloned().collect();
    entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

    let record = TransactionSummaryRecord {
        issuer: envelope.issuer.clone(),
        summary: envelope.summary.clone(),
        entry_count: envelope.entry_count,
        entries,
        validation_status: decision.status,
        received_at: now_ms,
    };

    let (added, updated, total) = {
        let mut summaries = state.summaries.write();
        let mut added = 0usize;
        let mut updated = 0usize;
        if let Some(existing) = summaries
            .iter_mut()
            .find(|s| s.issuer == record.issuer && s.summary == record.summary)
        {
            *existing = record;
            updated = 1;
        } else {
            summaries.push(record);
            added = 1;
        }

        // Koleksi dibatasi SUMMARY_CAP entry terbaru.
        if summaries.len() > SUMMARY_CAP {
            summaries.sort_by(|a, b| a.received_at.cmp(&b.received_at));
            let excess = summaries.len() - SUMMARY_CAP;
            summaries.drain(0..excess);
        }

        state.store.save_transaction_summaries(&summaries)?;
        (added, updated, summaries.len())
    };

    if let Some(key) = peer_key.as_deref() {
        state.trust.write().record_success(key, now_ms);
    }

    debug!(added, updated, issuer = %envelope.issuer, "transactions summary merged");

    Ok(TransactionsIngestOutcome {
        added,
        updated,
        total,
        summary: envelope.summary.clone(),
        issuer: envelope.issuer.clone(),
        applied: true,
        reason: None,
    })
}

// ════════════════════════════════════════════════════════════════════════════════
// HELPERS
// ════════════════════════════════════════════════════════════════════════════════

/// Catat trust penalty untuk pelanggaran signature/policy.
fn penalize(state: &FederationState, peer_key: Option<&str>, reason: &str, now_ms: u64) {
    if let Some(key) = peer_key {
        state
            .trust
            .write()
            .record_failure(key, reason, PENALTY_VIOLATION, now_ms);
    }
}

/// Learn peer baru dari gossip: jika hint/issuer menghasilkan URL yang
/// usable dan belum dikenal, tambahkan ke learned peers dan persist.
fn learn_peer(
    state: &FederationState,
    peer_hint: Option<&str>,
    issuer: &str,
) -> Result<(), IngestError> {
    let url = peer_hint
        .and_then(normalize_peer_url)
        .or_else(|| normalize_peer_url(issuer));
    let Some(url) = url else {
        return Ok(());
    };

    let own = state
        .config
        .public_url
        .as_deref()
        .and_then(normalize_peer_url);
    if Some(&url) == own.as_ref() {
        return Ok(());
    }

    let configured = state
        .config
        .peers
        .iter()
        .filter_map(|p| normalize_peer_url(p))
        .any(|p| p == url);
    if configured {
        return Ok(());
    }

    let mut peers = state.peers.write();
    if !peers.contains(&url) {
        peers.push(url);
        state.store.save_peers(&peers)?;
    }
    Ok(())
}

// ════════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════════
