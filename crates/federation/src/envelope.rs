//! Envelope Codec (15C.4)
//!
//! Module ini membangun outbound envelopes, memverifikasi inbound
//! envelopes, dan memeriksa policy compatibility.
//!
//! # Types
//!
//! | Type | Fungsi |
//! |------|--------|
//! | `PolicyRef` | Identitas policy (id + version) yang di-embed di envelope |
//! | `EnvelopeKeys` | Capability object: signing/verifying keys yang opsional |
//! | `VerifyOutcome` | Hasil verifikasi: valid + skipped |
//! | `LedgerEnvelope` | Envelope untuk uniqueness-ledger hashes |
//! | `VoteEnvelope` | Envelope untuk satu vote |
//! | `TransactionsSummaryEnvelope` | Envelope untuk transaction-log summary |
//!
//! # Signing Model
//!
//! Signing bersifat **opportunistic, bukan mandatory**: envelope
//! ditandatangani hanya jika signing key dikonfigurasi, dan diverifikasi
//! hanya jika signature DAN verifying key sama-sama ada. Selain itu
//! hasilnya `{valid: true, skipped: true}` — peers tidak wajib berbagi
//! key material.
//!
//! # Canonical Bytes
//!
//! Signing input adalah serialisasi JSON envelope dengan field
//! `signature` absen. Urutan field mengikuti deklarasi struct, jadi
//! reproducible; wire schema sendiri tidak bergantung pada urutan.
//!
//! # Wire Format
//!
//! Semua field camelCase (wire format dibagi dengan peers non-Rust).

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};

use agora_common::crypto::{sign_detached_b64, verify_detached_b64};
use agora_common::NodeConfig;
use ed25519_dalek::{SigningKey, VerifyingKey};

/// Maksimum per-entry digests dalam satu transactions-summary envelope.
pub const TX_ENTRY_CAP: usize = 120;

// ════════════════════════════════════════════════════════════════════════════════
// POLICY REF
// ════════════════════════════════════════════════════════════════════════════════

/// Identitas policy yang di-embed di setiap envelope untuk
/// compatibility checking.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRef {
    pub id: String,
    pub version: String,
}

impl PolicyRef {
    /// Policy identity lokal dari node configuration.
    #[must_use]
    pub fn from_config(config: &NodeConfig) -> Self {
        PolicyRef {
            id: config.policy_id.clone(),
            version: config.policy_version.clone(),
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// POLICY COMPATIBILITY
// ════════════════════════════════════════════════════════════════════════════════

/// Error type untuk policy compatibility failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyCompatError {
    /// Envelope tidak membawa policy padahal wajib (transaction
    /// summaries).
    MissingPolicy,

    /// Policy id berbeda.
    IdMismatch {
        /// Policy id lokal.
        local: String,
        /// Policy id dari envelope.
        envelope: String,
    },

    /// Policy version berbeda.
    VersionMismatch {
        /// Policy version lokal.
        local: String,
        /// Policy version dari envelope.
        envelope: String,
    },
}

impl fmt::Display for PolicyCompatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyCompatError::MissingPolicy => {
                write!(f, "envelope carries no policy")
            }
            PolicyCompatError::IdMismatch { local, envelope } => {
                write!(f, "policy id mismatch: local {}, envelope {}", local, envelope)
            }
            PolicyCompatError::VersionMismatch { local, envelope } => {
                write!(
                    f,
                    "policy version mismatch: local {}, envelope {}",
                    local, envelope
                )
            }
        }
    }
}

impl std::error::Error for PolicyCompatError {}

/// Periksa policy compatibility antara policy lokal dan policy envelope.
///
/// # Behavior
///
/// - Policy ada: id DAN version harus sama persis
/// - Policy absen + `require_presence == false`: kompatibel (permissive
///   default untuk ledger/vote envelopes)
/// - Policy absen + `require_presence == true`: hard failure
///   (transaction summaries meng-agregasi banyak record sekaligus,
///   jadi lebih ketat)
pub fn validate_policy_compatibility(
    local: &PolicyRef,
    envelope: Option<&PolicyRef>,
    require_presence: bool,
) -> Result<(), PolicyCompatError> {
    let Some(remote) = envelope else {
        if require_presence {
            return Err(PolicyCompatError::MissingPolicy);
        }
        return Ok(());
    };
    if remote.id != local.id {
        return Err(PolicyCompatError::IdMismatch {
            local: local.id.clone(),
            envelope: remote.id.clone(),
        });
    }
    if remote.version != local.version {
        return Err(PolicyCompatError::VersionMismatch {
            local: local.version.clone(),
            envelope: remote.version.clone(),
        });
    }
    Ok(())
}

// ════════════════════════════════════════════════════════════════════════════════
// ENVELOPE KEYS
// ════════════════════════════════════════════════════════════════════════════════

/// Hasil verifikasi envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VerifyOutcome {
    /// Signature valid (atau verifikasi di-skip).
    pub valid: bool,
    /// True jika verifikasi tidak dijalankan (tidak ada signature atau
    /// tidak ada verifying key).
    pub skipped: bool,
}

/// Capability object untuk optional signing.
///
/// Kehadiran key menentukan behavior — bukan conditional branch yang
/// tersebar di call sites. Node tanpa signing key mengirim envelope
/// unsigned (tetap valid); node tanpa verifying key menerima semua
/// signature sebagai "skipped".
pub struct EnvelopeKeys {
    signing: Option<SigningKey>,
    verifying: Option<VerifyingKey>,
}

impl EnvelopeKeys {
    /// Keys tanpa capability apapun (sign dan verify sama-sama pass-through).
    #[must_use]
    pub fn none() -> Self {
        EnvelopeKeys {
            signing: None,
            verifying: None,
        }
    }

    /// Build dari key material di node configuration.
    ///
    /// Key yang dikonfigurasi tapi tidak valid adalah hard error —
    /// node dengan typo di key material tidak boleh diam-diam berjalan
    /// unsigned.
    pub fn from_config(config: &NodeConfig) -> Result<Self, agora_common::crypto::CryptoError> {
        let signing = match config.signing_key_hex.as_deref() {
            Some(hex) => Some(agora_common::crypto::signing_key_from_hex(hex)?),
            None => None,
        };
        let verifying = match config.peer_public_key_hex.as_deref() {
            Some(hex) => Some(agora_common::crypto::verifying_key_from_hex(hex)?),
            None => None,
        };
        Ok(EnvelopeKeys { signing, verifying })
    }

    /// Build langsung dari key objects (testing / embedding).
    #[must_use]
    pub fn from_keys(signing: Option<SigningKey>, verifying: Option<VerifyingKey>) -> Self {
        EnvelopeKeys { signing, verifying }
    }

    #[must_use]
    pub fn can_sign(&self) -> bool {
        self.signing.is_some()
    }

    #[must_use]
    pub fn can_verify(&self) -> bool {
        self.verifying.is_some()
    }

    /// Sign canonical bytes; `None` jika tidak ada signing key.
    fn sign_bytes(&self, bytes: &[u8]) -> Option<String> {
        self.signing.as_ref().map(|sk| sign_detached_b64(sk, bytes))
    }

    /// Verify signature atas canonical bytes.
    fn verify_bytes(&self, bytes: &[u8], signature: Option<&str>) -> VerifyOutcome {
        match (self.verifying.as_ref(), signature) {
            (Some(vk), Some(sig)) => {
                let valid = verify_detached_b64(vk, bytes, sig).unwrap_or(false);
                VerifyOutcome {
                    valid,
                    skipped: false,
                }
            }
            _ => VerifyOutcome {
                valid: true,
                skipped: true,
            },
        }
    }
}

/// Canonical JSON bytes untuk signing. Serialisasi Vec<String>/struct
/// ke JSON tidak bisa gagal; fallback empty hanya defensive terhadap
/// map-key edge cases yang tidak ada di schema ini.
fn canonical_bytes<T: Serialize>(payload: &T) -> Vec<u8> {
    serde_json::to_vec(payload).unwrap_or_default()
}

// ════════════════════════════════════════════════════════════════════════════════
// LEDGER DIGEST
// ════════════════════════════════════════════════════════════════════════════════

/// Sort + dedup entries ledger (canonical order).
#[must_use]
pub fn sorted_ledger_entries(entries: &[String]) -> Vec<String> {
    let set: BTreeSet<&str> = entries.iter().map(String::as_str).collect();
    set.into_iter().map(str::to_string).collect()
}

/// Deterministic digest atas ledger entry set.
///
/// Entries di-dedup dan di-sort dulu, lalu array JSON-nya di-hash
/// dengan Sha3-256 (hex). Invariant terhadap urutan input dan
/// duplikat — dipakai untuk stamp outgoing envelopes dan untuk
/// memverifikasi claimed hash pada inbound envelopes.
#[must_use]
pub fn compute_ledger_hash(entries: &[String]) -> String {
    let sorted = sorted_ledger_entries(entries);
    let canonical = canonical_bytes(&sorted);
    hex::encode(Sha3_256::digest(&canonical))
}

// ════════════════════════════════════════════════════════════════════════════════
// LEDGER ENVELOPE
// ════════════════════════════════════════════════════════════════════════════════

/// Envelope untuk uniqueness-ledger hashes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEnvelope {
    pub issuer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<PolicyRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub entries: Vec<String>,
    pub ledger_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl LedgerEnvelope {
    /// Assemble + sign envelope atas ledger set lokal.
    #[must_use]
    pub fn build(issuer: &str, policy: PolicyRef, entries: &[String], keys: &EnvelopeKeys) -> Self {
        let entries = sorted_ledger_entries(entries);
        let ledger_hash = compute_ledger_hash(&entries);
        let mut env = LedgerEnvelope {
            issuer: issuer.to_string(),
            policy: Some(policy),
            status: Some("validated".to_string()),
            entries,
            ledger_hash,
            signature: None,
        };
        env.signature = keys.sign_bytes(&canonical_bytes(&env));
        env
    }

    /// Verifikasi signature (opportunistic).
    #[must_use]
    pub fn verify(&self, keys: &EnvelopeKeys) -> VerifyOutcome {
        let mut unsigned = self.clone();
        unsigned.signature = None;
        keys.verify_bytes(&canonical_bytes(&unsigned), self.signature.as_deref())
    }

    /// True jika claimed ledger hash cocok dengan claimed entries.
    #[must_use]
    pub fn hash_matches(&self) -> bool {
        compute_ledger_hash(&self.entries) == self.ledger_hash
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// VOTE ENVELOPE
// ════════════════════════════════════════════════════════════════════════════════

/// Envelope untuk satu vote.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteEnvelope {
    pub issuer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<PolicyRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub petition_id: String,
    pub author_hash: String,
    pub choice: String,
    pub created_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl VoteEnvelope {
    /// Assemble + sign envelope untuk satu vote record.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn build(
        issuer: &str,
        policy: PolicyRef,
        status: &str,
        petition_id: &str,
        author_hash: &str,
        choice: &str,
        created_at: u64,
        keys: &EnvelopeKeys,
    ) -> Self {
        let mut env = VoteEnvelope {
            issuer: issuer.to_string(),
            policy: Some(policy),
            status: Some(status.to_string()),
            petition_id: petition_id.to_string(),
            author_hash: author_hash.to_string(),
            choice: choice.to_string(),
            created_at,
            signature: None,
        };
        env.signature = keys.sign_bytes(&canonical_bytes(&env));
        env
    }

    /// Verifikasi signature (opportunistic).
    #[must_use]
    pub fn verify(&self, keys: &EnvelopeKeys) -> VerifyOutcome {
        let mut unsigned = self.clone();
        unsigned.signature = None;
        keys.verify_bytes(&canonical_bytes(&unsigned), self.signature.as_deref())
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// TRANSACTIONS SUMMARY ENVELOPE
// ════════════════════════════════════════════════════════════════════════════════

/// Digest satu entry transaction log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionDigest {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub petition_id: String,
    pub actor_hash: String,
    pub digest: String,
    pub created_at: u64,
}

/// Envelope untuk transaction-log summary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionsSummaryEnvelope {
    pub issuer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<PolicyRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub summary: String,
    pub entry_count: u64,
    pub entries: Vec<TransactionDigest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl TransactionsSummaryEnvelope {
    /// Assemble + sign envelope atas transaction log lokal.
    ///
    /// Summary digest dihitung atas daftar per-entry digests (sorted,
    /// jadi deterministic); entries dipotong ke [`TX_ENTRY_CAP`].
    #[must_use]
    pub fn build(
        issuer: &str,
        policy: PolicyRef,
        log: &[TransactionDigest],
        keys: &EnvelopeKeys,
    ) -> Self {
        let entry_count = log.len() as u64;
        let mut entries: Vec<TransactionDigest> = log.iter().take(TX_ENTRY_CAP).cloned().collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        let mut digests: Vec<&str> = log.iter().map(|e| e.digest.as_str()).collect();
        digests.sort_unstable();
        let summary = hex::encode(Sha3_256::digest(&canonical_bytes(&digests)));

        let mut env = TransactionsSummaryEnvelope {
            issuer: issuer.to_string(),
            policy: Some(policy),
            status: Some("validated".to_string()),
            summary,
            entry_count,
            entries,
            signature: None,
        };
        env.signature = keys.sign_bytes(&canonical_bytes(&env));
        env
    }

    /// Verifikasi signature (opportunistic).
    #[must_use]
    pub fn verify(&self, keys: &EnvelopeKeys) -> VerifyOutcome {
        let mut unsigned = self.clone();
        unsigned.signature = None;
        keys.verify_bytes(&canonical_bytes(&unsigned), self.signature.as_deref())
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════════
