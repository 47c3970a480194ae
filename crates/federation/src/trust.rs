//! Peer Trust Store (15C.2)
//!
//! Module ini menyediakan reputation accounting per peer. Orchestrator
//! membaca store ini sebelum setiap contact attempt: peer yang sedang
//! quarantine tidak dihubungi sama sekali.
//!
//! # Types
//!
//! | Type | Fungsi |
//! |------|--------|
//! | `PeerHealthRecord` | Reputation data untuk satu peer |
//! | `PeerTrustStore` | Map dari peer key ke PeerHealthRecord |
//! | `TrustSummary` | Snapshot untuk observability |
//!
//! # Time Unit
//!
//! **SEMUA timestamp dalam module ini menggunakan MILLISECONDS** sejak
//! Unix epoch, dan di-pass eksplisit sebagai `now_ms` (deterministic
//! untuk testing).
//!
//! # Score Model
//!
//! - Score di-clamp ke [-10, +5]
//! - Failure: score -= penalty (default 1; pelanggaran signature/policy 2)
//! - Success: score += 1, quarantine langsung dibersihkan
//! - Score <= -3 → quarantine selama 6 jam
//! - Quarantine yang expired dibersihkan lazily saat dibaca

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::peers::normalize_peer_url;

/// Score floor (clamp bawah).
pub const SCORE_FLOOR: i32 = -10;
/// Score ceiling (clamp atas).
pub const SCORE_CEIL: i32 = 5;
/// Score threshold yang memicu quarantine.
pub const QUARANTINE_THRESHOLD: i32 = -3;
/// Durasi quarantine window: 6 jam dalam milliseconds.
pub const QUARANTINE_WINDOW_MS: u64 = 6 * 60 * 60 * 1000;
/// Panjang maksimum issuer fallback key.
pub const ISSUER_KEY_MAX: usize = 200;

/// Default penalty untuk generic failure.
pub const PENALTY_GENERIC: u32 = 1;
/// Penalty untuk pelanggaran signature atau policy.
pub const PENALTY_VIOLATION: u32 = 2;

// ════════════════════════════════════════════════════════════════════════════════
// PEER HEALTH RECORD
// ════════════════════════════════════════════════════════════════════════════════

/// Reputation data untuk satu peer, keyed by normalized peer URL
/// (atau truncated issuer fallback).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerHealthRecord {
    /// Reputation score, clamped [-10, +5].
    pub score: i32,
    /// Jumlah kumulatif failures.
    pub strikes: u32,
    /// Jumlah kumulatif successes.
    pub successes: u32,
    /// Timestamp failure terakhir (ms sejak epoch).
    pub last_failure_at: Option<u64>,
    /// Reason string dari failure terakhir.
    pub last_failure_reason: Option<String>,
    /// Timestamp success terakhir (ms sejak epoch).
    pub last_success_at: Option<u64>,
    /// Timestamp saat quarantine dimulai.
    pub quarantined_at: Option<u64>,
    /// Quarantine aktif sampai timestamp ini.
    pub quarantine_until: Option<u64>,
}

// ════════════════════════════════════════════════════════════════════════════════
// TRUST SUMMARY
// ════════════════════════════════════════════════════════════════════════════════

/// Satu baris dalam trust summary.
#[derive(Clone, Debug, Serialize)]
pub struct TrustSummaryEntry {
    pub peer: String,
    pub score: i32,
    pub strikes: u32,
    pub successes: u32,
    pub quarantined: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_reason: Option<String>,
}

/// Snapshot store untuk observability.
#[derive(Clone, Debug, Serialize)]
pub struct TrustSummary {
    /// Jumlah peer yang di-track.
    pub total: usize,
    /// Jumlah peer yang sedang quarantine.
    pub quarantined: usize,
    /// Score terburuk di store (None jika kosong).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worst_score: Option<i32>,
    /// Slice score-ascending, tiebreak nama peer.
    pub entries: Vec<TrustSummaryEntry>,
}

// ════════════════════════════════════════════════════════════════════════════════
// PEER TRUST STORE
// ════════════════════════════════════════════════════════════════════════════════

/// Map dari peer key ke [`PeerHealthRecord`].
///
/// # Invariants
///
/// - Semua transitions eksplisit via method calls
/// - `record_success` SELALU membersihkan quarantine
/// - Quarantine expired dibersihkan lazily dan idempotent
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PeerTrustStore {
    peers: HashMap<String, PeerHealthRecord>,
}

impl PeerTrustStore {
    /// Store kosong.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rekonstruksi store dari persisted map.
    #[must_use]
    pub fn from_map(peers: HashMap<String, PeerHealthRecord>) -> Self {
        Self { peers }
    }

    /// Reference ke underlying map (untuk persistence).
    #[must_use]
    pub fn as_map(&self) -> &HashMap<String, PeerHealthRecord> {
        &self.peers
    }

    /// Jumlah peer yang di-track.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// True jika store kosong.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Reference ke record peer jika ada.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&PeerHealthRecord> {
        self.peers.get(key)
    }

    /// Resolve key untuk trust tracking.
    ///
    /// Prefer URL yang bisa dinormalisasi (dari `peer_hint` lalu
    /// `issuer`); fallback ke raw issuer yang dipotong maksimum 200
    /// karakter sebagai opaque key. Dengan fallback ini peer yang hanya
    /// dikenal lewat self-reported issuer tetap bisa di-track.
    #[must_use]
    pub fn resolve_peer_key(peer_hint: Option<&str>, issuer: Option<&str>) -> Option<String> {
        if let Some(url) = peer_hint.and_then(normalize_peer_url) {
            return Some(url);
        }
        if let Some(url) = issuer.and_then(normalize_peer_url) {
            return Some(url);
        }
        let raw = issuer.or(peer_hint)?.trim();
        if raw.is_empty() {
            return None;
        }
        Some(raw.chars().take(ISSUER_KEY_MAX).collect())
    }

    /// Memeriksa apakah peer sedang quarantine.
    ///
    /// # Behavior
    ///
    /// - True selama `now_ms < quarantine_until`
    /// - Quarantine marker yang sudah expired dibersihkan sebagai side
    ///   effect (idempotent — aman dipanggil berulang)
    /// - Peer tidak dikenal: false
    pub fn is_quarantined(&mut self, key: &str, now_ms: u64) -> bool {
        let Some(entry) = self.peers.get_mut(key) else {
            return false;
        };
        match entry.quarantine_until {
            Some(until) if now_ms < until => true,
            Some(_) => {
                // Expired: clear marker lazily.
                entry.quarantined_at = None;
                entry.quarantine_until = None;
                false
            }
            None => false,
        }
    }

    /// Catat satu failure untuk peer.
    ///
    /// # Behavior
    ///
    /// - Score dikurangi `penalty`, floor -10
    /// - Strike counter bertambah, reason/time di-stamp
    /// - Jika score hasil <= -3: quarantine sampai `now + 6h`
    /// - Peer belum dikenal: record baru dibuat dulu
    pub fn record_failure(&mut self, key: &str, reason: &str, penalty: u32, now_ms: u64) {
        let entry = self.peers.entry(key.to_string()).or_default();
        entry.score = (entry.score - penalty as i32).max(SCORE_FLOOR);
        entry.strikes = entry.strikes.saturating_add(1);
        entry.last_failure_at = Some(now_ms);
        entry.last_failure_reason = Some(reason.to_string());
        if entry.score <= QUARANTINE_THRESHOLD {
            entry.quarantined_at = Some(now_ms);
            entry.quarantine_until = Some(now_ms.saturating_add(QUARANTINE_WINDOW_MS));
        }
    }

    /// Catat satu success untuk peer.
    ///
    /// # Behavior
    ///
    /// - Score bertambah 1, ceiling +5
    /// - Success counter bertambah, time di-stamp
    /// - Quarantine fields SELALU dibersihkan, berapapun sisa window
    pub fn record_success(&mut self, key: &str, now_ms: u64) {
        let entry = self.peers.entry(key.to_string()).or_default();
        entry.score = (entry.score + 1).min(SCORE_CEIL);
        entry.successes = entry.successes.saturating_add(1);
        entry.last_success_at = Some(now_ms);
        entry.quarantined_at = None;
        entry.quarantine_until = None;
    }

    /// Snapshot untuk observability.
    ///
    /// Entries diurutkan score ascending, tiebreak nama peer, dipotong
    /// ke `limit`. Method ini TIDAK memutasi state: quarantine dihitung
    /// terhadap `now_ms` tanpa membersihkan marker.
    #[must_use]
    pub fn summarize(&self, limit: usize, now_ms: u64) -> TrustSummary {
        let mut rows: Vec<(&String, &PeerHealthRecord)> = self.peers.iter().collect();
        rows.sort_by(|a, b| a.1.score.cmp(&b.1.score).then_with(|| a.0.cmp(b.0)));

        let quarantined = rows
            .iter()
            .filter(|(_, r)| matches!(r.quarantine_until, Some(until) if now_ms < until))
            .count();
        let worst_score = rows.first().map(|(_, r)| r.score);

        let entries = rows
            .into_iter()
            .take(limit)
            .map(|(peer, r)| TrustSummaryEntry {
                peer: peer.clone(),
                score: r.score,
                strikes: r.strikes,
                successes: r.successes,
                quarantined: matches!(r.quarantine_until, Some(until) if now_ms < until),
                last_failure_reason: r.last_failure_reason.clone(),
            })
            .collect();

        TrustSummary {
            total: self.peers.len(),
            quarantined,
            worst_score,
            entries,
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════════
