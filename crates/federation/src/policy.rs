//! Replication Policy (15C.3)
//!
//! Module ini adalah single source of truth untuk dua pertanyaan:
//! apa yang visible secara lokal, dan apa yang diterima dari peers.
//!
//! # Types
//!
//! | Type | Fungsi |
//! |------|--------|
//! | `ReplicationMode` | Topologi data node (centralized/hybrid/p2p) |
//! | `ValidationLevel` | Kekakuan validasi (strict/observe/off) |
//! | `ValidationStatus` | Status record (validated/preview/rejected) |
//! | `ReplicationProfile` | Profil efektif node, immutable per gossip run |
//! | `ValidationDecision` | Hasil decision table untuk satu hinted status |
//! | `LocalStamp` | Stamp untuk record yang di-author lokal |
//!
//! # Decision Table
//!
//! | Level | Hint | allow_previews | Hasil |
//! |-------|------|----------------|-------|
//! | off | apapun | apapun | validated |
//! | strict/observe | validated | apapun | validated |
//! | strict/observe | preview | true | preview |
//! | strict/observe | preview | false | rejected |

use serde::{Deserialize, Serialize};

use agora_common::NodeConfig;

// ════════════════════════════════════════════════════════════════════════════════
// REPLICATION MODE
// ════════════════════════════════════════════════════════════════════════════════

/// Topologi data node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicationMode {
    /// Satu node otoritatif, tanpa gossip.
    Centralized,
    /// Node otoritatif dengan replicas gossip.
    Hybrid,
    /// Full peer-to-peer.
    P2p,
}

impl ReplicationMode {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ReplicationMode::Centralized => "centralized",
            ReplicationMode::Hybrid => "hybrid",
            ReplicationMode::P2p => "p2p",
        }
    }

    /// Parse dari string config; unknown value → `None`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "centralized" => Some(ReplicationMode::Centralized),
            "hybrid" => Some(ReplicationMode::Hybrid),
            "p2p" => Some(ReplicationMode::P2p),
            _ => None,
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// VALIDATION LEVEL
// ════════════════════════════════════════════════════════════════════════════════

/// Kekakuan validasi terhadap record yang masuk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationLevel {
    /// Hanya record validated yang diterima penuh.
    Strict,
    /// Preview diterima sebagai preview.
    Observe,
    /// Semua record dianggap validated.
    Off,
}

impl ValidationLevel {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ValidationLevel::Strict => "strict",
            ValidationLevel::Observe => "observe",
            ValidationLevel::Off => "off",
        }
    }

    /// Parse dari string config; unknown value → `None`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Some(ValidationLevel::Strict),
            "observe" => Some(ValidationLevel::Observe),
            "off" => Some(ValidationLevel::Off),
            _ => None,
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// VALIDATION STATUS
// ════════════════════════════════════════════════════════════════════════════════

/// Status tri-state sebuah record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    Validated,
    Preview,
    Rejected,
}

impl ValidationStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ValidationStatus::Validated => "validated",
            ValidationStatus::Preview => "preview",
            ValidationStatus::Rejected => "rejected",
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// REPLICATION PROFILE
// ════════════════════════════════════════════════════════════════════════════════

/// Profil replikasi efektif node. Immutable per gossip run.
///
/// # Invariant
///
/// `allow_previews == false` memaksa setiap record ber-hint preview
/// menjadi rejected (kecuali level `off`, yang melewatkan semuanya
/// sebagai validated).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationProfile {
    pub mode: ReplicationMode,
    pub adapter: String,
    pub validation_level: ValidationLevel,
    pub allow_previews: bool,
}

impl ReplicationProfile {
    /// Derive profil dari node configuration, dengan process defaults
    /// untuk value yang tidak dikenal.
    #[must_use]
    pub fn from_config(config: &NodeConfig) -> Self {
        ReplicationProfile {
            mode: ReplicationMode::parse(&config.replication_mode)
                .unwrap_or(ReplicationMode::Hybrid),
            adapter: config.adapter.clone(),
            validation_level: ValidationLevel::parse(&config.validation_level)
                .unwrap_or(ValidationLevel::Strict),
            allow_previews: config.allow_previews,
        }
    }

    /// Gossip aktif hanya di luar mode centralized.
    #[must_use]
    #[inline]
    pub fn gossip_enabled(&self) -> bool {
        self.mode != ReplicationMode::Centralized
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// VALIDATION DECISION
// ════════════════════════════════════════════════════════════════════════════════

/// Hasil penerapan policy terhadap satu hinted status.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationDecision {
    pub status: ValidationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub allow_preview: bool,
}

/// Terapkan decision table terhadap hinted status.
///
/// Hint dinormalisasi dulu: `"preview"` (case-insensitive) → preview,
/// semua value lain (termasuk absen) → validated.
#[must_use]
pub fn decide_status(profile: &ReplicationProfile, hint: Option<&str>) -> ValidationDecision {
    let hinted_preview = hint
        .map(|h| h.trim().eq_ignore_ascii_case("preview"))
        .unwrap_or(false);

    if profile.validation_level == ValidationLevel::Off {
        return ValidationDecision {
            status: ValidationStatus::Validated,
            reason: None,
            allow_preview: profile.allow_previews,
        };
    }

    if hinted_preview {
        if !profile.allow_previews {
            return ValidationDecision {
                status: ValidationStatus::Rejected,
                reason: Some("previews_disabled".to_string()),
                allow_preview: false,
            };
        }
        return ValidationDecision {
            status: ValidationStatus::Preview,
            reason: None,
            allow_preview: true,
        };
    }

    ValidationDecision {
        status: ValidationStatus::Validated,
        reason: None,
        allow_preview: profile.allow_previews,
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// LOCAL STAMPING
// ════════════════════════════════════════════════════════════════════════════════

/// Provenance record: dari mana sebuah entry berasal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    pub issuer: String,
    pub mode: String,
    pub adapter: String,
}

/// Stamp yang di-attach ke setiap record yang di-author lokal sebelum
/// masuk store manapun. Dengan stamp ini record lokal dan record hasil
/// ingest identik secara struktural downstream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalStamp {
    pub validation_status: ValidationStatus,
    pub issuer: String,
    pub provenance: Provenance,
    pub validated_at: u64,
}

/// Bentuk stamp untuk record yang di-author lokal: selalu validated,
/// dengan provenance profil node sendiri.
#[must_use]
pub fn stamp_local_entry(profile: &ReplicationProfile, issuer: &str, now_ms: u64) -> LocalStamp {
    LocalStamp {
        validation_status: ValidationStatus::Validated,
        issuer: issuer.to_string(),
        provenance: Provenance {
            issuer: issuer.to_string(),
            mode: profile.mode.as_str().to_string(),
            adapter: profile.adapter.clone(),
        },
        validated_at: now_ms,
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// VISIBILITY FILTER
// ════════════════════════════════════════════════════════════════════════════════

/// Record yang membawa validation status (votes, transaction summaries).
pub trait Replicated {
    fn validation_status(&self) -> ValidationStatus;
}

/// Filter untuk setiap read path: saat `allow_previews == false`,
/// record berstatus preview dibuang. Dipakai oleh exports, status
/// endpoint, dan push payload assembly — bukan hanya gossip.
#[must_use]
pub fn filter_visible_entries<T: Replicated + Clone>(
    entries: &[T],
    profile: &ReplicationProfile,
) -> Vec<T> {
    if profile.allow_previews {
        return entries.to_vec();
    }
    entries
        .iter()
        .filter(|e| e.validation_status() != ValidationStatus::Preview)
        .cloned()
        .collect()
}

// ════════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(level: ValidationLevel, allow_previews: bool) -> ReplicationProfile {
        ReplicationProfile {
            mode: ReplicationMode::Hybrid,
            adapter: "memory".to_string(),
            validation_level: level,
            allow_previews,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Parse Tests
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn test_mode_parse_roundtrip() {
        for mode in [
            ReplicationMode::Centralized,
            ReplicationMode::Hybrid,
            ReplicationMode::P2p,
        ] {
            assert_eq!(ReplicationMode::parse(mode.as_str()), Some(mode));
        }
        assert_eq!(ReplicationMode::parse("federated"), None);
    }

    #[test]
    fn test_level_parse_roundtrip() {
        for level in [
            ValidationLevel::Strict,
            ValidationLevel::Observe,
            ValidationLevel::Off,
        ] {
            assert_eq!(ValidationLevel::parse(level.as_str()), Some(level));
        }
        assert_eq!(ValidationLevel::parse("paranoid"), None);
    }

    #[test]
    fn test_profile_from_config_defaults_on_unknown() {
        let mut cfg = NodeConfig::default();
        cfg.replication_mode = "quantum".to_string();
        cfg.validation_level = "???".to_string();
        let profile = ReplicationProfile::from_config(&cfg);
        assert_eq!(profile.mode, ReplicationMode::Hybrid);
        assert_eq!(profile.validation_level, ValidationLevel::Strict);
    }

    #[test]
    fn test_gossip_disabled_under_centralized() {
        let mut cfg = NodeConfig::default();
        cfg.replication_mode = "centralized".to_string();
        assert!(!ReplicationProfile::from_config(&cfg).gossip_enabled());
        cfg.replication_mode = "p2p".to_string();
        assert!(ReplicationProfile::from_config(&cfg).gossip_enabled());
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Decision Table Tests
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn test_off_level_validates_everything() {
        let p = profile(ValidationLevel::Off, false);
        assert_eq!(
            decide_status(&p, Some("preview")).status,
            ValidationStatus::Validated
        );
        assert_eq!(decide_status(&p, None).status, ValidationStatus::Validated);
    }

    #[test]
    fn test_observe_preview_hint_yields_preview() {
        let p = profile(ValidationLevel::Observe, true);
        let d = decide_status(&p, Some("preview"));
        assert_eq!(d.status, ValidationStatus::Preview);
        assert!(d.allow_preview);
    }

    #[test]
    fn test_preview_hint_rejected_without_allow_previews() {
        for level in [ValidationLevel::Strict, ValidationLevel::Observe] {
            let p = profile(level, false);
            let d = decide_status(&p, Some("preview"));
            assert_eq!(d.status, ValidationStatus::Rejected);
            assert_eq!(d.reason.as_deref(), Some("previews_disabled"));
        }
    }

    #[test]
    fn test_unknown_hint_normalizes_to_validated() {
        let p = profile(ValidationLevel::Strict, false);
        assert_eq!(
            decide_status(&p, Some("anything")).status,
            ValidationStatus::Validated
        );
        assert_eq!(
            decide_status(&p, Some("  PREVIEW ")).status,
            ValidationStatus::Rejected
        );
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Stamping & Visibility Tests
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn test_stamp_local_entry_is_validated_with_provenance() {
        let p = profile(ValidationLevel::Strict, false);
        let stamp = stamp_local_entry(&p, "node-alpha", 42);
        assert_eq!(stamp.validation_status, ValidationStatus::Validated);
        assert_eq!(stamp.issuer, "node-alpha");
        assert_eq!(stamp.provenance.mode, "hybrid");
        assert_eq!(stamp.provenance.adapter, "memory");
        assert_eq!(stamp.validated_at, 42);
    }

    #[derive(Clone)]
    struct Entry(ValidationStatus);
    impl Replicated for Entry {
        fn validation_status(&self) -> ValidationStatus {
            self.0
        }
    }

    #[test]
    fn test_filter_strips_previews_when_disallowed() {
        let entries = vec![
            Entry(ValidationStatus::Validated),
            Entry(ValidationStatus::Preview),
            Entry(ValidationStatus::Validated),
        ];
        let p = profile(ValidationLevel::Observe, false);
        assert_eq!(filter_visible_entries(&entries, &p).len(), 2);

        let p = profile(ValidationLevel::Observe, true);
        assert_eq!(filter_visible_entries(&entries, &p).len(), 3);
    }
}
