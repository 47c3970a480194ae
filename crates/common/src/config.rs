//! Node configuration: a small typed TOML loader plus an environment overlay.
//!
//! Resolution order (later wins):
//!   1. built-in defaults
//!   2. TOML file (`AGORA_CONFIG_FILE`, default `agora.toml`; missing file is fine)
//!   3. `AGORA_*` environment variables
//!
//! The struct stays flat and stringly-typed at the edges; the federation
//! crate parses mode/level strings into enums when deriving the
//! replication profile.

use serde::Deserialize;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config read error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NodeConfig {
    /// Node identity string stamped into envelopes as `issuer`.
    pub issuer: String,

    /// Public base URL peers can reach this node at. Excluded from the
    /// working peer set so a node never gossips to itself.
    pub public_url: Option<String>,

    /// Bind address for the HTTP server (e.g., "127.0.0.1:8420").
    pub bind_addr: String,

    /// Replication mode: "centralized", "hybrid", or "p2p".
    pub replication_mode: String,

    /// Validation level: "strict", "observe", or "off".
    pub validation_level: String,

    /// Whether preview-status records are accepted and visible locally.
    pub allow_previews: bool,

    /// Storage adapter name, recorded in provenance stamps.
    pub adapter: String,

    /// Master switch for the federation subsystem.
    pub federation_enabled: bool,

    /// Per-module gossip switches.
    pub votes_enabled: bool,
    pub transactions_enabled: bool,

    /// Configured gossip peers (hostnames or URLs; normalized downstream).
    pub peers: Vec<String>,

    /// Optional preferred peer merged into the working set.
    pub preferred_peer: Option<String>,

    /// Gossip scheduler interval in seconds.
    pub gossip_interval_secs: u64,

    /// Per-request timeout for outbound gossip calls, in seconds.
    pub gossip_timeout_secs: u64,

    /// Hex-encoded 64-byte combined Ed25519 keypair. Envelopes are
    /// signed only when present.
    pub signing_key_hex: Option<String>,

    /// Hex-encoded 32-byte Ed25519 public key used to verify inbound
    /// envelope signatures. Verification is skipped when absent.
    pub peer_public_key_hex: Option<String>,

    /// Replication policy identity embedded in envelopes.
    pub policy_id: String,
    pub policy_version: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            issuer: "agora-node".to_string(),
            public_url: None,
            bind_addr: "127.0.0.1:8420".to_string(),
            replication_mode: "hybrid".to_string(),
            validation_level: "strict".to_string(),
            allow_previews: false,
            adapter: "memory".to_string(),
            federation_enabled: true,
            votes_enabled: true,
            transactions_enabled: true,
            peers: Vec::new(),
            preferred_peer: None,
            gossip_interval_secs: 300,
            gossip_timeout_secs: 8,
            signing_key_hex: None,
            peer_public_key_hex: None,
            policy_id: "agora-default".to_string(),
            policy_version: "1".to_string(),
        }
    }
}

/// Load config from a TOML file path. A missing file yields defaults;
/// a present-but-invalid file is an error.
pub fn load_from_file(path: impl AsRef<Path>) -> Result<NodeConfig, ConfigError> {
    let p = path.as_ref();
    if !p.exists() {
        return Ok(NodeConfig::default());
    }
    let s = fs::read_to_string(p)?;
    let cfg: NodeConfig = toml::from_str(&s)?;
    Ok(cfg)
}

/// Load config using the standard resolution order: defaults, then the
/// TOML file named by `AGORA_CONFIG_FILE` (default `agora.toml`), then
/// `AGORA_*` environment variables.
pub fn load() -> Result<NodeConfig, ConfigError> {
    let path = std::env::var("AGORA_CONFIG_FILE").unwrap_or_else(|_| "agora.toml".to_string());
    let mut cfg = load_from_file(path)?;
    apply_env_overlay(&mut cfg);
    Ok(cfg)
}

/// Apply `AGORA_*` environment variables on top of a loaded config.
///
/// Unparseable boolean/number values are ignored rather than fatal, so a
/// bad env var cannot keep a node from starting with its file config.
pub fn apply_env_overlay(cfg: &mut NodeConfig) {
    if let Ok(s) = std::env::var("AGORA_ISSUER") {
        cfg.issuer = s;
    }
    if let Ok(s) = std::env::var("AGORA_PUBLIC_URL") {
        cfg.public_url = Some(s);
    }
    if let Ok(s) = std::env::var("AGORA_BIND_ADDR") {
        cfg.bind_addr = s;
    }
    if let Ok(s) = std::env::var("AGORA_REPLICATION_MODE") {
        cfg.replication_mode = s;
    }
    if let Ok(s) = std::env::var("AGORA_VALIDATION_LEVEL") {
        cfg.validation_level = s;
    }
    if let Ok(s) = std::env::var("AGORA_ALLOW_PREVIEWS") {
        if let Some(b) = parse_bool(&s) {
            cfg.allow_previews = b;
        }
    }
    if let Ok(s) = std::env::var("AGORA_ADAPTER") {
        cfg.adapter = s;
    }
    if let Ok(s) = std::env::var("AGORA_FEDERATION_ENABLED") {
        if let Some(b) = parse_bool(&s) {
            cfg.federation_enabled = b;
        }
    }
    if let Ok(s) = std::env::var("AGORA_VOTES_ENABLED") {
        if let Some(b) = parse_bool(&s) {
            cfg.votes_enabled = b;
        }
    }
    if let Ok(s) = std::env::var("AGORA_TRANSACTIONS_ENABLED") {
        if let Some(b) = parse_bool(&s) {
            cfg.transactions_enabled = b;
        }
    }
    if let Ok(s) = std::env::var("AGORA_PEERS") {
        cfg.peers = s
            .split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
    }
    if let Ok(s) = std::env::var("AGORA_PREFERRED_PEER") {
        let trimmed = s.trim();
        cfg.preferred_peer = if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        };
    }
    if let Ok(s) = std::env::var("AGORA_GOSSIP_INTERVAL_SECS") {
        if let Ok(n) = s.trim().parse::<u64>() {
            cfg.gossip_interval_secs = n;
        }
    }
    if let Ok(s) = std::env::var("AGORA_GOSSIP_TIMEOUT_SECS") {
        if let Ok(n) = s.trim().parse::<u64>() {
            cfg.gossip_timeout_secs = n;
        }
    }
    if let Ok(s) = std::env::var("AGORA_SIGNING_KEY") {
        cfg.signing_key_hex = Some(s);
    }
    if let Ok(s) = std::env::var("AGORA_PEER_PUBLIC_KEY") {
        cfg.peer_public_key_hex = Some(s);
    }
    if let Ok(s) = std::env::var("AGORA_POLICY_ID") {
        cfg.policy_id = s;
    }
    if let Ok(s) = std::env::var("AGORA_POLICY_VERSION") {
        cfg.policy_version = s;
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let def = NodeConfig::default();
        assert_eq!(def.replication_mode, "hybrid");
        assert_eq!(def.validation_level, "strict");
        assert!(!def.allow_previews);
        assert_eq!(def.gossip_interval_secs, 300);
        assert_eq!(def.gossip_timeout_secs, 8);
        assert!(def.federation_enabled);
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let cfg = load_from_file("/definitely/not/here/agora.toml").expect("load");
        assert_eq!(cfg.issuer, "agora-node");
    }

    #[test]
    fn test_load_from_file_roundtrip() {
        use std::io::Write;
        let tmp = tempfile::NamedTempFile::new().expect("temp file");
        let toml = r#"
            issuer = "node-alpha"
            replication_mode = "p2p"
            validation_level = "observe"
            allow_previews = true
            peers = ["alpha.example.org", "beta.example.org:8420"]
            gossip_interval_secs = 60
        "#;
        let mut f = tmp.reopen().expect("reopen");
        write!(f, "{}", toml).expect("write");
        let cfg = load_from_file(tmp.path()).expect("load");
        assert_eq!(cfg.issuer, "node-alpha");
        assert_eq!(cfg.replication_mode, "p2p");
        assert!(cfg.allow_previews);
        assert_eq!(cfg.peers.len(), 2);
        assert_eq!(cfg.gossip_interval_secs, 60);
        // Unspecified fields keep their defaults.
        assert_eq!(cfg.bind_addr, "127.0.0.1:8420");
    }

    #[test]
    fn test_parse_bool_forms() {
        assert_eq!(parse_bool("true"), Some(true));
        assert_eq!(parse_bool("YES"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
