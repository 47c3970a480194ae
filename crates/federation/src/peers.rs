//! Peer Registry (15C.1)
//!
//! Module ini menyediakan normalisasi alamat peer dan pembentukan
//! working peer set untuk satu gossip cycle.
//!
//! # Functions
//!
//! | Function | Fungsi |
//! |----------|--------|
//! | `normalize_peer_url` | Normalisasi satu alamat peer (pure function) |
//! | `collect_gossip_peers` | Union configured + learned + preferred peers |
//!
//! # Accepted Address Forms
//!
//! - Bare hostname dengan dot: `alpha.example.org`
//! - `host:port`: `alpha.example.org:8420`
//! - Loopback / IP-literal: `localhost`, `127.0.0.1:8420`, `[::1]:8420`,
//!   `10.x`, `192.168.x`, `0.0.0.0`
//! - Full URL: `https://alpha.example.org/`
//!
//! Semua bentuk lain ditolak (return `None`). Normalisasi bersifat
//! deterministic: scheme dan host di-lowercase, trailing slash dibuang.

use agora_common::NodeConfig;

/// Host patterns yang diterima tanpa dot (local / private forms).
fn is_local_host(host: &str) -> bool {
    if host == "localhost" || host == "0.0.0.0" || host == "::1" || host == "[::1]" {
        return true;
    }
    host.starts_with("127.")
        || host.starts_with("10.")
        || host.starts_with("192.168.")
        || host.starts_with("[::1]")
}

/// Extract bagian host dari `host[:port]`, tanpa port.
fn host_of(host_port: &str) -> &str {
    if host_port.starts_with('[') {
        // Bracketed IPv6 literal: [::1] or [::1]:8420
        match host_port.find(']') {
            Some(i) => &host_port[..=i],
            None => host_port,
        }
    } else if host_port.matches(':').count() > 1 {
        // Unbracketed IPv6 literal; no port split possible
        host_port
    } else {
        match host_port.rsplit_once(':') {
            Some((host, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => {
                host
            }
            _ => host_port,
        }
    }
}

/// Normalisasi satu raw peer address menjadi URL, atau `None` jika ditolak.
///
/// # Behavior
///
/// - Scheme default `http://` untuk alamat tanpa scheme
/// - Scheme selain http/https ditolak
/// - Host tanpa dot dan bukan local pattern ditolak
/// - Embedded whitespace ditolak
/// - Scheme + host di-lowercase, trailing slash dibuang
///
/// Pure function, tidak ada side effects.
#[must_use]
pub fn normalize_peer_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
        return None;
    }

    let lower_probe = trimmed.to_ascii_lowercase();
    let (scheme, rest) = if lower_probe.starts_with("http://") {
        ("http", &trimmed[7..])
    } else if lower_probe.starts_with("https://") {
        ("https", &trimmed[8..])
    } else if trimmed.contains("://") {
        return None;
    } else {
        ("http", trimmed)
    };

    let rest = rest.trim_end_matches('/');
    if rest.is_empty() {
        return None;
    }

    let (host_port, path) = match rest.find('/') {
        Some(i) => (&rest[..i], &rest[i..]),
        None => (rest, ""),
    };
    if host_port.is_empty() {
        return None;
    }

    let host = host_of(host_port);
    let host_lower = host.to_ascii_lowercase();
    if !host_lower.contains('.') && !is_local_host(&host_lower) {
        return None;
    }

    // Lowercase hanya bagian host; port dan path dibiarkan apa adanya.
    let port_suffix = &host_port[host.len()..];
    Some(format!("{}://{}{}{}", scheme, host_lower, port_suffix, path))
}

/// Bentuk working peer set untuk satu gossip cycle.
///
/// Union dari configured peers, learned peers, dan preferred peer;
/// semua dinormalisasi, dideduplikasi, insertion order dipertahankan
/// (deterministic untuk testing). Alamat node sendiri (`public_url`)
/// dikecualikan.
#[must_use]
pub fn collect_gossip_peers(config: &NodeConfig, learned: &[String]) -> Vec<String> {
    let own = config
        .public_url
        .as_deref()
        .and_then(normalize_peer_url);

    let mut out: Vec<String> = Vec::new();
    let candidates = config
        .peers
        .iter()
        .map(String::as_str)
        .chain(learned.iter().map(String::as_str))
        .chain(config.preferred_peer.as_deref());

    for raw in candidates {
        if let Some(url) = normalize_peer_url(raw) {
            if Some(&url) == own.as_ref() {
                continue;
            }
            if !out.contains(&url) {
                out.push(url);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(peers: &[&str], preferred: Option<&str>) -> NodeConfig {
        NodeConfig {
            peers: peers.iter().map(|s| s.to_string()).collect(),
            preferred_peer: preferred.map(|s| s.to_string()),
            ..NodeConfig::default()
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // normalize_peer_url Tests
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn test_normalize_bare_hostname() {
        assert_eq!(
            normalize_peer_url("alpha.example.org"),
            Some("http://alpha.example.org".to_string())
        );
    }

    #[test]
    fn test_normalize_host_port() {
        assert_eq!(
            normalize_peer_url("alpha.example.org:8420"),
            Some("http://alpha.example.org:8420".to_string())
        );
    }

    #[test]
    fn test_normalize_full_url_keeps_scheme() {
        assert_eq!(
            normalize_peer_url("https://alpha.example.org"),
            Some("https://alpha.example.org".to_string())
        );
    }

    #[test]
    fn test_normalize_strips_trailing_slashes() {
        assert_eq!(
            normalize_peer_url("https://alpha.example.org///"),
            Some("https://alpha.example.org".to_string())
        );
    }

    #[test]
    fn test_normalize_lowercases_scheme_and_host() {
        assert_eq!(
            normalize_peer_url("HTTPS://Alpha.Example.ORG:8420"),
            Some("https://alpha.example.org:8420".to_string())
        );
    }

    #[test]
    fn test_normalize_keeps_path() {
        assert_eq!(
            normalize_peer_url("alpha.example.org/circle"),
            Some("http://alpha.example.org/circle".to_string())
        );
    }

    #[test]
    fn test_normalize_localhost_forms() {
        assert_eq!(
            normalize_peer_url("localhost:8420"),
            Some("http://localhost:8420".to_string())
        );
        assert_eq!(
            normalize_peer_url("127.0.0.1:8420"),
            Some("http://127.0.0.1:8420".to_string())
        );
        assert_eq!(
            normalize_peer_url("[::1]:8420"),
            Some("http://[::1]:8420".to_string())
        );
        assert_eq!(
            normalize_peer_url("192.168.1.7"),
            Some("http://192.168.1.7".to_string())
        );
    }

    #[test]
    fn test_normalize_rejects_dotless_host() {
        assert_eq!(normalize_peer_url("alpha"), None);
        assert_eq!(normalize_peer_url("alpha:8420"), None);
    }

    #[test]
    fn test_normalize_rejects_non_http_scheme() {
        assert_eq!(normalize_peer_url("ftp://alpha.example.org"), None);
        assert_eq!(normalize_peer_url("ws://alpha.example.org"), None);
    }

    #[test]
    fn test_normalize_rejects_whitespace_and_empty() {
        assert_eq!(normalize_peer_url(""), None);
        assert_eq!(normalize_peer_url("   "), None);
        assert_eq!(normalize_peer_url("alpha example.org"), None);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // collect_gossip_peers Tests
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn test_collect_unions_and_dedups() {
        let cfg = config_with(
            &["alpha.example.org", "beta.example.org"],
            Some("alpha.example.org"),
        );
        let learned = vec!["http://beta.example.org".to_string()];
        let peers = collect_gossip_peers(&cfg, &learned);
        assert_eq!(
            peers,
            vec![
                "http://alpha.example.org".to_string(),
                "http://beta.example.org".to_string(),
            ]
        );
    }

    #[test]
    fn test_collect_preserves_insertion_order() {
        let cfg = config_with(&["b.example.org", "a.example.org"], None);
        let peers = collect_gossip_peers(&cfg, &[]);
        assert_eq!(
            peers,
            vec![
                "http://b.example.org".to_string(),
                "http://a.example.org".to_string(),
            ]
        );
    }

    #[test]
    fn test_collect_drops_invalid_entries() {
        let cfg = config_with(&["not a url", "alpha.example.org", "bare"], None);
        let peers = collect_gossip_peers(&cfg, &[]);
        assert_eq!(peers, vec!["http://alpha.example.org".to_string()]);
    }

    #[test]
    fn test_collect_excludes_own_public_url() {
        let mut cfg = config_with(&["alpha.example.org", "self.example.org"], None);
        cfg.public_url = Some("http://self.example.org/".to_string());
        let peers = collect_gossip_peers(&cfg, &[]);
        assert_eq!(peers, vec!["http://alpha.example.org".to_string()]);
    }

    #[test]
    fn test_collect_includes_preferred_peer() {
        let cfg = config_with(&[], Some("preferred.example.org:8420"));
        let peers = collect_gossip_peers(&cfg, &[]);
        assert_eq!(peers, vec!["http://preferred.example.org:8420".to_string()]);
    }
}
