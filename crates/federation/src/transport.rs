//! Gossip Transport (15C.7)
//!
//! Module ini menyediakan abstraction layer untuk komunikasi antar node.
//!
//! # Types
//!
//! | Type | Fungsi |
//! |------|--------|
//! | `GossipEndpoint` | Enum endpoint wire (path + scope) |
//! | `TransportReply` | Status + JSON body dari satu call |
//! | `TransportError` | Error type untuk transport failures |
//! | `GossipTransport` | Async trait untuk network operations |
//! | `HttpTransport` | Implementasi reqwest dengan timeout |
//! | `MockTransport` | In-memory scripted implementation untuk testing |
//!
//! # Timeout Model
//!
//! Setiap call dibatasi timeout (default 8 detik) lewat reqwest; pada
//! timeout, call resolve menjadi `TransportError::Timeout` yang
//! terstruktur — tidak pernah panic, tidak pernah menggantung
//! orchestrator. Timer in-flight dibatalkan oleh reqwest pada kedua
//! jalur (sukses maupun gagal).
//!
//! # Object Safety
//!
//! `GossipTransport` object-safe dan dipakai sebagai
//! `Arc<dyn GossipTransport>` oleh orchestrator.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

// ════════════════════════════════════════════════════════════════════════════════
// GOSSIP ENDPOINT
// ════════════════════════════════════════════════════════════════════════════════

/// Endpoint wire yang dipakai gossip.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GossipEndpoint {
    /// POST /circle/gossip
    CircleGossip,
    /// GET /circle/ledger
    CircleLedger,
    /// POST /votes/gossip
    VotesGossip,
    /// GET /votes/ledger
    VotesLedger,
    /// POST /transactions/gossip
    TransactionsGossip,
    /// GET /transactions/ledger
    TransactionsLedger,
}

impl GossipEndpoint {
    /// Path absolut endpoint.
    #[must_use]
    pub const fn path(&self) -> &'static str {
        match self {
            GossipEndpoint::CircleGossip => "/circle/gossip",
            GossipEndpoint::CircleLedger => "/circle/ledger",
            GossipEndpoint::VotesGossip => "/votes/gossip",
            GossipEndpoint::VotesLedger => "/votes/ledger",
            GossipEndpoint::TransactionsGossip => "/transactions/gossip",
            GossipEndpoint::TransactionsLedger => "/transactions/ledger",
        }
    }

    /// Scope payload untuk summary/trust reporting.
    #[must_use]
    pub const fn scope(&self) -> &'static str {
        match self {
            GossipEndpoint::CircleGossip | GossipEndpoint::CircleLedger => "ledger",
            GossipEndpoint::VotesGossip | GossipEndpoint::VotesLedger => "votes",
            GossipEndpoint::TransactionsGossip | GossipEndpoint::TransactionsLedger => {
                "transactions"
            }
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// TRANSPORT REPLY / ERROR
// ════════════════════════════════════════════════════════════════════════════════

/// Hasil satu transport call yang sampai ke peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportReply {
    /// HTTP status code.
    pub status: u16,
    /// Response body (Null jika bukan JSON).
    pub body: Value,
}

impl TransportReply {
    #[must_use]
    pub fn new(status: u16, body: Value) -> Self {
        TransportReply { status, body }
    }

    /// True untuk status 2xx.
    #[must_use]
    #[inline]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Error type untuk transport failures.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportError {
    /// Call melewati batas timeout.
    Timeout {
        /// Batas timeout dalam milliseconds.
        duration_ms: u64,
    },

    /// Koneksi gagal (DNS, refused, reset).
    ConnectionFailed {
        /// Deskripsi penyebab.
        reason: String,
    },
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Timeout { duration_ms } => {
                write!(f, "request timed out after {}ms", duration_ms)
            }
            TransportError::ConnectionFailed { reason } => {
                write!(f, "connection failed: {}", reason)
            }
        }
    }
}

impl std::error::Error for TransportError {}

// ════════════════════════════════════════════════════════════════════════════════
// GOSSIP TRANSPORT TRAIT
// ════════════════════════════════════════════════════════════════════════════════

/// Async trait untuk komunikasi gossip antar node.
#[async_trait]
pub trait GossipTransport: Send + Sync {
    /// POST JSON body ke endpoint peer.
    async fn post_json(
        &self,
        peer: &str,
        endpoint: GossipEndpoint,
        body: Value,
    ) -> Result<TransportReply, TransportError>;

    /// GET JSON dari endpoint peer.
    async fn get_json(
        &self,
        peer: &str,
        endpoint: GossipEndpoint,
    ) -> Result<TransportReply, TransportError>;
}

// ════════════════════════════════════════════════════════════════════════════════
// HTTP TRANSPORT
// ════════════════════════════════════════════════════════════════════════════════

/// Transport produksi di atas reqwest.
pub struct HttpTransport {
    client: reqwest::Client,
    timeout_ms: u64,
}

impl HttpTransport {
    /// Build client dengan per-request timeout.
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::ConnectionFailed {
                reason: e.to_string(),
            })?;
        Ok(HttpTransport {
            client,
            timeout_ms: timeout.as_millis() as u64,
        })
    }

    fn classify(&self, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout {
                duration_ms: self.timeout_ms,
            }
        } else {
            TransportError::ConnectionFailed {
                reason: err.to_string(),
            }
        }
    }

    async fn reply_of(&self, response: reqwest::Response) -> TransportReply {
        let status = response.status().as_u16();
        // Body non-JSON (proxy error pages dsb.) menjadi Null.
        let body = response.json::<Value>().await.unwrap_or(Value::Null);
        TransportReply { status, body }
    }
}

#[async_trait]
impl GossipTransport for HttpTransport {
    async fn post_json(
        &self,
        peer: &str,
        endpoint: GossipEndpoint,
        body: Value,
    ) -> Result<TransportReply, TransportError> {
        let url = format!("{}{}", peer, endpoint.path());
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.classify(e))?;
        Ok(self.reply_of(response).await)
    }

    async fn get_json(
        &self,
        peer: &str,
        endpoint: GossipEndpoint,
    ) -> Result<TransportReply, TransportError> {
        let url = format!("{}{}", peer, endpoint.path());
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.classify(e))?;
        Ok(self.reply_of(response).await)
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// MOCK TRANSPORT
// ════════════════════════════════════════════════════════════════════════════════

/// Satu request yang tercatat oleh [`MockTransport`].
#[derive(Clone, Debug)]
pub struct SentRequest {
    pub peer: String,
    pub endpoint: GossipEndpoint,
    /// Body untuk POST; None untuk GET.
    pub body: Option<Value>,
}

type ScriptKey = (String, GossipEndpoint);
type ScriptResult = Result<TransportReply, TransportError>;

/// In-memory transport dengan scripted replies, untuk testing
/// orchestrator tanpa jaringan.
///
/// - `script` meng-enqueue satu reply untuk (peer, endpoint)
/// - `script_sticky` menjadi fallback saat queue kosong
/// - Tanpa script: reply 404 (diklasifikasikan "skipped" oleh
///   orchestrator)
#[derive(Default)]
pub struct MockTransport {
    queues: Mutex<HashMap<ScriptKey, VecDeque<ScriptResult>>>,
    sticky: Mutex<HashMap<ScriptKey, ScriptResult>>,
    sent: Mutex<Vec<SentRequest>>,
}

impl MockTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue satu reply untuk (peer, endpoint).
    pub fn script(&self, peer: &str, endpoint: GossipEndpoint, result: ScriptResult) {
        self.queues
            .lock()
            .entry((peer.to_string(), endpoint))
            .or_default()
            .push_back(result);
    }

    /// Set fallback reply untuk (peer, endpoint).
    pub fn script_sticky(&self, peer: &str, endpoint: GossipEndpoint, result: ScriptResult) {
        self.sticky
            .lock()
            .insert((peer.to_string(), endpoint), result);
    }

    /// Snapshot semua request yang tercatat.
    #[must_use]
    pub fn sent(&self) -> Vec<SentRequest> {
        self.sent.lock().clone()
    }

    fn next_reply(&self, peer: &str, endpoint: GossipEndpoint) -> ScriptResult {
        let key = (peer.to_string(), endpoint);
        if let Some(queue) = self.queues.lock().get_mut(&key) {
            if let Some(result) = queue.pop_front() {
                return result;
            }
        }
        if let Some(result) = self.sticky.lock().get(&key) {
            return result.clone();
        }
        Ok(TransportReply::new(
            404,
            serde_json::json!({"error": "not_found"}),
        ))
    }
}

#[async_trait]
impl GossipTransport for MockTransport {
    async fn post_json(
        &self,
        peer: &str,
        endpoint: GossipEndpoint,
        body: Value,
    ) -> Result<TransportReply, TransportError> {
        self.sent.lock().push(SentRequest {
            peer: peer.to_string(),
            endpoint,
            body: Some(body),
        });
        self.next_reply(peer, endpoint)
    }

    async fn get_json(
        &self,
        peer: &str,
        endpoint: GossipEndpoint,
    ) -> Result<TransportReply, TransportError> {
        self.sent.lock().push(SentRequest {
            peer: peer.to_string(),
            endpoint,
            body: None,
        });
        self.next_reply(peer, endpoint)
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════════
