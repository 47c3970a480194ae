//! # Agora Federation Crate (15C)
//!
//! Gossip replication dan peer-trust subsystem untuk agora nodes.
//!
//! # Overview
//!
//! Subsystem ini mensinkronkan tiga jenis record — uniqueness-ledger
//! hashes, votes, dan transaction-log summaries — antar peer nodes yang
//! loosely-coupled pada topologi `hybrid` atau `p2p`. Replikasi bersifat
//! eventually consistent: merge idempotent, envelope ber-signature
//! opsional, peer quarantine berbasis reputation, dan tri-state
//! validation policy (validated / preview / rejected) yang menentukan
//! apa yang direplikasi sama sekali.
//!
//! # Components
//!
//! ## Peer Registry (15C.1)
//!
//! - **normalize_peer_url** - Normalisasi alamat peer (pure function)
//! - **collect_gossip_peers** - Working peer set untuk satu cycle
//!
//! ## Peer Trust Store (15C.2)
//!
//! - **PeerHealthRecord** - Reputation data per peer
//! - **PeerTrustStore** - Score/quarantine accounting
//!
//! ## Replication Policy (15C.3)
//!
//! - **ReplicationProfile** - Topologi + validation strictness efektif
//! - **decide_status** - Decision table validated/preview/rejected
//! - **filter_visible_entries** - Visibility filter untuk semua read paths
//!
//! ## Envelope Codec (15C.4)
//!
//! - **LedgerEnvelope / VoteEnvelope / TransactionsSummaryEnvelope**
//! - **EnvelopeKeys** - Optional signing capability
//! - **compute_ledger_hash** - Deterministic ledger digest
//!
//! ## State & Persistence (15C.5)
//!
//! - **FederationState** - Application context (explicitly owned)
//! - **FederationStore** - Load/save contract ke storage collaborator
//!
//! ## Ingest Pipelines (15C.6)
//!
//! - **ingest_ledger / ingest_votes / ingest_transactions**
//!
//! ## Transport (15C.7)
//!
//! - **GossipTransport** - Async trait; **HttpTransport** + **MockTransport**
//!
//! ## Orchestrator (15C.8)
//!
//! - **GossipOrchestrator** - Push/pull cycles, run summaries, scheduler
//!
//! ## HTTP Surface (15C.9)
//!
//! - **router** - axum router untuk wire endpoints + observability

pub mod envelope;
pub mod handlers;
pub mod ingest;
pub mod orchestrator;
pub mod peers;
pub mod policy;
pub mod state;
pub mod transport;
pub mod trust;

// Re-export tipe utama supaya konsumen cukup depend pada crate root.
pub use envelope::{
    compute_ledger_hash, EnvelopeKeys, LedgerEnvelope, PolicyRef, TransactionDigest,
    TransactionsSummaryEnvelope, VerifyOutcome, VoteEnvelope,
};
pub use handlers::{router, AppState};
pub use ingest::{
    ingest_ledger, ingest_transactions, ingest_votes, IngestError, LedgerIngestOutcome,
    TransactionsIngestOutcome, VotesIngestOutcome,
};
pub use orchestrator::{GossipOrchestrator, GossipRunSummary, PayloadCounters, PeerResult};
pub use peers::{collect_gossip_peers, normalize_peer_url};
pub use policy::{
    decide_status, filter_visible_entries, stamp_local_entry, ReplicationMode, ReplicationProfile,
    ValidationDecision, ValidationLevel, ValidationStatus,
};
pub use state::{
    FederationState, FederationStore, MemoryStore, StoreError, TransactionSummaryRecord,
    VoteRecord,
};
pub use transport::{
    GossipEndpoint, GossipTransport, HttpTransport, MockTransport, TransportError, TransportReply,
};
pub use trust::{PeerHealthRecord, PeerTrustStore, TrustSummary};
