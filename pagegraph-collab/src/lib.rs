//! # pagegraph-collab: Remote commit and cross-tab sync for pagegraph
//!
//! Connects a [`pagegraph_core::GraphSession`] to the remote graph database
//! and to the other sessions of the same client instance.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   CommitPayload    ┌───────────────┐
//! │ CommitDriver │ ─────────────────► │ RemoteGraphDb │
//! │ (per session)│ ◄───────────────── │ (authority)   │
//! └──────┬───────┘   RemoteResponse   └───────────────┘
//!        │ confirmed changes
//!        ▼
//! ┌──────────────┐   bincode Envelope ┌──────────────┐
//! │ TabHub       │ ─────────────────► │ TabLink      │
//! │ (per client) │     fan-out        │ (siblings)   │
//! └──────────────┘                    └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: Binary envelope around JSON broadcast bodies
//! - [`broadcast`]: Per-client hub with sender-tag filtering
//! - [`remote`]: Remote database seam and an in-memory authority
//! - [`client`]: Commit driver and relay

pub mod protocol;
pub mod broadcast;
pub mod remote;
pub mod client;

// Re-exports for convenience
pub use protocol::{BroadcastMessage, Envelope, MessageType, ProtocolError};
pub use broadcast::{HubConfig, HubRegistry, HubStats, TabHub, TabLink};
pub use remote::{MemoryRemote, RemoteGraphDb, RemoteStats};
pub use client::{CommitDriver, DriverConfig, DriverError};
