//! # pagegraph-core: Client-side transactional property graph
//!
//! Keeps a local, optimistically mutable copy of a remote property graph and
//! turns local edit history into minimal mutation batches for the server.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────── GraphSession ────────────────────────────┐
//! │                                                                      │
//! │  edits ──► GraphStore ◄── undo / redo ◄── TransactionDetail (steps)  │
//! │              ▲   │                              │                    │
//! │              │   └── GraphEvent ──► subscribers │ commit()           │
//! │   merge ─────┘                                  ▼                    │
//! │  (sync)  ◄── RemoteResponse             CommitPayload ──► transport  │
//! │     │                                                                │
//! │     └──► IdRemap (temporary → confirmed ids)                         │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`model`]: Vertex / edge records and ids
//! - [`store`]: Graph store with label, adjacency and incident indices
//! - [`step`]: Invertible recorded steps
//! - [`transaction`]: Per-transaction log and status bookkeeping
//! - [`history`]: Undo / redo replay
//! - [`commit`]: Commit compiler and merge pass
//! - [`sync`]: Server responses and sibling updates
//! - [`idmap`]: Temporary → confirmed id tables
//! - [`session`]: `GraphSession`, the entry point

pub mod commit;
pub mod config;
pub mod error;
pub mod events;
pub mod history;
pub mod idmap;
pub mod model;
pub mod session;
pub mod step;
pub mod store;
pub mod sync;
pub mod transaction;

// Re-exports for convenience
pub use commit::{CommitPayload, Mutation};
pub use config::SessionConfig;
pub use error::{GraphError, GraphResult, TxnError};
pub use events::{EventBus, GraphEvent};
pub use history::{HistoryMove, UndoRequest};
pub use idmap::IdRemap;
pub use model::{Adjacency, Edge, EdgeId, EntityRef, Properties, Vertex, VertexId};
pub use session::GraphSession;
pub use step::Step;
pub use store::GraphStore;
pub use sync::{MergeReport, RemoteGraph, RemoteResponse, RemoteUpdate};
pub use transaction::{TransactionDetail, TxnId, TxnStatus, NO_STEP};
