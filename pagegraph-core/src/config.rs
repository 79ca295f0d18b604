//! Session configuration.

use serde::{Deserialize, Serialize};

/// Session configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// First temporary vertex id handed out; later ids count down. Default: -1.
    pub first_temp_vertex_id: i64,
    /// First temporary edge id handed out; later ids count down. Default: -1.
    pub first_temp_edge_id: i64,
    /// Create a transaction on first use of an unknown id. Default: true.
    pub auto_begin: bool,
    /// Deleting a vertex also deletes (and logs) its incident edges. Default: true.
    pub cascade_vertex_delete: bool,
    /// Run the store integrity check after undo, redo and merges. Default: false.
    pub verify_indices: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            first_temp_vertex_id: -1,
            first_temp_edge_id: -1,
            auto_begin: true,
            cascade_vertex_delete: true,
            verify_indices: false,
        }
    }
}

impl SessionConfig {
    /// Config for testing (explicit transactions, index checks on).
    pub fn for_testing() -> Self {
        Self {
            auto_begin: false,
            verify_indices: true,
            ..Self::default()
        }
    }
}
