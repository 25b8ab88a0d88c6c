//! Remote persistence API.
//!
//! The core never talks HTTP directly; it calls this trait. Operations are
//! idempotent on the server and delivered at-least-once, so a replayed
//! queue entry is safe. Errors carry their classification: transport
//! failures are recoverable (queue and replay later), rejections are not
//! (roll the optimistic value back).

mod http;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{DiagramEdge, DiagramModel, HandleId, Position};

pub use http::HttpRemoteApi;

/// Result type alias for remote operations.
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Remote failure, pre-classified for the orchestrator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteError {
    /// The server was never reached: no network, connect failure, timeout.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The server refused the mutation.
    #[error("rejected ({status}): {message}")]
    Rejected {
        status: u16,
        message: String,
    },

    /// The server answered with a body this crate cannot decode.
    #[error("bad response: {0}")]
    Convert(String),
}

impl RemoteError {
    /// Recoverable by replaying once connectivity returns.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, RemoteError::Transport(_))
    }
}

impl From<RemoteError> for crate::ToposyncError {
    fn from(error: RemoteError) -> Self {
        crate::ToposyncError::Remote(error.to_string())
    }
}

/// New endpoints for a reconnected edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeEndpoints {
    pub source: String,
    pub target: String,
    pub source_handle: HandleId,
    pub target_handle: HandleId,
}

/// Tooltip text patch for an edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TooltipPatch {
    pub tooltip_title: String,
    pub tooltip: String,
}

/// Per-diagram label position overrides, keyed by edge id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LabelPositionsPatch {
    pub label_positions: LabelPositionEdges,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LabelPositionEdges {
    pub edges: HashMap<String, LabelPositionEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelPositionEntry {
    pub label_position: Position,
}

impl LabelPositionsPatch {
    /// Patch carrying a single edge's override.
    pub fn single(
        edge_id: &str,
        position: Position,
    ) -> Self {
        let mut edges = HashMap::new();
        edges.insert(
            edge_id.to_string(),
            LabelPositionEntry {
                label_position: position,
            },
        );
        Self {
            label_positions: LabelPositionEdges {
                edges,
            },
        }
    }
}

/// Remote persistence operations consumed by the synchronization core.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn patch_node_position(
        &self,
        node_id: &str,
        position: &Position,
    ) -> RemoteResult<()>;

    async fn patch_edge_reconnect(
        &self,
        edge_id: &str,
        endpoints: &EdgeEndpoints,
    ) -> RemoteResult<()>;

    async fn patch_edge_tooltip(
        &self,
        edge_id: &str,
        patch: &TooltipPatch,
    ) -> RemoteResult<()>;

    async fn create_edge(
        &self,
        diagram_id: &str,
        edge: &DiagramEdge,
    ) -> RemoteResult<()>;

    async fn patch_label_positions(
        &self,
        diagram_id: &str,
        patch: &LabelPositionsPatch,
    ) -> RemoteResult<()>;

    /// Initial load; seed state for a session.
    async fn fetch_diagram(
        &self,
        diagram_id: &str,
    ) -> RemoteResult<DiagramModel>;
}
