use serde::{Deserialize, Serialize};

use crate::model::{HandleId, NodeId, Position};

/// edge id
pub type EdgeId = String;

/// Signal direction an edge represents.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, strum::AsRefStr, strum::EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EdgeDirection {
    /// forward path
    #[default]
    Ida,
    /// return path
    Vuelta,
    /// bidirectional
    Bi,
}

/// A directed connection between two node ports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagramEdge {
    /// edge id
    pub id: EdgeId,
    /// source node id
    pub source: NodeId,
    /// target node id
    pub target: NodeId,
    /// out-handle occupied on the source node
    pub source_handle: HandleId,
    /// in-handle occupied on the target node
    pub target_handle: HandleId,
    /// signal direction
    #[serde(default)]
    pub direction: EdgeDirection,
    /// rendered label text
    #[serde(default)]
    pub label: String,
    /// hover tooltip title
    #[serde(default)]
    pub tooltip_title: String,
    /// hover tooltip body
    #[serde(default)]
    pub tooltip: String,
    /// manual label position override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_position: Option<Position>,
    /// set while a local mutation has not been confirmed remotely
    #[serde(default)]
    pub pending_save: bool,
}
