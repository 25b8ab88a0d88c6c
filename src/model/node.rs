use serde::{Deserialize, Serialize};

use crate::model::Position;

/// node id
pub type NodeId = String;

/// Equipment category of a diagram node.
///
/// The category is decoded once, at the boundary where the attached entity
/// payload enters the system; anything that does not decode cleanly lands in
/// `Unknown` rather than being re-probed downstream.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, strum::AsRefStr, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NodeKind {
    Satellite,
    Antenna,
    Receiver,
    Modulator,
    Amplifier,
    Combiner,
    Channel,
    #[default]
    Unknown,
}

#[derive(Deserialize)]
struct EntityProbe {
    category: String,
}

impl NodeKind {
    /// Decode an equipment category from an attached-entity payload.
    ///
    /// Fails closed: a missing or unrecognized `category` field yields
    /// `Unknown`, never an error.
    pub fn decode(payload: &serde_json::Value) -> NodeKind {
        match serde_json::from_value::<EntityProbe>(payload.clone()) {
            Ok(probe) => probe.category.parse().unwrap_or_default(),
            Err(_) => NodeKind::Unknown,
        }
    }
}

/// A node of the topology diagram.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiagramNode {
    /// node id
    pub id: NodeId,
    /// canvas position
    pub position: Position,
    /// equipment category, decoded from the attached entity
    #[serde(default)]
    pub kind: NodeKind,
    /// id of the attached metadata entity
    pub entity_id: String,
    /// set while a local mutation has not been confirmed remotely
    #[serde(default)]
    pub pending_save: bool,
}
