use serde::{Deserialize, Serialize};

use crate::utils;

/// Deferred write categories the offline queue can carry.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, strum::AsRefStr, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OperationKind {
    NodePosition,
    EdgeCreate,
    EdgeReconnect,
    EdgeTooltip,
    LabelPosition,
}

/// One deferred write, persisted as pure data.
///
/// Nothing executable is ever stored; at replay time the operation kind is
/// resolved to a handler through the registry, so a queue restored from
/// disk after a restart replays exactly like a fresh one.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PendingOperation {
    pub id: String,
    pub kind: OperationKind,
    pub entity_id: String,
    /// creation time, unix millis
    pub timestamp: i64,
    pub payload: serde_json::Value,
}

impl PendingOperation {
    pub fn new(
        kind: OperationKind,
        entity_id: &str,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: utils::longid(),
            kind,
            entity_id: entity_id.to_string(),
            timestamp: utils::time::time_millis(),
            payload,
        }
    }
}
