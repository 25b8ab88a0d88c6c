use std::fmt;

use serde::{Deserialize, Serialize};

/// session id
pub type SessionId = String;

/// Which aspect of the diagram a sync key addresses.
///
/// Labels are tracked separately from their edge: repositioning a label and
/// rewiring the edge are independent mutations with independent lifecycles.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, strum::AsRefStr, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EntityKind {
    Node,
    Edge,
    Label,
}

/// Key of one mutable entity inside a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub id: String,
}

impl EntityKey {
    pub fn node(id: &str) -> Self {
        Self {
            kind: EntityKind::Node,
            id: id.to_string(),
        }
    }

    pub fn edge(id: &str) -> Self {
        Self {
            kind: EntityKind::Edge,
            id: id.to_string(),
        }
    }

    pub fn label(id: &str) -> Self {
        Self {
            kind: EntityKind::Label,
            id: id.to_string(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_ref(), self.id)
    }
}

/// Synchronization state of one mutable entity.
///
/// `Clean -> Pending -> Saving -> {Clean | Queued | RolledBack}`;
/// `Queued -> Saving` once connectivity returns and the offline queue
/// drains to the entity; `RolledBack -> Clean` the moment the original
/// value is restored (restoration is synchronous, so `Clean` is the
/// observable resting state after a rejection).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum EntityState {
    #[default]
    Clean,
    Pending,
    Saving,
    Queued,
    RolledBack,
}

impl EntityState {
    /// Whether a persistence attempt is outstanding in any form.
    pub fn is_busy(&self) -> bool {
        matches!(self, EntityState::Pending | EntityState::Saving | EntityState::Queued)
    }
}
