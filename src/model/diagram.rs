use serde::{Deserialize, Serialize};

use crate::{
    Result, ToposyncError,
    model::{DiagramEdge, DiagramNode},
};

/// A complete topology diagram as loaded from the remote store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiagramModel {
    pub id: String,
    #[serde(default)]
    pub nodes: Vec<DiagramNode>,
    #[serde(default)]
    pub edges: Vec<DiagramEdge>,
}

impl DiagramModel {
    pub fn from_json(s: &str) -> Result<Self> {
        let diagram = serde_json::from_str::<DiagramModel>(s);
        match diagram {
            Ok(v) => Ok(v),
            Err(e) => Err(ToposyncError::Model(format!("{}", e))),
        }
    }
}
