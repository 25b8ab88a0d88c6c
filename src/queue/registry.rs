//! Replay-time resolution of queued operations.
//!
//! A queued record carries only data. At replay time its kind is mapped to
//! a handler which validates the payload against a JSON Schema, decodes it,
//! and issues the corresponding remote call.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;

use crate::{
    Result, ToposyncError,
    model::{DiagramEdge, Position},
    queue::{OperationKind, PendingOperation},
    remote::{EdgeEndpoints, LabelPositionsPatch, RemoteApi, TooltipPatch},
};

const HANDLE_PATTERN: &str = r"^(in|out)-(left|right|top|bottom)-([1-9]\d*)$";

/// Executes one category of queued operation.
#[async_trait]
pub trait OperationHandler: Send + Sync {
    fn kind(&self) -> OperationKind;

    /// JSON Schema the payload must satisfy before replay.
    fn schema(&self) -> serde_json::Value;

    async fn replay(
        &self,
        op: &PendingOperation,
    ) -> Result<()>;
}

/// Maps operation kinds to their handlers.
pub struct HandlerRegistry {
    handlers: HashMap<OperationKind, Box<dyn OperationHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registry with the five standard handlers wired to `remote`.
    pub fn standard(
        remote: Arc<dyn RemoteApi>,
        diagram_id: &str,
    ) -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(NodePositionHandler {
            remote: remote.clone(),
        }));
        registry.register(Box::new(EdgeCreateHandler {
            remote: remote.clone(),
            diagram_id: diagram_id.to_string(),
        }));
        registry.register(Box::new(EdgeReconnectHandler {
            remote: remote.clone(),
        }));
        registry.register(Box::new(EdgeTooltipHandler {
            remote: remote.clone(),
        }));
        registry.register(Box::new(LabelPositionHandler {
            remote,
            diagram_id: diagram_id.to_string(),
        }));
        registry
    }

    pub fn register(
        &mut self,
        handler: Box<dyn OperationHandler>,
    ) {
        self.handlers.insert(handler.kind(), handler);
    }

    /// Validate and execute one queued operation.
    pub async fn replay(
        &self,
        op: &PendingOperation,
    ) -> Result<()> {
        let handler = self.handlers.get(&op.kind).ok_or_else(|| ToposyncError::Queue(format!("no handler registered for operation kind '{}'", op.kind.as_ref())))?;

        let schema = handler.schema();
        jsonschema::validate(&schema, &op.payload)?;

        handler.replay(op).await
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

struct NodePositionHandler {
    remote: Arc<dyn RemoteApi>,
}

#[async_trait]
impl OperationHandler for NodePositionHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::NodePosition
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["x", "y"],
            "properties": {
                "x": { "type": "number" },
                "y": { "type": "number" }
            }
        })
    }

    async fn replay(
        &self,
        op: &PendingOperation,
    ) -> Result<()> {
        let position = serde_json::from_value::<Position>(op.payload.clone())?;
        self.remote.patch_node_position(&op.entity_id, &position).await?;
        Ok(())
    }
}

struct EdgeCreateHandler {
    remote: Arc<dyn RemoteApi>,
    diagram_id: String,
}

#[async_trait]
impl OperationHandler for EdgeCreateHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::EdgeCreate
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["id", "source", "target", "source_handle", "target_handle"],
            "properties": {
                "id": { "type": "string", "minLength": 1 },
                "source": { "type": "string", "minLength": 1 },
                "target": { "type": "string", "minLength": 1 },
                "source_handle": { "type": "string", "pattern": HANDLE_PATTERN },
                "target_handle": { "type": "string", "pattern": HANDLE_PATTERN },
                "direction": { "type": "string", "enum": ["ida", "vuelta", "bi"] }
            }
        })
    }

    async fn replay(
        &self,
        op: &PendingOperation,
    ) -> Result<()> {
        let edge = serde_json::from_value::<DiagramEdge>(op.payload.clone())?;
        self.remote.create_edge(&self.diagram_id, &edge).await?;
        Ok(())
    }
}

struct EdgeReconnectHandler {
    remote: Arc<dyn RemoteApi>,
}

#[async_trait]
impl OperationHandler for EdgeReconnectHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::EdgeReconnect
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["source", "target", "source_handle", "target_handle"],
            "properties": {
                "source": { "type": "string", "minLength": 1 },
                "target": { "type": "string", "minLength": 1 },
                "source_handle": { "type": "string", "pattern": HANDLE_PATTERN },
                "target_handle": { "type": "string", "pattern": HANDLE_PATTERN }
            }
        })
    }

    async fn replay(
        &self,
        op: &PendingOperation,
    ) -> Result<()> {
        let endpoints = serde_json::from_value::<EdgeEndpoints>(op.payload.clone())?;
        self.remote.patch_edge_reconnect(&op.entity_id, &endpoints).await?;
        Ok(())
    }
}

struct EdgeTooltipHandler {
    remote: Arc<dyn RemoteApi>,
}

#[async_trait]
impl OperationHandler for EdgeTooltipHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::EdgeTooltip
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["tooltip_title", "tooltip"],
            "properties": {
                "tooltip_title": { "type": "string" },
                "tooltip": { "type": "string" }
            }
        })
    }

    async fn replay(
        &self,
        op: &PendingOperation,
    ) -> Result<()> {
        let patch = serde_json::from_value::<TooltipPatch>(op.payload.clone())?;
        self.remote.patch_edge_tooltip(&op.entity_id, &patch).await?;
        Ok(())
    }
}

struct LabelPositionHandler {
    remote: Arc<dyn RemoteApi>,
    diagram_id: String,
}

#[async_trait]
impl OperationHandler for LabelPositionHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::LabelPosition
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["x", "y"],
            "properties": {
                "x": { "type": "number" },
                "y": { "type": "number" }
            }
        })
    }

    async fn replay(
        &self,
        op: &PendingOperation,
    ) -> Result<()> {
        let position = serde_json::from_value::<Position>(op.payload.clone())?;
        self.remote.patch_label_positions(&self.diagram_id, &LabelPositionsPatch::single(&op.entity_id, position)).await?;
        Ok(())
    }
}
