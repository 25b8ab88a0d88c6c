//! HTTP implementation of the remote persistence API.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::{
    Result, ToposyncError,
    config::RemoteConfig,
    model::{DiagramEdge, DiagramModel, Position},
    remote::{EdgeEndpoints, LabelPositionsPatch, RemoteApi, RemoteError, RemoteResult, TooltipPatch},
};

/// reqwest-backed client against the dashboard's REST API.
pub struct HttpRemoteApi {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

impl HttpRemoteApi {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ToposyncError::Remote(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(
        &self,
        path: &str,
    ) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn map_transport(error: reqwest::Error) -> RemoteError {
        RemoteError::Transport(error.to_string())
    }

    /// Treat any reachable-server response that is not 2xx as a rejection,
    /// preferring the server-provided message.
    async fn check(response: reqwest::Response) -> RemoteResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = match response.json::<ErrorBody>().await {
            Ok(body) => body.message,
            Err(_) => status.canonical_reason().unwrap_or("request rejected").to_string(),
        };

        Err(RemoteError::Rejected {
            status: status.as_u16(),
            message,
        })
    }

    async fn send_json(
        &self,
        request: reqwest::RequestBuilder,
    ) -> RemoteResult<()> {
        let response = request.send().await.map_err(Self::map_transport)?;
        Self::check(response).await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteApi for HttpRemoteApi {
    async fn patch_node_position(
        &self,
        node_id: &str,
        position: &Position,
    ) -> RemoteResult<()> {
        self.send_json(self.client.patch(self.url(&format!("nodes/{}/position", node_id))).json(position)).await
    }

    async fn patch_edge_reconnect(
        &self,
        edge_id: &str,
        endpoints: &EdgeEndpoints,
    ) -> RemoteResult<()> {
        self.send_json(self.client.patch(self.url(&format!("edges/{}/reconnect", edge_id))).json(endpoints)).await
    }

    async fn patch_edge_tooltip(
        &self,
        edge_id: &str,
        patch: &TooltipPatch,
    ) -> RemoteResult<()> {
        self.send_json(self.client.patch(self.url(&format!("edges/{}/tooltip", edge_id))).json(patch)).await
    }

    async fn create_edge(
        &self,
        diagram_id: &str,
        edge: &DiagramEdge,
    ) -> RemoteResult<()> {
        self.send_json(self.client.post(self.url(&format!("diagrams/{}/edges", diagram_id))).json(edge)).await
    }

    async fn patch_label_positions(
        &self,
        diagram_id: &str,
        patch: &LabelPositionsPatch,
    ) -> RemoteResult<()> {
        self.send_json(self.client.patch(self.url(&format!("diagrams/{}/label-positions", diagram_id))).json(patch)).await
    }

    async fn fetch_diagram(
        &self,
        diagram_id: &str,
    ) -> RemoteResult<DiagramModel> {
        let response = self.client.get(self.url(&format!("diagrams/{}", diagram_id))).send().await.map_err(Self::map_transport)?;
        let response = Self::check(response).await?;
        response.json::<DiagramModel>().await.map_err(|e| RemoteError::Convert(e.to_string()))
    }
}
