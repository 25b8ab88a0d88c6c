use std::sync::Arc;

use tokio::runtime::Handle;

use crate::{
    Result,
    config::Config,
    events::{SessionChannel, SessionEvents, SubscribeOptions},
    model::{DiagramModel, EdgeDirection, EdgeId, Position},
    queue::{PendingOperation, QueueStore},
    remote::RemoteApi,
    session::{EntityKey, EntityState, SessionId, SyncOrchestrator},
    utils,
};

/// An open synchronization session for one diagram.
///
/// Construction wires up the notification channel and the orchestrator and
/// starts the persistence loop; `teardown` stops both. All sync state lives
/// inside this instance and dies with it.
pub struct Session {
    id: SessionId,
    orchestrator: SyncOrchestrator,
    channel: Arc<SessionChannel>,
}

impl Session {
    pub(crate) fn new(
        model: DiagramModel,
        remote: Arc<dyn RemoteApi>,
        store: Arc<dyn QueueStore>,
        config: &Config,
        runtime: Handle,
    ) -> Result<Arc<Session>> {
        let sid = utils::longid();

        let channel = Arc::new(SessionChannel::new(runtime.clone()));
        channel.listen();

        let orchestrator = SyncOrchestrator::new(sid.clone(), model, remote, store, channel.clone(), config, runtime)?;
        orchestrator.launch();

        Ok(Arc::new(Session {
            id: sid,
            orchestrator,
            channel,
        }))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn diagram_id(&self) -> String {
        self.orchestrator.diagram_id()
    }

    /// Subscribe to settlement notifications, filtered by glob patterns.
    pub fn events(
        &self,
        options: SubscribeOptions,
    ) -> SessionEvents {
        SessionEvents::channel(self.channel.clone(), options)
    }

    /// Move a node; coalesced and persisted on quiescence.
    pub fn move_node(
        &self,
        node_id: &str,
        position: Position,
    ) -> Result<()> {
        self.orchestrator.move_node(node_id, position)
    }

    /// Create an edge between two nodes, allocating ports synchronously.
    pub fn connect(
        &self,
        source_id: &str,
        target_id: &str,
        direction: EdgeDirection,
        label: &str,
    ) -> Result<EdgeId> {
        self.orchestrator.connect(source_id, target_id, direction, label)
    }

    /// Rewire an edge; rejected while a reconnect for it is still saving.
    pub fn reconnect_edge(
        &self,
        edge_id: &str,
        new_source: &str,
        new_target: &str,
    ) -> Result<()> {
        self.orchestrator.reconnect_edge(edge_id, new_source, new_target)
    }

    /// Edit an edge tooltip; coalesced and persisted on quiescence.
    pub fn set_edge_tooltip(
        &self,
        edge_id: &str,
        tooltip_title: &str,
        tooltip: &str,
    ) -> Result<()> {
        self.orchestrator.set_edge_tooltip(edge_id, tooltip_title, tooltip)
    }

    /// Reposition an edge label; coalesced and persisted on quiescence.
    pub fn move_label(
        &self,
        edge_id: &str,
        position: Position,
    ) -> Result<()> {
        self.orchestrator.move_label(edge_id, position)
    }

    /// Delete a node, its incident edges and all their outstanding work.
    pub fn delete_node(
        &self,
        node_id: &str,
    ) -> Result<()> {
        self.orchestrator.delete_node(node_id)
    }

    /// Delete an edge and all its outstanding work.
    pub fn delete_edge(
        &self,
        edge_id: &str,
    ) -> Result<()> {
        self.orchestrator.delete_edge(edge_id)
    }

    /// Persist the pending mutation for `key` immediately; no-op when
    /// nothing is pending.
    pub fn flush(
        &self,
        key: &EntityKey,
    ) -> bool {
        self.orchestrator.flush(key)
    }

    /// Report host connectivity; the offline-to-online transition triggers
    /// a queue replay.
    pub fn set_connectivity(
        &self,
        online: bool,
    ) {
        self.orchestrator.set_connectivity(online)
    }

    /// Current local diagram, optimistic values included.
    pub fn snapshot(&self) -> DiagramModel {
        self.orchestrator.snapshot()
    }

    pub fn entity_state(
        &self,
        key: &EntityKey,
    ) -> EntityState {
        self.orchestrator.entity_state(key)
    }

    /// Operations currently queued for replay, oldest first.
    pub fn pending_operations(&self) -> Vec<PendingOperation> {
        self.orchestrator.pending_operations()
    }

    /// Stop the persistence loop and cancel all outstanding timers.
    pub fn teardown(&self) {
        self.orchestrator.teardown();
        self.channel.shutdown();
    }
}
