//! Per-entity synchronization state machine.
//!
//! The orchestrator is responsible for:
//! - Applying gestures optimistically and snapshotting baselines
//! - Coalescing continuous gestures through the mutation scheduler
//! - Driving retry-wrapped remote persistence on quiescence
//! - Classifying failures into queue-for-replay versus rollback
//! - Guarding edges against overlapping reconnects
//! - Suppressing late callbacks for deleted entities

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::runtime::Handle;
use tracing::{debug, trace, warn};

use crate::{
    Result, ToposyncError,
    allocator::HandleAllocator,
    common::{Queue, Shutdown},
    config::Config,
    events::{Event, Notification, SessionChannel, SessionMessage},
    model::{DiagramEdge, DiagramModel, EdgeDirection, EdgeId, HandleId, Position, Topology, occupied_source_handles, occupied_target_handles},
    optimistic::{OptimisticStore, Snapshot},
    queue::{HandlerRegistry, OfflineQueue, OperationKind, PendingOperation, QueueStore},
    remote::{EdgeEndpoints, LabelPositionsPatch, RemoteApi, RemoteError, TooltipPatch},
    retry::{RetryPolicy, with_retry},
    scheduler::MutationScheduler,
    session::{EntityKey, EntityKind, EntityState, SessionId},
    utils,
};

const MUTATION_QUEUE_SIZE: usize = 1024;

/// One deferred persistence unit for one entity.
#[derive(Debug, Clone)]
pub(crate) enum SaveOp {
    NodePosition {
        position: Position,
    },
    EdgeCreate {
        edge: DiagramEdge,
    },
    EdgeReconnect {
        endpoints: EdgeEndpoints,
    },
    EdgeTooltip {
        patch: TooltipPatch,
    },
    LabelPosition {
        position: Position,
    },
}

impl SaveOp {
    fn kind(&self) -> OperationKind {
        match self {
            SaveOp::NodePosition { .. } => OperationKind::NodePosition,
            SaveOp::EdgeCreate { .. } => OperationKind::EdgeCreate,
            SaveOp::EdgeReconnect { .. } => OperationKind::EdgeReconnect,
            SaveOp::EdgeTooltip { .. } => OperationKind::EdgeTooltip,
            SaveOp::LabelPosition { .. } => OperationKind::LabelPosition,
        }
    }

    /// Serialize into a pure-data queue record.
    fn to_pending(
        &self,
        key: &EntityKey,
    ) -> Result<PendingOperation> {
        let payload = match self {
            SaveOp::NodePosition { position } => serde_json::to_value(position)?,
            SaveOp::EdgeCreate { edge } => serde_json::to_value(edge)?,
            SaveOp::EdgeReconnect { endpoints } => serde_json::to_value(endpoints)?,
            SaveOp::EdgeTooltip { patch } => serde_json::to_value(patch)?,
            SaveOp::LabelPosition { position } => serde_json::to_value(position)?,
        };
        Ok(PendingOperation::new(self.kind(), &key.id, payload))
    }
}

/// Undo record for one optimistically applied gesture.
enum Baseline {
    Node(Snapshot<crate::model::DiagramNode>),
    Edge(Snapshot<DiagramEdge>),
    /// The edge did not exist before the gesture; undo removes it.
    CreatedEdge(EdgeId),
}

/// All mutable session state, behind one lock that is never held across an
/// await point.
struct Shared {
    diagram: DiagramModel,
    states: HashMap<EntityKey, EntityState>,
    baselines: HashMap<EntityKey, Baseline>,
    reconnect_locks: HashSet<EdgeId>,
    /// Bumped on entity deletion; a save completion carrying a stale epoch
    /// is discarded instead of resurrecting bookkeeping.
    epochs: HashMap<EntityKey, u64>,
}

struct OrchestratorInner {
    sid: SessionId,
    diagram_id: String,
    runtime: Handle,
    remote: Arc<dyn RemoteApi>,
    allocator: HandleAllocator,
    retry: RetryPolicy,
    scheduler: MutationScheduler<EntityKey, SaveOp>,
    mutations: Arc<Queue<(EntityKey, SaveOp)>>,
    queue: Arc<OfflineQueue>,
    channel: Arc<SessionChannel>,
    shared: Mutex<Shared>,
    shutdown: Arc<Shutdown>,
}

/// Per-session synchronization core.
pub(crate) struct SyncOrchestrator {
    inner: Arc<OrchestratorInner>,
}

impl SyncOrchestrator {
    pub(crate) fn new(
        sid: SessionId,
        model: DiagramModel,
        remote: Arc<dyn RemoteApi>,
        store: Arc<dyn QueueStore>,
        channel: Arc<SessionChannel>,
        config: &Config,
        runtime: Handle,
    ) -> Result<Self> {
        // reject seed state with dangling endpoints up front
        Topology::from_model(&model)?;

        let mutations = Queue::new(MUTATION_QUEUE_SIZE);
        let scheduler = MutationScheduler::new(Duration::from_millis(config.debounce.delay_ms), runtime.clone(), mutations.clone());
        let registry = HandlerRegistry::standard(remote.clone(), &model.id);
        let queue = Arc::new(OfflineQueue::new(&model.id, store, registry, config.queue.dedup_window_ms)?);

        Ok(Self {
            inner: Arc::new(OrchestratorInner {
                sid,
                diagram_id: model.id.clone(),
                runtime,
                remote,
                allocator: HandleAllocator::new(config.ports),
                retry: config.retry.into(),
                scheduler,
                mutations,
                queue,
                channel,
                shared: Mutex::new(Shared {
                    diagram: model,
                    states: HashMap::new(),
                    baselines: HashMap::new(),
                    reconnect_locks: HashSet::new(),
                    epochs: HashMap::new(),
                }),
                shutdown: Arc::new(Shutdown::new()),
            }),
        })
    }

    /// Start the persistence loop and, when a restored queue is waiting,
    /// kick off the startup replay.
    pub(crate) fn launch(&self) {
        let inner = self.inner.clone();
        self.inner.runtime.spawn(async move {
            loop {
                tokio::select! {
                    _ = inner.shutdown.wait() => break,
                    Some((key, op)) = inner.mutations.next_async() => {
                        OrchestratorInner::begin_save(&inner, key, op);
                    }
                }
            }
        });

        if self.inner.queue.is_online() && !self.inner.queue.is_empty() {
            debug!("session {} starting with {} restored operations", self.inner.sid, self.inner.queue.len());
            let inner = self.inner.clone();
            self.inner.runtime.spawn(async move {
                OrchestratorInner::process_offline(&inner).await;
            });
        }
    }

    /// Move a node; coalesced and persisted on quiescence.
    pub fn move_node(
        &self,
        node_id: &str,
        position: Position,
    ) -> Result<()> {
        let key = EntityKey::node(node_id);
        {
            let mut guard = self.inner.shared.lock().unwrap();
            let shared = &mut *guard;

            let snapshot = OptimisticStore::apply(&mut shared.diagram.nodes, node_id, |n| {
                let mut next = n.clone();
                next.position = position;
                next.pending_save = true;
                next
            })?;
            // first gesture of a burst owns the rollback baseline
            shared.baselines.entry(key.clone()).or_insert(Baseline::Node(snapshot));
            shared.states.insert(key.clone(), EntityState::Pending);
        }

        trace!("move_node({}) -> ({}, {})", node_id, position.x, position.y);
        self.inner.scheduler.schedule(
            key,
            SaveOp::NodePosition {
                position,
            },
        );
        Ok(())
    }

    /// Edit an edge tooltip; coalesced and persisted on quiescence.
    pub fn set_edge_tooltip(
        &self,
        edge_id: &str,
        tooltip_title: &str,
        tooltip: &str,
    ) -> Result<()> {
        let key = EntityKey::edge(edge_id);
        {
            let mut guard = self.inner.shared.lock().unwrap();
            let shared = &mut *guard;

            let snapshot = OptimisticStore::apply(&mut shared.diagram.edges, edge_id, |e| {
                let mut next = e.clone();
                next.tooltip_title = tooltip_title.to_string();
                next.tooltip = tooltip.to_string();
                next.pending_save = true;
                next
            })?;
            shared.baselines.entry(key.clone()).or_insert(Baseline::Edge(snapshot));
            shared.states.insert(key.clone(), EntityState::Pending);
        }

        self.inner.scheduler.schedule(
            key,
            SaveOp::EdgeTooltip {
                patch: TooltipPatch {
                    tooltip_title: tooltip_title.to_string(),
                    tooltip: tooltip.to_string(),
                },
            },
        );
        Ok(())
    }

    /// Reposition an edge label; coalesced and persisted on quiescence.
    pub fn move_label(
        &self,
        edge_id: &str,
        position: Position,
    ) -> Result<()> {
        let key = EntityKey::label(edge_id);
        {
            let mut guard = self.inner.shared.lock().unwrap();
            let shared = &mut *guard;

            let snapshot = OptimisticStore::apply(&mut shared.diagram.edges, edge_id, |e| {
                let mut next = e.clone();
                next.label_position = Some(position);
                next.pending_save = true;
                next
            })?;
            shared.baselines.entry(key.clone()).or_insert(Baseline::Edge(snapshot));
            shared.states.insert(key.clone(), EntityState::Pending);
        }

        self.inner.scheduler.schedule(
            key,
            SaveOp::LabelPosition {
                position,
            },
        );
        Ok(())
    }

    /// Create an edge between two nodes. Ports are allocated synchronously
    /// before anything is applied; a saturated pair of nodes rejects the
    /// gesture without touching local state or the network.
    pub fn connect(
        &self,
        source_id: &str,
        target_id: &str,
        direction: EdgeDirection,
        label: &str,
    ) -> Result<EdgeId> {
        let (key, edge) = {
            let mut guard = self.inner.shared.lock().unwrap();
            let shared = &mut *guard;

            let source = shared.diagram.nodes.iter().find(|n| n.id == source_id).ok_or_else(|| ToposyncError::Model(format!("source node {} not found", source_id)))?;
            let target = shared.diagram.nodes.iter().find(|n| n.id == target_id).ok_or_else(|| ToposyncError::Model(format!("target node {} not found", target_id)))?;

            let used_source = occupied_source_handles(&shared.diagram.edges, source_id, None);
            let used_target = occupied_target_handles(&shared.diagram.edges, target_id, None);

            let (source_handle, target_handle) = self
                .inner
                .allocator
                .resolve(source, target, &used_source, &used_target)
                .ok_or_else(|| ToposyncError::Allocation(format!("no free port for a connection from {} to {}", source_id, target_id)))?;
            validate_handles(&source_handle, &target_handle)?;

            let edge = DiagramEdge {
                id: utils::longid(),
                source: source_id.to_string(),
                target: target_id.to_string(),
                source_handle,
                target_handle,
                direction,
                label: label.to_string(),
                tooltip_title: String::new(),
                tooltip: String::new(),
                label_position: None,
                pending_save: true,
            };
            shared.diagram.edges.push(edge.clone());

            let key = EntityKey::edge(&edge.id);
            shared.baselines.insert(key.clone(), Baseline::CreatedEdge(edge.id.clone()));
            shared.states.insert(key.clone(), EntityState::Pending);
            (key, edge)
        };

        debug!("connect {} -> {} as edge {}", source_id, target_id, edge.id);
        let edge_id = edge.id.clone();
        // a discrete gesture; no debounce window to wait out
        OrchestratorInner::begin_save(
            &self.inner,
            key,
            SaveOp::EdgeCreate {
                edge,
            },
        );
        Ok(edge_id)
    }

    /// Rewire an existing edge to new endpoints. Rejected immediately when
    /// a reconnect for the same edge is still saving.
    pub fn reconnect_edge(
        &self,
        edge_id: &str,
        new_source: &str,
        new_target: &str,
    ) -> Result<()> {
        let key = EntityKey::edge(edge_id);
        let endpoints = {
            let mut guard = self.inner.shared.lock().unwrap();
            let shared = &mut *guard;

            if shared.reconnect_locks.contains(edge_id) {
                return Err(ToposyncError::Session(format!("edge {} is still saving a reconnect; gesture rejected", edge_id)));
            }

            let source = shared.diagram.nodes.iter().find(|n| n.id == new_source).ok_or_else(|| ToposyncError::Model(format!("source node {} not found", new_source)))?;
            let target = shared.diagram.nodes.iter().find(|n| n.id == new_target).ok_or_else(|| ToposyncError::Model(format!("target node {} not found", new_target)))?;

            // the moving edge may reclaim its own prior ports
            let used_source = occupied_source_handles(&shared.diagram.edges, new_source, Some(edge_id));
            let used_target = occupied_target_handles(&shared.diagram.edges, new_target, Some(edge_id));

            let (source_handle, target_handle) = self
                .inner
                .allocator
                .resolve(source, target, &used_source, &used_target)
                .ok_or_else(|| ToposyncError::Allocation(format!("no free port to reconnect edge {} from {} to {}", edge_id, new_source, new_target)))?;
            validate_handles(&source_handle, &target_handle)?;

            let endpoints = EdgeEndpoints {
                source: new_source.to_string(),
                target: new_target.to_string(),
                source_handle: source_handle.clone(),
                target_handle: target_handle.clone(),
            };

            let snapshot = OptimisticStore::apply(&mut shared.diagram.edges, edge_id, |e| {
                let mut next = e.clone();
                next.source = endpoints.source.clone();
                next.target = endpoints.target.clone();
                next.source_handle = source_handle.clone();
                next.target_handle = target_handle.clone();
                next.pending_save = true;
                next
            })?;
            shared.baselines.entry(key.clone()).or_insert(Baseline::Edge(snapshot));
            shared.reconnect_locks.insert(edge_id.to_string());
            shared.states.insert(key.clone(), EntityState::Pending);
            endpoints
        };

        debug!("reconnect edge {} -> {}/{}", edge_id, new_source, new_target);
        OrchestratorInner::begin_save(
            &self.inner,
            key,
            SaveOp::EdgeReconnect {
                endpoints,
            },
        );
        Ok(())
    }

    /// Delete a node and its incident edges, cancelling all outstanding
    /// work for them.
    pub fn delete_node(
        &self,
        node_id: &str,
    ) -> Result<()> {
        let keys = {
            let mut guard = self.inner.shared.lock().unwrap();
            let shared = &mut *guard;

            let topology = Topology::from_model(&shared.diagram)?;
            if !topology.contains_node(node_id) {
                return Err(ToposyncError::Model(format!("node {} not found", node_id)));
            }
            let incident = topology.incident_edges(node_id);

            shared.diagram.nodes.retain(|n| n.id != node_id);
            shared.diagram.edges.retain(|e| !incident.contains(&e.id));

            let mut keys = vec![EntityKey::node(node_id)];
            for edge_id in &incident {
                keys.push(EntityKey::edge(edge_id));
                keys.push(EntityKey::label(edge_id));
            }
            for key in &keys {
                drop_bookkeeping(shared, key);
            }
            keys
        };

        debug!("delete node {} (+{} bookkeeping keys)", node_id, keys.len() - 1);
        self.cancel_outstanding(&keys)?;
        Ok(())
    }

    /// Delete an edge, cancelling all outstanding work for it.
    pub fn delete_edge(
        &self,
        edge_id: &str,
    ) -> Result<()> {
        let keys = {
            let mut guard = self.inner.shared.lock().unwrap();
            let shared = &mut *guard;

            let before = shared.diagram.edges.len();
            shared.diagram.edges.retain(|e| e.id != edge_id);
            if shared.diagram.edges.len() == before {
                return Err(ToposyncError::Model(format!("edge {} not found", edge_id)));
            }

            let keys = vec![EntityKey::edge(edge_id), EntityKey::label(edge_id)];
            for key in &keys {
                drop_bookkeeping(shared, key);
            }
            keys
        };

        debug!("delete edge {}", edge_id);
        self.cancel_outstanding(&keys)?;
        Ok(())
    }

    /// Persist the pending mutation for `key` right now, skipping the rest
    /// of the debounce window. No-op when nothing is pending.
    pub fn flush(
        &self,
        key: &EntityKey,
    ) -> bool {
        self.inner.scheduler.flush(key)
    }

    /// Host-reported connectivity. The offline-to-online transition
    /// triggers a queue replay.
    pub fn set_connectivity(
        &self,
        online: bool,
    ) {
        let transitioned = self.inner.queue.set_online(online);
        debug!("session {} connectivity: online={}", self.sid(), online);

        if transitioned {
            let inner = self.inner.clone();
            self.inner.runtime.spawn(async move {
                OrchestratorInner::process_offline(&inner).await;
            });
        }
    }

    /// Current local diagram, optimistic values included.
    pub fn snapshot(&self) -> DiagramModel {
        self.inner.shared.lock().unwrap().diagram.clone()
    }

    pub fn entity_state(
        &self,
        key: &EntityKey,
    ) -> EntityState {
        self.inner.shared.lock().unwrap().states.get(key).copied().unwrap_or_default()
    }

    /// Operations currently queued for replay, oldest first.
    pub fn pending_operations(&self) -> Vec<PendingOperation> {
        self.inner.queue.pending()
    }

    pub fn diagram_id(&self) -> String {
        self.inner.diagram_id.clone()
    }

    pub fn sid(&self) -> SessionId {
        self.inner.sid.clone()
    }

    /// Stop the persistence loop, cancel every timer and drop all locks.
    pub(crate) fn teardown(&self) {
        self.inner.scheduler.clear_all();
        {
            let mut shared = self.inner.shared.lock().unwrap();
            shared.reconnect_locks.clear();
        }
        self.inner.shutdown.shutdown();
    }

    fn cancel_outstanding(
        &self,
        keys: &[EntityKey],
    ) -> Result<()> {
        for key in keys {
            self.inner.scheduler.cancel(key);
        }
        // queued replay work for a deleted entity is dropped as well
        for key in keys {
            if key.kind != EntityKind::Label {
                self.inner.queue.remove_for_entity(&key.id)?;
            }
        }
        Ok(())
    }
}

fn validate_handles(
    source_handle: &HandleId,
    target_handle: &HandleId,
) -> Result<()> {
    for handle in [source_handle, target_handle] {
        let serialized = handle.to_string();
        if !HandleId::is_valid(&serialized) {
            return Err(ToposyncError::Handle(format!("refusing to persist invalid handle id '{}'", serialized)));
        }
    }
    Ok(())
}

fn drop_bookkeeping(
    shared: &mut Shared,
    key: &EntityKey,
) {
    shared.states.remove(key);
    shared.baselines.remove(key);
    shared.reconnect_locks.remove(&key.id);
    *shared.epochs.entry(key.clone()).or_insert(0) += 1;
}

impl OrchestratorInner {
    /// Move `key` into Saving and drive the retry-wrapped remote call, or
    /// queue straight away when the link is known to be down.
    fn begin_save(
        inner: &Arc<Self>,
        key: EntityKey,
        op: SaveOp,
    ) {
        if !inner.queue.is_online() {
            // known-offline: no remote attempt at all
            Self::queue_op(inner, key, op);
            return;
        }

        let epoch = {
            let mut shared = inner.shared.lock().unwrap();
            if !shared.states.contains_key(&key) {
                // deleted between quiescence and delivery
                return;
            }
            shared.states.insert(key.clone(), EntityState::Saving);
            shared.epochs.get(&key).copied().unwrap_or(0)
        };

        let runtime = inner.runtime.clone();
        let inner = inner.clone();
        runtime.spawn(async move {
            let result = with_retry(inner.retry, || {
                let op = &op;
                let key = &key;
                let remote = &inner.remote;
                let diagram_id = &inner.diagram_id;
                async move {
                    match op {
                        SaveOp::NodePosition { position } => remote.patch_node_position(&key.id, position).await,
                        SaveOp::EdgeCreate { edge } => remote.create_edge(diagram_id, edge).await,
                        SaveOp::EdgeReconnect { endpoints } => remote.patch_edge_reconnect(&key.id, endpoints).await,
                        SaveOp::EdgeTooltip { patch } => remote.patch_edge_tooltip(&key.id, patch).await,
                        SaveOp::LabelPosition { position } => remote.patch_label_positions(diagram_id, &LabelPositionsPatch::single(&key.id, *position)).await,
                    }
                }
            })
            .await;

            Self::complete_save(&inner, key, op, epoch, result);
        });
    }

    fn complete_save(
        inner: &Arc<Self>,
        key: EntityKey,
        op: SaveOp,
        epoch: u64,
        result: std::result::Result<(), RemoteError>,
    ) {
        {
            let mut shared = inner.shared.lock().unwrap();
            shared.reconnect_locks.remove(&key.id);
            if shared.epochs.get(&key).copied().unwrap_or(0) != epoch {
                // the entity was deleted while the call was in flight
                trace!("discarding stale save result for {}", key);
                return;
            }
        }

        match result {
            Ok(()) => {
                {
                    let mut guard = inner.shared.lock().unwrap();
                    let shared = &mut *guard;
                    if inner.scheduler.is_pending(&key) {
                        // a newer burst is waiting; the entity stays dirty
                        shared.states.insert(key.clone(), EntityState::Pending);
                    } else {
                        shared.states.remove(&key);
                        shared.baselines.remove(&key);
                        clear_pending_flag(&mut shared.diagram, &key);
                    }
                }
                Self::emit(inner, key, Notification::Saved);
            }
            Err(e) if e.is_connectivity() => {
                warn!("save of {} hit a connectivity failure, queueing: {}", key, e);
                Self::queue_op(inner, key, op);
            }
            Err(e) => {
                let message = match e {
                    RemoteError::Rejected { message, .. } => message,
                    other => other.to_string(),
                };
                warn!("save of {} rejected, rolling back: {}", key, message);
                Self::fail_and_rollback(inner, key, message);
            }
        }
    }

    /// Park the operation in the offline queue; the optimistic value stays
    /// applied and the user is told the work is queued.
    fn queue_op(
        inner: &Arc<Self>,
        key: EntityKey,
        op: SaveOp,
    ) {
        let pending = match op.to_pending(&key) {
            Ok(pending) => pending,
            Err(e) => {
                Self::fail_and_rollback(inner, key, format!("could not serialize deferred operation: {}", e));
                return;
            }
        };

        {
            let mut shared = inner.shared.lock().unwrap();
            if !shared.states.contains_key(&key) {
                return;
            }
            shared.states.insert(key.clone(), EntityState::Queued);
            shared.reconnect_locks.remove(&key.id);
        }

        if let Err(e) = inner.queue.enqueue(pending) {
            warn!("failed to persist queued operation for {}: {}", key, e);
        }
        Self::emit(inner, key, Notification::Queued);
    }

    /// Restore the pre-gesture value and surface the failure.
    fn fail_and_rollback(
        inner: &Arc<Self>,
        key: EntityKey,
        message: String,
    ) {
        {
            let mut guard = inner.shared.lock().unwrap();
            let shared = &mut *guard;
            shared.reconnect_locks.remove(&key.id);

            if let Some(baseline) = shared.baselines.remove(&key) {
                shared.states.insert(key.clone(), EntityState::RolledBack);
                match baseline {
                    Baseline::Node(snapshot) => OptimisticStore::rollback(&mut shared.diagram.nodes, snapshot),
                    Baseline::Edge(snapshot) => OptimisticStore::rollback(&mut shared.diagram.edges, snapshot),
                    Baseline::CreatedEdge(edge_id) => shared.diagram.edges.retain(|e| e.id != edge_id),
                }
            }
            // original restored; the resting state is Clean
            shared.states.remove(&key);
        }

        // a coalesced follow-up would re-persist the rolled-back value
        inner.scheduler.cancel(&key);
        Self::emit(
            inner,
            key,
            Notification::Failed {
                message,
            },
        );
    }

    /// Drain the offline queue and settle the entities it covered.
    async fn process_offline(inner: &Arc<Self>) {
        let flipped: Vec<EntityKey> = {
            let mut shared = inner.shared.lock().unwrap();
            shared
                .states
                .iter_mut()
                .filter(|(_, state)| **state == EntityState::Queued)
                .map(|(key, state)| {
                    *state = EntityState::Saving;
                    key.clone()
                })
                .collect()
        };

        let replayed = match inner.queue.process().await {
            Ok(replayed) => replayed,
            Err(e) => {
                warn!("offline replay failed: {}", e);
                Vec::new()
            }
        };

        let saved_keys = {
            let mut guard = inner.shared.lock().unwrap();
            let shared = &mut *guard;

            let mut saved_keys = Vec::new();
            for op in &replayed {
                let key = key_for(op);
                if matches!(shared.states.get(&key), Some(EntityState::Saving)) {
                    shared.states.remove(&key);
                    shared.baselines.remove(&key);
                    clear_pending_flag(&mut shared.diagram, &key);
                    saved_keys.push(key);
                }
            }

            // whatever did not drain goes back to waiting
            for key in &flipped {
                if matches!(shared.states.get(key), Some(EntityState::Saving)) {
                    shared.states.insert(key.clone(), EntityState::Queued);
                }
            }
            saved_keys
        };

        for key in saved_keys {
            Self::emit(inner, key, Notification::Saved);
        }
    }

    fn emit(
        inner: &Arc<Self>,
        key: EntityKey,
        notification: Notification,
    ) {
        let message = SessionMessage {
            sid: inner.sid.clone(),
            key,
            notification,
        };
        if let Err(e) = inner.channel.event_queue().send(Event::new(&message)) {
            trace!("notification dropped: {}", e);
        }
    }
}

fn key_for(op: &PendingOperation) -> EntityKey {
    match op.kind {
        OperationKind::NodePosition => EntityKey::node(&op.entity_id),
        OperationKind::EdgeCreate | OperationKind::EdgeReconnect | OperationKind::EdgeTooltip => EntityKey::edge(&op.entity_id),
        OperationKind::LabelPosition => EntityKey::label(&op.entity_id),
    }
}

fn clear_pending_flag(
    diagram: &mut DiagramModel,
    key: &EntityKey,
) {
    match key.kind {
        EntityKind::Node => {
            if let Some(node) = diagram.nodes.iter_mut().find(|n| n.id == key.id) {
                node.pending_save = false;
            }
        }
        EntityKind::Edge | EntityKind::Label => {
            if let Some(edge) = diagram.edges.iter_mut().find(|e| e.id == key.id) {
                edge.pending_save = false;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};

    use async_trait::async_trait;

    use super::*;
    use crate::{
        events::{SessionEvents, SubscribeOptions},
        model::{DiagramModel, DiagramNode, HandleSide, NodeKind},
        queue::MemQueueStore,
        remote::RemoteResult,
    };

    #[derive(Clone, Copy, PartialEq)]
    enum FakeMode {
        Ok,
        Down,
        Reject,
        Slow,
    }

    struct FakeRemote {
        mode: Mutex<FakeMode>,
        calls: Mutex<Vec<String>>,
        attempts: AtomicU32,
    }

    impl FakeRemote {
        fn new(mode: FakeMode) -> Arc<Self> {
            Arc::new(Self {
                mode: Mutex::new(mode),
                calls: Mutex::new(Vec::new()),
                attempts: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn attempts(&self) -> u32 {
            self.attempts.load(AtomicOrdering::SeqCst)
        }

        async fn answer(
            &self,
            call: String,
        ) -> RemoteResult<()> {
            self.attempts.fetch_add(1, AtomicOrdering::SeqCst);
            let mode = *self.mode.lock().unwrap();
            match mode {
                FakeMode::Down => Err(RemoteError::Transport("link down".to_string())),
                FakeMode::Reject => Err(RemoteError::Rejected {
                    status: 422,
                    message: "rejected by server".to_string(),
                }),
                FakeMode::Slow => {
                    tokio::time::sleep(Duration::from_millis(1000)).await;
                    self.calls.lock().unwrap().push(call);
                    Ok(())
                }
                FakeMode::Ok => {
                    self.calls.lock().unwrap().push(call);
                    Ok(())
                }
            }
        }
    }

    #[async_trait]
    impl RemoteApi for FakeRemote {
        async fn patch_node_position(
            &self,
            node_id: &str,
            position: &Position,
        ) -> RemoteResult<()> {
            self.answer(format!("node_position:{}:{}:{}", node_id, position.x, position.y)).await
        }

        async fn patch_edge_reconnect(
            &self,
            edge_id: &str,
            endpoints: &EdgeEndpoints,
        ) -> RemoteResult<()> {
            self.answer(format!("edge_reconnect:{}:{}:{}:{}:{}", edge_id, endpoints.source, endpoints.target, endpoints.source_handle, endpoints.target_handle)).await
        }

        async fn patch_edge_tooltip(
            &self,
            edge_id: &str,
            patch: &TooltipPatch,
        ) -> RemoteResult<()> {
            self.answer(format!("edge_tooltip:{}:{}", edge_id, patch.tooltip_title)).await
        }

        async fn create_edge(
            &self,
            diagram_id: &str,
            edge: &DiagramEdge,
        ) -> RemoteResult<()> {
            self.answer(format!("create_edge:{}:{}", diagram_id, edge.id)).await
        }

        async fn patch_label_positions(
            &self,
            diagram_id: &str,
            patch: &LabelPositionsPatch,
        ) -> RemoteResult<()> {
            let mut edges: Vec<&String> = patch.label_positions.edges.keys().collect();
            edges.sort();
            let first = edges.first().map(|s| s.as_str()).unwrap_or("");
            let entry = patch.label_positions.edges.get(first);
            let (x, y) = entry.map(|e| (e.label_position.x, e.label_position.y)).unwrap_or_default();
            self.answer(format!("label_positions:{}:{}:{}:{}", diagram_id, first, x, y)).await
        }

        async fn fetch_diagram(
            &self,
            diagram_id: &str,
        ) -> RemoteResult<DiagramModel> {
            Ok(DiagramModel {
                id: diagram_id.to_string(),
                ..Default::default()
            })
        }
    }

    fn node(
        id: &str,
        kind: NodeKind,
        x: f64,
        y: f64,
    ) -> DiagramNode {
        DiagramNode {
            id: id.to_string(),
            position: Position::new(x, y),
            kind,
            entity_id: format!("ent-{}", id),
            pending_save: false,
        }
    }

    fn edge_between(
        id: &str,
        source: &str,
        target: &str,
        source_handle: HandleId,
        target_handle: HandleId,
    ) -> DiagramEdge {
        DiagramEdge {
            id: id.to_string(),
            source: source.to_string(),
            target: target.to_string(),
            source_handle,
            target_handle,
            direction: EdgeDirection::Ida,
            label: String::new(),
            tooltip_title: String::new(),
            tooltip: String::new(),
            label_position: None,
            pending_save: false,
        }
    }

    fn model() -> DiagramModel {
        DiagramModel {
            id: "d1".to_string(),
            nodes: vec![node("a", NodeKind::Receiver, 0.0, 0.0), node("b", NodeKind::Modulator, 0.0, 300.0), node("c", NodeKind::Amplifier, 400.0, 0.0)],
            edges: vec![edge_between("e1", "a", "b", HandleId::source(HandleSide::Bottom, 1), HandleId::target(HandleSide::Top, 1))],
        }
    }

    struct Harness {
        orchestrator: SyncOrchestrator,
        remote: Arc<FakeRemote>,
        saved: Arc<Mutex<Vec<String>>>,
        queued: Arc<Mutex<Vec<String>>>,
        failed: Arc<Mutex<Vec<String>>>,
    }

    fn harness_with_config(
        mode: FakeMode,
        model: DiagramModel,
        config: Config,
    ) -> Harness {
        let remote = FakeRemote::new(mode);
        let store = MemQueueStore::new();
        let channel = Arc::new(SessionChannel::new(Handle::current()));
        channel.listen();

        let orchestrator = SyncOrchestrator::new("s1".to_string(), model, remote.clone(), Arc::new(store), channel.clone(), &config, Handle::current()).unwrap();
        orchestrator.launch();

        let saved = Arc::new(Mutex::new(Vec::new()));
        let queued = Arc::new(Mutex::new(Vec::new()));
        let failed = Arc::new(Mutex::new(Vec::new()));

        let events = SessionEvents::channel(channel, SubscribeOptions::default());
        let sink = saved.clone();
        events.on_saved(move |key| sink.lock().unwrap().push(key.id));
        let sink = queued.clone();
        events.on_queued(move |key| sink.lock().unwrap().push(key.id));
        let sink = failed.clone();
        events.on_failed(move |e| {
            if let Notification::Failed { message } = &e.notification {
                sink.lock().unwrap().push(message.clone());
            }
        });

        Harness {
            orchestrator,
            remote,
            saved,
            queued,
            failed,
        }
    }

    fn harness(
        mode: FakeMode,
        model: DiagramModel,
    ) -> Harness {
        harness_with_config(mode, model, Config::default())
    }

    /// Let timers auto-advance and every spawned task settle.
    async fn settle() {
        tokio::time::sleep(Duration::from_secs(30)).await;
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_move_queues_and_replays() {
        let h = harness(FakeMode::Ok, model());
        h.orchestrator.set_connectivity(false);

        h.orchestrator.move_node("a", Position::new(120.0, 80.0)).unwrap();
        settle().await;

        // local state moved, nothing hit the wire, exactly one queued op
        let snapshot = h.orchestrator.snapshot();
        let a = snapshot.nodes.iter().find(|n| n.id == "a").unwrap();
        assert_eq!(a.position, Position::new(120.0, 80.0));
        assert!(a.pending_save);
        assert!(h.remote.calls().is_empty());
        let pending = h.orchestrator.pending_operations();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].kind, OperationKind::NodePosition);
        assert_eq!(pending[0].entity_id, "a");
        assert_eq!(h.orchestrator.entity_state(&EntityKey::node("a")), EntityState::Queued);
        assert_eq!(*h.queued.lock().unwrap(), vec!["a"]);

        // reconnect: the queued operation replays once and is removed
        h.orchestrator.set_connectivity(true);
        settle().await;

        assert_eq!(h.remote.calls(), vec!["node_position:a:120:80"]);
        assert!(h.orchestrator.pending_operations().is_empty());
        assert_eq!(h.orchestrator.entity_state(&EntityKey::node("a")), EntityState::Clean);
        let snapshot = h.orchestrator.snapshot();
        assert!(!snapshot.nodes.iter().find(|n| n.id == "a").unwrap().pending_save);
        assert_eq!(*h.saved.lock().unwrap(), vec!["a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_moves_coalesce_into_one_call() {
        let h = harness(FakeMode::Ok, model());

        h.orchestrator.move_node("a", Position::new(10.0, 10.0)).unwrap();
        h.orchestrator.move_node("a", Position::new(20.0, 20.0)).unwrap();
        settle().await;

        assert_eq!(h.remote.calls(), vec!["node_position:a:20:20"]);
        assert_eq!(h.orchestrator.entity_state(&EntityKey::node("a")), EntityState::Clean);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_rolls_back_exactly() {
        let h = harness(FakeMode::Reject, model());

        h.orchestrator.move_node("a", Position::new(50.0, 60.0)).unwrap();
        settle().await;

        let snapshot = h.orchestrator.snapshot();
        let a = snapshot.nodes.iter().find(|n| n.id == "a").unwrap();
        assert_eq!(a.position, Position::new(0.0, 0.0));
        assert!(!a.pending_save);
        assert_eq!(h.orchestrator.entity_state(&EntityKey::node("a")), EntityState::Clean);
        assert_eq!(*h.failed.lock().unwrap(), vec!["rejected by server"]);
        assert!(h.orchestrator.pending_operations().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_queues_after_retries() {
        let h = harness(FakeMode::Down, model());

        h.orchestrator.move_node("a", Position::new(50.0, 60.0)).unwrap();
        settle().await;

        // total attempts = retries + 1
        assert_eq!(h.remote.attempts(), 3);
        assert_eq!(h.orchestrator.entity_state(&EntityKey::node("a")), EntityState::Queued);
        let snapshot = h.orchestrator.snapshot();
        assert_eq!(snapshot.nodes.iter().find(|n| n.id == "a").unwrap().position, Position::new(50.0, 60.0));
        assert_eq!(h.orchestrator.pending_operations().len(), 1);
        assert_eq!(*h.queued.lock().unwrap(), vec!["a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_allocates_and_persists() {
        let h = harness(FakeMode::Ok, model());

        let edge_id = h.orchestrator.connect("a", "c", EdgeDirection::Ida, "feed").unwrap();
        settle().await;

        assert_eq!(h.remote.calls(), vec![format!("create_edge:d1:{}", edge_id)]);
        let snapshot = h.orchestrator.snapshot();
        let edge = snapshot.edges.iter().find(|e| e.id == edge_id).unwrap();
        assert_eq!(edge.source_handle.to_string(), "out-right-1");
        assert_eq!(edge.target_handle.to_string(), "in-left-1");
        assert!(!edge.pending_save);
        assert_eq!(h.orchestrator.entity_state(&EntityKey::edge(&edge_id)), EntityState::Clean);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_create_removes_edge() {
        let h = harness(FakeMode::Reject, model());

        let edge_id = h.orchestrator.connect("a", "c", EdgeDirection::Ida, "feed").unwrap();
        settle().await;

        let snapshot = h.orchestrator.snapshot();
        assert!(!snapshot.edges.iter().any(|e| e.id == edge_id));
        assert_eq!(*h.failed.lock().unwrap(), vec!["rejected by server"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_saturated_nodes_reject_connection() {
        let mut config = Config::default();
        config.ports = crate::config::PortCapacity {
            top: 1,
            right: 1,
            bottom: 1,
            left: 1,
        };

        let mut m = model();
        m.nodes.push(node("t1", NodeKind::Channel, 100.0, 0.0));
        m.nodes.push(node("t2", NodeKind::Channel, -100.0, 0.0));
        m.nodes.push(node("t3", NodeKind::Channel, 0.0, -100.0));
        m.edges = vec![
            edge_between("f1", "a", "t1", HandleId::source(HandleSide::Right, 1), HandleId::target(HandleSide::Left, 1)),
            edge_between("f2", "a", "t2", HandleId::source(HandleSide::Left, 1), HandleId::target(HandleSide::Right, 1)),
            edge_between("f3", "a", "t3", HandleId::source(HandleSide::Top, 1), HandleId::target(HandleSide::Bottom, 1)),
            edge_between("f4", "a", "b", HandleId::source(HandleSide::Bottom, 1), HandleId::target(HandleSide::Top, 1)),
        ];
        let h = harness_with_config(FakeMode::Ok, m, config);

        let err = h.orchestrator.connect("a", "c", EdgeDirection::Ida, "feed").unwrap_err();
        assert!(matches!(err, ToposyncError::Allocation(_)));
        settle().await;

        // nothing applied, nothing sent
        assert_eq!(h.orchestrator.snapshot().edges.len(), 4);
        assert!(h.remote.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_reconnect_rejected_while_saving() {
        let h = harness(FakeMode::Slow, model());

        h.orchestrator.reconnect_edge("e1", "a", "c").unwrap();
        let err = h.orchestrator.reconnect_edge("e1", "a", "b").unwrap_err();
        assert!(matches!(err, ToposyncError::Session(_)));

        settle().await;

        // the in-flight save settled and released the lock
        h.orchestrator.reconnect_edge("e1", "a", "b").unwrap();
        settle().await;

        let calls = h.remote.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].starts_with("edge_reconnect:e1:a:c"));
        assert!(calls[1].starts_with("edge_reconnect:e1:a:b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_suppresses_late_callback() {
        let h = harness(FakeMode::Slow, model());

        h.orchestrator.move_node("a", Position::new(9.0, 9.0)).unwrap();
        let key = EntityKey::node("a");
        assert!(h.orchestrator.flush(&key));
        // let the loop start the slow save without advancing time
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }

        h.orchestrator.delete_node("a").unwrap();
        settle().await;

        let snapshot = h.orchestrator.snapshot();
        assert!(!snapshot.nodes.iter().any(|n| n.id == "a"));
        assert!(!snapshot.edges.iter().any(|e| e.id == "e1"));
        assert_eq!(h.orchestrator.entity_state(&key), EntityState::Clean);
        // the late success must not resurrect the deleted node
        assert!(h.saved.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_while_pending_cancels_timer() {
        let h = harness(FakeMode::Ok, model());

        h.orchestrator.move_node("a", Position::new(9.0, 9.0)).unwrap();
        h.orchestrator.delete_node("a").unwrap();
        settle().await;

        assert!(h.remote.calls().is_empty());
        assert!(h.orchestrator.pending_operations().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_label_and_tooltip_mutations() {
        let h = harness(FakeMode::Ok, model());

        h.orchestrator.move_label("e1", Position::new(42.0, 24.0)).unwrap();
        h.orchestrator.set_edge_tooltip("e1", "Uplink", "Primary uplink feed").unwrap();
        settle().await;

        let mut calls = h.remote.calls();
        calls.sort();
        assert_eq!(calls, vec!["edge_tooltip:e1:Uplink", "label_positions:d1:e1:42:24"]);

        let snapshot = h.orchestrator.snapshot();
        let edge = snapshot.edges.iter().find(|e| e.id == "e1").unwrap();
        assert_eq!(edge.label_position, Some(Position::new(42.0, 24.0)));
        assert_eq!(edge.tooltip_title, "Uplink");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dedup_drops_repeated_offline_moves() {
        let h = harness(FakeMode::Ok, model());
        h.orchestrator.set_connectivity(false);

        h.orchestrator.move_node("a", Position::new(10.0, 10.0)).unwrap();
        let key = EntityKey::node("a");
        assert!(h.orchestrator.flush(&key));
        settle().await;
        h.orchestrator.move_node("a", Position::new(20.0, 20.0)).unwrap();
        assert!(h.orchestrator.flush(&key));
        settle().await;

        // both flushes landed inside the dedup window
        assert_eq!(h.orchestrator.pending_operations().len(), 1);
    }
}

