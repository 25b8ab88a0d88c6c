//! End-to-end synchronization scenarios through the public engine API.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use toposync::{
    Config, DiagramEdge, DiagramModel, DiagramNode, EdgeDirection, EdgeEndpoints, EngineBuilder, EntityKey, EntityState, LabelPositionsPatch, MemQueueStore, NodeKind, OperationKind, Position,
    RemoteApi, RemoteError, RemoteResult, TooltipPatch,
};

struct ScriptedRemote {
    online: Mutex<bool>,
    reject: Mutex<bool>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRemote {
    fn new(online: bool) -> Arc<Self> {
        Arc::new(Self {
            online: Mutex::new(online),
            reject: Mutex::new(false),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn set_online(
        &self,
        online: bool,
    ) {
        *self.online.lock().unwrap() = online;
    }

    fn set_reject(
        &self,
        reject: bool,
    ) {
        *self.reject.lock().unwrap() = reject;
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn answer(
        &self,
        call: String,
    ) -> RemoteResult<()> {
        if !*self.online.lock().unwrap() {
            return Err(RemoteError::Transport("link down".to_string()));
        }
        if *self.reject.lock().unwrap() {
            return Err(RemoteError::Rejected {
                status: 422,
                message: "validation failed".to_string(),
            });
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

#[async_trait]
impl RemoteApi for ScriptedRemote {
    async fn patch_node_position(
        &self,
        node_id: &str,
        position: &Position,
    ) -> RemoteResult<()> {
        self.answer(format!("node_position:{}:{}:{}", node_id, position.x, position.y))
    }

    async fn patch_edge_reconnect(
        &self,
        edge_id: &str,
        endpoints: &EdgeEndpoints,
    ) -> RemoteResult<()> {
        self.answer(format!("edge_reconnect:{}:{}:{}", edge_id, endpoints.source, endpoints.target))
    }

    async fn patch_edge_tooltip(
        &self,
        edge_id: &str,
        patch: &TooltipPatch,
    ) -> RemoteResult<()> {
        self.answer(format!("edge_tooltip:{}:{}", edge_id, patch.tooltip_title))
    }

    async fn create_edge(
        &self,
        diagram_id: &str,
        edge: &DiagramEdge,
    ) -> RemoteResult<()> {
        self.answer(format!("create_edge:{}:{}", diagram_id, edge.id))
    }

    async fn patch_label_positions(
        &self,
        diagram_id: &str,
        _patch: &LabelPositionsPatch,
    ) -> RemoteResult<()> {
        self.answer(format!("label_positions:{}", diagram_id))
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

fn config() -> Config {
    let mut config = Config::default();
    config.debounce.delay_ms = 100;
    config.retry.base_delay_ms = 20;
    config
}

fn model() -> DiagramModel {
    DiagramModel {
        id: "d1".to_string(),
        nodes: vec![
            DiagramNode {
                id: "a".to_string(),
                position: Position::new(0.0, 0.0),
                kind: NodeKind::Receiver,
                entity_id: "ent-a".to_string(),
                pending_save: false,
            },
            DiagramNode {
                id: "b".to_string(),
                position: Position::new(0.0, 300.0),
                kind: NodeKind::Modulator,
                entity_id: "ent-b".to_string(),
                pending_save: false,
            },
        ],
        edges: Vec::new(),
    }
}

fn wait() {
    std::thread::sleep(Duration::from_millis(600));
}

#[test]
fn test_offline_move_queues_then_replays_on_reconnect() {
    let remote = ScriptedRemote::new(false);
    let store = MemQueueStore::new();
    let engine = EngineBuilder::new().config(config()).remote(remote.clone()).queue_store(Arc::new(store.clone())).build().unwrap();
    engine.launch();

    let session = engine.open_session(model()).unwrap();
    session.set_connectivity(false);

    session.move_node("a", Position::new(120.0, 80.0)).unwrap();
    wait();

    // the local model moved, one operation queued, nothing hit the wire
    let snapshot = session.snapshot();
    let a = snapshot.nodes.iter().find(|n| n.id == "a").unwrap();
    assert_eq!(a.position, Position::new(120.0, 80.0));
    assert!(a.pending_save);
    assert!(remote.calls().is_empty());

    let pending = session.pending_operations();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].kind, OperationKind::NodePosition);
    assert_eq!(pending[0].entity_id, "a");
    assert_eq!(session.entity_state(&EntityKey::node("a")), EntityState::Queued);

    // reconnect: the queued operation executes once and is removed
    remote.set_online(true);
    session.set_connectivity(true);
    wait();

    assert_eq!(remote.calls(), vec!["node_position:a:120:80"]);
    assert!(session.pending_operations().is_empty());
    assert_eq!(session.entity_state(&EntityKey::node("a")), EntityState::Clean);
    assert!(!session.snapshot().nodes.iter().find(|n| n.id == "a").unwrap().pending_save);

    engine.shutdown();
}

#[test]
fn test_restart_replays_persisted_queue() {
    let store = MemQueueStore::new();

    // first process: queue a move while offline, then go away
    {
        let remote = ScriptedRemote::new(false);
        let engine = EngineBuilder::new().config(config()).remote(remote.clone()).queue_store(Arc::new(store.clone())).build().unwrap();
        engine.launch();

        let session = engine.open_session(model()).unwrap();
        session.set_connectivity(false);
        session.move_node("a", Position::new(7.0, 7.0)).unwrap();
        assert!(session.flush(&EntityKey::node("a")));
        wait();

        assert_eq!(session.pending_operations().len(), 1);
        engine.shutdown();
    }

    // second process: the restored queue drains at session startup
    let remote = ScriptedRemote::new(true);
    let engine = EngineBuilder::new().config(config()).remote(remote.clone()).queue_store(Arc::new(store.clone())).build().unwrap();
    engine.launch();

    let session = engine.open_session(model()).unwrap();
    wait();

    assert_eq!(remote.calls(), vec!["node_position:a:7:7"]);
    assert!(session.pending_operations().is_empty());

    engine.shutdown();
}

#[test]
fn test_rejected_mutation_rolls_back() {
    let remote = ScriptedRemote::new(true);
    remote.set_reject(true);
    let engine = EngineBuilder::new().config(config()).remote(remote.clone()).queue_store(Arc::new(MemQueueStore::new())).build().unwrap();
    engine.launch();

    let session = engine.open_session(model()).unwrap();
    session.move_node("a", Position::new(50.0, 50.0)).unwrap();
    wait();

    let snapshot = session.snapshot();
    let a = snapshot.nodes.iter().find(|n| n.id == "a").unwrap();
    assert_eq!(a.position, Position::new(0.0, 0.0));
    assert!(!a.pending_save);
    assert_eq!(session.entity_state(&EntityKey::node("a")), EntityState::Clean);

    engine.shutdown();
}

#[test]
fn test_connect_and_reconnect_through_engine() {
    let remote = ScriptedRemote::new(true);
    let engine = EngineBuilder::new().config(config()).remote(remote.clone()).queue_store(Arc::new(MemQueueStore::new())).build().unwrap();
    engine.launch();

    let session = engine.open_session(model()).unwrap();
    let edge_id = session.connect("a", "b", EdgeDirection::Ida, "downlink").unwrap();
    wait();

    let snapshot = session.snapshot();
    let edge = snapshot.edges.iter().find(|e| e.id == edge_id).unwrap();
    // b sits directly below a
    assert_eq!(edge.source_handle.to_string(), "out-bottom-1");
    assert_eq!(edge.target_handle.to_string(), "in-top-1");

    session.reconnect_edge(&edge_id, "b", "a").unwrap();
    wait();

    let calls = remote.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0], format!("create_edge:d1:{}", edge_id));
    assert_eq!(calls[1], format!("edge_reconnect:{}:b:a", edge_id));

    engine.shutdown();
}
