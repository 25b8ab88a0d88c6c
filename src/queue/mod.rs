//! Durable, ordered log of deferred write operations.
//!
//! Writes that fail on connectivity land here and replay strictly in
//! insertion order once the link returns. The log is persisted as pure
//! data after every change, so a restarted process resumes exactly where
//! the previous one stopped.

mod operation;
mod registry;
mod store;

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};

use tracing::{debug, warn};

use crate::Result;

pub use operation::{OperationKind, PendingOperation};
pub use registry::{HandlerRegistry, OperationHandler};
pub use store::{FileQueueStore, MemQueueStore, QueueStore};

pub struct OfflineQueue {
    diagram_id: String,
    /// duplicate (kind, entity) suppression window, millis
    dedup_window: i64,
    ops: Mutex<Vec<PendingOperation>>,
    store: Arc<dyn QueueStore>,
    registry: HandlerRegistry,
    online: AtomicBool,
    replaying: AtomicBool,
}

impl OfflineQueue {
    /// Restore the persisted log for `diagram_id` and wrap it.
    pub fn new(
        diagram_id: &str,
        store: Arc<dyn QueueStore>,
        registry: HandlerRegistry,
        dedup_window_ms: u64,
    ) -> Result<Self> {
        let ops = store.load(diagram_id)?;
        if !ops.is_empty() {
            debug!("offline queue for {} restored with {} pending operations", diagram_id, ops.len());
        }

        Ok(Self {
            diagram_id: diagram_id.to_string(),
            dedup_window: dedup_window_ms as i64,
            ops: Mutex::new(ops),
            store,
            registry,
            online: AtomicBool::new(true),
            replaying: AtomicBool::new(false),
        })
    }

    /// Append an operation unless an equivalent one is already queued
    /// inside the dedup window. Returns whether the operation was kept.
    pub fn enqueue(
        &self,
        op: PendingOperation,
    ) -> Result<bool> {
        let persist = {
            let mut ops = self.ops.lock().unwrap();

            let duplicate = ops.iter().any(|e| e.kind == op.kind && e.entity_id == op.entity_id && op.timestamp - e.timestamp < self.dedup_window);
            if duplicate {
                debug!("dropping duplicate {} operation for {}", op.kind.as_ref(), op.entity_id);
                return Ok(false);
            }

            ops.push(op);
            ops.clone()
        };

        self.store.save(&self.diagram_id, &persist)?;
        Ok(true)
    }

    /// Record the host-reported connectivity state. Returns true exactly on
    /// an offline-to-online transition, the moment a replay should start.
    pub fn set_online(
        &self,
        online: bool,
    ) -> bool {
        let was = self.online.swap(online, Ordering::SeqCst);
        online && !was
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Replay queued operations strictly sequentially, in insertion order.
    ///
    /// Runs only while online and only one drain at a time. Each success is
    /// removed (and persisted) immediately; the first failure stops the
    /// drain and leaves the operation, and everything behind it, queued
    /// for the next trigger. Returns the operations that replayed.
    pub async fn process(&self) -> Result<Vec<PendingOperation>> {
        if !self.is_online() {
            return Ok(Vec::new());
        }
        if self.replaying.swap(true, Ordering::SeqCst) {
            return Ok(Vec::new());
        }

        let result = self.drain().await;
        self.replaying.store(false, Ordering::SeqCst);
        result
    }

    async fn drain(&self) -> Result<Vec<PendingOperation>> {
        let mut replayed = Vec::new();

        loop {
            if !self.is_online() {
                break;
            }

            let next = {
                let ops = self.ops.lock().unwrap();
                ops.first().cloned()
            };
            let Some(op) = next else {
                break;
            };

            match self.registry.replay(&op).await {
                Ok(()) => {
                    let persist = {
                        let mut ops = self.ops.lock().unwrap();
                        ops.retain(|e| e.id != op.id);
                        ops.clone()
                    };
                    self.store.save(&self.diagram_id, &persist)?;
                    debug!("replayed {} operation for {}", op.kind.as_ref(), op.entity_id);
                    replayed.push(op);
                }
                Err(e) => {
                    warn!("replay of {} operation for {} failed, keeping it queued: {}", op.kind.as_ref(), op.entity_id, e);
                    break;
                }
            }
        }

        Ok(replayed)
    }

    /// Drop every queued operation targeting `entity_id` (entity deleted).
    pub fn remove_for_entity(
        &self,
        entity_id: &str,
    ) -> Result<usize> {
        let (removed, persist) = {
            let mut ops = self.ops.lock().unwrap();
            let before = ops.len();
            ops.retain(|e| e.entity_id != entity_id);
            (before - ops.len(), ops.clone())
        };

        if removed > 0 {
            self.store.save(&self.diagram_id, &persist)?;
        }
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.ops.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.lock().unwrap().is_empty()
    }

    /// Current queue contents, oldest first.
    pub fn pending(&self) -> Vec<PendingOperation> {
        self.ops.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::AtomicU32;

    use async_trait::async_trait;

    use super::*;
    use crate::ToposyncError;

    struct RecordingHandler {
        kind: OperationKind,
        calls: Arc<Mutex<Vec<String>>>,
        failures: AtomicU32,
    }

    #[async_trait]
    impl OperationHandler for RecordingHandler {
        fn kind(&self) -> OperationKind {
            self.kind
        }

        fn schema(&self) -> serde_json::Value {
            serde_json::json!({ "type": "object" })
        }

        async fn replay(
            &self,
            op: &PendingOperation,
        ) -> Result<()> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(ToposyncError::Remote("transport failure: link down".to_string()));
            }
            self.calls.lock().unwrap().push(op.entity_id.clone());
            Ok(())
        }
    }

    fn queue_with_handler(failures: u32) -> (OfflineQueue, Arc<Mutex<Vec<String>>>, MemQueueStore) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HandlerRegistry::new();
        registry.register(Box::new(RecordingHandler {
            kind: OperationKind::NodePosition,
            calls: calls.clone(),
            failures: AtomicU32::new(failures),
        }));

        let store = MemQueueStore::new();
        let queue = OfflineQueue::new("d1", Arc::new(store.clone()), registry, 5000).unwrap();
        (queue, calls, store)
    }

    fn op_at(
        entity_id: &str,
        timestamp: i64,
    ) -> PendingOperation {
        PendingOperation {
            id: crate::utils::longid(),
            kind: OperationKind::NodePosition,
            entity_id: entity_id.to_string(),
            timestamp,
            payload: serde_json::json!({ "x": 1.0, "y": 2.0 }),
        }
    }

    #[test]
    fn test_dedup_inside_window() {
        let (queue, _, _) = queue_with_handler(0);

        assert!(queue.enqueue(op_at("n1", 1000)).unwrap());
        assert!(!queue.enqueue(op_at("n1", 4000)).unwrap());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_no_dedup_outside_window() {
        let (queue, _, _) = queue_with_handler(0);

        assert!(queue.enqueue(op_at("n1", 1000)).unwrap());
        assert!(queue.enqueue(op_at("n1", 6001)).unwrap());
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_different_entities_never_dedup() {
        let (queue, _, _) = queue_with_handler(0);

        assert!(queue.enqueue(op_at("n1", 1000)).unwrap());
        assert!(queue.enqueue(op_at("n2", 1000)).unwrap());
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_process_drains_in_order() {
        let (queue, calls, store) = queue_with_handler(0);

        queue.enqueue(op_at("n1", 1000)).unwrap();
        queue.enqueue(op_at("n2", 2000)).unwrap();
        queue.enqueue(op_at("n3", 3000)).unwrap();

        let replayed = queue.process().await.unwrap();
        assert_eq!(replayed.len(), 3);
        assert_eq!(*calls.lock().unwrap(), vec!["n1", "n2", "n3"]);
        assert!(queue.is_empty());
        assert!(store.load("d1").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_stops_drain_and_preserves_order() {
        let (queue, calls, store) = queue_with_handler(1);

        queue.enqueue(op_at("n1", 1000)).unwrap();
        queue.enqueue(op_at("n2", 2000)).unwrap();

        let replayed = queue.process().await.unwrap();
        assert!(replayed.is_empty());
        assert!(calls.lock().unwrap().is_empty());
        assert_eq!(queue.len(), 2);
        assert_eq!(store.load("d1").unwrap().len(), 2);

        // next trigger resumes from the head
        let replayed = queue.process().await.unwrap();
        assert_eq!(replayed.len(), 2);
        assert_eq!(*calls.lock().unwrap(), vec!["n1", "n2"]);
    }

    #[tokio::test]
    async fn test_process_skips_while_offline() {
        let (queue, calls, _) = queue_with_handler(0);

        queue.enqueue(op_at("n1", 1000)).unwrap();
        assert!(!queue.set_online(false));

        let replayed = queue.process().await.unwrap();
        assert!(replayed.is_empty());
        assert!(calls.lock().unwrap().is_empty());
        assert_eq!(queue.len(), 1);

        assert!(queue.set_online(true));
        // repeated reports while already online are not transitions
        assert!(!queue.set_online(true));
    }

    #[test]
    fn test_remove_for_entity() {
        let (queue, _, store) = queue_with_handler(0);

        queue.enqueue(op_at("n1", 1000)).unwrap();
        queue.enqueue(op_at("n2", 2000)).unwrap();

        assert_eq!(queue.remove_for_entity("n1").unwrap(), 1);
        assert_eq!(queue.len(), 1);
        assert_eq!(store.load("d1").unwrap().len(), 1);
        assert_eq!(queue.pending()[0].entity_id, "n2");
    }

    #[test]
    fn test_restores_persisted_log() {
        let store = MemQueueStore::new();
        store.save("d1", &[op_at("n1", 1000)]).unwrap();

        let queue = OfflineQueue::new("d1", Arc::new(store), HandlerRegistry::new(), 5000).unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pending()[0].entity_id, "n1");
    }
}
