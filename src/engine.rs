//! Synchronization engine - the main entry point for Toposync.
//!
//! The engine manages the lifecycle of diagram sessions, including:
//! - Opening sessions from in-memory or remotely fetched diagrams
//! - Sharing the remote client and queue store across sessions
//! - Graceful shutdown coordination

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tokio::runtime::Runtime;

use crate::{
    Result, ToposyncError,
    common::{MemCache, Shutdown},
    config::Config,
    model::DiagramModel,
    queue::QueueStore,
    remote::RemoteApi,
    session::{Session, SessionId},
};

/// Maximum number of sessions to cache in memory.
const SESSION_CACHE_SIZE: usize = 256;

/// The main synchronization engine.
///
/// One engine serves the whole host application; each open diagram gets its
/// own [`Session`] with fully isolated synchronization state.
///
/// # Example
///
/// ```rust,ignore
/// let engine = EngineBuilder::new().build()?;
/// engine.launch();
///
/// let session = engine.load_session("diagram-1")?;
/// session.move_node("n1", Position { x: 10.0, y: 20.0 })?;
///
/// engine.shutdown();
/// ```
pub struct SyncEngine {
    /// Engine configuration shared by every session.
    config: Config,
    /// Remote persistence client.
    remote: Arc<dyn RemoteApi>,
    /// Durable store for per-diagram offline queues.
    store: Arc<dyn QueueStore>,
    /// Active sessions, keyed by diagram id.
    sessions: Arc<MemCache<SessionId, Arc<Session>>>,

    /// Flag indicating if the engine is running.
    running: Arc<AtomicBool>,
    /// Tokio runtime for async task execution.
    runtime: Arc<Runtime>,
    /// Shutdown coordinator for graceful termination.
    shutdown: Arc<Shutdown>,
}

impl SyncEngine {
    pub(crate) fn new(
        config: Config,
        remote: Arc<dyn RemoteApi>,
        store: Arc<dyn QueueStore>,
        runtime: Arc<Runtime>,
    ) -> Self {
        Self {
            config,
            remote,
            store,
            sessions: Arc::new(MemCache::new(SESSION_CACHE_SIZE)),
            running: Arc::new(AtomicBool::new(false)),
            runtime,
            shutdown: Arc::new(Shutdown::new()),
        }
    }

    /// Start accepting sessions.
    pub fn launch(&self) {
        if self.running.swap(true, Ordering::Relaxed) {
            return;
        }
    }

    /// Gracefully shut down: tear down every session, then stop.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::Relaxed) {
            return;
        }

        for (_, session) in self.sessions.iter() {
            session.teardown();
        }
        self.shutdown.shutdown();
    }

    /// Open a session over an already loaded diagram.
    ///
    /// One session per diagram: the synchronization state machine assumes a
    /// single writer per entity within the process.
    pub fn open_session(
        &self,
        model: DiagramModel,
    ) -> Result<Arc<Session>> {
        if !self.running.load(Ordering::Relaxed) {
            return Err(ToposyncError::Engine("Engine is not running".to_string()));
        }
        if model.id.is_empty() {
            return Err(ToposyncError::Engine("missing id in diagram".to_string()));
        }

        let diagram_id = model.id.clone();
        if self.sessions.get(&diagram_id).is_some() {
            return Err(ToposyncError::Engine(format!("Session for diagram {} is already open", diagram_id)));
        }

        let session = Session::new(model, self.remote.clone(), self.store.clone(), &self.config, self.runtime.handle().clone())?;
        self.sessions.set(diagram_id, session.clone());

        Ok(session)
    }

    /// Fetch the diagram from the remote store and open a session over it.
    pub fn load_session(
        &self,
        diagram_id: &str,
    ) -> Result<Arc<Session>> {
        if !self.running.load(Ordering::Relaxed) {
            return Err(ToposyncError::Engine("Engine is not running".to_string()));
        }

        let model = self.runtime.block_on(self.remote.fetch_diagram(diagram_id)).map_err(ToposyncError::from)?;
        self.open_session(model)
    }

    /// Look up the open session for a diagram.
    pub fn session(
        &self,
        diagram_id: &str,
    ) -> Option<Arc<Session>> {
        self.sessions.get(&diagram_id.to_string())
    }

    /// Tear down and forget the session for a diagram.
    pub fn close_session(
        &self,
        diagram_id: &str,
    ) -> Result<()> {
        let key = diagram_id.to_string();
        match self.sessions.get(&key) {
            Some(session) => {
                session.teardown();
                self.sessions.remove(&key);
                Ok(())
            }
            None => Err(ToposyncError::Engine(format!("Session for diagram {} not found", diagram_id))),
        }
    }
}
