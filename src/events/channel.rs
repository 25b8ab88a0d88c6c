use std::sync::{Arc, RwLock};

use futures::future::BoxFuture;
use tokio::runtime::Handle;

use crate::{
    ShareLock,
    common::{BroadcastQueue, Shutdown},
    events::{Event, SessionMessage},
    session::EntityKey,
};

macro_rules! dispatch_event {
    ($handles:expr, $(&$item:ident), +) => {
        let handlers = $handles.read().unwrap();
        for handle in handlers.iter() {
            (handle)($(&$item),+);
        }
    };
}

macro_rules! dispatch_event_async {
    ($handles:expr, $(&$item:ident), +) => {
        let handles = $handles.clone();

        tokio::spawn(async move {
            let handlers = handles.read().unwrap().clone();
            for handle in handlers.iter() {
                (handle)($(&$item),+).await;
            }
        });
    };
}

const EVENT_QUEUE_SIZE: usize = 2048;

pub type SessionEventHandle = Arc<dyn Fn(&Event<SessionMessage>) + Send + Sync>;
pub type SessionEventHandleAsync = Arc<dyn Fn(&Event<SessionMessage>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Subscription filter over session and entity ids.
#[derive(Debug, Clone)]
pub struct SubscribeOptions {
    /// glob pattern matched against the session id, eg. `sess-*`
    pub sid: String,

    /// glob pattern matched against the entity id, eg. `edge-*`
    pub entity: String,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            sid: "*".to_string(),
            entity: "*".to_string(),
        }
    }
}

#[allow(unused)]
impl SubscribeOptions {
    pub fn new(
        sid: String,
        entity: String,
    ) -> Self {
        Self {
            sid,
            entity,
        }
    }

    pub fn with_sid(sid: String) -> Self {
        Self {
            sid,
            entity: "*".to_string(),
        }
    }

    pub fn with_entity(entity: String) -> Self {
        Self {
            sid: "*".to_string(),
            entity,
        }
    }
}

/// Per-session notification channel.
///
/// The orchestrator is the only producer; any number of subscribers attach
/// handlers filtered by glob patterns. This is the crate's one signaling
/// path between the sync core and the host UI.
#[derive(Clone)]
pub struct SessionChannel {
    event_queue: Arc<BroadcastQueue<Event<SessionMessage>>>,

    events: ShareLock<Vec<SessionEventHandle>>,
    events_async: ShareLock<Vec<SessionEventHandleAsync>>,

    runtime: Handle,
    shutdown: Arc<Shutdown>,
}

impl SessionChannel {
    pub(crate) fn new(runtime: Handle) -> Self {
        Self {
            event_queue: BroadcastQueue::new(EVENT_QUEUE_SIZE),
            events: Arc::new(RwLock::new(Vec::new())),
            events_async: Arc::new(RwLock::new(Vec::new())),
            runtime,
            shutdown: Arc::new(Shutdown::new()),
        }
    }

    pub(crate) fn event_queue(&self) -> Arc<BroadcastQueue<Event<SessionMessage>>> {
        self.event_queue.clone()
    }

    pub(crate) fn listen(&self) {
        let mut event_queue = self.event_queue.subscribe();
        let events = self.events.clone();
        let events_async = self.events_async.clone();

        let shutdown = self.shutdown.clone();
        self.runtime.spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.wait() => break,
                    Ok(e) = event_queue.recv() => {
                        let evt = e.clone();
                        dispatch_event!(events, &evt);
                        dispatch_event_async!(events_async, &e);
                    }
                }
            }
        });
    }

    pub(crate) fn shutdown(&self) {
        self.shutdown.shutdown();
    }
}

/// Filtered subscription surface over a [`SessionChannel`].
#[derive(Clone)]
pub struct SessionEvents {
    channel: Arc<SessionChannel>,

    glob: (globset::GlobMatcher, globset::GlobMatcher),
}

#[allow(unused)]
impl SessionEvents {
    pub fn channel(
        channel: Arc<SessionChannel>,
        options: SubscribeOptions,
    ) -> Self {
        Self {
            channel,
            glob: (
                globset::Glob::new(&options.sid).unwrap().compile_matcher(),
                globset::Glob::new(&options.entity).unwrap().compile_matcher(),
            ),
        }
    }

    /// A mutation persisted; the entity is clean again.
    pub fn on_saved(
        &self,
        f: impl Fn(EntityKey) + Send + Sync + 'static,
    ) {
        let glob = self.glob.clone();

        self.channel.events.write().unwrap().push(Arc::new(move |e| {
            if e.notification.is_saved() && is_match(&glob, e) {
                f(e.key.clone());
            }
        }));
    }

    /// A mutation was queued for replay after a connectivity failure.
    pub fn on_queued(
        &self,
        f: impl Fn(EntityKey) + Send + Sync + 'static,
    ) {
        let glob = self.glob.clone();

        self.channel.events.write().unwrap().push(Arc::new(move |e| {
            if e.notification.is_queued() && is_match(&glob, e) {
                f(e.key.clone());
            }
        }));
    }

    /// A mutation was rejected and rolled back.
    pub fn on_failed(
        &self,
        f: impl Fn(&Event<SessionMessage>) + Send + Sync + 'static,
    ) {
        let glob = self.glob.clone();

        self.channel.events.write().unwrap().push(Arc::new(move |e| {
            if e.notification.is_failed() && is_match(&glob, e) {
                f(e);
            }
        }));
    }

    pub fn on_event(
        &self,
        f: impl Fn(&Event<SessionMessage>) + Send + Sync + 'static,
    ) {
        let glob = self.glob.clone();

        self.channel.events.write().unwrap().push(Arc::new(move |e| {
            if is_match(&glob, e) {
                f(e);
            }
        }));
    }

    pub fn on_event_async<F>(
        &self,
        f: F,
    ) where
        F: Fn(&Event<SessionMessage>) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        let glob = self.glob.clone();

        self.channel.events_async.write().unwrap().push(Arc::new(move |e| {
            if is_match(&glob, e) {
                f(e)
            } else {
                Box::pin(async {})
            }
        }));
    }
}

fn is_match(
    glob: &(globset::GlobMatcher, globset::GlobMatcher),
    e: &Event<SessionMessage>,
) -> bool {
    let (pat_sid, pat_entity) = glob;
    pat_sid.is_match(&e.sid) && pat_entity.is_match(&e.key.id)
}
