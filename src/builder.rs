use std::sync::Arc;

use tokio::runtime::{Builder, Runtime};

use crate::{
    Config, Result, SyncEngine,
    queue::{FileQueueStore, QueueStore},
    remote::{HttpRemoteApi, RemoteApi},
};

/// Builder for [`SyncEngine`].
///
/// Every collaborator can be injected; whatever is left unset falls back to
/// the configured default (HTTP remote client, file-backed queue store, a
/// dedicated multi-threaded runtime).
pub struct EngineBuilder {
    config: Config,
    rt: Option<Arc<Runtime>>,
    remote: Option<Arc<dyn RemoteApi>>,
    store: Option<Arc<dyn QueueStore>>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            config: Config::default(),
            rt: None,
            remote: None,
            store: None,
        }
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(
        mut self,
        config: Config,
    ) -> Self {
        self.config = config;
        self
    }

    pub fn runtime(
        mut self,
        runtime: Arc<Runtime>,
    ) -> Self {
        self.rt = Some(runtime);
        self
    }

    pub fn remote(
        mut self,
        remote: Arc<dyn RemoteApi>,
    ) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn queue_store(
        mut self,
        store: Arc<dyn QueueStore>,
    ) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> Result<SyncEngine> {
        let runtime = match self.rt {
            Some(rt) => rt,
            None => Arc::new(Builder::new_multi_thread().worker_threads(self.config.async_worker_threads.into()).enable_all().build().unwrap()),
        };

        let remote: Arc<dyn RemoteApi> = match self.remote {
            Some(remote) => remote,
            None => Arc::new(HttpRemoteApi::new(&self.config.remote)?),
        };

        let store: Arc<dyn QueueStore> = match self.store {
            Some(store) => store,
            None => Arc::new(FileQueueStore::new(&self.config.queue.dir)?),
        };

        Ok(SyncEngine::new(self.config, remote, store, runtime))
    }
}
