//! Keyed debounce scheduling for entity mutations.
//!
//! Rapid repeats of the same gesture (dragging a node, typing a tooltip)
//! restart a per-key timer; only the latest payload survives the window.
//! On quiescence the (key, payload) pair is delivered into the scheduler's
//! output queue, where the orchestrator loop picks it up. At most one
//! delivery happens per quiescence window per key.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::{runtime::Handle, task::JoinHandle};

use crate::common::Queue;

struct Entry<P> {
    payload: P,
    generation: u64,
    timer: JoinHandle<()>,
}

struct Inner<K, P> {
    delay: Duration,
    runtime: Handle,
    entries: Mutex<HashMap<K, Entry<P>>>,
    generations: AtomicU64,
    output: Arc<Queue<(K, P)>>,
}

/// Per-key debounced delivery of deferred mutation payloads.
pub struct MutationScheduler<K, P> {
    inner: Arc<Inner<K, P>>,
}

impl<K, P> Clone for MutationScheduler<K, P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, P> MutationScheduler<K, P>
where
    K: Clone + Eq + std::hash::Hash + Send + Sync + 'static,
    P: Send + 'static,
{
    pub fn new(
        delay: Duration,
        runtime: Handle,
        output: Arc<Queue<(K, P)>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                delay,
                runtime,
                entries: Mutex::new(HashMap::new()),
                generations: AtomicU64::new(0),
                output,
            }),
        }
    }

    /// (Re)start the timer for `key`; `payload` replaces any pending one.
    pub fn schedule(
        &self,
        key: K,
        payload: P,
    ) {
        let generation = self.inner.generations.fetch_add(1, Ordering::Relaxed) + 1;

        let timer = {
            let inner = self.inner.clone();
            let key = key.clone();
            self.inner.runtime.spawn(async move {
                tokio::time::sleep(inner.delay).await;
                Inner::fire(&inner, &key, generation);
            })
        };

        let mut entries = self.inner.entries.lock().unwrap();
        if let Some(prev) = entries.insert(
            key,
            Entry {
                payload,
                generation,
                timer,
            },
        ) {
            prev.timer.abort();
        }
    }

    /// Deliver the pending payload for `key` immediately, bypassing the
    /// remaining wait. Returns false when nothing was pending.
    pub fn flush(
        &self,
        key: &K,
    ) -> bool {
        let entry = {
            let mut entries = self.inner.entries.lock().unwrap();
            entries.remove(key)
        };

        match entry {
            Some(entry) => {
                entry.timer.abort();
                let _ = self.inner.output.send((key.clone(), entry.payload));
                true
            }
            None => false,
        }
    }

    /// Discard the pending payload for `key` without delivering it.
    pub fn cancel(
        &self,
        key: &K,
    ) -> bool {
        let mut entries = self.inner.entries.lock().unwrap();
        match entries.remove(key) {
            Some(entry) => {
                entry.timer.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel every pending timer. Called at session teardown so nothing
    /// fires into a discarded context.
    pub fn clear_all(&self) {
        let mut entries = self.inner.entries.lock().unwrap();
        for (_, entry) in entries.drain() {
            entry.timer.abort();
        }
    }

    pub fn is_pending(
        &self,
        key: &K,
    ) -> bool {
        self.inner.entries.lock().unwrap().contains_key(key)
    }
}

impl<K, P> Inner<K, P>
where
    K: Clone + Eq + std::hash::Hash,
{
    fn fire(
        inner: &Arc<Inner<K, P>>,
        key: &K,
        generation: u64,
    ) {
        let entry = {
            let mut entries = inner.entries.lock().unwrap();
            // a newer schedule() owns this key now; its own timer will fire
            match entries.get(key) {
                Some(current) if current.generation == generation => entries.remove(key),
                _ => None,
            }
        };

        if let Some(entry) = entry {
            let _ = inner.output.send((key.clone(), entry.payload));
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn scheduler(delay_ms: u64) -> (MutationScheduler<String, u32>, Arc<Queue<(String, u32)>>) {
        let output = Queue::new(64);
        let scheduler = MutationScheduler::new(Duration::from_millis(delay_ms), Handle::current(), output.clone());
        (scheduler, output)
    }

    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_later_payload_replaces_earlier() {
        let (scheduler, output) = scheduler(500);

        scheduler.schedule("k".to_string(), 1);
        scheduler.schedule("k".to_string(), 2);

        let (key, payload) = output.next_async().await.unwrap();
        assert_eq!(key, "k");
        assert_eq!(payload, 2);

        settle().await;
        assert!(output.try_next().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_fires_before_quiescence() {
        let (scheduler, output) = scheduler(500);

        scheduler.schedule("k".to_string(), 1);
        tokio::time::advance(Duration::from_millis(499)).await;
        settle().await;
        assert!(output.try_next().is_none());

        tokio::time::advance(Duration::from_millis(2)).await;
        settle().await;
        assert_eq!(output.try_next(), Some(("k".to_string(), 1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_extends_window() {
        let (scheduler, output) = scheduler(500);

        scheduler.schedule("k".to_string(), 1);
        tokio::time::advance(Duration::from_millis(400)).await;
        scheduler.schedule("k".to_string(), 2);
        tokio::time::advance(Duration::from_millis(400)).await;
        settle().await;
        assert!(output.try_next().is_none());

        tokio::time::advance(Duration::from_millis(101)).await;
        settle().await;
        assert_eq!(output.try_next(), Some(("k".to_string(), 2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_is_synchronous() {
        let (scheduler, output) = scheduler(500);

        scheduler.schedule("k".to_string(), 7);
        assert!(scheduler.flush(&"k".to_string()));
        assert_eq!(output.try_next(), Some(("k".to_string(), 7)));

        // nothing pending anymore
        assert!(!scheduler.flush(&"k".to_string()));
        tokio::time::advance(Duration::from_millis(600)).await;
        settle().await;
        assert!(output.try_next().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_discards() {
        let (scheduler, output) = scheduler(500);

        scheduler.schedule("k".to_string(), 1);
        assert!(scheduler.cancel(&"k".to_string()));
        tokio::time::advance(Duration::from_millis(600)).await;
        settle().await;
        assert!(output.try_next().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_all() {
        let (scheduler, output) = scheduler(500);

        scheduler.schedule("a".to_string(), 1);
        scheduler.schedule("b".to_string(), 2);
        scheduler.clear_all();

        tokio::time::advance(Duration::from_millis(600)).await;
        settle().await;
        assert!(output.try_next().is_none());
        assert!(!scheduler.is_pending(&"a".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let (scheduler, output) = scheduler(500);

        scheduler.schedule("a".to_string(), 1);
        scheduler.schedule("b".to_string(), 2);

        tokio::time::advance(Duration::from_millis(501)).await;
        settle().await;

        let mut delivered = vec![output.try_next().unwrap(), output.try_next().unwrap()];
        delivered.sort();
        assert_eq!(delivered, vec![("a".to_string(), 1), ("b".to_string(), 2)]);
    }
}
