//! Watch/dispatch engine and revision barrier.
//!
//! `SyncEngine` owns the single authoritative path by which store
//! mutations reach the in-memory caches: one background task consumes the
//! region's watch stream and routes each event to the cache registered
//! for the key's type string. Because revisions are global and delivered
//! in non-decreasing order, and because only this task mutates caches,
//! all cache mutations are serialized in store-revision order across
//! object types.
//!
//! Writers get read-your-own-write consistency through
//! [`SyncEngine::apply_stm_wait`]: commit a transaction, then block until
//! the synced revision reaches the commit revision. Waiters are parked on
//! a `watch` channel so every state change wakes all of them, and the
//! dispatch loop's exit releases any waiter whose revision will never
//! arrive.

use crate::core::error::{TrellisError, TrellisResult};
use crate::store::api::{StmFn, VersionedStore};
use crate::store::event::{WatchAction, WatchEvent};
use crate::store::key;
use crate::sync::cache::TypedCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Shared dispatch-loop state broadcast to waiters.
#[derive(Debug, Clone, Copy, Default)]
struct SyncState {
    /// Highest revision fully applied to all caches. Never decreases.
    rev: u64,
    /// The initial full listing has completed.
    listed: bool,
    /// The dispatch loop has permanently exited.
    done: bool,
}

/// State shared between the engine handle and the dispatch task.
struct EngineShared {
    store: Arc<dyn VersionedStore>,
    region: u32,
    caches: RwLock<HashMap<String, Arc<dyn TypedCache>>>,
    state_tx: watch::Sender<SyncState>,
}

impl EngineShared {
    /// The dispatch task body: the only mutator of caches.
    async fn run_dispatch(&self, shutdown_rx: watch::Receiver<bool>) {
        let prefix = key::region_prefix(self.region);
        let result = self
            .store
            .watch(&prefix, shutdown_rx, &mut |event| self.apply_event(event))
            .await;
        match result {
            Ok(()) => tracing::info!(region = self.region, "watch stream stopped"),
            Err(error) => {
                tracing::warn!(region = self.region, %error, "watch stream failed")
            }
        }
        // Wake every waiter; unmet revision waits turn into errors.
        self.state_tx.send_modify(|s| s.done = true);
    }

    /// Apply one watch event to the registered caches.
    fn apply_event(&self, event: WatchEvent) {
        match event.action {
            WatchAction::ListStart => {
                for cache in self.caches.read().unwrap().values() {
                    cache.sync_list_start();
                }
            }
            WatchAction::List | WatchAction::Update => {
                if let Some((cache, obj_key)) = self.resolve(&event.key) {
                    cache.sync_update(&obj_key, &event.value, event.revision);
                }
                if event.action == WatchAction::Update && !event.more_in_batch {
                    self.advance_revision(event.revision);
                }
            }
            WatchAction::Delete => {
                if let Some((cache, obj_key)) = self.resolve(&event.key) {
                    cache.sync_delete(&obj_key, event.revision);
                }
                if !event.more_in_batch {
                    self.advance_revision(event.revision);
                }
            }
            WatchAction::ListEnd => {
                for cache in self.caches.read().unwrap().values() {
                    cache.sync_list_end();
                }
                self.advance_revision(event.revision);
                self.state_tx.send_modify(|s| s.listed = true);
            }
        }
    }

    /// Resolve an event key to its owning cache and object key.
    ///
    /// Unknown type strings are dropped with a warning: controllers of
    /// different versions share one store, so an unrecognized type must
    /// not be fatal.
    fn resolve(&self, store_key: &str) -> Option<(Arc<dyn TypedCache>, String)> {
        let parsed = match key::parse_store_key(store_key) {
            Ok(parsed) => parsed,
            Err(_) => {
                tracing::warn!(key = store_key, "dropping event with malformed key");
                return None;
            }
        };
        match self.caches.read().unwrap().get(parsed.type_string) {
            Some(cache) => Some((Arc::clone(cache), parsed.obj_key.to_string())),
            None => {
                tracing::warn!(
                    type_string = parsed.type_string,
                    key = store_key,
                    "dropping event for unregistered object type"
                );
                None
            }
        }
    }

    /// Advance the synced revision, waking all waiters.
    fn advance_revision(&self, revision: u64) {
        self.state_tx.send_modify(|s| {
            if revision > s.rev {
                s.rev = revision;
            }
        });
    }
}

/// Watch/dispatch engine for one region.
pub struct SyncEngine {
    shared: Arc<EngineShared>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncEngine {
    /// Create an engine over a store, scoped to a region.
    pub fn new(store: Arc<dyn VersionedStore>, region: u32) -> Self {
        let (state_tx, _) = watch::channel(SyncState::default());
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shared: Arc::new(EngineShared {
                store,
                region,
                caches: RwLock::new(HashMap::new()),
                state_tx,
            }),
            shutdown_tx,
            task: Mutex::new(None),
        }
    }

    /// The region this engine synchronizes.
    pub fn region(&self) -> u32 {
        self.shared.region
    }

    /// Register a typed cache under its type string.
    ///
    /// Must be called for every object type before [`start`]. A duplicate
    /// registration replaces the previous cache with a warning; callers
    /// must not rely on that.
    ///
    /// [`start`]: SyncEngine::start
    pub fn register_cache(&self, cache: Arc<dyn TypedCache>) {
        let type_string = cache.type_string().to_string();
        let replaced = self
            .shared
            .caches
            .write()
            .unwrap()
            .insert(type_string.clone(), cache)
            .is_some();
        if replaced {
            tracing::warn!(%type_string, "replacing cache registration");
        }
    }

    /// Start the dispatch loop and block until the initial full listing
    /// has been applied to every registered cache.
    ///
    /// After this returns, the caches hold a complete, consistent snapshot
    /// of the store as of some witnessed revision, and live events
    /// continue to flow with no gap.
    pub async fn start(&self) -> TrellisResult<()> {
        {
            let mut task = self.task.lock();
            if task.is_some() {
                return Err(TrellisError::invalid("sync engine already started"));
            }
            let shared = Arc::clone(&self.shared);
            let shutdown_rx = self.shutdown_tx.subscribe();
            *task = Some(tokio::spawn(async move {
                shared.run_dispatch(shutdown_rx).await;
            }));
        }

        let mut state_rx = self.shared.state_tx.subscribe();
        let state = *state_rx
            .wait_for(|s| s.listed || s.done)
            .await
            .map_err(|_| TrellisError::internal("sync state channel closed"))?;
        if state.done && !state.listed {
            return Err(TrellisError::WatchTerminated {
                message: "watch stream ended before the initial listing completed".to_string(),
            });
        }
        tracing::info!(
            region = self.shared.region,
            revision = state.rev,
            "initial store listing applied"
        );
        Ok(())
    }

    /// Request cancellation and block until the dispatch loop has exited.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(error) = task.await {
                tracing::warn!(%error, "dispatch loop task panicked");
            }
        }
    }

    /// Highest revision applied to all caches so far.
    pub fn synced_revision(&self) -> u64 {
        self.shared.state_tx.borrow().rev
    }

    /// Check if the dispatch loop has permanently exited.
    pub fn is_done(&self) -> bool {
        self.shared.state_tx.borrow().done
    }

    /// Engine statistics.
    pub fn stats(&self) -> SyncStats {
        let state = *self.shared.state_tx.borrow();
        SyncStats {
            synced_revision: state.rev,
            listed: state.listed,
            done: state.done,
            registered_caches: self.shared.caches.read().unwrap().len(),
        }
    }

    /// Run a compare-and-set transaction, then block until its commit is
    /// visible in the caches.
    ///
    /// On success every cache touched by the transaction (and everything
    /// committed before it) is readable by any task. A failed transaction
    /// is surfaced without waiting; a dispatch-loop exit while waiting
    /// surfaces as [`TrellisError::SyncStopped`] instead of hanging.
    pub async fn apply_stm_wait(&self, txn: &mut StmFn<'_>) -> TrellisResult<u64> {
        let revision = self.shared.store.apply_stm(txn).await?;
        self.wait_for_revision(revision).await?;
        Ok(revision)
    }

    /// Block until the synced revision reaches `revision`.
    pub async fn wait_for_revision(&self, revision: u64) -> TrellisResult<()> {
        let mut state_rx = self.shared.state_tx.subscribe();
        let state = *state_rx
            .wait_for(|s| s.rev >= revision || s.done)
            .await
            .map_err(|_| TrellisError::internal("sync state channel closed"))?;
        if state.rev >= revision {
            Ok(())
        } else {
            Err(TrellisError::SyncStopped {
                waited: revision,
                reached: state.rev,
            })
        }
    }
}

/// Engine statistics.
#[derive(Debug, Clone)]
pub struct SyncStats {
    /// Highest revision applied to all caches.
    pub synced_revision: u64,
    /// The initial listing has completed.
    pub listed: bool,
    /// The dispatch loop has exited.
    pub done: bool,
    /// Number of registered typed caches.
    pub registered_caches: usize,
}
