//! Embedded in-process versioned store.
//!
//! `MemStore` implements the [`VersionedStore`] contract for single-node
//! operation and for the test suite: a revisioned key map, compare-and-set
//! transactions checked against their read set, ordered watch fan-out over
//! a broadcast channel, and leases whose expiry purges attached keys.
//!
//! Expiry is applied by a deadline sweep on every state access; the
//! blocking `keep_alive` call renews the deadline internally while it is
//! connected, the way a store client keepalive stream would.

use crate::core::error::{TrellisError, TrellisResult};
use crate::store::api::{KvRecord, Stm, StmFn, StmSnapshot, StmWrite, VersionedStore, WatchFn};
use crate::store::event::{WatchAction, WatchEvent};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;

/// Broadcast capacity for committed event batches. A watcher that falls
/// further behind than this is disconnected with an error.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Minimum keepalive renewal period.
const MIN_RENEW_PERIOD: Duration = Duration::from_secs(1);

/// An active lease and its attached keys.
struct MemLease {
    ttl: Duration,
    deadline: Instant,
    keys: HashSet<String>,
    revoked_tx: watch::Sender<bool>,
}

/// Mutable store state behind one lock.
struct MemState {
    records: BTreeMap<String, KvRecord>,
    revision: u64,
    leases: HashMap<i64, MemLease>,
    next_lease_id: i64,
}

/// Snapshot view for transactions: a clone of the record map at one
/// revision, read without holding the store lock.
struct SnapshotView {
    records: BTreeMap<String, KvRecord>,
}

impl StmSnapshot for SnapshotView {
    fn get(&self, key: &str) -> Option<KvRecord> {
        self.records.get(key).cloned()
    }
}

/// Embedded versioned store.
pub struct MemStore {
    state: Mutex<MemState>,
    events_tx: broadcast::Sender<Arc<Vec<WatchEvent>>>,
    fail_grants: AtomicBool,
}

impl MemStore {
    /// Create an empty store.
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(MemState {
                records: BTreeMap::new(),
                revision: 0,
                leases: HashMap::new(),
                next_lease_id: 1,
            }),
            events_tx,
            fail_grants: AtomicBool::new(false),
        }
    }

    /// The current committed revision.
    pub fn current_revision(&self) -> u64 {
        self.state.lock().revision
    }

    /// Number of active leases.
    pub fn lease_count(&self) -> usize {
        self.state.lock().leases.len()
    }

    /// Store statistics.
    pub fn stats(&self) -> MemStoreStats {
        let state = self.state.lock();
        MemStoreStats {
            keys: state.records.len(),
            revision: state.revision,
            active_leases: state.leases.len(),
        }
    }

    /// Fault injection: make subsequent `grant` calls fail until cleared.
    pub fn set_grant_failure(&self, enabled: bool) {
        self.fail_grants.store(enabled, Ordering::Release);
    }

    /// Revoke a lease immediately, purging its attached keys.
    ///
    /// This is the expiry path: attached keys are deleted in one revision
    /// batch and any blocked `keep_alive` call returns an error.
    pub fn expire_lease(&self, lease_id: i64) -> TrellisResult<()> {
        self.run_locked(|state| match Self::purge_lease(state, lease_id) {
            Some(events) => Ok(((), events)),
            None => Err(TrellisError::LeaseNotFound { lease_id }),
        })
    }

    /// Run `f` under the state lock, sweeping expired leases first and
    /// broadcasting every produced event batch after the lock is released.
    fn run_locked<R>(
        &self,
        f: impl FnOnce(&mut MemState) -> TrellisResult<(R, Vec<WatchEvent>)>,
    ) -> TrellisResult<R> {
        let (result, batches) = {
            let mut state = self.state.lock();
            let mut batches = Self::sweep_expired(&mut state);
            match f(&mut state) {
                Ok((r, events)) => {
                    if !events.is_empty() {
                        batches.push(events);
                    }
                    (Ok(r), batches)
                }
                Err(e) => (Err(e), batches),
            }
        };
        for batch in batches {
            let _ = self.events_tx.send(Arc::new(batch));
        }
        result
    }

    /// Purge leases whose deadline has passed.
    fn sweep_expired(state: &mut MemState) -> Vec<Vec<WatchEvent>> {
        let now = Instant::now();
        let expired: Vec<i64> = state
            .leases
            .iter()
            .filter(|(_, lease)| lease.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        let mut batches = Vec::new();
        for lease_id in expired {
            if let Some(events) = Self::purge_lease(state, lease_id) {
                if !events.is_empty() {
                    batches.push(events);
                }
            }
        }
        batches
    }

    /// Remove a lease, delete its attached keys under one revision, and
    /// signal any blocked keepalive. Returns None if the lease is unknown.
    fn purge_lease(state: &mut MemState, lease_id: i64) -> Option<Vec<WatchEvent>> {
        let lease = state.leases.remove(&lease_id)?;
        let _ = lease.revoked_tx.send(true);

        let mut keys: Vec<String> = lease
            .keys
            .into_iter()
            .filter(|k| state.records.contains_key(k))
            .collect();
        keys.sort();
        if keys.is_empty() {
            return Some(Vec::new());
        }

        let revision = state.revision + 1;
        let mut events = Vec::with_capacity(keys.len());
        let last = keys.len() - 1;
        for (i, key) in keys.into_iter().enumerate() {
            state.records.remove(&key);
            events.push(WatchEvent {
                action: WatchAction::Delete,
                key,
                value: Vec::new(),
                revision,
                more_in_batch: i < last,
            });
        }
        state.revision = revision;
        Some(events)
    }

    /// Apply buffered transaction writes under one new revision.
    fn commit_writes(
        state: &mut MemState,
        writes: BTreeMap<String, StmWrite>,
    ) -> TrellisResult<(u64, Vec<WatchEvent>)> {
        // Validate lease attachments before mutating anything.
        for write in writes.values() {
            if let StmWrite::Put {
                lease_id: Some(id), ..
            } = write
            {
                if !state.leases.contains_key(id) {
                    return Err(TrellisError::LeaseNotFound { lease_id: *id });
                }
            }
        }

        // Deletes of absent keys commit nothing.
        let effective: Vec<(String, StmWrite)> = writes
            .into_iter()
            .filter(|(key, write)| match write {
                StmWrite::Put { .. } => true,
                StmWrite::Delete => state.records.contains_key(key),
            })
            .collect();
        if effective.is_empty() {
            return Ok((state.revision, Vec::new()));
        }

        let revision = state.revision + 1;
        let mut events = Vec::with_capacity(effective.len());
        let last = effective.len() - 1;
        for (i, (key, write)) in effective.into_iter().enumerate() {
            match write {
                StmWrite::Put { value, lease_id } => {
                    Self::apply_put(state, &key, value.clone(), revision, lease_id);
                    events.push(WatchEvent {
                        action: WatchAction::Update,
                        key,
                        value,
                        revision,
                        more_in_batch: i < last,
                    });
                }
                StmWrite::Delete => {
                    Self::apply_delete(state, &key);
                    events.push(WatchEvent {
                        action: WatchAction::Delete,
                        key,
                        value: Vec::new(),
                        revision,
                        more_in_batch: i < last,
                    });
                }
            }
        }
        state.revision = revision;
        Ok((revision, events))
    }

    /// Upsert one record, maintaining lease attachment bookkeeping.
    fn apply_put(
        state: &mut MemState,
        key: &str,
        value: Vec<u8>,
        revision: u64,
        lease_id: Option<i64>,
    ) {
        let prev_lease = state.records.get(key).and_then(|r| r.lease_id);
        if prev_lease != lease_id {
            if let Some(old) = prev_lease.and_then(|id| state.leases.get_mut(&id)) {
                old.keys.remove(key);
            }
        }
        if let Some(lease) = lease_id.and_then(|id| state.leases.get_mut(&id)) {
            lease.keys.insert(key.to_string());
        }

        match state.records.get_mut(key) {
            Some(record) => {
                record.value = value;
                record.mod_revision = revision;
                record.version += 1;
                record.lease_id = lease_id;
            }
            None => {
                state.records.insert(
                    key.to_string(),
                    KvRecord {
                        key: key.to_string(),
                        value,
                        create_revision: revision,
                        mod_revision: revision,
                        version: 1,
                        lease_id,
                    },
                );
            }
        }
    }

    /// Remove one record, detaching it from its lease.
    fn apply_delete(state: &mut MemState, key: &str) {
        if let Some(record) = state.records.remove(key) {
            if let Some(lease) = record.lease_id.and_then(|id| state.leases.get_mut(&id)) {
                lease.keys.remove(key);
            }
        }
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VersionedStore for MemStore {
    async fn watch(
        &self,
        prefix: &str,
        mut shutdown: watch::Receiver<bool>,
        callback: &mut WatchFn<'_>,
    ) -> TrellisResult<()> {
        if *shutdown.borrow() {
            return Ok(());
        }

        // Subscribe before snapshotting so no committed batch falls into
        // the gap; batches at or below the snapshot revision are skipped.
        let mut events_rx = self.events_tx.subscribe();
        let (listing, snapshot_rev) = self.run_locked(|state| {
            let listing: Vec<KvRecord> = state
                .records
                .values()
                .filter(|r| r.key.starts_with(prefix))
                .cloned()
                .collect();
            Ok(((listing, state.revision), Vec::new()))
        })?;

        callback(WatchEvent::marker(WatchAction::ListStart, snapshot_rev));
        for record in listing {
            callback(WatchEvent {
                action: WatchAction::List,
                key: record.key,
                value: record.value,
                revision: record.mod_revision,
                more_in_batch: true,
            });
        }
        callback(WatchEvent::marker(WatchAction::ListEnd, snapshot_rev));

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Ok(());
                    }
                }
                batch = events_rx.recv() => match batch {
                    Ok(events) => {
                        let mut matching: Vec<WatchEvent> = events
                            .iter()
                            .filter(|e| e.revision > snapshot_rev && e.key.starts_with(prefix))
                            .cloned()
                            .collect();
                        // Recompute batch markers after filtering so the
                        // last delivered event of a revision always carries
                        // more_in_batch == false.
                        let count = matching.len();
                        for (i, event) in matching.iter_mut().enumerate() {
                            event.more_in_batch = i + 1 < count;
                        }
                        for event in matching {
                            callback(event);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        return Err(TrellisError::WatchTerminated {
                            message: format!("watch stream lagged by {} event batches", missed),
                        });
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(TrellisError::WatchTerminated {
                            message: "event stream closed".to_string(),
                        });
                    }
                },
            }
        }
    }

    async fn apply_stm(&self, txn: &mut StmFn<'_>) -> TrellisResult<u64> {
        let (snapshot, snapshot_rev) = self.run_locked(|state| {
            Ok((
                (
                    SnapshotView {
                        records: state.records.clone(),
                    },
                    state.revision,
                ),
                Vec::new(),
            ))
        })?;

        let mut stm = Stm::new(&snapshot, snapshot_rev);
        txn(&mut stm)?;

        // The commit lands on a later poll, as it would across a store
        // round-trip; concurrent transactions can interleave here.
        tokio::task::yield_now().await;

        self.run_locked(|state| {
            for (key, seen_rev) in stm.reads() {
                let current = state
                    .records
                    .get(key)
                    .map(|r| r.mod_revision)
                    .unwrap_or(0);
                if current != *seen_rev {
                    return Err(TrellisError::TxnConflict { key: key.clone() });
                }
            }
            Self::commit_writes(state, stm.take_writes())
        })
    }

    async fn grant(&self, ttl_seconds: i64) -> TrellisResult<i64> {
        if self.fail_grants.load(Ordering::Acquire) {
            return Err(TrellisError::unavailable("lease grant refused"));
        }
        if ttl_seconds <= 0 {
            return Err(TrellisError::invalid("lease TTL must be > 0"));
        }
        let ttl = Duration::from_secs(ttl_seconds as u64);
        self.run_locked(|state| {
            let lease_id = state.next_lease_id;
            state.next_lease_id += 1;
            let (revoked_tx, _) = watch::channel(false);
            state.leases.insert(
                lease_id,
                MemLease {
                    ttl,
                    deadline: Instant::now() + ttl,
                    keys: HashSet::new(),
                    revoked_tx,
                },
            );
            Ok((lease_id, Vec::new()))
        })
    }

    async fn keep_alive(
        &self,
        lease_id: i64,
        mut shutdown: watch::Receiver<bool>,
    ) -> TrellisResult<()> {
        let (mut revoked_rx, ttl) = self.run_locked(|state| {
            let lease = state
                .leases
                .get(&lease_id)
                .ok_or(TrellisError::LeaseNotFound { lease_id })?;
            Ok(((lease.revoked_tx.subscribe(), lease.ttl), Vec::new()))
        })?;
        let renew_period = std::cmp::max(ttl / 3, MIN_RENEW_PERIOD);

        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            // Renew first so a freshly granted lease cannot expire under a
            // connected keepalive.
            let renewed = self.run_locked(|state| match state.leases.get_mut(&lease_id) {
                Some(lease) => {
                    lease.deadline = Instant::now() + lease.ttl;
                    Ok((true, Vec::new()))
                }
                None => Ok((false, Vec::new())),
            })?;
            if !renewed {
                return Err(TrellisError::LeaseLost {
                    lease_id,
                    message: "lease expired".to_string(),
                });
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Ok(());
                    }
                }
                _ = revoked_rx.changed() => {
                    return Err(TrellisError::LeaseLost {
                        lease_id,
                        message: "lease revoked".to_string(),
                    });
                }
                _ = tokio::time::sleep(renew_period) => {}
            }
        }
    }

    async fn put(&self, key: &str, value: Vec<u8>, lease_id: Option<i64>) -> TrellisResult<u64> {
        let mut writes = BTreeMap::new();
        writes.insert(key.to_string(), StmWrite::Put { value, lease_id });
        self.run_locked(|state| Self::commit_writes(state, writes))
    }

    async fn get(&self, key: &str) -> TrellisResult<Option<KvRecord>> {
        self.run_locked(|state| Ok((state.records.get(key).cloned(), Vec::new())))
    }

    async fn delete(&self, key: &str) -> TrellisResult<u64> {
        let mut writes = BTreeMap::new();
        writes.insert(key.to_string(), StmWrite::Delete);
        self.run_locked(|state| Self::commit_writes(state, writes))
    }
}

/// Store statistics.
#[derive(Debug, Clone)]
pub struct MemStoreStats {
    /// Number of live keys.
    pub keys: usize,
    /// Current committed revision.
    pub revision: u64,
    /// Number of active leases.
    pub active_leases: usize,
}
