//! The versioned-store contract Trellis consumes.
//!
//! The store is an external collaborator: a replicated key-value store with
//! a global revision counter, atomic compare-and-set transactions, ordered
//! prefix watches, and renewable time-bound leases. Trellis depends only on
//! this trait; [`crate::store::mem::MemStore`] is the built-in embedded
//! implementation.

use crate::core::error::TrellisResult;
use crate::store::event::WatchEvent;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::watch;

/// A stored record with its revision bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvRecord {
    /// Full store key.
    pub key: String,

    /// Value bytes.
    pub value: Vec<u8>,

    /// Revision at which the key was created.
    pub create_revision: u64,

    /// Revision of the last modification.
    pub mod_revision: u64,

    /// Number of modifications since creation.
    pub version: u64,

    /// Lease the key is attached to, if any.
    pub lease_id: Option<i64>,
}

/// Read access to the snapshot a transaction executes against.
pub trait StmSnapshot: Sync {
    /// Get a record from the snapshot.
    fn get(&self, key: &str) -> Option<KvRecord>;
}

/// A buffered write inside a transaction.
#[derive(Debug, Clone)]
pub enum StmWrite {
    /// Upsert a key, optionally attached to a lease.
    Put {
        value: Vec<u8>,
        lease_id: Option<i64>,
    },
    /// Delete a key.
    Delete,
}

/// Read-modify-write view handed to a transaction function.
///
/// Reads are resolved against a snapshot taken when the transaction began
/// and recorded with the `mod_revision` observed (zero for absent keys);
/// the commit succeeds only if every read is still at that revision, so a
/// concurrent conflicting write fails the whole transaction. Writes are
/// buffered and committed atomically under a single new revision.
pub struct Stm<'a> {
    snapshot: &'a dyn StmSnapshot,
    revision: u64,
    reads: HashMap<String, u64>,
    writes: BTreeMap<String, StmWrite>,
}

impl<'a> Stm<'a> {
    /// Create a transaction view over a snapshot at the given revision.
    pub fn new(snapshot: &'a dyn StmSnapshot, revision: u64) -> Self {
        Self {
            snapshot,
            revision,
            reads: HashMap::new(),
            writes: BTreeMap::new(),
        }
    }

    /// The revision of the snapshot this transaction reads from.
    pub fn rev(&self) -> u64 {
        self.revision
    }

    /// Read a value, observing buffered writes first.
    pub fn get(&mut self, key: &str) -> Option<Vec<u8>> {
        if let Some(write) = self.writes.get(key) {
            return match write {
                StmWrite::Put { value, .. } => Some(value.clone()),
                StmWrite::Delete => None,
            };
        }
        let record = self.snapshot.get(key);
        self.reads.insert(
            key.to_string(),
            record.as_ref().map(|r| r.mod_revision).unwrap_or(0),
        );
        record.map(|r| r.value)
    }

    /// Buffer an upsert.
    pub fn put(&mut self, key: &str, value: Vec<u8>) {
        self.writes.insert(
            key.to_string(),
            StmWrite::Put {
                value,
                lease_id: None,
            },
        );
    }

    /// Buffer an upsert attached to a lease.
    pub fn put_with_lease(&mut self, key: &str, value: Vec<u8>, lease_id: i64) {
        self.writes.insert(
            key.to_string(),
            StmWrite::Put {
                value,
                lease_id: Some(lease_id),
            },
        );
    }

    /// Buffer a delete.
    pub fn del(&mut self, key: &str) {
        self.writes.insert(key.to_string(), StmWrite::Delete);
    }

    /// Keys read so far, with the mod_revision observed for each.
    pub fn reads(&self) -> &HashMap<String, u64> {
        &self.reads
    }

    /// Buffered writes in key order.
    pub fn writes(&self) -> &BTreeMap<String, StmWrite> {
        &self.writes
    }

    /// Consume the buffered writes for commit.
    pub fn take_writes(&mut self) -> BTreeMap<String, StmWrite> {
        std::mem::take(&mut self.writes)
    }
}

/// Transaction function run against an [`Stm`] view.
pub type StmFn<'a> = dyn FnMut(&mut Stm<'_>) -> TrellisResult<()> + Send + 'a;

/// Watch event callback, invoked in delivery order.
pub type WatchFn<'a> = dyn FnMut(WatchEvent) + Send + 'a;

/// The replicated, versioned key-value store contract.
///
/// Cancellation follows the runtime's shutdown-signal idiom: blocking calls
/// take a `watch::Receiver<bool>` and return cleanly once it observes
/// `true` (or its sender is dropped).
#[async_trait]
pub trait VersionedStore: Send + Sync {
    /// Subscribe to every key under `prefix` and stream events to
    /// `callback` until shutdown or an unrecoverable stream failure.
    ///
    /// Delivery starts with a bracketed full listing (`ListStart`, `List`
    /// per existing key, `ListEnd`) and continues with live events in
    /// non-decreasing revision order. Returns `Ok(())` only on shutdown.
    async fn watch(
        &self,
        prefix: &str,
        shutdown: watch::Receiver<bool>,
        callback: &mut WatchFn<'_>,
    ) -> TrellisResult<()>;

    /// Run a compare-and-set transaction and return its commit revision.
    ///
    /// A transaction with no writes commits nothing and returns the
    /// current store revision. A conflicting concurrent write fails the
    /// commit with `TxnConflict`; no internal retry is attempted.
    async fn apply_stm(&self, txn: &mut StmFn<'_>) -> TrellisResult<u64>;

    /// Grant a new lease with the given TTL in seconds.
    async fn grant(&self, ttl_seconds: i64) -> TrellisResult<i64>;

    /// Block keeping `lease_id` alive until the stream breaks or shutdown.
    ///
    /// Returns `Ok(())` only for shutdown; any other return is a failure
    /// after which the lease must be considered lost.
    async fn keep_alive(
        &self,
        lease_id: i64,
        shutdown: watch::Receiver<bool>,
    ) -> TrellisResult<()>;

    /// Upsert a single key, optionally attached to a lease.
    async fn put(&self, key: &str, value: Vec<u8>, lease_id: Option<i64>) -> TrellisResult<u64>;

    /// Read a single record.
    async fn get(&self, key: &str) -> TrellisResult<Option<KvRecord>>;

    /// Delete a single key. Returns the store revision after the call.
    async fn delete(&self, key: &str) -> TrellisResult<u64>;
}
