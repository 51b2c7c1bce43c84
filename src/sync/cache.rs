//! Typed cache contract and generic projection.
//!
//! A typed cache is the in-memory projection of one object type, mutated
//! exclusively by the sync engine's dispatch task and read concurrently by
//! request handlers. [`ObjCache`] implements the contract for any serde
//! domain object; the bulk-reload path marks entries during the listing
//! and prunes whatever was not seen, which is how store-side deletions
//! that happened while the process was not watching (lease expiry
//! included) reach the caches.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;

/// Capability interface the sync engine dispatches through.
///
/// Implementations serialize their own reads; all four sync entry points
/// are invoked from the single dispatch task only.
pub trait TypedCache: Send + Sync {
    /// Stable type string, the second component of every store key this
    /// cache owns.
    fn type_string(&self) -> &str;

    /// A bulk reload is starting; existing entries are candidates for
    /// pruning until re-listed.
    fn sync_list_start(&self);

    /// Upsert one object from its store value.
    fn sync_update(&self, obj_key: &str, value: &[u8], revision: u64);

    /// Delete one object.
    fn sync_delete(&self, obj_key: &str, revision: u64);

    /// The bulk reload finished; entries not seen since
    /// `sync_list_start` are pruned.
    fn sync_list_end(&self);
}

/// A domain object projectable into an [`ObjCache`].
pub trait CacheObject:
    Clone + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// Stable type string for this object type.
    const TYPE_STRING: &'static str;

    /// Canonical object key, the third component of the store key.
    fn obj_key(&self) -> String;
}

/// A change applied to a cache, delivered to subscribers on the dispatch
/// task. Callbacks must not block.
#[derive(Debug, Clone)]
pub enum CacheChange<T> {
    /// An object was created or updated.
    Updated { obj_key: String, value: Box<T> },
    /// An object was deleted (explicitly or by list-end pruning).
    Deleted { obj_key: String },
}

type CacheSubscriber<T> = Box<dyn Fn(&CacheChange<T>) + Send + Sync>;

struct CacheEntry<T> {
    value: T,
    revision: u64,
    seen: bool,
}

/// Generic in-memory projection of one object type.
pub struct ObjCache<T: CacheObject> {
    entries: RwLock<HashMap<String, CacheEntry<T>>>,
    subscribers: RwLock<Vec<CacheSubscriber<T>>>,
}

impl<T: CacheObject> ObjCache<T> {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Get an object by key.
    pub fn get(&self, obj_key: &str) -> Option<T> {
        self.entries
            .read()
            .unwrap()
            .get(obj_key)
            .map(|e| e.value.clone())
    }

    /// Revision at which an object was last applied.
    pub fn revision_of(&self, obj_key: &str) -> Option<u64> {
        self.entries.read().unwrap().get(obj_key).map(|e| e.revision)
    }

    /// Number of cached objects.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().unwrap().is_empty()
    }

    /// All cached object keys.
    pub fn keys(&self) -> Vec<String> {
        self.entries.read().unwrap().keys().cloned().collect()
    }

    /// Snapshot of all cached objects.
    pub fn snapshot(&self) -> Vec<T> {
        self.entries
            .read()
            .unwrap()
            .values()
            .map(|e| e.value.clone())
            .collect()
    }

    /// Subscribe to cache changes.
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&CacheChange<T>) + Send + Sync + 'static,
    {
        self.subscribers.write().unwrap().push(Box::new(callback));
    }

    fn notify(&self, changes: &[CacheChange<T>]) {
        let subscribers = self.subscribers.read().unwrap();
        for change in changes {
            for subscriber in subscribers.iter() {
                subscriber(change);
            }
        }
    }
}

impl<T: CacheObject> Default for ObjCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: CacheObject> TypedCache for ObjCache<T> {
    fn type_string(&self) -> &str {
        T::TYPE_STRING
    }

    fn sync_list_start(&self) {
        let mut entries = self.entries.write().unwrap();
        for entry in entries.values_mut() {
            entry.seen = false;
        }
    }

    fn sync_update(&self, obj_key: &str, value: &[u8], revision: u64) {
        let decoded: T = match serde_json::from_slice(value) {
            Ok(v) => v,
            Err(error) => {
                tracing::warn!(
                    type_string = T::TYPE_STRING,
                    obj_key,
                    %error,
                    "dropping undecodable object value"
                );
                return;
            }
        };
        let change = {
            let mut entries = self.entries.write().unwrap();
            entries.insert(
                obj_key.to_string(),
                CacheEntry {
                    value: decoded.clone(),
                    revision,
                    seen: true,
                },
            );
            CacheChange::Updated {
                obj_key: obj_key.to_string(),
                value: Box::new(decoded),
            }
        };
        self.notify(std::slice::from_ref(&change));
    }

    fn sync_delete(&self, obj_key: &str, _revision: u64) {
        let removed = self.entries.write().unwrap().remove(obj_key).is_some();
        if removed {
            let change = CacheChange::Deleted {
                obj_key: obj_key.to_string(),
            };
            self.notify(std::slice::from_ref(&change));
        }
    }

    fn sync_list_end(&self) {
        let changes: Vec<CacheChange<T>> = {
            let mut entries = self.entries.write().unwrap();
            let pruned: Vec<String> = entries
                .iter()
                .filter(|(_, e)| !e.seen)
                .map(|(k, _)| k.clone())
                .collect();
            for key in &pruned {
                entries.remove(key);
            }
            pruned
                .into_iter()
                .map(|obj_key| CacheChange::Deleted { obj_key })
                .collect()
        };
        if !changes.is_empty() {
            self.notify(&changes);
        }
    }
}
