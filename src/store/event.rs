//! Watch stream events.
//!
//! A watch subscription delivers one ordered event sequence: a bracketed
//! initial listing (`ListStart`, one `List` per existing key, `ListEnd`)
//! with any concurrent mutations interleaved, followed by live `Update`
//! and `Delete` events in non-decreasing revision order.

use serde::{Deserialize, Serialize};

/// Action carried by a watch event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatchAction {
    /// The initial full listing is about to begin.
    ListStart,
    /// An existing key delivered as part of the initial listing.
    List,
    /// A key was created or updated.
    Update,
    /// A key was deleted.
    Delete,
    /// The initial full listing is complete.
    ListEnd,
}

/// One event on a watch stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchEvent {
    /// Event action.
    pub action: WatchAction,

    /// Full store key (`<region>/<type>/<obj-key>`). Empty for the
    /// ListStart/ListEnd markers.
    pub key: String,

    /// Value bytes. Empty for Delete and for the listing markers.
    pub value: Vec<u8>,

    /// Store revision this event was committed at. For ListStart/List/
    /// ListEnd this is the revision of the listing snapshot.
    pub revision: u64,

    /// More events of the same revision follow in this batch. The last
    /// event of a batch carries the authoritative revision to adopt.
    pub more_in_batch: bool,
}

impl WatchEvent {
    /// Create a listing marker event.
    pub fn marker(action: WatchAction, revision: u64) -> Self {
        Self {
            action,
            key: String::new(),
            value: Vec::new(),
            revision,
            more_in_batch: false,
        }
    }
}
