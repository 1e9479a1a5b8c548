//! Change notifications from the authoritative store.
//!
//! # Guarantees
//!
//! - **Trigger, not diff**: a notification says *something* changed in a
//!   table. Consumers re-sync; they never apply the payload.
//! - **At-least-once after a mutation**: every successful store mutation is
//!   followed by at least one notification. Ordering and exactly-once are not
//!   promised.
//! - **No replay**: late subscribers miss earlier notifications, and lagged
//!   receivers get `RecvError::Lagged`.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Default channel capacity for a change feed.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Which collection changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Posts,
    Comments,
}

/// What kind of change happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    /// The source cannot tell (polling, missed notifications).
    Unknown,
}

/// A single change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNotification {
    pub table: Table,
    pub kind: ChangeKind,
}

impl ChangeNotification {
    pub fn new(table: Table, kind: ChangeKind) -> Self {
        Self { table, kind }
    }

    /// "Posts may have changed" with no further detail.
    pub fn unknown() -> Self {
        Self::new(Table::Posts, ChangeKind::Unknown)
    }
}

impl fmt::Display for ChangeNotification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}:{:?}", self.table, self.kind)
    }
}

/// Broadcast channel of change notifications.
///
/// Cloning shares the channel. Stores publish, session adapters subscribe.
#[derive(Clone)]
pub struct ChangeFeed {
    sender: broadcast::Sender<ChangeNotification>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// The capacity is how many notifications buffer before slow receivers lag.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish to all current subscribers. Returns how many received it.
    pub fn publish(&self, notification: ChangeNotification) -> usize {
        self.sender.send(notification).unwrap_or(0)
    }

    /// Receive every notification published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeNotification> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ChangeFeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeFeed")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
