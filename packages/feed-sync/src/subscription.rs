//! Change feed adapter.
//!
//! Bridges a [`ChangeFeed`] to a [`FeedReconciler`]. Two states:
//!
//! ```text
//!                 subscribe()
//!  Unsubscribed ───────────────► Subscribed
//!       ▲                            │
//!       └────────────────────────────┘
//!        unsubscribe() / drop / feed closed
//! ```
//!
//! While subscribed, each notification becomes one refresh request on the
//! reconciler, where the refresh gate coalesces them. Requests never wait on
//! a fetch, so a held fetch does not block the receiver and a flood of
//! notifications costs one flag update each. The adapter never looks inside
//! a notification. Teardown aborts the forwarding task, so no later
//! notification reaches the reconciler. Store calls already started are not
//! cancelled; once the session closes the reconciler, their results are
//! discarded.

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::change_feed::{ChangeFeed, ChangeNotification};
use crate::reconciler::FeedReconciler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Subscribed,
    Unsubscribed,
}

#[derive(Debug, Default)]
pub struct FeedSubscription {
    task: Option<JoinHandle<()>>,
}

impl FeedSubscription {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SubscriptionState {
        match &self.task {
            Some(task) if !task.is_finished() => SubscriptionState::Subscribed,
            _ => SubscriptionState::Unsubscribed,
        }
    }

    /// Start forwarding notifications. No-op if already subscribed.
    ///
    /// The receiver is created before this returns, so notifications
    /// published right after `subscribe` are not missed. Must be called
    /// from within a Tokio runtime.
    pub fn subscribe(&mut self, feed: &ChangeFeed, reconciler: Arc<FeedReconciler>) {
        if self.state() == SubscriptionState::Subscribed {
            debug!("change feed already subscribed");
            return;
        }
        let receiver = feed.subscribe();
        self.task = Some(tokio::spawn(forward(receiver, reconciler)));
        info!("subscribed to change feed");
    }

    /// Stop forwarding. No-op if not subscribed.
    pub fn unsubscribe(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            info!("unsubscribed from change feed");
        }
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

async fn forward(
    mut receiver: broadcast::Receiver<ChangeNotification>,
    reconciler: Arc<FeedReconciler>,
) {
    loop {
        let notification = match receiver.recv().await {
            Ok(notification) => notification,
            Err(RecvError::Lagged(missed)) => {
                warn!(missed, "change feed lagged, forcing re-sync");
                ChangeNotification::unknown()
            }
            Err(RecvError::Closed) => {
                debug!("change feed closed");
                break;
            }
        };

        if reconciler.is_closed() {
            debug!("reconciler closed, stopping change feed adapter");
            break;
        }

        reconciler.on_external_change(notification);
    }
}
