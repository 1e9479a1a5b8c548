//! Session lifecycle.
//!
//! A [`Session`] is who is signed in; it is created at login and passed in,
//! never read from ambient state. A [`FeedSession`] is one mounted feed for
//! that user: it owns the reconciler and the change feed adapter, and ending
//! it (explicitly, at logout, or by drop) unsubscribes and closes the
//! reconciler in that order.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::info;

use crate::change_feed::ChangeFeed;
use crate::config::FeedConfig;
use crate::error::FeedError;
use crate::gateway::StoreGateway;
use crate::id::{PostId, UserId};
use crate::like::LikeState;
use crate::model::{Author, Comment, FeedState, Post, ProfileSummary};
use crate::reconciler::{FeedReconciler, FeedSignal, RefreshOutcome};
use crate::subscription::{FeedSubscription, SubscriptionState};

/// The signed-in user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    user: Author,
}

impl Session {
    pub fn new(user: Author) -> Self {
        Self { user }
    }

    pub fn user(&self) -> &Author {
        &self.user
    }

    pub fn user_id(&self) -> UserId {
        self.user.id
    }
}

/// A mounted feed bound to one session.
pub struct FeedSession {
    session: Session,
    reconciler: Arc<FeedReconciler>,
    subscription: FeedSubscription,
}

impl FeedSession {
    /// Mount the feed: build the reconciler, subscribe to changes, then load.
    ///
    /// Subscribing first means a change landing during the initial load still
    /// triggers a follow-up refresh. If the initial load fails the session is
    /// torn down and the error returned.
    pub async fn start(
        session: Session,
        gateway: Arc<dyn StoreGateway>,
        changes: &ChangeFeed,
        config: &FeedConfig,
    ) -> Result<Self, FeedError> {
        let reconciler = Arc::new(FeedReconciler::with_signal_capacity(
            gateway,
            config.signal_capacity,
        ));
        let mut subscription = FeedSubscription::new();
        subscription.subscribe(changes, reconciler.clone());

        let feed = Self {
            session,
            reconciler,
            subscription,
        };
        feed.reconciler.refresh().await?;

        info!(user_id = %feed.session.user_id(), "feed session started");
        Ok(feed)
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn reconciler(&self) -> &Arc<FeedReconciler> {
        &self.reconciler
    }

    pub fn subscription_state(&self) -> SubscriptionState {
        self.subscription.state()
    }

    pub fn snapshot(&self) -> FeedState {
        self.reconciler.snapshot()
    }

    pub fn watch(&self) -> watch::Receiver<FeedState> {
        self.reconciler.watch()
    }

    pub fn signals(&self) -> broadcast::Receiver<FeedSignal> {
        self.reconciler.signals()
    }

    /// Summary of the signed-in user's own posts.
    pub fn profile(&self) -> ProfileSummary {
        self.reconciler.profile_summary(self.session.user_id())
    }

    pub async fn refresh(&self) -> Result<RefreshOutcome, FeedError> {
        self.reconciler.refresh().await
    }

    pub async fn post(&self, body: &str) -> Result<Post, FeedError> {
        self.reconciler.submit_post(body, self.session.user()).await
    }

    pub async fn comment(&self, post_id: PostId, body: &str) -> Result<Comment, FeedError> {
        self.reconciler
            .submit_comment(post_id, body, self.session.user())
            .await
    }

    pub async fn like(&self, post_id: PostId) -> Result<LikeState, FeedError> {
        self.reconciler
            .toggle_like(post_id, self.session.user_id())
            .await
    }

    pub async fn delete(&self, post_id: PostId) -> Result<(), FeedError> {
        self.reconciler
            .delete_post(post_id, self.session.user_id())
            .await
    }

    pub fn expand(&self, post_id: PostId) {
        self.reconciler.toggle_expanded(post_id);
    }

    /// Unmount or log out.
    pub fn end(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        self.subscription.unsubscribe();
        if !self.reconciler.is_closed() {
            self.reconciler.close();
            info!(user_id = %self.session.user_id(), "feed session ended");
        }
    }
}

impl Drop for FeedSession {
    fn drop(&mut self) {
        self.teardown();
    }
}
