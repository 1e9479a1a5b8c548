//! In-process harness: memory store, spy gateway and a reconciler wired together.

use std::sync::Arc;
use std::time::Duration;

use feed_sync::testing::SpyGateway;
use feed_sync::{
    ChangeFeed, FeedReconciler, FeedSignal, MemoryStore, Post, StoreOp, SubscriptionState,
};
use tokio::sync::broadcast;

/// Respect RUST_LOG in tests. Run with: RUST_LOG=debug cargo test -- --nocapture
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub struct FeedHarness {
    pub changes: ChangeFeed,
    pub store: Arc<MemoryStore>,
    pub spy: Arc<SpyGateway>,
    pub reconciler: Arc<FeedReconciler>,
}

impl FeedHarness {
    pub fn new() -> Self {
        init_tracing();
        let changes = ChangeFeed::new();
        let store = Arc::new(MemoryStore::with_change_feed(changes.clone()));
        let spy = Arc::new(SpyGateway::new(store.clone()));
        let reconciler = Arc::new(FeedReconciler::new(spy.clone()));
        Self {
            changes,
            store,
            spy,
            reconciler,
        }
    }

    /// Seed the store and load it into the reconciler.
    pub async fn loaded(posts: Vec<Post>) -> Self {
        let harness = Self::new();
        for post in posts {
            harness.store.insert(post);
        }
        harness
            .reconciler
            .refresh()
            .await
            .expect("initial load failed");
        harness
    }

    pub fn fetches(&self) -> usize {
        self.spy.calls(StoreOp::ListPosts)
    }
}

/// Let every spawned task run up to its next await point.
pub async fn settle_tasks() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

/// Next signal, failing the test if none arrives.
pub async fn next_signal(signals: &mut broadcast::Receiver<FeedSignal>) -> FeedSignal {
    tokio::time::timeout(Duration::from_secs(1), signals.recv())
        .await
        .expect("timed out waiting for a signal")
        .expect("signal channel closed")
}

/// Wait until the change feed has exactly `count` subscribers.
pub async fn wait_for_subscribers(changes: &ChangeFeed, count: usize) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while changes.subscriber_count() != count {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("subscriber count never settled");
}

pub fn assert_subscribed(state: SubscriptionState) {
    assert_eq!(state, SubscriptionState::Subscribed);
}
