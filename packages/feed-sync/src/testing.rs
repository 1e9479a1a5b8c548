//! Test doubles for code built on the reconciler.
//!
//! # Quick Start
//!
//! ```ignore
//! use feed_sync::testing::SpyGateway;
//! use feed_sync::{FeedReconciler, MemoryStore, StoreOp};
//!
//! let spy = Arc::new(SpyGateway::new(Arc::new(MemoryStore::new())));
//! let reconciler = FeedReconciler::new(spy.clone());
//!
//! spy.fail_next(StoreOp::CreatePost, StoreError::Transport("offline".into()));
//! assert!(reconciler.submit_post("hi", &author).await.is_err());
//! assert_eq!(spy.calls(StoreOp::CreatePost), 1);
//! ```
//!
//! ## Holding Fetches In Flight
//!
//! ```ignore
//! spy.hold_fetches();
//! let pending = tokio::spawn(async move { reconciler.refresh().await });
//! spy.wait_for_fetches(1).await;   // the fetch is now in flight
//! // ... trigger more refreshes ...
//! spy.release_fetch();
//! ```

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{watch, Semaphore};

use crate::error::{StoreError, StoreOp};
use crate::gateway::StoreGateway;
use crate::id::{PostId, UserId};
use crate::model::{Author, Comment, CommentDraft, LikeResult, Post, PostDraft};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Spy Gateway
// =============================================================================

/// Wraps a gateway, recording every call and injecting failures on demand.
pub struct SpyGateway {
    inner: Arc<dyn StoreGateway>,
    calls: Mutex<HashMap<StoreOp, usize>>,
    failures: Mutex<HashMap<StoreOp, VecDeque<StoreError>>>,
    holding: AtomicBool,
    fetch_permits: Semaphore,
    fetches_started: watch::Sender<usize>,
}

impl SpyGateway {
    pub fn new(inner: Arc<dyn StoreGateway>) -> Self {
        let (fetches_started, _) = watch::channel(0);
        Self {
            inner,
            calls: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            holding: AtomicBool::new(false),
            fetch_permits: Semaphore::new(0),
            fetches_started,
        }
    }

    /// Number of calls made for `op`, including failed ones.
    pub fn calls(&self, op: StoreOp) -> usize {
        lock(&self.calls).get(&op).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        lock(&self.calls).values().sum()
    }

    /// Queue a failure for the next call of `op`. Queued failures are used in order.
    pub fn fail_next(&self, op: StoreOp, error: StoreError) {
        lock(&self.failures).entry(op).or_default().push_back(error);
    }

    /// Make every `list_posts` call wait for [`release_fetch`](Self::release_fetch).
    pub fn hold_fetches(&self) {
        self.holding.store(true, Ordering::Release);
    }

    /// Let one held fetch proceed.
    pub fn release_fetch(&self) {
        self.fetch_permits.add_permits(1);
    }

    /// Stop holding and let everything already held proceed.
    pub fn resume_fetches(&self) {
        self.holding.store(false, Ordering::Release);
        self.fetch_permits.add_permits(1024);
    }

    /// Number of `list_posts` calls that have started.
    pub fn fetches_started(&self) -> usize {
        *self.fetches_started.borrow()
    }

    /// Wait until at least `n` fetches have started.
    pub async fn wait_for_fetches(&self, n: usize) {
        let mut rx = self.fetches_started.subscribe();
        let _ = rx.wait_for(|started| *started >= n).await;
    }

    fn record(&self, op: StoreOp) -> Result<(), StoreError> {
        *lock(&self.calls).entry(op).or_insert(0) += 1;
        match lock(&self.failures).get_mut(&op).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl StoreGateway for SpyGateway {
    async fn list_posts(&self) -> Result<Vec<Post>, StoreError> {
        self.fetches_started.send_modify(|started| *started += 1);
        if self.holding.load(Ordering::Acquire) {
            if let Ok(permit) = self.fetch_permits.acquire().await {
                permit.forget();
            }
        }
        self.record(StoreOp::ListPosts)?;
        self.inner.list_posts().await
    }

    async fn create_post(&self, draft: PostDraft) -> Result<Post, StoreError> {
        self.record(StoreOp::CreatePost)?;
        self.inner.create_post(draft).await
    }

    async fn delete_post(&self, id: PostId) -> Result<(), StoreError> {
        self.record(StoreOp::DeletePost)?;
        self.inner.delete_post(id).await
    }

    async fn set_like_state(
        &self,
        post_id: PostId,
        user_id: UserId,
        liked: bool,
    ) -> Result<LikeResult, StoreError> {
        self.record(StoreOp::SetLikeState)?;
        self.inner.set_like_state(post_id, user_id, liked).await
    }

    async fn create_comment(&self, draft: CommentDraft) -> Result<Comment, StoreError> {
        self.record(StoreOp::CreateComment)?;
        self.inner.create_comment(draft).await
    }
}

// =============================================================================
// Fixtures
// =============================================================================

pub fn author(first_name: &str, last_name: &str) -> Author {
    Author::new(UserId::new(), first_name, last_name)
}

/// A post by `author`, created now, liked by `liked_by`.
pub fn post(author: &Author, body: &str, liked_by: &[UserId]) -> Post {
    let liked_by: BTreeSet<UserId> = liked_by.iter().copied().collect();
    Post {
        id: PostId::new(),
        author_id: author.id,
        author_display_name: author.display_name(),
        body: body.to_string(),
        created_at: Utc::now(),
        like_count: liked_by.len() as u64,
        liked_by,
        comments: Vec::new(),
    }
}
