//! The feed reconciler.
//!
//! Owns the session's [`FeedState`] and serializes every mutation intent
//! against it. The rule for every command is the same: **mutate the store,
//! then refresh or patch from the store's answer.** Nothing computed locally
//! is kept past the store's confirmation, and a failed command leaves the
//! state exactly as it was.
//!
//! | Command              | On success                          |
//! |----------------------|-------------------------------------|
//! | `submit_post`        | coalesced refresh                   |
//! | `delete_post`        | coalesced refresh                   |
//! | `submit_comment`     | coalesced refresh                   |
//! | `toggle_like`        | in-place patch from `LikeResult`    |
//! | `toggle_expanded`    | local only, never fails             |
//! | `on_external_change` | coalesced refresh in the background |
//!
//! Observers read the state through [`FeedReconciler::watch`] or
//! [`FeedReconciler::snapshot`], and learn about outcomes (including every
//! failure) through [`FeedReconciler::signals`].

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::change_feed::ChangeNotification;
use crate::coalesce::{Lease, RefreshGate, RefreshStatus, Ticket};
use crate::error::{FeedError, StoreOp};
use crate::gateway::StoreGateway;
use crate::id::{PostId, UserId};
use crate::like::{apply_like_result, LikeIntent, LikeState};
use crate::model::{Author, Comment, CommentDraft, FeedState, Post, PostDraft, ProfileSummary};

/// Default number of signals buffered for slow observers.
pub const DEFAULT_SIGNAL_CAPACITY: usize = 256;

/// The reconciler command a signal refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOperation {
    Refresh,
    SubmitPost,
    DeletePost,
    ToggleLike,
    SubmitComment,
}

/// Observable outcome of reconciler work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedSignal {
    /// A full re-sync replaced the posts.
    Refreshed { post_count: usize },
    /// A like result was patched into the feed.
    LikeApplied { post_id: PostId, state: LikeState },
    /// A command or refresh failed. State was left untouched.
    Failed {
        operation: FeedOperation,
        error: FeedError,
    },
}

/// What a call to [`FeedReconciler::refresh`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// This call fetched and replaced the feed.
    Fetched { post_count: usize },
    /// Another call was already fetching; a fetch that started after this
    /// request has since completed.
    Coalesced,
}

pub struct FeedReconciler {
    shared: Arc<Shared>,
}

/// State reachable from background refresh tasks.
struct Shared {
    gateway: Arc<dyn StoreGateway>,
    state: watch::Sender<FeedState>,
    signals: broadcast::Sender<FeedSignal>,
    gate: Arc<RefreshGate>,
    closed: AtomicBool,
}

impl FeedReconciler {
    pub fn new(gateway: Arc<dyn StoreGateway>) -> Self {
        Self::with_signal_capacity(gateway, DEFAULT_SIGNAL_CAPACITY)
    }

    pub fn with_signal_capacity(gateway: Arc<dyn StoreGateway>, capacity: usize) -> Self {
        let (state, _) = watch::channel(FeedState::default());
        let (signals, _) = broadcast::channel(capacity.max(1));
        Self {
            shared: Arc::new(Shared {
                gateway,
                state,
                signals,
                gate: Arc::new(RefreshGate::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    // =========================================================================
    // Observation
    // =========================================================================

    /// Clone of the current state.
    pub fn snapshot(&self) -> FeedState {
        self.shared.state.borrow().clone()
    }

    /// Read-only handle that is notified on every state change.
    pub fn watch(&self) -> watch::Receiver<FeedState> {
        self.shared.state.subscribe()
    }

    /// Signals published after this call.
    pub fn signals(&self) -> broadcast::Receiver<FeedSignal> {
        self.shared.signals.subscribe()
    }

    pub fn refresh_status(&self) -> RefreshStatus {
        self.shared.gate.status()
    }

    pub fn profile_summary(&self, user: UserId) -> ProfileSummary {
        ProfileSummary::for_user(&self.shared.state.borrow(), user)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Dispose of the reconciler. Later commands fail with `SessionClosed`,
    /// notifications are ignored, and fetches still in flight are discarded.
    ///
    /// Once this returns, observers see no further state change.
    pub fn close(&self) {
        let mut newly_closed = false;
        // Flipped under the state lock so no writer can straddle it.
        self.shared.state.send_if_modified(|_| {
            newly_closed = !self.shared.closed.swap(true, Ordering::AcqRel);
            false
        });
        if newly_closed {
            info!("feed reconciler closed");
        }
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Pull the whole feed and replace the posts wholesale.
    ///
    /// Never overlaps with another fetch. If one is in flight this call waits
    /// for the single trailing fetch shared by every caller that arrived
    /// meanwhile. Otherwise it runs one fetch and returns its outcome; any
    /// trailing fetch owed by later callers runs on a background task. On
    /// failure the previous posts stay in place.
    pub async fn refresh(&self) -> Result<RefreshOutcome, FeedError> {
        self.ensure_open(FeedOperation::Refresh)?;

        match self.shared.gate.request() {
            Ticket::Follower(follower) => match follower.wait().await {
                Some(error) => Err(error),
                None => Ok(RefreshOutcome::Coalesced),
            },
            Ticket::Lease(lease) => {
                let result = self.shared.pull().await;
                if let Some(trailing) = lease.settle(result.as_ref().err().cloned()) {
                    tokio::spawn(Arc::clone(&self.shared).drain(trailing));
                }
                result
            }
        }
    }

    pub async fn submit_post(&self, body: &str, author: &Author) -> Result<Post, FeedError> {
        let op = FeedOperation::SubmitPost;
        self.ensure_open(op)?;
        if body.trim().is_empty() {
            return self.shared.fail(op, FeedError::empty_body());
        }

        let draft = PostDraft {
            author: author.clone(),
            body: body.to_string(),
        };
        let post = match self.shared.gateway.create_post(draft).await {
            Ok(post) => post,
            Err(source) => {
                return self
                    .shared
                    .fail(op, FeedError::from_store(StoreOp::CreatePost, None, source))
            }
        };

        info!(post_id = %post.id, author_id = %author.id, "post created");
        self.follow_up_refresh().await;
        Ok(post)
    }

    /// Delete a post. A non-author is refused locally whenever the post is
    /// in the feed; otherwise the store decides.
    pub async fn delete_post(&self, post_id: PostId, requested_by: UserId) -> Result<(), FeedError> {
        let op = FeedOperation::DeletePost;
        self.ensure_open(op)?;

        let author_id = self.shared.state.borrow().post(post_id).map(|p| p.author_id);
        if let Some(author_id) = author_id {
            if author_id != requested_by {
                return self.shared.fail(
                    op,
                    FeedError::Permission {
                        post_id,
                        reason: "only the author can delete a post".into(),
                    },
                );
            }
        }

        if let Err(source) = self.shared.gateway.delete_post(post_id).await {
            return self
                .shared
                .fail(op, FeedError::from_store(StoreOp::DeletePost, Some(post_id), source));
        }

        info!(post_id = %post_id, "post deleted");
        self.follow_up_refresh().await;
        Ok(())
    }

    /// Flip `user_id`'s like on `post_id` and patch the store's answer in place.
    ///
    /// Returns the user's like state as the store reports it. If the post
    /// left the feed while the store call was out, nothing is patched and no
    /// `LikeApplied` signal is sent.
    pub async fn toggle_like(&self, post_id: PostId, user_id: UserId) -> Result<LikeState, FeedError> {
        let op = FeedOperation::ToggleLike;
        self.ensure_open(op)?;

        let intent = self
            .shared
            .state
            .borrow()
            .post(post_id)
            .map(|post| LikeIntent::toggle(post, user_id));
        let Some(intent) = intent else {
            return self.shared.fail(op, FeedError::UnknownPost(post_id));
        };

        debug!(post_id = %post_id, user_id = %user_id, liked = intent.liked, "setting like state");
        let result = match self
            .shared
            .gateway
            .set_like_state(intent.post_id, intent.user_id, intent.liked)
            .await
        {
            Ok(result) => result,
            Err(source) => {
                return self.shared.fail(
                    op,
                    FeedError::from_store(StoreOp::SetLikeState, Some(post_id), source),
                )
            }
        };

        let mut closed = false;
        let applied = self.shared.state.send_if_modified(|state| {
            if self.shared.is_closed() {
                closed = true;
                return false;
            }
            match state.post_mut(post_id) {
                Some(post) => {
                    apply_like_result(post, &result);
                    true
                }
                None => false,
            }
        });
        if closed {
            return Err(FeedError::SessionClosed);
        }

        let state = if result.new_liked_by.contains(&user_id) {
            LikeState::Liked
        } else {
            LikeState::NotLiked
        };
        if applied {
            let _ = self.shared.signals.send(FeedSignal::LikeApplied { post_id, state });
        } else {
            debug!(post_id = %post_id, "post left the feed before like result arrived");
        }
        Ok(state)
    }

    pub async fn submit_comment(
        &self,
        post_id: PostId,
        body: &str,
        author: &Author,
    ) -> Result<Comment, FeedError> {
        let op = FeedOperation::SubmitComment;
        self.ensure_open(op)?;
        if body.trim().is_empty() {
            return self.shared.fail(op, FeedError::empty_body());
        }

        let draft = CommentDraft {
            post_id,
            author: author.clone(),
            body: body.to_string(),
        };
        let comment = match self.shared.gateway.create_comment(draft).await {
            Ok(comment) => comment,
            Err(source) => {
                return self.shared.fail(
                    op,
                    FeedError::from_store(StoreOp::CreateComment, Some(post_id), source),
                )
            }
        };

        info!(post_id = %post_id, comment_id = %comment.id, "comment created");
        self.follow_up_refresh().await;
        Ok(comment)
    }

    /// Expand `post_id`, or collapse it if it is already expanded.
    pub fn toggle_expanded(&self, post_id: PostId) {
        self.shared.state.send_if_modified(|state| {
            if self.shared.is_closed() {
                return false;
            }
            state.toggle_expanded(post_id);
            true
        });
    }

    /// Entry point for the change feed adapter. The payload is not
    /// interpreted: any notification means "re-sync".
    ///
    /// Does not wait. When the gate is idle the fetch starts on a background
    /// task; otherwise the notification only marks the trailing fetch as
    /// owed. Must be called within a Tokio runtime.
    pub fn on_external_change(&self, notification: ChangeNotification) {
        if self.is_closed() {
            debug!(%notification, "ignoring change notification for closed feed");
            return;
        }
        debug!(%notification, "change notification received");
        match self.shared.gate.request() {
            Ticket::Lease(lease) => {
                tokio::spawn(Arc::clone(&self.shared).drain(lease));
            }
            // Failures are signalled by the fetch that covers it.
            Ticket::Follower(_) => {}
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Refresh after a confirmed write. The write already succeeded, so a
    /// failed refresh is only signalled; the next notification retries.
    async fn follow_up_refresh(&self) {
        if let Err(error) = self.refresh().await {
            debug!(error = %error, "refresh after write failed");
        }
    }

    fn ensure_open(&self, operation: FeedOperation) -> Result<(), FeedError> {
        if self.is_closed() {
            return self.shared.fail(operation, FeedError::SessionClosed);
        }
        Ok(())
    }
}

impl Shared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Run fetches until the gate goes idle.
    async fn drain(self: Arc<Self>, lease: Lease) {
        let mut next = Some(lease);
        while let Some(lease) = next {
            let failure = if self.is_closed() {
                Some(FeedError::SessionClosed)
            } else {
                debug!(covers = lease.covers(), "running background refresh");
                self.pull().await.err()
            };
            next = lease.settle(failure);
        }
    }

    async fn pull(&self) -> Result<RefreshOutcome, FeedError> {
        let result = self.gateway.list_posts().await;

        let posts = match result {
            Ok(posts) => posts,
            Err(_) if self.is_closed() => return Err(FeedError::SessionClosed),
            Err(source) => {
                return self.fail(
                    FeedOperation::Refresh,
                    FeedError::from_store(StoreOp::ListPosts, None, source),
                )
            }
        };

        let post_count = posts.len();
        let replaced = self.state.send_if_modified(|state| {
            if self.is_closed() {
                return false;
            }
            *state = FeedState::resynced(posts, state.expanded_post_id);
            true
        });
        if !replaced {
            debug!("discarding refresh result for closed feed");
            return Err(FeedError::SessionClosed);
        }

        debug!(post_count, "feed refreshed");
        let _ = self.signals.send(FeedSignal::Refreshed { post_count });
        Ok(RefreshOutcome::Fetched { post_count })
    }

    fn fail<T>(&self, operation: FeedOperation, error: FeedError) -> Result<T, FeedError> {
        warn!(?operation, error = %error, "feed operation failed");
        let _ = self.signals.send(FeedSignal::Failed {
            operation,
            error: error.clone(),
        });
        Err(error)
    }
}

impl fmt::Debug for FeedReconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedReconciler")
            .field("posts", &self.shared.state.borrow().posts.len())
            .field("refresh", &self.shared.gate.status())
            .field("closed", &self.is_closed())
            .finish()
    }
}
