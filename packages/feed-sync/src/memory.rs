//! In-process store.
//!
//! Behaves like the authoritative store as far as the reconciler can tell:
//! it assigns ids and timestamps, treats likes as absolute state, deletes a
//! post's comments with it, and publishes a change notification after every
//! successful mutation when a [`ChangeFeed`] is attached.

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use crate::change_feed::{ChangeFeed, ChangeKind, ChangeNotification, Table};
use crate::error::StoreError;
use crate::gateway::StoreGateway;
use crate::id::{CommentId, PostId, UserId};
use crate::model::{Comment, CommentDraft, LikeResult, Post, PostDraft};

#[derive(Debug, Default)]
pub struct MemoryStore {
    /// Insertion order.
    posts: Mutex<Vec<Post>>,
    changes: Option<ChangeFeed>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_change_feed(changes: ChangeFeed) -> Self {
        Self {
            posts: Mutex::default(),
            changes: Some(changes),
        }
    }

    pub fn change_feed(&self) -> Option<&ChangeFeed> {
        self.changes.as_ref()
    }

    /// Insert a fully formed post, as another client or a seeding job would.
    pub fn insert(&self, post: Post) {
        self.lock().push(post);
        self.notify(Table::Posts, ChangeKind::Insert);
    }

    pub fn post(&self, id: PostId) -> Option<Post> {
        self.lock().iter().find(|p| p.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Post>> {
        self.posts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, table: Table, kind: ChangeKind) {
        if let Some(changes) = &self.changes {
            let receivers = changes.publish(ChangeNotification::new(table, kind));
            debug!(?table, ?kind, receivers, "published change notification");
        }
    }
}

#[async_trait]
impl StoreGateway for MemoryStore {
    async fn list_posts(&self) -> Result<Vec<Post>, StoreError> {
        let mut posts = self.lock().clone();
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(posts)
    }

    async fn create_post(&self, draft: PostDraft) -> Result<Post, StoreError> {
        let post = Post {
            id: PostId::new(),
            author_id: draft.author.id,
            author_display_name: draft.author.display_name(),
            body: draft.body,
            created_at: Utc::now(),
            like_count: 0,
            liked_by: BTreeSet::new(),
            comments: Vec::new(),
        };
        self.lock().push(post.clone());
        self.notify(Table::Posts, ChangeKind::Insert);
        Ok(post)
    }

    async fn delete_post(&self, id: PostId) -> Result<(), StoreError> {
        {
            let mut posts = self.lock();
            let before = posts.len();
            posts.retain(|p| p.id != id);
            if posts.len() == before {
                return Err(StoreError::PostNotFound(id));
            }
        }
        self.notify(Table::Posts, ChangeKind::Delete);
        Ok(())
    }

    async fn set_like_state(
        &self,
        post_id: PostId,
        user_id: UserId,
        liked: bool,
    ) -> Result<LikeResult, StoreError> {
        let result = {
            let mut posts = self.lock();
            let post = posts
                .iter_mut()
                .find(|p| p.id == post_id)
                .ok_or(StoreError::PostNotFound(post_id))?;
            if liked {
                post.liked_by.insert(user_id);
            } else {
                post.liked_by.remove(&user_id);
            }
            post.like_count = post.liked_by.len() as u64;
            LikeResult {
                new_like_count: post.like_count,
                new_liked_by: post.liked_by.clone(),
            }
        };
        self.notify(Table::Posts, ChangeKind::Update);
        Ok(result)
    }

    async fn create_comment(&self, draft: CommentDraft) -> Result<Comment, StoreError> {
        let comment = {
            let mut posts = self.lock();
            let post = posts
                .iter_mut()
                .find(|p| p.id == draft.post_id)
                .ok_or(StoreError::PostNotFound(draft.post_id))?;
            let comment = Comment {
                id: CommentId::new(),
                post_id: draft.post_id,
                author_id: draft.author.id,
                author_display_name: draft.author.display_name(),
                body: draft.body,
                created_at: Utc::now(),
            };
            post.comments.push(comment.clone());
            comment
        };
        self.notify(Table::Comments, ChangeKind::Insert);
        Ok(comment)
    }
}
