//! Feed data model.
//!
//! Everything here is plain data. Mutation rules live in the reconciler and
//! the like-toggle machine; the helpers on [`FeedState`] are the only places
//! that touch post collections directly.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::id::{CommentId, PostId, UserId};

/// The user a post or comment is attributed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: UserId,
    pub first_name: String,
    pub last_name: String,
}

impl Author {
    pub fn new(id: UserId, first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            id,
            first_name: first_name.into(),
            last_name: last_name.into(),
        }
    }

    /// "First Last", tolerating either part being empty.
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
            .trim()
            .to_string()
    }
}

/// A comment, owned by exactly one post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,
    pub post_id: PostId,
    pub author_id: UserId,
    pub author_display_name: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// A post with its like state and nested comments.
///
/// `like_count == liked_by.len()` holds for every post held in a [`FeedState`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub author_id: UserId,
    pub author_display_name: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub like_count: u64,
    pub liked_by: BTreeSet<UserId>,
    pub comments: Vec<Comment>,
}

impl Post {
    /// Whether `user` is currently in `liked_by`.
    pub fn is_liked_by(&self, user: UserId) -> bool {
        self.liked_by.contains(&user)
    }

    /// Restores `like_count == |liked_by|` and orders comments oldest-first.
    ///
    /// Returns `true` if the stored count had drifted from the set.
    pub(crate) fn normalize(&mut self) -> bool {
        self.comments.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        let actual = self.liked_by.len() as u64;
        if self.like_count != actual {
            warn!(
                post_id = %self.id,
                stored = self.like_count,
                actual,
                "like count disagrees with liked_by, using set cardinality"
            );
            self.like_count = actual;
            return true;
        }
        false
    }
}

/// Authoritative like state returned by the store after a toggle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LikeResult {
    pub new_like_count: u64,
    pub new_liked_by: BTreeSet<UserId>,
}

/// Input for creating a post. The store assigns id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostDraft {
    pub author: Author,
    pub body: String,
}

/// Input for creating a comment. The store assigns id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentDraft {
    pub post_id: PostId,
    pub author: Author,
    pub body: String,
}

/// The reconciler's owned view of the feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FeedState {
    pub posts: Vec<Post>,
    pub expanded_post_id: Option<PostId>,
}

impl FeedState {
    /// Builds the state for a full re-sync.
    ///
    /// Posts are ordered newest-first with a stable sort, so posts sharing a
    /// timestamp keep the order the store returned them in. `expanded` is kept
    /// only if that post survived the re-sync.
    pub(crate) fn resynced(mut posts: Vec<Post>, expanded: Option<PostId>) -> Self {
        for post in &mut posts {
            post.normalize();
        }
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let expanded_post_id = expanded.filter(|id| posts.iter().any(|p| p.id == *id));
        Self {
            posts,
            expanded_post_id,
        }
    }

    pub fn post(&self, id: PostId) -> Option<&Post> {
        self.posts.iter().find(|p| p.id == id)
    }

    pub(crate) fn post_mut(&mut self, id: PostId) -> Option<&mut Post> {
        self.posts.iter_mut().find(|p| p.id == id)
    }

    pub fn is_expanded(&self, id: PostId) -> bool {
        self.expanded_post_id == Some(id)
    }

    /// Sets `expanded_post_id` to `id`, or clears it if `id` is already expanded.
    pub(crate) fn toggle_expanded(&mut self, id: PostId) {
        self.expanded_post_id = if self.expanded_post_id == Some(id) {
            None
        } else {
            Some(id)
        };
    }
}

/// Per-user aggregate over the posts currently in the feed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProfileSummary {
    pub post_count: usize,
    pub total_likes: u64,
    pub comments_received: usize,
}

impl ProfileSummary {
    pub fn for_user(state: &FeedState, user: UserId) -> Self {
        state
            .posts
            .iter()
            .filter(|p| p.author_id == user)
            .fold(Self::default(), |acc, p| Self {
                post_count: acc.post_count + 1,
                total_likes: acc.total_likes + p.like_count,
                comments_received: acc.comments_received + p.comments.len(),
            })
    }
}
