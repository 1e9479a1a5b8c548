//! Like-toggle state machine.
//!
//! Per `(post, user)` there are two states, derived only from whether the
//! user is in `post.liked_by`. A toggle asks the store for the *inverse* of
//! that membership as an absolute value, never a +1/-1 delta, so two taps
//! decided from the same local state send the same request and cannot push
//! the count away from `|liked_by|`.
//!
//! The store's [`LikeResult`] always wins when it arrives.
//!
//! ```text
//!            toggle / set_like_state(true)
//!   NotLiked ──────────────────────────────► Liked
//!      ▲                                       │
//!      └───────────────────────────────────────┘
//!            toggle / set_like_state(false)
//! ```

use tracing::warn;

use crate::id::{PostId, UserId};
use crate::model::{LikeResult, Post};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LikeState {
    Liked,
    NotLiked,
}

impl LikeState {
    pub fn of(post: &Post, user: UserId) -> Self {
        if post.is_liked_by(user) {
            LikeState::Liked
        } else {
            LikeState::NotLiked
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            LikeState::Liked => LikeState::NotLiked,
            LikeState::NotLiked => LikeState::Liked,
        }
    }

    pub fn is_liked(self) -> bool {
        self == LikeState::Liked
    }
}

/// The store request a toggle decides on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LikeIntent {
    pub post_id: PostId,
    pub user_id: UserId,
    /// Absolute desired state.
    pub liked: bool,
}

impl LikeIntent {
    /// Decide the toggle from the locally known state of `post`.
    pub fn toggle(post: &Post, user_id: UserId) -> Self {
        Self {
            post_id: post.id,
            user_id,
            liked: LikeState::of(post, user_id).toggled().is_liked(),
        }
    }
}

/// Patch `post` with the store's answer.
///
/// The set is taken as-is and the count is recomputed from it, so
/// `like_count == |liked_by|` holds afterwards even if the store's count
/// disagreed.
pub fn apply_like_result(post: &mut Post, result: &LikeResult) {
    let actual = result.new_liked_by.len() as u64;
    if result.new_like_count != actual {
        warn!(
            post_id = %post.id,
            reported = result.new_like_count,
            actual,
            "store like count disagrees with liked_by, using set cardinality"
        );
    }
    post.liked_by = result.new_liked_by.clone();
    post.like_count = actual;
}
