//! Error types for the store gateway and the reconciler.
//!
//! `StoreError` is what a gateway reports. `FeedError` is what reconciler
//! commands return and what [`FeedSignal::Failed`](crate::FeedSignal) carries
//! to the presentation layer.
//!
//! # The Message Rule
//!
//! > **Store details never reach `user_message()`.**
//!
//! - `Validation` and `NotFound` messages may be shown verbatim
//! - `Permission`, `Store` and `Closed` return generic messages
//! - The full error is logged where it happens

use std::borrow::Cow;
use std::fmt;

use thiserror::Error;

use crate::id::PostId;

// =============================================================================
// Store Operations
// =============================================================================

/// The store gateway operation a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    ListPosts,
    CreatePost,
    DeletePost,
    SetLikeState,
    CreateComment,
}

impl fmt::Display for StoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreOp::ListPosts => write!(f, "list_posts"),
            StoreOp::CreatePost => write!(f, "create_post"),
            StoreOp::DeletePost => write!(f, "delete_post"),
            StoreOp::SetLikeState => write!(f, "set_like_state"),
            StoreOp::CreateComment => write!(f, "create_comment"),
        }
    }
}

// =============================================================================
// Store Error
// =============================================================================

/// A failed store gateway call. Gateways never retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The store refused the caller.
    #[error("permission denied: {message}")]
    PermissionDenied { message: String },

    /// The store rejected the request.
    #[error("rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// The referenced post does not exist in the store.
    #[error("post {0} not found")]
    PostNotFound(PostId),

    /// The request never produced a response.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The response could not be decoded.
    #[error("malformed response: {0}")]
    Malformed(String),
}

// =============================================================================
// Error Category
// =============================================================================

/// Coarse classification for presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Input rejected before any store call.
    Validation,
    /// The acting user may not perform the operation.
    Permission,
    /// The target post is not known.
    NotFound,
    /// The store call failed.
    Store,
    /// The session has ended.
    Closed,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Validation => write!(f, "validation_error"),
            ErrorCategory::Permission => write!(f, "permission_denied"),
            ErrorCategory::NotFound => write!(f, "not_found"),
            ErrorCategory::Store => write!(f, "store_error"),
            ErrorCategory::Closed => write!(f, "session_closed"),
        }
    }
}

// =============================================================================
// Feed Error
// =============================================================================

/// Error returned by reconciler commands.
///
/// Every variant leaves `FeedState` exactly as it was before the command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    /// Rejected locally, no store call was made.
    #[error("invalid {field}: {reason}")]
    Validation {
        field: &'static str,
        reason: &'static str,
    },

    /// Rejected locally (non-author delete) or by the store.
    #[error("permission denied for post {post_id}: {reason}")]
    Permission { post_id: PostId, reason: String },

    /// The store call failed.
    #[error("store call {operation} failed: {source}")]
    Store {
        operation: StoreOp,
        #[source]
        source: StoreError,
    },

    /// The post is not in the current feed.
    #[error("post {0} is not in the feed")]
    UnknownPost(PostId),

    /// The reconciler was closed at logout or unmount.
    #[error("feed session is closed")]
    SessionClosed,
}

impl FeedError {
    pub(crate) fn empty_body() -> Self {
        FeedError::Validation {
            field: "body",
            reason: "must not be empty",
        }
    }

    /// Maps a store failure, lifting store-side permission refusals.
    pub(crate) fn from_store(operation: StoreOp, post_id: Option<PostId>, source: StoreError) -> Self {
        match (source, post_id) {
            (StoreError::PermissionDenied { message }, Some(post_id)) => FeedError::Permission {
                post_id,
                reason: message,
            },
            (source, _) => FeedError::Store { operation, source },
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            FeedError::Validation { .. } => ErrorCategory::Validation,
            FeedError::Permission { .. } => ErrorCategory::Permission,
            FeedError::UnknownPost(_) => ErrorCategory::NotFound,
            FeedError::Store {
                source: StoreError::PostNotFound(_),
                ..
            } => ErrorCategory::NotFound,
            FeedError::Store { .. } => ErrorCategory::Store,
            FeedError::SessionClosed => ErrorCategory::Closed,
        }
    }

    /// A message safe to show to the user.
    pub fn user_message(&self) -> Cow<'static, str> {
        match self {
            FeedError::Validation { field, reason } => format!("{} {}", field, reason).into(),
            FeedError::UnknownPost(_)
            | FeedError::Store {
                source: StoreError::PostNotFound(_),
                ..
            } => "That post no longer exists".into(),
            FeedError::Permission { .. } => "You can't do that to this post".into(),
            FeedError::Store { .. } => "Something went wrong, please try again".into(),
            FeedError::SessionClosed => "You have been signed out".into(),
        }
    }
}
