// Store gateway - the authoritative persistent store, seen from the client.
//
// This is an INFRASTRUCTURE trait only. Validation, permission pre-checks and
// state updates belong to the reconciler; a gateway just forwards and reports.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::id::{PostId, UserId};
use crate::model::{Comment, CommentDraft, LikeResult, Post, PostDraft};

#[async_trait]
pub trait StoreGateway: Send + Sync {
    /// All posts with their comments, newest first.
    async fn list_posts(&self) -> Result<Vec<Post>, StoreError>;

    /// Insert a post. The store assigns id and timestamp.
    async fn create_post(&self, draft: PostDraft) -> Result<Post, StoreError>;

    /// Delete a post. Its comments go with it, store-side.
    async fn delete_post(&self, id: PostId) -> Result<(), StoreError>;

    /// Set whether `user_id` likes `post_id`.
    ///
    /// `liked` is the absolute desired state, not a delta: sending the same
    /// value twice leaves the store where the first call put it.
    async fn set_like_state(
        &self,
        post_id: PostId,
        user_id: UserId,
        liked: bool,
    ) -> Result<LikeResult, StoreError>;

    /// Insert a comment. The store assigns id and timestamp.
    async fn create_comment(&self, draft: CommentDraft) -> Result<Comment, StoreError>;
}
