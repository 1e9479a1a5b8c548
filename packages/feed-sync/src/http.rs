//! HTTP store gateway.
//!
//! Speaks the JSON routes of the request-routing layer in front of the
//! database. Every route is relative to one base URL:
//!
//! | Route            | Method | Body                                               | Response               |
//! |------------------|--------|----------------------------------------------------|------------------------|
//! | `fetch-posts`    | GET    |                                                    | `[post row]`           |
//! | `submit-post`    | POST   | `{userId, post, firstName, lastName}`              | `{success, data:[row]}`|
//! | `submit-comment` | POST   | `{postId, userId, commentText, firstName, lastName}` | `{success, data:[row]}`|
//! | `delete-post`    | POST   | `{postId}`                                         | ignored                |
//! | `like-post`      | POST   | `{postId, userId, liked}`                          | `{likes, liked_by}`    |
//!
//! The route layer only ever served the first three; deletes and likes went
//! straight to the database. `delete-post` and `like-post` are additions in
//! the same style so every store operation crosses one boundary.
//!
//! Error responses carry `{error}`. The gateway never retries.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::FeedConfig;
use crate::error::{StoreError, StoreOp};
use crate::gateway::StoreGateway;
use crate::id::{CommentId, PostId, UserId};
use crate::model::{Author, Comment, CommentDraft, LikeResult, Post, PostDraft};

#[derive(Debug, Clone)]
pub struct HttpStoreGateway {
    http_client: Client,
    base_url: String,
}

impl HttpStoreGateway {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, StoreError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &FeedConfig) -> Result<Self, StoreError> {
        Self::new(config.api_url.clone(), config.request_timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, route: &str) -> String {
        format!("{}/{}", self.base_url, route)
    }

    /// Send and return the body of a 2xx response.
    async fn execute(
        &self,
        operation: StoreOp,
        request: RequestBuilder,
        post_id: Option<PostId>,
    ) -> Result<String, StoreError> {
        let start = std::time::Instant::now();

        let response = request.send().await.map_err(|e| {
            warn!(%operation, error = %e, "store request failed");
            StoreError::Transport(e.to_string())
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        if !status.is_success() {
            warn!(%operation, status = %status, error = %body, "store returned an error");
            return Err(status_error(status, &body, post_id));
        }

        debug!(
            %operation,
            duration_ms = start.elapsed().as_millis(),
            "store request completed"
        );
        Ok(body)
    }
}

fn decode<T: DeserializeOwned>(operation: StoreOp, body: &str) -> Result<T, StoreError> {
    serde_json::from_str(body).map_err(|e| {
        warn!(%operation, error = %e, "undecodable store response");
        StoreError::Malformed(e.to_string())
    })
}

fn status_error(status: StatusCode, body: &str, post_id: Option<PostId>) -> StoreError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error)
        .unwrap_or_else(|_| body.trim().to_string());

    match (status, post_id) {
        (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN, _) => {
            StoreError::PermissionDenied { message }
        }
        (StatusCode::NOT_FOUND, Some(post_id)) => StoreError::PostNotFound(post_id),
        _ => StoreError::Rejected {
            status: status.as_u16(),
            message,
        },
    }
}

#[async_trait]
impl StoreGateway for HttpStoreGateway {
    async fn list_posts(&self) -> Result<Vec<Post>, StoreError> {
        let op = StoreOp::ListPosts;
        let request = self.http_client.get(self.url("fetch-posts"));
        let body = self.execute(op, request, None).await?;
        let rows: Vec<PostRow> = decode(op, &body)?;
        Ok(rows.into_iter().map(PostRow::into_post).collect())
    }

    async fn create_post(&self, draft: PostDraft) -> Result<Post, StoreError> {
        let op = StoreOp::CreatePost;
        let request = self.http_client.post(self.url("submit-post")).json(&SubmitPostBody {
            user_id: draft.author.id,
            post: &draft.body,
            first_name: &draft.author.first_name,
            last_name: &draft.author.last_name,
        });
        let body = self.execute(op, request, None).await?;
        let inserted: InsertResponse<PostRow> = decode(op, &body)?;
        Ok(inserted.into_row()?.into_post())
    }

    async fn delete_post(&self, id: PostId) -> Result<(), StoreError> {
        let request = self
            .http_client
            .post(self.url("delete-post"))
            .json(&PostRef { post_id: id });
        self.execute(StoreOp::DeletePost, request, Some(id)).await?;
        Ok(())
    }

    async fn set_like_state(
        &self,
        post_id: PostId,
        user_id: UserId,
        liked: bool,
    ) -> Result<LikeResult, StoreError> {
        let op = StoreOp::SetLikeState;
        let request = self.http_client.post(self.url("like-post")).json(&LikePostBody {
            post_id,
            user_id,
            liked,
        });
        let body = self.execute(op, request, Some(post_id)).await?;
        let response: LikeResponse = decode(op, &body)?;
        Ok(LikeResult {
            new_like_count: clamp_count(response.likes),
            new_liked_by: response.liked_by.into_iter().collect(),
        })
    }

    async fn create_comment(&self, draft: CommentDraft) -> Result<Comment, StoreError> {
        let op = StoreOp::CreateComment;
        let request = self
            .http_client
            .post(self.url("submit-comment"))
            .json(&SubmitCommentBody {
                post_id: draft.post_id,
                user_id: draft.author.id,
                comment_text: &draft.body,
                first_name: &draft.author.first_name,
                last_name: &draft.author.last_name,
            });
        let body = self.execute(op, request, Some(draft.post_id)).await?;
        let inserted: InsertResponse<CommentRow> = decode(op, &body)?;
        Ok(inserted.into_row()?.into_comment())
    }
}

// =============================================================================
// Wire Format
// =============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitPostBody<'a> {
    user_id: UserId,
    post: &'a str,
    first_name: &'a str,
    last_name: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitCommentBody<'a> {
    post_id: PostId,
    user_id: UserId,
    comment_text: &'a str,
    first_name: &'a str,
    last_name: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PostRef {
    post_id: PostId,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LikePostBody {
    post_id: PostId,
    user_id: UserId,
    liked: bool,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Deserialize)]
struct InsertResponse<T> {
    data: Vec<T>,
}

impl<T> InsertResponse<T> {
    fn into_row(self) -> Result<T, StoreError> {
        self.data
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Malformed("insert returned no rows".into()))
    }
}

#[derive(Deserialize)]
struct LikeResponse {
    likes: i64,
    #[serde(default)]
    liked_by: Vec<UserId>,
}

/// A `posts` row joined with its comments.
#[derive(Debug, Deserialize)]
struct PostRow {
    posts_id: PostId,
    user_id: UserId,
    post: String,
    #[serde(rename = "firstName", default)]
    first_name: Option<String>,
    #[serde(rename = "lastName", default)]
    last_name: Option<String>,
    #[serde(default)]
    likes: Option<i64>,
    #[serde(default)]
    liked_by: Option<Vec<UserId>>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    comments: Option<Vec<CommentRow>>,
}

impl PostRow {
    fn into_post(self) -> Post {
        let author = Author::new(
            self.user_id,
            self.first_name.unwrap_or_default(),
            self.last_name.unwrap_or_default(),
        );
        Post {
            id: self.posts_id,
            author_id: self.user_id,
            author_display_name: author.display_name(),
            body: self.post,
            created_at: self.created_at,
            like_count: clamp_count(self.likes.unwrap_or(0)),
            liked_by: self.liked_by.unwrap_or_default().into_iter().collect(),
            comments: self
                .comments
                .unwrap_or_default()
                .into_iter()
                .map(CommentRow::into_comment)
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CommentRow {
    id: CommentId,
    post_id: PostId,
    user_id: UserId,
    comment: String,
    #[serde(default)]
    user_name: Option<String>,
    created_at: DateTime<Utc>,
}

impl CommentRow {
    fn into_comment(self) -> Comment {
        Comment {
            id: self.id,
            post_id: self.post_id,
            author_id: self.user_id,
            author_display_name: self.user_name.unwrap_or_default().trim().to_string(),
            body: self.comment,
            created_at: self.created_at,
        }
    }
}

fn clamp_count(raw: i64) -> u64 {
    u64::try_from(raw).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decodes_post_row_with_nested_comments() {
        let post_id = PostId::new();
        let author = UserId::new();
        let fan = UserId::new();
        let json = format!(
            r#"[{{
                "posts_id": "{post_id}",
                "user_id": "{author}",
                "post": "hello",
                "firstName": "Ada",
                "lastName": "Lovelace",
                "likes": 1,
                "liked_by": ["{fan}"],
                "created_at": "2025-02-04T10:00:00Z",
                "comments": [{{
                    "id": "{comment}",
                    "post_id": "{post_id}",
                    "user_id": "{fan}",
                    "comment": "nice",
                    "user_name": "Grace Hopper",
                    "created_at": "2025-02-04T10:05:00+00:00"
                }}]
            }}]"#,
            comment = CommentId::new(),
        );

        let rows: Vec<PostRow> = decode(StoreOp::ListPosts, &json).unwrap();
        let post = rows.into_iter().next().unwrap().into_post();

        assert_eq!(post.id, post_id);
        assert_eq!(post.author_display_name, "Ada Lovelace");
        assert_eq!(post.like_count, 1);
        assert!(post.is_liked_by(fan));
        assert_eq!(post.comments.len(), 1);
        assert_eq!(post.comments[0].author_display_name, "Grace Hopper");
    }

    #[test]
    fn test_missing_optional_columns_default() {
        let json = format!(
            r#"{{"posts_id": "{}", "user_id": "{}", "post": "bare", "likes": -3,
                "liked_by": null, "created_at": "2025-02-04T10:00:00Z"}}"#,
            PostId::new(),
            UserId::new(),
        );

        let post = decode::<PostRow>(StoreOp::ListPosts, &json).unwrap().into_post();
        assert_eq!(post.like_count, 0);
        assert!(post.liked_by.is_empty());
        assert!(post.comments.is_empty());
        assert_eq!(post.author_display_name, "");
    }

    #[test]
    fn test_undecodable_body_is_malformed() {
        let err = decode::<Vec<PostRow>>(StoreOp::ListPosts, "<html>").unwrap_err();
        assert!(matches!(err, StoreError::Malformed(_)));
    }

    #[test]
    fn test_empty_insert_is_malformed() {
        let inserted: InsertResponse<CommentRow> =
            decode(StoreOp::CreateComment, r#"{"success": true, "data": []}"#).unwrap();
        assert!(matches!(inserted.into_row(), Err(StoreError::Malformed(_))));
    }

    #[test]
    fn test_status_mapping() {
        let post_id = PostId::new();
        assert_eq!(
            status_error(StatusCode::FORBIDDEN, r#"{"error":"not yours"}"#, Some(post_id)),
            StoreError::PermissionDenied {
                message: "not yours".into()
            }
        );
        assert_eq!(
            status_error(StatusCode::NOT_FOUND, "", Some(post_id)),
            StoreError::PostNotFound(post_id)
        );
        assert_eq!(
            status_error(StatusCode::BAD_REQUEST, r#"{"error":"Post content cannot be empty"}"#, None),
            StoreError::Rejected {
                status: 400,
                message: "Post content cannot be empty".into()
            }
        );
        assert_eq!(
            status_error(StatusCode::BAD_GATEWAY, "upstream down\n", None),
            StoreError::Rejected {
                status: 502,
                message: "upstream down".into()
            }
        );
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let gateway = HttpStoreGateway::new("http://localhost:5000/", Duration::from_secs(1)).unwrap();
        assert_eq!(gateway.url("fetch-posts"), "http://localhost:5000/fetch-posts");
    }
}
