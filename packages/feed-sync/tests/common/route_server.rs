//! An axum server answering the request-routing layer's routes.
//!
//! Rows use the column names of the real `posts` and `comments` tables so the
//! HTTP gateway is tested against the wire format, not against itself.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct PostRow {
    pub posts_id: Uuid,
    pub user_id: Uuid,
    pub post: String,
    #[serde(rename = "firstName")]
    pub first_name: String,
    #[serde(rename = "lastName")]
    pub last_name: String,
    pub likes: i64,
    pub liked_by: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub comments: Vec<CommentRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommentRow {
    pub id: Uuid,
    pub post_id: Uuid,
    pub user_id: Uuid,
    pub comment: String,
    pub user_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct RouteState {
    pub rows: Vec<PostRow>,
    /// Users refused with 403 on every write.
    pub banned: HashSet<Uuid>,
    /// Answer `fetch-posts` with a non-JSON body.
    pub garble_fetch: bool,
}

#[derive(Clone, Default)]
pub struct RouteServer {
    pub state: Arc<Mutex<RouteState>>,
}

impl RouteServer {
    pub fn rows(&self) -> Vec<PostRow> {
        self.state.lock().unwrap().rows.clone()
    }

    pub fn ban(&self, user: Uuid) {
        self.state.lock().unwrap().banned.insert(user);
    }

    pub fn garble_fetch(&self) {
        self.state.lock().unwrap().garble_fetch = true;
    }
}

/// Serve the routes on an ephemeral port. Returns the base URL.
pub async fn spawn_route_server() -> (String, RouteServer) {
    let server = RouteServer::default();
    let app = Router::new()
        .route("/fetch-posts", get(fetch_posts))
        .route("/submit-post", post(submit_post))
        .route("/submit-comment", post(submit_comment))
        .route("/delete-post", post(delete_post))
        .route("/like-post", post(like_post))
        .with_state(server.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind test server");
    let addr = listener.local_addr().expect("no local address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("test server failed");
    });

    (format!("http://{}", addr), server)
}

/// A base URL nothing is listening on.
pub async fn dead_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind");
    let addr = listener.local_addr().expect("no local address");
    drop(listener);
    format!("http://{}", addr)
}

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

async fn fetch_posts(State(server): State<RouteServer>) -> Response {
    let state = server.state.lock().unwrap();
    if state.garble_fetch {
        return (StatusCode::OK, "<html>maintenance</html>").into_response();
    }
    let mut rows = state.rows.clone();
    rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Json(rows).into_response()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitPost {
    user_id: Uuid,
    post: String,
    first_name: String,
    last_name: String,
}

async fn submit_post(State(server): State<RouteServer>, Json(body): Json<SubmitPost>) -> Response {
    let mut state = server.state.lock().unwrap();
    if state.banned.contains(&body.user_id) {
        return error(StatusCode::FORBIDDEN, "new row violates row-level security policy");
    }
    if body.post.trim().is_empty() {
        return error(StatusCode::BAD_REQUEST, "Post content cannot be empty");
    }

    let row = PostRow {
        posts_id: Uuid::new_v4(),
        user_id: body.user_id,
        post: body.post,
        first_name: body.first_name,
        last_name: body.last_name,
        likes: 0,
        liked_by: Vec::new(),
        created_at: Utc::now(),
        comments: Vec::new(),
    };
    state.rows.push(row.clone());

    // Inserted rows come back without the joined comments column.
    let mut inserted = serde_json::to_value(&row).unwrap();
    inserted.as_object_mut().unwrap().remove("comments");
    Json(json!({ "success": true, "data": [inserted] })).into_response()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitComment {
    post_id: Uuid,
    user_id: Uuid,
    comment_text: String,
    first_name: String,
    last_name: String,
}

async fn submit_comment(
    State(server): State<RouteServer>,
    Json(body): Json<SubmitComment>,
) -> Response {
    let mut state = server.state.lock().unwrap();
    if state.banned.contains(&body.user_id) {
        return error(StatusCode::FORBIDDEN, "new row violates row-level security policy");
    }
    if body.comment_text.trim().is_empty() {
        return error(StatusCode::BAD_REQUEST, "Comment cannot be empty");
    }
    let Some(row) = state.rows.iter_mut().find(|r| r.posts_id == body.post_id) else {
        return error(StatusCode::NOT_FOUND, "post not found");
    };

    let comment = CommentRow {
        id: Uuid::new_v4(),
        post_id: body.post_id,
        user_id: body.user_id,
        comment: body.comment_text,
        user_name: format!("{} {}", body.first_name, body.last_name),
        created_at: Utc::now(),
    };
    row.comments.push(comment.clone());
    Json(json!({ "success": true, "data": [comment] })).into_response()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeletePost {
    post_id: Uuid,
}

async fn delete_post(State(server): State<RouteServer>, Json(body): Json<DeletePost>) -> Response {
    let mut state = server.state.lock().unwrap();
    let before = state.rows.len();
    state.rows.retain(|r| r.posts_id != body.post_id);
    if state.rows.len() == before {
        return error(StatusCode::NOT_FOUND, "post not found");
    }
    Json(json!({ "success": true })).into_response()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LikePost {
    post_id: Uuid,
    user_id: Uuid,
    liked: bool,
}

async fn like_post(State(server): State<RouteServer>, Json(body): Json<LikePost>) -> Response {
    let mut state = server.state.lock().unwrap();
    if state.banned.contains(&body.user_id) {
        return error(StatusCode::UNAUTHORIZED, "JWT expired");
    }
    let Some(row) = state.rows.iter_mut().find(|r| r.posts_id == body.post_id) else {
        return error(StatusCode::NOT_FOUND, "post not found");
    };

    row.liked_by.retain(|u| *u != body.user_id);
    if body.liked {
        row.liked_by.push(body.user_id);
    }
    row.likes = row.liked_by.len() as i64;
    Json(json!({ "likes": row.likes, "liked_by": row.liked_by })).into_response()
}
