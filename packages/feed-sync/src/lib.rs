//! # Feed Sync
//!
//! Client-side reconciliation for a social feed backed by an authoritative
//! remote store. A session holds a local copy of the feed, sends user intents
//! (post, comment, like, delete) to the store, and keeps the copy converged
//! with the store as other clients mutate it.
//!
//! ## Architecture
//!
//! ```text
//!  Presentation ──commands──► FeedReconciler ──► StoreGateway ──► store
//!       ▲                      │    ▲                               │
//!       │ watch / signals      │    │ on_external_change            │
//!       └──────────────────────┘    │                               │
//!                           FeedSubscription ◄──── ChangeFeed ◄──────┘
//! ```
//!
//! ## Key Invariants
//!
//! 1. **The store is authoritative** - local state is only ever replaced by
//!    a full re-sync or patched from a store response
//! 2. **`like_count == |liked_by|`** - for every post in the feed
//! 3. **One fetch at a time** - overlapping refresh requests collapse into
//!    one trailing fetch
//! 4. **Failures leave state untouched** - and are always signalled
//! 5. **Nothing after teardown** - a closed session ignores notifications and
//!    discards fetches still in flight
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use feed_sync::{Author, ChangeFeed, FeedConfig, FeedSession, MemoryStore, Session, UserId};
//!
//! let changes = ChangeFeed::new();
//! let store = Arc::new(MemoryStore::with_change_feed(changes.clone()));
//! let session = Session::new(Author::new(UserId::new(), "Ada", "Lovelace"));
//!
//! let feed = FeedSession::start(session, store, &changes, &FeedConfig::default()).await?;
//! let post = feed.post("hello").await?;
//! feed.like(post.id).await?;
//!
//! assert_eq!(feed.snapshot().posts[0].like_count, 1);
//! feed.end();
//! ```

mod coalesce;

pub mod change_feed;
pub mod config;
pub mod error;
pub mod gateway;
pub mod http;
pub mod id;
pub mod like;
pub mod memory;
pub mod model;
pub mod reconciler;
pub mod session;
pub mod subscription;

// Test doubles for embedders and integration tests
pub mod testing;


pub use change_feed::{ChangeFeed, ChangeKind, ChangeNotification, Table};
pub use coalesce::RefreshStatus;
pub use config::FeedConfig;
pub use error::{ErrorCategory, FeedError, StoreError, StoreOp};
pub use gateway::StoreGateway;
pub use http::HttpStoreGateway;
pub use id::{CommentId, Id, PostId, UserId};
pub use like::{apply_like_result, LikeIntent, LikeState};
pub use memory::MemoryStore;
pub use model::{
    Author, Comment, CommentDraft, FeedState, LikeResult, Post, PostDraft, ProfileSummary,
};
pub use reconciler::{FeedOperation, FeedReconciler, FeedSignal, RefreshOutcome};
pub use session::{FeedSession, Session};
pub use subscription::{FeedSubscription, SubscriptionState};

// Re-export async_trait for gateway implementors
pub use async_trait::async_trait;
