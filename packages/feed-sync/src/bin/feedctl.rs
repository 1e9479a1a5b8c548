//! Command-line client for the shared feed.
//!
//! Talks to the request-routing layer over HTTP and prints JSON to stdout.
//! Logs go to stderr so output stays parseable.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use feed_sync::{
    Author, ChangeFeed, ChangeNotification, FeedConfig, FeedSession, HttpStoreGateway, LikeState,
    PostId, ProfileSummary, Session, StoreGateway, UserId,
};

#[derive(Parser)]
#[command(name = "feedctl")]
#[command(about = "Read and write the shared feed")]
struct Cli {
    #[command(flatten)]
    identity: Identity,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Identity {
    /// Acting user. Required for commands that write.
    #[arg(long, global = true)]
    user_id: Option<UserId>,

    #[arg(long, global = true, default_value = "")]
    first_name: String,

    #[arg(long, global = true, default_value = "")]
    last_name: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the feed, newest first
    List,

    /// Create a post
    Post { body: String },

    /// Comment on a post
    Comment { post_id: PostId, body: String },

    /// Toggle your like on a post
    Like { post_id: PostId },

    /// Delete one of your posts
    Delete { post_id: PostId },

    /// Poll for changes and print the feed whenever it changes
    Watch,
}

impl Commands {
    fn writes(&self) -> bool {
        matches!(
            self,
            Commands::Post { .. }
                | Commands::Comment { .. }
                | Commands::Like { .. }
                | Commands::Delete { .. }
        )
    }
}

// ============================================================================
// JSON Response Types
// ============================================================================

#[derive(Serialize)]
struct FeedOutput<'a> {
    posts: &'a [feed_sync::Post],
    #[serde(skip_serializing_if = "Option::is_none")]
    profile: Option<ProfileSummary>,
}

#[derive(Serialize)]
struct LikeOutput {
    post_id: PostId,
    liked: bool,
    like_count: u64,
}

#[derive(Serialize)]
struct DeleteOutput {
    deleted: PostId,
}

fn output<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", json);
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,feed_sync=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = FeedConfig::from_env().context("Failed to load configuration")?;
    let gateway: Arc<dyn StoreGateway> = Arc::new(
        HttpStoreGateway::from_config(&config).context("Failed to build HTTP client")?,
    );

    let user_id = match cli.identity.user_id {
        Some(id) => id,
        None if cli.command.writes() => anyhow::bail!("--user-id is required for this command"),
        None => UserId::new(),
    };
    let signed_in = cli.identity.user_id.is_some();
    let session = Session::new(Author::new(
        user_id,
        cli.identity.first_name,
        cli.identity.last_name,
    ));

    let changes = ChangeFeed::with_capacity(config.change_feed_capacity);
    let feed = FeedSession::start(session, gateway, &changes, &config)
        .await
        .with_context(|| format!("Failed to load feed from {}", config.api_url))?;

    let result = match cli.command {
        Commands::List => cmd_list(&feed, signed_in),
        Commands::Post { body } => cmd_post(&feed, &body).await,
        Commands::Comment { post_id, body } => cmd_comment(&feed, post_id, &body).await,
        Commands::Like { post_id } => cmd_like(&feed, post_id).await,
        Commands::Delete { post_id } => cmd_delete(&feed, post_id).await,
        Commands::Watch => cmd_watch(&feed, &changes, &config, signed_in).await,
    };

    feed.end();
    result
}

// ============================================================================
// Commands
// ============================================================================

fn cmd_list(feed: &FeedSession, signed_in: bool) -> Result<()> {
    let state = feed.snapshot();
    output(&FeedOutput {
        posts: &state.posts,
        profile: signed_in.then(|| feed.profile()),
    })
}

async fn cmd_post(feed: &FeedSession, body: &str) -> Result<()> {
    let post = feed.post(body).await.context("Failed to create post")?;
    output(&post)
}

async fn cmd_comment(feed: &FeedSession, post_id: PostId, body: &str) -> Result<()> {
    let comment = feed
        .comment(post_id, body)
        .await
        .with_context(|| format!("Failed to comment on post {}", post_id))?;
    output(&comment)
}

async fn cmd_like(feed: &FeedSession, post_id: PostId) -> Result<()> {
    let state = feed
        .like(post_id)
        .await
        .with_context(|| format!("Failed to toggle like on post {}", post_id))?;
    let like_count = feed
        .snapshot()
        .post(post_id)
        .map(|p| p.like_count)
        .unwrap_or_default();

    output(&LikeOutput {
        post_id,
        liked: state == LikeState::Liked,
        like_count,
    })
}

async fn cmd_delete(feed: &FeedSession, post_id: PostId) -> Result<()> {
    feed.delete(post_id)
        .await
        .with_context(|| format!("Failed to delete post {}", post_id))?;
    output(&DeleteOutput { deleted: post_id })
}

/// The HTTP routes have no push channel, so polling stands in for one: each
/// tick publishes an unknown-change notification into the local feed and the
/// session's adapter turns it into a refresh.
async fn cmd_watch(
    feed: &FeedSession,
    changes: &ChangeFeed,
    config: &FeedConfig,
    signed_in: bool,
) -> Result<()> {
    let mut state = feed.watch();
    let mut poll = tokio::time::interval(config.poll_interval);
    // The first tick completes immediately; the session already loaded.
    poll.tick().await;

    let initial = state.borrow_and_update().clone();
    output(&FeedOutput {
        posts: &initial.posts,
        profile: signed_in.then(|| feed.profile()),
    })?;
    let mut last_printed = Some(initial.posts);

    tracing::info!(
        interval_secs = config.poll_interval.as_secs(),
        "watching feed, press Ctrl-C to stop"
    );

    loop {
        tokio::select! {
            _ = poll.tick() => {
                changes.publish(ChangeNotification::unknown());
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = state.borrow_and_update().clone();
                if last_printed.as_ref() != Some(&current.posts) {
                    output(&FeedOutput {
                        posts: &current.posts,
                        profile: signed_in.then(|| feed.profile()),
                    })?;
                    last_printed = Some(current.posts);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("stopping watch");
                break;
            }
        }
    }

    Ok(())
}
