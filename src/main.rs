use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use tokio::time::{timeout, Duration as StdDuration};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use activity_notify::{
    services::memory::{
        InMemoryActivityStore, InMemoryCommentStore, InMemoryContentStore, InMemoryProfileStore,
    },
    models::NotificationStatus,
    AppState, Collaborators, FeedConfig, NotificationSource,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 加载配置
    let config = FeedConfig::from_env()?;

    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.clone()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting activity-notify demo...");

    let recipient = std::env::var("DEMO_RECIPIENT").unwrap_or_else(|_| "0xabc".to_string());
    let activity = Arc::new(InMemoryActivityStore::new());
    let profiles = Arc::new(InMemoryProfileStore::new());
    let posts = Arc::new(InMemoryContentStore::new());
    let replies = Arc::new(InMemoryContentStore::new());
    let videos = Arc::new(InMemoryContentStore::new());
    let comments = Arc::new(InMemoryCommentStore::new());

    seed(&recipient, &activity, &profiles, &posts, &videos, &comments);

    let state = AppState::build(
        config,
        Collaborators {
            activity: activity.clone(),
            profiles,
            posts,
            replies: replies.clone(),
            videos,
            comments,
        },
    );

    state.feed.open(&recipient).await?;
    let loaded = state.feed.wait_until_loaded().await?;
    info!("Initial feed: {} items, {} unread", loaded.notifications.len(), loaded.unread_count);

    // 模拟一条实时回复
    replies.put("reply-9", "Totally agree with this take");
    activity.insert(
        NotificationSource::Reply.table(),
        json!({
            "recipient_addr": recipient,
            "replier_addr": "0x9999000000000000000000000000000000000001",
            "reply_id": "reply-9",
            "post_id": "post-1",
            "created_at": Utc::now(),
            "is_read": false
        }),
    );

    let mut updates = state.feed.watch();
    let expected = loaded.notifications.len() + 1;
    let settled = timeout(
        StdDuration::from_secs(5),
        updates.wait_for(|s| {
            s.notifications.len() == expected
                && s.notifications.iter().all(|n| n.status == NotificationStatus::Settled)
        }),
    )
    .await
    .is_ok();
    if !settled {
        warn!("Live insert did not settle in time");
    }

    let snapshot = state.feed.snapshot();
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    state.feed.close().await?;
    Ok(())
}

fn seed(
    recipient: &str,
    activity: &InMemoryActivityStore,
    profiles: &InMemoryProfileStore,
    posts: &InMemoryContentStore,
    videos: &InMemoryContentStore,
    comments: &InMemoryCommentStore,
) {
    let now = Utc::now();
    let alice = "0xa11ce00000000000000000000000000000000001";
    let bob = "0xb0b0000000000000000000000000000000000002";

    profiles.put(alice, "alice", Some("https://cdn.example.com/avatars/alice.png"));
    posts.put("post-1", "Why ownership makes concurrency boring");
    videos.put("video-1", "Sunset timelapse over the bay");
    comments.put("video-1", bob, "The colors at 0:42 are unreal", now - Duration::minutes(31));

    activity.insert(
        NotificationSource::PostLike.table(),
        json!({
            "recipient_addr": recipient,
            "liker_addr": alice,
            "post_id": "post-1",
            "created_at": now - Duration::hours(3),
            "is_read": true,
            "read_at": now - Duration::hours(2)
        }),
    );
    activity.insert(
        NotificationSource::Follow.table(),
        json!({
            "followee_addr": recipient,
            "follower_addr": bob,
            "created_at": now - Duration::hours(1),
            "is_read": false
        }),
    );
    activity.insert(
        NotificationSource::VideoComment.table(),
        json!({
            "creator_addr": recipient,
            "commenter_addr": bob,
            "video_id": "video-1",
            "created_at": now - Duration::minutes(30),
            "is_read": false
        }),
    );
    activity.insert(
        NotificationSource::VideoPurchase.table(),
        json!({
            "creator_addr": recipient,
            "buyer_addr": alice,
            "video_id": "video-1",
            "price": 4.99,
            "created_at": now - Duration::minutes(5),
            "is_read": false
        }),
    );
}
