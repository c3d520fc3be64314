use std::sync::Arc;

use crate::{
    config::FeedConfig,
    services::{
        ActivityStore, Aggregator, CommentContentResolver, CommentStore, ContentStore,
        FeedHandle, FeedStore, ProfileStore, SourceConnector, TargetResolver,
    },
};

/// 外部协作者集合
#[derive(Clone)]
pub struct Collaborators {
    pub activity: Arc<dyn ActivityStore>,
    pub profiles: Arc<dyn ProfileStore>,
    pub posts: Arc<dyn ContentStore>,
    pub replies: Arc<dyn ContentStore>,
    pub videos: Arc<dyn ContentStore>,
    pub comments: Arc<dyn CommentStore>,
}

/// 应用程序的共享状态
#[derive(Clone)]
pub struct AppState {
    /// 应用配置
    pub config: FeedConfig,

    /// 通知流句柄
    pub feed: FeedHandle,
}

impl AppState {
    /// 组装连接器、解析器与聚合器，并启动通知流 actor
    pub fn build(config: FeedConfig, collaborators: Collaborators) -> Self {
        let connectors = SourceConnector::for_all_sources(collaborators.activity);
        let targets = TargetResolver::new(
            collaborators.posts,
            collaborators.replies,
            collaborators.videos,
            config.title_preview_len,
        );
        let comments = CommentContentResolver::new(collaborators.comments, config.comment_preview_len);
        let aggregator = Aggregator::new(collaborators.profiles, targets, comments);

        let feed = FeedStore::spawn(connectors, aggregator, &config);

        Self { config, feed }
    }
}
