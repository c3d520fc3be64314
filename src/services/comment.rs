use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::{
    error::Result,
    models::VideoComment,
    utils::text::{normalize_address, truncate_preview},
};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommentStore: Send + Sync {
    /// 该用户在该视频上 created_at <= at 的最新一条评论
    async fn latest_at_or_before(
        &self,
        video_id: &str,
        author: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<VideoComment>>;

    /// 该用户在该视频上 created_at >= at 的最早一条评论
    async fn earliest_at_or_after(
        &self,
        video_id: &str,
        author: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<VideoComment>>;
}

/// 查找 `video_comment` 通知对应的评论内容
///
/// 通知行只有视频和评论者，没有评论 id，因此这里按时间就近匹配而不是关联查询：
/// 先取该用户在该视频下、通知时间之前（含）最新的一条评论，
/// 否则取通知时间之后（含）最早的一条。同一用户短时间内的两条评论可能匹配错。
#[derive(Clone)]
pub struct CommentContentResolver {
    store: Arc<dyn CommentStore>,
    preview_len: usize,
}

impl CommentContentResolver {
    pub fn new(store: Arc<dyn CommentStore>, preview_len: usize) -> Self {
        Self { store, preview_len }
    }

    pub async fn resolve(
        &self,
        video_id: &str,
        actor_address: &str,
        notification_created_at: DateTime<Utc>,
    ) -> Option<String> {
        let actor = normalize_address(actor_address);

        let comment = match self
            .store
            .latest_at_or_before(video_id, &actor, notification_created_at)
            .await
        {
            Ok(Some(comment)) => Some(comment),
            Ok(None) => self.fallback(video_id, &actor, notification_created_at).await,
            Err(e) => {
                warn!("Comment lookup failed for video {}: {}", video_id, e);
                self.fallback(video_id, &actor, notification_created_at).await
            }
        };

        match comment {
            Some(comment) => Some(truncate_preview(&comment.content, self.preview_len)),
            None => {
                debug!("No comment by {} on video {} near {}", actor, video_id, notification_created_at);
                None
            }
        }
    }

    async fn fallback(
        &self,
        video_id: &str,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Option<VideoComment> {
        match self.store.earliest_at_or_after(video_id, actor, at).await {
            Ok(comment) => comment,
            Err(e) => {
                warn!("Fallback comment lookup failed for video {}: {}", video_id, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use mockall::Sequence;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn comment(content: &str, secs: i64) -> VideoComment {
        VideoComment {
            id: format!("c{}", secs),
            video_id: "v1".to_string(),
            author_addr: "0xdef".to_string(),
            content: content.to_string(),
            created_at: at(secs),
        }
    }

    #[tokio::test]
    async fn test_prefers_comment_at_or_before() {
        let mut store = MockCommentStore::new();
        store
            .expect_latest_at_or_before()
            .withf(|video, author, when| video == "v1" && author == "0xdef" && *when == at(100))
            .times(1)
            .returning(|_, _, _| Ok(Some(comment("first!", 95))));
        store.expect_earliest_at_or_after().never();

        let resolver = CommentContentResolver::new(Arc::new(store), 100);
        let text = resolver.resolve("v1", "0xDEF", at(100)).await;
        assert_eq!(text.as_deref(), Some("first!"));
    }

    #[tokio::test]
    async fn test_falls_back_to_earliest_after() {
        let mut seq = Sequence::new();
        let mut store = MockCommentStore::new();
        store
            .expect_latest_at_or_before()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(None));
        store
            .expect_earliest_at_or_after()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(Some(comment("skewed clock", 101))));

        let resolver = CommentContentResolver::new(Arc::new(store), 100);
        let text = resolver.resolve("v1", "0xdef", at(100)).await;
        assert_eq!(text.as_deref(), Some("skewed clock"));
    }

    #[tokio::test]
    async fn test_no_comment_resolves_to_none() {
        let mut store = MockCommentStore::new();
        store.expect_latest_at_or_before().returning(|_, _, _| Ok(None));
        store.expect_earliest_at_or_after().returning(|_, _, _| Ok(None));

        let resolver = CommentContentResolver::new(Arc::new(store), 100);
        assert!(resolver.resolve("v1", "0xdef", at(100)).await.is_none());
    }

    #[tokio::test]
    async fn test_long_comment_is_truncated() {
        let mut store = MockCommentStore::new();
        store
            .expect_latest_at_or_before()
            .returning(|_, _, _| Ok(Some(comment("this comment is rather long", 90))));

        let resolver = CommentContentResolver::new(Arc::new(store), 12);
        let text = resolver.resolve("v1", "0xdef", at(100)).await;
        assert_eq!(text.as_deref(), Some("this comment..."));
    }
}
