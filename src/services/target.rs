use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::{
    error::Result,
    models::TargetType,
    utils::text::truncate_preview,
};

/// 内容存储（帖子 / 回复 / 视频各一个）
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// 返回 id -> 标题或正文预览；不存在的 id 直接缺省
    async fn titles(&self, ids: Vec<String>) -> Result<HashMap<String, String>>;
}

#[derive(Clone)]
pub struct TargetResolver {
    posts: Arc<dyn ContentStore>,
    replies: Arc<dyn ContentStore>,
    videos: Arc<dyn ContentStore>,
    preview_len: usize,
}

impl TargetResolver {
    pub fn new(
        posts: Arc<dyn ContentStore>,
        replies: Arc<dyn ContentStore>,
        videos: Arc<dyn ContentStore>,
        preview_len: usize,
    ) -> Self {
        Self {
            posts,
            replies,
            videos,
            preview_len,
        }
    }

    fn store_for(&self, target_type: TargetType) -> Option<&Arc<dyn ContentStore>> {
        match target_type {
            TargetType::Post => Some(&self.posts),
            TargetType::Reply => Some(&self.replies),
            TargetType::Video => Some(&self.videos),
            TargetType::Profile => None,
        }
    }

    /// 批量解析一种目标类型的标题。每个请求的 id 都会得到一个值，
    /// 缺失或查询失败的 id 使用该类型的默认标题。
    pub async fn resolve_batch(
        &self,
        target_type: TargetType,
        ids: &HashSet<String>,
    ) -> HashMap<String, String> {
        let default_title = target_type.default_title();
        let mut titles = HashMap::with_capacity(ids.len());

        if let Some(store) = self.store_for(target_type) {
            if !ids.is_empty() {
                let mut query_ids: Vec<String> = ids.iter().cloned().collect();
                query_ids.sort();
                match store.titles(query_ids).await {
                    Ok(found) => {
                        debug!("Resolved {}/{} {:?} titles", found.len(), ids.len(), target_type);
                        titles.extend(
                            found
                                .into_iter()
                                .filter(|(id, _)| ids.contains(id))
                                .map(|(id, title)| (id, truncate_preview(&title, self.preview_len))),
                        );
                    }
                    Err(e) => warn!("{:?} title lookup failed: {}", target_type, e),
                }
            }
        }

        for id in ids {
            titles
                .entry(id.clone())
                .or_insert_with(|| default_title.to_string());
        }
        titles
    }

    /// 三种内容类型相互独立，并行查询
    pub async fn resolve_all(
        &self,
        requests: HashMap<TargetType, HashSet<String>>,
    ) -> HashMap<(TargetType, String), String> {
        let batches = requests.iter().map(|(target_type, ids)| async move {
            (*target_type, self.resolve_batch(*target_type, ids).await)
        });

        join_all(batches)
            .await
            .into_iter()
            .flat_map(|(target_type, titles)| {
                titles
                    .into_iter()
                    .map(move |(id, title)| ((target_type, id), title))
            })
            .collect()
    }

    pub async fn resolve_one(&self, target_type: TargetType, id: &str) -> Option<String> {
        if target_type == TargetType::Profile {
            return None;
        }
        let ids: HashSet<String> = [id.to_string()].into_iter().collect();
        self.resolve_batch(target_type, &ids).await.remove(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    fn empty_store() -> Arc<dyn ContentStore> {
        let mut store = MockContentStore::new();
        store.expect_titles().never();
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_missing_ids_get_default_title() {
        let mut posts = MockContentStore::new();
        posts
            .expect_titles()
            .withf(|ids| ids == &vec!["p1".to_string(), "p2".to_string()])
            .times(1)
            .returning(|_| Ok(HashMap::from([("p1".to_string(), "Hello".to_string())])));

        let resolver = TargetResolver::new(Arc::new(posts), empty_store(), empty_store(), 50);
        let ids: HashSet<String> = ["p2", "p1", "p1"].iter().map(|s| s.to_string()).collect();
        let titles = resolver.resolve_batch(TargetType::Post, &ids).await;

        assert_eq!(titles.len(), 2);
        assert_eq!(titles["p1"], "Hello");
        assert_eq!(titles["p2"], "Post");
    }

    #[tokio::test]
    async fn test_failed_batch_does_not_block_other_types() {
        let mut videos = MockContentStore::new();
        videos
            .expect_titles()
            .returning(|_| Err(AppError::store("video store down")));
        let mut replies = MockContentStore::new();
        replies
            .expect_titles()
            .returning(|_| Ok(HashMap::from([("r1".to_string(), "nice post!".to_string())])));

        let resolver = TargetResolver::new(empty_store(), Arc::new(replies), Arc::new(videos), 50);
        let requests = HashMap::from([
            (TargetType::Video, HashSet::from(["v1".to_string()])),
            (TargetType::Reply, HashSet::from(["r1".to_string()])),
        ]);
        let titles = resolver.resolve_all(requests).await;

        assert_eq!(titles[&(TargetType::Video, "v1".to_string())], "Video");
        assert_eq!(titles[&(TargetType::Reply, "r1".to_string())], "nice post!");
    }

    #[tokio::test]
    async fn test_long_titles_are_truncated() {
        let mut posts = MockContentStore::new();
        posts.expect_titles().returning(|_| {
            Ok(HashMap::from([(
                "p1".to_string(),
                "a very long post title that keeps going".to_string(),
            )]))
        });

        let resolver = TargetResolver::new(Arc::new(posts), empty_store(), empty_store(), 11);
        assert_eq!(
            resolver.resolve_one(TargetType::Post, "p1").await.as_deref(),
            Some("a very long...")
        );
        assert_eq!(resolver.resolve_one(TargetType::Profile, "0xabc").await, None);
    }
}
