use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::{
    error::Result,
    models::Profile,
    utils::{cache::MemoCache, text::normalize_address, text::shorten_address},
};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get_profile(&self, address: &str) -> Result<Option<Profile>>;
}

/// 操作者资料解析
///
/// 每次聚合创建一个新的解析器，同一地址在一次聚合内只查询一次。
/// 查询失败或资料不存在时返回空资料，由调用方回退到缩短的地址。
pub struct ProfileResolver {
    store: Arc<dyn ProfileStore>,
    cache: MemoCache<String, Profile>,
}

impl ProfileResolver {
    pub fn new(store: Arc<dyn ProfileStore>) -> Self {
        Self {
            store,
            cache: MemoCache::new(),
        }
    }

    pub async fn resolve(&self, actor_address: &str) -> Profile {
        let address = normalize_address(actor_address);
        self.cache
            .get_or_load(&address, || async {
                match self.store.get_profile(&address).await {
                    Ok(Some(profile)) => profile,
                    Ok(None) => {
                        debug!("No profile for {}", address);
                        Profile::default()
                    }
                    Err(e) => {
                        warn!("Profile lookup failed for {}: {}", address, e);
                        Profile::default()
                    }
                }
            })
            .await
    }

    /// 显示名：资料名称，缺失时使用缩短地址
    pub async fn display_name(&self, actor_address: &str) -> (String, Option<String>) {
        let profile = self.resolve(actor_address).await;
        let name = profile
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| shorten_address(&normalize_address(actor_address)));
        (name, profile.avatar_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    #[tokio::test]
    async fn test_second_lookup_hits_cache() {
        let mut store = MockProfileStore::new();
        store
            .expect_get_profile()
            .withf(|address| address == "0xabcdef1234567890")
            .times(1)
            .returning(|_| {
                Ok(Some(Profile {
                    name: Some("alice".to_string()),
                    avatar_url: Some("https://cdn/alice.png".to_string()),
                }))
            });

        let resolver = ProfileResolver::new(Arc::new(store));
        let first = resolver.resolve("0xABCDEF1234567890").await;
        let second = resolver.resolve("0xabcdef1234567890").await;

        assert_eq!(first, second);
        assert_eq!(first.name.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_failure_falls_back_to_short_address() {
        let mut store = MockProfileStore::new();
        store
            .expect_get_profile()
            .times(1)
            .returning(|_| Err(AppError::store("timeout")));

        let resolver = ProfileResolver::new(Arc::new(store));
        let (name, avatar) = resolver.display_name("0x1234567890abcdef9999").await;

        assert_eq!(name, "0x1234...9999");
        assert!(avatar.is_none());
    }

    #[tokio::test]
    async fn test_blank_name_falls_back() {
        let mut store = MockProfileStore::new();
        store.expect_get_profile().returning(|_| {
            Ok(Some(Profile {
                name: Some("  ".to_string()),
                avatar_url: None,
            }))
        });

        let resolver = ProfileResolver::new(Arc::new(store));
        let (name, _) = resolver.display_name("0xaaaaaa00000bbbb").await;
        assert_eq!(name, "0xaaaa...bbbb");
    }
}
