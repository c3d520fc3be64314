use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;

/// 单次聚合内使用的记忆缓存
///
/// 同一个键并发请求时只会触发一次底层加载，其余调用等待同一个结果。
#[derive(Debug)]
pub struct MemoCache<K, V>
where
    K: Eq + Hash,
{
    data: DashMap<K, Arc<OnceCell<V>>>,
}

impl<K, V> MemoCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    /// 获取缓存项，不存在时调用 `load` 计算
    pub async fn get_or_load<F, Fut>(&self, key: &K, load: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        // 先取出 cell 再释放分片锁，避免跨 await 持锁
        let cell = self
            .data
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        cell.get_or_init(load).await.clone()
    }
}

impl<K, V> Default for MemoCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_cache_loads_once() {
        let cache: MemoCache<String, String> = MemoCache::new();
        let calls = AtomicUsize::new(0);

        let key = "0xabc".to_string();
        let first = cache
            .get_or_load(&key, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                "alice".to_string()
            })
            .await;
        let second = cache
            .get_or_load(&key, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                "bob".to_string()
            })
            .await;

        assert_eq!(first, "alice");
        assert_eq!(second, "alice");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_loads_share_one_call() {
        let cache: Arc<MemoCache<String, u32>> = Arc::new(MemoCache::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks = (0..8).map(|_| {
            let cache = cache.clone();
            let calls = calls.clone();
            async move {
                cache
                    .get_or_load(&"k".to_string(), || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::task::yield_now().await;
                        42
                    })
                    .await
            }
        });

        let results = futures::future::join_all(tasks).await;
        assert!(results.iter().all(|v| *v == 42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
