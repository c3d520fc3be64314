use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{BoxStream, StreamExt};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::{
    error::Result,
    models::{ChangeKind, NotificationSource, RawEvent, RecipientFilter, RowChange},
};

/// 行变更流；丢弃即取消订阅
pub type RowStream = BoxStream<'static, RowChange>;

/// 活动表存储（外部协作者）
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ActivityStore: Send + Sync {
    /// 按接收者过滤，按 created_at 倒序返回
    async fn query(&self, table: &str, filter: &RecipientFilter) -> Result<Vec<Value>>;

    async fn subscribe(&self, table: &str, filter: &RecipientFilter) -> Result<RowStream>;

    async fn update(&self, table: &str, id: &str, patch: Value) -> Result<()>;

    /// 只更新匹配接收者且 is_read = false 的行，已读行的 read_at 保持不变
    async fn update_where(&self, table: &str, filter: &RecipientFilter, patch: Value) -> Result<()>;

    async fn delete(&self, table: &str, id: &str) -> Result<()>;
}

/// 规范化后的单来源变更
#[derive(Debug, Clone, PartialEq)]
pub enum SourceChange {
    Insert(RawEvent),
    Update(RawEvent),
    Delete { id: String },
}

/// 单张活动表的适配器，持有该来源的列映射，对外统一按接收者读写
#[derive(Clone)]
pub struct SourceConnector {
    source: NotificationSource,
    store: Arc<dyn ActivityStore>,
}

impl SourceConnector {
    pub fn new(source: NotificationSource, store: Arc<dyn ActivityStore>) -> Self {
        Self { source, store }
    }

    /// 为所有来源创建连接器，共享同一个底层存储
    pub fn for_all_sources(store: Arc<dyn ActivityStore>) -> Vec<SourceConnector> {
        NotificationSource::ALL
            .iter()
            .map(|source| SourceConnector::new(*source, store.clone()))
            .collect()
    }

    pub fn source(&self) -> NotificationSource {
        self.source
    }

    pub async fn fetch_all(&self, recipient: &str) -> Result<Vec<RawEvent>> {
        let schema = self.source.schema();
        let filter = schema.recipient_filter(recipient);
        let rows = self.store.query(schema.table, &filter).await?;

        let mut events: Vec<RawEvent> = rows
            .iter()
            .filter_map(|row| match schema.parse_row(row) {
                Ok(event) if event.recipient == filter.value => Some(event),
                Ok(event) => {
                    warn!("{}: dropping row {} for foreign recipient", schema.table, event.id);
                    None
                }
                Err(e) => {
                    warn!("{}: skipping malformed row: {}", schema.table, e);
                    None
                }
            })
            .collect();

        events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        debug!("{}: fetched {} events for {}", schema.table, events.len(), filter.value);
        Ok(events)
    }

    pub async fn subscribe(&self, recipient: &str) -> Result<BoxStream<'static, SourceChange>> {
        let schema = self.source.schema();
        let filter = schema.recipient_filter(recipient);
        let rows = self.store.subscribe(schema.table, &filter).await?;

        let stream = rows.filter_map(move |change| {
            let parsed = match change.kind {
                ChangeKind::Delete => change
                    .row
                    .get("id")
                    .and_then(|id| match id {
                        Value::String(s) => Some(s.clone()),
                        Value::Number(n) => Some(n.to_string()),
                        _ => None,
                    })
                    .map(|id| SourceChange::Delete { id }),
                kind => match schema.parse_row(&change.row) {
                    Ok(event) if event.recipient == filter.value => Some(match kind {
                        ChangeKind::Insert => SourceChange::Insert(event),
                        _ => SourceChange::Update(event),
                    }),
                    Ok(_) => None,
                    Err(e) => {
                        warn!("{}: ignoring malformed change: {}", schema.table, e);
                        None
                    }
                },
            };
            futures::future::ready(parsed)
        });

        Ok(stream.boxed())
    }

    pub async fn mark_read(&self, id: &str) -> Result<()> {
        self.store
            .update(self.source.table(), id, read_patch())
            .await
    }

    pub async fn mark_all_read(&self, recipient: &str) -> Result<()> {
        let schema = self.source.schema();
        self.store
            .update_where(schema.table, &schema.recipient_filter(recipient), read_patch())
            .await
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        self.store.delete(self.source.table(), id).await
    }
}

fn read_patch() -> Value {
    json!({ "is_read": true, "read_at": Utc::now() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    fn like_row(id: &str, recipient: &str, created_at: &str) -> Value {
        json!({
            "id": id,
            "recipient_addr": recipient,
            "liker_addr": "0xliker",
            "post_id": "p1",
            "created_at": created_at,
            "is_read": false
        })
    }

    #[tokio::test]
    async fn test_fetch_all_uses_source_recipient_column() {
        let mut store = MockActivityStore::new();
        store
            .expect_query()
            .withf(|table, filter| {
                table == "follow_notifications"
                    && filter.column == "followee_addr"
                    && filter.value == "0xabc"
            })
            .times(1)
            .returning(|_, _| Ok(vec![]));

        let connector = SourceConnector::new(NotificationSource::Follow, Arc::new(store));
        let events = connector.fetch_all("0xABC").await.unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_all_skips_malformed_and_sorts() {
        let mut store = MockActivityStore::new();
        store.expect_query().returning(|_, _| {
            Ok(vec![
                like_row("1", "0xabc", "2024-01-01T00:00:00Z"),
                json!({ "id": "broken" }),
                like_row("2", "0xabc", "2024-01-03T00:00:00Z"),
                like_row("3", "0xother", "2024-01-04T00:00:00Z"),
            ])
        });

        let connector = SourceConnector::new(NotificationSource::PostLike, Arc::new(store));
        let events = connector.fetch_all("0xabc").await.unwrap();
        let ids: Vec<_> = events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "1"]);
    }

    #[tokio::test]
    async fn test_fetch_failure_propagates_to_caller() {
        let mut store = MockActivityStore::new();
        store
            .expect_query()
            .returning(|_, _| Err(AppError::store("connection refused")));

        let connector = SourceConnector::new(NotificationSource::VideoLike, Arc::new(store));
        assert!(connector.fetch_all("0xabc").await.is_err());
    }

    #[tokio::test]
    async fn test_writes_target_own_table() {
        let mut store = MockActivityStore::new();
        store
            .expect_update()
            .withf(|table, id, _| table == "video_comment_notifications" && id == "42")
            .times(1)
            .returning(|_, _, _| Ok(()));
        store
            .expect_delete()
            .withf(|table, id| table == "video_comment_notifications" && id == "42")
            .times(1)
            .returning(|_, _| Ok(()));
        store
            .expect_update_where()
            .withf(|table, filter, patch| {
                table == "video_comment_notifications"
                    && filter.column == "creator_addr"
                    && patch["is_read"] == json!(true)
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let connector = SourceConnector::new(NotificationSource::VideoComment, Arc::new(store));
        connector.mark_read("42").await.unwrap();
        connector.delete("42").await.unwrap();
        connector.mark_all_read("0xabc").await.unwrap();
    }

    #[tokio::test]
    async fn test_subscribe_normalizes_changes() {
        let mut store = MockActivityStore::new();
        store.expect_subscribe().returning(|_, _| {
            let changes = vec![
                RowChange::new(ChangeKind::Insert, like_row("5", "0xabc", "2024-01-05T00:00:00Z")),
                RowChange::new(ChangeKind::Insert, like_row("6", "0xother", "2024-01-05T00:00:00Z")),
                RowChange::new(ChangeKind::Update, like_row("5", "0xabc", "2024-01-05T00:00:00Z")),
                RowChange::new(ChangeKind::Delete, json!({ "id": 5 })),
            ];
            Ok(futures::stream::iter(changes).boxed())
        });

        let connector = SourceConnector::new(NotificationSource::PostLike, Arc::new(store));
        let changes: Vec<_> = connector.subscribe("0xabc").await.unwrap().collect().await;

        assert_eq!(changes.len(), 3);
        assert!(matches!(&changes[0], SourceChange::Insert(e) if e.id == "5"));
        assert!(matches!(&changes[1], SourceChange::Update(e) if e.id == "5"));
        assert_eq!(changes[2], SourceChange::Delete { id: "5".to_string() });
    }
}
