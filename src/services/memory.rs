//! 外部存储的内存实现，供演示程序和集成测试使用

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::{ChangeKind, Profile, RecipientFilter, RowChange, VideoComment},
    services::{
        comment::CommentStore,
        connector::{ActivityStore, RowStream},
        profile::ProfileStore,
        target::ContentStore,
    },
    utils::text::normalize_address,
};

struct Subscriber {
    table: String,
    filter: RecipientFilter,
    tx: mpsc::UnboundedSender<RowChange>,
}

/// 内存活动表，带行级变更广播
#[derive(Default)]
pub struct InMemoryActivityStore {
    tables: RwLock<HashMap<String, Vec<Value>>>,
    subscribers: Mutex<Vec<Subscriber>>,
    unavailable: RwLock<HashSet<String>>,
}

impl InMemoryActivityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 模拟某张表不可用
    pub fn set_unavailable(&self, table: &str, unavailable: bool) {
        let mut tables = self.unavailable.write();
        if unavailable {
            tables.insert(table.to_string());
        } else {
            tables.remove(table);
        }
    }

    fn check_available(&self, table: &str) -> Result<()> {
        if self.unavailable.read().contains(table) {
            return Err(AppError::Store(format!("{} is unavailable", table)));
        }
        Ok(())
    }

    /// 插入一行并通知订阅者；缺少 id 时自动生成
    pub fn insert(&self, table: &str, mut row: Value) -> String {
        let id = match row.get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                let id = Uuid::new_v4().to_string();
                row["id"] = Value::String(id.clone());
                id
            }
        };
        self.tables
            .write()
            .entry(table.to_string())
            .or_default()
            .push(row.clone());
        self.broadcast(table, RowChange::new(ChangeKind::Insert, row));
        id
    }

    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.tables.read().get(table).cloned().unwrap_or_default()
    }

    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|s| !s.tx.is_closed());
        subscribers.len()
    }

    fn broadcast(&self, table: &str, change: RowChange) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|s| !s.tx.is_closed());
        for subscriber in subscribers.iter().filter(|s| s.table == table) {
            if subscriber.filter.matches(&change.row) {
                let _ = subscriber.tx.send(change.clone());
            }
        }
    }
}

fn row_id(row: &Value) -> Option<String> {
    match row.get("id") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn is_read(row: &Value) -> bool {
    row.get("is_read").and_then(Value::as_bool).unwrap_or(false)
}

fn created_at(row: &Value) -> Option<DateTime<Utc>> {
    row.get("created_at")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
}

fn merge(row: &mut Value, patch: &Value) {
    if let (Some(target), Some(fields)) = (row.as_object_mut(), patch.as_object()) {
        for (key, value) in fields {
            target.insert(key.clone(), value.clone());
        }
    }
}

#[async_trait]
impl ActivityStore for InMemoryActivityStore {
    async fn query(&self, table: &str, filter: &RecipientFilter) -> Result<Vec<Value>> {
        self.check_available(table)?;
        let mut rows: Vec<Value> = self
            .rows(table)
            .into_iter()
            .filter(|row| filter.matches(row))
            .collect();
        rows.sort_by(|a, b| created_at(b).cmp(&created_at(a)));
        Ok(rows)
    }

    async fn subscribe(&self, table: &str, filter: &RecipientFilter) -> Result<RowStream> {
        self.check_available(table)?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(Subscriber {
            table: table.to_string(),
            filter: filter.clone(),
            tx,
        });
        debug!("Subscribed to {} where {} = {}", table, filter.column, filter.value);

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|change| (change, rx))
        });
        Ok(stream.boxed())
    }

    async fn update(&self, table: &str, id: &str, patch: Value) -> Result<()> {
        self.check_available(table)?;
        let updated = {
            let mut tables = self.tables.write();
            let row = tables
                .get_mut(table)
                .and_then(|rows| rows.iter_mut().find(|r| row_id(r).as_deref() == Some(id)))
                .ok_or_else(|| AppError::not_found(&format!("{}:{}", table, id)))?;
            merge(row, &patch);
            row.clone()
        };
        self.broadcast(table, RowChange::new(ChangeKind::Update, updated));
        Ok(())
    }

    async fn update_where(&self, table: &str, filter: &RecipientFilter, patch: Value) -> Result<()> {
        self.check_available(table)?;
        let updated: Vec<Value> = {
            let mut tables = self.tables.write();
            tables
                .get_mut(table)
                .map(|rows| {
                    rows.iter_mut()
                        .filter(|r| filter.matches(r) && !is_read(r))
                        .map(|r| {
                            merge(r, &patch);
                            r.clone()
                        })
                        .collect()
                })
                .unwrap_or_default()
        };
        for row in updated {
            self.broadcast(table, RowChange::new(ChangeKind::Update, row));
        }
        Ok(())
    }

    async fn delete(&self, table: &str, id: &str) -> Result<()> {
        self.check_available(table)?;
        let removed = {
            let mut tables = self.tables.write();
            let rows = tables
                .get_mut(table)
                .ok_or_else(|| AppError::not_found(table))?;
            let index = rows
                .iter()
                .position(|r| row_id(r).as_deref() == Some(id))
                .ok_or_else(|| AppError::not_found(&format!("{}:{}", table, id)))?;
            rows.remove(index)
        };
        self.broadcast(table, RowChange::new(ChangeKind::Delete, removed));
        Ok(())
    }
}

/// 内存资料存储，记录查询次数
#[derive(Default)]
pub struct InMemoryProfileStore {
    profiles: DashMap<String, Profile>,
    lookups: AtomicUsize,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, address: &str, name: &str, avatar_url: Option<&str>) {
        self.profiles.insert(
            normalize_address(address),
            Profile {
                name: Some(name.to_string()),
                avatar_url: avatar_url.map(str::to_string),
            },
        );
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn get_profile(&self, address: &str) -> Result<Option<Profile>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.profiles.get(address).map(|p| p.clone()))
    }
}

#[derive(Default)]
pub struct InMemoryContentStore {
    titles: DashMap<String, String>,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, id: &str, title: &str) {
        self.titles.insert(id.to_string(), title.to_string());
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn titles(&self, ids: Vec<String>) -> Result<HashMap<String, String>> {
        Ok(ids
            .into_iter()
            .filter_map(|id| self.titles.get(&id).map(|t| (id.clone(), t.clone())))
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryCommentStore {
    comments: RwLock<Vec<VideoComment>>,
}

impl InMemoryCommentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, video_id: &str, author: &str, content: &str, created_at: DateTime<Utc>) {
        self.comments.write().push(VideoComment {
            id: Uuid::new_v4().to_string(),
            video_id: video_id.to_string(),
            author_addr: normalize_address(author),
            content: content.to_string(),
            created_at,
        });
    }

    fn by_author(&self, video_id: &str, author: &str) -> Vec<VideoComment> {
        self.comments
            .read()
            .iter()
            .filter(|c| c.video_id == video_id && c.author_addr == author)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl CommentStore for InMemoryCommentStore {
    async fn latest_at_or_before(
        &self,
        video_id: &str,
        author: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<VideoComment>> {
        Ok(self
            .by_author(video_id, author)
            .into_iter()
            .filter(|c| c.created_at <= at)
            .max_by_key(|c| c.created_at))
    }

    async fn earliest_at_or_after(
        &self,
        video_id: &str,
        author: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<VideoComment>> {
        Ok(self
            .by_author(video_id, author)
            .into_iter()
            .filter(|c| c.created_at >= at)
            .min_by_key(|c| c.created_at))
    }
}
