use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::models::{
    Notification, NotificationKey, NotificationSource, NotificationStatus,
};
use crate::services::aggregator::sort_feed;

/// 单个接收者的内存通知流
///
/// 始终按 `created_at` 倒序排列，每个 `(source, id)` 只出现一次，
/// `unread_count` 恒等于未读条数。实例只由 feed store actor 持有。
#[derive(Debug, Clone, Default)]
pub struct FeedState {
    notifications: Vec<Notification>,
    unread_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Patched,
}

impl FeedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    pub fn unread_count(&self) -> usize {
        self.unread_count
    }

    pub fn len(&self) -> usize {
        self.notifications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty()
    }

    pub fn get(&self, key: &NotificationKey) -> Option<&Notification> {
        self.notifications.iter().find(|n| n.matches(key))
    }

    pub fn contains(&self, key: &NotificationKey) -> bool {
        self.get(key).is_some()
    }

    fn position(&self, key: &NotificationKey) -> Option<usize> {
        self.notifications.iter().position(|n| n.matches(key))
    }

    pub fn clear(&mut self) {
        self.notifications.clear();
        self.unread_count = 0;
    }

    /// 批量加载：替换整个集合，重复的 (source, id) 只保留第一条
    pub fn replace_all(&mut self, notifications: Vec<Notification>) {
        let mut seen = HashSet::with_capacity(notifications.len());
        let mut deduped: Vec<Notification> = notifications
            .into_iter()
            .filter(|n| seen.insert(n.key()))
            .collect();
        sort_feed(&mut deduped);

        self.unread_count = deduped.iter().filter(|n| !n.is_read).count();
        self.notifications = deduped;
    }

    /// 未知记录按时间插入；已知记录只更新已读状态
    pub fn upsert(&mut self, notification: Notification) -> UpsertOutcome {
        let key = notification.key();
        if self.contains(&key) {
            if notification.is_read {
                self.mark_read(&key, notification.read_at.unwrap_or_else(Utc::now));
            }
            return UpsertOutcome::Patched;
        }

        let index = self
            .notifications
            .partition_point(|n| n.created_at > notification.created_at);
        if !notification.is_read {
            self.unread_count += 1;
        }
        self.notifications.insert(index, notification);
        UpsertOutcome::Inserted
    }

    /// 补全完成：替换展示字段，保留本地已读状态
    pub fn settle(&mut self, enriched: Notification) -> bool {
        let Some(index) = self.position(&enriched.key()) else {
            return false;
        };
        let current = &mut self.notifications[index];
        current.actor_display_name = enriched.actor_display_name;
        current.actor_avatar = enriched.actor_avatar;
        current.target_title = enriched.target_title;
        current.comment_text = enriched.comment_text;
        current.message = enriched.message;
        current.status = NotificationStatus::Settled;
        true
    }

    pub fn mark_read(&mut self, key: &NotificationKey, at: DateTime<Utc>) -> bool {
        let Some(index) = self.position(key) else {
            return false;
        };
        let flipped = self.notifications[index].mark_read(at);
        if flipped {
            self.unread_count -= 1;
        }
        flipped
    }

    pub fn mark_source_read(&mut self, source: NotificationSource, at: DateTime<Utc>) -> usize {
        let mut flipped = 0;
        for notification in self.notifications.iter_mut().filter(|n| n.source == source) {
            if notification.mark_read(at) {
                flipped += 1;
            }
        }
        self.unread_count -= flipped;
        flipped
    }

    pub fn remove(&mut self, key: &NotificationKey) -> Option<Notification> {
        let index = self.position(key)?;
        let removed = self.notifications.remove(index);
        if !removed.is_read {
            self.unread_count -= 1;
        }
        Some(removed)
    }
}
