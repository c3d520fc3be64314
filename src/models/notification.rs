use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::source::NotificationSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Like,
    LikeReply,
    Reply,
    NestedReply,
    Follow,
    VideoPurchase,
    VideoLike,
    VideoComment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Post,
    Reply,
    Video,
    Profile,
}

impl TargetType {
    /// 目标缺失时的默认标题
    pub fn default_title(self) -> &'static str {
        match self {
            TargetType::Post => "Post",
            TargetType::Reply => "Reply",
            TargetType::Video => "Video",
            TargetType::Profile => "Profile",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    /// 原始事件已到达，补全仍在进行
    Pending,
    /// 消息已最终确定
    Settled,
}

/// `(source, id)` 组合全局唯一
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NotificationKey {
    pub source: NotificationSource,
    pub id: String,
}

impl NotificationKey {
    pub fn new(source: NotificationSource, id: impl Into<String>) -> Self {
        Self {
            source,
            id: id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub source: NotificationSource,
    pub recipient_address: String,
    pub actor_address: String,
    pub actor_display_name: String,
    pub actor_avatar: Option<String>,
    pub notification_type: NotificationType,
    pub target_id: String,
    pub target_type: TargetType,
    pub target_title: Option<String>,
    pub comment_text: Option<String>,
    pub message: String,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub status: NotificationStatus,
}

impl Notification {
    pub fn key(&self) -> NotificationKey {
        NotificationKey::new(self.source, self.id.clone())
    }

    pub fn matches(&self, key: &NotificationKey) -> bool {
        self.source == key.source && self.id == key.id
    }

    /// 已读状态只允许 false -> true 一次
    pub fn mark_read(&mut self, at: DateTime<Utc>) -> bool {
        if self.is_read {
            return false;
        }
        self.is_read = true;
        self.read_at = Some(at);
        true
    }
}

/// 通知流快照，供列表渲染和角标使用
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedSnapshot {
    pub recipient: Option<String>,
    pub notifications: Vec<Notification>,
    pub unread_count: usize,
    pub loading: bool,
}
