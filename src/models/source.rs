use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AppError, Result};
use crate::models::notification::{NotificationType, TargetType};
use crate::utils::text::normalize_address;

/// 通知来源：每个来源对应一张独立的活动表
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationSource {
    PostLike,
    ReplyLike,
    Reply,
    NestedReply,
    Follow,
    VideoPurchase,
    VideoLike,
    VideoComment,
}

impl NotificationSource {
    pub const ALL: [NotificationSource; 8] = [
        NotificationSource::PostLike,
        NotificationSource::ReplyLike,
        NotificationSource::Reply,
        NotificationSource::NestedReply,
        NotificationSource::Follow,
        NotificationSource::VideoPurchase,
        NotificationSource::VideoLike,
        NotificationSource::VideoComment,
    ];

    /// 每个来源的表结构映射，编译期确定
    pub const fn schema(self) -> SourceSchema {
        match self {
            NotificationSource::PostLike => SourceSchema {
                table: "post_like_notifications",
                recipient_column: "recipient_addr",
                actor_column: "liker_addr",
                target_column: "post_id",
                target_type: TargetType::Post,
                notification_type: NotificationType::Like,
                payload_columns: &[],
            },
            NotificationSource::ReplyLike => SourceSchema {
                table: "reply_like_notifications",
                recipient_column: "recipient_addr",
                actor_column: "liker_addr",
                target_column: "reply_id",
                target_type: TargetType::Reply,
                notification_type: NotificationType::LikeReply,
                payload_columns: &["post_id"],
            },
            NotificationSource::Reply => SourceSchema {
                table: "reply_notifications",
                recipient_column: "recipient_addr",
                actor_column: "replier_addr",
                target_column: "reply_id",
                target_type: TargetType::Reply,
                notification_type: NotificationType::Reply,
                payload_columns: &["post_id"],
            },
            NotificationSource::NestedReply => SourceSchema {
                table: "nested_reply_notifications",
                recipient_column: "recipient_addr",
                actor_column: "replier_addr",
                target_column: "reply_id",
                target_type: TargetType::Reply,
                notification_type: NotificationType::NestedReply,
                payload_columns: &["post_id", "parent_reply_id"],
            },
            NotificationSource::Follow => SourceSchema {
                table: "follow_notifications",
                recipient_column: "followee_addr",
                actor_column: "follower_addr",
                target_column: "follower_addr",
                target_type: TargetType::Profile,
                notification_type: NotificationType::Follow,
                payload_columns: &[],
            },
            NotificationSource::VideoPurchase => SourceSchema {
                table: "video_purchase_notifications",
                recipient_column: "creator_addr",
                actor_column: "buyer_addr",
                target_column: "video_id",
                target_type: TargetType::Video,
                notification_type: NotificationType::VideoPurchase,
                payload_columns: &["price", "tx_hash"],
            },
            NotificationSource::VideoLike => SourceSchema {
                table: "video_like_notifications",
                recipient_column: "creator_addr",
                actor_column: "liker_addr",
                target_column: "video_id",
                target_type: TargetType::Video,
                notification_type: NotificationType::VideoLike,
                payload_columns: &[],
            },
            NotificationSource::VideoComment => SourceSchema {
                table: "video_comment_notifications",
                recipient_column: "creator_addr",
                actor_column: "commenter_addr",
                target_column: "video_id",
                target_type: TargetType::Video,
                notification_type: NotificationType::VideoComment,
                payload_columns: &[],
            },
        }
    }

    pub fn table(self) -> &'static str {
        self.schema().table
    }

    pub fn notification_type(self) -> NotificationType {
        self.schema().notification_type
    }
}

/// 单张活动表的列映射
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceSchema {
    pub table: &'static str,
    pub recipient_column: &'static str,
    pub actor_column: &'static str,
    pub target_column: &'static str,
    pub target_type: TargetType,
    pub notification_type: NotificationType,
    pub payload_columns: &'static [&'static str],
}

impl SourceSchema {
    pub fn recipient_filter(&self, recipient: &str) -> RecipientFilter {
        RecipientFilter {
            column: self.recipient_column,
            value: normalize_address(recipient),
        }
    }

    /// 将原始行规范化为 RawEvent
    pub fn parse_row(&self, row: &Value) -> Result<RawEvent> {
        let obj = row
            .as_object()
            .ok_or_else(|| AppError::invalid_row("row is not an object"))?;

        let id = scalar_string(obj, "id")?;
        let recipient = normalize_address(&scalar_string(obj, self.recipient_column)?);
        let actor = normalize_address(&scalar_string(obj, self.actor_column)?);
        let mut target_id = scalar_string(obj, self.target_column)?;
        if self.target_type == TargetType::Profile {
            target_id = normalize_address(&target_id);
        }

        let created_at = timestamp(obj, "created_at")?
            .ok_or_else(|| AppError::InvalidRow(format!("{}: missing created_at", self.table)))?;
        let read_at = timestamp(obj, "read_at")?;
        let is_read = obj.get("is_read").and_then(Value::as_bool).unwrap_or(false);

        let payload = self
            .payload_columns
            .iter()
            .filter_map(|column| obj.get(*column).map(|v| (column.to_string(), v.clone())))
            .collect::<Map<String, Value>>();

        Ok(RawEvent {
            id,
            recipient,
            actor,
            target_id,
            created_at,
            is_read,
            read_at,
            payload: Value::Object(payload),
        })
    }
}

fn scalar_string(obj: &Map<String, Value>, column: &str) -> Result<String> {
    match obj.get(column) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(AppError::InvalidRow(format!("missing column {}", column))),
    }
}

fn timestamp(obj: &Map<String, Value>, column: &str) -> Result<Option<DateTime<Utc>>> {
    match obj.get(column) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value::<DateTime<Utc>>(value.clone())
            .map(Some)
            .map_err(|e| AppError::InvalidRow(format!("{}: {}", column, e))),
    }
}

/// 按接收者列过滤
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecipientFilter {
    pub column: &'static str,
    pub value: String,
}

impl RecipientFilter {
    pub fn matches(&self, row: &Value) -> bool {
        row.get(self.column)
            .and_then(Value::as_str)
            .map(|v| normalize_address(v) == self.value)
            .unwrap_or(false)
    }
}

/// 规范化后、补全前的活动行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub id: String,
    pub recipient: String,
    pub actor: String,
    pub target_id: String,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub payload: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// 变更流中的一条行变更
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowChange {
    pub kind: ChangeKind,
    pub row: Value,
}

impl RowChange {
    pub fn new(kind: ChangeKind, row: Value) -> Self {
        Self { kind, row }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_follow_row_uses_followee_column() {
        let schema = NotificationSource::Follow.schema();
        let row = json!({
            "id": 7,
            "followee_addr": "0xABC",
            "follower_addr": "0xDEF",
            "created_at": "2024-05-01T10:00:00Z",
            "is_read": false,
            "read_at": null
        });

        let event = schema.parse_row(&row).unwrap();
        assert_eq!(event.id, "7");
        assert_eq!(event.recipient, "0xabc");
        assert_eq!(event.actor, "0xdef");
        assert_eq!(event.target_id, "0xdef");
        assert!(!event.is_read);
        assert!(event.read_at.is_none());
    }

    #[test]
    fn test_purchase_row_keeps_payload_columns() {
        let schema = NotificationSource::VideoPurchase.schema();
        let row = json!({
            "id": "p1",
            "creator_addr": "0xabc",
            "buyer_addr": "0x123",
            "video_id": "v9",
            "price": 12.5,
            "created_at": "2024-05-01T10:00:00Z"
        });

        let event = schema.parse_row(&row).unwrap();
        assert_eq!(event.target_id, "v9");
        assert_eq!(event.payload["price"], json!(12.5));
        assert!(event.payload.get("tx_hash").is_none());
    }

    #[test]
    fn test_row_without_recipient_is_rejected() {
        let schema = NotificationSource::VideoLike.schema();
        let row = json!({
            "id": "1",
            "recipient_addr": "0xabc",
            "liker_addr": "0x1",
            "video_id": "v1",
            "created_at": "2024-05-01T10:00:00Z"
        });

        assert!(matches!(schema.parse_row(&row), Err(AppError::InvalidRow(_))));
    }

    #[test]
    fn test_recipient_filter_is_case_insensitive() {
        let filter = NotificationSource::VideoComment.schema().recipient_filter("0xAbC");
        assert_eq!(filter.column, "creator_addr");
        assert!(filter.matches(&json!({ "creator_addr": "0xABC" })));
        assert!(!filter.matches(&json!({ "recipient_addr": "0xabc" })));
    }

    #[test]
    fn test_every_source_has_distinct_table() {
        let mut tables: Vec<_> = NotificationSource::ALL.iter().map(|s| s.table()).collect();
        tables.sort();
        tables.dedup();
        assert_eq!(tables.len(), NotificationSource::ALL.len());
    }
}
