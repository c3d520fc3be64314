pub mod content;
pub mod notification;
pub mod source;

pub use content::{Profile, VideoComment};
pub use notification::{
    FeedSnapshot, Notification, NotificationKey, NotificationStatus, NotificationType, TargetType,
};
pub use source::{ChangeKind, NotificationSource, RawEvent, RecipientFilter, RowChange, SourceSchema};
