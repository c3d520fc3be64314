//! 统一活动通知流
//!
//! 各类型独立活动表中的行由 [`services::SourceConnector`] 规范化，
//! 经 [`services::Aggregator`] 补全并生成文案，再由 [`services::FeedStore`]
//! actor 按接收者实时维护。

pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod state;
pub mod utils;

pub use config::FeedConfig;
pub use error::{AppError, Result};
pub use models::{FeedSnapshot, Notification, NotificationKey, NotificationSource};
pub use services::{FeedHandle, FeedStore};
pub use state::{AppState, Collaborators};
