use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Store error: {0}")]
    Store(String),

    #[error("Invalid row: {0}")]
    InvalidRow(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Feed session closed")]
    SessionClosed,
}

// 便利函数，用于创建常见错误
impl AppError {
    pub fn store(msg: &str) -> Self {
        Self::Store(msg.to_string())
    }

    pub fn invalid_row(msg: &str) -> Self {
        Self::InvalidRow(msg.to_string())
    }

    pub fn not_found(resource: &str) -> Self {
        Self::NotFound(format!("{} not found", resource))
    }

    pub fn config(msg: impl std::fmt::Display) -> Self {
        Self::Config(msg.to_string())
    }
}

// 从其他错误类型转换
impl<T> From<tokio::sync::mpsc::error::SendError<T>> for AppError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        AppError::SessionClosed
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for AppError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        AppError::SessionClosed
    }
}
