use thiserror::Error;

/// APM 统一错误类型
#[derive(Error, Debug)]
pub enum ApmError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Forward error: {0}")]
    Forward(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Policy error: {0}")]
    Policy(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Queue full: {0}")]
    QueueFull(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, ApmError>;

impl From<anyhow::Error> for ApmError {
    fn from(err: anyhow::Error) -> Self {
        ApmError::Internal(err.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for ApmError {
    fn from(err: tokio::sync::mpsc::error::SendError<T>) -> Self {
        ApmError::Transport(err.to_string())
    }
}

impl ApmError {
    /// 瞬时 I/O 错误：本轮放弃，由下一个周期隐式重试
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ApmError::Storage(_) | ApmError::Forward(_) | ApmError::Transport(_) | ApmError::Io(_)
        )
    }
}
