//! 远程存储错误类型

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    /// 远程存储配额耗尽，可重试
    #[error("请求被限流: {0}")]
    RateLimited(String),

    #[error("权限不足: {0}")]
    PermissionDenied(String),

    #[error("对象不存在: {0}")]
    NotFound(String),

    #[error("认证失败: {0}")]
    Auth(String),

    #[error("HTTP 错误: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("存储后端错误: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, StoreError::RateLimited(_))
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, StoreError::PermissionDenied(_))
    }
}

impl From<opendal::Error> for StoreError {
    fn from(e: opendal::Error) -> Self {
        match e.kind() {
            opendal::ErrorKind::RateLimited => StoreError::RateLimited(e.to_string()),
            opendal::ErrorKind::PermissionDenied => StoreError::PermissionDenied(e.to_string()),
            opendal::ErrorKind::NotFound => StoreError::NotFound(e.to_string()),
            _ => StoreError::Backend(e.to_string()),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
