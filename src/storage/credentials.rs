//! 访问令牌提供者
//!
//! OAuth 授权与刷新由外部工具完成，这里只负责读取可用的 bearer token。

use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// 令牌环境变量名
pub const TOKEN_ENV: &str = "DRIVESYNC_ACCESS_TOKEN";

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// 返回当前有效的 access token
    async fn access_token(&self) -> StoreResult<String>;
}

/// 固定令牌
pub struct StaticToken {
    token: String,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// 从环境变量读取
    pub fn from_env() -> StoreResult<Self> {
        std::env::var(TOKEN_ENV)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .map(Self::new)
            .ok_or_else(|| StoreError::Auth(format!("未配置访问令牌，请设置 {}", TOKEN_ENV)))
    }
}

#[async_trait]
impl CredentialProvider for StaticToken {
    async fn access_token(&self) -> StoreResult<String> {
        if self.token.trim().is_empty() {
            return Err(StoreError::Auth("访问令牌为空".to_string()));
        }
        Ok(self.token.clone())
    }
}

#[derive(Debug, Deserialize)]
struct TokenRecord {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

/// 令牌文件，每次调用重新读取，便于外部刷新程序轮换令牌
pub struct TokenFile {
    path: PathBuf,
}

impl TokenFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl CredentialProvider for TokenFile {
    async fn access_token(&self) -> StoreResult<String> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            StoreError::Auth(format!("读取令牌文件失败 {:?}: {}", self.path, e))
        })?;

        let record: TokenRecord = serde_json::from_str(&content)
            .map_err(|e| StoreError::Auth(format!("令牌文件格式错误: {}", e)))?;

        record
            .access_token
            .or(record.token)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| StoreError::Auth("令牌文件中没有 token".to_string()))
    }
}
