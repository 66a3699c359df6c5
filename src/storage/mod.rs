pub mod credentials;
pub mod drive;
pub mod memory;
pub mod operator;

use crate::error::StoreResult;
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use credentials::{CredentialProvider, StaticToken, TokenFile};
pub use drive::DriveStore;
pub use memory::{FaultKind, MemoryStore, StoreOp};
pub use operator::OpendalStore;

// ============ 公共常量 ============

/// 文件夹的保留 MIME 类型
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
/// 未知类型文件的默认 MIME
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// 非 IO 操作超时（秒）- list, create, delete 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- download, upload 等
pub const IO_TIMEOUT_SECS: u64 = 300;

/// 远程条目（列表时的快照）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    pub checksum: Option<String>,
}

impl RemoteEntry {
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }
}

/// 一页列表结果
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub entries: Vec<RemoteEntry>,
    /// 为 None 表示没有更多页
    pub next_page_token: Option<String>,
}

/// 远程文件存储接口（基于 ID）
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// 列出文件夹的直接子项（分页）
    async fn list_children(&self, folder_id: &str, page_token: Option<&str>)
        -> StoreResult<ListPage>;

    /// 创建文件夹，返回新 ID
    async fn create_folder(&self, name: &str, parent_id: &str) -> StoreResult<String>;

    /// 服务端复制文件，返回新 ID
    async fn copy_file(&self, file_id: &str, new_name: &str, parent_id: &str)
        -> StoreResult<String>;

    async fn delete_file(&self, id: &str) -> StoreResult<()>;

    /// 下载整个文件内容
    async fn download_file(&self, id: &str) -> StoreResult<Bytes>;

    /// 上传新文件，返回新 ID
    async fn upload_file(
        &self,
        name: &str,
        parent_id: &str,
        data: Bytes,
        mime_type: &str,
    ) -> StoreResult<String>;

    async fn get_metadata(&self, id: &str) -> StoreResult<RemoteEntry>;

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 根据配置创建存储实例
pub async fn create_store(config: &crate::config::StoreConfig) -> Result<Arc<dyn RemoteStore>> {
    use crate::config::StoreConfig;

    match config {
        StoreConfig::Drive {
            access_token,
            token_file,
            drive_id,
            endpoint,
        } => {
            let credentials: Arc<dyn CredentialProvider> = match (access_token, token_file) {
                (_, Some(path)) => Arc::new(TokenFile::new(path)),
                (Some(token), None) => Arc::new(StaticToken::new(token.clone())),
                (None, None) => Arc::new(StaticToken::from_env()?),
            };
            tracing::info!("初始化 Drive 存储: shared_drive={:?}", drive_id);
            Ok(Arc::new(DriveStore::new(
                credentials,
                drive_id.clone(),
                endpoint.clone(),
            )?) as Arc<dyn RemoteStore>)
        }
        StoreConfig::Fs { root } => {
            tracing::info!("初始化本地存储: {}", root);
            Ok(Arc::new(OpendalStore::fs(root)?) as Arc<dyn RemoteStore>)
        }
        StoreConfig::S3 {
            bucket,
            region,
            access_key,
            secret_key,
            endpoint,
            prefix,
        } => {
            tracing::info!("初始化S3存储: bucket={}, region={}", bucket, region);
            Ok(Arc::new(OpendalStore::s3(
                bucket,
                region,
                access_key,
                secret_key,
                endpoint.clone(),
                prefix.clone(),
            )?) as Arc<dyn RemoteStore>)
        }
        StoreConfig::Webdav {
            endpoint,
            username,
            password,
            root,
        } => {
            tracing::info!("创建WebDAV存储: endpoint={}, root={:?}", endpoint, root);
            Ok(
                Arc::new(OpendalStore::webdav(endpoint, username, password, root.clone()).await?)
                    as Arc<dyn RemoteStore>,
            )
        }
    }
}
