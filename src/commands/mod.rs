//! 命令行子命令的实现

pub mod diff;
pub mod replicate;
pub mod report;
pub mod scan;

use crate::config::AppConfig;
use crate::core::RetryStore;
use crate::storage::{create_store, RemoteStore};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// 创建存储并套上限流重试
pub async fn open_store(
    config: &AppConfig,
    cancel: &CancellationToken,
) -> Result<Arc<dyn RemoteStore>> {
    let store = create_store(&config.store)
        .await
        .context("初始化存储失败")?;
    let policy = config.retry.to_policy().context("重试配置无效")?;
    let retry = RetryStore::new(store, policy).with_cancel(cancel.clone());
    Ok(Arc::new(retry))
}

/// 未指定名称时使用文件夹自身的名称
pub async fn folder_label(store: &dyn RemoteStore, folder_id: &str, name: Option<String>) -> Result<String> {
    if let Some(name) = name.filter(|n| !n.trim().is_empty()) {
        return Ok(name);
    }

    let entry = store
        .get_metadata(folder_id)
        .await
        .with_context(|| format!("无法读取文件夹 {}", folder_id))?;
    if entry.name.is_empty() {
        Ok(folder_id.to_string())
    } else {
        Ok(entry.name)
    }
}
