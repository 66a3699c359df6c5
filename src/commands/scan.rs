use super::folder_label;
use crate::core::{ScanConfig, ScanStats, TreeScanner};
use crate::storage::RemoteStore;
use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// 扫描一个文件夹树，返回标签和统计
pub async fn scan_folder(
    store: Arc<dyn RemoteStore>,
    scan: ScanConfig,
    folder_id: &str,
    name: Option<String>,
    max_depth: Option<usize>,
    cancel: &CancellationToken,
) -> Result<(String, ScanStats)> {
    let label = folder_label(store.as_ref(), folder_id, name).await?;
    info!("扫描文件夹: {} ({})", label, folder_id);

    // 以空路径为根，索引中的键都是相对路径
    let stats = TreeScanner::new(store)
        .with_config(scan)
        .with_cancel(cancel.clone())
        .scan(folder_id, "", max_depth)
        .await;

    Ok((label, stats))
}
