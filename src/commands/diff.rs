use super::scan::scan_folder;
use crate::core::{diff, DiffResult, ScanConfig};
use crate::storage::RemoteStore;
use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// 比较结果及两侧标签
pub struct DiffOutput {
    pub label_a: String,
    pub label_b: String,
    pub result: DiffResult,
}

/// 扫描两个文件夹并比较。两侧都以相对路径为键，根文件夹名称不同也能对齐
pub async fn diff_folders(
    store: Arc<dyn RemoteStore>,
    scan: ScanConfig,
    folder_a: &str,
    folder_b: &str,
    max_depth: Option<usize>,
    cancel: &CancellationToken,
) -> Result<DiffOutput> {
    let (label_a, stats_a) =
        scan_folder(store.clone(), scan.clone(), folder_a, None, max_depth, cancel).await?;
    let (label_b, stats_b) =
        scan_folder(store, scan, folder_b, None, max_depth, cancel).await?;

    Ok(DiffOutput {
        label_a,
        label_b,
        result: diff(&stats_a, &stats_b),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[tokio::test]
    async fn test_differently_named_roots_align() {
        let store = Arc::new(MemoryStore::new());
        let a = store.add_folder(store.root(), "Original");
        let b = store.add_folder(store.root(), "Backup");
        for folder in [&a, &b] {
            store.add_file(folder, "same.txt", "hello");
            let sub = store.add_folder(folder, "sub");
            store.add_file(&sub, "deep.txt", "x");
        }
        store.add_file(&a, "extra.bin", "zz");

        let out = diff_folders(
            store.clone(),
            ScanConfig::default(),
            &a,
            &b,
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(out.label_a, "Original");
        assert_eq!(out.label_b, "Backup");
        assert_eq!(out.result.identical.len(), 2);
        assert_eq!(out.result.only_in_a.len(), 1);
        assert!(out.result.only_in_b.is_empty());
    }
}
