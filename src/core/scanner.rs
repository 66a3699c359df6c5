//! 远程文件夹树的递归扫描与统计

use crate::error::StoreResult;
use crate::storage::{RemoteEntry, RemoteStore};
use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 最大文件列表的长度
pub const LARGEST_FILES_LIMIT: usize = 10;

/// 列出文件夹的全部直接子项（自动翻页）
pub async fn list_children_all(
    store: &dyn RemoteStore,
    folder_id: &str,
) -> StoreResult<Vec<RemoteEntry>> {
    let mut entries = Vec::new();
    let mut page_token: Option<String> = None;

    loop {
        let page = store.list_children(folder_id, page_token.as_deref()).await?;
        entries.extend(page.entries);

        match page.next_page_token {
            Some(token) => page_token = Some(token),
            None => break,
        }
    }

    Ok(entries)
}

/// 扫描过滤配置
#[derive(Debug, Clone, Default)]
pub struct ScanConfig {
    /// 排除规则（glob patterns，匹配名称或相对路径）
    pub exclude_patterns: Vec<String>,
    /// 跳过 macOS 的 `._` 资源分叉文件
    pub skip_resource_forks: bool,
}

impl ScanConfig {
    /// 检查条目是否应该被排除
    pub fn should_exclude(&self, path: &str, name: &str) -> bool {
        if self.skip_resource_forks && name.starts_with("._") {
            return true;
        }

        self.exclude_patterns
            .iter()
            .any(|pattern| matches_pattern(path, pattern))
    }

    /// 过滤一个列表结果
    pub fn filter(&self, parent_path: &str, entries: Vec<RemoteEntry>) -> Vec<RemoteEntry> {
        if self.exclude_patterns.is_empty() && !self.skip_resource_forks {
            return entries;
        }

        entries
            .into_iter()
            .filter(|e| {
                let path = join_path(parent_path, &e.name);
                let excluded = self.should_exclude(&path, &e.name);
                if excluded {
                    debug!("排除: {}", path);
                }
                !excluded
            })
            .collect()
    }
}

/// 简单的 glob 模式匹配（不区分大小写）
pub fn matches_pattern(path: &str, pattern: &str) -> bool {
    let path = path.to_lowercase();
    let pattern = pattern.to_lowercase();

    // 处理 ** 通配符
    if pattern.contains("**") {
        let parts: Vec<&str> = pattern.split("**").collect();
        if parts.len() == 2 {
            let prefix = parts[0].trim_end_matches('/');
            let suffix = parts[1].trim_start_matches('/');

            if prefix.is_empty() && suffix.is_empty() {
                return true;
            }

            if !prefix.is_empty() && !path.starts_with(prefix) {
                return false;
            }

            if !suffix.is_empty() && !path.ends_with(suffix) {
                return false;
            }

            return true;
        }
    }

    // 处理 * 通配符，只比较最后一段名称
    if pattern.contains('*') {
        let regex_pattern = regex::escape(&pattern).replace("\\*", ".*");
        let name = path.rsplit('/').next().unwrap_or(&path);

        if let Ok(re) = regex::Regex::new(&format!("^{}$", regex_pattern)) {
            return re.is_match(name) || re.is_match(&path);
        }
    }

    // 精确匹配
    path == pattern || path.ends_with(&format!("/{}", pattern))
}

/// 拼接显示路径，空父路径时只返回名称
pub fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

/// 小写扩展名，没有 `.` 时为 `none`
pub fn extension_of(name: &str) -> String {
    match name.rfind('.') {
        Some(pos) => name[pos + 1..].to_lowercase(),
        None => "none".to_string(),
    }
}

/// 文件索引条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRecord {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub checksum: Option<String>,
    pub parent_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LargestFile {
    pub path: String,
    pub size: u64,
}

/// 扫描统计
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanStats {
    pub total_folders: u64,
    pub total_files: u64,
    pub total_size_bytes: u64,
    pub extension_counts: HashMap<String, u64>,
    /// 按大小降序，最多 10 个
    pub largest_files: Vec<LargestFile>,
    /// 相对路径 -> 文件
    pub file_index: HashMap<String, FileRecord>,
    /// 相对路径 -> 直接子文件大小之和
    pub folder_sizes: HashMap<String, u64>,
    /// 列表失败、按空文件夹计入的路径
    pub failed_folders: Vec<String>,
}

impl ScanStats {
    fn record_file(&mut self, parent_path: &str, entry: &RemoteEntry) {
        let path = join_path(parent_path, &entry.name);

        self.total_files += 1;
        self.total_size_bytes += entry.size;
        *self
            .extension_counts
            .entry(extension_of(&entry.name))
            .or_insert(0) += 1;
        self.push_largest(&path, entry.size);

        self.file_index.insert(
            path,
            FileRecord {
                id: entry.id.clone(),
                name: entry.name.clone(),
                size: entry.size,
                checksum: entry.checksum.clone(),
                parent_path: parent_path.to_string(),
            },
        );
    }

    fn push_largest(&mut self, path: &str, size: u64) {
        if self.largest_files.len() == LARGEST_FILES_LIMIT
            && self.largest_files.last().map_or(false, |f| f.size >= size)
        {
            return;
        }

        // 同样大小时先到者在前
        let pos = self.largest_files.partition_point(|f| f.size >= size);
        self.largest_files.insert(
            pos,
            LargestFile {
                path: path.to_string(),
                size,
            },
        );
        self.largest_files.truncate(LARGEST_FILES_LIMIT);
    }

    /// 扩展名按数量降序（同数量按名称）
    pub fn top_extensions(&self, limit: usize) -> Vec<(String, u64)> {
        let mut list: Vec<(String, u64)> = self
            .extension_counts
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        list.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        list.truncate(limit);
        list
    }
}

/// 远程文件夹树扫描器（只读）
pub struct TreeScanner {
    store: Arc<dyn RemoteStore>,
    config: ScanConfig,
    cancel: Option<CancellationToken>,
}

impl TreeScanner {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self {
            store,
            config: ScanConfig::default(),
            cancel: None,
        }
    }

    pub fn with_config(mut self, config: ScanConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// 检查是否已取消
    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|c| c.is_cancelled())
            .unwrap_or(false)
    }

    /// 递归扫描。`max_depth` 为 Some(n) 时第 n 层仍会被列出，但不再向下
    pub async fn scan(
        &self,
        folder_id: &str,
        display_path: &str,
        max_depth: Option<usize>,
    ) -> ScanStats {
        info!(
            "开始扫描: {} ({}), max_depth={:?}",
            display_path,
            self.store.name(),
            max_depth
        );

        let mut stats = ScanStats::default();
        self.scan_folder(folder_id, display_path, 0, max_depth, &mut stats)
            .await;

        info!(
            "扫描完成: {} 个文件, {} 个文件夹, {} 字节, {} 个文件夹列表失败",
            stats.total_files,
            stats.total_folders,
            stats.total_size_bytes,
            stats.failed_folders.len()
        );
        stats
    }

    fn scan_folder<'a>(
        &'a self,
        folder_id: &'a str,
        path: &'a str,
        depth: usize,
        max_depth: Option<usize>,
        stats: &'a mut ScanStats,
    ) -> BoxFuture<'a, ()> {
        async move {
            if self.is_cancelled() {
                return;
            }

            let children = match list_children_all(self.store.as_ref(), folder_id).await {
                Ok(children) => self.config.filter(path, children),
                Err(e) => {
                    warn!("列出文件夹失败，按空文件夹处理: {} ({})", path, e);
                    stats.failed_folders.push(path.to_string());
                    Vec::new()
                }
            };

            let (folders, files): (Vec<_>, Vec<_>) =
                children.into_iter().partition(|e| e.is_folder());

            let mut direct_size = 0u64;
            for file in &files {
                direct_size += file.size;
                stats.record_file(path, file);
            }
            stats.folder_sizes.insert(path.to_string(), direct_size);
            stats.total_folders += folders.len() as u64;

            if max_depth.map_or(false, |max| depth >= max) {
                debug!("到达深度上限 {}: {}", depth, path);
                return;
            }

            for folder in &folders {
                let child_path = join_path(path, &folder.name);
                self.scan_folder(&folder.id, &child_path, depth + 1, max_depth, stats)
                    .await;
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FaultKind, MemoryStore, StoreOp};

    fn tree() -> Arc<MemoryStore> {
        // root/
        //   a.txt (3)
        //   photos/
        //     b.JPG (10)
        //     2024/
        //       c.jpg (5)
        //   README (1)
        let store = Arc::new(MemoryStore::with_page_size(2));
        let root = store.root().to_string();
        store.add_file(&root, "a.txt", "abc");
        let photos = store.add_folder(&root, "photos");
        store.add_file(&photos, "b.JPG", vec![0u8; 10]);
        let y2024 = store.add_folder(&photos, "2024");
        store.add_file(&y2024, "c.jpg", vec![0u8; 5]);
        store.add_file(&root, "README", "r");
        store
    }

    #[tokio::test]
    async fn test_list_children_all_exhausts_pages() {
        let store = Arc::new(MemoryStore::with_page_size(3));
        let root = store.root().to_string();
        for i in 0..7 {
            store.add_file(&root, &format!("f{}", i), "x");
        }

        let entries = list_children_all(&*store, &root).await.unwrap();
        assert_eq!(entries.len(), 7);
        assert_eq!(store.calls(StoreOp::List), 3);
    }

    #[tokio::test]
    async fn test_scan_aggregates() {
        let store = tree();
        let scanner = TreeScanner::new(store.clone());
        let stats = scanner.scan(store.root(), "", None).await;

        assert_eq!(stats.total_files, 4);
        assert_eq!(stats.total_folders, 2);
        assert_eq!(stats.total_size_bytes, 19);
        assert_eq!(stats.extension_counts["jpg"], 2);
        assert_eq!(stats.extension_counts["txt"], 1);
        assert_eq!(stats.extension_counts["none"], 1);

        assert!(stats.file_index.contains_key("a.txt"));
        let c = &stats.file_index["photos/2024/c.jpg"];
        assert_eq!(c.parent_path, "photos/2024");
        assert_eq!(stats.folder_sizes[""], 4);
        assert_eq!(stats.folder_sizes["photos"], 10);

        assert_eq!(stats.largest_files[0].path, "photos/b.JPG");
        assert_eq!(stats.largest_files[1].size, 5);
    }

    #[tokio::test]
    async fn test_depth_limit_still_enumerates_last_level() {
        let store = tree();
        let scanner = TreeScanner::new(store.clone());

        let stats = scanner.scan(store.root(), "Root", Some(0)).await;
        assert_eq!(stats.total_files, 2);
        assert_eq!(stats.total_folders, 1);
        assert!(stats.file_index.contains_key("Root/a.txt"));

        let stats = scanner.scan(store.root(), "Root", Some(1)).await;
        assert_eq!(stats.total_files, 3);
        assert_eq!(stats.total_folders, 2);
        assert!(!stats.file_index.contains_key("Root/photos/2024/c.jpg"));
    }

    #[tokio::test]
    async fn test_largest_files_bounded() {
        let store = Arc::new(MemoryStore::new());
        let root = store.root().to_string();
        for i in 1..=15usize {
            store.add_file(&root, &format!("f{:02}.bin", i), vec![0u8; i * 10]);
        }

        let stats = TreeScanner::new(store.clone()).scan(&root, "", None).await;
        assert_eq!(stats.largest_files.len(), LARGEST_FILES_LIMIT);
        assert_eq!(stats.largest_files[0].size, 150);
        assert_eq!(stats.largest_files[9].size, 60);
        assert!(stats
            .largest_files
            .windows(2)
            .all(|w| w[0].size >= w[1].size));
    }

    #[tokio::test]
    async fn test_listing_failure_counts_as_empty() {
        let store = tree();
        let photos = store.find_child(store.root(), "photos").unwrap().id;
        store.inject_for(StoreOp::List, &photos, FaultKind::PermissionDenied, 1);

        let stats = TreeScanner::new(store.clone())
            .scan(store.root(), "", None)
            .await;
        assert_eq!(stats.total_files, 2);
        assert_eq!(stats.failed_folders, vec!["photos".to_string()]);
        assert_eq!(stats.folder_sizes["photos"], 0);
    }

    #[tokio::test]
    async fn test_exclusions() {
        let store = Arc::new(MemoryStore::new());
        let root = store.root().to_string();
        store.add_file(&root, "._a.txt", "x");
        store.add_file(&root, "a.txt", "x");
        store.add_file(&root, "scratch.tmp", "x");
        store.add_file(&root, "Thumbs.db", "x");

        let config = ScanConfig {
            exclude_patterns: vec!["*.tmp".to_string(), "thumbs.db".to_string()],
            skip_resource_forks: true,
        };
        let stats = TreeScanner::new(store.clone())
            .with_config(config)
            .scan(&root, "", None)
            .await;
        assert_eq!(stats.total_files, 1);
        assert!(stats.file_index.contains_key("a.txt"));
    }

    #[test]
    fn test_helpers() {
        assert_eq!(extension_of("Photo.JPEG"), "jpeg");
        assert_eq!(extension_of("archive.tar.gz"), "gz");
        assert_eq!(extension_of("Makefile"), "none");
        assert_eq!(join_path("", "a"), "a");
        assert_eq!(join_path("x/y", "a"), "x/y/a");
        assert!(matches_pattern("node_modules/x.js", "node_modules/**"));
        assert!(matches_pattern("dir/file.TMP", "*.tmp"));
        assert!(!matches_pattern("dir/file.txt", "*.tmp"));
    }
}
