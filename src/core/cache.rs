//! 目标端存在性缓存
//!
//! 按父文件夹缓存其子项列表，避免每个文件都去远端查询一次。
//! 只在一次复制运行内有效，不落盘。

use crate::core::scanner::list_children_all;
use crate::error::StoreResult;
use crate::storage::{RemoteEntry, RemoteStore};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// 同一父文件夹下按名称分组的子项（允许重名）
type NameIndex = HashMap<String, Vec<RemoteEntry>>;

pub struct ExistenceCache {
    store: Arc<dyn RemoteStore>,
    folders: HashMap<String, NameIndex>,
}

impl ExistenceCache {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self {
            store,
            folders: HashMap::new(),
        }
    }

    /// 查找同名文件（非文件夹）
    pub async fn lookup_file(
        &mut self,
        parent_id: &str,
        name: &str,
    ) -> StoreResult<Option<RemoteEntry>> {
        let index = self.index(parent_id).await?;
        Ok(index
            .get(name)
            .and_then(|entries| entries.iter().find(|e| !e.is_folder()))
            .cloned())
    }

    /// 查找同名文件夹
    pub async fn lookup_folder(
        &mut self,
        parent_id: &str,
        name: &str,
    ) -> StoreResult<Option<RemoteEntry>> {
        let index = self.index(parent_id).await?;
        Ok(index
            .get(name)
            .and_then(|entries| entries.iter().find(|e| e.is_folder()))
            .cloned())
    }

    /// 同名的全部文件夹
    pub async fn folders_named(
        &mut self,
        parent_id: &str,
        name: &str,
    ) -> StoreResult<Vec<RemoteEntry>> {
        let index = self.index(parent_id).await?;
        Ok(index
            .get(name)
            .map(|entries| entries.iter().filter(|e| e.is_folder()).cloned().collect())
            .unwrap_or_default())
    }

    /// 父文件夹内容发生变化后调用
    pub fn invalidate(&mut self, parent_id: &str) {
        if self.folders.remove(parent_id).is_some() {
            debug!("缓存失效: {}", parent_id);
        }
    }

    /// 标记一个（演练用的虚拟）文件夹为空，之后查询不会访问远端
    pub fn seed_empty(&mut self, folder_id: &str) {
        self.folders.insert(folder_id.to_string(), NameIndex::new());
    }

    pub fn is_cached(&self, parent_id: &str) -> bool {
        self.folders.contains_key(parent_id)
    }

    async fn index(&mut self, parent_id: &str) -> StoreResult<&NameIndex> {
        if !self.folders.contains_key(parent_id) {
            let entries = list_children_all(self.store.as_ref(), parent_id).await?;
            debug!("缓存文件夹 {} 的 {} 个子项", parent_id, entries.len());

            let mut index = NameIndex::new();
            for entry in entries {
                index.entry(entry.name.clone()).or_default().push(entry);
            }
            self.folders.insert(parent_id.to_string(), index);
        }

        Ok(self
            .folders
            .entry(parent_id.to_string())
            .or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FaultKind, MemoryStore, StoreOp};

    #[tokio::test]
    async fn test_lookup_lists_once_per_parent() {
        let store = Arc::new(MemoryStore::with_page_size(2));
        let root = store.root().to_string();
        store.add_file(&root, "a.txt", "aaa");
        store.add_folder(&root, "docs");
        store.add_file(&root, "b.txt", "b");

        let mut cache = ExistenceCache::new(store.clone());
        let a = cache.lookup_file(&root, "a.txt").await.unwrap().unwrap();
        assert_eq!(a.size, 3);
        assert!(cache.lookup_file(&root, "docs").await.unwrap().is_none());
        assert!(cache.lookup_folder(&root, "docs").await.unwrap().is_some());
        assert!(cache.lookup_file(&root, "missing").await.unwrap().is_none());

        // 3 个子项、每页 2 个 => 两次分页请求，之后全部命中缓存
        assert_eq!(store.calls(StoreOp::List), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_relist() {
        let store = Arc::new(MemoryStore::new());
        let root = store.root().to_string();
        let mut cache = ExistenceCache::new(store.clone());

        assert!(cache.lookup_file(&root, "late.txt").await.unwrap().is_none());
        store.add_file(&root, "late.txt", "x");
        assert!(cache.lookup_file(&root, "late.txt").await.unwrap().is_none());

        cache.invalidate(&root);
        assert!(cache.lookup_file(&root, "late.txt").await.unwrap().is_some());
        assert_eq!(store.calls(StoreOp::List), 2);
    }

    #[tokio::test]
    async fn test_seeded_folder_never_hits_store() {
        let store = Arc::new(MemoryStore::new());
        let mut cache = ExistenceCache::new(store.clone());

        cache.seed_empty("dry-run-1");
        assert!(cache.lookup_folder("dry-run-1", "x").await.unwrap().is_none());
        assert_eq!(store.calls(StoreOp::List), 0);
    }

    #[tokio::test]
    async fn test_listing_failure_is_returned_and_not_cached() {
        let store = Arc::new(MemoryStore::new());
        let root = store.root().to_string();
        store.inject(StoreOp::List, FaultKind::PermissionDenied, 1);

        let mut cache = ExistenceCache::new(store.clone());
        assert!(cache.lookup_file(&root, "a").await.is_err());
        assert!(!cache.is_cached(&root));
        assert!(cache.lookup_file(&root, "a").await.unwrap().is_none());
    }
}
