//! 内存存储
//!
//! 进程内的 RemoteStore 实现：支持分页大小、故障注入和调用计数，供测试使用。

use super::{ListPage, RemoteEntry, RemoteStore, DEFAULT_MIME_TYPE, FOLDER_MIME_TYPE};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// 根文件夹 ID
pub const ROOT_ID: &str = "root";

/// 存储操作类型（用于故障注入与计数）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    List,
    CreateFolder,
    Copy,
    Delete,
    Download,
    Upload,
    Metadata,
}

/// 注入的故障
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    RateLimited,
    PermissionDenied,
    NotFound,
    /// 操作在服务端生效，但响应报告限流
    PhantomRateLimited,
}

impl FaultKind {
    fn to_error(self, op: StoreOp) -> StoreError {
        let msg = format!("injected {:?}", op);
        match self {
            FaultKind::RateLimited | FaultKind::PhantomRateLimited => StoreError::RateLimited(msg),
            FaultKind::PermissionDenied => StoreError::PermissionDenied(msg),
            FaultKind::NotFound => StoreError::NotFound(msg),
        }
    }
}

struct Node {
    entry: RemoteEntry,
    parent: Option<String>,
    children: Vec<String>,
    data: Bytes,
}

#[derive(Default)]
struct State {
    nodes: HashMap<String, Node>,
    faults: HashMap<StoreOp, VecDeque<FaultKind>>,
    /// 只对指定名称生效的故障
    name_faults: HashMap<(StoreOp, String), VecDeque<FaultKind>>,
    calls: HashMap<StoreOp, usize>,
}

pub struct MemoryStore {
    name: String,
    page_size: usize,
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_page_size(100)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        let mut state = State::default();
        state.nodes.insert(
            ROOT_ID.to_string(),
            Node {
                entry: RemoteEntry {
                    id: ROOT_ID.to_string(),
                    name: String::new(),
                    mime_type: FOLDER_MIME_TYPE.to_string(),
                    size: 0,
                    checksum: None,
                },
                parent: None,
                children: Vec::new(),
                data: Bytes::new(),
            },
        );

        Self {
            name: "memory".to_string(),
            page_size: page_size.max(1),
            state: Mutex::new(state),
        }
    }

    pub fn root(&self) -> &str {
        ROOT_ID
    }

    /// 计算内容校验和（BLAKE3 前 32 个十六进制字符）
    fn checksum(data: &[u8]) -> String {
        blake3::hash(data).to_hex()[..32].to_string()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn insert(state: &mut State, parent_id: &str, entry: RemoteEntry, data: Bytes) -> StoreResult<String> {
        let parent = state
            .nodes
            .get_mut(parent_id)
            .filter(|n| n.entry.is_folder())
            .ok_or_else(|| StoreError::NotFound(format!("文件夹不存在: {}", parent_id)))?;
        parent.children.push(entry.id.clone());

        let id = entry.id.clone();
        state.nodes.insert(
            id.clone(),
            Node {
                entry,
                parent: Some(parent_id.to_string()),
                children: Vec::new(),
                data,
            },
        );
        Ok(id)
    }

    fn new_file_entry(name: &str, data: &[u8], mime_type: &str) -> RemoteEntry {
        RemoteEntry {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            mime_type: mime_type.to_string(),
            size: data.len() as u64,
            checksum: Some(Self::checksum(data)),
        }
    }

    fn new_folder_entry(name: &str) -> RemoteEntry {
        RemoteEntry {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            mime_type: FOLDER_MIME_TYPE.to_string(),
            size: 0,
            checksum: None,
        }
    }

    /// 记录调用并取出待触发的故障
    fn enter(&self, state: &mut State, op: StoreOp, name: Option<&str>) -> Option<FaultKind> {
        *state.calls.entry(op).or_insert(0) += 1;

        if let Some(name) = name {
            if let Some(queue) = state.name_faults.get_mut(&(op, name.to_string())) {
                if let Some(fault) = queue.pop_front() {
                    return Some(fault);
                }
            }
        }
        state.faults.get_mut(&op).and_then(|q| q.pop_front())
    }

    // ============ 测试辅助 ============

    pub fn add_folder(&self, parent_id: &str, name: &str) -> String {
        let mut state = self.lock();
        Self::insert(&mut state, parent_id, Self::new_folder_entry(name), Bytes::new())
            .unwrap_or_else(|e| panic!("add_folder: {}", e))
    }

    pub fn add_file(&self, parent_id: &str, name: &str, data: impl Into<Bytes>) -> String {
        self.add_file_with_mime(parent_id, name, data, DEFAULT_MIME_TYPE)
    }

    pub fn add_file_with_mime(
        &self,
        parent_id: &str,
        name: &str,
        data: impl Into<Bytes>,
        mime_type: &str,
    ) -> String {
        let data = data.into();
        let mut state = self.lock();
        let entry = Self::new_file_entry(name, &data, mime_type);
        Self::insert(&mut state, parent_id, entry, data)
            .unwrap_or_else(|e| panic!("add_file: {}", e))
    }

    /// 替换文件内容（ID 不变）
    pub fn set_content(&self, id: &str, data: impl Into<Bytes>) {
        let data = data.into();
        let mut state = self.lock();
        if let Some(node) = state.nodes.get_mut(id) {
            node.entry.size = data.len() as u64;
            node.entry.checksum = Some(Self::checksum(&data));
            node.data = data;
        }
    }

    /// 直接子项（不分页，不计数）
    pub fn children(&self, folder_id: &str) -> Vec<RemoteEntry> {
        let state = self.lock();
        state
            .nodes
            .get(folder_id)
            .map(|n| {
                n.children
                    .iter()
                    .filter_map(|id| state.nodes.get(id))
                    .map(|c| c.entry.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn find_child(&self, folder_id: &str, name: &str) -> Option<RemoteEntry> {
        self.children(folder_id).into_iter().find(|e| e.name == name)
    }

    pub fn content(&self, id: &str) -> Option<Bytes> {
        self.lock().nodes.get(id).map(|n| n.data.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().nodes.contains_key(id)
    }

    /// 让某个操作接下来的 `times` 次调用失败
    pub fn inject(&self, op: StoreOp, fault: FaultKind, times: usize) {
        let mut state = self.lock();
        let queue = state.faults.entry(op).or_default();
        queue.extend(std::iter::repeat(fault).take(times));
    }

    /// 只对指定名称（新建名/文件名）的调用注入故障
    pub fn inject_for(&self, op: StoreOp, name: &str, fault: FaultKind, times: usize) {
        let mut state = self.lock();
        let queue = state.name_faults.entry((op, name.to_string())).or_default();
        queue.extend(std::iter::repeat(fault).take(times));
    }

    pub fn calls(&self, op: StoreOp) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn reset_calls(&self) {
        self.lock().calls.clear();
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn list_children(
        &self,
        folder_id: &str,
        page_token: Option<&str>,
    ) -> StoreResult<ListPage> {
        let mut state = self.lock();
        if let Some(fault) = self.enter(&mut state, StoreOp::List, Some(folder_id)) {
            return Err(fault.to_error(StoreOp::List));
        }

        let folder = state
            .nodes
            .get(folder_id)
            .filter(|n| n.entry.is_folder())
            .ok_or_else(|| StoreError::NotFound(format!("文件夹不存在: {}", folder_id)))?;

        let offset = match page_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| StoreError::Backend(format!("无效的分页令牌: {}", token)))?,
            None => 0,
        };

        let end = (offset + self.page_size).min(folder.children.len());
        let entries = folder.children[offset.min(end)..end]
            .iter()
            .filter_map(|id| state.nodes.get(id))
            .map(|n| n.entry.clone())
            .collect();

        Ok(ListPage {
            entries,
            next_page_token: (end < folder.children.len()).then(|| end.to_string()),
        })
    }

    async fn create_folder(&self, name: &str, parent_id: &str) -> StoreResult<String> {
        let mut state = self.lock();
        let fault = self.enter(&mut state, StoreOp::CreateFolder, Some(name));
        match fault {
            Some(FaultKind::PhantomRateLimited) => {
                Self::insert(&mut state, parent_id, Self::new_folder_entry(name), Bytes::new())?;
                Err(StoreError::RateLimited("injected CreateFolder".to_string()))
            }
            Some(f) => Err(f.to_error(StoreOp::CreateFolder)),
            None => Self::insert(&mut state, parent_id, Self::new_folder_entry(name), Bytes::new()),
        }
    }

    async fn copy_file(&self, file_id: &str, new_name: &str, parent_id: &str) -> StoreResult<String> {
        let mut state = self.lock();
        let fault = self.enter(&mut state, StoreOp::Copy, Some(new_name));
        if let Some(f) = fault.filter(|f| *f != FaultKind::PhantomRateLimited) {
            return Err(f.to_error(StoreOp::Copy));
        }

        let source = state
            .nodes
            .get(file_id)
            .filter(|n| !n.entry.is_folder())
            .ok_or_else(|| StoreError::NotFound(format!("文件不存在: {}", file_id)))?;
        let data = source.data.clone();
        let entry = Self::new_file_entry(new_name, &data, &source.entry.mime_type);
        let id = Self::insert(&mut state, parent_id, entry, data)?;

        match fault {
            Some(FaultKind::PhantomRateLimited) => {
                Err(StoreError::RateLimited("injected Copy".to_string()))
            }
            _ => Ok(id),
        }
    }

    async fn delete_file(&self, id: &str) -> StoreResult<()> {
        let mut state = self.lock();
        if let Some(fault) = self.enter(&mut state, StoreOp::Delete, None) {
            return Err(fault.to_error(StoreOp::Delete));
        }

        let node = state
            .nodes
            .remove(id)
            .ok_or_else(|| StoreError::NotFound(format!("对象不存在: {}", id)))?;

        if let Some(parent) = node.parent.as_ref().and_then(|p| state.nodes.get_mut(p)) {
            parent.children.retain(|c| c != id);
        }

        // 递归删除子项
        let mut pending = node.children;
        while let Some(child) = pending.pop() {
            if let Some(n) = state.nodes.remove(&child) {
                pending.extend(n.children);
            }
        }
        Ok(())
    }

    async fn download_file(&self, id: &str) -> StoreResult<Bytes> {
        let mut state = self.lock();
        if let Some(fault) = self.enter(&mut state, StoreOp::Download, None) {
            return Err(fault.to_error(StoreOp::Download));
        }

        state
            .nodes
            .get(id)
            .filter(|n| !n.entry.is_folder())
            .map(|n| n.data.clone())
            .ok_or_else(|| StoreError::NotFound(format!("文件不存在: {}", id)))
    }

    async fn upload_file(
        &self,
        name: &str,
        parent_id: &str,
        data: Bytes,
        mime_type: &str,
    ) -> StoreResult<String> {
        let mut state = self.lock();
        let fault = self.enter(&mut state, StoreOp::Upload, Some(name));
        match fault {
            Some(FaultKind::PhantomRateLimited) => {
                let entry = Self::new_file_entry(name, &data, mime_type);
                Self::insert(&mut state, parent_id, entry, data)?;
                Err(StoreError::RateLimited("injected Upload".to_string()))
            }
            Some(f) => Err(f.to_error(StoreOp::Upload)),
            None => {
                let entry = Self::new_file_entry(name, &data, mime_type);
                Self::insert(&mut state, parent_id, entry, data)
            }
        }
    }

    async fn get_metadata(&self, id: &str) -> StoreResult<RemoteEntry> {
        let mut state = self.lock();
        if let Some(fault) = self.enter(&mut state, StoreOp::Metadata, None) {
            return Err(fault.to_error(StoreOp::Metadata));
        }

        state
            .nodes
            .get(id)
            .map(|n| n.entry.clone())
            .ok_or_else(|| StoreError::NotFound(format!("对象不存在: {}", id)))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pagination_tokens() {
        let store = MemoryStore::with_page_size(2);
        for i in 0..5 {
            store.add_file(ROOT_ID, &format!("f{}.txt", i), vec![0u8; i]);
        }

        let first = store.list_children(ROOT_ID, None).await.unwrap();
        assert_eq!(first.entries.len(), 2);
        assert_eq!(first.next_page_token.as_deref(), Some("2"));

        let last = store.list_children(ROOT_ID, Some("4")).await.unwrap();
        assert_eq!(last.entries.len(), 1);
        assert_eq!(last.entries[0].name, "f4.txt");
        assert!(last.next_page_token.is_none());
    }

    #[tokio::test]
    async fn test_phantom_copy_lands_but_reports_failure() {
        let store = MemoryStore::new();
        let src = store.add_folder(ROOT_ID, "src");
        let dst = store.add_folder(ROOT_ID, "dst");
        let file = store.add_file(&src, "a.bin", vec![1u8; 10]);

        store.inject(StoreOp::Copy, FaultKind::PhantomRateLimited, 1);
        let err = store.copy_file(&file, "a.bin", &dst).await.unwrap_err();
        assert!(err.is_rate_limited());

        let landed = store.find_child(&dst, "a.bin").unwrap();
        assert_eq!(landed.size, 10);
        assert_eq!(store.calls(StoreOp::Copy), 1);
    }

    #[tokio::test]
    async fn test_delete_removes_from_parent() {
        let store = MemoryStore::new();
        let id = store.add_file(ROOT_ID, "gone.txt", "bye");
        store.delete_file(&id).await.unwrap();
        assert!(store.find_child(ROOT_ID, "gone.txt").is_none());
        assert!(!store.contains(&id));
    }
}
