//! 文件夹树复制引擎
//!
//! 递归地把源文件夹树镜像到目标位置。按名称和大小决定复制、跳过或替换，
//! 支持断点续传、条目预算、演练模式和取消。

use crate::core::cache::ExistenceCache;
use crate::core::progress::{FileOutcome, ProgressLog};
use crate::core::scanner::{join_path, list_children_all, ScanConfig};
use crate::error::StoreError;
use crate::storage::{RemoteEntry, RemoteStore, DEFAULT_MIME_TYPE};
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::ops::AddAssign;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 根文件夹处理方式（只影响第 0 层）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RootFolderPolicy {
    /// 直接把内容放进目标文件夹
    #[serde(rename = "into-dest")]
    UseDestination,
    /// 同名文件夹存在则复用，否则创建
    #[default]
    #[serde(rename = "reuse")]
    ReuseOrCreate,
    /// 总是新建
    #[serde(rename = "create")]
    AlwaysCreate,
    /// 由命令行在遍历前询问用户
    Prompt,
}

impl FromStr for RootFolderPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reuse" => Ok(RootFolderPolicy::ReuseOrCreate),
            "create" => Ok(RootFolderPolicy::AlwaysCreate),
            "into-dest" => Ok(RootFolderPolicy::UseDestination),
            "prompt" => Ok(RootFolderPolicy::Prompt),
            other => Err(format!(
                "未知的根文件夹策略: {} (可选 reuse, create, into-dest, prompt)",
                other
            )),
        }
    }
}

/// 复制配置
#[derive(Debug, Clone)]
pub struct ReplicateConfig {
    pub batch_size: usize,
    /// 批次之间的等待
    pub batch_delay: Duration,
    /// 每个产生写操作的条目之后的等待
    pub file_delay: Duration,
    /// 本次运行最多处理的条目数
    pub max_items: Option<u64>,
    pub dry_run: bool,
    pub root_policy: RootFolderPolicy,
    pub scan: ScanConfig,
}

impl Default for ReplicateConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            batch_delay: Duration::from_secs(30),
            file_delay: Duration::from_secs(3),
            max_items: None,
            dry_run: false,
            root_policy: RootFolderPolicy::ReuseOrCreate,
            scan: ScanConfig::default(),
        }
    }
}

/// 复制结果汇总
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplicationSummary {
    pub copied_files: u64,
    pub skipped_files: u64,
    pub replaced_files: u64,
    pub copied_folders: u64,
    pub total_copied_bytes: u64,
    pub errors: u64,
    pub items_processed: u64,
    /// 条目预算用尽
    pub halted: bool,
    pub cancelled: bool,
}

impl ReplicationSummary {
    /// 是否应停止后续处理
    pub fn stopped(&self) -> bool {
        self.halted || self.cancelled
    }

    fn record_file(&mut self, outcome: &FileOutcome, size: u64) {
        match outcome {
            FileOutcome::Copied | FileOutcome::Uploaded => {
                self.copied_files += 1;
                self.total_copied_bytes += size;
            }
            FileOutcome::Replaced => {
                self.replaced_files += 1;
                self.total_copied_bytes += size;
            }
            FileOutcome::Skipped => self.skipped_files += 1,
            FileOutcome::Error(_) => self.errors += 1,
            FileOutcome::FolderCreated | FileOutcome::FolderReused => {}
        }
        self.items_processed += 1;
    }
}

impl AddAssign for ReplicationSummary {
    fn add_assign(&mut self, other: Self) {
        self.copied_files += other.copied_files;
        self.skipped_files += other.skipped_files;
        self.replaced_files += other.replaced_files;
        self.copied_folders += other.copied_folders;
        self.total_copied_bytes += other.total_copied_bytes;
        self.errors += other.errors;
        self.items_processed += other.items_processed;
        self.halted |= other.halted;
        self.cancelled |= other.cancelled;
    }
}

/// 单次运行的上下文
struct RunContext<'p> {
    cache: ExistenceCache,
    /// 剩余条目预算，None 表示不限
    budget: Option<u64>,
    progress: Option<&'p mut ProgressLog>,
    /// 演练模式下的虚拟文件夹序号
    dry_run_seq: u64,
}

impl RunContext<'_> {
    fn budget_exhausted(&self) -> bool {
        self.budget == Some(0)
    }

    fn consume_budget(&mut self) {
        if let Some(ref mut remaining) = self.budget {
            *remaining = remaining.saturating_sub(1);
        }
    }

    fn is_processed(&self, id: &str) -> bool {
        self.progress
            .as_ref()
            .map(|p| p.is_processed(id))
            .unwrap_or(false)
    }
}

/// 把错误归类为进度日志里的原因
fn reason_of(stage: &str, e: &StoreError) -> String {
    let kind = match e {
        StoreError::RateLimited(_) => "rate_limited",
        StoreError::PermissionDenied(_) => "permission_denied",
        StoreError::NotFound(_) => "not_found",
        StoreError::Auth(_) => "auth",
        StoreError::Http(_) => "http",
        StoreError::Io(_) => "io",
        StoreError::Backend(_) => "backend",
    };
    format!("{}_failed:{}", stage, kind)
}

pub struct Replicator {
    store: Arc<dyn RemoteStore>,
    config: ReplicateConfig,
    cancel: CancellationToken,
}

impl Replicator {
    pub fn new(store: Arc<dyn RemoteStore>, config: ReplicateConfig) -> Self {
        Self {
            store,
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &ReplicateConfig {
        &self.config
    }

    /// 复制 `source_folder_id` 到 `dest_parent_id` 下，根文件夹命名为 `name`
    pub async fn replicate(
        &self,
        source_folder_id: &str,
        dest_parent_id: &str,
        name: &str,
        progress: Option<&mut ProgressLog>,
    ) -> ReplicationSummary {
        info!(
            "开始复制: {} -> {} (名称: {}, 存储: {}, 演练: {})",
            source_folder_id,
            dest_parent_id,
            name,
            self.store.name(),
            self.config.dry_run
        );

        let mut ctx = RunContext {
            cache: ExistenceCache::new(self.store.clone()),
            budget: self.config.max_items,
            progress,
            dry_run_seq: 0,
        };

        let summary = self
            .replicate_folder(&mut ctx, source_folder_id, dest_parent_id, name, name, 0)
            .await;

        info!(
            "复制完成: 复制 {} 个文件, 替换 {}, 跳过 {}, 新建文件夹 {}, {} 字节, {} 个错误{}{}",
            summary.copied_files,
            summary.replaced_files,
            summary.skipped_files,
            summary.copied_folders,
            summary.total_copied_bytes,
            summary.errors,
            if summary.halted { " (已达到条目上限)" } else { "" },
            if summary.cancelled { " (已取消)" } else { "" },
        );

        summary
    }

    /// 可被取消打断的等待，返回 false 表示已取消
    async fn pause(&self, delay: Duration) -> bool {
        if self.config.dry_run || delay.is_zero() {
            return !self.cancel.is_cancelled();
        }

        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = self.cancel.cancelled() => false,
        }
    }

    /// 遇到停止条件时写入汇总并返回 true
    fn should_stop(&self, ctx: &RunContext<'_>, summary: &mut ReplicationSummary) -> bool {
        if self.cancel.is_cancelled() {
            summary.cancelled = true;
            return true;
        }
        if ctx.budget_exhausted() {
            summary.halted = true;
            return true;
        }
        false
    }

    async fn record(&self, ctx: &mut RunContext<'_>, id: &str, outcome: &FileOutcome) {
        if self.config.dry_run {
            return;
        }
        if let Some(progress) = ctx.progress.as_mut() {
            if let Err(e) = progress.append(id, outcome).await {
                warn!("写入进度日志失败 {}: {}", id, e);
            }
        }
    }

    fn replicate_folder<'a, 'p: 'a>(
        &'a self,
        ctx: &'a mut RunContext<'p>,
        source_id: &'a str,
        dest_parent_id: &'a str,
        name: &'a str,
        path: &'a str,
        depth: usize,
    ) -> BoxFuture<'a, ReplicationSummary> {
        async move {
            let mut summary = ReplicationSummary::default();
            if self.should_stop(ctx, &mut summary) {
                return summary;
            }

            let policy = if depth == 0 {
                self.config.root_policy
            } else {
                RootFolderPolicy::ReuseOrCreate
            };

            // 1. 确定目标文件夹
            let dest_id = match self
                .resolve_folder(ctx, &mut summary, source_id, dest_parent_id, name, policy)
                .await
            {
                Some(id) => id,
                None if self.cancel.is_cancelled() => {
                    summary.cancelled = true;
                    return summary;
                }
                None => {
                    summary.errors += 1;
                    return summary;
                }
            };

            // 2. 列出源文件夹
            let children = match list_children_all(self.store.as_ref(), source_id).await {
                Ok(children) => self.config.scan.filter(path, children),
                Err(_) if self.cancel.is_cancelled() => {
                    summary.cancelled = true;
                    return summary;
                }
                Err(e) => {
                    error!("列出源文件夹失败 {}: {}", path, e);
                    summary.errors += 1;
                    return summary;
                }
            };
            let (folders, files): (Vec<_>, Vec<_>) =
                children.into_iter().partition(|e| e.is_folder());
            debug!("{}: {} 个子文件夹, {} 个文件", path, folders.len(), files.len());

            // 3. 先处理子文件夹
            for folder in &folders {
                let child_path = join_path(path, &folder.name);
                summary += self
                    .replicate_folder(ctx, &folder.id, &dest_id, &folder.name, &child_path, depth + 1)
                    .await;
                if summary.stopped() {
                    return summary;
                }
            }

            // 4. 分批处理文件
            let batch_size = self.config.batch_size.max(1);
            let batch_count = files.len().div_ceil(batch_size);
            for (index, batch) in files.chunks(batch_size).enumerate() {
                for file in batch {
                    if self.should_stop(ctx, &mut summary) {
                        return summary;
                    }
                    if ctx.is_processed(&file.id) {
                        debug!("已处理，跳过: {}", join_path(path, &file.name));
                        continue;
                    }

                    let (outcome, mutated) = self.replicate_file(ctx, file, &dest_id).await;
                    // 退避等待中被取消的失败不记录，续传时重新处理
                    if matches!(outcome, FileOutcome::Error(_)) && self.cancel.is_cancelled() {
                        debug!("已取消，未完成: {}", join_path(path, &file.name));
                        summary.cancelled = true;
                        return summary;
                    }
                    match outcome {
                        FileOutcome::Error(ref reason) => {
                            warn!("文件处理失败 {}: {}", join_path(path, &file.name), reason)
                        }
                        ref ok => debug!("{}: {}", join_path(path, &file.name), ok),
                    }
                    summary.record_file(&outcome, file.size);
                    self.record(ctx, &file.id, &outcome).await;
                    ctx.consume_budget();

                    if mutated && !self.pause(self.config.file_delay).await {
                        summary.cancelled = true;
                        return summary;
                    }
                }

                if index + 1 < batch_count {
                    debug!("批次 {}/{} 完成，等待 {:?}", index + 1, batch_count, self.config.batch_delay);
                    if !self.pause(self.config.batch_delay).await {
                        summary.cancelled = true;
                        return summary;
                    }
                }
            }

            summary
        }
        .boxed()
    }

    /// 确定目标文件夹 ID，失败返回 None
    async fn resolve_folder(
        &self,
        ctx: &mut RunContext<'_>,
        summary: &mut ReplicationSummary,
        source_id: &str,
        dest_parent_id: &str,
        name: &str,
        policy: RootFolderPolicy,
    ) -> Option<String> {
        let resumed = ctx.is_processed(source_id);

        if policy == RootFolderPolicy::UseDestination {
            if !resumed {
                self.record(ctx, source_id, &FileOutcome::FolderReused).await;
                ctx.consume_budget();
                summary.items_processed += 1;
            }
            return Some(dest_parent_id.to_string());
        }

        let policy = if policy == RootFolderPolicy::Prompt {
            warn!("根文件夹策略未确定，按复用处理");
            RootFolderPolicy::ReuseOrCreate
        } else {
            policy
        };

        // 续传时只查找已有文件夹；新建策略下同样先查找上次创建的那个
        if resumed || policy == RootFolderPolicy::ReuseOrCreate {
            match ctx.cache.lookup_folder(dest_parent_id, name).await {
                Ok(Some(existing)) => {
                    if !resumed {
                        debug!("复用已有文件夹: {} ({})", name, existing.id);
                        self.record(ctx, source_id, &FileOutcome::FolderReused).await;
                        ctx.consume_budget();
                        summary.items_processed += 1;
                    }
                    return Some(existing.id);
                }
                Ok(None) => {
                    if resumed {
                        info!("已记录的文件夹不存在，重新创建: {}", name);
                    }
                }
                Err(e) => {
                    error!("查找目标文件夹失败 {}: {}", name, e);
                    return None;
                }
            }
        }

        let id = self
            .create_folder(
                ctx,
                dest_parent_id,
                name,
                policy == RootFolderPolicy::AlwaysCreate,
            )
            .await?;
        summary.copied_folders += 1;
        summary.items_processed += 1;
        self.record(ctx, source_id, &FileOutcome::FolderCreated).await;
        ctx.consume_budget();

        if !self.pause(self.config.file_delay).await {
            summary.cancelled = true;
        }
        Some(id)
    }

    /// 新建文件夹。`fresh_only` 时复查只接受创建前不存在的同名文件夹
    async fn create_folder(
        &self,
        ctx: &mut RunContext<'_>,
        parent_id: &str,
        name: &str,
        fresh_only: bool,
    ) -> Option<String> {
        if self.config.dry_run {
            ctx.dry_run_seq += 1;
            let id = format!("dry-run-{}", ctx.dry_run_seq);
            ctx.cache.seed_empty(&id);
            info!("[演练] 将创建文件夹: {}", name);
            return Some(id);
        }

        // None 表示无法区分新旧文件夹，此时不做复查
        let existing_ids: Option<Vec<String>> = if fresh_only {
            match ctx.cache.folders_named(parent_id, name).await {
                Ok(folders) => Some(folders.into_iter().map(|f| f.id).collect()),
                Err(e) => {
                    debug!("列出已有同名文件夹失败 {}: {}", name, e);
                    None
                }
            }
        } else {
            Some(Vec::new())
        };

        match self.store.create_folder(name, parent_id).await {
            Ok(id) => {
                info!("创建文件夹: {} ({})", name, id);
                ctx.cache.invalidate(parent_id);
                Some(id)
            }
            Err(e) => {
                warn!("创建文件夹失败 {}: {}", name, e);
                // 请求可能已在服务端生效
                ctx.cache.invalidate(parent_id);
                let created = match existing_ids {
                    Some(before) => match ctx.cache.folders_named(parent_id, name).await {
                        Ok(folders) => folders.into_iter().find(|f| !before.contains(&f.id)),
                        Err(_) => None,
                    },
                    None => None,
                };
                match created {
                    Some(folder) => {
                        info!("复查发现文件夹已创建: {}", name);
                        Some(folder.id)
                    }
                    None => {
                        error!("创建文件夹最终失败，跳过整个子树: {}", name);
                        None
                    }
                }
            }
        }
    }

    /// 处理单个文件，返回结果以及是否发出了写操作
    async fn replicate_file(
        &self,
        ctx: &mut RunContext<'_>,
        file: &RemoteEntry,
        dest_id: &str,
    ) -> (FileOutcome, bool) {
        let existing = match ctx.cache.lookup_file(dest_id, &file.name).await {
            Ok(existing) => existing,
            Err(e) => return (FileOutcome::Error(reason_of("lookup", &e)), false),
        };

        match existing {
            Some(dest) if dest.size == file.size => (FileOutcome::Skipped, false),
            Some(dest) => {
                if self.config.dry_run {
                    info!("[演练] 将替换: {} ({} -> {} 字节)", file.name, dest.size, file.size);
                    return (FileOutcome::Replaced, false);
                }

                if let Err(e) = self.store.delete_file(&dest.id).await {
                    warn!("删除旧文件失败 {}: {}", file.name, e);
                    return (FileOutcome::Error("delete_failed".to_string()), true);
                }
                ctx.cache.invalidate(dest_id);

                match self.copy_with_recovery(ctx, file, dest_id).await {
                    Ok(_) => (FileOutcome::Replaced, true),
                    Err(reason) => (FileOutcome::Error(reason), true),
                }
            }
            None => {
                if self.config.dry_run {
                    info!("[演练] 将复制: {} ({} 字节)", file.name, file.size);
                    return (FileOutcome::Copied, false);
                }

                match self.copy_with_recovery(ctx, file, dest_id).await {
                    Ok(outcome) => (outcome, true),
                    Err(reason) => (FileOutcome::Error(reason), true),
                }
            }
        }
    }

    /// 复制文件：先服务端复制，权限不足时改为下载再上传。
    /// 每个阶段失败后都复查目标是否已经存在。
    async fn copy_with_recovery(
        &self,
        ctx: &mut RunContext<'_>,
        file: &RemoteEntry,
        dest_id: &str,
    ) -> Result<FileOutcome, String> {
        match self.store.copy_file(&file.id, &file.name, dest_id).await {
            Ok(_) => {
                ctx.cache.invalidate(dest_id);
                return Ok(FileOutcome::Copied);
            }
            Err(e) => {
                warn!("复制失败 {}: {}", file.name, e);
                if self.double_check(ctx, dest_id, &file.name).await {
                    return Ok(FileOutcome::Copied);
                }
                if !e.is_permission_denied() {
                    return Err(reason_of("copy", &e));
                }
            }
        }

        info!("无复制权限，改为下载后上传: {}", file.name);
        let data = match self.store.download_file(&file.id).await {
            Ok(data) => data,
            Err(e) => {
                warn!("下载失败 {}: {}", file.name, e);
                if self.double_check(ctx, dest_id, &file.name).await {
                    return Ok(FileOutcome::Uploaded);
                }
                return Err(reason_of("download", &e));
            }
        };

        let mime_type = match self.store.get_metadata(&file.id).await {
            Ok(meta) => meta.mime_type,
            Err(e) => {
                debug!("获取元数据失败，使用默认 MIME {}: {}", file.name, e);
                DEFAULT_MIME_TYPE.to_string()
            }
        };

        match self
            .store
            .upload_file(&file.name, dest_id, data, &mime_type)
            .await
        {
            Ok(_) => {
                ctx.cache.invalidate(dest_id);
                Ok(FileOutcome::Uploaded)
            }
            Err(e) => {
                warn!("上传失败 {}: {}", file.name, e);
                if self.double_check(ctx, dest_id, &file.name).await {
                    return Ok(FileOutcome::Uploaded);
                }
                Err(reason_of("upload", &e))
            }
        }
    }

    /// 失败后重新列出目标文件夹，存在非空同名文件即视为成功
    async fn double_check(&self, ctx: &mut RunContext<'_>, dest_id: &str, name: &str) -> bool {
        ctx.cache.invalidate(dest_id);
        match ctx.cache.lookup_file(dest_id, name).await {
            Ok(Some(entry)) if entry.size > 0 => {
                info!("复查发现文件已存在: {} ({} 字节)", name, entry.size);
                true
            }
            Ok(_) => false,
            Err(e) => {
                debug!("复查失败 {}: {}", name, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_merge() {
        let mut a = ReplicationSummary {
            copied_files: 2,
            total_copied_bytes: 300,
            errors: 1,
            items_processed: 3,
            ..Default::default()
        };
        let b = ReplicationSummary {
            copied_files: 1,
            skipped_files: 4,
            copied_folders: 1,
            items_processed: 6,
            halted: true,
            ..Default::default()
        };

        a += b;
        assert_eq!(a.copied_files, 3);
        assert_eq!(a.skipped_files, 4);
        assert_eq!(a.total_copied_bytes, 300);
        assert_eq!(a.items_processed, 9);
        assert!(a.halted);
        assert!(!a.cancelled);
        assert!(a.stopped());
    }

    #[test]
    fn test_root_policy_parsing() {
        assert_eq!("reuse".parse::<RootFolderPolicy>(), Ok(RootFolderPolicy::ReuseOrCreate));
        assert_eq!("create".parse::<RootFolderPolicy>(), Ok(RootFolderPolicy::AlwaysCreate));
        assert_eq!("into-dest".parse::<RootFolderPolicy>(), Ok(RootFolderPolicy::UseDestination));
        assert_eq!("prompt".parse::<RootFolderPolicy>(), Ok(RootFolderPolicy::Prompt));
        assert!("other".parse::<RootFolderPolicy>().is_err());

        let policy: RootFolderPolicy = serde_json::from_str("\"into-dest\"").unwrap();
        assert_eq!(policy, RootFolderPolicy::UseDestination);
    }

    #[test]
    fn test_reason_of() {
        let e = StoreError::PermissionDenied("x".into());
        assert_eq!(reason_of("copy", &e), "copy_failed:permission_denied");
    }
}
