use super::folder_label;
use crate::core::{
    list_children_all, ProgressLog, ReplicateConfig, ReplicationSummary, Replicator,
    RootFolderPolicy,
};
use crate::storage::RemoteStore;
use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// 一次复制请求
#[derive(Debug, Clone)]
pub struct ReplicateRequest {
    pub source_id: String,
    pub dest_id: String,
    /// 目标中的根文件夹名称，默认与源文件夹同名
    pub name: Option<String>,
    pub progress_file: PathBuf,
    pub resume: bool,
    pub config: ReplicateConfig,
}

/// 解析用户对根文件夹策略的回答，空回答表示复用
pub fn parse_policy_answer(answer: &str) -> Option<RootFolderPolicy> {
    match answer.trim().to_lowercase().as_str() {
        "" | "r" | "reuse" => Some(RootFolderPolicy::ReuseOrCreate),
        "c" | "create" => Some(RootFolderPolicy::AlwaysCreate),
        "i" | "into-dest" => Some(RootFolderPolicy::UseDestination),
        _ => None,
    }
}

/// 在遍历开始前询问一次根文件夹策略
async fn prompt_root_policy(
    store: &dyn RemoteStore,
    dest_id: &str,
    name: &str,
) -> Result<RootFolderPolicy> {
    let exists = list_children_all(store, dest_id)
        .await
        .context("列出目标文件夹失败")?
        .iter()
        .any(|e| e.is_folder() && e.name == name);

    let question = if exists {
        format!(
            "目标中已存在文件夹 \"{}\"。[r] 复用 / [c] 新建同名文件夹 / [i] 直接放入目标文件夹 (默认 r): ",
            name
        )
    } else {
        format!(
            "将在目标中创建文件夹 \"{}\"。[r] 创建 / [i] 直接放入目标文件夹 (默认 r): ",
            name
        )
    };

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    for _ in 0..3 {
        stdout.write_all(question.as_bytes()).await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        if let Some(policy) = parse_policy_answer(&line) {
            return Ok(policy);
        }
    }
    bail!("未能确定根文件夹策略")
}

pub async fn run_replicate(
    store: Arc<dyn RemoteStore>,
    mut request: ReplicateRequest,
    cancel: &CancellationToken,
) -> Result<ReplicationSummary> {
    let name = folder_label(store.as_ref(), &request.source_id, request.name.take()).await?;

    if request.config.root_policy == RootFolderPolicy::Prompt {
        request.config.root_policy =
            prompt_root_policy(store.as_ref(), &request.dest_id, &name).await?;
        info!("根文件夹策略: {:?}", request.config.root_policy);
    }

    // 演练不读写进度日志
    let mut progress = if request.config.dry_run {
        None
    } else {
        Some(
            ProgressLog::open(&request.progress_file, request.resume)
                .await
                .with_context(|| format!("打开进度日志失败: {:?}", request.progress_file))?,
        )
    };

    let replicator = Replicator::new(store, request.config).with_cancel(cancel.clone());
    let summary = replicator
        .replicate(&request.source_id, &request.dest_id, &name, progress.as_mut())
        .await;

    Ok(summary)
}
