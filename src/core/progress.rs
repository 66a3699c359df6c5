//! 复制进度日志
//!
//! 每行一条 `<itemId>,<outcome>`，只追加。重放时同一 ID 以最后一条为准。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

/// 条目处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Copied,
    /// 复制被拒绝后经下载再上传完成
    Uploaded,
    Skipped,
    Replaced,
    Error(String),
    FolderCreated,
    FolderReused,
}

impl FileOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, FileOutcome::Error(_))
    }
}

impl std::fmt::Display for FileOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileOutcome::Copied => write!(f, "copied"),
            FileOutcome::Uploaded => write!(f, "uploaded"),
            FileOutcome::Skipped => write!(f, "skipped"),
            FileOutcome::Replaced => write!(f, "replaced"),
            FileOutcome::Error(reason) => write!(f, "error:{}", reason),
            FileOutcome::FolderCreated => write!(f, "folder_created"),
            FileOutcome::FolderReused => write!(f, "folder_reused"),
        }
    }
}

impl From<&str> for FileOutcome {
    fn from(s: &str) -> Self {
        match s {
            "copied" => FileOutcome::Copied,
            "uploaded" => FileOutcome::Uploaded,
            "skipped" => FileOutcome::Skipped,
            "replaced" => FileOutcome::Replaced,
            "folder_created" => FileOutcome::FolderCreated,
            "folder_reused" => FileOutcome::FolderReused,
            "error" => FileOutcome::Error(String::new()),
            other => FileOutcome::Error(
                other.strip_prefix("error:").unwrap_or(other).to_string(),
            ),
        }
    }
}

/// 解析一行记录，按最后一个逗号拆分
fn parse_line(line: &str) -> Option<(&str, &str)> {
    let (id, outcome) = line.trim_end_matches('\r').rsplit_once(',')?;
    let (id, outcome) = (id.trim(), outcome.trim());
    if id.is_empty() || outcome.is_empty() {
        return None;
    }
    Some((id, outcome))
}

pub struct ProgressLog {
    path: PathBuf,
    file: File,
    processed: HashMap<String, FileOutcome>,
}

impl ProgressLog {
    /// 打开进度日志。`resume` 为 false 时清空已有内容
    pub async fn open(path: impl AsRef<Path>, resume: bool) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let processed = if resume {
            Self::replay(&path).await?
        } else {
            HashMap::new()
        };

        let file = OpenOptions::new()
            .create(true)
            .append(resume)
            .write(true)
            .truncate(!resume)
            .open(&path)
            .await?;

        if resume {
            info!("从进度日志恢复 {} 条记录: {:?}", processed.len(), path);
        }

        Ok(Self {
            path,
            file,
            processed,
        })
    }

    /// 读取已有记录，文件不存在时视为没有进度
    pub async fn replay(path: &Path) -> std::io::Result<HashMap<String, FileOutcome>> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(e),
        };

        let mut processed = HashMap::new();
        for (lineno, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match parse_line(line) {
                Some((id, outcome)) => {
                    processed.insert(id.to_string(), FileOutcome::from(outcome));
                }
                None => warn!("跳过无效的进度记录 (第{}行): {}", lineno + 1, line),
            }
        }
        Ok(processed)
    }

    pub fn is_processed(&self, id: &str) -> bool {
        self.processed.contains_key(id)
    }

    pub fn outcome(&self, id: &str) -> Option<&FileOutcome> {
        self.processed.get(id)
    }

    pub fn len(&self) -> usize {
        self.processed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processed.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 追加一条记录并立即刷盘
    pub async fn append(&mut self, id: &str, outcome: &FileOutcome) -> std::io::Result<()> {
        // 原因里的逗号和换行会破坏行格式
        let line = match outcome {
            FileOutcome::Error(reason) => {
                let reason: String = reason
                    .chars()
                    .map(|c| if c == ',' || c == '\n' || c == '\r' { ' ' } else { c })
                    .collect();
                format!("{},{}\n", id, FileOutcome::Error(reason))
            }
            _ => format!("{},{}\n", id, outcome),
        };

        self.file.write_all(line.as_bytes()).await?;
        self.file.flush().await?;
        self.processed.insert(id.to_string(), outcome.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_strings() {
        for outcome in [
            FileOutcome::Copied,
            FileOutcome::Uploaded,
            FileOutcome::Skipped,
            FileOutcome::Replaced,
            FileOutcome::FolderCreated,
            FileOutcome::FolderReused,
            FileOutcome::Error("delete_failed".to_string()),
        ] {
            assert_eq!(FileOutcome::from(outcome.to_string().as_str()), outcome);
        }
        assert_eq!(FileOutcome::Copied.to_string(), "copied");
    }

    #[test]
    fn test_parse_line_splits_on_last_comma() {
        assert_eq!(parse_line("abc,copied"), Some(("abc", "copied")));
        assert_eq!(parse_line("a,b,skipped"), Some(("a,b", "skipped")));
        assert_eq!(parse_line("no-comma"), None);
        assert_eq!(parse_line(",copied"), None);
        assert_eq!(parse_line("id,"), None);
    }

    #[tokio::test]
    async fn test_replay_last_write_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.txt");
        tokio::fs::write(
            &path,
            "f1,error:rate_limited\nf2,copied\ngarbage\nf1,copied\n\n",
        )
        .await
        .unwrap();

        let log = ProgressLog::open(&path, true).await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log.outcome("f1"), Some(&FileOutcome::Copied));
        assert!(log.is_processed("f2"));
        assert!(!log.is_processed("garbage"));
    }

    #[tokio::test]
    async fn test_append_then_resume() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("progress.txt");

        let mut log = ProgressLog::open(&path, true).await.unwrap();
        assert!(log.is_empty());
        log.append("f1", &FileOutcome::Skipped).await.unwrap();
        log.append("f2", &FileOutcome::Error("a,b".to_string()))
            .await
            .unwrap();
        drop(log);

        let log = ProgressLog::open(&path, true).await.unwrap();
        assert_eq!(log.outcome("f1"), Some(&FileOutcome::Skipped));
        assert_eq!(log.outcome("f2"), Some(&FileOutcome::Error("a b".to_string())));

        // 不恢复时清空
        let log = ProgressLog::open(&path, false).await.unwrap();
        assert!(log.is_empty());
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "");
    }
}
