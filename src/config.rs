//! 应用配置模块
//!
//! 所有配置都在 `config.json` 中，按节读取，缺失的字段使用默认值。

use crate::core::{ReplicateConfig, RetryPolicy, RootFolderPolicy, ScanConfig};
use crate::logging::LogConfig;
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "config.json";

/// 应用配置目录
pub fn default_config_dir() -> PathBuf {
    crate::dirs::config_dir()
        .map(|p| p.join("drivesync"))
        .unwrap_or_else(|| PathBuf::from(".drivesync"))
}

/// 存储配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum StoreConfig {
    Drive {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        access_token: Option<String>,
        /// 外部工具维护的令牌文件，优先于 access_token
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token_file: Option<String>,
        /// 共享云端硬盘 ID
        #[serde(default, skip_serializing_if = "Option::is_none")]
        drive_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        endpoint: Option<String>,
    },
    Fs {
        root: String,
    },
    S3 {
        bucket: String,
        region: String,
        access_key: String,
        secret_key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        endpoint: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prefix: Option<String>,
    },
    Webdav {
        endpoint: String,
        username: String,
        password: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        root: Option<String>,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Drive {
            access_token: None,
            token_file: None,
            drive_id: None,
            endpoint: None,
        }
    }
}

/// 限流重试配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: f64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: f64,
}

fn default_max_retries() -> u32 {
    8
}

fn default_initial_delay_secs() -> f64 {
    10.0
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.1
}

fn default_max_delay_secs() -> f64 {
    300.0 // 5 分钟
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_secs: default_initial_delay_secs(),
            backoff_factor: default_backoff_factor(),
            jitter: default_jitter(),
            max_delay_secs: default_max_delay_secs(),
        }
    }
}

/// 秒数转为 Duration，负数按 0 处理
fn secs_to_duration(field: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs.max(0.0))
        .with_context(|| format!("无效的时长 {}: {}", field, secs))
}

impl RetrySettings {
    pub fn to_policy(&self) -> Result<RetryPolicy> {
        Ok(RetryPolicy {
            max_retries: self.max_retries,
            initial_delay: secs_to_duration("initialDelaySecs", self.initial_delay_secs)?,
            factor: self.backoff_factor.max(1.0),
            jitter: self.jitter.clamp(0.0, 1.0),
            max_delay: secs_to_duration("maxDelaySecs", self.max_delay_secs)?,
        })
    }
}

/// 复制配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicateSettings {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_delay_secs")]
    pub batch_delay_secs: f64,
    #[serde(default = "default_file_delay_secs")]
    pub file_delay_secs: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_items: Option<u64>,
    #[serde(default = "default_progress_file")]
    pub progress_file: String,
    #[serde(default)]
    pub root_policy: RootFolderPolicy,
}

fn default_batch_size() -> usize {
    5
}

fn default_batch_delay_secs() -> f64 {
    30.0
}

fn default_file_delay_secs() -> f64 {
    3.0
}

fn default_progress_file() -> String {
    "drivesync_progress.txt".to_string()
}

impl Default for ReplicateSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_delay_secs: default_batch_delay_secs(),
            file_delay_secs: default_file_delay_secs(),
            max_items: None,
            progress_file: default_progress_file(),
            root_policy: RootFolderPolicy::default(),
        }
    }
}

impl ReplicateSettings {
    pub fn to_config(&self, scan: ScanConfig, dry_run: bool) -> Result<ReplicateConfig> {
        Ok(ReplicateConfig {
            batch_size: self.batch_size.max(1),
            batch_delay: secs_to_duration("batchDelaySecs", self.batch_delay_secs)?,
            file_delay: secs_to_duration("fileDelaySecs", self.file_delay_secs)?,
            max_items: self.max_items,
            dry_run,
            root_policy: self.root_policy,
            scan,
        })
    }
}

/// 扫描过滤配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSettings {
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default)]
    pub skip_resource_forks: bool,
}

impl ScanSettings {
    pub fn to_config(&self) -> ScanConfig {
        ScanConfig {
            exclude_patterns: self.exclude_patterns.clone(),
            skip_resource_forks: self.skip_resource_forks,
        }
    }
}

/// 全部配置
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub retry: RetrySettings,
    pub replicate: ReplicateSettings,
    pub scan: ScanSettings,
    pub log: LogConfig,
}

impl AppConfig {
    /// 读取配置文件，文件不存在时全部使用默认值
    pub fn load(config_file: &Path) -> Result<Self> {
        if !config_file.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(config_file)
            .with_context(|| format!("读取配置文件失败: {:?}", config_file))?;
        let root: serde_json::Value = serde_json::from_str(&content)
            .with_context(|| format!("配置文件格式错误: {:?}", config_file))?;

        Ok(Self {
            store: load_section(&root, "store")?,
            retry: load_section(&root, "retry")?,
            replicate: load_section(&root, "replicate")?,
            scan: load_section(&root, "scan")?,
            log: load_section(&root, "log")?,
        })
    }

    /// 只读取日志配置，出错时使用默认值（日志初始化早于其它配置）
    pub fn load_log(config_file: &Path) -> LogConfig {
        fs::read_to_string(config_file)
            .ok()
            .and_then(|content| serde_json::from_str::<serde_json::Value>(&content).ok())
            .and_then(|root| load_section(&root, "log").ok())
            .unwrap_or_default()
    }
}

/// 读取一个配置节，缺失时使用默认值
fn load_section<T: DeserializeOwned + Default>(root: &serde_json::Value, key: &str) -> Result<T> {
    match root.get(key) {
        Some(value) => serde_json::from_value::<T>(value.clone())
            .with_context(|| format!("配置节 \"{}\" 无效", key)),
        None => Ok(T::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = AppConfig::load(Path::new("/nonexistent/drivesync/config.json")).unwrap();
        assert_eq!(config.store, StoreConfig::default());
        assert_eq!(config.retry.max_retries, 8);
        assert_eq!(config.replicate.batch_size, 5);
        assert_eq!(config.replicate.root_policy, RootFolderPolicy::ReuseOrCreate);
        assert!(config.log.enabled);
    }

    #[test]
    fn test_sections_and_partial_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "store": {{"type": "s3", "bucket": "b", "region": "r", "accessKey": "ak", "secretKey": "sk"}},
                "retry": {{"maxRetries": 3, "initialDelaySecs": 1.5}},
                "replicate": {{"batchSize": 10, "maxItems": 200, "rootPolicy": "into-dest"}},
                "scan": {{"excludePatterns": ["*.tmp"], "skipResourceForks": true}},
                "log": {{"level": "debug"}}
            }}"#
        )
        .unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        match config.store {
            StoreConfig::S3 {
                ref access_key,
                ref endpoint,
                ..
            } => {
                assert_eq!(access_key, "ak");
                assert!(endpoint.is_none());
            }
            ref other => panic!("unexpected store: {:?}", other),
        }

        let policy = config.retry.to_policy().unwrap();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.initial_delay, Duration::from_millis(1500));
        assert_eq!(policy.factor, 2.0);

        let replicate = config
            .replicate
            .to_config(config.scan.to_config(), true)
            .unwrap();
        assert_eq!(replicate.batch_size, 10);
        assert_eq!(replicate.max_items, Some(200));
        assert_eq!(replicate.file_delay, Duration::from_secs(3));
        assert_eq!(replicate.root_policy, RootFolderPolicy::UseDestination);
        assert!(replicate.scan.skip_resource_forks);
        assert!(replicate.dry_run);

        assert_eq!(config.log.level, "debug");
        assert_eq!(AppConfig::load_log(file.path()).level, "debug");
    }

    #[test]
    fn test_out_of_range_delays_are_errors() {
        let retry = RetrySettings {
            initial_delay_secs: 1e20,
            ..Default::default()
        };
        assert!(retry.to_policy().is_err());

        let retry = RetrySettings {
            max_delay_secs: f64::INFINITY,
            ..Default::default()
        };
        assert!(retry.to_policy().is_err());

        let replicate = ReplicateSettings {
            batch_delay_secs: f64::INFINITY,
            ..Default::default()
        };
        assert!(replicate.to_config(ScanConfig::default(), false).is_err());

        // 负数与 NaN 按 0 处理
        let replicate = ReplicateSettings {
            file_delay_secs: f64::NAN,
            batch_delay_secs: -5.0,
            ..Default::default()
        };
        let config = replicate.to_config(ScanConfig::default(), false).unwrap();
        assert_eq!(config.file_delay, Duration::ZERO);
        assert_eq!(config.batch_delay, Duration::ZERO);
    }

    #[test]
    fn test_invalid_section_is_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"store": {{"type": "ftp"}}}}"#).unwrap();
        assert!(AppConfig::load(file.path()).is_err());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(AppConfig::load(file.path()).is_err());
        assert_eq!(AppConfig::load_log(file.path()).level, "info");
    }

    #[test]
    fn test_drive_store_fields() {
        let store: StoreConfig = serde_json::from_str(
            r#"{"type": "drive", "tokenFile": "/tmp/token.json", "driveId": "0AB"}"#,
        )
        .unwrap();
        assert_eq!(
            store,
            StoreConfig::Drive {
                access_token: None,
                token_file: Some("/tmp/token.json".to_string()),
                drive_id: Some("0AB".to_string()),
                endpoint: None,
            }
        );
    }
}
