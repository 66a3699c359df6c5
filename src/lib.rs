pub mod commands;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod storage;

pub use crate::core::{
    diff, DiffResult, ReplicateConfig, ReplicationSummary, Replicator, RetryPolicy, RetryStore,
    RootFolderPolicy, ScanStats, TreeScanner,
};
pub use config::{AppConfig, StoreConfig};
pub use error::{StoreError, StoreResult};
pub use storage::{create_store, RemoteEntry, RemoteStore};

// 平台相关的配置目录
pub mod dirs {
    use std::path::PathBuf;

    pub fn config_dir() -> Option<PathBuf> {
        if cfg!(target_os = "windows") {
            std::env::var("APPDATA").ok().map(PathBuf::from)
        } else if cfg!(target_os = "macos") {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join("Library").join("Application Support"))
        } else {
            // Linux
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join(".config"))
        }
    }
}
