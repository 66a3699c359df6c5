use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use drivesync_lib::commands::{self, report};
use drivesync_lib::config::{default_config_dir, AppConfig, CONFIG_FILE_NAME};
use drivesync_lib::core::RootFolderPolicy;
use drivesync_lib::logging::{get_log_dir, LogConfig, SizeRotatingWriter};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "drivesync", version, about = "远程文件夹树的扫描、比较与复制")]
struct Cli {
    /// 配置文件路径（默认 ~/.config/drivesync/config.json）
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// 日志级别: error, warn, info, debug, trace
    #[arg(long, global = true, value_name = "LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 统计文件夹树
    Scan {
        folder_id: String,
        /// 报告中显示的名称
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        max_depth: Option<usize>,
    },
    /// 比较两个文件夹树
    Diff {
        folder_a: String,
        folder_b: String,
        #[arg(long)]
        max_depth: Option<usize>,
    },
    /// 把源文件夹树复制到目标文件夹下
    Replicate(ReplicateArgs),
}

#[derive(Args, Debug)]
struct ReplicateArgs {
    source_id: String,
    dest_id: String,
    /// 目标中的根文件夹名称（默认与源相同）
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    batch_size: Option<usize>,
    /// 批次间隔（秒）
    #[arg(long)]
    batch_delay: Option<f64>,
    /// 每个文件之后的间隔（秒）
    #[arg(long)]
    file_delay: Option<f64>,
    #[arg(long)]
    max_retries: Option<u32>,
    /// 首次重试等待（秒）
    #[arg(long)]
    initial_delay: Option<f64>,
    #[arg(long)]
    backoff_factor: Option<f64>,
    /// 本次最多处理的条目数
    #[arg(long)]
    max_items: Option<u64>,
    #[arg(long, value_name = "FILE")]
    progress_file: Option<PathBuf>,
    /// 跳过进度日志中已记录的条目
    #[arg(long)]
    resume: bool,
    /// 只报告将要执行的操作
    #[arg(long)]
    dry_run: bool,
    /// reuse | create | into-dest | prompt
    #[arg(long)]
    root_policy: Option<RootFolderPolicy>,
}

impl ReplicateArgs {
    /// 命令行参数覆盖配置文件
    fn apply(&self, config: &mut AppConfig) {
        let retry = &mut config.retry;
        if let Some(v) = self.max_retries {
            retry.max_retries = v;
        }
        if let Some(v) = self.initial_delay {
            retry.initial_delay_secs = v;
        }
        if let Some(v) = self.backoff_factor {
            retry.backoff_factor = v;
        }

        let replicate = &mut config.replicate;
        if let Some(v) = self.batch_size {
            replicate.batch_size = v;
        }
        if let Some(v) = self.batch_delay {
            replicate.batch_delay_secs = v;
        }
        if let Some(v) = self.file_delay {
            replicate.file_delay_secs = v;
        }
        if self.max_items.is_some() {
            replicate.max_items = self.max_items;
        }
        if let Some(ref v) = self.progress_file {
            replicate.progress_file = v.to_string_lossy().to_string();
        }
        if let Some(v) = self.root_policy {
            replicate.root_policy = v;
        }
    }
}

/// 初始化日志系统：文件 + 控制台
fn init_logging(log_dir: &Path, config: &LogConfig) {
    let level = config.tracing_level();
    let mut env_filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=warn", "opendal=warn"] {
        if let Ok(d) = directive.parse() {
            env_filter = env_filter.add_directive(d);
        }
    }

    let file_writer = if config.enabled {
        SizeRotatingWriter::new(log_dir, config.max_size_mb).ok()
    } else {
        None
    };

    match file_writer {
        Some(file_writer) => {
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false);

            let console_layer = tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false);
            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(file_layer)
                .with(console_layer);
            let _ = tracing::subscriber::set_global_default(subscriber);
        }
        None => {
            let console_layer = tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false);
            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer);
            let _ = tracing::subscriber::set_global_default(subscriber);
        }
    }
}

async fn run(command: Command, mut config: AppConfig, cancel: CancellationToken) -> Result<()> {
    let scan = config.scan.to_config();

    match command {
        Command::Scan {
            folder_id,
            name,
            max_depth,
        } => {
            let store = commands::open_store(&config, &cancel).await?;
            let (label, stats) =
                commands::scan::scan_folder(store, scan, &folder_id, name, max_depth, &cancel)
                    .await?;
            print!("{}", report::scan_report(&label, &stats));
        }
        Command::Diff {
            folder_a,
            folder_b,
            max_depth,
        } => {
            let store = commands::open_store(&config, &cancel).await?;
            let out = commands::diff::diff_folders(
                store, scan, &folder_a, &folder_b, max_depth, &cancel,
            )
            .await?;
            print!(
                "{}",
                report::diff_report(&out.label_a, &out.label_b, &out.result)
            );
        }
        Command::Replicate(args) => {
            args.apply(&mut config);
            let store = commands::open_store(&config, &cancel).await?;

            let request = commands::replicate::ReplicateRequest {
                source_id: args.source_id.clone(),
                dest_id: args.dest_id.clone(),
                name: args.name.clone(),
                progress_file: PathBuf::from(&config.replicate.progress_file),
                resume: args.resume,
                config: config
                    .replicate
                    .to_config(scan, args.dry_run)
                    .context("复制配置无效")?,
            };

            let summary = commands::replicate::run_replicate(store, request, &cancel).await?;
            print!("{}", report::summary_report(&summary, args.dry_run));
            if summary.errors > 0 {
                warn!("复制完成，但有 {} 个条目失败", summary.errors);
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config_file = cli
        .config
        .clone()
        .unwrap_or_else(|| default_config_dir().join(CONFIG_FILE_NAME));
    let config_dir = config_file
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(default_config_dir);

    let mut log_config = AppConfig::load_log(&config_file);
    if let Some(ref level) = cli.log_level {
        log_config.level = level.clone();
    }
    init_logging(&get_log_dir(&config_dir), &log_config);

    let config = match AppConfig::load(&config_file) {
        Ok(config) => config,
        Err(e) => {
            error!("加载配置失败: {:#}", e);
            eprintln!("错误: {:#}", e);
            std::process::exit(1);
        }
    };

    let cancel = CancellationToken::new();
    let work = run(cli.command, config, cancel.clone());
    tokio::pin!(work);

    let result = tokio::select! {
        result = &mut work => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("收到中断信号，正在停止...");
            cancel.cancel();
            work.await
        }
    };

    match result {
        Ok(()) => info!("完成"),
        Err(e) => {
            error!("{:#}", e);
            eprintln!("错误: {:#}", e);
            std::process::exit(1);
        }
    }
}
