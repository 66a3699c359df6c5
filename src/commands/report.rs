//! 纯文本报告

use crate::core::{DiffResult, ReplicationSummary, ScanStats};
use std::fmt::Write;

/// 格式化字节数
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", size, UNITS[unit])
    }
}

/// 带符号的字节差
pub fn format_delta(delta: i64) -> String {
    let sign = if delta < 0 { "-" } else { "+" };
    format!("{}{}", sign, format_size(delta.unsigned_abs()))
}

fn display_path(path: &str) -> &str {
    if path.is_empty() {
        "/"
    } else {
        path
    }
}

pub fn scan_report(label: &str, stats: &ScanStats) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "== 扫描: {} ==", label);
    let _ = writeln!(out, "文件夹: {}", stats.total_folders);
    let _ = writeln!(out, "文件:   {}", stats.total_files);
    let _ = writeln!(out, "总大小: {}", format_size(stats.total_size_bytes));

    let extensions = stats.top_extensions(10);
    if !extensions.is_empty() {
        let _ = writeln!(out, "\n扩展名:");
        for (ext, count) in extensions {
            let _ = writeln!(out, "  {:<12} {}", ext, count);
        }
    }

    if !stats.largest_files.is_empty() {
        let _ = writeln!(out, "\n最大的文件:");
        for file in &stats.largest_files {
            let _ = writeln!(out, "  {:>12}  {}", format_size(file.size), file.path);
        }
    }

    if !stats.failed_folders.is_empty() {
        let _ = writeln!(out, "\n无法列出的文件夹（按空计入）:");
        for path in &stats.failed_folders {
            let _ = writeln!(out, "  {}", display_path(path));
        }
    }
    out
}

pub fn diff_report(label_a: &str, label_b: &str, result: &DiffResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "== 比较: {} <-> {} ==", label_a, label_b);
    let _ = writeln!(out, "相同:       {}", result.identical.len());
    let _ = writeln!(out, "大小不同:   {}", result.different.len());
    let _ = writeln!(out, "仅在 A:     {}", result.only_in_a.len());
    let _ = writeln!(out, "仅在 B:     {}", result.only_in_b.len());
    let _ = writeln!(out, "匹配率:     {:.1}%", result.match_percentage());
    let _ = writeln!(
        out,
        "差值 (B-A): 文件 {:+}, 文件夹 {:+}, 大小 {}",
        result.total_files_delta,
        result.total_folders_delta,
        format_delta(result.total_size_delta)
    );

    let sections = [
        ("仅在 A 中（最大）", result.largest_only_in_a()),
        ("仅在 B 中（最大）", result.largest_only_in_b()),
    ];
    for (title, entries) in sections {
        if entries.is_empty() {
            continue;
        }
        let _ = writeln!(out, "\n{}:", title);
        for entry in entries {
            let _ = writeln!(out, "  {:>12}  {}", format_size(entry.size), entry.path);
        }
    }

    if !result.different.is_empty() {
        let _ = writeln!(out, "\n大小不同（差值最大）:");
        for d in result.largest_different() {
            let _ = writeln!(
                out,
                "  {:>12}  {} ({} -> {})",
                format_delta(d.size_delta),
                d.path,
                format_size(d.size_a),
                format_size(d.size_b)
            );
        }
    }

    let extensions = result.sorted_extension_delta();
    if !extensions.is_empty() {
        let _ = writeln!(out, "\n扩展名数量变化:");
        for (ext, delta) in extensions {
            let _ = writeln!(out, "  {:<12} {:+}", ext, delta);
        }
    }
    out
}

pub fn summary_report(summary: &ReplicationSummary, dry_run: bool) -> String {
    let mut out = String::new();
    let title = if dry_run { "复制演练结果" } else { "复制结果" };
    let _ = writeln!(out, "== {} ==", title);
    let _ = writeln!(out, "复制文件:   {}", summary.copied_files);
    let _ = writeln!(out, "替换文件:   {}", summary.replaced_files);
    let _ = writeln!(out, "跳过文件:   {}", summary.skipped_files);
    let _ = writeln!(out, "新建文件夹: {}", summary.copied_folders);
    let _ = writeln!(out, "复制数据:   {}", format_size(summary.total_copied_bytes));
    let _ = writeln!(out, "处理条目:   {}", summary.items_processed);
    let _ = writeln!(out, "错误:       {}", summary.errors);
    if summary.halted {
        let _ = writeln!(out, "已达到条目上限，使用 --resume 继续");
    }
    if summary.cancelled {
        let _ = writeln!(out, "已取消，使用 --resume 继续");
    }
    out
}
