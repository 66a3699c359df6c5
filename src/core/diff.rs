//! 两次扫描结果的比较

use crate::core::scanner::ScanStats;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

/// 视图列表的长度上限
pub const DIFF_VIEW_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffEntry {
    pub path: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SizeDifference {
    pub path: String,
    pub size_a: u64,
    pub size_b: u64,
    /// size_b - size_a
    pub size_delta: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DiffResult {
    /// 按大小降序
    pub only_in_a: Vec<DiffEntry>,
    pub only_in_b: Vec<DiffEntry>,
    /// 按路径排序
    pub identical: Vec<String>,
    /// 按 |size_delta| 降序
    pub different: Vec<SizeDifference>,
    /// 扩展名数量差 (b - a)
    pub extension_delta: HashMap<String, i64>,
    pub total_files_delta: i64,
    pub total_folders_delta: i64,
    pub total_size_delta: i64,
}

impl DiffResult {
    pub fn largest_only_in_a(&self) -> &[DiffEntry] {
        &self.only_in_a[..self.only_in_a.len().min(DIFF_VIEW_LIMIT)]
    }

    pub fn largest_only_in_b(&self) -> &[DiffEntry] {
        &self.only_in_b[..self.only_in_b.len().min(DIFF_VIEW_LIMIT)]
    }

    pub fn largest_different(&self) -> &[SizeDifference] {
        &self.different[..self.different.len().min(DIFF_VIEW_LIMIT)]
    }

    /// 相同文件占路径并集的百分比，并集为空时为 0
    pub fn match_percentage(&self) -> f64 {
        let total = self.identical.len()
            + self.only_in_a.len()
            + self.only_in_b.len()
            + self.different.len();
        if total == 0 {
            0.0
        } else {
            self.identical.len() as f64 / total as f64 * 100.0
        }
    }

    /// 扩展名差异，按绝对值降序，省略为 0 的项
    pub fn sorted_extension_delta(&self) -> Vec<(String, i64)> {
        let mut list: Vec<(String, i64)> = self
            .extension_delta
            .iter()
            .filter(|(_, d)| **d != 0)
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        list.sort_by(|a, b| b.1.abs().cmp(&a.1.abs()).then_with(|| a.0.cmp(&b.0)));
        list
    }
}

fn signed_delta(a: u64, b: u64) -> i64 {
    b as i64 - a as i64
}

/// 比较两次扫描
pub fn diff(a: &ScanStats, b: &ScanStats) -> DiffResult {
    let mut result = DiffResult::default();

    let paths: BTreeSet<&String> = a.file_index.keys().chain(b.file_index.keys()).collect();
    for path in paths {
        match (a.file_index.get(path), b.file_index.get(path)) {
            (Some(fa), Some(fb)) => {
                let checksums_agree = match (&fa.checksum, &fb.checksum) {
                    (Some(ca), Some(cb)) => ca == cb,
                    _ => true,
                };
                if fa.size == fb.size && checksums_agree {
                    result.identical.push(path.clone());
                } else {
                    result.different.push(SizeDifference {
                        path: path.clone(),
                        size_a: fa.size,
                        size_b: fb.size,
                        size_delta: signed_delta(fa.size, fb.size),
                    });
                }
            }
            (Some(fa), None) => result.only_in_a.push(DiffEntry {
                path: path.clone(),
                size: fa.size,
            }),
            (None, Some(fb)) => result.only_in_b.push(DiffEntry {
                path: path.clone(),
                size: fb.size,
            }),
            (None, None) => {}
        }
    }

    // 路径已有序，稳定排序保证同大小时按路径
    result.only_in_a.sort_by(|x, y| y.size.cmp(&x.size));
    result.only_in_b.sort_by(|x, y| y.size.cmp(&x.size));
    result
        .different
        .sort_by(|x, y| y.size_delta.unsigned_abs().cmp(&x.size_delta.unsigned_abs()));

    let extensions: BTreeSet<&String> = a
        .extension_counts
        .keys()
        .chain(b.extension_counts.keys())
        .collect();
    for ext in extensions {
        let count_a = a.extension_counts.get(ext).copied().unwrap_or(0);
        let count_b = b.extension_counts.get(ext).copied().unwrap_or(0);
        result
            .extension_delta
            .insert(ext.clone(), signed_delta(count_a, count_b));
    }

    result.total_files_delta = signed_delta(a.total_files, b.total_files);
    result.total_folders_delta = signed_delta(a.total_folders, b.total_folders);
    result.total_size_delta = signed_delta(a.total_size_bytes, b.total_size_bytes);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::scanner::FileRecord;

    fn stats(files: &[(&str, u64, Option<&str>)], folders: u64) -> ScanStats {
        let mut s = ScanStats {
            total_folders: folders,
            ..Default::default()
        };
        for (path, size, checksum) in files {
            let name = path.rsplit('/').next().unwrap().to_string();
            let ext = crate::core::scanner::extension_of(&name);
            *s.extension_counts.entry(ext).or_insert(0) += 1;
            s.total_files += 1;
            s.total_size_bytes += size;
            s.file_index.insert(
                path.to_string(),
                FileRecord {
                    id: format!("id-{}", path),
                    name,
                    size: *size,
                    checksum: checksum.map(|c| c.to_string()),
                    parent_path: String::new(),
                },
            );
        }
        s
    }

    #[test]
    fn test_buckets() {
        let a = stats(
            &[
                ("same.txt", 10, Some("h1")),
                ("grown.log", 10, None),
                ("only_a.bin", 500, None),
                ("rewritten.txt", 4, Some("h2")),
                ("nosum.txt", 7, Some("h3")),
            ],
            2,
        );
        let b = stats(
            &[
                ("same.txt", 10, Some("h1")),
                ("grown.log", 25, None),
                ("only_b.jpg", 3, None),
                ("rewritten.txt", 4, Some("h9")),
                ("nosum.txt", 7, None),
            ],
            3,
        );

        let d = diff(&a, &b);
        assert_eq!(d.identical, vec!["nosum.txt".to_string(), "same.txt".to_string()]);
        assert_eq!(d.only_in_a[0].path, "only_a.bin");
        assert_eq!(d.only_in_b[0].path, "only_b.jpg");
        assert_eq!(d.different.len(), 2);
        assert_eq!(d.different[0].path, "grown.log");
        assert_eq!(d.different[0].size_delta, 15);
        assert_eq!(d.different[1].size_delta, 0);

        assert_eq!(d.extension_delta["bin"], -1);
        assert_eq!(d.extension_delta["jpg"], 1);
        assert_eq!(d.extension_delta["txt"], 0);
        assert_eq!(d.total_folders_delta, 1);
        assert_eq!(d.total_size_delta, 49 - 531);
        assert!((d.match_percentage() - 100.0 * 2.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_symmetry() {
        let a = stats(&[("x", 1, None), ("y", 2, None), ("z.md", 3, None)], 1);
        let b = stats(&[("y", 5, None), ("z.md", 3, None), ("w.md", 9, None)], 4);

        let ab = diff(&a, &b);
        let ba = diff(&b, &a);

        assert_eq!(ab.only_in_a, ba.only_in_b);
        assert_eq!(ab.only_in_b, ba.only_in_a);
        assert_eq!(ab.identical, ba.identical);
        assert_eq!(ab.different.len(), ba.different.len());
        for (x, y) in ab.different.iter().zip(&ba.different) {
            assert_eq!(x.path, y.path);
            assert_eq!(x.size_delta, -y.size_delta);
        }
        for (ext, delta) in &ab.extension_delta {
            assert_eq!(ba.extension_delta[ext], -delta);
        }
        assert_eq!(ab.total_files_delta, -ba.total_files_delta);
        assert_eq!(ab.match_percentage(), ba.match_percentage());
    }

    #[test]
    fn test_self_diff() {
        let a = stats(
            &[("a/x.txt", 1, Some("h1")), ("b.md", 0, None), ("c", 40, None)],
            2,
        );

        let d = diff(&a, &a);
        assert!(d.only_in_a.is_empty());
        assert!(d.only_in_b.is_empty());
        assert!(d.different.is_empty());
        assert_eq!(d.identical.len(), 3);
        assert_eq!(d.match_percentage(), 100.0);
        assert_eq!(d.total_size_delta, 0);
        assert!(d.sorted_extension_delta().is_empty());
    }

    #[test]
    fn test_empty_and_views() {
        let d = diff(&ScanStats::default(), &ScanStats::default());
        assert_eq!(d.match_percentage(), 0.0);
        assert!(d.largest_only_in_a().is_empty());

        let files: Vec<(String, u64)> = (0..15).map(|i| (format!("f{:02}", i), i as u64)).collect();
        let refs: Vec<(&str, u64, Option<&str>)> =
            files.iter().map(|(p, s)| (p.as_str(), *s, None)).collect();
        let d = diff(&stats(&refs, 0), &ScanStats::default());
        assert_eq!(d.only_in_a.len(), 15);
        assert_eq!(d.largest_only_in_a().len(), DIFF_VIEW_LIMIT);
        assert_eq!(d.largest_only_in_a()[0].size, 14);
        assert_eq!(d.match_percentage(), 0.0);
    }
}
