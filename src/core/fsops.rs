//! 文件系统操作辅助函数

use crate::core::{hashing, naming};
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// 移动文件，跨分区时退化为复制后删除
pub fn move_file(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    if to.exists() {
        return Err(anyhow::anyhow!("目标文件已存在: {}", to.display()));
    }

    if let Err(rename_err) = fs::rename(from, to) {
        if !from.exists() {
            return Err(rename_err).context(format!("源文件不存在: {}", from.display()));
        }
        copy_file(from, to).with_context(|| format!("移动失败: {}", rename_err))?;
        fs::remove_file(from)?;
    }
    Ok(())
}

/// 复制文件并保留修改时间
pub fn copy_file(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    if to.exists() {
        return Err(anyhow::anyhow!("目标文件已存在: {}", to.display()));
    }

    fs::copy(from, to)?;
    let metadata = fs::metadata(from)?;
    let mtime = filetime::FileTime::from_last_modification_time(&metadata);
    filetime::set_file_mtime(to, mtime)?;
    Ok(())
}

/// 在目标目录里找内容与 `src` 相同的副本（`name`、`name_1` ... 依次检查，遇到空位停止）
pub fn find_identical(src: &Path, dir: &Path, file_name: &str) -> Option<PathBuf> {
    for n in 0.. {
        let candidate = dir.join(naming::suffixed_name(file_name, n));
        if !candidate.exists() {
            return None;
        }
        if candidate != src && matches!(hashing::same_content(src, &candidate), Ok(true)) {
            return Some(candidate);
        }
    }
    None
}

/// 自下而上删除空目录，直到 `stop_at`（不含）
pub fn remove_empty_dirs(start: &Path, stop_at: &Path) {
    let mut current = Some(start);
    while let Some(dir) = current {
        if dir == stop_at || !dir.starts_with(stop_at) {
            break;
        }
        // 目录非空时删除失败，正好停止
        if fs::remove_dir(dir).is_err() {
            break;
        }
        current = dir.parent();
    }
}
