//! 核心数据模型定义
//!
//! 文件快照、运行配置、移动记录以及应用配置。
//! 规则、条件、动作的模型分别位于 `rule`、`condition`、`action` 模块。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 文件描述符 - 核心数据结构
/// 某一时刻单个文件的不可变快照，每次评估前重新创建
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// 绝对路径
    pub full_path: PathBuf,
    /// 文件名（含扩展名）
    pub name: String,
    /// 文件名（不含扩展名）
    pub stem: String,
    /// 扩展名，小写并带点（如 ".pdf"），没有扩展名时为空
    pub extension: String,
    /// 文件大小（字节）
    pub size: u64,
    /// 创建时间（部分文件系统不提供）
    pub created_at: Option<DateTime<Utc>>,
    /// 最后修改时间
    pub modified_at: DateTime<Utc>,
    /// 是否为隐藏文件
    pub is_hidden: bool,
    /// 是否只读
    pub is_read_only: bool,
    /// 是否为目录
    pub is_directory: bool,
}

impl FileDescriptor {
    /// 创建新的文件描述符（不访问文件系统）
    pub fn new(full_path: PathBuf, size: u64, modified_at: DateTime<Utc>, is_directory: bool) -> Self {
        let (name, stem, extension) = split_name(&full_path, is_directory);
        let is_hidden = name.starts_with('.');

        Self {
            full_path,
            name,
            stem,
            extension,
            size,
            created_at: None,
            modified_at,
            is_hidden,
            is_read_only: false,
            is_directory,
        }
    }

    /// 从磁盘读取文件的当前状态
    pub fn from_path(path: &Path) -> io::Result<Self> {
        let full_path = std::path::absolute(path)?;
        let metadata = fs::metadata(&full_path)?;
        let is_directory = metadata.is_dir();
        let (name, stem, extension) = split_name(&full_path, is_directory);

        let modified_at = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        let created_at = metadata.created().ok().map(DateTime::<Utc>::from);
        let is_hidden = name.starts_with('.') || has_hidden_attribute(&metadata);

        Ok(Self {
            full_path,
            name,
            stem,
            extension,
            size: if is_directory { 0 } else { metadata.len() },
            created_at,
            modified_at,
            is_hidden,
            is_read_only: metadata.permissions().readonly(),
            is_directory,
        })
    }

    /// 生成指向新路径的描述符，其余属性保持不变
    ///
    /// Dry Run 模式下文件不会真正移动，后续动作基于这个"虚拟"描述符继续推演。
    pub fn relocated(&self, new_path: &Path) -> Self {
        let (name, stem, extension) = split_name(new_path, self.is_directory);
        Self {
            full_path: new_path.to_path_buf(),
            is_hidden: self.is_hidden || name.starts_with('.'),
            name,
            stem,
            extension,
            ..self.clone()
        }
    }

    /// 父目录
    pub fn parent_dir(&self) -> &Path {
        self.full_path.parent().unwrap_or(&self.full_path)
    }
}

fn split_name(path: &Path, is_directory: bool) -> (String, String, String) {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    if is_directory {
        return (name.clone(), name, String::new());
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| name.clone());
    let extension = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default();

    (name, stem, extension)
}

#[cfg(windows)]
fn has_hidden_attribute(metadata: &fs::Metadata) -> bool {
    use std::os::windows::fs::MetadataExt;
    const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;
    metadata.file_attributes() & FILE_ATTRIBUTE_HIDDEN != 0
}

#[cfg(not(windows))]
fn has_hidden_attribute(_metadata: &fs::Metadata) -> bool {
    false
}

/// 单次运行的配置，运行期间不可变
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// 安全模式：禁止任何删除类动作
    pub safe_mode: bool,
    /// Dry Run：只计算结果，不修改文件系统
    pub dry_run: bool,
    /// 跳过隐藏文件
    pub skip_hidden: bool,
    /// 没有规则匹配时回退到按类别整理
    pub fallback_to_category_sort_on_rule_failure: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            safe_mode: false,
            dry_run: false,
            skip_hidden: true,
            fallback_to_category_sort_on_rule_failure: true,
        }
    }
}

impl RunConfig {
    /// 同一配置的 Dry Run 版本
    pub fn as_dry_run(&self) -> Self {
        Self {
            dry_run: true,
            ..*self
        }
    }
}

/// 文件传输方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    /// 移动（原文件消失）
    #[default]
    Move,
    /// 复制（保留原文件）
    Copy,
}

impl std::fmt::Display for TransferMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferMode::Move => write!(f, "move"),
            TransferMode::Copy => write!(f, "copy"),
        }
    }
}

/// 撤销日志中的一条记录
/// 只有在物理操作成功之后才会创建
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRecord {
    /// 源路径
    pub src: PathBuf,
    /// 目标路径
    pub dst: PathBuf,
    /// 移动或复制
    pub mode: TransferMode,
    /// 完成时间
    pub timestamp: DateTime<Utc>,
}

impl MoveRecord {
    pub fn new(src: PathBuf, dst: PathBuf, mode: TransferMode) -> Self {
        Self {
            src,
            dst,
            mode,
            timestamp: Utc::now(),
        }
    }
}

/// 目录监听配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchSettings {
    /// 事件队列容量
    pub queue_capacity: usize,
    /// 两次读取文件大小之间的间隔（毫秒）
    pub stability_interval_ms: u64,
    /// 稳定性检查的最大次数
    pub stability_attempts: u32,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            stability_interval_ms: 1000,
            stability_attempts: 10,
        }
    }
}

impl WatchSettings {
    pub fn stability_interval(&self) -> Duration {
        Duration::from_millis(self.stability_interval_ms)
    }
}

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 标签数据库路径（为空时使用默认数据目录）
    pub database_path: Option<PathBuf>,
    /// 回收站目录（为空时使用默认数据目录）
    pub trash_dir: Option<PathBuf>,
    /// 规则配置文件
    pub profile_path: Option<PathBuf>,
    /// 批量处理的并行线程数（1 表示顺序处理）
    pub workers: usize,
    /// 按类别整理时使用移动还是复制
    pub transfer_mode: TransferMode,
    /// 扫描时是否包含子目录
    pub include_subfolders: bool,
    /// 默认运行配置
    pub run_defaults: RunConfig,
    /// 目录监听配置
    pub watch: WatchSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            trash_dir: None,
            profile_path: None,
            workers: 1,
            transfer_mode: TransferMode::Move,
            include_subfolders: false,
            run_defaults: RunConfig::default(),
            watch: WatchSettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_descriptor_from_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Report.PDF");
        fs::write(&path, vec![0u8; 2048]).unwrap();

        let file = FileDescriptor::from_path(&path).unwrap();
        assert_eq!(file.name, "Report.PDF");
        assert_eq!(file.stem, "Report");
        assert_eq!(file.extension, ".pdf");
        assert_eq!(file.size, 2048);
        assert!(!file.is_directory);
        assert!(!file.is_hidden);
    }

    #[test]
    fn test_relocated_keeps_metadata() {
        let file = FileDescriptor::new(PathBuf::from("/in/a.txt"), 10, Utc::now(), false);
        let moved = file.relocated(Path::new("/out/Docs/b.md"));

        assert_eq!(moved.name, "b.md");
        assert_eq!(moved.extension, ".md");
        assert_eq!(moved.size, 10);
        assert_eq!(moved.modified_at, file.modified_at);
        assert_eq!(moved.parent_dir(), Path::new("/out/Docs"));
    }

    #[test]
    fn test_dotfile_has_no_extension() {
        let file = FileDescriptor::new(PathBuf::from("/in/.bashrc"), 1, Utc::now(), false);
        assert!(file.is_hidden);
        assert_eq!(file.extension, "");
        assert_eq!(file.stem, ".bashrc");
    }
}
