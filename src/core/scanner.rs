//! 文件扫描模块
//!
//! 扫描待整理目录，生成有序、去重的 FileDescriptor 列表。
//! 已经位于类别子目录中的文件、撤销日志以及回收站不会被扫描到。
//! 此模块只做IO操作，不做任何分类判断。

use crate::core::models::FileDescriptor;
use crate::core::undo::UNDO_LOG_FILE;
use anyhow::Result;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// 文件扫描器
pub struct FileScanner {
    /// 扫描根路径
    root_path: PathBuf,
    /// 是否递归子目录
    include_subfolders: bool,
    /// 是否跳过隐藏文件
    skip_hidden: bool,
    /// 排除的目录名称（类别目录等，只在根目录下生效）
    exclude_dirs: BTreeSet<String>,
    /// 额外排除的绝对路径（回收站等）
    exclude_paths: Vec<PathBuf>,
}

impl FileScanner {
    /// 创建新的扫描器
    pub fn new(root_path: PathBuf) -> Self {
        Self {
            root_path: std::path::absolute(&root_path).unwrap_or(root_path),
            include_subfolders: false,
            skip_hidden: true,
            exclude_dirs: BTreeSet::new(),
            exclude_paths: Vec::new(),
        }
    }

    /// 设置是否递归子目录
    pub fn include_subfolders(mut self, include: bool) -> Self {
        self.include_subfolders = include;
        self
    }

    /// 设置是否跳过隐藏文件
    pub fn skip_hidden(mut self, skip: bool) -> Self {
        self.skip_hidden = skip;
        self
    }

    /// 排除根目录下的这些子目录（通常是类别目录）
    pub fn exclude_dirs<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_dirs
            .extend(names.into_iter().map(|n| n.into().to_lowercase()));
        self
    }

    /// 排除某个绝对路径及其下所有内容
    pub fn exclude_path(mut self, path: PathBuf) -> Self {
        self.exclude_paths.push(path);
        self
    }

    /// 执行扫描
    pub fn scan(&self) -> Result<Vec<FileDescriptor>> {
        let max_depth = if self.include_subfolders { usize::MAX } else { 1 };
        let mut seen = BTreeSet::new();
        let mut files = Vec::new();

        let walker = WalkDir::new(&self.root_path)
            .max_depth(max_depth)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| self.should_descend(e));

        for entry in walker {
            match entry {
                Ok(entry) => {
                    if !entry.file_type().is_file() || !seen.insert(entry.path().to_path_buf()) {
                        continue;
                    }
                    if !self.accepts(entry.path()) {
                        continue;
                    }
                    match FileDescriptor::from_path(entry.path()) {
                        Ok(descriptor) => {
                            if self.skip_hidden && descriptor.is_hidden {
                                continue;
                            }
                            files.push(descriptor);
                        }
                        Err(e) => tracing::warn!("读取文件信息失败 {}: {}", entry.path().display(), e),
                    }
                }
                Err(e) => {
                    tracing::warn!("扫描文件时出错: {}", e);
                }
            }
        }

        tracing::info!("扫描完成，共发现 {} 个文件", files.len());
        Ok(files)
    }

    /// 判断单个路径是否属于待整理范围（目录监听也用这个判断）
    pub fn accepts(&self, path: &Path) -> bool {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        if name == UNDO_LOG_FILE {
            return false;
        }
        if self.skip_hidden && name.starts_with('.') {
            return false;
        }
        if self.exclude_paths.iter().any(|p| path.starts_with(p)) {
            return false;
        }

        let relative = match path.strip_prefix(&self.root_path) {
            Ok(relative) => relative,
            Err(_) => return false,
        };
        let depth = relative.components().count();
        if depth == 0 || (!self.include_subfolders && depth > 1) {
            return false;
        }

        // 已位于类别目录中的文件视为已整理
        if depth > 1 {
            if let Some(first) = relative.components().next() {
                let first = first.as_os_str().to_string_lossy().to_lowercase();
                if self.exclude_dirs.contains(&first) {
                    return false;
                }
            }
        }

        true
    }

    /// 判断是否应该进入此目录
    fn should_descend(&self, entry: &walkdir::DirEntry) -> bool {
        // 根目录必须允许遍历，否则 filter_entry 会直接阻止深入扫描
        if entry.path() == self.root_path {
            return true;
        }
        if !entry.file_type().is_dir() {
            return true;
        }

        let name = entry.file_name().to_string_lossy();
        if self.skip_hidden && name.starts_with('.') {
            return false;
        }
        if self.exclude_paths.iter().any(|p| entry.path().starts_with(p)) {
            return false;
        }
        if entry.depth() == 1 && self.exclude_dirs.contains(&name.to_lowercase()) {
            return false;
        }

        true
    }
}

/// 辅助函数：读取文件开头的文本内容（按 UTF-8 宽松解码）
pub fn read_text_prefix(path: &Path, max_bytes: u64) -> Result<String> {
    let file = File::open(path)?;
    let mut buf = Vec::new();
    file.take(max_bytes).read_to_end(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// 辅助函数：获取文件类型（基于magic number）
pub fn detect_file_type(path: &Path) -> Option<String> {
    infer::get_from_path(path)
        .ok()
        .flatten()
        .map(|t| t.mime_type().to_string())
}
