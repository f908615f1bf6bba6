//! 路径/文件名模板
//!
//! 支持的变量：`{name}` `{ext}` `{extension}` `{year}` `{month}` `{day}`
//! `{date}` `{parent}` `{path}`。日期取自文件修改时间，同一文件渲染结果稳定。

use crate::core::models::FileDescriptor;
use std::path::{Path, PathBuf};

/// 用文件信息渲染模板
pub fn render(template: &str, file: &FileDescriptor) -> String {
    let parent = file
        .parent_dir()
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    template
        .replace("{name}", &file.stem)
        .replace("{extension}", file.extension.trim_start_matches('.'))
        .replace("{ext}", &file.extension)
        .replace("{year}", &file.modified_at.format("%Y").to_string())
        .replace("{month}", &file.modified_at.format("%m").to_string())
        .replace("{day}", &file.modified_at.format("%d").to_string())
        .replace("{date}", &file.modified_at.format("%Y-%m-%d").to_string())
        .replace("{parent}", &parent)
        .replace("{path}", &file.full_path.to_string_lossy())
}

/// 渲染目标目录，相对路径基于整理根目录
pub fn resolve_dir(template: &str, file: &FileDescriptor, root: &Path) -> PathBuf {
    let rendered = PathBuf::from(render(template, file));
    if rendered.is_absolute() {
        rendered
    } else {
        root.join(rendered)
    }
}
