//! 移动计划生成器模块
//!
//! 为没有被规则处理的文件按类别生成 `root/类别/文件名` 的移动计划。
//! 目标已存在或已被本批次其他文件占用时追加数字后缀，保证不覆盖。
//! 目标与源相同的文件（已整理过）不出现在计划中。复制模式下原文件留在原处，
//! 类别目录里已有内容相同的副本（含带后缀的副本）时同样不再计划。
//! 只做读取检查，不创建目录、不修改任何文件。

use crate::core::category;
use crate::core::fsops;
use crate::core::models::{FileDescriptor, TransferMode};
use crate::core::naming::PathReservations;
use crate::core::rule::Profile;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 计划中的一次移动
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedMove {
    /// 源路径
    pub src: PathBuf,
    /// 目标路径
    pub dst: PathBuf,
    /// 类别名
    pub category: String,
}

/// 生成移动计划
pub fn plan(files: &[FileDescriptor], root: &Path, profile: &Profile) -> Vec<PlannedMove> {
    plan_with(files, root, profile, &PathReservations::new(), TransferMode::Move)
}

/// 使用外部传入的占用表生成计划（整理器在整个批次中共享同一张表）
pub fn plan_with(
    files: &[FileDescriptor],
    root: &Path,
    profile: &Profile,
    reservations: &PathReservations,
    mode: TransferMode,
) -> Vec<PlannedMove> {
    files
        .iter()
        .filter_map(|file| plan_one(file, root, profile, reservations, mode))
        .collect()
}

/// 为单个文件生成计划
pub fn plan_one(
    file: &FileDescriptor,
    root: &Path,
    profile: &Profile,
    reservations: &PathReservations,
    mode: TransferMode,
) -> Option<PlannedMove> {
    if file.is_directory {
        return None;
    }

    let category = category::resolve(file, profile);
    let dir = root.join(&category);
    if dir.join(&file.name) == file.full_path {
        return None;
    }
    if mode == TransferMode::Copy {
        if let Some(existing) = fsops::find_identical(&file.full_path, &dir, &file.name) {
            tracing::debug!("已有相同副本，跳过: {}", existing.display());
            return None;
        }
    }

    let claim = reservations.claim(&dir, &file.name);
    Some(PlannedMove {
        src: file.full_path.clone(),
        dst: claim.path,
        category,
    })
}

/// 计划统计信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanStats {
    /// 总操作数
    pub total_operations: usize,
    /// 总文件大小（字节）
    pub total_size: u64,
    /// 目标目录数
    pub target_directories: usize,
}

impl PlanStats {
    pub fn from_plan(moves: &[PlannedMove], files: &[FileDescriptor]) -> Self {
        let total_size = moves
            .iter()
            .filter_map(|m| files.iter().find(|f| f.full_path == m.src))
            .map(|f| f.size)
            .sum();
        let target_directories = moves
            .iter()
            .filter_map(|m| m.dst.parent())
            .collect::<std::collections::BTreeSet<_>>()
            .len();

        Self {
            total_operations: moves.len(),
            total_size,
            target_directories,
        }
    }

    /// 格式化文件大小
    pub fn format_size(&self) -> String {
        let size = self.total_size as f64;
        if size < 1024.0 {
            format!("{} B", self.total_size)
        } else if size < 1024.0 * 1024.0 {
            format!("{:.2} KB", size / 1024.0)
        } else if size < 1024.0 * 1024.0 * 1024.0 {
            format!("{:.2} MB", size / (1024.0 * 1024.0))
        } else {
            format!("{:.2} GB", size / (1024.0 * 1024.0 * 1024.0))
        }
    }
}
