//! 冲突规避命名
//!
//! 目标路径已存在（或已被同批次的其他文件占用）时依次尝试
//! `name_1.ext`、`name_2.ext` …，保证永远不会覆盖已有文件。

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// 生成带数字后缀的文件名，`n == 0` 时返回原名
pub fn suffixed_name(file_name: &str, n: u32) -> String {
    if n == 0 {
        return file_name.to_string();
    }
    match file_name.rfind('.') {
        Some(idx) if idx > 0 => format!("{}_{}{}", &file_name[..idx], n, &file_name[idx..]),
        _ => format!("{}_{}", file_name, n),
    }
}

/// 认领结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    /// 最终使用的路径
    pub path: PathBuf,
    /// 是否因为冲突而改了名
    pub collided: bool,
}

/// 一个批次内已被认领的目标路径
///
/// Dry Run 不会真正创建文件，只能靠这张表让预览和实际执行得出相同的命名。
#[derive(Debug, Default)]
pub struct PathReservations {
    claimed: Mutex<HashSet<PathBuf>>,
}

impl PathReservations {
    pub fn new() -> Self {
        Self::default()
    }

    /// 在 `dir` 中为 `file_name` 找一个空闲的名字并占用它
    pub fn claim(&self, dir: &Path, file_name: &str) -> Claim {
        let mut claimed = self.claimed.lock().unwrap_or_else(|e| e.into_inner());
        let mut n = 0;
        loop {
            let candidate = dir.join(suffixed_name(file_name, n));
            if !candidate.exists() && !claimed.contains(&candidate) {
                claimed.insert(candidate.clone());
                if n > 0 {
                    tracing::info!("目标已存在，改名以避免覆盖: {}", candidate.display());
                }
                return Claim {
                    path: candidate,
                    collided: n > 0,
                };
            }
            n += 1;
        }
    }

    /// 已认领的数量
    pub fn len(&self) -> usize {
        self.claimed.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
