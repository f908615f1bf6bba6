//! 撤销日志
//!
//! 每个被整理的目录一个 JSON 文件，只保存最近一次整理会话。
//! 新会话在写入第一条记录时覆盖旧日志；完全撤销且没有错误后删除日志。

use crate::core::fsops;
use crate::core::models::{MoveRecord, TransferMode};
use crate::storage::database::TagStore;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// 撤销日志文件名（位于被整理目录下）
pub const UNDO_LOG_FILE: &str = ".sortkeeper-undo.json";

/// 一次整理会话的撤销日志
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoLog {
    /// 会话ID
    pub session_id: String,
    /// 被整理的目录
    pub folder: PathBuf,
    /// 会话模式：只包含复制记录的会话为 copy，不可撤销
    pub mode: TransferMode,
    /// 会话开始时间
    pub created_at: DateTime<Utc>,
    /// 按完成顺序排列的记录
    pub records: Vec<MoveRecord>,
}

impl UndoLog {
    pub fn new(folder: &Path, mode: TransferMode) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            folder: folder.to_path_buf(),
            mode,
            created_at: Utc::now(),
            records: Vec::new(),
        }
    }

    /// 日志文件路径
    pub fn path_for(folder: &Path) -> PathBuf {
        folder.join(UNDO_LOG_FILE)
    }

    /// 读取目录的撤销日志，不存在时返回 None
    pub fn load(folder: &Path) -> Result<Option<Self>> {
        let path = Self::path_for(folder);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// 写入日志文件
    pub fn save(&self) -> Result<()> {
        fs::create_dir_all(&self.folder)?;
        let content = serde_json::to_string_pretty(self)?;
        fs::write(Self::path_for(&self.folder), content)?;
        Ok(())
    }

    /// 删除目录的撤销日志
    pub fn delete(folder: &Path) -> Result<()> {
        let path = Self::path_for(folder);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    /// 是否还有可撤销的内容
    pub fn is_undoable(&self) -> bool {
        self.mode == TransferMode::Move && !self.records.is_empty()
    }
}

/// 正在进行的整理会话
///
/// 第一条记录到来时才创建日志并覆盖旧日志，没有任何操作的会话
/// （例如重复执行整理）不会抹掉上一次的撤销信息。
pub struct UndoSession {
    folder: PathBuf,
    mode: TransferMode,
    log: Mutex<Option<UndoLog>>,
}

impl UndoSession {
    pub fn new(folder: &Path, mode: TransferMode) -> Self {
        Self {
            folder: folder.to_path_buf(),
            mode,
            log: Mutex::new(None),
        }
    }

    /// 追加一条记录并立即落盘
    pub fn append(&self, record: MoveRecord) -> Result<()> {
        let mut guard = self.log.lock().unwrap_or_else(|e| e.into_inner());
        let log = guard.get_or_insert_with(|| {
            let log = UndoLog::new(&self.folder, self.mode);
            tracing::debug!("开始新的撤销会话 {}: {}", log.session_id, self.folder.display());
            log
        });
        // 会话中只要有一次移动，就必须能撤销
        if record.mode == TransferMode::Move {
            log.mode = TransferMode::Move;
        }
        log.records.push(record);
        log.save()
    }

    /// 已记录的条数
    pub fn len(&self) -> usize {
        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map_or(0, |log| log.records.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 会话ID（尚未记录任何操作时为 None）
    pub fn session_id(&self) -> Option<String> {
        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|log| log.session_id.clone())
    }
}

/// 撤销结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UndoReport {
    /// 移回原位置的文件数
    pub restored_count: usize,
    /// 删除的副本数
    pub removed_copies: usize,
    /// 目标已不存在而跳过的记录数
    pub skipped_missing: usize,
    /// 整理时创建、现在已有其他内容而保留的目录数
    pub kept_dirs: usize,
    /// 错误信息
    pub errors: Vec<String>,
    /// 没有可撤销的内容（无日志或复制模式会话）
    pub nothing_to_undo: bool,
}

impl UndoReport {
    /// 是否全部成功
    pub fn is_all_successful(&self) -> bool {
        self.errors.is_empty()
    }

    /// 获取摘要
    pub fn summary(&self) -> String {
        if self.nothing_to_undo {
            return "没有可撤销的操作".to_string();
        }
        let mut summary = format!(
            "已恢复: {}, 删除副本: {}, 跳过: {}, 失败: {}",
            self.restored_count,
            self.removed_copies,
            self.skipped_missing,
            self.errors.len()
        );
        if self.kept_dirs > 0 {
            summary.push_str(&format!(", 保留目录: {}", self.kept_dirs));
        }
        summary
    }
}

/// 撤销目录最近一次整理会话
pub fn undo_last_session(folder: &Path) -> Result<UndoReport> {
    undo_with_store(folder, None)
}

/// 撤销最近一次会话，并让标签记录跟随文件回到原路径
pub fn undo_with_store(folder: &Path, store: Option<&TagStore>) -> Result<UndoReport> {
    let mut report = UndoReport::default();

    let log = match UndoLog::load(folder)? {
        Some(log) => log,
        None => {
            report.nothing_to_undo = true;
            return Ok(report);
        }
    };
    if !log.is_undoable() {
        tracing::info!("{} 的上次整理为复制模式，原文件均在，无需撤销", folder.display());
        report.nothing_to_undo = true;
        return Ok(report);
    }

    // 逆序回滚
    for record in log.records.iter().rev() {
        if !record.dst.exists() {
            tracing::warn!("目标已不存在，跳过: {}", record.dst.display());
            report.skipped_missing += 1;
            continue;
        }

        match record.mode {
            TransferMode::Move => {
                if record.src.exists() {
                    report
                        .errors
                        .push(format!("原位置已被占用: {}", record.src.display()));
                    continue;
                }
                match fsops::move_file(&record.dst, &record.src) {
                    Ok(()) => {
                        if let Some(store) = store {
                            if let Err(e) = store.rename_path(&record.dst, &record.src) {
                                tracing::warn!("更新标签记录路径失败: {}", e);
                            }
                        }
                        tracing::info!("已回滚: {} -> {}", record.dst.display(), record.src.display());
                        report.restored_count += 1;
                    }
                    Err(e) => {
                        report
                            .errors
                            .push(format!("回滚 {} 失败: {:#}", record.dst.display(), e));
                        continue;
                    }
                }
            }
            // 整理时创建的目录只在为空时删除
            TransferMode::Copy if record.dst.is_dir() => match fs::remove_dir(&record.dst) {
                Ok(()) => {
                    tracing::info!("已删除目录: {}", record.dst.display());
                    report.removed_copies += 1;
                }
                Err(e) => {
                    tracing::warn!("目录 {} 非空，保留: {}", record.dst.display(), e);
                    report.kept_dirs += 1;
                    continue;
                }
            },
            TransferMode::Copy => match fs::remove_file(&record.dst) {
                Ok(()) => {
                    tracing::info!("已删除副本: {}", record.dst.display());
                    report.removed_copies += 1;
                }
                Err(e) => {
                    report
                        .errors
                        .push(format!("删除副本 {} 失败: {}", record.dst.display(), e));
                    continue;
                }
            },
        }

        // 清理整理时创建、现已为空的目录
        if let Some(parent) = record.dst.parent() {
            fsops::remove_empty_dirs(parent, folder);
        }
    }

    if report.errors.is_empty() {
        UndoLog::delete(folder)?;
    }

    tracing::info!("撤销完成: {}", report.summary());
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn moved(folder: &Path, name: &str, category: &str) -> MoveRecord {
        let src = folder.join(name);
        let dst = folder.join(category).join(name);
        fs::write(&src, name).unwrap();
        fsops::move_file(&src, &dst).unwrap();
        MoveRecord::new(src, dst, TransferMode::Move)
    }

    #[test]
    fn test_session_is_lazy() {
        let dir = tempdir().unwrap();
        let previous = UndoLog::new(dir.path(), TransferMode::Move);
        previous.save().unwrap();

        // 没有任何记录的会话不覆盖旧日志
        let session = UndoSession::new(dir.path(), TransferMode::Move);
        assert!(session.is_empty());
        let loaded = UndoLog::load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.session_id, previous.session_id);

        session.append(moved(dir.path(), "a.pdf", "PDF")).unwrap();
        let loaded = UndoLog::load(dir.path()).unwrap().unwrap();
        assert_ne!(loaded.session_id, previous.session_id);
        assert_eq!(loaded.records.len(), 1);
    }

    #[test]
    fn test_undo_restores_in_reverse_order() {
        let dir = tempdir().unwrap();
        let session = UndoSession::new(dir.path(), TransferMode::Move);
        session.append(moved(dir.path(), "a.pdf", "PDF")).unwrap();
        session.append(moved(dir.path(), "b.jpg", "Images")).unwrap();

        let report = undo_last_session(dir.path()).unwrap();

        assert_eq!(report.restored_count, 2);
        assert!(report.is_all_successful());
        assert!(dir.path().join("a.pdf").exists());
        assert!(dir.path().join("b.jpg").exists());
        assert!(!dir.path().join("PDF").exists());
        assert!(!dir.path().join("Images").exists());
        assert!(!UndoLog::path_for(dir.path()).exists());
    }

    #[test]
    fn test_missing_destination_is_skipped() {
        let dir = tempdir().unwrap();
        let session = UndoSession::new(dir.path(), TransferMode::Move);
        let record = moved(dir.path(), "a.pdf", "PDF");
        fs::remove_file(&record.dst).unwrap();
        session.append(record).unwrap();

        let report = undo_last_session(dir.path()).unwrap();
        assert_eq!(report.skipped_missing, 1);
        assert_eq!(report.restored_count, 0);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn test_occupied_source_is_an_error() {
        let dir = tempdir().unwrap();
        let session = UndoSession::new(dir.path(), TransferMode::Move);
        session.append(moved(dir.path(), "a.pdf", "PDF")).unwrap();
        fs::write(dir.path().join("a.pdf"), "someone else").unwrap();

        let report = undo_last_session(dir.path()).unwrap();
        assert_eq!(report.errors.len(), 1);
        assert!(dir.path().join("PDF").join("a.pdf").exists());
        // 有错误时保留日志
        assert!(UndoLog::path_for(dir.path()).exists());
    }

    #[test]
    fn test_copy_session_has_nothing_to_undo() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("a.pdf");
        let dst = dir.path().join("PDF").join("a.pdf");
        fs::write(&src, "x").unwrap();
        fsops::copy_file(&src, &dst).unwrap();

        let session = UndoSession::new(dir.path(), TransferMode::Copy);
        session
            .append(MoveRecord::new(src.clone(), dst.clone(), TransferMode::Copy))
            .unwrap();

        let report = undo_last_session(dir.path()).unwrap();
        assert!(report.nothing_to_undo);
        assert!(src.exists());
        assert!(dst.exists());
    }

    #[test]
    fn test_copy_inside_move_session_is_removed() {
        let dir = tempdir().unwrap();
        let session = UndoSession::new(dir.path(), TransferMode::Move);
        let src = dir.path().join("keep.txt");
        let copy = dir.path().join("Backup").join("keep.txt");
        fs::write(&src, "x").unwrap();
        fsops::copy_file(&src, &copy).unwrap();
        session
            .append(MoveRecord::new(src.clone(), copy.clone(), TransferMode::Copy))
            .unwrap();
        session.append(moved(dir.path(), "a.pdf", "PDF")).unwrap();

        let report = undo_last_session(dir.path()).unwrap();
        assert_eq!(report.removed_copies, 1);
        assert_eq!(report.restored_count, 1);
        assert!(src.exists());
        assert!(!dir.path().join("Backup").exists());
    }

    #[test]
    fn test_created_folder_is_removed_only_when_empty() {
        let dir = tempdir().unwrap();
        let trigger = dir.path().join("a.txt");
        fs::write(&trigger, "x").unwrap();
        let empty = dir.path().join("Projects").join("txt");
        let used = dir.path().join("Drafts");
        fs::create_dir_all(&empty).unwrap();
        fs::create_dir_all(&used).unwrap();

        let session = UndoSession::new(dir.path(), TransferMode::Move);
        for created in [&empty, &used] {
            session
                .append(MoveRecord::new(trigger.clone(), created.clone(), TransferMode::Copy))
                .unwrap();
        }
        fs::write(used.join("mine.txt"), "user data").unwrap();

        let report = undo_last_session(dir.path()).unwrap();
        assert!(report.is_all_successful());
        assert_eq!(report.kept_dirs, 1);
        assert!(!dir.path().join("Projects").exists());
        assert!(used.join("mine.txt").exists());
        assert!(trigger.exists());
    }

    #[test]
    fn test_no_log() {
        let dir = tempdir().unwrap();
        let report = undo_last_session(dir.path()).unwrap();
        assert!(report.nothing_to_undo);
        assert_eq!(report.summary(), "没有可撤销的操作");
    }
}
