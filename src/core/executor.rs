//! 执行器模块（整理器）
//!
//! 一个批次分三个阶段：
//! 1. 每个文件先经过规则引擎
//! 2. 没有被任何规则处理的文件交给移动计划生成器按类别整理
//! 3. 执行计划中的移动（复制模式下为复制）
//!
//! 设计原则：
//! - 预览和执行走同一条路径，预览只是强制 Dry Run
//! - 所有完成的移动/复制都写入撤销日志
//! - 单个文件的失败不影响其他文件

use crate::core::action::{ActionContext, ActionStatus};
use crate::core::activity::{ActivitySink, TracingSink};
use crate::core::error::EngineResult;
use crate::core::fsops;
use crate::core::models::{FileDescriptor, MoveRecord, RunConfig, TransferMode};
use crate::core::naming::PathReservations;
use crate::core::pending::PendingChanges;
use crate::core::planner::{self, PlannedMove};
use crate::core::rule::Profile;
use crate::core::rule_engine::{self, RuleOutcome};
use crate::core::undo::UndoSession;
use crate::storage::database::TagStore;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// 整理器设置
#[derive(Debug, Clone)]
pub struct OrganizerSettings {
    /// 按类别整理时移动还是复制
    pub transfer_mode: TransferMode,
    /// 并行线程数（1 表示顺序处理）
    pub workers: usize,
    /// 回收站目录
    pub trash_dir: PathBuf,
}

impl OrganizerSettings {
    pub fn new(trash_dir: PathBuf) -> Self {
        Self {
            transfer_mode: TransferMode::Move,
            workers: 1,
            trash_dir,
        }
    }

    pub fn transfer_mode(mut self, mode: TransferMode) -> Self {
        self.transfer_mode = mode;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }
}

/// 预览结果（每个文件一条）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreviewEntry {
    pub src: PathBuf,
    /// 将要到达的位置，不移动时为 None
    pub dst: Option<PathBuf>,
    /// 按类别整理时的类别
    pub category: Option<String>,
    /// 匹配的规则
    pub rule_name: Option<String>,
    pub status: ActionStatus,
    pub log: Vec<String>,
}

/// 执行结果（每个文件一条）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplyEntry {
    pub src: PathBuf,
    pub dst: Option<PathBuf>,
    pub rule_name: Option<String>,
    pub status: ActionStatus,
    pub error: Option<String>,
}

/// 执行结果汇总
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionSummary {
    /// 成功数量
    pub successful: usize,
    /// 失败数量
    pub failed: usize,
    /// 跳过数量（含被安全模式拦截的）
    pub skipped: usize,
}

impl ExecutionSummary {
    pub fn from_entries(entries: &[ApplyEntry]) -> Self {
        let mut summary = Self::default();
        for entry in entries {
            match entry.status {
                ActionStatus::Applied | ActionStatus::WouldApply => summary.successful += 1,
                ActionStatus::Failed => summary.failed += 1,
                ActionStatus::SkippedIdempotent | ActionStatus::BlockedBySafeMode => {
                    summary.skipped += 1
                }
            }
        }
        summary
    }

    /// 是否全部成功
    pub fn is_all_successful(&self) -> bool {
        self.failed == 0
    }

    /// 获取摘要
    pub fn summary(&self) -> String {
        format!(
            "成功: {}, 失败: {}, 跳过: {}",
            self.successful, self.failed, self.skipped
        )
    }
}

/// 单个文件在批次中的完整结果
struct FileReport {
    src: PathBuf,
    rules: RuleOutcome,
    planned: Option<PlannedMove>,
    transfer_error: Option<String>,
}

impl FileReport {
    fn dst(&self) -> Option<PathBuf> {
        match &self.planned {
            Some(planned) => Some(planned.dst.clone()),
            None => self.rules.final_dst.clone(),
        }
    }

    fn status(&self, dry_run: bool) -> ActionStatus {
        if self.rules.handled {
            return self.rules.status();
        }
        match (&self.planned, &self.transfer_error) {
            (None, _) => ActionStatus::SkippedIdempotent,
            (Some(_), Some(_)) => ActionStatus::Failed,
            (Some(_), None) if dry_run => ActionStatus::WouldApply,
            (Some(_), None) => ActionStatus::Applied,
        }
    }

    fn error(&self) -> Option<String> {
        self.transfer_error
            .clone()
            .or_else(|| self.rules.error().map(str::to_string))
    }
}

/// 整理器
#[derive(Clone)]
pub struct Organizer {
    store: Arc<TagStore>,
    settings: OrganizerSettings,
    activity: Arc<dyn ActivitySink>,
}

impl Organizer {
    /// 创建整理器，活动日志默认写入 tracing
    pub fn new(store: Arc<TagStore>, settings: OrganizerSettings) -> Self {
        Self {
            store,
            settings,
            activity: Arc::new(TracingSink),
        }
    }

    /// 替换活动日志接收方
    pub fn with_activity(mut self, activity: Arc<dyn ActivitySink>) -> Self {
        self.activity = activity;
        self
    }

    pub fn settings(&self) -> &OrganizerSettings {
        &self.settings
    }

    pub fn store(&self) -> &TagStore {
        &self.store
    }

    /// 预览：强制 Dry Run，不修改任何文件
    pub fn preview(
        &self,
        root: &Path,
        files: &[FileDescriptor],
        profile: &Profile,
        config: &RunConfig,
    ) -> EngineResult<Vec<PreviewEntry>> {
        let config = config.as_dry_run();
        let reports = self.run_batch(root, files, profile, &config, None)?;

        Ok(reports
            .into_iter()
            .map(|report| {
                let mut log = report.rules.log.clone();
                if let Some(planned) = &report.planned {
                    log.push(format!(
                        "按类别 {} 整理: {} -> {}",
                        planned.category,
                        planned.src.display(),
                        planned.dst.display()
                    ));
                } else if !report.rules.handled {
                    log.push("没有需要执行的操作".to_string());
                }
                PreviewEntry {
                    dst: report.dst(),
                    category: report.planned.as_ref().map(|p| p.category.clone()),
                    rule_name: report.rules.matched_rule.clone(),
                    status: report.status(true),
                    src: report.src,
                    log,
                }
            })
            .collect())
    }

    /// 执行整理，开始一个新的撤销会话
    pub fn apply(
        &self,
        root: &Path,
        files: &[FileDescriptor],
        profile: &Profile,
        config: &RunConfig,
    ) -> EngineResult<Vec<ApplyEntry>> {
        let root = std::path::absolute(root)?;
        let session = UndoSession::new(&root, self.settings.transfer_mode);
        self.apply_in_session(&root, files, profile, config, &session)
    }

    /// 在已有的撤销会话中执行整理（目录监听时多个事件共用一个会话）
    pub fn apply_in_session(
        &self,
        root: &Path,
        files: &[FileDescriptor],
        profile: &Profile,
        config: &RunConfig,
        session: &UndoSession,
    ) -> EngineResult<Vec<ApplyEntry>> {
        let reports = self.run_batch(root, files, profile, config, Some(session))?;
        let entries: Vec<ApplyEntry> = reports
            .into_iter()
            .map(|report| ApplyEntry {
                dst: report.dst(),
                rule_name: report.rules.matched_rule.clone(),
                status: report.status(config.dry_run),
                error: report.error(),
                src: report.src,
            })
            .collect();

        tracing::info!("整理完成: {}", ExecutionSummary::from_entries(&entries).summary());
        Ok(entries)
    }

    fn run_batch(
        &self,
        root: &Path,
        files: &[FileDescriptor],
        profile: &Profile,
        config: &RunConfig,
        session: Option<&UndoSession>,
    ) -> EngineResult<Vec<FileReport>> {
        // 配置错误是唯一让整个批次失败的情况
        profile.validate()?;

        let root = std::path::absolute(root)?;
        let files: Vec<&FileDescriptor> = files
            .iter()
            .filter(|f| {
                let skip = config.skip_hidden && f.is_hidden;
                if skip {
                    tracing::debug!("跳过隐藏文件: {}", f.full_path.display());
                }
                !skip
            })
            .collect();

        let reservations = PathReservations::new();
        let pending = PendingChanges::new();
        let ctx = ActionContext {
            root: &root,
            config,
            store: &self.store,
            reservations: &reservations,
            pending: &pending,
            trash_dir: &self.settings.trash_dir,
        };

        // 阶段1：规则
        let outcomes: Vec<RuleOutcome> = self.run_parallel(&files, |file| {
            let outcome = rule_engine::execute(&profile.rules, file, &ctx);
            for line in &outcome.log {
                self.activity.record(&format!("{}: {}", file.name, line));
            }
            if let Some(session) = session {
                for record in &outcome.records {
                    self.record(session, record.clone());
                }
            }
            outcome
        });

        // 阶段2：按类别整理没有被规则处理的文件
        let planned = if config.fallback_to_category_sort_on_rule_failure {
            let unhandled: Vec<FileDescriptor> = files
                .iter()
                .zip(&outcomes)
                .filter(|(_, outcome)| !outcome.handled)
                .map(|(file, _)| (*file).clone())
                .collect();
            planner::plan_with(
                &unhandled,
                &root,
                profile,
                &reservations,
                self.settings.transfer_mode,
            )
        } else {
            Vec::new()
        };

        // 阶段3：执行计划
        let errors: Vec<Option<String>> = if config.dry_run {
            for planned in &planned {
                self.activity.record(&format!(
                    "将{}: {} -> {}",
                    verb(self.settings.transfer_mode),
                    planned.src.display(),
                    planned.dst.display()
                ));
            }
            vec![None; planned.len()]
        } else {
            self.run_parallel(&planned, |planned| self.transfer(planned, session).err())
        };

        let mut by_src: HashMap<PathBuf, (PlannedMove, Option<String>)> = planned
            .into_iter()
            .zip(errors)
            .map(|(planned, error)| (planned.src.clone(), (planned, error)))
            .collect();

        Ok(files
            .into_iter()
            .zip(outcomes)
            .map(|(file, rules)| {
                let (planned, transfer_error) = match by_src.remove(&file.full_path) {
                    Some((planned, error)) => (Some(planned), error),
                    None => (None, None),
                };
                FileReport {
                    src: file.full_path.clone(),
                    rules,
                    planned,
                    transfer_error,
                }
            })
            .collect())
    }

    /// 执行一次计划中的移动/复制
    fn transfer(&self, planned: &PlannedMove, session: Option<&UndoSession>) -> Result<(), String> {
        let mode = self.settings.transfer_mode;
        let outcome = match mode {
            TransferMode::Move => fsops::move_file(&planned.src, &planned.dst),
            TransferMode::Copy => fsops::copy_file(&planned.src, &planned.dst),
        };

        match outcome {
            Ok(()) => {
                if mode == TransferMode::Move {
                    if let Err(e) = self.store.rename_path(&planned.src, &planned.dst) {
                        tracing::warn!("更新标签记录路径失败: {}", e);
                    }
                }
                tracing::info!(
                    "已{}: {} -> {}",
                    verb(mode),
                    planned.src.display(),
                    planned.dst.display()
                );
                self.activity.record(&format!(
                    "已{}: {} -> {}",
                    verb(mode),
                    planned.src.display(),
                    planned.dst.display()
                ));
                if let Some(session) = session {
                    self.record(
                        session,
                        MoveRecord::new(planned.src.clone(), planned.dst.clone(), mode),
                    );
                }
                Ok(())
            }
            Err(e) => {
                let message = format!("{} {} 失败: {:#}", verb(mode), planned.src.display(), e);
                tracing::warn!("{}", message);
                self.activity.record(&message);
                Err(message)
            }
        }
    }

    /// 规则动作和类别整理的记录都从这里写入撤销日志
    fn record(&self, session: &UndoSession, record: MoveRecord) {
        if let Err(e) = session.append(record) {
            tracing::warn!("写入撤销日志失败: {}", e);
        }
    }

    /// workers > 1 时在独立的线程池中并行处理
    fn run_parallel<T, U, F>(&self, items: &[T], f: F) -> Vec<U>
    where
        T: Sync,
        U: Send,
        F: Fn(&T) -> U + Sync + Send,
    {
        if self.settings.workers > 1 && items.len() > 1 {
            match rayon::ThreadPoolBuilder::new()
                .num_threads(self.settings.workers)
                .build()
            {
                Ok(pool) => return pool.install(|| items.par_iter().map(&f).collect()),
                Err(e) => tracing::warn!("创建线程池失败，改为顺序处理: {}", e),
            }
        }
        items.iter().map(f).collect()
    }
}

fn verb(mode: TransferMode) -> &'static str {
    match mode {
        TransferMode::Move => "移动",
        TransferMode::Copy => "复制",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::activity::MemorySink;
    use crate::core::scanner::FileScanner;
    use std::fs;
    use tempfile::{tempdir, TempDir};

    fn organizer(dir: &TempDir) -> Organizer {
        let store = Arc::new(TagStore::open_in_memory().unwrap());
        Organizer::new(store, OrganizerSettings::new(dir.path().join(".trash")))
    }

    fn scan(root: &Path) -> Vec<FileDescriptor> {
        FileScanner::new(root.to_path_buf()).scan().unwrap()
    }

    #[test]
    fn test_preview_does_not_touch_disk() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("report.pdf"), "x").unwrap();
        let files = scan(dir.path());

        let entries = organizer(&dir)
            .preview(dir.path(), &files, &Profile::default(), &RunConfig::default())
            .unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, ActionStatus::WouldApply);
        assert_eq!(entries[0].category.as_deref(), Some("PDF"));
        assert_eq!(
            entries[0].dst.as_deref(),
            Some(dir.path().join("PDF").join("report.pdf").as_path())
        );
        assert!(dir.path().join("report.pdf").exists());
        assert!(!dir.path().join("PDF").exists());
    }

    #[test]
    fn test_apply_moves_and_records() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("report.pdf"), "x").unwrap();
        fs::write(dir.path().join("photo.png"), "y").unwrap();
        let files = scan(dir.path());
        let sink = Arc::new(MemorySink::new());
        let organizer = organizer(&dir).with_activity(sink.clone());

        let entries = organizer
            .apply(dir.path(), &files, &Profile::default(), &RunConfig::default())
            .unwrap();

        assert!(entries.iter().all(|e| e.status == ActionStatus::Applied));
        assert!(dir.path().join("PDF").join("report.pdf").exists());
        assert!(dir.path().join("Images").join("photo.png").exists());
        let log = crate::core::undo::UndoLog::load(dir.path()).unwrap().unwrap();
        assert_eq!(log.records.len(), 2);
        assert_eq!(sink.lines().len(), 2);
    }

    #[test]
    fn test_copy_mode_keeps_originals() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("report.pdf"), "x").unwrap();
        let files = scan(dir.path());
        let store = Arc::new(TagStore::open_in_memory().unwrap());
        let organizer = Organizer::new(
            store,
            OrganizerSettings::new(dir.path().join(".trash")).transfer_mode(TransferMode::Copy),
        );

        organizer
            .apply(dir.path(), &files, &Profile::default(), &RunConfig::default())
            .unwrap();

        assert!(dir.path().join("report.pdf").exists());
        assert!(dir.path().join("PDF").join("report.pdf").exists());
        let report = crate::core::undo::undo_last_session(dir.path()).unwrap();
        assert!(report.nothing_to_undo);
    }

    #[test]
    fn test_fallback_disabled_leaves_unmatched_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("report.pdf"), "x").unwrap();
        let files = scan(dir.path());
        let config = RunConfig {
            fallback_to_category_sort_on_rule_failure: false,
            ..Default::default()
        };

        let entries = organizer(&dir)
            .apply(dir.path(), &files, &Profile::default(), &config)
            .unwrap();
        assert_eq!(entries[0].status, ActionStatus::SkippedIdempotent);
        assert!(dir.path().join("report.pdf").exists());
    }

    #[test]
    fn test_invalid_profile_fails_the_call() {
        let dir = tempdir().unwrap();
        let profile = Profile {
            rules: vec![crate::core::rule::Rule {
                name: "empty".to_string(),
                match_mode: Default::default(),
                stop_on_match: false,
                conditions: vec![],
                actions: vec![],
            }],
            ..Default::default()
        };

        let err = organizer(&dir)
            .apply(dir.path(), &[], &profile, &RunConfig::default())
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_missing_source_does_not_abort_batch() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.pdf"), "x").unwrap();
        fs::write(dir.path().join("b.pdf"), "y").unwrap();
        let files = scan(dir.path());
        fs::remove_file(dir.path().join("a.pdf")).unwrap();

        let entries = organizer(&dir)
            .apply(dir.path(), &files, &Profile::default(), &RunConfig::default())
            .unwrap();

        assert_eq!(entries[0].status, ActionStatus::Failed);
        assert!(entries[0].error.is_some());
        assert_eq!(entries[1].status, ActionStatus::Applied);
        assert!(dir.path().join("PDF").join("b.pdf").exists());
        let summary = ExecutionSummary::from_entries(&entries);
        assert_eq!(summary.failed, 1);
        assert!(!summary.is_all_successful());
    }

    #[test]
    fn test_parallel_workers_produce_same_moves() {
        let dir = tempdir().unwrap();
        for i in 0..20 {
            fs::write(dir.path().join(format!("file{:02}.pdf", i)), i.to_string()).unwrap();
        }
        let files = scan(dir.path());
        let store = Arc::new(TagStore::open_in_memory().unwrap());
        let organizer = Organizer::new(
            store,
            OrganizerSettings::new(dir.path().join(".trash")).workers(4),
        );

        let entries = organizer
            .apply(dir.path(), &files, &Profile::default(), &RunConfig::default())
            .unwrap();

        assert_eq!(entries.len(), 20);
        assert!(entries.iter().all(|e| e.status == ActionStatus::Applied));
        assert_eq!(fs::read_dir(dir.path().join("PDF")).unwrap().count(), 20);
    }
}
