//! 目录监听会话
//!
//! 文件变化事件由外部（系统通知、界面、测试）推入有界队列，
//! 由唯一的消费任务依次处理：等待文件大小稳定、重新加载规则配置，
//! 然后在阻塞线程中走与批量整理相同的路径。
//!
//! 停止时正在处理的事件会完成并记录，队列中尚未开始的事件不再处理。

use crate::core::action::ActionStatus;
use crate::core::category;
use crate::core::executor::{ApplyEntry, Organizer};
use crate::core::models::{FileDescriptor, RunConfig, WatchSettings};
use crate::core::rule::ProfileSource;
use crate::core::scanner::FileScanner;
use crate::core::undo::UndoSession;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// 事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Created,
    Renamed,
}

/// 文件变化事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub path: PathBuf,
    pub kind: WatchEventKind,
}

impl WatchEvent {
    pub fn created(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: WatchEventKind::Created,
        }
    }

    pub fn renamed(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: WatchEventKind::Renamed,
        }
    }
}

/// 监听选项
#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// 被监听（整理）的目录
    pub root: PathBuf,
    /// 是否处理子目录中的文件
    pub include_subfolders: bool,
    /// 运行配置
    pub run_config: RunConfig,
    /// 队列与稳定性检查设置
    pub settings: WatchSettings,
}

impl WatchOptions {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            include_subfolders: false,
            run_config: RunConfig::default(),
            settings: WatchSettings::default(),
        }
    }
}

/// 监听会话统计
#[derive(Debug, Clone, Default)]
pub struct WatchReport {
    /// 收到的事件数
    pub received: usize,
    /// 已处理的文件数
    pub processed: usize,
    /// 不在整理范围内（类别目录、隐藏文件、已消失等）的事件数
    pub ignored: usize,
    /// 大小始终不稳定而放弃的事件数
    pub unstable: usize,
    /// 处理失败的事件数
    pub failed: usize,
    /// 停止时仍在队列中、未处理的事件数
    pub declined: usize,
    /// 每个已处理文件的结果
    pub entries: Vec<ApplyEntry>,
}

impl WatchReport {
    /// 获取摘要
    pub fn summary(&self) -> String {
        format!(
            "收到: {}, 处理: {}, 忽略: {}, 不稳定: {}, 失败: {}, 未处理: {}",
            self.received, self.processed, self.ignored, self.unstable, self.failed, self.declined
        )
    }
}

/// 运行中的监听会话句柄
pub struct WatchHandle {
    sender: mpsc::Sender<WatchEvent>,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<WatchReport>,
}

impl WatchHandle {
    /// 事件发送端（可克隆给多个生产者）
    pub fn sender(&self) -> mpsc::Sender<WatchEvent> {
        self.sender.clone()
    }

    /// 停止监听，等待正在处理的事件完成
    pub async fn stop(self) -> WatchReport {
        let _ = self.stop_tx.send(true);
        match self.task.await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!("监听任务异常结束: {}", e);
                WatchReport::default()
            }
        }
    }
}

/// 目录监听会话
pub struct WatchSession {
    organizer: Organizer,
    profiles: Arc<dyn ProfileSource>,
    options: WatchOptions,
    session: Arc<UndoSession>,
    report: WatchReport,
}

impl WatchSession {
    /// 启动消费任务（需要在 tokio 运行时中调用）
    pub fn spawn(
        organizer: Organizer,
        profiles: Arc<dyn ProfileSource>,
        options: WatchOptions,
    ) -> WatchHandle {
        let (sender, receiver) = mpsc::channel(options.settings.queue_capacity.max(1));
        let (stop_tx, stop_rx) = watch::channel(false);

        let root = std::path::absolute(&options.root).unwrap_or_else(|_| options.root.clone());
        let session = Arc::new(UndoSession::new(&root, organizer.settings().transfer_mode));
        let options = WatchOptions { root, ..options };

        tracing::info!("开始监听目录: {}", options.root.display());
        let consumer = WatchSession {
            organizer,
            profiles,
            options,
            session,
            report: WatchReport::default(),
        };
        let task = tokio::spawn(consumer.run(receiver, stop_rx));

        WatchHandle {
            sender,
            stop_tx,
            task,
        }
    }

    async fn run(
        mut self,
        mut receiver: mpsc::Receiver<WatchEvent>,
        mut stop_rx: watch::Receiver<bool>,
    ) -> WatchReport {
        loop {
            tokio::select! {
                biased;
                _ = stop_rx.changed() => {
                    tracing::info!("收到停止信号，停止监听");
                    break;
                }
                event = receiver.recv() => match event {
                    Some(event) => self.handle(event).await,
                    None => break,
                },
            }
            if *stop_rx.borrow() {
                break;
            }
        }

        receiver.close();
        while receiver.try_recv().is_ok() {
            self.report.declined += 1;
        }

        tracing::info!("监听结束: {}", self.report.summary());
        self.report
    }

    async fn handle(&mut self, event: WatchEvent) {
        self.report.received += 1;
        tracing::debug!("收到事件 {:?}: {}", event.kind, event.path.display());

        let settings = &self.options.settings;
        if !wait_until_stable(&event.path, settings.stability_interval(), settings.stability_attempts).await {
            if event.path.exists() {
                tracing::warn!("文件一直在变化，放弃处理: {}", event.path.display());
                self.report.unstable += 1;
            } else {
                self.report.ignored += 1;
            }
            return;
        }

        // 每个事件都重新加载规则
        let profile = match self.profiles.load() {
            Ok(profile) => profile,
            Err(e) => {
                tracing::warn!("加载规则配置失败: {}", e);
                self.report.failed += 1;
                return;
            }
        };

        let scanner = FileScanner::new(self.options.root.clone())
            .include_subfolders(self.options.include_subfolders)
            .skip_hidden(self.options.run_config.skip_hidden)
            .exclude_dirs(category::known_categories(&profile))
            .exclude_path(self.organizer.settings().trash_dir.clone());
        let path = std::path::absolute(&event.path).unwrap_or_else(|_| event.path.clone());
        if !scanner.accepts(&path) {
            self.report.ignored += 1;
            return;
        }
        let file = match FileDescriptor::from_path(&path) {
            Ok(file) if !file.is_directory => file,
            _ => {
                self.report.ignored += 1;
                return;
            }
        };

        let organizer = self.organizer.clone();
        let session = self.session.clone();
        let root = self.options.root.clone();
        let config = self.options.run_config;
        let outcome = tokio::task::spawn_blocking(move || {
            organizer.apply_in_session(&root, &[file], &profile, &config, &session)
        })
        .await;

        match outcome {
            Ok(Ok(entries)) => {
                self.report.processed += 1;
                if entries.iter().any(|e| e.status == ActionStatus::Failed) {
                    self.report.failed += 1;
                }
                self.report.entries.extend(entries);
            }
            Ok(Err(e)) => {
                tracing::warn!("处理 {} 失败: {}", path.display(), e);
                self.report.failed += 1;
            }
            Err(e) => {
                tracing::error!("处理任务异常结束 {}: {}", path.display(), e);
                self.report.failed += 1;
            }
        }
    }
}

/// 反复读取文件大小，直到连续两次相同（下载中的文件会一直变化）
async fn wait_until_stable(path: &Path, interval: Duration, attempts: u32) -> bool {
    let mut last: Option<u64> = None;
    for attempt in 0..attempts.max(2) {
        let size = match tokio::fs::metadata(path).await {
            Ok(meta) => meta.len(),
            Err(_) => return false,
        };
        if last == Some(size) {
            return true;
        }
        last = Some(size);
        if attempt + 1 < attempts.max(2) {
            tokio::time::sleep(interval).await;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::executor::OrganizerSettings;
    use crate::core::rule::{Profile, ProfileFile};
    use crate::storage::database::TagStore;
    use std::fs;
    use tempfile::tempdir;

    fn fast_options(root: &Path) -> WatchOptions {
        WatchOptions {
            settings: WatchSettings {
                queue_capacity: 16,
                stability_interval_ms: 10,
                stability_attempts: 5,
            },
            ..WatchOptions::new(root.to_path_buf())
        }
    }

    fn organizer(root: &Path) -> Organizer {
        let store = Arc::new(TagStore::open_in_memory().unwrap());
        Organizer::new(store, OrganizerSettings::new(root.join(".trash")))
    }

    #[tokio::test]
    async fn test_watch_organizes_new_file() {
        let dir = tempdir().unwrap();
        let handle = WatchSession::spawn(
            organizer(dir.path()),
            Arc::new(Profile::default()),
            fast_options(dir.path()),
        );

        let path = dir.path().join("report.pdf");
        fs::write(&path, "x").unwrap();
        handle.sender().send(WatchEvent::created(&path)).await.unwrap();

        // 等待消费任务处理完
        for _ in 0..200 {
            if dir.path().join("PDF").join("report.pdf").exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let report = handle.stop().await;

        assert_eq!(report.processed, 1);
        assert!(dir.path().join("PDF").join("report.pdf").exists());
        assert!(!path.exists());
        let log = crate::core::undo::UndoLog::load(dir.path()).unwrap().unwrap();
        assert_eq!(log.records.len(), 1);
    }

    #[tokio::test]
    async fn test_events_outside_scope_are_ignored() {
        let dir = tempdir().unwrap();
        let handle = WatchSession::spawn(
            organizer(dir.path()),
            Arc::new(Profile::default()),
            fast_options(dir.path()),
        );

        fs::create_dir_all(dir.path().join("PDF")).unwrap();
        let organized = dir.path().join("PDF").join("done.pdf");
        fs::write(&organized, "x").unwrap();
        let sender = handle.sender();
        sender.send(WatchEvent::renamed(&organized)).await.unwrap();
        sender
            .send(WatchEvent::created(dir.path().join("vanished.pdf")))
            .await
            .unwrap();

        for _ in 0..200 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if sender.capacity() == 16 {
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        let report = handle.stop().await;

        assert_eq!(report.ignored, 2);
        assert_eq!(report.processed, 0);
        assert!(organized.exists());
    }

    #[tokio::test]
    async fn test_profile_is_reloaded_per_event() {
        let dir = tempdir().unwrap();
        let config_dir = tempdir().unwrap();
        let profile_path = config_dir.path().join("profile.json");
        fs::write(&profile_path, r#"{"name": "empty"}"#).unwrap();

        let handle = WatchSession::spawn(
            organizer(dir.path()),
            Arc::new(ProfileFile::new(profile_path.clone())),
            fast_options(dir.path()),
        );

        // 配置在事件到来前被修改，新规则立即生效
        fs::write(
            &profile_path,
            r#"{"name": "tagging", "rules": [{
                "name": "keep pdf",
                "conditions": [{"type": "ExtensionIs", "args": {"extensions": [".pdf"]}}],
                "actions": [{"type": "AddTag", "args": {"tag": "seen"}}]
            }]}"#,
        )
        .unwrap();
        let path = dir.path().join("a.pdf");
        fs::write(&path, "x").unwrap();
        handle.sender().send(WatchEvent::created(&path)).await.unwrap();

        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let report = handle.stop().await;

        assert_eq!(report.processed, 1);
        assert_eq!(report.entries[0].rule_name.as_deref(), Some("keep pdf"));
        // 规则处理过的文件不再按类别移动
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_stop_declines_queued_events() {
        let dir = tempdir().unwrap();
        let options = WatchOptions {
            settings: WatchSettings {
                queue_capacity: 16,
                stability_interval_ms: 200,
                stability_attempts: 3,
            },
            ..WatchOptions::new(dir.path().to_path_buf())
        };
        let handle = WatchSession::spawn(organizer(dir.path()), Arc::new(Profile::default()), options);

        let sender = handle.sender();
        for i in 0..5 {
            let path = dir.path().join(format!("f{}.pdf", i));
            fs::write(&path, "x").unwrap();
            sender.send(WatchEvent::created(path)).await.unwrap();
        }
        // 第一个事件正在做稳定性检查时停止
        tokio::time::sleep(Duration::from_millis(50)).await;
        let report = handle.stop().await;

        assert_eq!(report.processed, 1);
        assert_eq!(report.declined, 4);
        assert!(dir.path().join("PDF").join("f0.pdf").exists());
        assert!(dir.path().join("f4.pdf").exists());
    }

    #[tokio::test]
    async fn test_stability_check() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.bin");
        fs::write(&path, "x").unwrap();
        assert!(wait_until_stable(&path, Duration::from_millis(5), 3).await);
        assert!(!wait_until_stable(&dir.path().join("missing"), Duration::from_millis(5), 3).await);
    }
}
