//! 规则动作
//!
//! 设计原则：
//! - 每个动作执行前先检查效果是否已经存在，存在则跳过（可重复执行）
//! - Dry Run 下只计算结果，不做任何修改
//! - 安全模式下拒绝删除类动作
//! - 目标已存在时自动改名，永不覆盖

use crate::core::fsops;
use crate::core::models::{FileDescriptor, MoveRecord, RunConfig, TransferMode};
use crate::core::naming::PathReservations;
use crate::core::pending::{PendingChanges, StoreView};
use crate::core::template;
use crate::storage::database::TagStore;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// TokenRename 在元数据中记录所用模板的字段名
const RENAMED_BY_FIELD: &str = "renamed_by";

/// MarkAsDuplicate 的默认标签
const DEFAULT_DUPLICATE_TAG: &str = "duplicate";

fn default_timeout_secs() -> u64 {
    60
}

/// 单个动作
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "args")]
pub enum Action {
    /// 在原目录内改名
    Rename { new_name: String },
    /// 按模板改名，如 `{date}_{name}{ext}`
    TokenRename { template: String },
    /// 移动到目录（相对路径基于整理根目录，支持模板变量）
    Move { destination: String },
    /// 复制到目录
    Copy { destination: String },
    /// 永久删除
    Delete,
    /// 移到回收站
    DeleteToTrash,
    /// 运行外部命令，参数支持模板变量（`{path}` 为文件完整路径）
    RunCommand {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
    /// 压缩为 zip（默认放在原目录）
    Archive {
        #[serde(default)]
        destination: Option<String>,
    },
    /// 解压 zip（默认解压到同名目录）
    Extract {
        #[serde(default)]
        destination: Option<String>,
    },
    /// 创建目录
    CreateFolder { path: String },
    AddTag { tag: String },
    RemoveTag { tag: String },
    /// 设置颜色标签
    ColorLabel { color: String },
    /// 登记内容指纹，若发现重复则打上标签
    MarkAsDuplicate {
        #[serde(default)]
        tag: Option<String>,
    },
}

/// 动作执行所需的上下文
pub struct ActionContext<'a> {
    /// 整理根目录（相对目标路径的基准）
    pub root: &'a Path,
    /// 本次运行配置
    pub config: &'a RunConfig,
    /// 标签存储
    pub store: &'a TagStore,
    /// 本批次已认领的目标路径
    pub reservations: &'a PathReservations,
    /// 回收站目录
    pub trash_dir: &'a Path,
    /// Dry Run 下本批次尚未落地的变更
    pub pending: &'a PendingChanges,
}

impl<'a> ActionContext<'a> {
    /// 读取视图：Dry Run 时叠加尚未落地的变更
    pub fn view(&self) -> StoreView<'a> {
        let pending = if self.config.dry_run {
            Some(self.pending)
        } else {
            None
        };
        StoreView::new(self.store, pending)
    }
}

/// 动作执行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ActionStatus {
    /// 已执行
    Applied,
    /// Dry Run：将会执行
    WouldApply,
    /// 效果已存在，跳过
    SkippedIdempotent,
    /// 被安全模式拦截
    BlockedBySafeMode,
    /// 执行失败
    Failed,
}

/// 动作执行结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResult {
    pub status: ActionStatus,
    /// 可读的说明
    pub message: String,
    /// 文件的新位置（改名/移动/移入回收站）
    pub new_path: Option<PathBuf>,
    /// 生成的新文件或目录（复制、压缩、解压、建目录）
    pub output_path: Option<PathBuf>,
    /// 需要写入撤销日志的记录
    pub undo_records: Vec<MoveRecord>,
}

impl ActionResult {
    fn new(status: ActionStatus, message: String) -> Self {
        Self {
            status,
            message,
            new_path: None,
            output_path: None,
            undo_records: Vec::new(),
        }
    }

    fn done(message: String) -> Self {
        Self::new(ActionStatus::Applied, message)
    }

    fn would(message: String) -> Self {
        Self::new(ActionStatus::WouldApply, message)
    }

    fn skip(message: String) -> Self {
        Self::new(ActionStatus::SkippedIdempotent, message)
    }

    fn block(message: String) -> Self {
        Self::new(ActionStatus::BlockedBySafeMode, message)
    }

    fn fail(message: String) -> Self {
        Self::new(ActionStatus::Failed, message)
    }

    fn moved_to(mut self, path: PathBuf) -> Self {
        self.new_path = Some(path);
        self
    }

    fn produced(mut self, path: PathBuf) -> Self {
        self.output_path = Some(path);
        self
    }

    fn recorded(mut self, record: MoveRecord) -> Self {
        self.undo_records.push(record);
        self
    }

    /// 是否真的执行了（Dry Run 下的"将会执行"也算）
    pub fn applied(&self) -> bool {
        matches!(self.status, ActionStatus::Applied | ActionStatus::WouldApply)
    }

    /// 是否因为效果已存在而跳过
    pub fn skipped(&self) -> bool {
        self.status == ActionStatus::SkippedIdempotent
    }

    /// 是否被安全模式拦截
    pub fn blocked(&self) -> bool {
        self.status == ActionStatus::BlockedBySafeMode
    }

    pub fn failed(&self) -> bool {
        self.status == ActionStatus::Failed
    }
}

impl Action {
    /// 动作类型名
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Rename { .. } => "Rename",
            Action::TokenRename { .. } => "TokenRename",
            Action::Move { .. } => "Move",
            Action::Copy { .. } => "Copy",
            Action::Delete => "Delete",
            Action::DeleteToTrash => "DeleteToTrash",
            Action::RunCommand { .. } => "RunCommand",
            Action::Archive { .. } => "Archive",
            Action::Extract { .. } => "Extract",
            Action::CreateFolder { .. } => "CreateFolder",
            Action::AddTag { .. } => "AddTag",
            Action::RemoveTag { .. } => "RemoveTag",
            Action::ColorLabel { .. } => "ColorLabel",
            Action::MarkAsDuplicate { .. } => "MarkAsDuplicate",
        }
    }

    /// 是否为删除类动作
    pub fn is_delete_class(&self) -> bool {
        matches!(self, Action::Delete | Action::DeleteToTrash)
    }

    /// 对单个文件执行动作
    pub fn run(&self, file: &FileDescriptor, ctx: &ActionContext) -> ActionResult {
        let result = match self {
            Action::Rename { new_name } => rename(file, new_name, None, ctx),
            Action::TokenRename { template: tpl } => {
                let new_name = template::render(tpl, file);
                rename(file, &new_name, Some(tpl), ctx)
            }
            Action::Move { destination } => transfer(file, destination, TransferMode::Move, ctx),
            Action::Copy { destination } => transfer(file, destination, TransferMode::Copy, ctx),
            Action::Delete => delete(file, ctx),
            Action::DeleteToTrash => delete_to_trash(file, ctx),
            Action::RunCommand {
                program,
                args,
                timeout_secs,
            } => run_command(file, program, args, *timeout_secs, ctx),
            Action::Archive { destination } => archive(file, destination.as_deref(), ctx),
            Action::Extract { destination } => extract(file, destination.as_deref(), ctx),
            Action::CreateFolder { path } => create_folder(file, path, ctx),
            Action::AddTag { tag } => add_tag(file, tag, ctx),
            Action::RemoveTag { tag } => remove_tag(file, tag, ctx),
            Action::ColorLabel { color } => color_label(file, color, ctx),
            Action::MarkAsDuplicate { tag } => {
                mark_duplicate(file, tag.as_deref().unwrap_or(DEFAULT_DUPLICATE_TAG), ctx)
            }
        };

        match result.status {
            ActionStatus::Failed => tracing::warn!("[{}] {}", self.kind(), result.message),
            _ => tracing::debug!("[{}] {}", self.kind(), result.message),
        }
        result
    }
}

/// Dry Run 下文件可能只是"虚拟地"被改过名，按它在磁盘上的真实位置判断
fn is_present(file: &FileDescriptor, ctx: &ActionContext) -> bool {
    ctx.view().origin(&file.full_path).exists()
}

fn rename(
    file: &FileDescriptor,
    new_name: &str,
    template_used: Option<&str>,
    ctx: &ActionContext,
) -> ActionResult {
    if new_name.is_empty() || new_name.contains('/') || new_name.contains('\\') {
        return ActionResult::fail(format!("无效的新文件名: \"{}\"", new_name));
    }
    if file.name == new_name {
        return ActionResult::skip(format!("文件名已是 {}", new_name));
    }
    if let Some(tpl) = template_used {
        if let Ok(Some(previous)) = ctx.view().metadata_field(&file.full_path, RENAMED_BY_FIELD) {
            if previous == tpl {
                return ActionResult::skip(format!("{} 已按模板改过名", file.name));
            }
        }
    }
    if !is_present(file, ctx) {
        return ActionResult::fail(format!("源文件不存在: {}", file.full_path.display()));
    }

    let claim = ctx.reservations.claim(file.parent_dir(), new_name);
    if ctx.config.dry_run {
        if let Some(tpl) = template_used {
            ctx.pending.set_metadata(&file.full_path, RENAMED_BY_FIELD, tpl);
        }
        return ActionResult::would(format!("将改名: {} -> {}", file.name, display_name(&claim.path)))
            .moved_to(claim.path);
    }

    match fsops::move_file(&file.full_path, &claim.path) {
        Ok(()) => {
            follow_in_store(ctx, &file.full_path, &claim.path);
            if let Some(tpl) = template_used {
                if let Err(e) = ctx.store.set_metadata_field(&claim.path, RENAMED_BY_FIELD, tpl) {
                    tracing::warn!("记录改名模板失败: {}", e);
                }
            }
            let record = MoveRecord::new(file.full_path.clone(), claim.path.clone(), TransferMode::Move);
            ActionResult::done(format!("已改名: {} -> {}", file.name, display_name(&claim.path)))
                .moved_to(claim.path)
                .recorded(record)
        }
        Err(e) => ActionResult::fail(format!("改名 {} 失败: {:#}", file.name, e)),
    }
}

fn transfer(
    file: &FileDescriptor,
    destination: &str,
    mode: TransferMode,
    ctx: &ActionContext,
) -> ActionResult {
    if file.is_directory {
        return ActionResult::fail(format!("不支持移动/复制目录: {}", file.full_path.display()));
    }

    let dir = template::resolve_dir(destination, file, ctx.root);
    if file.parent_dir() == dir {
        return ActionResult::skip(format!("{} 已在目标目录 {}", file.name, dir.display()));
    }
    if mode == TransferMode::Copy {
        let source = ctx.view().origin(&file.full_path);
        if let Some(existing) = fsops::find_identical(&source, &dir, &file.name) {
            return ActionResult::skip(format!("目标已有相同文件: {}", existing.display()));
        }
    }
    if !is_present(file, ctx) {
        return ActionResult::fail(format!("源文件不存在: {}", file.full_path.display()));
    }

    let claim = ctx.reservations.claim(&dir, &file.name);
    let verb = match mode {
        TransferMode::Move => "移动",
        TransferMode::Copy => "复制",
    };

    if ctx.config.dry_run {
        let result = ActionResult::would(format!(
            "将{}: {} -> {}",
            verb,
            file.full_path.display(),
            claim.path.display()
        ));
        return match mode {
            TransferMode::Move => result.moved_to(claim.path),
            TransferMode::Copy => result.produced(claim.path),
        };
    }

    let outcome = match mode {
        TransferMode::Move => fsops::move_file(&file.full_path, &claim.path),
        TransferMode::Copy => fsops::copy_file(&file.full_path, &claim.path),
    };

    match outcome {
        Ok(()) => {
            let record = MoveRecord::new(file.full_path.clone(), claim.path.clone(), mode);
            let result = ActionResult::done(format!(
                "已{}: {} -> {}",
                verb,
                file.full_path.display(),
                claim.path.display()
            ))
            .recorded(record);
            match mode {
                TransferMode::Move => {
                    follow_in_store(ctx, &file.full_path, &claim.path);
                    result.moved_to(claim.path)
                }
                TransferMode::Copy => result.produced(claim.path),
            }
        }
        Err(e) => ActionResult::fail(format!("{} {} 失败: {:#}", verb, file.name, e)),
    }
}

fn delete(file: &FileDescriptor, ctx: &ActionContext) -> ActionResult {
    if !is_present(file, ctx) {
        return ActionResult::skip(format!("{} 已不存在", file.name));
    }
    if ctx.config.safe_mode {
        return ActionResult::block(format!("安全模式下禁止删除: {}", file.name));
    }
    if file.is_directory {
        return ActionResult::fail(format!("不支持删除目录: {}", file.full_path.display()));
    }
    if ctx.config.dry_run {
        return ActionResult::would(format!("将删除: {}", file.full_path.display()));
    }

    match fs::remove_file(&file.full_path) {
        Ok(()) => ActionResult::done(format!("已删除: {}", file.full_path.display())),
        Err(e) => ActionResult::fail(format!("删除 {} 失败: {}", file.name, e)),
    }
}

fn delete_to_trash(file: &FileDescriptor, ctx: &ActionContext) -> ActionResult {
    if !is_present(file, ctx) {
        return ActionResult::skip(format!("{} 已不存在", file.name));
    }
    if ctx.config.safe_mode {
        return ActionResult::block(format!("安全模式下禁止移入回收站: {}", file.name));
    }

    let claim = ctx.reservations.claim(ctx.trash_dir, &file.name);
    if ctx.config.dry_run {
        return ActionResult::would(format!("将移入回收站: {}", file.full_path.display()))
            .moved_to(claim.path);
    }

    match fsops::move_file(&file.full_path, &claim.path) {
        Ok(()) => {
            follow_in_store(ctx, &file.full_path, &claim.path);
            let record = MoveRecord::new(file.full_path.clone(), claim.path.clone(), TransferMode::Move);
            ActionResult::done(format!(
                "已移入回收站: {} -> {}",
                file.full_path.display(),
                claim.path.display()
            ))
            .moved_to(claim.path)
            .recorded(record)
        }
        Err(e) => ActionResult::fail(format!("移入回收站失败 {}: {:#}", file.name, e)),
    }
}

fn run_command(
    file: &FileDescriptor,
    program: &str,
    args: &[String],
    timeout_secs: u64,
    ctx: &ActionContext,
) -> ActionResult {
    let args: Vec<String> = args.iter().map(|a| template::render(a, file)).collect();
    let command_line = format!("{} {}", program, args.join(" "));

    if ctx.config.dry_run {
        return ActionResult::would(format!("将执行命令: {}", command_line.trim_end()));
    }

    match spawn_and_wait(program, &args, Duration::from_secs(timeout_secs)) {
        Ok(0) => ActionResult::done(format!("已执行命令: {}", command_line.trim_end())),
        Ok(code) => ActionResult::fail(format!("命令退出码 {}: {}", code, command_line.trim_end())),
        Err(e) => ActionResult::fail(format!("执行命令失败 {}: {:#}", command_line.trim_end(), e)),
    }
}

/// 运行命令直到结束或超时，超时后强制结束进程
fn spawn_and_wait(program: &str, args: &[String], timeout: Duration) -> Result<i32> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("无法启动 {}", program))?;

    let started = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status.code().unwrap_or(-1));
        }
        if started.elapsed() >= timeout {
            let _ = child.kill();
            let _ = child.wait();
            return Err(anyhow::anyhow!("命令超时（{} 秒）", timeout.as_secs()));
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

fn archive(file: &FileDescriptor, destination: Option<&str>, ctx: &ActionContext) -> ActionResult {
    if file.is_directory {
        return ActionResult::fail(format!("不支持压缩目录: {}", file.full_path.display()));
    }
    if file.extension == ".zip" {
        return ActionResult::skip(format!("{} 已是压缩包", file.name));
    }

    let dir = match destination {
        Some(dest) => template::resolve_dir(dest, file, ctx.root),
        None => file.parent_dir().to_path_buf(),
    };
    let zip_name = format!("{}.zip", file.stem);
    let existing = dir.join(&zip_name);
    if archive_contains(&existing, &file.name, file.size) {
        return ActionResult::skip(format!("压缩包 {} 已包含 {}", existing.display(), file.name));
    }
    if !is_present(file, ctx) {
        return ActionResult::fail(format!("源文件不存在: {}", file.full_path.display()));
    }

    let claim = ctx.reservations.claim(&dir, &zip_name);
    if ctx.config.dry_run {
        return ActionResult::would(format!("将压缩到: {}", claim.path.display())).produced(claim.path);
    }

    match write_zip(&file.full_path, &file.name, &claim.path) {
        Ok(()) => ActionResult::done(format!("已压缩: {} -> {}", file.name, claim.path.display()))
            .recorded(MoveRecord::new(
                file.full_path.clone(),
                claim.path.clone(),
                TransferMode::Copy,
            ))
            .produced(claim.path),
        Err(e) => {
            let _ = fs::remove_file(&claim.path);
            ActionResult::fail(format!("压缩 {} 失败: {:#}", file.name, e))
        }
    }
}

fn archive_contains(zip_path: &Path, entry_name: &str, size: u64) -> bool {
    let Ok(file) = File::open(zip_path) else {
        return false;
    };
    let Ok(mut archive) = zip::ZipArchive::new(file) else {
        return false;
    };
    let found = match archive.by_name(entry_name) {
        Ok(entry) => entry.size() == size,
        Err(_) => false,
    };
    found
}

fn write_zip(source: &Path, entry_name: &str, target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    let out = File::create_new(target)?;
    let mut writer = zip::ZipWriter::new(out);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
    writer.start_file(entry_name, options)?;
    let mut input = File::open(source)?;
    io::copy(&mut input, &mut writer)?;
    writer.finish()?;
    Ok(())
}

fn is_zip(file: &FileDescriptor, ctx: &ActionContext) -> bool {
    if file.extension == ".zip" {
        return true;
    }
    matches!(
        crate::core::scanner::detect_file_type(&ctx.view().origin(&file.full_path)).as_deref(),
        Some("application/zip")
    )
}

fn extract(file: &FileDescriptor, destination: Option<&str>, ctx: &ActionContext) -> ActionResult {
    if file.is_directory || !is_zip(file, ctx) {
        return ActionResult::skip(format!("{} 不是 zip 压缩包", file.name));
    }

    let (dir, name) = match destination {
        Some(dest) => {
            let target = template::resolve_dir(dest, file, ctx.root);
            let parent = target.parent().map(Path::to_path_buf).unwrap_or_else(|| ctx.root.to_path_buf());
            let name = target
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| file.stem.clone());
            (parent, name)
        }
        None => (file.parent_dir().to_path_buf(), file.stem.clone()),
    };

    let existing = dir.join(&name);
    let source = ctx.view().origin(&file.full_path);
    if source.exists() {
        match already_extracted(&source, &existing) {
            Ok(true) => {
                return ActionResult::skip(format!("{} 已解压到 {}", file.name, existing.display()))
            }
            Ok(false) => {}
            Err(e) => return ActionResult::fail(format!("读取压缩包 {} 失败: {:#}", file.name, e)),
        }
    }

    let claim = ctx.reservations.claim(&dir, &name);
    if ctx.config.dry_run {
        return ActionResult::would(format!("将解压到: {}", claim.path.display())).produced(claim.path);
    }

    let mut created = Vec::new();
    match unzip(&file.full_path, &claim.path, &mut created) {
        Ok(()) => {
            let mut result = ActionResult::done(format!(
                "已解压 {} 个文件: {} -> {}",
                created.len(),
                file.name,
                claim.path.display()
            ));
            for path in created {
                result = result.recorded(MoveRecord::new(file.full_path.clone(), path, TransferMode::Copy));
            }
            result.produced(claim.path)
        }
        Err(e) => {
            // 已解出的文件照常记录，撤销时一并删除
            let mut result = ActionResult::fail(format!("解压 {} 失败: {:#}", file.name, e));
            for path in created {
                result = result.recorded(MoveRecord::new(file.full_path.clone(), path, TransferMode::Copy));
            }
            result
        }
    }
}

/// 目标目录中是否已有压缩包内的全部文件（大小一致）
fn already_extracted(zip_path: &Path, target: &Path) -> Result<bool> {
    if !target.is_dir() {
        return Ok(false);
    }
    let mut archive = zip::ZipArchive::new(File::open(zip_path)?)?;
    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        let Some(relative) = entry.enclosed_name() else {
            continue;
        };
        let path = target.join(relative);
        if entry.is_dir() {
            if !path.is_dir() {
                return Ok(false);
            }
        } else {
            match fs::metadata(&path) {
                Ok(meta) if meta.len() == entry.size() => {}
                _ => return Ok(false),
            }
        }
    }
    Ok(true)
}

/// 解压到目标目录，解出的文件依次写入 `created`
fn unzip(zip_path: &Path, target: &Path, created: &mut Vec<PathBuf>) -> Result<()> {
    let mut archive = zip::ZipArchive::new(File::open(zip_path)?)?;
    fs::create_dir_all(target)?;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        // 路径越界（zip slip）的条目直接忽略
        let Some(relative) = entry.enclosed_name() else {
            tracing::warn!("忽略不安全的压缩包条目: {}", entry.name());
            continue;
        };
        let path = target.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&path)?;
            continue;
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create_new(&path)?;
        created.push(path);
        io::copy(&mut entry, &mut out)?;
    }
    Ok(())
}

fn create_folder(file: &FileDescriptor, path: &str, ctx: &ActionContext) -> ActionResult {
    let dir = template::resolve_dir(path, file, ctx.root);
    if dir.is_dir() {
        return ActionResult::skip(format!("目录已存在: {}", dir.display()));
    }
    if ctx.config.dry_run {
        return ActionResult::would(format!("将创建目录: {}", dir.display())).produced(dir);
    }
    match fs::create_dir_all(&dir) {
        Ok(()) => ActionResult::done(format!("已创建目录: {}", dir.display()))
            .recorded(MoveRecord::new(file.full_path.clone(), dir.clone(), TransferMode::Copy))
            .produced(dir),
        Err(e) => ActionResult::fail(format!("创建目录 {} 失败: {}", dir.display(), e)),
    }
}

fn add_tag(file: &FileDescriptor, tag: &str, ctx: &ActionContext) -> ActionResult {
    match ctx.view().tags(&file.full_path) {
        Ok(tags) if tags.contains(tag) => {
            return ActionResult::skip(format!("{} 已有标签 {}", file.name, tag))
        }
        Ok(_) => {}
        Err(e) => return ActionResult::fail(format!("读取标签失败: {:#}", e)),
    }
    if ctx.config.dry_run {
        ctx.pending.add_tag(&file.full_path, tag);
        return ActionResult::would(format!("将添加标签 {}: {}", tag, file.name));
    }
    match ctx.store.add_tag(&file.full_path, tag) {
        Ok(true) => ActionResult::done(format!("已添加标签 {}: {}", tag, file.name)),
        Ok(false) => ActionResult::skip(format!("{} 已有标签 {}", file.name, tag)),
        Err(e) => ActionResult::fail(format!("添加标签失败: {:#}", e)),
    }
}

fn remove_tag(file: &FileDescriptor, tag: &str, ctx: &ActionContext) -> ActionResult {
    match ctx.view().tags(&file.full_path) {
        Ok(tags) if !tags.contains(tag) => {
            return ActionResult::skip(format!("{} 没有标签 {}", file.name, tag))
        }
        Ok(_) => {}
        Err(e) => return ActionResult::fail(format!("读取标签失败: {:#}", e)),
    }
    if ctx.config.dry_run {
        ctx.pending.remove_tag(&file.full_path, tag);
        return ActionResult::would(format!("将移除标签 {}: {}", tag, file.name));
    }
    match ctx.store.remove_tag(&file.full_path, tag) {
        Ok(true) => ActionResult::done(format!("已移除标签 {}: {}", tag, file.name)),
        Ok(false) => ActionResult::skip(format!("{} 没有标签 {}", file.name, tag)),
        Err(e) => ActionResult::fail(format!("移除标签失败: {:#}", e)),
    }
}

fn color_label(file: &FileDescriptor, color: &str, ctx: &ActionContext) -> ActionResult {
    match ctx.view().color(&file.full_path) {
        Ok(Some(current)) if current == color => {
            return ActionResult::skip(format!("{} 颜色已是 {}", file.name, color))
        }
        Ok(_) => {}
        Err(e) => return ActionResult::fail(format!("读取颜色失败: {:#}", e)),
    }
    if ctx.config.dry_run {
        ctx.pending.set_color(&file.full_path, color);
        return ActionResult::would(format!("将设置颜色 {}: {}", color, file.name));
    }
    match ctx.store.set_color(&file.full_path, Some(color)) {
        Ok(_) => ActionResult::done(format!("已设置颜色 {}: {}", color, file.name)),
        Err(e) => ActionResult::fail(format!("设置颜色失败: {:#}", e)),
    }
}

fn mark_duplicate(file: &FileDescriptor, tag: &str, ctx: &ActionContext) -> ActionResult {
    if file.is_directory {
        return ActionResult::skip(format!("{} 是目录", file.name));
    }
    let view = ctx.view();
    match view.tags(&file.full_path) {
        Ok(tags) if tags.contains(tag) => {
            return ActionResult::skip(format!("{} 已标记为重复", file.name))
        }
        Ok(_) => {}
        Err(e) => return ActionResult::fail(format!("读取标签失败: {:#}", e)),
    }

    // 内容指纹已登记的文件是原件，不会在之后的批次里反过来被标记
    match view.is_indexed(&file.full_path) {
        Ok(true) => return ActionResult::skip(format!("{} 已登记，视为原件", file.name)),
        Ok(false) => {}
        Err(e) => return ActionResult::fail(format!("读取内容指纹失败 {}: {:#}", file.name, e)),
    }

    let original = match view.duplicate_of(&file.full_path) {
        Ok(original) => original,
        Err(e) => return ActionResult::fail(format!("重复检测失败 {}: {:#}", file.name, e)),
    };

    if ctx.config.dry_run {
        ctx.pending.mark_indexed(&file.full_path);
        return match original {
            Some(original) => {
                ctx.pending.add_tag(&file.full_path, tag);
                ActionResult::would(format!(
                    "将标记为重复: {}（与 {} 相同）",
                    file.name,
                    original.display()
                ))
            }
            None => ActionResult::skip(format!("{} 没有重复", file.name)),
        };
    }

    if let Err(e) = ctx.store.index_file(&file.full_path) {
        return ActionResult::fail(format!("登记内容指纹失败 {}: {:#}", file.name, e));
    }

    match original {
        Some(original) => match ctx.store.add_tag(&file.full_path, tag) {
            Ok(_) => ActionResult::done(format!(
                "已标记为重复: {}（与 {} 相同）",
                file.name,
                original.display()
            )),
            Err(e) => ActionResult::fail(format!("添加标签失败: {:#}", e)),
        },
        None => ActionResult::skip(format!("{} 没有重复", file.name)),
    }
}

/// 文件移动后让标签记录跟随
fn follow_in_store(ctx: &ActionContext, from: &Path, to: &Path) {
    if let Err(e) = ctx.store.rename_path(from, to) {
        tracing::warn!("更新标签记录路径失败: {}", e);
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}
