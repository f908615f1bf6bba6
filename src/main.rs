//! SortKeeper 命令行入口

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use sortkeeper::core::category;
use sortkeeper::core::executor::{ExecutionSummary, Organizer, OrganizerSettings};
use sortkeeper::core::models::{AppConfig, FileDescriptor, RunConfig, TransferMode};
use sortkeeper::core::planner::{PlanStats, PlannedMove};
use sortkeeper::core::rule::{Profile, ProfileFile, ProfileSource};
use sortkeeper::core::scanner::FileScanner;
use sortkeeper::core::undo;
use sortkeeper::core::watcher::{WatchEvent, WatchOptions, WatchSession};
use sortkeeper::storage::config::ConfigManager;
use sortkeeper::storage::database::TagStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "sortkeeper", version, about = "规则驱动的本地文件整理工具")]
struct Cli {
    /// 配置文件路径（默认使用系统配置目录）
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 预览整理结果，不修改任何文件
    Preview(RunArgs),
    /// 执行整理
    Organize(RunArgs),
    /// 撤销目录最近一次整理
    Undo {
        /// 被整理的目录
        folder: PathBuf,
    },
    /// 监听目录：从标准输入逐行读取新文件路径并整理
    Watch(RunArgs),
    /// 清理已不存在文件的标签记录
    CleanupTags,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// 要整理的目录
    folder: PathBuf,
    /// 规则配置文件（JSON）
    #[arg(long)]
    profile: Option<PathBuf>,
    /// 包含子目录
    #[arg(long)]
    recursive: bool,
    /// 只预览，不修改
    #[arg(long)]
    dry_run: bool,
    /// 安全模式：禁止删除类动作
    #[arg(long)]
    safe_mode: bool,
    /// 按类别整理时复制而不是移动
    #[arg(long)]
    copy: bool,
    /// 同时处理隐藏文件
    #[arg(long)]
    include_hidden: bool,
    /// 没有规则匹配时不按类别整理
    #[arg(long)]
    no_fallback: bool,
    /// 并行线程数
    #[arg(long)]
    workers: Option<usize>,
    /// 以 JSON 输出结果
    #[arg(long)]
    json: bool,
}

impl RunArgs {
    fn run_config(&self, defaults: RunConfig) -> RunConfig {
        RunConfig {
            safe_mode: defaults.safe_mode || self.safe_mode,
            dry_run: defaults.dry_run || self.dry_run,
            skip_hidden: defaults.skip_hidden && !self.include_hidden,
            fallback_to_category_sort_on_rule_failure: defaults
                .fallback_to_category_sort_on_rule_failure
                && !self.no_fallback,
        }
    }

    fn profile_source(&self, config: &AppConfig) -> Arc<dyn ProfileSource> {
        match self.profile.clone().or_else(|| config.profile_path.clone()) {
            Some(path) => Arc::new(ProfileFile::new(path)),
            None => Arc::new(Profile::default()),
        }
    }
}

fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let manager = ConfigManager::new(cli.config.clone().unwrap_or_else(ConfigManager::default_path));
    let config = manager
        .load()
        .with_context(|| format!("无法读取配置文件 {}", manager.path().display()))?;

    match cli.command {
        Command::Preview(args) => preview(&config, &args),
        Command::Organize(args) => organize(&config, &args),
        Command::Undo { folder } => undo_folder(&config, &folder),
        Command::Watch(args) => watch(&config, &args),
        Command::CleanupTags => {
            let store = open_store(&config)?;
            let removed = store.cleanup_missing()?;
            println!("已清理 {} 条失效记录", removed);
            Ok(())
        }
    }
}

fn open_store(config: &AppConfig) -> Result<TagStore> {
    let path = ConfigManager::database_path(config);
    TagStore::open(&path).with_context(|| format!("无法打开标签数据库 {}", path.display()))
}

fn build_organizer(config: &AppConfig, args: &RunArgs) -> Result<Organizer> {
    let store = Arc::new(open_store(config)?);
    let mode = if args.copy {
        TransferMode::Copy
    } else {
        config.transfer_mode
    };
    let settings = OrganizerSettings::new(ConfigManager::trash_dir(config))
        .transfer_mode(mode)
        .workers(args.workers.unwrap_or(config.workers));
    Ok(Organizer::new(store, settings))
}

fn scan(config: &AppConfig, args: &RunArgs, profile: &Profile, run: &RunConfig) -> Result<Vec<FileDescriptor>> {
    FileScanner::new(args.folder.clone())
        .include_subfolders(args.recursive || config.include_subfolders)
        .skip_hidden(run.skip_hidden)
        .exclude_dirs(category::known_categories(profile))
        .exclude_path(ConfigManager::trash_dir(config))
        .scan()
}

fn preview(config: &AppConfig, args: &RunArgs) -> Result<()> {
    let run = args.run_config(config.run_defaults);
    let profile = args.profile_source(config).load()?;
    let organizer = build_organizer(config, args)?;
    let files = scan(config, args, &profile, &run)?;

    let entries = organizer.preview(&args.folder, &files, &profile, &run)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    for entry in &entries {
        let target = entry
            .dst
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_string());
        let reason = entry
            .rule_name
            .clone()
            .or_else(|| entry.category.clone())
            .unwrap_or_default();
        println!("{:?}\t{} -> {}\t{}", entry.status, entry.src.display(), target, reason);
    }
    println!("共 {} 个文件", entries.len());

    // 按类别整理的部分
    let planned: Vec<PlannedMove> = entries
        .iter()
        .filter_map(|e| match (&e.dst, &e.category) {
            (Some(dst), Some(category)) => Some(PlannedMove {
                src: e.src.clone(),
                dst: dst.clone(),
                category: category.clone(),
            }),
            _ => None,
        })
        .collect();
    if !planned.is_empty() {
        let stats = PlanStats::from_plan(&planned, &files);
        println!(
            "按类别整理: {} 个文件, {}, 涉及 {} 个目录",
            stats.total_operations,
            stats.format_size(),
            stats.target_directories
        );
    }
    Ok(())
}

fn organize(config: &AppConfig, args: &RunArgs) -> Result<()> {
    let run = args.run_config(config.run_defaults);
    let profile = args.profile_source(config).load()?;
    let organizer = build_organizer(config, args)?;
    let files = scan(config, args, &profile, &run)?;

    let entries = organizer.apply(&args.folder, &files, &profile, &run)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        for entry in entries.iter().filter(|e| e.error.is_some()) {
            eprintln!(
                "失败: {} ({})",
                entry.src.display(),
                entry.error.as_deref().unwrap_or_default()
            );
        }
        println!("{}", ExecutionSummary::from_entries(&entries).summary());
    }
    Ok(())
}

fn undo_folder(config: &AppConfig, folder: &Path) -> Result<()> {
    let store = open_store(config)?;
    let report = undo::undo_with_store(folder, Some(&store))?;
    for error in &report.errors {
        eprintln!("{}", error);
    }
    println!("{}", report.summary());
    Ok(())
}

fn watch(config: &AppConfig, args: &RunArgs) -> Result<()> {
    use tokio::io::{AsyncBufReadExt, BufReader};

    let organizer = build_organizer(config, args)?;
    let options = WatchOptions {
        include_subfolders: args.recursive || config.include_subfolders,
        run_config: args.run_config(config.run_defaults),
        settings: config.watch.clone(),
        ..WatchOptions::new(args.folder.clone())
    };
    let profiles = args.profile_source(config);

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let handle = WatchSession::spawn(organizer, profiles, options);
        let sender = handle.sender();

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                line = lines.next_line() => match line? {
                    Some(line) if !line.trim().is_empty() => {
                        if sender.send(WatchEvent::created(line.trim())).await.is_err() {
                            break;
                        }
                    }
                    Some(_) => {}
                    None => break,
                },
                _ = tokio::signal::ctrl_c() => break,
            }
        }

        let report = handle.stop().await;
        println!("{}", report.summary());
        Ok::<(), anyhow::Error>(())
    })
}
