//! 配置文件管理模块

use crate::core::models::AppConfig;
use anyhow::Result;
use std::path::PathBuf;

/// 配置管理器
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// 创建配置管理器
    pub fn new(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("com", "sortkeeper", "SortKeeper")
    }

    /// 获取默认配置路径
    pub fn default_path() -> PathBuf {
        Self::project_dirs()
            .map(|d| d.config_dir().join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    }

    /// 默认数据目录（标签数据库、回收站）
    pub fn default_data_dir() -> PathBuf {
        Self::project_dirs()
            .map(|d| d.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".sortkeeper"))
    }

    /// 配置文件路径
    pub fn path(&self) -> &PathBuf {
        &self.config_path
    }

    /// 加载配置
    pub fn load(&self) -> Result<AppConfig> {
        if self.config_path.exists() {
            let content = std::fs::read_to_string(&self.config_path)?;
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(AppConfig::default())
        }
    }

    /// 保存配置
    pub fn save(&self, config: &AppConfig) -> Result<()> {
        // 确保目录存在
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(config)?;
        std::fs::write(&self.config_path, content)?;
        Ok(())
    }

    /// 重置为默认配置
    pub fn reset(&self) -> Result<()> {
        self.save(&AppConfig::default())
    }

    /// 标签数据库路径
    pub fn database_path(config: &AppConfig) -> PathBuf {
        config
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join("tags.db"))
    }

    /// 回收站目录
    pub fn trash_dir(config: &AppConfig) -> PathBuf {
        config
            .trash_dir
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join("trash"))
    }
}
