//! 规则与配置（Profile）模型
//!
//! 配置文档是 JSON，条件和动作都是 `{ "type": ..., "args": {...} }` 形式。
//! 未知的类型在加载时直接报错，不会被静默忽略。

use crate::core::action::Action;
use crate::core::category::{CustomCategory, SmartRule};
use crate::core::condition::Condition;
use crate::core::error::{EngineError, EngineResult};
use crate::core::models::FileDescriptor;
use crate::core::pending::StoreView;
use crate::storage::database::TagStore;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

/// 条件组合方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// 全部满足
    #[default]
    #[serde(alias = "ALL")]
    All,
    /// 任一满足
    #[serde(alias = "ANY")]
    Any,
}

/// 单条规则
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// 规则名（同一配置内唯一）
    pub name: String,
    #[serde(default)]
    pub match_mode: MatchMode,
    /// 匹配后是否停止评估后续规则
    #[serde(default)]
    pub stop_on_match: bool,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub actions: Vec<Action>,
}

impl Rule {
    /// 按匹配方式评估条件（短路求值）
    ///
    /// 没有条件的规则：ALL 下匹配所有文件，ANY 下不匹配任何文件。
    pub fn matches(&self, file: &FileDescriptor, store: &TagStore) -> bool {
        self.matches_in(file, &StoreView::direct(store))
    }

    pub fn matches_in(&self, file: &FileDescriptor, view: &StoreView) -> bool {
        match self.match_mode {
            MatchMode::All => self.conditions.iter().all(|c| c.evaluate_in(file, view)),
            MatchMode::Any => self.conditions.iter().any(|c| c.evaluate_in(file, view)),
        }
    }

    /// 规则是否包含删除类动作
    pub fn has_delete_action(&self) -> bool {
        self.actions.iter().any(Action::is_delete_class)
    }
}

/// 规则配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Profile {
    pub name: String,
    /// 按存储顺序评估的规则
    pub rules: Vec<Rule>,
    /// 自定义类别
    pub custom_categories: Vec<CustomCategory>,
    /// 关键词/年龄智能规则
    pub smart_rules: Vec<SmartRule>,
    /// 禁用的内置类别
    pub disabled_categories: Vec<String>,
}

impl Profile {
    /// 从 JSON 解析并校验
    pub fn from_json(json: &str) -> EngineResult<Self> {
        let profile: Profile =
            serde_json::from_str(json).map_err(|e| EngineError::InvalidProfile(e.to_string()))?;
        profile.validate()?;
        Ok(profile)
    }

    /// 校验规则：名字非空且唯一，不允许既无条件又无动作
    pub fn validate(&self) -> EngineResult<()> {
        let mut names = HashSet::new();
        for rule in &self.rules {
            if rule.name.trim().is_empty() {
                return Err(EngineError::UnnamedRule);
            }
            if rule.conditions.is_empty() && rule.actions.is_empty() {
                return Err(EngineError::EmptyRule(rule.name.clone()));
            }
            if !names.insert(rule.name.as_str()) {
                return Err(EngineError::DuplicateRuleName(rule.name.clone()));
            }
        }
        Ok(())
    }

    /// 按名字查找规则
    pub fn rule(&self, name: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.name == name)
    }
}

/// 规则配置来源
///
/// 每个批次开始前都重新加载一次，不跨批次缓存。
pub trait ProfileSource: Send + Sync {
    fn load(&self) -> EngineResult<Profile>;
}

/// 从磁盘 JSON 文件加载
#[derive(Debug, Clone)]
pub struct ProfileFile {
    path: PathBuf,
}

impl ProfileFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl ProfileSource for ProfileFile {
    fn load(&self) -> EngineResult<Profile> {
        let content = fs::read_to_string(&self.path)?;
        let profile = Profile::from_json(&content)?;
        tracing::debug!(
            "已加载规则配置 {}（{} 条规则）",
            self.path.display(),
            profile.rules.len()
        );
        Ok(profile)
    }
}

/// 内存中的固定配置（测试、单次运行）
impl ProfileSource for Profile {
    fn load(&self) -> EngineResult<Profile> {
        self.validate()?;
        Ok(self.clone())
    }
}
