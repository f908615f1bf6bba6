//! 引擎错误类型
//!
//! 只有配置错误（规则格式不合法、未知的条件/动作类型）才会让整个调用失败，
//! 单个文件的问题都记录在各自的结果里。

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// 规则既没有条件也没有动作
    #[error("规则 \"{0}\" 没有任何条件和动作")]
    EmptyRule(String),

    /// 同一配置中规则名重复
    #[error("规则名重复: {0}")]
    DuplicateRuleName(String),

    /// 规则名为空
    #[error("规则名不能为空")]
    UnnamedRule,

    /// 配置文档无法解析（包括未知的条件/动作类型）
    #[error("配置格式错误: {0}")]
    InvalidProfile(String),

    #[error("IO错误: {0}")]
    Io(#[from] io::Error),

    #[error("JSON错误: {0}")]
    Json(#[from] serde_json::Error),

    #[error("数据库错误: {0}")]
    Database(#[from] rusqlite::Error),
}

impl EngineError {
    /// 是否属于规则/配置校验错误
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            EngineError::EmptyRule(_)
                | EngineError::DuplicateRuleName(_)
                | EngineError::UnnamedRule
                | EngineError::InvalidProfile(_)
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
