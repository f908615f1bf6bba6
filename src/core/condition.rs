//! 规则条件
//!
//! 条件只读取文件快照（以及标签存储），不做任何修改。
//! 序列化格式为 `{"type": "...", "args": {...}}`，未知类型在加载时报错。

use crate::core::category::normalize_extension;
use crate::core::models::FileDescriptor;
use crate::core::pending::StoreView;
use crate::core::scanner::{detect_file_type, read_text_prefix};
use crate::storage::database::TagStore;
use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// ContentContains 最多读取的字节数
pub const CONTENT_SCAN_LIMIT: u64 = 1024 * 1024;

/// 单个匹配条件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "args")]
pub enum Condition {
    /// 文件名（不含扩展名）包含
    NameContains { text: String },
    /// 文件名（不含扩展名）以此开头
    NameStartsWith { text: String },
    /// 文件名（不含扩展名）以此结尾
    NameEndsWith { text: String },
    /// 文件名（不含扩展名）等于
    NameEquals { text: String },
    /// 完整文件名匹配正则
    RegexMatch { pattern: Pattern },
    /// 扩展名属于列表之一
    ExtensionIs { extensions: Vec<String> },
    /// 文件大于指定字节数
    FileSizeGreaterThan { bytes: u64 },
    /// 距最后修改超过指定天数
    FileAgeGreaterThan { days: u64 },
    /// 最后修改早于指定时间
    LastModifiedBefore { date: DateBound },
    IsHidden,
    IsReadOnly,
    IsDirectory,
    /// 父目录名包含
    ParentFolderContains { text: String },
    /// 文件内容（前 1MB）包含
    ContentContains { text: String },
    /// 颜色标签等于
    ColorIs { color: String },
    /// 带有标签
    HasTag { tag: String },
    /// 元数据字段等于
    MetadataFieldEquals { field: String, value: String },
    /// 与已登记的某个文件内容完全相同
    IsDuplicate,
}

impl Condition {
    /// 条件类型名
    pub fn kind(&self) -> &'static str {
        match self {
            Condition::NameContains { .. } => "NameContains",
            Condition::NameStartsWith { .. } => "NameStartsWith",
            Condition::NameEndsWith { .. } => "NameEndsWith",
            Condition::NameEquals { .. } => "NameEquals",
            Condition::RegexMatch { .. } => "RegexMatch",
            Condition::ExtensionIs { .. } => "ExtensionIs",
            Condition::FileSizeGreaterThan { .. } => "FileSizeGreaterThan",
            Condition::FileAgeGreaterThan { .. } => "FileAgeGreaterThan",
            Condition::LastModifiedBefore { .. } => "LastModifiedBefore",
            Condition::IsHidden => "IsHidden",
            Condition::IsReadOnly => "IsReadOnly",
            Condition::IsDirectory => "IsDirectory",
            Condition::ParentFolderContains { .. } => "ParentFolderContains",
            Condition::ContentContains { .. } => "ContentContains",
            Condition::ColorIs { .. } => "ColorIs",
            Condition::HasTag { .. } => "HasTag",
            Condition::MetadataFieldEquals { .. } => "MetadataFieldEquals",
            Condition::IsDuplicate => "IsDuplicate",
        }
    }

    /// 检查文件是否满足此条件
    ///
    /// 读取失败（文件已消失、无权限、数据库出错）一律视为不满足。
    pub fn evaluate(&self, file: &FileDescriptor, store: &TagStore) -> bool {
        self.evaluate_in(file, &StoreView::direct(store))
    }

    /// 透过读取视图评估（Dry Run 下能看到同批次尚未落地的标签和移动）
    pub fn evaluate_in(&self, file: &FileDescriptor, view: &StoreView) -> bool {
        match self {
            Condition::NameContains { text } => lower(&file.stem).contains(&lower(text)),
            Condition::NameStartsWith { text } => lower(&file.stem).starts_with(&lower(text)),
            Condition::NameEndsWith { text } => lower(&file.stem).ends_with(&lower(text)),
            Condition::NameEquals { text } => lower(&file.stem) == lower(text),
            Condition::RegexMatch { pattern } => pattern.0.is_match(&file.name),
            Condition::ExtensionIs { extensions } => {
                !file.extension.is_empty()
                    && extensions
                        .iter()
                        .any(|e| normalize_extension(e) == file.extension)
            }
            Condition::FileSizeGreaterThan { bytes } => file.size > *bytes,
            Condition::FileAgeGreaterThan { days } => {
                Utc::now().signed_duration_since(file.modified_at).num_days() > *days as i64
            }
            Condition::LastModifiedBefore { date } => file.modified_at < date.0,
            Condition::IsHidden => file.is_hidden,
            Condition::IsReadOnly => file.is_read_only,
            Condition::IsDirectory => file.is_directory,
            Condition::ParentFolderContains { text } => file
                .parent_dir()
                .file_name()
                .map(|n| lower(&n.to_string_lossy()).contains(&lower(text)))
                .unwrap_or(false),
            Condition::ContentContains { text } => {
                if file.is_directory {
                    return false;
                }
                match read_text_prefix(&view.origin(&file.full_path), CONTENT_SCAN_LIMIT) {
                    Ok(content) => lower(&content).contains(&lower(text)),
                    Err(e) => {
                        tracing::debug!("读取内容失败 {}: {}", file.full_path.display(), e);
                        false
                    }
                }
            }
            Condition::ColorIs { color } => match view.color(&file.full_path) {
                Ok(Some(current)) => current.eq_ignore_ascii_case(color),
                Ok(None) => false,
                Err(e) => {
                    tracing::warn!("读取颜色标签失败: {}", e);
                    false
                }
            },
            Condition::HasTag { tag } => match view.tags(&file.full_path) {
                Ok(tags) => tags.contains(tag),
                Err(e) => {
                    tracing::warn!("读取标签失败: {}", e);
                    false
                }
            },
            Condition::MetadataFieldEquals { field, value } => {
                match metadata_value(file, view, field) {
                    Some(actual) => actual.trim().eq_ignore_ascii_case(value.trim()),
                    None => false,
                }
            }
            Condition::IsDuplicate => {
                if file.is_directory {
                    return false;
                }
                match view.duplicate_of(&file.full_path) {
                    Ok(original) => original.is_some(),
                    Err(e) => {
                        tracing::debug!("重复检测失败 {}: {}", file.full_path.display(), e);
                        false
                    }
                }
            }
        }
    }
}

fn lower(s: &str) -> String {
    s.to_lowercase()
}

/// 先查存储中的元数据字段，再回退到内置字段
fn metadata_value(file: &FileDescriptor, view: &StoreView, field: &str) -> Option<String> {
    match view.metadata_field(&file.full_path, field) {
        Ok(Some(value)) => return Some(value),
        Ok(None) => {}
        Err(e) => tracing::warn!("读取元数据失败: {}", e),
    }

    match field {
        "name" => Some(file.name.clone()),
        "stem" => Some(file.stem.clone()),
        "extension" => Some(file.extension.clone()),
        "size" => Some(file.size.to_string()),
        "mime" => detect_file_type(&view.origin(&file.full_path)),
        "color" => view.color(&file.full_path).ok().flatten(),
        _ => None,
    }
}

/// 加载时即编译的正则
#[derive(Debug, Clone)]
pub struct Pattern(pub Regex);

impl Pattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(Pattern)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_str() == other.0.as_str()
    }
}

impl Serialize for Pattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.0.as_str())
    }
}

impl<'de> Deserialize<'de> for Pattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Pattern::new(&raw).map_err(|e| de::Error::custom(format!("无效的正则表达式 \"{}\": {}", raw, e)))
    }
}

/// 时间界限，接受 RFC 3339 时间或 `YYYY-MM-DD`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateBound(pub DateTime<Utc>);

impl DateBound {
    pub fn parse(raw: &str) -> Option<Self> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(DateBound(dt.with_timezone(&Utc)));
        }
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| DateBound(dt.and_utc()))
    }
}

impl Serialize for DateBound {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_rfc3339())
    }
}

impl<'de> Deserialize<'de> for DateBound {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateBound::parse(&raw).ok_or_else(|| de::Error::custom(format!("无效的日期: {}", raw)))
    }
}
