//! 类别解析模块
//!
//! 为文件确定唯一的目标类别名。优先级从高到低：
//! 1. 启用的自定义类别，其扩展名列表包含该文件扩展名
//! 2. 关键词/文件年龄智能规则（目标类别需启用）
//! 3. 内置扩展名表（同名自定义类别会覆盖内置类别）
//! 4. 兜底类别 "Other"

use crate::core::models::FileDescriptor;
use crate::core::rule::Profile;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// 兜底类别
pub const FALLBACK_CATEGORY: &str = "Other";

/// 内置类别表
const DEFAULT_CATEGORIES: &[(&str, &[&str])] = &[
    ("PDF", &[".pdf"]),
    (
        "Images",
        &[
            ".jpg", ".jpeg", ".png", ".gif", ".bmp", ".webp", ".svg", ".ico", ".heic", ".heif",
            ".tif", ".tiff", ".raw",
        ],
    ),
    (
        "Videos",
        &[".mp4", ".avi", ".mkv", ".mov", ".wmv", ".flv", ".webm", ".m4v"],
    ),
    (
        "Music",
        &[".mp3", ".wav", ".flac", ".aac", ".ogg", ".wma", ".m4a"],
    ),
    (
        "Documents",
        &[".doc", ".docx", ".txt", ".md", ".rtf", ".odt", ".pages", ".epub"],
    ),
    ("Spreadsheets", &[".xls", ".xlsx", ".csv", ".ods", ".numbers"]),
    ("Presentations", &[".ppt", ".pptx", ".odp", ".key"]),
    (
        "Archives",
        &[".zip", ".rar", ".7z", ".tar", ".gz", ".bz2", ".xz"],
    ),
    (
        "Code",
        &[
            ".rs", ".py", ".js", ".ts", ".java", ".c", ".cpp", ".h", ".go", ".rb", ".sh", ".json",
            ".yaml", ".yml", ".toml", ".html", ".css",
        ],
    ),
    (
        "Executables",
        &[".exe", ".msi", ".dmg", ".pkg", ".deb", ".rpm", ".appimage"],
    ),
    ("Fonts", &[".ttf", ".otf", ".woff", ".woff2"]),
];

/// 用户自定义类别
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomCategory {
    /// 类别名（即目标子目录名）
    pub name: String,
    /// 扩展名列表
    #[serde(default)]
    pub extensions: Vec<String>,
    /// 是否启用
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// 关键词/年龄智能规则
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmartRule {
    /// 文件名关键词（任一包含即可，不区分大小写）
    #[serde(default)]
    pub keywords: Vec<String>,
    /// 最小文件年龄（天）
    #[serde(default)]
    pub min_age_days: Option<u64>,
    /// 目标类别
    pub category: String,
}

impl SmartRule {
    /// 关键词和年龄条件需同时满足；两者都未设置的规则不匹配任何文件
    fn matches(&self, file: &FileDescriptor, now: DateTime<Utc>) -> bool {
        if self.keywords.is_empty() && self.min_age_days.is_none() {
            return false;
        }

        if !self.keywords.is_empty() {
            let stem = file.stem.to_lowercase();
            if !self.keywords.iter().any(|k| stem.contains(&k.to_lowercase())) {
                return false;
            }
        }

        if let Some(days) = self.min_age_days {
            let age = now.signed_duration_since(file.modified_at);
            if age.num_days() < days as i64 {
                return false;
            }
        }

        true
    }
}

/// 规范化扩展名：小写，带前导点
pub fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().to_lowercase();
    if ext.is_empty() || ext.starts_with('.') {
        ext
    } else {
        format!(".{}", ext)
    }
}

/// 在内置表中查找扩展名对应的类别
pub fn default_category_for(extension: &str) -> Option<&'static str> {
    let ext = normalize_extension(extension);
    DEFAULT_CATEGORIES
        .iter()
        .find(|(_, exts)| exts.contains(&ext.as_str()))
        .map(|(name, _)| *name)
}

fn find_custom<'a>(profile: &'a Profile, name: &str) -> Option<&'a CustomCategory> {
    profile
        .custom_categories
        .iter()
        .find(|c| c.name.eq_ignore_ascii_case(name))
}

fn is_disabled(profile: &Profile, name: &str) -> bool {
    profile
        .disabled_categories
        .iter()
        .any(|d| d.eq_ignore_ascii_case(name))
}

/// 类别是否启用
pub fn is_category_enabled(profile: &Profile, name: &str) -> bool {
    match find_custom(profile, name) {
        Some(custom) => custom.enabled,
        None => !is_disabled(profile, name),
    }
}

/// 解析文件的目标类别
pub fn resolve(file: &FileDescriptor, profile: &Profile) -> String {
    resolve_at(file, profile, Utc::now())
}

/// 以给定的"当前时间"解析类别（年龄规则依赖当前时间）
pub fn resolve_at(file: &FileDescriptor, profile: &Profile, now: DateTime<Utc>) -> String {
    let ext = file.extension.as_str();

    // 1. 自定义类别
    if !ext.is_empty() {
        if let Some(custom) = profile.custom_categories.iter().find(|c| {
            c.enabled && c.extensions.iter().any(|e| normalize_extension(e) == ext)
        }) {
            return custom.name.clone();
        }
    }

    // 2. 智能规则
    if let Some(rule) = profile
        .smart_rules
        .iter()
        .find(|r| r.matches(file, now) && is_category_enabled(profile, &r.category))
    {
        return rule.category.clone();
    }

    // 3. 内置表，被同名自定义类别覆盖时跳过
    if let Some(name) = default_category_for(ext) {
        if find_custom(profile, name).is_none() && !is_disabled(profile, name) {
            return name.to_string();
        }
    }

    FALLBACK_CATEGORY.to_string()
}

/// 所有可能的类别目录名（扫描时用于跳过已整理过的子目录）
pub fn known_categories(profile: &Profile) -> BTreeSet<String> {
    let mut names: BTreeSet<String> = DEFAULT_CATEGORIES
        .iter()
        .map(|(name, _)| name.to_string())
        .collect();
    names.extend(profile.custom_categories.iter().map(|c| c.name.clone()));
    names.extend(profile.smart_rules.iter().map(|r| r.category.clone()));
    names.insert(FALLBACK_CATEGORY.to_string());
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::path::PathBuf;

    fn file(name: &str) -> FileDescriptor {
        FileDescriptor::new(PathBuf::from("/in").join(name), 100, Utc::now(), false)
    }

    #[test]
    fn test_default_table() {
        let profile = Profile::default();
        assert_eq!(resolve(&file("report.pdf"), &profile), "PDF");
        assert_eq!(resolve(&file("photo.JPG"), &profile), "Images");
        assert_eq!(resolve(&file("mystery.xyz"), &profile), FALLBACK_CATEGORY);
        assert_eq!(resolve(&file("noext"), &profile), FALLBACK_CATEGORY);
    }

    #[test]
    fn test_custom_category_wins() {
        let profile = Profile {
            custom_categories: vec![CustomCategory {
                name: "Scans".to_string(),
                extensions: vec!["PDF".to_string()],
                enabled: true,
            }],
            ..Default::default()
        };
        assert_eq!(resolve(&file("report.pdf"), &profile), "Scans");
    }

    #[test]
    fn test_disabled_custom_category_is_ignored() {
        let profile = Profile {
            custom_categories: vec![CustomCategory {
                name: "Scans".to_string(),
                extensions: vec![".pdf".to_string()],
                enabled: false,
            }],
            ..Default::default()
        };
        assert_eq!(resolve(&file("report.pdf"), &profile), "PDF");
    }

    #[test]
    fn test_custom_override_hides_default_mapping() {
        // 同名自定义类别覆盖内置 Images，且不包含 .gif
        let profile = Profile {
            custom_categories: vec![CustomCategory {
                name: "Images".to_string(),
                extensions: vec![".png".to_string()],
                enabled: true,
            }],
            ..Default::default()
        };
        assert_eq!(resolve(&file("a.png"), &profile), "Images");
        assert_eq!(resolve(&file("a.gif"), &profile), FALLBACK_CATEGORY);
    }

    #[test]
    fn test_smart_rule_keyword_and_age() {
        let profile = Profile {
            smart_rules: vec![
                SmartRule {
                    keywords: vec!["invoice".to_string()],
                    min_age_days: None,
                    category: "Finance".to_string(),
                },
                SmartRule {
                    keywords: vec![],
                    min_age_days: Some(365),
                    category: "Old".to_string(),
                },
            ],
            ..Default::default()
        };
        let now = Utc::now();

        assert_eq!(resolve_at(&file("Invoice_2023.pdf"), &profile, now), "Finance");

        let mut old = file("notes.txt");
        old.modified_at = now - Duration::days(400);
        assert_eq!(resolve_at(&old, &profile, now), "Old");
        assert_eq!(resolve_at(&file("notes.txt"), &profile, now), "Documents");
    }

    #[test]
    fn test_smart_rule_needs_enabled_target() {
        let profile = Profile {
            smart_rules: vec![SmartRule {
                keywords: vec!["invoice".to_string()],
                min_age_days: None,
                category: "Documents".to_string(),
            }],
            disabled_categories: vec!["Documents".to_string()],
            ..Default::default()
        };
        assert_eq!(resolve(&file("invoice.pdf"), &profile), "PDF");
        assert_eq!(resolve(&file("invoice.txt"), &profile), FALLBACK_CATEGORY);
    }

    #[test]
    fn test_known_categories() {
        let names = known_categories(&Profile::default());
        assert!(names.contains("PDF"));
        assert!(names.contains(FALLBACK_CATEGORY));
    }
}
