//! 规则引擎模块
//!
//! 按存储顺序评估规则，匹配后依次执行动作。
//! 每个动作执行前都重新获取文件状态，后一个动作能看到前一个动作的效果
//! （例如先改名再移动）。Dry Run 下文件不会真正变化，使用推演出的虚拟状态，
//! 条件也透过本批次的推演变更读取标签和元数据。
//!
//! 引擎本身没有副作用，幂等、安全模式和 Dry Run 的判断都由动作自己负责。

use crate::core::action::{Action, ActionContext, ActionResult, ActionStatus};
use crate::core::models::{FileDescriptor, MoveRecord};
use crate::core::rule::Rule;
use std::path::PathBuf;

/// 单个文件经过规则引擎后的结果
#[derive(Debug, Clone, Default)]
pub struct RuleOutcome {
    /// 第一条匹配的规则
    pub matched_rule: Option<String>,
    /// 所有匹配的规则（按评估顺序）
    pub matched_rules: Vec<String>,
    /// 是否被规则处理（处理过的文件不再走类别整理）
    pub handled: bool,
    /// 文件最终位置（或复制出的新文件），未变化时为 None
    pub final_dst: Option<PathBuf>,
    /// 是否所有动作都没有失败
    pub success: bool,
    /// 文件是否已被删除
    pub deleted: bool,
    /// 可读日志
    pub log: Vec<String>,
    /// 已完成的移动/复制记录
    pub records: Vec<MoveRecord>,
    /// 每个动作的结果
    pub results: Vec<ActionResult>,
}

impl RuleOutcome {
    fn unmatched() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    /// 是否有动作真正执行了（或 Dry Run 下将会执行）
    pub fn any_applied(&self) -> bool {
        self.results.iter().any(ActionResult::applied)
    }

    /// 第一条失败信息
    pub fn error(&self) -> Option<&str> {
        self.results
            .iter()
            .find(|r| r.failed())
            .map(|r| r.message.as_str())
    }

    /// 汇总状态
    pub fn status(&self) -> ActionStatus {
        if !self.success {
            ActionStatus::Failed
        } else if self.any_applied() {
            self.results
                .iter()
                .find(|r| r.applied())
                .map(|r| r.status)
                .unwrap_or(ActionStatus::Applied)
        } else if self.results.iter().any(ActionResult::blocked) {
            ActionStatus::BlockedBySafeMode
        } else {
            ActionStatus::SkippedIdempotent
        }
    }
}

/// 规则引擎
pub struct RuleEngine<'a> {
    /// 规则列表（按存储顺序）
    rules: &'a [Rule],
}

impl<'a> RuleEngine<'a> {
    pub fn new(rules: &'a [Rule]) -> Self {
        Self { rules }
    }

    /// 对单个文件执行规则
    pub fn execute(&self, file: &FileDescriptor, ctx: &ActionContext) -> RuleOutcome {
        let mut outcome = RuleOutcome::unmatched();
        let original = file.full_path.clone();
        let mut current = file.clone();
        let mut copied_to: Option<PathBuf> = None;
        let view = ctx.view();

        'rules: for rule in self.rules {
            if !rule.matches_in(&current, &view) {
                continue;
            }

            tracing::debug!("{} 匹配规则: {}", current.name, rule.name);
            if outcome.matched_rule.is_none() {
                outcome.matched_rule = Some(rule.name.clone());
            }
            outcome.matched_rules.push(rule.name.clone());
            outcome.handled = true;

            for action in &rule.actions {
                current = refresh(&current, ctx.config.dry_run);
                let result = action.run(&current, ctx);
                outcome
                    .log
                    .push(format!("[{}] {}: {}", rule.name, action.kind(), result.message));

                outcome.records.extend(result.undo_records.iter().cloned());
                if let Some(new_path) = &result.new_path {
                    if ctx.config.dry_run {
                        ctx.pending.relocate(&current.full_path, new_path);
                    }
                    current = current.relocated(new_path);
                }
                if let (Some(output), Action::Copy { .. }) =
                    (&result.output_path, action)
                {
                    copied_to = Some(output.clone());
                }

                let failed = result.failed();
                let deleted = action.is_delete_class() && result.applied();
                outcome.results.push(result);

                if failed {
                    outcome.success = false;
                    break 'rules;
                }
                if deleted {
                    if matches!(action, Action::Delete) {
                        outcome.deleted = true;
                    }
                    break 'rules;
                }
            }

            if rule.stop_on_match {
                break;
            }
        }

        outcome.final_dst = if outcome.deleted {
            None
        } else if current.full_path != original {
            Some(current.full_path.clone())
        } else {
            copied_to
        };
        outcome
    }
}

/// 对单个文件执行规则列表
pub fn execute(rules: &[Rule], file: &FileDescriptor, ctx: &ActionContext) -> RuleOutcome {
    RuleEngine::new(rules).execute(file, ctx)
}

/// 从磁盘重新读取文件状态；Dry Run 或文件已不在时沿用当前的推演状态
fn refresh(current: &FileDescriptor, dry_run: bool) -> FileDescriptor {
    if dry_run {
        return current.clone();
    }
    FileDescriptor::from_path(&current.full_path).unwrap_or_else(|_| current.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::condition::Condition;
    use crate::core::models::RunConfig;
    use crate::core::naming::PathReservations;
    use crate::core::pending::PendingChanges;
    use crate::core::rule::{MatchMode, Rule};
    use crate::storage::database::TagStore;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    fn rule(name: &str, conditions: Vec<Condition>, actions: Vec<Action>) -> Rule {
        Rule {
            name: name.to_string(),
            match_mode: MatchMode::All,
            stop_on_match: false,
            conditions,
            actions,
        }
    }

    fn pdf() -> Condition {
        Condition::ExtensionIs {
            extensions: vec![".pdf".to_string()],
        }
    }

    fn run(root: &Path, rules: &[Rule], file: &FileDescriptor, config: &RunConfig) -> RuleOutcome {
        let store = TagStore::open_in_memory().unwrap();
        let reservations = PathReservations::new();
        let pending = PendingChanges::new();
        let trash = root.join(".trash");
        let ctx = ActionContext {
            root,
            config,
            store: &store,
            reservations: &reservations,
            pending: &pending,
            trash_dir: &trash,
        };
        execute(rules, file, &ctx)
    }

    #[test]
    fn test_matching_rule_moves_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("invoice.pdf");
        fs::write(&path, "x").unwrap();
        let file = FileDescriptor::from_path(&path).unwrap();
        let rules = vec![rule(
            "archive pdf",
            vec![pdf()],
            vec![Action::Move {
                destination: "Archive".to_string(),
            }],
        )];

        let outcome = run(dir.path(), &rules, &file, &RunConfig::default());

        assert!(outcome.handled);
        assert!(outcome.success);
        assert_eq!(outcome.matched_rule.as_deref(), Some("archive pdf"));
        let expected = dir.path().join("Archive").join("invoice.pdf");
        assert_eq!(outcome.final_dst.as_deref(), Some(expected.as_path()));
        assert_eq!(outcome.records.len(), 1);
        assert!(expected.exists());
    }

    #[test]
    fn test_unmatched_file_is_not_handled() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        fs::write(&path, "x").unwrap();
        let file = FileDescriptor::from_path(&path).unwrap();
        let rules = vec![rule(
            "pdf only",
            vec![pdf()],
            vec![Action::Delete],
        )];

        let outcome = run(dir.path(), &rules, &file, &RunConfig::default());
        assert!(!outcome.handled);
        assert!(outcome.success);
        assert!(outcome.final_dst.is_none());
        assert!(path.exists());
    }

    #[test]
    fn test_rename_then_move_sees_new_name() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scan.pdf");
        fs::write(&path, "x").unwrap();
        let file = FileDescriptor::from_path(&path).unwrap();
        let rules = vec![rule(
            "rename and file",
            vec![pdf()],
            vec![
                Action::Rename {
                    new_name: "contract.pdf".to_string(),
                },
                Action::Move {
                    destination: "Contracts".to_string(),
                },
            ],
        )];

        for config in [RunConfig::default().as_dry_run(), RunConfig::default()] {
            let outcome = run(dir.path(), &rules, &file, &config);
            let expected = dir.path().join("Contracts").join("contract.pdf");
            assert_eq!(outcome.final_dst.as_deref(), Some(expected.as_path()));
        }
        assert!(dir.path().join("Contracts").join("contract.pdf").exists());
    }

    #[test]
    fn test_stop_on_match() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.pdf");
        fs::write(&path, "x").unwrap();
        let file = FileDescriptor::from_path(&path).unwrap();

        let mut first = rule(
            "first",
            vec![pdf()],
            vec![Action::AddTag {
                tag: "one".to_string(),
            }],
        );
        first.stop_on_match = true;
        let second = rule(
            "second",
            vec![pdf()],
            vec![Action::AddTag {
                tag: "two".to_string(),
            }],
        );

        let outcome = run(dir.path(), &[first.clone(), second.clone()], &file, &RunConfig::default());
        assert_eq!(outcome.matched_rules, vec!["first"]);

        first.stop_on_match = false;
        let outcome = run(dir.path(), &[first, second], &file, &RunConfig::default());
        assert_eq!(outcome.matched_rules, vec!["first", "second"]);
    }

    #[test]
    fn test_failed_action_stops_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.pdf");
        fs::write(&path, "x").unwrap();
        let file = FileDescriptor::from_path(&path).unwrap();
        let rules = vec![rule(
            "broken",
            vec![pdf()],
            vec![
                Action::Rename {
                    new_name: "bad/name.pdf".to_string(),
                },
                Action::Move {
                    destination: "Never".to_string(),
                },
            ],
        )];

        let outcome = run(dir.path(), &rules, &file, &RunConfig::default());
        assert!(outcome.handled);
        assert!(!outcome.success);
        assert_eq!(outcome.status(), ActionStatus::Failed);
        assert_eq!(outcome.results.len(), 1);
        assert!(!dir.path().join("Never").exists());
    }

    #[test]
    fn test_safe_mode_blocks_delete() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.pdf");
        fs::write(&path, "x").unwrap();
        let file = FileDescriptor::from_path(&path).unwrap();
        let rules = vec![rule("purge", vec![pdf()], vec![Action::Delete])];
        let config = RunConfig {
            safe_mode: true,
            ..Default::default()
        };

        let outcome = run(dir.path(), &rules, &file, &config);
        assert!(outcome.handled);
        assert!(outcome.success);
        assert!(!outcome.any_applied());
        assert_eq!(outcome.status(), ActionStatus::BlockedBySafeMode);
        assert!(path.exists());
    }

    #[test]
    fn test_delete_ends_processing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.pdf");
        fs::write(&path, "x").unwrap();
        let file = FileDescriptor::from_path(&path).unwrap();
        let rules = vec![
            rule("purge", vec![pdf()], vec![Action::Delete]),
            rule(
                "tag",
                vec![pdf()],
                vec![Action::AddTag {
                    tag: "late".to_string(),
                }],
            ),
        ];

        let outcome = run(dir.path(), &rules, &file, &RunConfig::default());
        assert!(outcome.deleted);
        assert!(outcome.final_dst.is_none());
        assert_eq!(outcome.matched_rules, vec!["purge"]);
        assert!(!path.exists());
    }

    #[test]
    fn test_dry_run_later_rule_sees_earlier_tag() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x.txt");
        fs::write(&path, "x").unwrap();
        let file = FileDescriptor::from_path(&path).unwrap();
        let rules = vec![
            rule(
                "tag everything",
                vec![],
                vec![Action::AddTag {
                    tag: "x".to_string(),
                }],
            ),
            rule(
                "file tagged",
                vec![Condition::HasTag {
                    tag: "x".to_string(),
                }],
                vec![Action::Move {
                    destination: "Tagged".to_string(),
                }],
            ),
        ];

        let expected = dir.path().join("Tagged").join("x.txt");
        let preview = run(dir.path(), &rules, &file, &RunConfig::default().as_dry_run());
        assert_eq!(preview.matched_rules, vec!["tag everything", "file tagged"]);
        assert_eq!(preview.final_dst.as_deref(), Some(expected.as_path()));
        assert!(path.exists());

        let applied = run(dir.path(), &rules, &file, &RunConfig::default());
        assert_eq!(applied.final_dst, preview.final_dst);
        assert!(expected.exists());
    }
}
