//! SortKeeper - 规则驱动的本地文件整理工具
//!
//! 核心设计原则：
//! - 规则优先，没有规则匹配时才按类别整理
//! - 重复执行不会产生新的变化
//! - 任何移动都可以撤销，永不覆盖已有文件

pub mod core;
pub mod storage;
