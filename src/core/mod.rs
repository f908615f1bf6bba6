//! Core模块 - 包含所有核心业务逻辑

pub mod action;
pub mod activity;
pub mod category;
pub mod condition;
pub mod error;
pub mod executor;
pub mod fsops;
pub mod hashing;
pub mod models;
pub mod naming;
pub mod pending;
pub mod planner;
pub mod rule;
pub mod rule_engine;
pub mod scanner;
pub mod template;
pub mod undo;
pub mod watcher;
