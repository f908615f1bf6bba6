//! 持久化模块 - 配置文件与标签数据库

pub mod config;
pub mod database;
