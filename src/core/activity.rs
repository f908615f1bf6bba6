//! 活动日志
//!
//! 整理器把每个文件的处理过程写成可读的日志行，交给注入的 sink。
//! 界面、命令行或测试各自决定如何展示这些内容。

use std::sync::Mutex;

/// 活动日志接收方
pub trait ActivitySink: Send + Sync {
    fn record(&self, line: &str);
}

/// 写入 tracing（命令行默认）
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ActivitySink for TracingSink {
    fn record(&self, line: &str) {
        tracing::info!(target: "sortkeeper::activity", "{}", line);
    }
}

/// 保存在内存中（界面展示、测试断言）
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前所有日志行
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// 取出并清空
    pub fn drain(&self) -> Vec<String> {
        std::mem::take(&mut *self.lines.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

impl ActivitySink for MemorySink {
    fn record(&self, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(line.to_string());
    }
}
