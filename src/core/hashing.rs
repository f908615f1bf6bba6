//! 内容哈希（重复文件检测用）
//!
//! 先用文件头部的快速哈希 + 大小筛选候选，再用全量哈希确认。

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// 快速哈希读取的字节数
pub const QUICK_HASH_BYTES: u64 = 64 * 1024;

/// 文件内容指纹
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentHash {
    pub size: u64,
    pub quick_hash: String,
    pub full_hash: Option<String>,
}

/// 计算文件前 64KB 的 SHA-256
pub fn quick_hash(path: &Path) -> io::Result<String> {
    let file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file.take(QUICK_HASH_BYTES), &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// 计算整个文件的 SHA-256
pub fn full_hash(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// 同时计算大小、快速哈希与全量哈希
pub fn fingerprint(path: &Path) -> io::Result<ContentHash> {
    let size = std::fs::metadata(path)?.len();
    Ok(ContentHash {
        size,
        quick_hash: quick_hash(path)?,
        full_hash: Some(full_hash(path)?),
    })
}

/// 两个文件内容是否完全相同
pub fn same_content(a: &Path, b: &Path) -> io::Result<bool> {
    if std::fs::metadata(a)?.len() != std::fs::metadata(b)?.len() {
        return Ok(false);
    }
    Ok(full_hash(a)? == full_hash(b)?)
}
