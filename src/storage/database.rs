//! 标签/元数据存储模块
//!
//! 使用SQLite存储文件的颜色标签、标签集合、内容哈希和缓存的元数据。
//! 以规范化后的绝对路径为键，所有调用经过同一把锁串行执行，
//! 目录监听的并发事件不会交错写坏同一条记录。

use crate::core::hashing::{self, ContentHash};
use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// 单个文件的完整记录
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TagRecord {
    pub path: PathBuf,
    pub color: Option<String>,
    pub tags: BTreeSet<String>,
    pub content_hash: Option<ContentHash>,
    pub metadata: BTreeMap<String, String>,
}

/// 标签存储
pub struct TagStore {
    conn: Mutex<Connection>,
}

impl TagStore {
    /// 打开或创建数据库
    pub fn open(path: &Path) -> Result<Self> {
        // 确保目录存在
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::from_connection(conn)
    }

    /// 内存数据库（测试和临时会话用）
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        Self::init_tables(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// 初始化表结构
    fn init_tables(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            -- 文件记录表
            CREATE TABLE IF NOT EXISTS files (
                path TEXT PRIMARY KEY,
                color TEXT,
                size INTEGER,
                quick_hash TEXT,
                full_hash TEXT,
                updated_at TEXT NOT NULL
            );

            -- 标签表
            CREATE TABLE IF NOT EXISTS tags (
                path TEXT NOT NULL,
                tag TEXT NOT NULL,
                PRIMARY KEY (path, tag)
            );

            -- 元数据缓存表
            CREATE TABLE IF NOT EXISTS metadata (
                path TEXT NOT NULL,
                field TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (path, field)
            );

            CREATE INDEX IF NOT EXISTS idx_files_hash ON files(size, quick_hash);
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 首次写入时创建记录
    fn ensure_record(conn: &Connection, key: &str) -> Result<()> {
        conn.execute(
            "INSERT OR IGNORE INTO files (path, updated_at) VALUES (?1, ?2)",
            params![key, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn touch(conn: &Connection, key: &str) -> Result<()> {
        conn.execute(
            "UPDATE files SET updated_at = ?2 WHERE path = ?1",
            params![key, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// 获取文件的所有标签
    pub fn get_tags(&self, path: &Path) -> Result<BTreeSet<String>> {
        let key = path_key(path);
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT tag FROM tags WHERE path = ?1 ORDER BY tag")?;
        let tags = stmt.query_map(params![key], |row| row.get::<_, String>(0))?;
        tags.collect::<Result<BTreeSet<_>, _>>().map_err(Into::into)
    }

    /// 添加标签，返回是否真的新增了
    pub fn add_tag(&self, path: &Path, tag: &str) -> Result<bool> {
        let key = path_key(path);
        let conn = self.lock();
        Self::ensure_record(&conn, &key)?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO tags (path, tag) VALUES (?1, ?2)",
            params![key, tag],
        )?;
        if inserted > 0 {
            Self::touch(&conn, &key)?;
        }
        Ok(inserted > 0)
    }

    /// 移除标签，返回是否真的删除了
    pub fn remove_tag(&self, path: &Path, tag: &str) -> Result<bool> {
        let key = path_key(path);
        let conn = self.lock();
        let removed = conn.execute(
            "DELETE FROM tags WHERE path = ?1 AND tag = ?2",
            params![key, tag],
        )?;
        if removed > 0 {
            Self::touch(&conn, &key)?;
        }
        Ok(removed > 0)
    }

    /// 获取颜色标签
    pub fn get_color(&self, path: &Path) -> Result<Option<String>> {
        let key = path_key(path);
        let conn = self.lock();
        let color = conn
            .query_row(
                "SELECT color FROM files WHERE path = ?1",
                params![key],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(color.flatten())
    }

    /// 设置颜色标签，返回是否有变化
    pub fn set_color(&self, path: &Path, color: Option<&str>) -> Result<bool> {
        let key = path_key(path);
        let conn = self.lock();
        Self::ensure_record(&conn, &key)?;
        let changed = conn.execute(
            "UPDATE files SET color = ?2, updated_at = ?3 WHERE path = ?1 AND color IS NOT ?2",
            params![key, color, Utc::now().to_rfc3339()],
        )?;
        Ok(changed > 0)
    }

    /// 获取缓存的内容哈希
    pub fn get_content_hash(&self, path: &Path) -> Result<Option<ContentHash>> {
        let key = path_key(path);
        let conn = self.lock();
        Self::read_hash(&conn, &key)
    }

    fn read_hash(conn: &Connection, key: &str) -> Result<Option<ContentHash>> {
        let row = conn
            .query_row(
                "SELECT size, quick_hash, full_hash FROM files WHERE path = ?1",
                params![key],
                |row| {
                    Ok((
                        row.get::<_, Option<u64>>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                },
            )
            .optional()?;

        Ok(match row {
            Some((Some(size), Some(quick_hash), full_hash)) => Some(ContentHash {
                size,
                quick_hash,
                full_hash,
            }),
            _ => None,
        })
    }

    /// 缓存内容哈希
    pub fn set_content_hash(
        &self,
        path: &Path,
        size: u64,
        quick_hash: &str,
        full_hash: Option<&str>,
    ) -> Result<()> {
        let key = path_key(path);
        let conn = self.lock();
        Self::ensure_record(&conn, &key)?;
        conn.execute(
            "UPDATE files SET size = ?2, quick_hash = ?3, full_hash = ?4, updated_at = ?5 WHERE path = ?1",
            params![key, size, quick_hash, full_hash, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// 查找大小和快速哈希都相同的其他文件
    pub fn find_duplicates(&self, path: &Path, size: u64, quick_hash: &str) -> Result<Vec<PathBuf>> {
        let key = path_key(path);
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT path FROM files WHERE size = ?1 AND quick_hash = ?2 AND path != ?3 ORDER BY path",
        )?;
        let rows = stmt.query_map(params![size, quick_hash, key], |row| row.get::<_, String>(0))?;
        let paths = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(paths.into_iter().map(PathBuf::from).collect())
    }

    /// 计算文件哈希并登记
    pub fn index_file(&self, path: &Path) -> Result<ContentHash> {
        let hash = hashing::fingerprint(path)?;
        self.set_content_hash(path, hash.size, &hash.quick_hash, hash.full_hash.as_deref())?;
        Ok(hash)
    }

    /// 查找与该文件内容完全相同、且仍然存在的已登记文件
    pub fn duplicate_of(&self, path: &Path) -> Result<Option<PathBuf>> {
        let size = std::fs::metadata(path)?.len();
        let quick = hashing::quick_hash(path)?;
        let candidates = self.find_duplicates(path, size, &quick)?;

        let mut own_full: Option<String> = None;
        for candidate in candidates {
            if !candidate.exists() {
                continue;
            }
            let theirs = match hashing::full_hash(&candidate) {
                Ok(hash) => hash,
                Err(_) => continue,
            };
            let own = match &own_full {
                Some(hash) => hash.clone(),
                None => {
                    let hash = hashing::full_hash(path)?;
                    own_full = Some(hash.clone());
                    hash
                }
            };
            if own == theirs {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    /// 读取元数据字段
    pub fn get_metadata_field(&self, path: &Path, field: &str) -> Result<Option<String>> {
        let key = path_key(path);
        let conn = self.lock();
        conn.query_row(
            "SELECT value FROM metadata WHERE path = ?1 AND field = ?2",
            params![key, field],
            |row| row.get(0),
        )
        .optional()
        .map_err(Into::into)
    }

    /// 写入元数据字段
    pub fn set_metadata_field(&self, path: &Path, field: &str, value: &str) -> Result<()> {
        let key = path_key(path);
        let conn = self.lock();
        Self::ensure_record(&conn, &key)?;
        conn.execute(
            r#"
            INSERT INTO metadata (path, field, value) VALUES (?1, ?2, ?3)
            ON CONFLICT(path, field) DO UPDATE SET value = ?3
            "#,
            params![key, field, value],
        )?;
        Self::touch(&conn, &key)?;
        Ok(())
    }

    /// 读取完整记录，不存在时返回 None
    pub fn get_record(&self, path: &Path) -> Result<Option<TagRecord>> {
        let key = path_key(path);
        let conn = self.lock();

        let color = conn
            .query_row(
                "SELECT color FROM files WHERE path = ?1",
                params![key],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        let color = match color {
            Some(color) => color,
            None => return Ok(None),
        };

        let tags = {
            let mut stmt = conn.prepare("SELECT tag FROM tags WHERE path = ?1")?;
            let rows = stmt.query_map(params![key], |row| row.get::<_, String>(0))?;
            rows.collect::<Result<BTreeSet<_>, _>>()?
        };
        let metadata = {
            let mut stmt = conn.prepare("SELECT field, value FROM metadata WHERE path = ?1")?;
            let rows = stmt.query_map(params![key], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            rows.collect::<Result<BTreeMap<_, _>, _>>()?
        };

        Ok(Some(TagRecord {
            path: PathBuf::from(&key),
            color,
            tags,
            content_hash: Self::read_hash(&conn, &key)?,
            metadata,
        }))
    }

    /// 文件被移动/改名后，让记录跟随新路径
    pub fn rename_path(&self, from: &Path, to: &Path) -> Result<()> {
        let from_key = path_key(from);
        let to_key = path_key(to);
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM files WHERE path = ?1", params![to_key])?;
        tx.execute("DELETE FROM tags WHERE path = ?1", params![to_key])?;
        tx.execute("DELETE FROM metadata WHERE path = ?1", params![to_key])?;
        tx.execute("UPDATE files SET path = ?2 WHERE path = ?1", params![from_key, to_key])?;
        tx.execute("UPDATE tags SET path = ?2 WHERE path = ?1", params![from_key, to_key])?;
        tx.execute("UPDATE metadata SET path = ?2 WHERE path = ?1", params![from_key, to_key])?;
        tx.commit()?;
        Ok(())
    }

    /// 清理已不存在的文件的记录（显式维护操作）
    pub fn cleanup_missing(&self) -> Result<usize> {
        let mut conn = self.lock();
        let stale: Vec<String> = {
            let mut stmt = conn.prepare("SELECT path FROM files")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .filter(|p| !Path::new(p).exists())
                .collect()
        };

        let tx = conn.transaction()?;
        for key in &stale {
            tx.execute("DELETE FROM files WHERE path = ?1", params![key])?;
            tx.execute("DELETE FROM tags WHERE path = ?1", params![key])?;
            tx.execute("DELETE FROM metadata WHERE path = ?1", params![key])?;
        }
        tx.commit()?;

        tracing::info!("已清理 {} 条失效的标签记录", stale.len());
        Ok(stale.len())
    }
}

/// 规范化为绝对路径（不要求文件存在）
pub fn normalize_path(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

fn path_key(path: &Path) -> String {
    normalize_path(path).to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_database_init() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("data").join("tags.db");

        let _store = TagStore::open(&db_path).unwrap();
        assert!(db_path.exists());
    }

    #[test]
    fn test_tags_are_idempotent() {
        let store = TagStore::open_in_memory().unwrap();
        let path = Path::new("/docs/a.txt");

        assert!(store.add_tag(path, "work").unwrap());
        assert!(!store.add_tag(path, "work").unwrap());
        assert_eq!(store.get_tags(path).unwrap().len(), 1);

        assert!(store.remove_tag(path, "work").unwrap());
        assert!(!store.remove_tag(path, "work").unwrap());
        assert!(!store.remove_tag(Path::new("/never/seen"), "x").unwrap());
    }

    #[test]
    fn test_paths_are_normalized() {
        let store = TagStore::open_in_memory().unwrap();
        store.add_tag(Path::new("/docs/./sub/../a.txt"), "x").unwrap();
        assert!(store.get_tags(Path::new("/docs/a.txt")).unwrap().contains("x"));
    }

    #[test]
    fn test_color_round() {
        let store = TagStore::open_in_memory().unwrap();
        let path = Path::new("/docs/a.txt");

        assert_eq!(store.get_color(path).unwrap(), None);
        assert!(store.set_color(path, Some("red")).unwrap());
        assert!(!store.set_color(path, Some("red")).unwrap());
        assert_eq!(store.get_color(path).unwrap().as_deref(), Some("red"));
    }

    #[test]
    fn test_find_duplicates_excludes_self() {
        let store = TagStore::open_in_memory().unwrap();
        store.set_content_hash(Path::new("/a/1.jpg"), 10, "abc", None).unwrap();
        store.set_content_hash(Path::new("/a/2.jpg"), 10, "abc", None).unwrap();
        store.set_content_hash(Path::new("/a/3.jpg"), 11, "abc", None).unwrap();

        let dups = store.find_duplicates(Path::new("/a/1.jpg"), 10, "abc").unwrap();
        assert_eq!(dups, vec![PathBuf::from("/a/2.jpg")]);
    }

    #[test]
    fn test_duplicate_of_confirms_full_content() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.jpg");
        let b = dir.path().join("b.jpg");
        let c = dir.path().join("c.jpg");
        fs::write(&a, "same bytes").unwrap();
        fs::write(&b, "same bytes").unwrap();
        fs::write(&c, "other byte").unwrap();

        let store = TagStore::open_in_memory().unwrap();
        store.index_file(&a).unwrap();

        assert_eq!(store.duplicate_of(&b).unwrap(), Some(normalize_path(&a)));
        assert_eq!(store.duplicate_of(&c).unwrap(), None);
        // 自己不算自己的重复
        assert_eq!(store.duplicate_of(&a).unwrap(), None);
    }

    #[test]
    fn test_rename_path_moves_record() {
        let store = TagStore::open_in_memory().unwrap();
        let from = Path::new("/in/a.txt");
        let to = Path::new("/out/a.txt");
        store.add_tag(from, "keep").unwrap();
        store.set_metadata_field(from, "project", "apollo").unwrap();

        store.rename_path(from, to).unwrap();

        assert!(store.get_tags(from).unwrap().is_empty());
        let record = store.get_record(to).unwrap().unwrap();
        assert!(record.tags.contains("keep"));
        assert_eq!(record.metadata.get("project").map(String::as_str), Some("apollo"));
    }

    #[test]
    fn test_cleanup_missing() {
        let dir = tempdir().unwrap();
        let alive = dir.path().join("alive.txt");
        fs::write(&alive, "x").unwrap();

        let store = TagStore::open_in_memory().unwrap();
        store.add_tag(&alive, "a").unwrap();
        store.add_tag(&dir.path().join("gone.txt"), "b").unwrap();

        assert_eq!(store.cleanup_missing().unwrap(), 1);
        assert!(store.get_record(&alive).unwrap().is_some());
    }
}
