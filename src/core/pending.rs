//! Dry Run 推演状态
//!
//! Dry Run 不写标签存储也不动文件，但同一文件后面的动作和规则需要看到
//! 前面动作"将会"产生的效果，预览才能和实际执行得出相同的结论。
//! `PendingChanges` 记录一个批次内尚未落地的变更，`StoreView` 把它叠加在标签存储之上读取。

use crate::core::hashing;
use crate::storage::database::{normalize_path, TagStore};
use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Pending {
    /// 虚拟路径 -> 磁盘上的真实路径
    origins: HashMap<PathBuf, PathBuf>,
    added_tags: HashMap<PathBuf, BTreeSet<String>>,
    removed_tags: HashMap<PathBuf, BTreeSet<String>>,
    colors: HashMap<PathBuf, String>,
    metadata: HashMap<PathBuf, BTreeMap<String, String>>,
    /// 将会登记内容指纹的文件
    indexed: BTreeSet<PathBuf>,
}

impl Pending {
    fn origin(&self, path: &Path) -> PathBuf {
        self.origins
            .get(path)
            .cloned()
            .unwrap_or_else(|| path.to_path_buf())
    }
}

fn move_entry<V>(map: &mut HashMap<PathBuf, V>, from: &Path, to: &Path) {
    if let Some(value) = map.remove(from) {
        map.insert(to.to_path_buf(), value);
    }
}

/// 一个批次内尚未落地的变更（只在 Dry Run 下写入）
#[derive(Debug, Default)]
pub struct PendingChanges {
    state: Mutex<Pending>,
}

impl PendingChanges {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Pending> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 文件被虚拟地移动/改名，记录随之迁移
    pub fn relocate(&self, from: &Path, to: &Path) {
        let from = normalize_path(from);
        let to = normalize_path(to);
        let mut state = self.lock();
        let origin = state.origin(&from);
        state.origins.remove(&from);
        state.origins.insert(to.clone(), origin);
        move_entry(&mut state.added_tags, &from, &to);
        move_entry(&mut state.removed_tags, &from, &to);
        move_entry(&mut state.colors, &from, &to);
        move_entry(&mut state.metadata, &from, &to);
        if state.indexed.remove(&from) {
            state.indexed.insert(to);
        }
    }

    pub fn add_tag(&self, path: &Path, tag: &str) {
        let path = normalize_path(path);
        let mut state = self.lock();
        if let Some(removed) = state.removed_tags.get_mut(&path) {
            removed.remove(tag);
        }
        state.added_tags.entry(path).or_default().insert(tag.to_string());
    }

    pub fn remove_tag(&self, path: &Path, tag: &str) {
        let path = normalize_path(path);
        let mut state = self.lock();
        if let Some(added) = state.added_tags.get_mut(&path) {
            added.remove(tag);
        }
        state.removed_tags.entry(path).or_default().insert(tag.to_string());
    }

    pub fn set_color(&self, path: &Path, color: &str) {
        self.lock().colors.insert(normalize_path(path), color.to_string());
    }

    pub fn set_metadata(&self, path: &Path, field: &str, value: &str) {
        self.lock()
            .metadata
            .entry(normalize_path(path))
            .or_default()
            .insert(field.to_string(), value.to_string());
    }

    /// 文件将被登记内容指纹
    pub fn mark_indexed(&self, path: &Path) {
        self.lock().indexed.insert(normalize_path(path));
    }
}

/// 标签存储的读取视图，Dry Run 时叠加本批次尚未落地的变更
#[derive(Clone, Copy)]
pub struct StoreView<'a> {
    store: &'a TagStore,
    pending: Option<&'a PendingChanges>,
}

impl<'a> StoreView<'a> {
    pub fn new(store: &'a TagStore, pending: Option<&'a PendingChanges>) -> Self {
        Self { store, pending }
    }

    /// 直接读取存储
    pub fn direct(store: &'a TagStore) -> Self {
        Self::new(store, None)
    }

    pub fn store(&self) -> &'a TagStore {
        self.store
    }

    /// 文件内容实际所在的路径（虚拟移动过的文件仍在原处）
    pub fn origin(&self, path: &Path) -> PathBuf {
        match self.pending {
            Some(pending) => {
                let key = normalize_path(path);
                let state = pending.lock();
                if state.origins.contains_key(&key) {
                    state.origin(&key)
                } else {
                    path.to_path_buf()
                }
            }
            None => path.to_path_buf(),
        }
    }

    pub fn tags(&self, path: &Path) -> Result<BTreeSet<String>> {
        let mut tags = self.store.get_tags(&self.origin(path))?;
        if let Some(pending) = self.pending {
            let key = normalize_path(path);
            let state = pending.lock();
            if let Some(removed) = state.removed_tags.get(&key) {
                tags.retain(|t| !removed.contains(t));
            }
            if let Some(added) = state.added_tags.get(&key) {
                tags.extend(added.iter().cloned());
            }
        }
        Ok(tags)
    }

    pub fn color(&self, path: &Path) -> Result<Option<String>> {
        if let Some(pending) = self.pending {
            if let Some(color) = pending.lock().colors.get(&normalize_path(path)) {
                return Ok(Some(color.clone()));
            }
        }
        self.store.get_color(&self.origin(path))
    }

    pub fn metadata_field(&self, path: &Path, field: &str) -> Result<Option<String>> {
        if let Some(pending) = self.pending {
            let state = pending.lock();
            if let Some(value) = state
                .metadata
                .get(&normalize_path(path))
                .and_then(|fields| fields.get(field))
            {
                return Ok(Some(value.clone()));
            }
        }
        self.store.get_metadata_field(&self.origin(path), field)
    }

    /// 当前内容的指纹是否已经登记过（已登记的文件视为原件）
    pub fn is_indexed(&self, path: &Path) -> Result<bool> {
        if let Some(pending) = self.pending {
            if pending.lock().indexed.contains(&normalize_path(path)) {
                return Ok(true);
            }
        }
        let origin = self.origin(path);
        match self.store.get_content_hash(&origin)? {
            Some(stored) => {
                let size = std::fs::metadata(&origin)?.len();
                Ok(stored.size == size && stored.quick_hash == hashing::quick_hash(&origin)?)
            }
            None => Ok(false),
        }
    }

    /// 查找与该文件内容相同的已登记文件（含本批次将要登记的）
    pub fn duplicate_of(&self, path: &Path) -> Result<Option<PathBuf>> {
        let origin = self.origin(path);
        if let Some(found) = self.store.duplicate_of(&origin)? {
            return Ok(Some(found));
        }
        let Some(pending) = self.pending else {
            return Ok(None);
        };

        let key = normalize_path(path);
        let candidates: Vec<(PathBuf, PathBuf)> = {
            let state = pending.lock();
            state
                .indexed
                .iter()
                .filter(|p| **p != key)
                .map(|p| (p.clone(), state.origin(p)))
                .collect()
        };
        for (virtual_path, source) in candidates {
            if source == origin || !source.exists() {
                continue;
            }
            if hashing::same_content(&origin, &source)? {
                return Ok(Some(virtual_path));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_pending_tags_follow_relocation() {
        let store = TagStore::open_in_memory().unwrap();
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let moved = dir.path().join("Tagged").join("a.txt");
        fs::write(&a, "a").unwrap();
        store.add_tag(&a, "kept").unwrap();

        let pending = PendingChanges::new();
        pending.add_tag(&a, "new");
        pending.set_color(&a, "red");
        pending.relocate(&a, &moved);

        let view = StoreView::new(&store, Some(&pending));
        let tags = view.tags(&moved).unwrap();
        assert!(tags.contains("kept"));
        assert!(tags.contains("new"));
        assert_eq!(view.color(&moved).unwrap().as_deref(), Some("red"));
        assert_eq!(view.origin(&moved), a);

        // 直接读取不受影响
        let direct = StoreView::direct(&store);
        assert!(!direct.tags(&a).unwrap().contains("new"));
        assert_eq!(direct.origin(&moved), moved);
    }

    #[test]
    fn test_pending_index_is_seen_as_duplicate_source() {
        let store = TagStore::open_in_memory().unwrap();
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");
        fs::write(&a, "same").unwrap();
        fs::write(&b, "same").unwrap();

        let pending = PendingChanges::new();
        let view = StoreView::new(&store, Some(&pending));
        assert_eq!(view.duplicate_of(&b).unwrap(), None);

        pending.mark_indexed(&a);
        assert!(view.is_indexed(&a).unwrap());
        assert_eq!(view.duplicate_of(&b).unwrap(), Some(normalize_path(&a)));
        assert!(!view.is_indexed(&b).unwrap());
    }

    #[test]
    fn test_removed_tag_hides_stored_tag() {
        let store = TagStore::open_in_memory().unwrap();
        let path = PathBuf::from("/in/a.txt");
        store.add_tag(&path, "old").unwrap();

        let pending = PendingChanges::new();
        pending.remove_tag(&path, "old");
        let view = StoreView::new(&store, Some(&pending));
        assert!(view.tags(&path).unwrap().is_empty());
    }
}
