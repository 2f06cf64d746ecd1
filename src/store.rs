//! JSON-backed curation state: the candidate list and the permanent keep-list.
//!
//! Every write goes through [`write_atomic`] so a crash mid-write leaves the
//! previous file intact.

use crate::model::{ChatId, ChatRecord};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeSet, HashSet},
    fs::File,
    io::{self, Write},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::debug;

const TEMP_FILE_SUFFIX: &str = ".tmp";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("corrupt file {}: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("cannot encode {}: {source}", .path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Write `bytes` next to `path`, flush, then rename over it.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }
    let tmp = PathBuf::from(format!("{}{}", path.display(), TEMP_FILE_SUFFIX));
    let mut f = File::create(&tmp).map_err(|e| StoreError::io(&tmp, e))?;
    f.write_all(bytes).map_err(|e| StoreError::io(&tmp, e))?;
    f.sync_all().map_err(|e| StoreError::io(&tmp, e))?;
    drop(f);
    std::fs::rename(&tmp, path).map_err(|e| StoreError::io(path, e))?;
    Ok(())
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let mut bytes = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Encode {
        path: path.to_path_buf(),
        source,
    })?;
    bytes.push(b'\n');
    write_atomic(path, &bytes)
}

/// `Ok(None)` when the file does not exist.
fn read_optional(path: &Path) -> Result<Option<String>, StoreError> {
    match std::fs::read_to_string(path) {
        Ok(t) => Ok(Some(t)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

/// Ordered set of chat records keyed by `chat_id`.
///
/// Order is display order only; a `chat_id` appears at most once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CandidateList {
    records: Vec<ChatRecord>,
}

impl CandidateList {
    /// Builds a list, dropping later duplicates of an already-seen `chat_id`.
    pub fn from_records(records: impl IntoIterator<Item = ChatRecord>) -> Self {
        let mut seen = HashSet::new();
        let records = records
            .into_iter()
            .filter(|r| seen.insert(r.chat_id))
            .collect();
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[ChatRecord] {
        &self.records
    }

    pub fn get(&self, index: usize) -> Option<&ChatRecord> {
        self.records.get(index)
    }

    pub fn contains(&self, chat_id: ChatId) -> bool {
        self.records.iter().any(|r| r.chat_id == chat_id)
    }

    pub fn remove_at(&mut self, index: usize) -> Option<ChatRecord> {
        (index < self.records.len()).then(|| self.records.remove(index))
    }

    pub fn remove(&mut self, chat_id: ChatId) -> Option<ChatRecord> {
        let idx = self.records.iter().position(|r| r.chat_id == chat_id)?;
        Some(self.records.remove(idx))
    }

    pub fn ids(&self) -> Vec<ChatId> {
        self.records.iter().map(|r| r.chat_id).collect()
    }
}

impl<'de> Deserialize<'de> for CandidateList {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        Vec::<ChatRecord>::deserialize(d).map(CandidateList::from_records)
    }
}

/// File holding one [`CandidateList`].
#[derive(Debug, Clone)]
pub struct CandidateStore {
    path: PathBuf,
}

impl CandidateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing file loads as an empty list; unparseable JSON is [`StoreError::Corrupt`].
    pub fn load(&self) -> Result<CandidateList, StoreError> {
        let Some(text) = read_optional(&self.path)? else {
            debug!("candidate file {} missing, starting empty", self.path.display());
            return Ok(CandidateList::default());
        };
        serde_json::from_str(&text).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    pub fn save(&self, list: &CandidateList) -> Result<(), StoreError> {
        write_json(&self.path, list)
    }
}

/// Dump an arbitrary record sequence (used by `store`).
pub fn save_records(path: &Path, records: &[ChatRecord]) -> Result<(), StoreError> {
    write_json(path, records)
}

/// Permanent exclusion set. Entries are only ever added.
pub trait KeepList {
    fn ids(&self) -> &BTreeSet<ChatId>;

    fn contains(&self, chat_id: ChatId) -> bool {
        self.ids().contains(&chat_id)
    }

    /// Adds `chat_id` and persists. Returns `false` if it was already present.
    fn append(&mut self, chat_id: ChatId) -> Result<bool, StoreError>;
}

#[derive(Deserialize)]
#[serde(untagged)]
enum KeepEntry {
    Id(ChatId),
    Object {
        #[serde(default)]
        id: Option<ChatId>,
    },
}

/// Keep-list persisted as a JSON array of chat ids.
#[derive(Debug)]
pub struct FileKeepList {
    path: PathBuf,
    ids: BTreeSet<ChatId>,
}

impl FileKeepList {
    /// A corrupt file is an error, never silently treated as empty: saving over
    /// it would drop every existing entry.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let ids = match read_optional(&path)? {
            None => BTreeSet::new(),
            Some(text) => {
                let entries: Vec<KeepEntry> =
                    serde_json::from_str(&text).map_err(|source| StoreError::Corrupt {
                        path: path.clone(),
                        source,
                    })?;
                entries
                    .into_iter()
                    .filter_map(|e| match e {
                        KeepEntry::Id(id) => Some(id),
                        KeepEntry::Object { id } => id,
                    })
                    .collect()
            }
        };
        Ok(Self { path, ids })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeepList for FileKeepList {
    fn ids(&self) -> &BTreeSet<ChatId> {
        &self.ids
    }

    fn append(&mut self, chat_id: ChatId) -> Result<bool, StoreError> {
        if self.ids.contains(&chat_id) {
            return Ok(false);
        }
        let mut next = self.ids.clone();
        next.insert(chat_id);
        write_json(&self.path, &next)?;
        self.ids = next;
        Ok(true)
    }
}

/// In-memory keep-list for callers that must not touch disk.
#[derive(Debug, Default, Clone)]
pub struct MemoryKeepList {
    ids: BTreeSet<ChatId>,
}

impl MemoryKeepList {
    pub fn new(ids: impl IntoIterator<Item = ChatId>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }
}

impl KeepList for MemoryKeepList {
    fn ids(&self) -> &BTreeSet<ChatId> {
        &self.ids
    }

    fn append(&mut self, chat_id: ChatId) -> Result<bool, StoreError> {
        Ok(self.ids.insert(chat_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ChatKind;

    fn rec(id: ChatId, name: &str) -> ChatRecord {
        ChatRecord::new(id, name, ChatKind::Private)
    }

    #[test]
    fn missing_candidate_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = CandidateStore::new(dir.path().join("nope.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn corrupt_candidate_file_is_distinct_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "invalid json {").unwrap();
        let err = CandidateStore::new(&path).load().unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[test]
    fn save_then_load_preserves_order_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = CandidateStore::new(dir.path().join("c.json"));
        let list = CandidateList::from_records([rec(3, "c"), rec(1, "a"), rec(2, "b")]);
        store.save(&list).unwrap();
        assert_eq!(store.load().unwrap(), list);
        assert!(!dir.path().join("c.json.tmp").exists());
    }

    #[test]
    fn duplicate_ids_collapse_to_first() {
        let list = CandidateList::from_records([rec(1, "first"), rec(2, "b"), rec(1, "again")]);
        assert_eq!(list.len(), 2);
        assert_eq!(list.get(0).unwrap().display_name, "first");
    }

    #[test]
    fn keep_list_append_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keep.json");
        let mut keep = FileKeepList::load(&path).unwrap();
        assert!(keep.append(10).unwrap());
        assert!(!keep.append(10).unwrap());
        assert!(keep.append(-20).unwrap());

        let reloaded = FileKeepList::load(&path).unwrap();
        assert_eq!(reloaded.ids().len(), 2);
        let on_disk: Vec<ChatId> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk, vec![-20, 10]);
    }

    #[test]
    fn keep_list_accepts_legacy_objects() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keep.json");
        std::fs::write(&path, r#"[{"id": 123, "name": "A"}, {"name": "no id"}, 456]"#).unwrap();
        let keep = FileKeepList::load(&path).unwrap();
        assert!(keep.contains(123));
        assert!(keep.contains(456));
        assert_eq!(keep.ids().len(), 2);
    }

    #[test]
    fn corrupt_keep_list_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keep.json");
        std::fs::write(&path, "corrupted {").unwrap();
        assert!(matches!(
            FileKeepList::load(&path),
            Err(StoreError::Corrupt { .. })
        ));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "corrupted {");
    }
}
