//! Sibling-set key-value storage.
//!
//! A [`Store`] holds, per key, every version not causally dominated by
//! another version currently on hand — the sibling set the data model
//! describes in its Versioning section. `store_file`/`get_file` are the
//! storage-layer halves of the coordinator's `put`/`get`; `sort_data` is the
//! same reconciliation step applied across multiple replicas' responses
//! rather than a single store's local versions.
//!
//! Writes are appended to `<data_dir>/<hostname>.db` before being applied in
//! memory, so that `Store::open` can replay the log and rebuild identical
//! state after a restart. There is no compaction: the log grows with every
//! write, which is an accepted simplification for this scope (see
//! SPEC_FULL.md's Non-goals on durability tooling).

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use dynamo_types::{Context, Hostname, Key, KeyHash};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("failed to decode a persisted record: {0}")]
    Decode(#[from] postcard::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// One write as it is persisted to the append-only log.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LogEntry {
    key: Key,
    value: String,
    context: Context,
}

/// Reconciles a set of (context, value) versions down to its maximal
/// elements under [`Context::strictly_dominated_by`]: any version causally
/// superseded by another in the set is dropped.
///
/// Used both to fold a new write into a key's existing local versions and,
/// by the coordinator, to merge the rows a `get` gathered from several
/// replicas into the set returned to the client.
pub fn sort_data(rows: impl IntoIterator<Item = (Context, String)>) -> Vec<(Context, String)> {
    let mut kept: Vec<(Context, String)> = Vec::new();
    for (context, value) in rows {
        if kept
            .iter()
            .any(|(existing, _)| context.strictly_dominated_by(existing))
        {
            continue;
        }
        kept.retain(|(existing, _)| !existing.strictly_dominated_by(&context));
        if !kept
            .iter()
            .any(|(existing, existing_value)| *existing == context && *existing_value == value)
        {
            kept.push((context, value));
        }
    }
    kept
}

/// This node's local key-value store.
pub struct Store {
    hostname: Hostname,
    log_path: PathBuf,
    log: File,
    keys: HashMap<KeyHash, Key>,
    versions: HashMap<KeyHash, Vec<(Context, String)>>,
}

impl Store {
    /// Opens (creating if absent) the on-disk log under `data_dir` and
    /// replays it to rebuild in-memory state.
    pub fn open(data_dir: impl AsRef<Path>, hostname: Hostname) -> StorageResult<Self> {
        let data_dir = data_dir.as_ref();
        fs::create_dir_all(data_dir).map_err(|source| StorageError::Io {
            path: data_dir.to_path_buf(),
            source,
        })?;
        let log_path = data_dir.join(format!("{}.db", hostname.as_str()));

        let mut store = Self {
            hostname,
            log_path: log_path.clone(),
            log: OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_path)
                .map_err(|source| StorageError::Io {
                    path: log_path.clone(),
                    source,
                })?,
            keys: HashMap::new(),
            versions: HashMap::new(),
        };
        store.replay()?;
        Ok(store)
    }

    fn replay(&mut self) -> StorageResult<()> {
        let file = File::open(&self.log_path).map_err(|source| StorageError::Io {
            path: self.log_path.clone(),
            source,
        })?;
        let mut reader = BufReader::new(file);
        let mut len_buf = [0u8; 4];
        loop {
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(source) => {
                    return Err(StorageError::Io {
                        path: self.log_path.clone(),
                        source,
                    });
                }
            }
            let len = u32::from_be_bytes(len_buf) as usize;
            let mut payload = vec![0u8; len];
            reader
                .read_exact(&mut payload)
                .map_err(|source| StorageError::Io {
                    path: self.log_path.clone(),
                    source,
                })?;
            let entry: LogEntry = postcard::from_bytes(&payload)?;
            self.apply_in_memory(entry.key, entry.value, entry.context);
        }
        Ok(())
    }

    fn apply_in_memory(&mut self, key: Key, value: String, context: Context) -> Vec<(Context, String)> {
        let hash = key.hash();
        self.keys.entry(hash).or_insert_with(|| key.clone());
        let mut rows = self.versions.remove(&hash).unwrap_or_default();
        rows.push((context, value));
        let reconciled = sort_data(rows);
        self.versions.insert(hash, reconciled.clone());
        reconciled
    }

    /// Persists `value` under `key` with vector-clock `context`, reconciles
    /// it against the key's existing local versions, and returns the
    /// resulting sibling set.
    pub fn store_file(
        &mut self,
        key: Key,
        value: String,
        context: Context,
    ) -> StorageResult<Vec<(Context, String)>> {
        let entry = LogEntry {
            key: key.clone(),
            value: value.clone(),
            context: context.clone(),
        };
        let encoded = postcard::to_allocvec(&entry)?;
        self.log
            .write_all(&(encoded.len() as u32).to_be_bytes())
            .and_then(|()| self.log.write_all(&encoded))
            .and_then(|()| self.log.flush())
            .map_err(|source| StorageError::Io {
                path: self.log_path.clone(),
                source,
            })?;
        Ok(self.apply_in_memory(key, value, context))
    }

    /// Returns every locally stored version for `key`, undeduplicated
    /// against other replicas — the coordinator calls `sort_data` again
    /// across every replica's response.
    pub fn get_file(&self, key: &Key) -> Vec<(Context, String)> {
        self.versions
            .get(&key.hash())
            .cloned()
            .unwrap_or_default()
    }

    pub fn hostname(&self) -> &Hostname {
        &self.hostname
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn host() -> Hostname {
        Hostname::from("node-a")
    }

    #[test]
    fn sort_data_drops_dominated_versions() {
        let base = Context::new();
        let h = Hostname::from("a");
        let v1 = base.incremented(&h);
        let v2 = v1.incremented(&h);

        let reconciled = sort_data(vec![
            (v1.clone(), "old".to_string()),
            (v2.clone(), "new".to_string()),
        ]);
        assert_eq!(reconciled, vec![(v2, "new".to_string())]);
    }

    #[test]
    fn sort_data_keeps_concurrent_versions_as_siblings() {
        let base = Context::new();
        let a = Hostname::from("a");
        let b = Hostname::from("b");
        let via_a = base.incremented(&a);
        let via_b = base.incremented(&b);

        let mut reconciled = sort_data(vec![
            (via_a.clone(), "from-a".to_string()),
            (via_b.clone(), "from-b".to_string()),
        ]);
        reconciled.sort_by(|(_, v1), (_, v2)| v1.cmp(v2));
        assert_eq!(
            reconciled,
            vec![(via_a, "from-a".to_string()), (via_b, "from-b".to_string())]
        );
    }

    #[test]
    fn store_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let mut store = Store::open(dir.path(), host()).unwrap();
        let key = Key::new("k1");
        let ctx = Context::new().incremented(&host());
        store.store_file(key.clone(), "v1".to_string(), ctx.clone()).unwrap();

        let rows = store.get_file(&key);
        assert_eq!(rows, vec![(ctx, "v1".to_string())]);
    }

    #[test]
    fn overwriting_with_a_descendant_context_replaces_prior_value() {
        let dir = tempdir().unwrap();
        let mut store = Store::open(dir.path(), host()).unwrap();
        let key = Key::new("k1");
        let ctx1 = Context::new().incremented(&host());
        let ctx2 = ctx1.incremented(&host());

        store.store_file(key.clone(), "v1".to_string(), ctx1).unwrap();
        store.store_file(key.clone(), "v2".to_string(), ctx2.clone()).unwrap();

        assert_eq!(store.get_file(&key), vec![(ctx2, "v2".to_string())]);
    }

    #[test]
    fn concurrent_writes_produce_siblings() {
        let dir = tempdir().unwrap();
        let mut store = Store::open(dir.path(), host()).unwrap();
        let key = Key::new("k1");
        let base = Context::new();
        let via_a = base.incremented(&Hostname::from("a"));
        let via_b = base.incremented(&Hostname::from("b"));

        store.store_file(key.clone(), "from-a".to_string(), via_a).unwrap();
        store.store_file(key.clone(), "from-b".to_string(), via_b).unwrap();

        assert_eq!(store.get_file(&key).len(), 2);
    }

    #[test]
    fn store_survives_reopen_via_log_replay() {
        let dir = tempdir().unwrap();
        let key = Key::new("k1");
        let ctx = Context::new().incremented(&host());
        {
            let mut store = Store::open(dir.path(), host()).unwrap();
            store.store_file(key.clone(), "v1".to_string(), ctx.clone()).unwrap();
        }
        let reopened = Store::open(dir.path(), host()).unwrap();
        assert_eq!(reopened.get_file(&key), vec![(ctx, "v1".to_string())]);
        assert_eq!(reopened.key_count(), 1);
    }

    #[test]
    fn missing_key_returns_empty_rows() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), host()).unwrap();
        assert!(store.get_file(&Key::new("absent")).is_empty());
    }
}
