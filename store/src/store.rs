use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::error::StoreError;
use crate::filter::{Filter, IndexValue};
use crate::record::Record;

struct Entry<T> {
    record: T,
    fields: HashMap<String, IndexValue>,
}

/// A single-collection, append-only JSONL store for records of type `T`.
///
/// Writes are append-only; the most recently appended line for a given id
/// wins when the collection is replayed. A full in-memory index is rebuilt
/// on `open` and kept current as records are appended.
pub struct Store<T: Record> {
    base_path: PathBuf,
    writer: Mutex<BufWriter<File>>,
    index: Mutex<HashMap<String, Entry<T>>>,
    _marker: PhantomData<T>,
}

impl<T: Record> Store<T> {
    /// Open (creating if necessary) the collection file for `T` under `base_path`.
    pub fn open(base_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path).map_err(|source| StoreError::Open {
            path: base_path.clone(),
            source,
        })?;

        let collection_path = base_path.join(format!("{}.jsonl", T::collection_name()));
        let index = Self::rebuild_index(&collection_path)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&collection_path)
            .map_err(|source| StoreError::Write {
                collection: T::collection_name().to_string(),
                source,
            })?;

        debug!(collection = T::collection_name(), records = index.len(), "opened store");

        Ok(Self {
            base_path,
            writer: Mutex::new(BufWriter::new(file)),
            index: Mutex::new(index),
            _marker: PhantomData,
        })
    }

    fn collection_path(&self) -> PathBuf {
        self.base_path.join(format!("{}.jsonl", T::collection_name()))
    }

    fn rebuild_index(collection_path: &Path) -> Result<HashMap<String, Entry<T>>, StoreError> {
        let mut index = HashMap::new();
        if !collection_path.exists() {
            return Ok(index);
        }

        let file = File::open(collection_path).map_err(|source| StoreError::Read {
            collection: collection_path.display().to_string(),
            source,
        })?;
        let reader = BufReader::new(file);

        for (line_no, line) in reader.lines().enumerate() {
            let line = line.map_err(|source| StoreError::Read {
                collection: collection_path.display().to_string(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let record: T = serde_json::from_str(&line).map_err(|source| StoreError::Corrupt {
                collection: collection_path.display().to_string(),
                line: line_no + 1,
                source,
            })?;
            let fields = record.indexed_fields();
            index.insert(record.id(), Entry { record, fields });
        }

        Ok(index)
    }

    /// Rebuild the in-memory index from disk, discarding any cached state.
    ///
    /// Used at session start to rehydrate after a possible crash.
    pub fn rebuild_indexes(&self) -> Result<(), StoreError> {
        let fresh = Self::rebuild_index(&self.collection_path())?;
        let mut index = self.index.lock().expect("store index mutex poisoned");
        let count = fresh.len();
        *index = fresh;
        debug!(collection = T::collection_name(), records = count, "rebuilt indexes");
        Ok(())
    }

    /// Append a new version of `record`, upserting it in the in-memory index.
    pub fn put(&self, record: T) -> Result<(), StoreError> {
        let line = serde_json::to_string(&record).map_err(|source| StoreError::Corrupt {
            collection: T::collection_name().to_string(),
            line: 0,
            source,
        })?;

        {
            let mut writer = self.writer.lock().expect("store writer mutex poisoned");
            writeln!(writer, "{}", line).map_err(|source| StoreError::Write {
                collection: T::collection_name().to_string(),
                source,
            })?;
            writer.flush().map_err(|source| StoreError::Write {
                collection: T::collection_name().to_string(),
                source,
            })?;
        }

        let fields = record.indexed_fields();
        let id = record.id();
        let mut index = self.index.lock().expect("store index mutex poisoned");
        index.insert(id, Entry { record, fields });
        Ok(())
    }

    /// Fetch a single record by id.
    pub fn get(&self, id: &str) -> Option<T> {
        let index = self.index.lock().expect("store index mutex poisoned");
        index.get(id).map(|e| e.record.clone())
    }

    /// All records currently in the collection, in unspecified order.
    pub fn all(&self) -> Vec<T> {
        let index = self.index.lock().expect("store index mutex poisoned");
        index.values().map(|e| e.record.clone()).collect()
    }

    /// Records matching every supplied filter (conjunction).
    pub fn query(&self, filters: &[Filter]) -> Vec<T> {
        let index = self.index.lock().expect("store index mutex poisoned");
        index
            .values()
            .filter(|e| filters.iter().all(|f| f.matches(&e.fields)))
            .map(|e| e.record.clone())
            .collect()
    }

    /// Number of records currently indexed.
    pub fn len(&self) -> usize {
        self.index.lock().expect("store index mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Record> Store<T> {
    /// Best-effort warning wrapper: logs and swallows a write failure instead
    /// of propagating it, so a store outage degrades persistence rather than
    /// failing whatever is in flight.
    pub fn put_degraded(&self, record: T) {
        if let Err(err) = self.put(record) {
            warn!(collection = T::collection_name(), error = %err, "store write degraded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tempfile::TempDir;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Widget {
        id: String,
        status: String,
        updated_at: i64,
    }

    impl Record for Widget {
        fn id(&self) -> String {
            self.id.clone()
        }

        fn updated_at(&self) -> i64 {
            self.updated_at
        }

        fn collection_name() -> &'static str {
            "widgets"
        }

        fn indexed_fields(&self) -> HashMap<String, IndexValue> {
            let mut map = HashMap::new();
            map.insert("status".to_string(), IndexValue::Str(self.status.clone()));
            map
        }
    }

    #[test]
    fn put_and_get_roundtrips() {
        let temp = TempDir::new().unwrap();
        let store: Store<Widget> = Store::open(temp.path()).unwrap();

        store
            .put(Widget {
                id: "w1".into(),
                status: "queued".into(),
                updated_at: 1,
            })
            .unwrap();

        let fetched = store.get("w1").unwrap();
        assert_eq!(fetched.status, "queued");
    }

    #[test]
    fn query_filters_by_indexed_field() {
        let temp = TempDir::new().unwrap();
        let store: Store<Widget> = Store::open(temp.path()).unwrap();

        store
            .put(Widget {
                id: "w1".into(),
                status: "queued".into(),
                updated_at: 1,
            })
            .unwrap();
        store
            .put(Widget {
                id: "w2".into(),
                status: "running".into(),
                updated_at: 2,
            })
            .unwrap();

        let queued = store.query(&[Filter::eq("status", "queued")]);
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].id, "w1");
    }

    #[test]
    fn reopen_rehydrates_from_disk() {
        let temp = TempDir::new().unwrap();
        {
            let store: Store<Widget> = Store::open(temp.path()).unwrap();
            store
                .put(Widget {
                    id: "w1".into(),
                    status: "queued".into(),
                    updated_at: 1,
                })
                .unwrap();
        }

        let store: Store<Widget> = Store::open(temp.path()).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("w1").unwrap().status, "queued");
    }

    #[test]
    fn later_put_overrides_earlier_on_replay() {
        let temp = TempDir::new().unwrap();
        {
            let store: Store<Widget> = Store::open(temp.path()).unwrap();
            store
                .put(Widget {
                    id: "w1".into(),
                    status: "queued".into(),
                    updated_at: 1,
                })
                .unwrap();
            store
                .put(Widget {
                    id: "w1".into(),
                    status: "running".into(),
                    updated_at: 2,
                })
                .unwrap();
        }

        let store: Store<Widget> = Store::open(temp.path()).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("w1").unwrap().status, "running");
    }

    #[test]
    fn rebuild_indexes_reflects_external_appends() {
        let temp = TempDir::new().unwrap();
        let store: Store<Widget> = Store::open(temp.path()).unwrap();
        store
            .put(Widget {
                id: "w1".into(),
                status: "queued".into(),
                updated_at: 1,
            })
            .unwrap();

        // Simulate another process appending directly to the collection file.
        let path = temp.path().join("widgets.jsonl");
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(
            file,
            "{}",
            serde_json::to_string(&Widget {
                id: "w2".into(),
                status: "running".into(),
                updated_at: 2,
            })
            .unwrap()
        )
        .unwrap();
        drop(file);

        store.rebuild_indexes().unwrap();
        assert_eq!(store.len(), 2);
    }
}
