//! File-based key-value store for persistent storage.

use crate::backend::KvStore;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

const VALUE_EXTENSION: &str = "kv";
const TEMP_EXTENSION: &str = "tmp";

/// A directory-backed key-value store.
///
/// Each key is stored in its own file. File names are the hex encoding of
/// the key bytes, so arbitrary keys (including `/`) never escape the
/// directory. Values survive process restarts.
///
/// # Durability
///
/// `set` writes a temporary file, calls `File::sync_all()` and renames it
/// over the previous value, so a crash leaves either the old or the new
/// value, never a torn one.
///
/// # Thread Safety
///
/// Writers are serialized by an internal lock; readers go straight to the
/// file system.
///
/// # Example
///
/// ```no_run
/// use relaymark_storage::{FileKvStore, KvStore};
/// use std::path::Path;
///
/// let store = FileKvStore::open(Path::new("relaymark-data")).unwrap();
/// store.set("queue/alice", b"pending").unwrap();
/// ```
#[derive(Debug)]
pub struct FileKvStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileKvStore {
    /// Opens a store rooted at `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(dir: &Path) -> StorageResult<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            write_lock: Mutex::new(()),
        })
    }

    /// Returns the directory holding the values.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn value_path(&self, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self
            .dir
            .join(format!("{}.{}", encode_key(key), VALUE_EXTENSION)))
    }
}

impl KvStore for FileKvStore {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let path = self.value_path(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        let path = self.value_path(key)?;
        let temp = path.with_extension(TEMP_EXTENSION);

        let _guard = self.write_lock.lock();
        {
            let mut file = File::create(&temp)?;
            file.write_all(value)?;
            file.sync_all()?;
        }
        fs::rename(&temp, &path)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.value_path(key)?;

        let _guard = self.write_lock.lock();
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(VALUE_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let key = decode_key(stem).ok_or_else(|| {
                StorageError::Corrupted(format!("unexpected file name {}", path.display()))
            })?;
            if key.starts_with(prefix) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

fn encode_key(key: &str) -> String {
    hex::encode(key)
}

fn decode_key(name: &str) -> Option<String> {
    hex::decode(name)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    #[test]
    fn file_open_creates_dir() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("store");

        let store = FileKvStore::open(&path).unwrap();
        assert!(path.is_dir());
        assert_eq!(store.path(), path);
    }

    #[test]
    fn file_set_and_get() {
        let dir = tempdir().unwrap();
        let store = FileKvStore::open(dir.path()).unwrap();

        store.set("cache/alice/bookmark-list", b"hello").unwrap();
        assert_eq!(
            store.get("cache/alice/bookmark-list").unwrap(),
            Some(b"hello".to_vec())
        );
        assert_eq!(store.get("cache/bob/bookmark-list").unwrap(), None);
    }

    #[test]
    fn file_persistence() {
        let dir = tempdir().unwrap();

        {
            let store = FileKvStore::open(dir.path()).unwrap();
            store.set("queue/alice", b"persistent data").unwrap();
        }

        {
            let store = FileKvStore::open(dir.path()).unwrap();
            assert_eq!(
                store.get("queue/alice").unwrap(),
                Some(b"persistent data".to_vec())
            );
        }
    }

    #[test]
    fn file_delete() {
        let dir = tempdir().unwrap();
        let store = FileKvStore::open(dir.path()).unwrap();

        store.set("k", b"v").unwrap();
        store.delete("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
        // Deleting again is fine
        store.delete("k").unwrap();
    }

    #[test]
    fn file_keys_skip_foreign_files() {
        let dir = tempdir().unwrap();
        let store = FileKvStore::open(dir.path()).unwrap();

        store.set("queue/bob", b"1").unwrap();
        store.set("queue/alice", b"2").unwrap();
        store.set("cache/alice/x", b"3").unwrap();
        fs::write(dir.path().join("README"), b"not a value").unwrap();

        assert_eq!(
            store.keys("queue/").unwrap(),
            vec!["queue/alice".to_string(), "queue/bob".to_string()]
        );
        assert_eq!(store.keys("").unwrap().len(), 3);
    }

    #[test]
    fn file_empty_key_rejected() {
        let dir = tempdir().unwrap();
        let store = FileKvStore::open(dir.path()).unwrap();
        assert!(matches!(store.set("", b"v"), Err(StorageError::InvalidKey(_))));
    }

    #[test]
    fn file_names_are_lowercase_hex_of_the_key() {
        assert_eq!(encode_key("queue/a"), "71756575652f61");
        assert_eq!(decode_key("71756575652f61").as_deref(), Some("queue/a"));
        assert_eq!(decode_key("abc"), None);
        assert_eq!(decode_key("zz"), None);
    }

    proptest! {
        #[test]
        fn key_encoding_is_reversible(key in "\\PC{1,40}") {
            prop_assert_eq!(decode_key(&encode_key(&key)), Some(key));
        }
    }
}
