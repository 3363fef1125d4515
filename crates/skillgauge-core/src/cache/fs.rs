use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tempfile::NamedTempFile;
use tokio::sync::Mutex;

use super::{CacheEntry, CacheError, CacheStore, Fingerprint, Result};
use crate::domain::TestOutcome;

/// Filesystem cache: one JSON record per fingerprint.
///
/// Layout: `<dir>/<fingerprint>.json`
///
/// All reads and writes go through one lock, so concurrent workers see
/// each entry either absent or complete.
pub struct FsCacheStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl FsCacheStore {
    /// Store rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &Fingerprint) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

#[async_trait]
impl CacheStore for FsCacheStore {
    async fn get(&self, key: &Fingerprint) -> Result<Option<TestOutcome>> {
        let _guard = self.lock.lock().await;
        let data = match fs::read(self.entry_path(key)) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::Io(e)),
        };
        let entry: CacheEntry = serde_json::from_slice(&data)?;
        if &entry.fingerprint != key {
            return Ok(None);
        }
        Ok(Some(entry.outcome))
    }

    async fn put(&self, key: &Fingerprint, outcome: &TestOutcome) -> Result<()> {
        let _guard = self.lock.lock().await;
        fs::create_dir_all(&self.dir)?;

        let entry = CacheEntry {
            fingerprint: key.clone(),
            created_at: Utc::now(),
            outcome: outcome.clone(),
        };
        let data = serde_json::to_vec_pretty(&entry)?;

        // Atomic write: temp file in the same directory, then rename.
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&data)?;
        tmp.persist(self.entry_path(key)).map_err(|e| e.error)?;
        Ok(())
    }

    async fn clear(&self) -> Result<usize> {
        let _guard = self.lock.lock().await;
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(CacheError::Io(e)),
        };

        let mut doomed = Vec::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                return Err(CacheError::UnsafeClear(format!(
                    "{} contains subdirectory {}",
                    self.dir.display(),
                    path.display()
                )));
            }
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                return Err(CacheError::UnsafeClear(format!(
                    "{} contains non-cache file {}",
                    self.dir.display(),
                    path.display()
                )));
            }
            doomed.push(path);
        }

        for path in &doomed {
            fs::remove_file(path)?;
        }
        Ok(doomed.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Status;

    fn make_store() -> (tempfile::TempDir, FsCacheStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCacheStore::new(dir.path().join("cache"));
        (dir, store)
    }

    fn key(byte: &str) -> Fingerprint {
        byte.repeat(32).parse().unwrap()
    }

    fn outcome(id: &str) -> TestOutcome {
        TestOutcome {
            test_id: id.to_string(),
            display_name: id.to_string(),
            group: None,
            status: Status::Passed,
            runs: Vec::new(),
            stats: None,
            skill_impact: None,
            error_msg: None,
        }
    }

    #[tokio::test]
    async fn put_then_get_roundtrip() {
        let (_dir, store) = make_store();
        store.put(&key("ab"), &outcome("t1")).await.unwrap();
        let got = store.get(&key("ab")).await.unwrap();
        assert_eq!(got, Some(outcome("t1")));
    }

    #[tokio::test]
    async fn missing_entry_is_none() {
        let (_dir, store) = make_store();
        assert_eq!(store.get(&key("cd")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn corrupt_entry_is_error() {
        let (_dir, store) = make_store();
        fs::create_dir_all(store.dir()).unwrap();
        fs::write(store.dir().join(format!("{}.json", key("ef"))), b"{not json").unwrap();
        assert!(matches!(
            store.get(&key("ef")).await,
            Err(CacheError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn entry_under_wrong_name_is_miss() {
        let (_dir, store) = make_store();
        store.put(&key("ab"), &outcome("t1")).await.unwrap();
        fs::rename(
            store.dir().join(format!("{}.json", key("ab"))),
            store.dir().join(format!("{}.json", key("cd"))),
        )
        .unwrap();
        assert_eq!(store.get(&key("cd")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn clear_removes_all_entries() {
        let (_dir, store) = make_store();
        store.put(&key("ab"), &outcome("t1")).await.unwrap();
        store.put(&key("cd"), &outcome("t2")).await.unwrap();
        assert_eq!(store.clear().await.unwrap(), 2);
        assert_eq!(store.get(&key("ab")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn clear_missing_dir_is_noop() {
        let (_dir, store) = make_store();
        assert_eq!(store.clear().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn clear_refuses_foreign_files() {
        let (_dir, store) = make_store();
        store.put(&key("ab"), &outcome("t1")).await.unwrap();
        fs::write(store.dir().join("notes.txt"), "keep me").unwrap();
        assert!(matches!(
            store.clear().await,
            Err(CacheError::UnsafeClear(_))
        ));
        assert!(store.dir().join("notes.txt").exists());
    }

    #[tokio::test]
    async fn clear_refuses_subdirectories() {
        let (_dir, store) = make_store();
        fs::create_dir_all(store.dir().join("nested")).unwrap();
        assert!(matches!(
            store.clear().await,
            Err(CacheError::UnsafeClear(_))
        ));
    }
}
