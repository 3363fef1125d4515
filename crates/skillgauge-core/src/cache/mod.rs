//! Content-addressed cache of task outcomes.
//!
//! A task's [`Fingerprint`] hashes everything that can change its outcome:
//! the execution-relevant spec configuration, the global validators, the
//! resolved task definition, and the bytes of every fixture file the task
//! reads from disk. A hit returns the stored `TestOutcome` verbatim; any
//! change to those inputs produces a different key and therefore a miss.
//!
//! Cache errors never fail a run. Callers log them and fall back to
//! miss semantics.

pub mod fs;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::{BenchmarkSpec, TaskDefinition, TestOutcome};

pub use fs::FsCacheStore;

/// Bumped whenever the stored layout or the key derivation changes.
const FINGERPRINT_VERSION: &str = "skillgauge-cache-v1";

/// Errors from the cache layer.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache entry is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("refusing to clear cache directory: {0}")]
    UnsafeClear(String),

    #[error("invalid fingerprint: {0}")]
    InvalidFingerprint(String),
}

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

/// SHA-256 content hash used as a cache key.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Derive the fingerprint of `task` under `spec`.
    ///
    /// `fixture_root` is the directory on-disk fixtures are read from. A
    /// fixture that cannot be read contributes its path and a marker, so
    /// the key stays stable until the file appears.
    pub fn compute(spec: &BenchmarkSpec, task: &TaskDefinition, fixture_root: &Path) -> Self {
        let mut hasher = Sha256::new();
        let config = &spec.config;
        let timeout = task.timeout_seconds.unwrap_or(config.timeout_seconds);

        for part in [
            FINGERPRINT_VERSION,
            spec.name.as_str(),
            spec.skill.as_str(),
            config.executor.as_str(),
            config.model.as_str(),
        ] {
            write_part(&mut hasher, part.as_bytes());
        }
        write_part(&mut hasher, timeout.to_string().as_bytes());
        write_part(&mut hasher, config.trials_per_task.to_string().as_bytes());
        write_part(&mut hasher, config.effective_attempts().to_string().as_bytes());
        write_part(&mut hasher, canonical_json(&config.skill_directories).as_bytes());
        write_part(&mut hasher, canonical_json(&config.required_skills).as_bytes());
        write_part(&mut hasher, canonical_json(&spec.graders).as_bytes());
        write_part(&mut hasher, canonical_json(task).as_bytes());

        for rel in task.fixture_paths() {
            write_part(&mut hasher, rel.as_bytes());
            let path = fixture_root.join(rel);
            if path.is_dir() {
                let files = walkdir::WalkDir::new(&path)
                    .sort_by_file_name()
                    .into_iter()
                    .filter_map(|e| e.ok())
                    .filter(|e| e.file_type().is_file());
                for entry in files {
                    let nested = entry.path().strip_prefix(&path).unwrap_or(entry.path());
                    write_part(&mut hasher, nested.to_string_lossy().as_bytes());
                    write_file(&mut hasher, entry.path());
                }
            } else {
                write_file(&mut hasher, &path);
            }
        }

        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.0[..12.min(self.0.len())])
    }
}

impl FromStr for Fingerprint {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() != 64 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(CacheError::InvalidFingerprint(s.to_string()));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }
}

/// Length-prefixed, NUL-terminated write so adjacent parts cannot alias.
fn write_part(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
    hasher.update([0u8]);
}

fn write_file(hasher: &mut Sha256, path: &Path) {
    match std::fs::read(path) {
        Ok(bytes) => write_part(hasher, &bytes),
        Err(_) => write_part(hasher, b"<missing>"),
    }
}

/// Serialize with recursively sorted object keys.
fn canonical_json<T: Serialize + ?Sized>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(v) => sort_keys(&v).to_string(),
        Err(_) => String::new(),
    }
}

fn sort_keys(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = serde_json::Map::new();
            for key in keys {
                sorted.insert(key.clone(), sort_keys(&map[key]));
            }
            serde_json::Value::Object(sorted)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(sort_keys).collect())
        }
        other => other.clone(),
    }
}

/// Stored record: the key it was written under plus the outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub created_at: DateTime<Utc>,
    pub outcome: TestOutcome,
}

/// Outcome store keyed by fingerprint.
///
/// Implementations serialize all access internally; the scheduler shares
/// one store across workers.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Stored outcome for `key`, or `None` on a miss.
    async fn get(&self, key: &Fingerprint) -> Result<Option<TestOutcome>>;

    async fn put(&self, key: &Fingerprint, outcome: &TestOutcome) -> Result<()>;

    /// Remove every entry; returns the number removed.
    async fn clear(&self) -> Result<usize>;
}

/// Whether any validator in play makes outcomes non-reproducible.
///
/// When true, caching is disabled for the whole run.
pub fn has_non_deterministic_graders(spec: &BenchmarkSpec, tasks: &[TaskDefinition]) -> bool {
    spec.graders
        .iter()
        .chain(tasks.iter().flat_map(|t| t.graders.iter()))
        .any(|g| !g.kind().is_deterministic())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> BenchmarkSpec {
        BenchmarkSpec::from_yaml_str(
            "name: fp\nskill: s\nconfig:\n  trials_per_task: 1\n  timeout_seconds: 10\n  model: m\n",
        )
        .unwrap()
    }

    fn task(yaml: &str) -> TaskDefinition {
        TaskDefinition::from_yaml_str(yaml).unwrap()
    }

    #[test]
    fn test_fingerprint_stable() {
        let dir = tempfile::tempdir().unwrap();
        let t = task("id: a\ninputs:\n  prompt: hi\n");
        let a = Fingerprint::compute(&spec(), &t, dir.path());
        let b = Fingerprint::compute(&spec(), &t, dir.path());
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_fingerprint_changes_with_config() {
        let dir = tempfile::tempdir().unwrap();
        let t = task("id: a\n");
        let base = Fingerprint::compute(&spec(), &t, dir.path());

        let mut changed = spec();
        changed.config.model = "other".to_string();
        assert_ne!(base, Fingerprint::compute(&changed, &t, dir.path()));

        let mut changed = spec();
        changed.config.max_attempts = 3;
        assert_ne!(base, Fingerprint::compute(&changed, &t, dir.path()));

        let mut changed = spec();
        changed.config.timeout_seconds = 11;
        assert_ne!(base, Fingerprint::compute(&changed, &t, dir.path()));
    }

    #[test]
    fn test_fingerprint_tracks_fixture_bytes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("input.txt"), "v1").unwrap();
        let t = task("id: a\ninputs:\n  files:\n    - path: input.txt\n");
        let before = Fingerprint::compute(&spec(), &t, dir.path());
        std::fs::write(dir.path().join("input.txt"), "v2").unwrap();
        let after = Fingerprint::compute(&spec(), &t, dir.path());
        assert_ne!(before, after);
    }

    #[test]
    fn test_fingerprint_ignores_unreferenced_files() {
        let dir = tempfile::tempdir().unwrap();
        let t = task("id: a\n");
        let before = Fingerprint::compute(&spec(), &t, dir.path());
        std::fs::write(dir.path().join("other.txt"), "noise").unwrap();
        assert_eq!(before, Fingerprint::compute(&spec(), &t, dir.path()));
    }

    #[test]
    fn test_fingerprint_from_str() {
        let hex = "ab".repeat(32);
        let fp: Fingerprint = hex.parse().unwrap();
        assert_eq!(fp.as_str(), hex);
        assert!("xyz".parse::<Fingerprint>().is_err());
    }

    #[test]
    fn test_non_deterministic_detection() {
        let t = task("id: a\ngraders:\n  - type: behavior\n    name: b\n    config:\n      max_tool_calls: 3\n");
        assert!(has_non_deterministic_graders(&spec(), &[t]));

        let t = task("id: a\ngraders:\n  - type: keyword\n    name: k\n    config:\n      must_contain: [x]\n");
        assert!(!has_non_deterministic_graders(&spec(), &[t]));
    }
}
