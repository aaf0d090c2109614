//! Time-bounded storage for in-flight upload artifacts.
//!
//! Each ingestion workflow (GIF upload, media conversion, downloads) keeps
//! its intermediate state in an [`UploadStore`] under a short opaque key.
//! Entries older than the store's TTL are treated as absent and removed,
//! together with the files they reference, on the next access or sweep.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use regex::Regex;

use crate::error::CoreError;
use crate::file_tracker::{cleanup_files, FileTracker};

/// Default lifetime of an upload entry.
pub const DEFAULT_UPLOAD_TTL: Duration = Duration::from_secs(3600);

/// Upload keys are eight lowercase hex characters.
pub const UPLOAD_KEY_PATTERN: &str = r"^[a-f0-9]{8}$";

static UPLOAD_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(UPLOAD_KEY_PATTERN).expect("valid regex"));

/// Payloads that own files on disk.
///
/// The store deletes these paths when the entry is removed or expires.
pub trait UploadArtifact {
    fn artifact_paths(&self) -> Vec<PathBuf> {
        Vec::new()
    }
}

/// General-purpose payload: the uploaded file, its converted output, and
/// free-form metadata derived along the way.
#[derive(Debug, Clone, Default)]
pub struct UploadData {
    pub path: Option<PathBuf>,
    pub converted_path: Option<PathBuf>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl UploadArtifact for UploadData {
    fn artifact_paths(&self) -> Vec<PathBuf> {
        self.path
            .iter()
            .chain(self.converted_path.iter())
            .cloned()
            .collect()
    }
}

#[derive(Debug)]
struct UploadEntry<T> {
    data: T,
    created_at: Instant,
}

impl<T> UploadEntry<T> {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() > ttl
    }
}

/// Generate a fresh upload key.
pub fn new_key() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Validate the shape of a client-supplied upload key.
pub fn validate_key(key: &str) -> Result<(), CoreError> {
    if UPLOAD_KEY_RE.is_match(key) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!("Invalid upload id: '{key}'")))
    }
}

/// Keyed, TTL-bounded, thread-safe store of upload entries.
pub struct UploadStore<T> {
    name: &'static str,
    ttl: Duration,
    files: Arc<FileTracker>,
    entries: Mutex<HashMap<String, UploadEntry<T>>>,
}

impl<T: UploadArtifact + Clone> UploadStore<T> {
    /// Create a store whose file deletions respect `files`.
    pub fn new(name: &'static str, ttl: Duration, files: Arc<FileTracker>) -> Self {
        Self {
            name,
            ttl,
            files,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, UploadEntry<T>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn discard(&self, entry: UploadEntry<T>) {
        let paths = entry.data.artifact_paths();
        if !paths.is_empty() {
            cleanup_files(&self.files, &paths);
        }
    }

    /// Insert or replace the entry under `key`, resetting its age.
    pub fn insert(&self, key: impl Into<String>, data: T) {
        self.entries().insert(
            key.into(),
            UploadEntry {
                data,
                created_at: Instant::now(),
            },
        );
    }

    /// Fetch a copy of the entry, treating an expired one as absent.
    ///
    /// Expired entries are deleted (files included) before returning `None`.
    pub fn get(&self, key: &str) -> Option<T> {
        let expired = {
            let mut entries = self.entries();
            let is_expired = match entries.get(key) {
                None => return None,
                Some(entry) => entry.is_expired(self.ttl),
            };
            if !is_expired {
                return entries.get(key).map(|e| e.data.clone());
            }
            entries.remove(key)
        };
        if let Some(entry) = expired {
            tracing::debug!(store = self.name, key, "Upload entry expired");
            self.discard(entry);
        }
        None
    }

    /// Mutate a live entry in place. Returns `false` if absent or expired.
    pub fn update<F: FnOnce(&mut T)>(&self, key: &str, f: F) -> bool {
        let mut entries = self.entries();
        match entries.get_mut(key) {
            Some(entry) if !entry.is_expired(self.ttl) => {
                f(&mut entry.data);
                true
            }
            _ => false,
        }
    }

    /// Remove an entry and its files. Returns whether it existed.
    pub fn remove(&self, key: &str) -> bool {
        let removed = self.entries().remove(key);
        match removed {
            Some(entry) => {
                self.discard(entry);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let expired: Vec<UploadEntry<T>> = {
            let mut entries = self.entries();
            let keys: Vec<String> = entries
                .iter()
                .filter(|(_, e)| e.is_expired(self.ttl))
                .map(|(k, _)| k.clone())
                .collect();
            keys.iter().filter_map(|k| entries.remove(k)).collect()
        };
        let count = expired.len();
        for entry in expired {
            self.discard(entry);
        }
        if count > 0 {
            tracing::info!(store = self.name, count, "Expired upload entries removed");
        }
        count
    }

    /// Number of entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every entry. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let drained: Vec<UploadEntry<T>> = self.entries().drain().map(|(_, e)| e).collect();
        let count = drained.len();
        for entry in drained {
            self.discard(entry);
        }
        count
    }
}
