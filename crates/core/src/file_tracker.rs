//! Reference counting for files that are still being read.
//!
//! Upload workflows hand the same temp file to several steps (preview,
//! conversion, transport). [`FileTracker`] counts active users per path so
//! cleanup never deletes a file out from under a reader, and reports files
//! that nobody has touched for a while as deletion candidates.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Default age after which an unreferenced file counts as stale.
pub const DEFAULT_FILE_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy)]
struct FileReference {
    refcount: usize,
    last_touch: Instant,
}

/// Thread-safe per-path reference counter.
#[derive(Debug, Default)]
pub struct FileTracker {
    refs: Mutex<HashMap<PathBuf, FileReference>>,
}

impl FileTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn refs(&self) -> MutexGuard<'_, HashMap<PathBuf, FileReference>> {
        // Critical sections never panic, so a poisoned map is still consistent.
        self.refs.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mark `path` as in use.
    pub fn acquire(&self, path: &Path) {
        let mut refs = self.refs();
        let entry = refs.entry(path.to_path_buf()).or_insert(FileReference {
            refcount: 0,
            last_touch: Instant::now(),
        });
        entry.refcount += 1;
        entry.last_touch = Instant::now();
    }

    /// Drop one reference to `path`.
    ///
    /// Returns `true` when the file is now safe to delete (no references
    /// left, or the path was never tracked). The count never goes below
    /// zero.
    pub fn release(&self, path: &Path) -> bool {
        let mut refs = self.refs();
        match refs.get_mut(path) {
            None => true,
            Some(entry) => {
                entry.refcount = entry.refcount.saturating_sub(1);
                entry.last_touch = Instant::now();
                entry.refcount == 0
            }
        }
    }

    /// Whether at least one reader currently holds `path`.
    pub fn is_in_use(&self, path: &Path) -> bool {
        self.refs().get(path).is_some_and(|e| e.refcount > 0)
    }

    /// Current reference count for `path` (0 when untracked).
    pub fn refcount(&self, path: &Path) -> usize {
        self.refs().get(path).map_or(0, |e| e.refcount)
    }

    /// Paths with no references whose last acquire/release is older than `ttl`.
    pub fn get_stale_files(&self, ttl: Duration) -> Vec<PathBuf> {
        let now = Instant::now();
        self.refs()
            .iter()
            .filter(|(_, e)| e.refcount == 0 && now.duration_since(e.last_touch) > ttl)
            .map(|(p, _)| p.clone())
            .collect()
    }

    /// Stop tracking `path` if it is unreferenced. Returns whether it was removed.
    pub fn forget(&self, path: &Path) -> bool {
        let mut refs = self.refs();
        match refs.get(path) {
            Some(e) if e.refcount == 0 => {
                refs.remove(path);
                true
            }
            _ => false,
        }
    }

    /// Number of tracked paths (referenced or not).
    pub fn tracked_count(&self) -> usize {
        self.refs().len()
    }
}

/// RAII handle that holds a reference on a path until dropped.
#[derive(Debug)]
pub struct PathGuard {
    tracker: Arc<FileTracker>,
    path: PathBuf,
}

impl PathGuard {
    pub fn new(tracker: Arc<FileTracker>, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        tracker.acquire(&path);
        Self { tracker, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PathGuard {
    fn drop(&mut self) {
        self.tracker.release(&self.path);
    }
}

/// Delete `paths`, skipping any the tracker reports in use.
///
/// Missing files are ignored; other failures are logged and do not stop
/// the remaining deletions. Returns how many files were removed.
pub fn cleanup_files<P: AsRef<Path>>(tracker: &FileTracker, paths: &[P]) -> usize {
    let mut removed = 0;
    for path in paths {
        let path = path.as_ref();
        if tracker.is_in_use(path) {
            tracing::debug!(path = %path.display(), "File in use, not deleted");
            continue;
        }
        match std::fs::remove_file(path) {
            Ok(()) => {
                tracker.forget(path);
                removed += 1;
                tracing::debug!(path = %path.display(), "File removed");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracker.forget(path);
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove file");
            }
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_release_counts() {
        let tracker = FileTracker::new();
        let path = Path::new("/tmp/pixoo/a.gif");

        tracker.acquire(path);
        tracker.acquire(path);
        assert_eq!(tracker.refcount(path), 2);
        assert!(!tracker.release(path));
        assert!(tracker.is_in_use(path));
        assert!(tracker.release(path));
        assert!(!tracker.is_in_use(path));
    }

    #[test]
    fn release_never_goes_negative() {
        let tracker = FileTracker::new();
        let path = Path::new("/tmp/pixoo/b.gif");

        assert!(tracker.release(path));
        tracker.acquire(path);
        assert!(tracker.release(path));
        assert!(tracker.release(path));
        assert_eq!(tracker.refcount(path), 0);
        tracker.acquire(path);
        assert_eq!(tracker.refcount(path), 1);
    }

    #[test]
    fn referenced_files_are_never_stale() {
        let tracker = FileTracker::new();
        let path = Path::new("/tmp/pixoo/c.gif");
        tracker.acquire(path);
        std::thread::sleep(Duration::from_millis(5));
        assert!(tracker.get_stale_files(Duration::ZERO).is_empty());

        tracker.release(path);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(tracker.get_stale_files(Duration::ZERO), vec![path.to_path_buf()]);
        assert!(tracker.get_stale_files(Duration::from_secs(3600)).is_empty());
    }

    #[test]
    fn guard_releases_on_drop() {
        let tracker = Arc::new(FileTracker::new());
        let path = PathBuf::from("/tmp/pixoo/d.gif");
        {
            let guard = PathGuard::new(Arc::clone(&tracker), path.clone());
            assert_eq!(guard.path(), path.as_path());
            assert!(tracker.is_in_use(&path));
        }
        assert!(!tracker.is_in_use(&path));
    }

    #[test]
    fn cleanup_skips_files_in_use() {
        let dir = tempfile::tempdir().expect("temp dir");
        let busy = dir.path().join("busy.gif");
        let idle = dir.path().join("idle.gif");
        std::fs::write(&busy, b"GIF89a").expect("write");
        std::fs::write(&idle, b"GIF89a").expect("write");

        let tracker = FileTracker::new();
        tracker.acquire(&busy);

        let removed = cleanup_files(&tracker, &[&busy, &idle, &dir.path().join("gone.gif")]);
        assert_eq!(removed, 1);
        assert!(busy.exists());
        assert!(!idle.exists());

        tracker.release(&busy);
        assert_eq!(cleanup_files(&tracker, &[&busy]), 1);
        assert!(!busy.exists());
        assert_eq!(tracker.tracked_count(), 0);
    }
}
