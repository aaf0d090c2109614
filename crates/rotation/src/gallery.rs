//! The item catalog consumed by the rotation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use pixoo_core::persist::read_json;
use serde::Deserialize;

/// Maps gallery item ids to files on disk.
pub trait Gallery: Send + Sync {
    /// Whether the catalog knows `id`.
    fn contains(&self, id: &str) -> bool;

    /// Path of the item's file, if the item exists and its file is present.
    fn resolve(&self, id: &str) -> Option<PathBuf>;

    /// Human-readable name, for logs.
    fn display_name(&self, id: &str) -> Option<String>;
}

// ---------------------------------------------------------------------------
// Metadata-file gallery
// ---------------------------------------------------------------------------

/// Name of the index file under the gallery root.
pub const METADATA_FILE: &str = "metadata.json";

/// Directory holding the item files under the gallery root.
pub const ITEMS_DIR: &str = "gifs";

#[derive(Debug, Clone, Deserialize)]
struct GalleryEntry {
    name: String,
    filename: String,
}

#[derive(Debug, Default, Deserialize)]
struct GalleryIndex {
    #[serde(default)]
    items: HashMap<String, GalleryEntry>,
}

#[derive(Default)]
struct Cache {
    modified: Option<SystemTime>,
    items: HashMap<String, GalleryEntry>,
}

/// Read-only view of a gallery directory:
///
/// ```text
/// <root>/metadata.json   {"items": {"<id>": {"name": ..., "filename": ...}}}
/// <root>/gifs/<filename>
/// ```
///
/// The index is re-read whenever its modification time changes, so items
/// saved or deleted by another writer are picked up.
pub struct MetadataGallery {
    root: PathBuf,
    cache: Mutex<Cache>,
}

impl MetadataGallery {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: Mutex::new(Cache::default()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn metadata_path(&self) -> PathBuf {
        self.root.join(METADATA_FILE)
    }

    fn lookup<R>(&self, id: &str, f: impl FnOnce(&GalleryEntry) -> R) -> Option<R> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        self.refresh(&mut cache);
        cache.items.get(id).map(f)
    }

    fn refresh(&self, cache: &mut Cache) {
        let path = self.metadata_path();
        let modified = std::fs::metadata(&path).and_then(|m| m.modified()).ok();
        if modified.is_some() && modified == cache.modified {
            return;
        }

        cache.modified = modified;
        cache.items = match read_json::<GalleryIndex>(&path) {
            Ok(index) => index.unwrap_or_default().items,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read gallery index");
                HashMap::new()
            }
        };
    }
}

impl Gallery for MetadataGallery {
    fn contains(&self, id: &str) -> bool {
        self.lookup(id, |_| ()).is_some()
    }

    fn resolve(&self, id: &str) -> Option<PathBuf> {
        let filename = self.lookup(id, |entry| entry.filename.clone())?;
        // Only plain file names; anything else would escape the items dir.
        if Path::new(&filename).file_name() != Some(filename.as_ref()) {
            tracing::warn!(id, filename = %filename, "Ignoring gallery item with unsafe filename");
            return None;
        }
        let path = self.root.join(ITEMS_DIR).join(filename);
        path.is_file().then_some(path)
    }

    fn display_name(&self, id: &str) -> Option<String> {
        self.lookup(id, |entry| entry.name.clone())
    }
}
