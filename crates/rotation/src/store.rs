//! Persisted rotation selection.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use pixoo_core::persist::{read_json, remove_if_exists, write_json_atomic};
use pixoo_core::{CoreError, CoreResult, RotationInterval};
use serde::{Deserialize, Serialize};

/// File name used under the data directory.
pub const ROTATION_CONFIG_FILE: &str = "rotation_config.json";

/// Format version written by this crate. Files with any other version are
/// ignored.
pub const CONFIG_VERSION: u32 = 1;

/// On-disk rotation intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationConfig {
    pub version: u32,
    pub selected_ids: Vec<String>,
    pub interval_seconds: RotationInterval,
    pub updated_at: DateTime<Utc>,
}

impl RotationConfig {
    pub fn new(selected_ids: Vec<String>, interval: RotationInterval) -> Self {
        Self {
            version: CONFIG_VERSION,
            selected_ids,
            interval_seconds: interval,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RotationStore {
    path: PathBuf,
}

impl RotationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `<data_dir>/rotation_config.json`.
    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join(ROTATION_CONFIG_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the saved config.
    ///
    /// A missing file, unparsable JSON, or a foreign format version all mean
    /// "nothing saved". I/O failures are returned.
    pub fn load(&self) -> CoreResult<Option<RotationConfig>> {
        let value = match read_json::<serde_json::Value>(&self.path) {
            Ok(Some(value)) => value,
            Ok(None) => return Ok(None),
            Err(CoreError::Serialization(e)) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Ignoring corrupt rotation config");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let version = value.get("version").and_then(serde_json::Value::as_u64);
        if version != Some(u64::from(CONFIG_VERSION)) {
            tracing::warn!(path = %self.path.display(), ?version, "Ignoring rotation config with unknown version");
            return Ok(None);
        }

        match serde_json::from_value(value) {
            Ok(config) => Ok(Some(config)),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Ignoring invalid rotation config");
                Ok(None)
            }
        }
    }

    pub fn save(&self, config: &RotationConfig) -> CoreResult<()> {
        write_json_atomic(&self.path, config)
    }

    /// Remove the saved config. Returns whether one existed.
    pub fn delete(&self) -> CoreResult<bool> {
        remove_if_exists(&self.path)
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn store() -> (tempfile::TempDir, RotationStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = RotationStore::in_dir(dir.path());
        (dir, store)
    }

    #[test]
    fn save_load_delete() {
        let (_dir, store) = store();
        assert_eq!(store.load().unwrap(), None);

        let config = RotationConfig::new(vec!["a1".into(), "b2".into()], RotationInterval::OneMinute);
        store.save(&config).unwrap();
        assert_eq!(store.load().unwrap(), Some(config));

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["version"], 1);
        assert_eq!(raw["interval_seconds"], 60);
        assert_eq!(raw["selected_ids"], json!(["a1", "b2"]));

        assert!(store.delete().unwrap());
        assert!(!store.delete().unwrap());
        assert!(!store.exists());
    }

    #[test]
    fn corrupt_or_foreign_files_are_ignored() {
        let (_dir, store) = store();

        std::fs::write(store.path(), "{ not json").unwrap();
        assert_eq!(store.load().unwrap(), None);

        let foreign = json!({
            "version": 2,
            "selected_ids": ["a1"],
            "interval_seconds": 60,
            "updated_at": "2024-01-01T00:00:00Z",
        });
        std::fs::write(store.path(), foreign.to_string()).unwrap();
        assert_eq!(store.load().unwrap(), None);

        let bad_interval = json!({
            "version": 1,
            "selected_ids": ["a1"],
            "interval_seconds": 90,
            "updated_at": "2024-01-01T00:00:00Z",
        });
        std::fs::write(store.path(), bad_interval.to_string()).unwrap();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn io_errors_propagate() {
        let (_dir, store) = store();
        // A directory where the file should be cannot be read as one.
        std::fs::create_dir(store.path()).unwrap();
        assert!(matches!(store.load(), Err(CoreError::Io(_))));
    }
}
