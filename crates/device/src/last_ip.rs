//! Persisted "last known device address".

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use pixoo_core::persist::{read_json, write_json_atomic};
use pixoo_core::CoreResult;
use serde::{Deserialize, Serialize};

/// File name used under the data directory.
pub const LAST_IP_FILE: &str = "last_connection.json";

#[derive(Debug, Serialize, Deserialize)]
struct LastConnection {
    ip: Ipv4Addr,
}

/// Reads and writes `{"ip": "a.b.c.d"}` at a fixed path.
#[derive(Debug, Clone)]
pub struct LastIpStore {
    path: PathBuf,
}

impl LastIpStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `<data_dir>/last_connection.json`.
    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join(LAST_IP_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The stored address, if any. Unreadable or malformed files count as
    /// "no address".
    pub fn load(&self) -> Option<Ipv4Addr> {
        match read_json::<LastConnection>(&self.path) {
            Ok(found) => found.map(|c| c.ip),
            Err(e) => {
                tracing::debug!(path = %self.path.display(), error = %e, "Ignoring unreadable last-IP file");
                None
            }
        }
    }

    pub fn save(&self, ip: Ipv4Addr) -> CoreResult<()> {
        write_json_atomic(&self.path, &LastConnection { ip })
    }
}
