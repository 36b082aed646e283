//! On-disk idempotency cache.
//!
//! One JSON file per processed URL, named by the URL's SHA-256 fingerprint:
//!
//! ```text
//! output_dir/
//! └── .cache/
//!     ├── 3f2a…e1.json
//!     └── 9b07…4c.json
//! ```
//!
//! Entries never expire; delete the directory to force reprocessing. Each
//! entry is written through a temp file and a rename, so concurrent pipelines
//! touching different URLs never contend and readers never see partial JSON.

use crate::models::CacheEntry;
use crate::utils::{fingerprint, write_atomic};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone)]
pub struct Cache {
    dir: PathBuf,
}

impl Cache {
    /// Open (creating if needed) the cache directory.
    pub async fn open(dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn entry_path(&self, url: &str) -> PathBuf {
        self.dir.join(format!("{}.json", fingerprint(url)))
    }

    /// Look up `url`. Missing, unreadable or corrupt entries read as absent.
    #[instrument(level = "debug", skip(self))]
    pub async fn get(&self, url: &str) -> Option<CacheEntry> {
        let path = self.entry_path(url);
        let raw = fs::read(&path).await.ok()?;
        match serde_json::from_slice::<CacheEntry>(&raw) {
            Ok(entry) => {
                debug!(path = %path.display(), "Cache hit");
                Some(entry)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring corrupt cache entry");
                None
            }
        }
    }

    /// Record `entry` for `url`, replacing any previous record.
    #[instrument(level = "debug", skip(self, entry))]
    pub async fn set(&self, url: &str, entry: &CacheEntry) -> Result<(), crate::error::Error> {
        let json = serde_json::to_vec_pretty(entry)?;
        write_atomic(&self.entry_path(url), &json).await?;
        Ok(())
    }
}
