//! File-backed notification watermarks.
//!
//! All watermarks live in one JSON object keyed by `"<profile_id>/<medication_id>"`.
//! Compare-and-set holds an exclusive lock on the file for the whole
//! read-compare-write, so separate processes polling the same data directory
//! never both claim one due dose.

use crate::gate::{WatermarkKey, WatermarkStore};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

type WatermarkMap = BTreeMap<String, DateTime<Utc>>;

/// JSON watermark store with file locking
pub struct FileWatermarkStore {
    path: PathBuf,
}

impl FileWatermarkStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn map_key(key: &WatermarkKey) -> String {
        format!("{}/{}", key.profile_id, key.medication_id)
    }

    /// Parse file contents; anything unreadable counts as "never notified"
    fn parse(&self, contents: &str) -> WatermarkMap {
        if contents.trim().is_empty() {
            return WatermarkMap::new();
        }
        match serde_json::from_str(contents) {
            Ok(map) => map,
            Err(e) => {
                tracing::warn!(
                    "Ignoring unreadable watermark file {:?}: {}",
                    self.path,
                    e
                );
                WatermarkMap::new()
            }
        }
    }

    fn read_locked(&self, file: &mut File) -> Result<WatermarkMap> {
        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| Error::storage("reading watermarks", e))?;
        Ok(self.parse(&contents))
    }

    fn write_locked(&self, file: &mut File, map: &WatermarkMap) -> Result<()> {
        let contents = serde_json::to_string(map)?;
        let rewrite = |file: &mut File| -> std::io::Result<()> {
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            file.write_all(contents.as_bytes())?;
            file.sync_all()
        };
        rewrite(file).map_err(|e| Error::storage("writing watermarks", e))
    }
}

impl WatermarkStore for FileWatermarkStore {
    fn get(&self, key: &WatermarkKey) -> Result<Option<DateTime<Utc>>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let mut file =
            File::open(&self.path).map_err(|e| Error::storage("opening watermarks", e))?;
        file.lock_shared()
            .map_err(|e| Error::storage("locking watermarks", e))?;

        let map = self.read_locked(&mut file);
        let _ = file.unlock();

        Ok(map?.get(&Self::map_key(key)).copied())
    }

    fn compare_and_set(
        &self,
        key: &WatermarkKey,
        expected: Option<DateTime<Utc>>,
        new: DateTime<Utc>,
    ) -> Result<bool> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::storage("creating data directory", e))?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|e| Error::storage("opening watermarks", e))?;
        file.lock_exclusive()
            .map_err(|e| Error::storage("locking watermarks", e))?;

        let result = (|| -> Result<bool> {
            let mut map = self.read_locked(&mut file)?;
            let map_key = Self::map_key(key);
            if map.get(&map_key).copied() != expected {
                return Ok(false);
            }
            map.insert(map_key, new);
            self.write_locked(&mut file, &map)?;
            Ok(true)
        })();

        let _ = file.unlock();

        if let Ok(true) = result {
            tracing::debug!("Watermark for {:?} advanced to {}", key, new);
        }
        result
    }
}
