//! Profile book persistence and medication lifecycle.
//!
//! All profiles and their medications are stored in a single JSON document.
//! Reads take a shared lock; writes go to a temp file that atomically replaces
//! the previous one.

use crate::{Error, Medication, Profile, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const DEFAULT_PROFILE_ID: &str = "default-user";
const DEFAULT_PROFILE_NAME: &str = "Me";
const DEFAULT_AVATAR: &str = "👤";

/// Every profile plus which one is active
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ProfileBook {
    #[serde(default)]
    pub profiles: Vec<Profile>,
    #[serde(default)]
    pub active_profile_id: Option<String>,
}

impl Default for ProfileBook {
    fn default() -> Self {
        Self {
            profiles: vec![default_profile()],
            active_profile_id: Some(DEFAULT_PROFILE_ID.into()),
        }
    }
}

fn default_profile() -> Profile {
    Profile {
        id: DEFAULT_PROFILE_ID.into(),
        name: DEFAULT_PROFILE_NAME.into(),
        avatar: DEFAULT_AVATAR.into(),
        medications: Vec::new(),
    }
}

impl ProfileBook {
    /// Load the book with a shared lock
    ///
    /// A missing file yields a book with one default profile. Unlike watermarks,
    /// an unparseable book is an error: it holds the user's dose history.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("No profile file at {:?}, starting with default profile", path);
            return Ok(Self::default());
        }

        let file = File::open(path).map_err(|e| Error::storage("opening profiles", e))?;
        file.lock_shared()
            .map_err(|e| Error::storage("locking profiles", e))?;

        let mut contents = String::new();
        let mut reader = std::io::BufReader::new(&file);
        let read = reader.read_to_string(&mut contents);
        let _ = file.unlock();
        read.map_err(|e| Error::storage("reading profiles", e))?;

        let mut book: ProfileBook = serde_json::from_str(&contents)?;
        book.normalize();
        for profile in &book.profiles {
            for med in &profile.medications {
                med.schedule.validate().map_err(|e| {
                    Error::Configuration(format!("medication '{}': {}", med.name, e))
                })?;
            }
        }

        tracing::debug!("Loaded {} profiles from {:?}", book.profiles.len(), path);
        Ok(book)
    }

    /// Save the book atomically
    ///
    /// 1. Write to a temp file in the same directory
    /// 2. Sync to disk
    /// 3. Rename over the existing file
    pub fn save(&self, path: &Path) -> Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| Error::Other(format!("profile path {:?} has no parent", path)))?;
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::storage("creating data directory", e))?;

        let contents = serde_json::to_string_pretty(self)?;

        let write = || -> std::io::Result<NamedTempFile> {
            let temp = NamedTempFile::new_in(parent)?;
            temp.as_file().lock_exclusive()?;
            {
                let mut writer = std::io::BufWriter::new(temp.as_file());
                writer.write_all(contents.as_bytes())?;
                writer.flush()?;
            }
            temp.as_file().sync_all()?;
            temp.as_file().unlock()?;
            Ok(temp)
        };

        let temp = write().map_err(|e| Error::storage("writing profiles", e))?;
        temp.persist(path)
            .map_err(|e| Error::storage("replacing profiles", e.error))?;

        tracing::debug!("Saved {} profiles to {:?}", self.profiles.len(), path);
        Ok(())
    }

    /// Load, modify and save back
    ///
    /// Holds an exclusive lock on a sidecar `<path>.lock` file for the whole
    /// cycle so concurrent writers cannot drop each other's changes. The book
    /// itself cannot carry the lock because `save` replaces its inode.
    pub fn update<F, T>(path: &Path, f: F) -> Result<T>
    where
        F: FnOnce(&mut ProfileBook) -> Result<T>,
    {
        let lock_path = lock_path(path);
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::storage("creating data directory", e))?;
        }
        let lock = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| Error::storage("opening profile lock", e))?;
        lock.lock_exclusive()
            .map_err(|e| Error::storage("locking profiles", e))?;

        let result = (|| -> Result<T> {
            let mut book = Self::load(path)?;
            let out = f(&mut book)?;
            book.save(path)?;
            Ok(out)
        })();

        let _ = lock.unlock();
        result
    }

    /// Repair an active id that no longer points at a profile
    fn normalize(&mut self) {
        if self.profiles.is_empty() {
            *self = Self::default();
            return;
        }
        let valid = self
            .active_profile_id
            .as_deref()
            .map_or(false, |id| self.profiles.iter().any(|p| p.id == id));
        if !valid {
            self.active_profile_id = self.profiles.first().map(|p| p.id.clone());
        }
    }

    // ── Profiles ──────────────────────────────────────────────────────────

    pub fn active_profile(&self) -> Option<&Profile> {
        let id = self.active_profile_id.as_deref()?;
        self.profiles.iter().find(|p| p.id == id)
    }

    fn active_profile_mut(&mut self) -> Result<&mut Profile> {
        let id = self
            .active_profile_id
            .clone()
            .ok_or_else(|| Error::NotFound("no active profile".into()))?;
        self.profiles
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| Error::NotFound(format!("profile {}", id)))
    }

    /// Add a profile; the first profile added to an empty book becomes active
    pub fn add_profile(&mut self, name: &str, avatar: &str) -> String {
        let profile = Profile::new(name, avatar);
        let id = profile.id.clone();
        self.profiles.push(profile);
        if self.active_profile().is_none() {
            self.active_profile_id = Some(id.clone());
        }
        tracing::info!("Added profile {} ({})", name, id);
        id
    }

    pub fn switch_profile(&mut self, id: &str) -> Result<()> {
        if !self.profiles.iter().any(|p| p.id == id) {
            return Err(Error::NotFound(format!("profile {}", id)));
        }
        self.active_profile_id = Some(id.to_string());
        Ok(())
    }

    /// Remove a profile
    ///
    /// If it was active, the first remaining profile takes over; removing the
    /// last profile recreates the default one.
    pub fn delete_profile(&mut self, id: &str) -> Result<Profile> {
        let index = self
            .profiles
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| Error::NotFound(format!("profile {}", id)))?;
        let removed = self.profiles.remove(index);

        if self.active_profile_id.as_deref() == Some(id) {
            if self.profiles.is_empty() {
                self.profiles.push(default_profile());
            }
            self.active_profile_id = self.profiles.first().map(|p| p.id.clone());
        }

        tracing::info!("Deleted profile {} ({})", removed.name, removed.id);
        Ok(removed)
    }

    // ── Medications ───────────────────────────────────────────────────────

    /// Resolve a full id or unique id prefix within the active profile
    pub fn resolve_medication_id(&self, id_or_prefix: &str) -> Result<String> {
        let profile = self
            .active_profile()
            .ok_or_else(|| Error::NotFound("no active profile".into()))?;

        if let Some(med) = profile.medication(id_or_prefix) {
            return Ok(med.id.clone());
        }

        let matches: Vec<&Medication> = profile
            .medications
            .iter()
            .filter(|m| m.id.starts_with(id_or_prefix))
            .collect();
        match matches.as_slice() {
            [only] => Ok(only.id.clone()),
            [] => Err(Error::NotFound(format!("medication {}", id_or_prefix))),
            _ => Err(Error::Other(format!(
                "medication id prefix '{}' is ambiguous",
                id_or_prefix
            ))),
        }
    }

    /// Add a medication to the active profile
    pub fn add_medication(&mut self, medication: Medication) -> Result<String> {
        medication.schedule.validate()?;
        let profile = self.active_profile_mut()?;
        let id = medication.id.clone();
        tracing::info!("Added medication {} to profile {}", medication.name, profile.name);
        profile.medications.push(medication);
        Ok(id)
    }

    pub fn delete_medication(&mut self, medication_id: &str) -> Result<Medication> {
        let profile = self.active_profile_mut()?;
        let index = profile
            .medications
            .iter()
            .position(|m| m.id == medication_id)
            .ok_or_else(|| Error::NotFound(format!("medication {}", medication_id)))?;
        Ok(profile.medications.remove(index))
    }

    /// Record a dose of a medication in the active profile
    pub fn take_dose(&mut self, medication_id: &str, at: DateTime<Utc>) -> Result<&Medication> {
        let profile = self.active_profile_mut()?;
        let med = profile
            .medication_mut(medication_id)
            .ok_or_else(|| Error::NotFound(format!("medication {}", medication_id)))?;
        med.record_dose(at);
        tracing::info!("Recorded dose of {} at {}", med.name, at);
        Ok(med)
    }
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

/// Profile source that rereads the book on every poll, picking up doses
/// recorded by other processes
#[derive(Clone, Debug)]
pub struct ProfileFile {
    path: PathBuf,
}

impl ProfileFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl crate::poller::ProfileSource for ProfileFile {
    fn active_profile(&self) -> Result<Option<Profile>> {
        let book = ProfileBook::load(&self.path)?;
        Ok(book.active_profile().cloned())
    }
}
