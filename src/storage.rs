use crate::error::{Result, TrackerError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

pub const USERS_FILE: &str = "users.json";
pub const MEDICATIONS_FILE: &str = "medications.json";
pub const TRACKING_FILE: &str = "medication_tracking.json";
pub const APPOINTMENTS_FILE: &str = "appointments.json";
pub const PATIENTS_FILE: &str = "patients.json";
pub const LOCK_FILE: &str = "ledger.lock";

const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(10);
const LOCK_WAIT_TIMEOUT: Duration = Duration::from_secs(15);
/// Older than this, a lock file was left by a process that died holding it
const LOCK_STALE_AFTER: Duration = Duration::from_secs(10);

/// A whole JSON document stored in one file.
///
/// A missing file loads as the default document. Saves replace the file
/// atomically.
pub struct JsonFile<T> {
    path: PathBuf,
    _doc: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned + Default> JsonFile<T> {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            _doc: PhantomData,
        }
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<T> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
            Err(source) => {
                return Err(TrackerError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        if content.trim().is_empty() {
            return Ok(T::default());
        }

        serde_json::from_str(&content).map_err(|source| TrackerError::Json {
            path: self.path.clone(),
            source,
        })
    }

    pub fn save(&self, doc: &T) -> Result<()> {
        let content = serde_json::to_string_pretty(doc).map_err(|source| TrackerError::Json {
            path: self.path.clone(),
            source,
        })?;

        atomic_write(&self.path, &content).map_err(|source| TrackerError::Io {
            path: self.path.clone(),
            source,
        })?;

        tracing::debug!(path = %self.path.display(), bytes = content.len(), "Saved document");
        Ok(())
    }
}

/// Write to a sibling temp file, then rename over the target.
/// The temp name carries the PID so two processes never share one.
pub(crate) fn atomic_write(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension(format!("tmp.{}", std::process::id()));
    fs::write(&tmp_path, content.as_bytes())?;
    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }
    Ok(())
}

/// Exclusive lock on a data directory, shared by every medtrack process.
///
/// The lock is a file created with `create_new`; whoever creates it owns the
/// directory until the guard is dropped.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    /// Wait for the lock, clearing it if its holder died
    pub fn acquire(path: PathBuf) -> Result<Self> {
        let started = Instant::now();
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let _ = write!(file, "{}", std::process::id());
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if is_stale(&path) {
                        tracing::warn!(path = %path.display(), "Removing stale lock file");
                        let _ = fs::remove_file(&path);
                        continue;
                    }
                    if started.elapsed() >= LOCK_WAIT_TIMEOUT {
                        return Err(TrackerError::Busy(path));
                    }
                    thread::sleep(LOCK_RETRY_INTERVAL);
                }
                Err(source) => return Err(TrackerError::Io { path, source }),
            }
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::error!(path = %self.path.display(), error = %e, "Failed to release lock file");
        }
    }
}

fn is_stale(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > LOCK_STALE_AFTER)
}

/// Locations of the documents inside a data directory
#[derive(Debug, Clone)]
pub struct DataFiles {
    root: PathBuf,
}

impl DataFiles {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Take the directory-wide lock
    pub fn lock(&self) -> Result<FileLock> {
        FileLock::acquire(self.root.join(LOCK_FILE))
    }

    pub fn users<T: Serialize + DeserializeOwned + Default>(&self) -> JsonFile<T> {
        JsonFile::new(self.root.join(USERS_FILE))
    }

    pub fn medications<T: Serialize + DeserializeOwned + Default>(&self) -> JsonFile<T> {
        JsonFile::new(self.root.join(MEDICATIONS_FILE))
    }

    pub fn tracking<T: Serialize + DeserializeOwned + Default>(&self) -> JsonFile<T> {
        JsonFile::new(self.root.join(TRACKING_FILE))
    }

    pub fn appointments<T: Serialize + DeserializeOwned + Default>(&self) -> JsonFile<T> {
        JsonFile::new(self.root.join(APPOINTMENTS_FILE))
    }

    pub fn patients<T: Serialize + DeserializeOwned + Default>(&self) -> JsonFile<T> {
        JsonFile::new(self.root.join(PATIENTS_FILE))
    }
}
