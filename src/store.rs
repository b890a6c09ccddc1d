use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::thread;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use fs4::FileExt;
use tempfile::Builder;

use crate::config::Settings;
use crate::error::RefgenError;
use crate::registry::Document;

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Shared genome config file guarded by an advisory lock on `<file>.lock`.
///
/// Every mutating operation goes through [`RegistryStore::load`], which holds
/// the lock until the returned [`RegistrySession`] is dropped. Edits made by
/// other processes between their own load and save are not merged; the last
/// writer wins.
#[derive(Debug, Clone)]
pub struct RegistryStore {
    path: Utf8PathBuf,
    wait_max: Duration,
}

impl RegistryStore {
    pub fn new(path: Utf8PathBuf, wait_max: Duration) -> Self {
        Self { path, wait_max }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.config_path.clone(), settings.wait_max)
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn lock_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("{}.lock", self.path))
    }

    pub fn exists(&self) -> bool {
        self.path.as_std_path().exists()
    }

    /// Waits up to `wait_max` for the exclusive lock.
    pub fn acquire_lock(&self) -> Result<LockGuard, RefgenError> {
        let lock_path = self.lock_path();
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| RefgenError::Filesystem(err.to_string()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(lock_path.as_std_path())
            .map_err(|err| RefgenError::Filesystem(format!("open lock {lock_path}: {err}")))?;

        let start = Instant::now();
        loop {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => {
                    tracing::debug!("Acquired lock: {lock_path}");
                    return Ok(LockGuard {
                        file,
                        path: lock_path,
                    });
                }
                Err(err) if is_contended(&err) => {
                    let waited = start.elapsed();
                    if waited >= self.wait_max {
                        return Err(RefgenError::LockTimeout {
                            path: self.path.clone().into_std_path_buf(),
                            waited,
                        });
                    }
                    thread::sleep(LOCK_POLL_INTERVAL.min(self.wait_max - waited));
                }
                Err(err) => {
                    return Err(RefgenError::Filesystem(format!(
                        "lock {lock_path}: {err}"
                    )));
                }
            }
        }
    }

    /// Locks and loads the document for one logical operation.
    pub fn load(&self) -> Result<RegistrySession, RefgenError> {
        let lock = self.acquire_lock()?;
        let document = self.read()?;
        Ok(RegistrySession {
            store: self.clone(),
            _lock: lock,
            document,
        })
    }

    /// Reads the document without taking the lock.
    pub fn read(&self) -> Result<Document, RefgenError> {
        let content = fs::read_to_string(self.path.as_std_path())
            .map_err(|_| RefgenError::ConfigRead(self.path.clone().into_std_path_buf()))?;
        Document::parse(&content, Some(&self.path))
    }

    /// Writes a fresh document; refuses to replace an existing config.
    pub fn initialize(&self, server: &str, folder: Option<&str>) -> Result<Document, RefgenError> {
        let _lock = self.acquire_lock()?;
        if self.exists() {
            return Err(RefgenError::Filesystem(format!(
                "genome config already exists: {}",
                self.path
            )));
        }
        let folder = match folder {
            Some(folder) => folder.to_string(),
            None => self
                .path
                .parent()
                .map(|parent| parent.to_string())
                .unwrap_or_else(|| ".".to_string()),
        };
        let document = Document::new(server, &folder);
        self.write(&document)?;
        tracing::info!("Wrote new genome config: {}", self.path);
        Ok(document)
    }

    fn write(&self, document: &Document) -> Result<(), RefgenError> {
        let parent = self
            .path
            .parent()
            .filter(|parent| !parent.as_str().is_empty())
            .unwrap_or(Utf8Path::new("."));
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| RefgenError::Filesystem(err.to_string()))?;
        let content = document.to_yaml()?;
        let mut temp = Builder::new()
            .prefix(".genome-config")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| RefgenError::Filesystem(err.to_string()))?;
        temp.write_all(content.as_bytes())
            .map_err(|err| RefgenError::Filesystem(err.to_string()))?;
        temp.persist(self.path.as_std_path())
            .map_err(|err| RefgenError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

pub struct LockGuard {
    file: File,
    path: Utf8PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            tracing::debug!("Failed to release lock {}: {err}", self.path);
        }
    }
}

/// A loaded document plus the lock that protects it.
pub struct RegistrySession {
    store: RegistryStore,
    _lock: LockGuard,
    document: Document,
}

impl RegistrySession {
    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.document
    }

    pub fn path(&self) -> &Utf8Path {
        self.store.path()
    }

    pub fn save(&self) -> Result<(), RefgenError> {
        self.store.write(&self.document)?;
        tracing::debug!("Saved genome config: {}", self.store.path());
        Ok(())
    }
}

fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs4::lock_contended_error().raw_os_error()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn temp_store(wait: Duration) -> (tempfile::TempDir, RegistryStore) {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("genome_config.yaml")).unwrap();
        (temp, RegistryStore::new(path, wait))
    }

    #[test]
    fn initialize_then_load() {
        let (_temp, store) = temp_store(Duration::from_secs(1));
        store.initialize("http://server/", None).unwrap();
        let session = store.load().unwrap();
        assert_eq!(session.document().genome_server, "http://server");
        assert!(session.document().is_empty());
    }

    #[test]
    fn initialize_refuses_existing() {
        let (_temp, store) = temp_store(Duration::from_secs(1));
        store.initialize("http://server", None).unwrap();
        let err = store.initialize("http://server", None).unwrap_err();
        assert_matches!(err, RefgenError::Filesystem(_));
    }

    #[test]
    fn second_loader_times_out() {
        let (_temp, store) = temp_store(Duration::from_millis(250));
        store.initialize("http://server", None).unwrap();
        let _held = store.load().unwrap();
        assert_matches!(store.load().err(), Some(RefgenError::LockTimeout { .. }));
    }

    #[test]
    fn lock_released_on_drop() {
        let (_temp, store) = temp_store(Duration::from_millis(250));
        store.initialize("http://server", None).unwrap();
        drop(store.load().unwrap());
        assert!(store.load().is_ok());
    }
}
