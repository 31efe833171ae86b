//! Durable storage for what a client needs to resume a session.

use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::error::StorageError;

pub const SESSION_ID_KEY: &str = "sessionId";
pub const LAST_EVENT_ID_KEY: &str = "lastEventId";
pub const SERVER_URL_KEY: &str = "serverUrl";

/// Key-value storage that outlives the connection.
pub trait ReconnectStorage: Send + Sync {
    /// Read a value.
    fn get(&self, key: &str) -> Option<String>;

    /// Write a value.
    ///
    /// # Errors
    /// Returns error if the value cannot be persisted.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove a value. Removing a missing key is not an error.
    ///
    /// # Errors
    /// Returns error if the change cannot be persisted.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// The three reconnection keys, read together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SavedSession {
    pub session_id: Option<String>,
    pub last_event_id: Option<String>,
    pub server_url: Option<String>,
}

impl SavedSession {
    /// Load the saved keys from `storage`.
    #[must_use]
    pub fn load(storage: &dyn ReconnectStorage) -> Self {
        Self {
            session_id: storage.get(SESSION_ID_KEY),
            last_event_id: storage.get(LAST_EVENT_ID_KEY),
            server_url: storage.get(SERVER_URL_KEY),
        }
    }
}

/// In-memory storage. Useful for tests; nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    /// Create an empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn values(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ReconnectStorage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.values().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.values().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.values().remove(key);
        Ok(())
    }
}

/// Current values plus a version bumped on every change.
#[derive(Debug, Default)]
struct Snapshot {
    values: BTreeMap<String, String>,
    version: u64,
}

/// Serializes file writes and remembers the newest version on disk.
#[derive(Debug)]
struct Writer {
    path: PathBuf,
    written: Mutex<u64>,
}

impl Writer {
    /// Write `values` unless a newer version already reached the file.
    fn write(&self, version: u64, values: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let mut written = self.written.lock().unwrap_or_else(PoisonError::into_inner);
        if version <= *written {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_vec_pretty(values)?)?;
        *written = version;
        Ok(())
    }
}

/// JSON file storage.
///
/// The whole map is rewritten on every change. Inside a tokio runtime the
/// write runs on the blocking pool and [`FileStorage::flush`] waits for the
/// file to catch up. Outside a runtime the write happens inline.
#[derive(Debug)]
pub struct FileStorage {
    snapshot: Mutex<Snapshot>,
    writer: Arc<Writer>,
}

impl FileStorage {
    /// Open (or start) the file at `path`.
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let values = match fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => BTreeMap::new(),
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            snapshot: Mutex::new(Snapshot { values, version: 0 }),
            writer: Arc::new(Writer {
                path,
                written: Mutex::new(0),
            }),
        })
    }

    /// Open `<data dir>/<app>/reconnect.json`.
    ///
    /// # Errors
    /// Returns error if the platform has no data directory or the file is unreadable.
    pub fn in_data_dir(app: &str) -> Result<Self, StorageError> {
        let dir = dirs::data_dir().ok_or(StorageError::NoDataDir)?;
        Self::open(dir.join(app).join("reconnect.json"))
    }

    /// Backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.writer.path
    }

    fn snapshot(&self) -> MutexGuard<'_, Snapshot> {
        self.snapshot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write the current values to disk now.
    ///
    /// # Errors
    /// Returns error if the file cannot be written.
    pub fn flush(&self) -> Result<(), StorageError> {
        let (version, values) = {
            let snapshot = self.snapshot();
            (snapshot.version, snapshot.values.clone())
        };
        self.writer.write(version, &values)
    }

    fn persist(&self, version: u64, values: BTreeMap<String, String>) -> Result<(), StorageError> {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let writer = Arc::clone(&self.writer);
                handle.spawn_blocking(move || {
                    if let Err(e) = writer.write(version, &values) {
                        tracing::warn!(
                            path = %writer.path.display(),
                            "Failed to write reconnection state: {e}"
                        );
                    }
                });
                Ok(())
            }
            Err(_) => self.writer.write(version, &values),
        }
    }

    fn update(
        &self,
        change: impl FnOnce(&mut BTreeMap<String, String>) -> bool,
    ) -> Result<(), StorageError> {
        let (version, values) = {
            let mut snapshot = self.snapshot();
            if !change(&mut snapshot.values) {
                return Ok(());
            }
            snapshot.version += 1;
            (snapshot.version, snapshot.values.clone())
        };
        self.persist(version, values)
    }
}

impl ReconnectStorage for FileStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.snapshot().values.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.update(|values| {
            if values.get(key).map(String::as_str) == Some(value) {
                return false;
            }
            values.insert(key.to_string(), value.to_string());
            true
        })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.update(|values| values.remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_storage() {
        let storage = MemoryStorage::new();
        storage.set(SESSION_ID_KEY, "s1").unwrap();
        storage.remove(LAST_EVENT_ID_KEY).unwrap();

        assert_eq!(
            SavedSession::load(&storage),
            SavedSession {
                session_id: Some("s1".into()),
                ..SavedSession::default()
            }
        );
    }

    #[test]
    fn test_file_storage_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("reconnect.json");

        let storage = FileStorage::open(&path).unwrap();
        storage.set(SESSION_ID_KEY, "s1").unwrap();
        storage.set(LAST_EVENT_ID_KEY, "abc_3").unwrap();
        storage.set(SERVER_URL_KEY, "http://localhost/mcp").unwrap();
        storage.remove(LAST_EVENT_ID_KEY).unwrap();
        drop(storage);

        let reopened = FileStorage::open(&path).unwrap();
        assert_eq!(reopened.get(SESSION_ID_KEY).as_deref(), Some("s1"));
        assert_eq!(reopened.get(LAST_EVENT_ID_KEY), None);
        assert_eq!(
            reopened.get(SERVER_URL_KEY).as_deref(),
            Some("http://localhost/mcp")
        );
    }

    #[tokio::test]
    async fn test_file_storage_writes_off_the_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reconnect.json");

        let storage = FileStorage::open(&path).unwrap();
        storage.set(SESSION_ID_KEY, "s1").unwrap();
        for seq in 1..=50 {
            storage.set(LAST_EVENT_ID_KEY, &format!("_GET_stream_{seq}")).unwrap();
        }
        tokio_test::assert_ok!(storage.flush());

        // A background write finishing late never replaces newer contents.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let reopened = FileStorage::open(&path).unwrap();
        assert_eq!(reopened.get(SESSION_ID_KEY).as_deref(), Some("s1"));
        assert_eq!(
            reopened.get(LAST_EVENT_ID_KEY).as_deref(),
            Some("_GET_stream_50")
        );
    }

    #[test]
    fn test_file_storage_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reconnect.json");
        fs::write(&path, "not json").unwrap();

        assert!(matches!(
            FileStorage::open(&path),
            Err(StorageError::Serialization(_))
        ));
    }
}
