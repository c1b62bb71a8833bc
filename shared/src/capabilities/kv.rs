use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

use crate::ErrorKind;

pub const MAX_KEY_LENGTH: usize = 512;
/// Browser durable storage quota per origin.
pub const MAX_VALUE_SIZE: usize = 5 * 1024 * 1024;

/// Validated storage key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KvKey(String);

impl KvKey {
    pub fn new(key: impl Into<String>) -> Result<Self, KvError> {
        let key = key.into();
        Self::validate_key(&key)?;
        Ok(Self(key))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate_key(key: &str) -> Result<(), KvError> {
        let invalid = |reason: &str| KvError::InvalidKey {
            key: key.chars().take(50).collect(),
            reason: reason.to_string(),
        };

        if key.trim().is_empty() {
            return Err(invalid("key cannot be empty"));
        }
        if key.len() > MAX_KEY_LENGTH {
            return Err(invalid("key exceeds maximum length"));
        }
        if key.contains("..") {
            return Err(invalid("key cannot contain path traversal sequences"));
        }
        if key.starts_with('/') || key.starts_with('\\') {
            return Err(invalid("key cannot start with path separator"));
        }
        if key.chars().any(char::is_control) {
            return Err(invalid("key contains control characters"));
        }
        Ok(())
    }
}

impl std::fmt::Display for KvKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum KvError {
    #[error("invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("value too large: {size} bytes exceeds maximum of {max} bytes")]
    ValueTooLarge { size: usize, max: usize },

    #[error("storage error: {message} (code: {code:?})")]
    Storage {
        code: StorageErrorCode,
        message: String,
    },

    #[error("serialization error: {message}")]
    Serialization { message: String, key: Option<String> },
}

impl KvError {
    pub fn storage(code: StorageErrorCode, message: impl Into<String>) -> Self {
        Self::Storage {
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage { code, .. } if code.is_retryable())
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Serialization { .. } => ErrorKind::Serialization,
            Self::Storage { .. } | Self::ValueTooLarge { .. } => ErrorKind::Storage,
            Self::InvalidKey { .. } => ErrorKind::Configuration,
        }
    }
}

impl From<std::io::Error> for KvError {
    fn from(e: std::io::Error) -> Self {
        let code = match e.kind() {
            std::io::ErrorKind::PermissionDenied => StorageErrorCode::PermissionDenied,
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted => {
                StorageErrorCode::Busy
            }
            _ => StorageErrorCode::IoError,
        };
        Self::storage(code, e.to_string())
    }
}

#[cfg(all(feature = "sqlite", not(target_arch = "wasm32")))]
impl From<rusqlite::Error> for KvError {
    fn from(e: rusqlite::Error) -> Self {
        let code = match e.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DatabaseBusy) => StorageErrorCode::Busy,
            Some(rusqlite::ErrorCode::DatabaseLocked) => StorageErrorCode::Locked,
            Some(rusqlite::ErrorCode::DatabaseCorrupt) => StorageErrorCode::Corrupted,
            Some(rusqlite::ErrorCode::DiskFull) => StorageErrorCode::DiskFull,
            Some(rusqlite::ErrorCode::PermissionDenied) => StorageErrorCode::PermissionDenied,
            _ => StorageErrorCode::Unknown,
        };
        Self::storage(code, e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageErrorCode {
    Unknown,
    IoError,
    Corrupted,
    DiskFull,
    PermissionDenied,
    QuotaExceeded,
    Busy,
    Locked,
}

impl StorageErrorCode {
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Busy | Self::Locked)
    }
}

/// Durable string key-value storage scoped to this application.
#[async_trait::async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &KvKey) -> Result<Option<String>, KvError>;
    async fn set(&self, key: &KvKey, value: String) -> Result<(), KvError>;
    async fn remove(&self, key: &KvKey) -> Result<(), KvError>;
}

fn check_size(value: &str) -> Result<(), KvError> {
    if value.len() > MAX_VALUE_SIZE {
        return Err(KvError::ValueTooLarge {
            size: value.len(),
            max: MAX_VALUE_SIZE,
        });
    }
    Ok(())
}

/// Reads and decodes a JSON value. Absent keys yield `None`.
pub async fn load_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &KvKey,
) -> Result<Option<T>, KvError> {
    let Some(raw) = store.get(key).await? else {
        return Ok(None);
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|e| KvError::Serialization {
            message: e.to_string(),
            key: Some(key.to_string()),
        })
}

pub async fn store_json<T: Serialize + Sync + ?Sized>(
    store: &dyn KeyValueStore,
    key: &KvKey,
    value: &T,
) -> Result<(), KvError> {
    let raw = serde_json::to_string(value).map_err(|e| KvError::Serialization {
        message: e.to_string(),
        key: Some(key.to_string()),
    })?;
    store.set(key, raw).await
}

// --- In-memory ---

#[derive(Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, String>>,
    fail_writes: AtomicBool,
}

impl MemoryKvStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes every `set` and `remove` fail with a quota error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Stores a value bypassing validation, e.g. to plant corrupt data.
    pub fn insert_raw(&self, key: &str, value: &str) {
        self.lock().insert(key.to_string(), value.to_string());
    }

    #[must_use]
    pub fn raw(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    fn check_writable(&self) -> Result<(), KvError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(KvError::storage(
                StorageErrorCode::QuotaExceeded,
                "storage quota exceeded",
            ));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl KeyValueStore for MemoryKvStore {
    async fn get(&self, key: &KvKey) -> Result<Option<String>, KvError> {
        Ok(self.lock().get(key.as_str()).cloned())
    }

    async fn set(&self, key: &KvKey, value: String) -> Result<(), KvError> {
        self.check_writable()?;
        check_size(&value)?;
        self.lock().insert(key.as_str().to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &KvKey) -> Result<(), KvError> {
        self.check_writable()?;
        self.lock().remove(key.as_str());
        Ok(())
    }
}

// --- File-per-key ---

/// One file per key under a root directory, replaced atomically on write.
pub struct FileKvStore {
    root: PathBuf,
}

impl FileKvStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, KvError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &KvKey) -> PathBuf {
        let name: String = key
            .as_str()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.root.join(format!("{name}.json"))
    }

    fn write_atomic(path: &Path, value: &str) -> Result<(), KvError> {
        let tmp_path = path.with_extension("tmp");

        let mut file = File::create(&tmp_path)?;
        file.write_all(value.as_bytes())?;
        file.sync_all()?;

        std::fs::rename(&tmp_path, path)?;

        if let Some(parent) = path.parent() {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }
        Ok(())
    }
}

async fn blocking<T, F>(f: F) -> Result<T, KvError>
where
    F: FnOnce() -> Result<T, KvError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| KvError::storage(StorageErrorCode::Unknown, e.to_string()))?
}

#[async_trait::async_trait]
impl KeyValueStore for FileKvStore {
    async fn get(&self, key: &KvKey) -> Result<Option<String>, KvError> {
        let path = self.path_for(key);
        blocking(move || match std::fs::read_to_string(&path) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        })
        .await
    }

    async fn set(&self, key: &KvKey, value: String) -> Result<(), KvError> {
        check_size(&value)?;
        let path = self.path_for(key);
        blocking(move || Self::write_atomic(&path, &value)).await
    }

    async fn remove(&self, key: &KvKey) -> Result<(), KvError> {
        let path = self.path_for(key);
        blocking(move || match std::fs::remove_file(&path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        })
        .await
    }
}

// --- SQLite ---

#[cfg(all(feature = "sqlite", not(target_arch = "wasm32")))]
pub use self::sqlite::SqliteKvStore;

#[cfg(all(feature = "sqlite", not(target_arch = "wasm32")))]
mod sqlite {
    use super::{blocking, check_size, KeyValueStore, KvError, KvKey};
    use rusqlite::{params, Connection, OptionalExtension};
    use std::path::Path;
    use std::sync::{Arc, Mutex, PoisonError};

    const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS kv (
        key TEXT PRIMARY KEY NOT NULL,
        value TEXT NOT NULL
    )";

    /// Single-table SQLite store. Queries run on the blocking pool.
    #[derive(Clone)]
    pub struct SqliteKvStore {
        conn: Arc<Mutex<Connection>>,
    }

    impl SqliteKvStore {
        pub fn open(path: impl AsRef<Path>) -> Result<Self, KvError> {
            Self::init(Connection::open(path)?)
        }

        pub fn open_in_memory() -> Result<Self, KvError> {
            Self::init(Connection::open_in_memory()?)
        }

        fn init(conn: Connection) -> Result<Self, KvError> {
            conn.execute_batch(SCHEMA)?;
            Ok(Self {
                conn: Arc::new(Mutex::new(conn)),
            })
        }

        async fn with_conn<T, F>(&self, f: F) -> Result<T, KvError>
        where
            F: FnOnce(&Connection) -> Result<T, KvError> + Send + 'static,
            T: Send + 'static,
        {
            let conn = Arc::clone(&self.conn);
            blocking(move || {
                let guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
                f(&guard)
            })
            .await
        }
    }

    #[async_trait::async_trait]
    impl KeyValueStore for SqliteKvStore {
        async fn get(&self, key: &KvKey) -> Result<Option<String>, KvError> {
            let key = key.as_str().to_string();
            self.with_conn(move |conn| {
                Ok(conn
                    .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                        row.get::<_, String>(0)
                    })
                    .optional()?)
            })
            .await
        }

        async fn set(&self, key: &KvKey, value: String) -> Result<(), KvError> {
            check_size(&value)?;
            let key = key.as_str().to_string();
            self.with_conn(move |conn| {
                conn.execute(
                    "INSERT INTO kv (key, value) VALUES (?1, ?2)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                    params![key, value],
                )?;
                Ok(())
            })
            .await
        }

        async fn remove(&self, key: &KvKey) -> Result<(), KvError> {
            let key = key.as_str().to_string();
            self.with_conn(move |conn| {
                conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
                Ok(())
            })
            .await
        }
    }
}
