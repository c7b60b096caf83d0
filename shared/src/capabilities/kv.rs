use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use thiserror::Error;

pub const MAX_KEY_LENGTH: usize = 512;
pub const MAX_VALUE_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KvKey {
    namespace: KeyNamespace,
    key: String,
}

impl KvKey {
    pub fn new(namespace: KeyNamespace, key: impl Into<String>) -> Result<Self, KvError> {
        let key = key.into();
        Self::validate_key(&key)?;
        Ok(Self { namespace, key })
    }

    /// The stored form, `"{namespace}:{key}"`.
    pub fn raw(&self) -> String {
        format!("{}:{}", self.namespace.prefix(), self.key)
    }

    pub fn namespace(&self) -> KeyNamespace {
        self.namespace
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn validate_key(key: &str) -> Result<(), KvError> {
        if key.trim().is_empty() {
            return Err(KvError::InvalidKey {
                key: key.to_string(),
                reason: "key cannot be empty".to_string(),
            });
        }

        if key.len() > MAX_KEY_LENGTH {
            return Err(KvError::InvalidKey {
                key: key.chars().take(50).collect::<String>() + "...",
                reason: format!("key exceeds maximum length of {MAX_KEY_LENGTH} bytes"),
            });
        }

        if key.chars().any(char::is_control) {
            return Err(KvError::InvalidKey {
                key: key.escape_default().to_string(),
                reason: "key contains control characters".to_string(),
            });
        }

        Ok(())
    }
}

impl std::fmt::Display for KvKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.namespace.prefix(), self.key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyNamespace {
    Session,
}

impl KeyNamespace {
    pub const fn prefix(self) -> &'static str {
        match self {
            KeyNamespace::Session => "session",
        }
    }
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum KvError {
    #[error("invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("value too large: {size} bytes exceeds maximum of {max} bytes")]
    ValueTooLarge { size: usize, max: usize },

    #[error("storage error: {message}")]
    Storage { message: String, retryable: bool },

    #[error("serialization error for '{key}': {message}")]
    Serialization { key: String, message: String },
}

impl KvError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, KvError::Storage { retryable: true, .. })
    }
}

/// Durable string-keyed byte storage for client state.
#[async_trait(?Send)]
pub trait KeyValueStore {
    async fn get(&self, key: &KvKey) -> Result<Option<Vec<u8>>, KvError>;
    async fn set(&self, key: &KvKey, value: Vec<u8>) -> Result<(), KvError>;
    async fn delete(&self, key: &KvKey) -> Result<(), KvError>;
}

/// Read a JSON value. A record that no longer decodes is reported as a
/// serialization error rather than silently treated as absent.
pub async fn load_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &KvKey,
) -> Result<Option<T>, KvError> {
    let Some(bytes) = store.get(key).await? else {
        return Ok(None);
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| KvError::Serialization {
            key: key.raw(),
            message: e.to_string(),
        })
}

pub async fn store_json<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: &KvKey,
    value: &T,
) -> Result<(), KvError> {
    let bytes = serde_json::to_vec(value).map_err(|e| KvError::Serialization {
        key: key.raw(),
        message: e.to_string(),
    })?;
    if bytes.len() > MAX_VALUE_SIZE {
        return Err(KvError::ValueTooLarge {
            size: bytes.len(),
            max: MAX_VALUE_SIZE,
        });
    }
    store.set(key, bytes).await
}

#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: RefCell<HashMap<String, Vec<u8>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &KvKey) -> bool {
        self.entries.borrow().contains_key(&key.raw())
    }
}

#[async_trait(?Send)]
impl KeyValueStore for MemoryKv {
    async fn get(&self, key: &KvKey) -> Result<Option<Vec<u8>>, KvError> {
        Ok(self.entries.borrow().get(&key.raw()).cloned())
    }

    async fn set(&self, key: &KvKey, value: Vec<u8>) -> Result<(), KvError> {
        self.entries.borrow_mut().insert(key.raw(), value);
        Ok(())
    }

    async fn delete(&self, key: &KvKey) -> Result<(), KvError> {
        self.entries.borrow_mut().remove(&key.raw());
        Ok(())
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub use sqlite::SqliteKv;

#[cfg(not(target_arch = "wasm32"))]
mod sqlite {
    use super::{KeyValueStore, KvError, KvKey};
    use async_trait::async_trait;
    use rusqlite::{params, Connection, OptionalExtension};
    use std::cell::RefCell;
    use std::path::Path;

    /// Single-connection SQLite store. Statements are short and local, so
    /// they run inline on the caller's task.
    pub struct SqliteKv {
        conn: RefCell<Connection>,
    }

    fn storage_error(e: &rusqlite::Error) -> KvError {
        let retryable = matches!(
            e.sqlite_error_code(),
            Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
        );
        KvError::Storage {
            message: e.to_string(),
            retryable,
        }
    }

    impl SqliteKv {
        pub fn open(path: impl AsRef<Path>) -> Result<Self, KvError> {
            let conn = Connection::open(path).map_err(|e| storage_error(&e))?;
            Self::with_connection(conn)
        }

        pub fn open_in_memory() -> Result<Self, KvError> {
            let conn = Connection::open_in_memory().map_err(|e| storage_error(&e))?;
            Self::with_connection(conn)
        }

        fn with_connection(conn: Connection) -> Result<Self, KvError> {
            conn.execute_batch(
                r"
                CREATE TABLE IF NOT EXISTS kv_entries (
                    key TEXT PRIMARY KEY,
                    value BLOB NOT NULL,
                    updated_at INTEGER NOT NULL
                );
                ",
            )
            .map_err(|e| storage_error(&e))?;
            Ok(Self {
                conn: RefCell::new(conn),
            })
        }
    }

    #[async_trait(?Send)]
    impl KeyValueStore for SqliteKv {
        async fn get(&self, key: &KvKey) -> Result<Option<Vec<u8>>, KvError> {
            self.conn
                .borrow()
                .query_row(
                    "SELECT value FROM kv_entries WHERE key = ?1",
                    params![key.raw()],
                    |row| row.get::<_, Vec<u8>>(0),
                )
                .optional()
                .map_err(|e| storage_error(&e))
        }

        async fn set(&self, key: &KvKey, value: Vec<u8>) -> Result<(), KvError> {
            self.conn
                .borrow()
                .execute(
                    "INSERT INTO kv_entries (key, value, updated_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                    params![key.raw(), value, chrono::Utc::now().timestamp_millis()],
                )
                .map(|_| ())
                .map_err(|e| storage_error(&e))
        }

        async fn delete(&self, key: &KvKey) -> Result<(), KvError> {
            self.conn
                .borrow()
                .execute("DELETE FROM kv_entries WHERE key = ?1", params![key.raw()])
                .map(|_| ())
                .map_err(|e| storage_error(&e))
        }
    }
}
