//! Storage facade — namespaced persistent key/value with sessions.
//!
//! Models the flash-backed store the firmware ships with: short keys,
//! typed scalars and strings, transactional sessions per namespace.
//! A session loads the whole namespace, mutates in memory and writes
//! back on `commit`; nothing touches the backend in between.
//!
//! Open failures are non-fatal by contract: callers keep their in-memory
//! state and report `NVS_WRITE_FAILED` upward on save attempts.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use gaia_common::consts::STORAGE_KEY_MAX;
use gaia_common::error::ErrorCode;
use serde_json::Value;
use thiserror::Error;

// ─── Namespaces ─────────────────────────────────────────────────────

pub const NS_WIFI: &str = "wifi_config";
pub const NS_ZONE: &str = "zone_config";
pub const NS_SYSTEM: &str = "system_config";
pub const NS_SENSOR: &str = "sensor_config";
pub const NS_ACTUATOR: &str = "actuator_config";
pub const NS_SUBZONE: &str = "subzone_config";

type Map = BTreeMap<String, Value>;

/// Storage failure.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("namespace '{namespace}' open failed: {reason}")]
    NamespaceOpenFailed { namespace: String, reason: String },

    #[error("write to namespace '{namespace}' failed: {reason}")]
    WriteFailed { namespace: String, reason: String },

    #[error("key '{0}' exceeds {STORAGE_KEY_MAX} characters")]
    KeyTooLong(String),

    #[error("session is read-only")]
    ReadOnly,
}

impl StorageError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NamespaceOpenFailed { .. } => ErrorCode::NAMESPACE_OPEN_FAILED,
            _ => ErrorCode::NVS_WRITE_FAILED,
        }
    }
}

// ─── Backends ───────────────────────────────────────────────────────

/// Raw namespace blob access. One map per namespace.
pub trait StorageBackend {
    fn load(&mut self, namespace: &str) -> Result<Map, StorageError>;
    fn store(&mut self, namespace: &str, data: &Map) -> Result<(), StorageError>;
}

/// Volatile backend for tests and storage-less operation.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    namespaces: HashMap<String, Map>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryBackend {
    fn load(&mut self, namespace: &str) -> Result<Map, StorageError> {
        Ok(self.namespaces.get(namespace).cloned().unwrap_or_default())
    }

    fn store(&mut self, namespace: &str, data: &Map) -> Result<(), StorageError> {
        self.namespaces.insert(namespace.to_string(), data.clone());
        Ok(())
    }
}

/// One JSON file per namespace under a data directory.
#[derive(Debug)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, namespace: &str) -> PathBuf {
        self.dir.join(format!("{namespace}.json"))
    }
}

impl StorageBackend for FileBackend {
    fn load(&mut self, namespace: &str) -> Result<Map, StorageError> {
        let path = self.path_for(namespace);
        if !path.exists() {
            return Ok(Map::new());
        }
        let raw = std::fs::read_to_string(&path).map_err(|e| {
            StorageError::NamespaceOpenFailed {
                namespace: namespace.to_string(),
                reason: e.to_string(),
            }
        })?;
        serde_json::from_str(&raw).map_err(|e| StorageError::NamespaceOpenFailed {
            namespace: namespace.to_string(),
            reason: e.to_string(),
        })
    }

    fn store(&mut self, namespace: &str, data: &Map) -> Result<(), StorageError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| StorageError::WriteFailed {
            namespace: namespace.to_string(),
            reason: e.to_string(),
        })?;
        let raw = serde_json::to_string_pretty(data).map_err(|e| StorageError::WriteFailed {
            namespace: namespace.to_string(),
            reason: e.to_string(),
        })?;
        std::fs::write(self.path_for(namespace), raw).map_err(|e| StorageError::WriteFailed {
            namespace: namespace.to_string(),
            reason: e.to_string(),
        })
    }
}

// ─── Facade ─────────────────────────────────────────────────────────

/// Namespaced store handing out transactional sessions.
pub struct Storage {
    backend: Box<dyn StorageBackend>,
}

impl Storage {
    pub fn new(backend: Box<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryBackend::new()))
    }

    /// Open a session on a namespace.
    pub fn begin(&mut self, namespace: &str, read_only: bool) -> Result<Session<'_>, StorageError> {
        let data = self.backend.load(namespace)?;
        Ok(Session {
            backend: self.backend.as_mut(),
            namespace: namespace.to_string(),
            data,
            read_only,
            dirty: false,
        })
    }

    /// Drop every key of a namespace (factory reset path).
    pub fn erase_namespace(&mut self, namespace: &str) -> Result<(), StorageError> {
        self.backend.store(namespace, &Map::new())
    }
}

/// Transactional view of one namespace.
pub struct Session<'a> {
    backend: &'a mut dyn StorageBackend,
    namespace: String,
    data: Map,
    read_only: bool,
    dirty: bool,
}

impl std::fmt::Debug for Session<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("namespace", &self.namespace)
            .field("data", &self.data)
            .field("read_only", &self.read_only)
            .field("dirty", &self.dirty)
            .finish()
    }
}

impl Session<'_> {
    fn check_put(&self, key: &str) -> Result<(), StorageError> {
        if self.read_only {
            return Err(StorageError::ReadOnly);
        }
        if key.len() > STORAGE_KEY_MAX || !key.is_ascii() {
            return Err(StorageError::KeyTooLong(key.to_string()));
        }
        Ok(())
    }

    fn put(&mut self, key: &str, value: Value) -> Result<(), StorageError> {
        self.check_put(key)?;
        self.data.insert(key.to_string(), value);
        self.dirty = true;
        Ok(())
    }

    pub fn put_bool(&mut self, key: &str, value: bool) -> Result<(), StorageError> {
        self.put(key, Value::Bool(value))
    }

    pub fn put_u8(&mut self, key: &str, value: u8) -> Result<(), StorageError> {
        self.put(key, Value::from(value))
    }

    pub fn put_u16(&mut self, key: &str, value: u16) -> Result<(), StorageError> {
        self.put(key, Value::from(value))
    }

    pub fn put_u32(&mut self, key: &str, value: u32) -> Result<(), StorageError> {
        self.put(key, Value::from(value))
    }

    pub fn put_u64(&mut self, key: &str, value: u64) -> Result<(), StorageError> {
        self.put(key, Value::from(value))
    }

    pub fn put_string(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.put(key, Value::from(value))
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.data.get(key).and_then(Value::as_bool).unwrap_or(default)
    }

    pub fn get_u8(&self, key: &str, default: u8) -> u8 {
        self.data
            .get(key)
            .and_then(Value::as_u64)
            .and_then(|v| u8::try_from(v).ok())
            .unwrap_or(default)
    }

    pub fn get_u16(&self, key: &str, default: u16) -> u16 {
        self.data
            .get(key)
            .and_then(Value::as_u64)
            .and_then(|v| u16::try_from(v).ok())
            .unwrap_or(default)
    }

    pub fn get_u32(&self, key: &str, default: u32) -> u32 {
        self.data
            .get(key)
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(default)
    }

    pub fn get_u64(&self, key: &str, default: u64) -> u64 {
        self.data.get(key).and_then(Value::as_u64).unwrap_or(default)
    }

    pub fn get_string(&self, key: &str, default: &str) -> String {
        self.data
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or(default)
            .to_string()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn erase(&mut self, key: &str) -> Result<(), StorageError> {
        if self.read_only {
            return Err(StorageError::ReadOnly);
        }
        if self.data.remove(key).is_some() {
            self.dirty = true;
        }
        Ok(())
    }

    /// Drop every key in the namespace.
    pub fn clear(&mut self) -> Result<(), StorageError> {
        if self.read_only {
            return Err(StorageError::ReadOnly);
        }
        if !self.data.is_empty() {
            self.data.clear();
            self.dirty = true;
        }
        Ok(())
    }

    /// Write the session back. Clean or read-only sessions are a no-op.
    pub fn commit(self) -> Result<(), StorageError> {
        if !self.dirty || self.read_only {
            return Ok(());
        }
        self.backend.store(&self.namespace, &self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_round_trip() {
        let mut storage = Storage::in_memory();
        {
            let mut session = storage.begin(NS_SYSTEM, false).unwrap();
            session.put_bool("approved", true).unwrap();
            session.put_u32("boot_count", 7).unwrap();
            session.put_string("node_id", "ESP_AB12CD").unwrap();
            session.commit().unwrap();
        }
        let session = storage.begin(NS_SYSTEM, true).unwrap();
        assert!(session.get_bool("approved", false));
        assert_eq!(session.get_u32("boot_count", 0), 7);
        assert_eq!(session.get_string("node_id", ""), "ESP_AB12CD");
        assert_eq!(session.get_string("missing", "dflt"), "dflt");
    }

    #[test]
    fn uncommitted_changes_discarded() {
        let mut storage = Storage::in_memory();
        {
            let mut session = storage.begin(NS_SYSTEM, false).unwrap();
            session.put_u32("x", 1).unwrap();
            // dropped without commit
        }
        let session = storage.begin(NS_SYSTEM, true).unwrap();
        assert!(!session.contains("x"));
    }

    #[test]
    fn read_only_session_refuses_writes() {
        let mut storage = Storage::in_memory();
        let mut session = storage.begin(NS_ZONE, true).unwrap();
        assert!(matches!(
            session.put_u32("zone", 1),
            Err(StorageError::ReadOnly)
        ));
    }

    #[test]
    fn long_key_refused() {
        let mut storage = Storage::in_memory();
        let mut session = storage.begin(NS_SENSOR, false).unwrap();
        let err = session.put_u8("a_very_long_key_name", 1).unwrap_err();
        assert!(matches!(err, StorageError::KeyTooLong(_)));
        assert_eq!(err.code(), ErrorCode::NVS_WRITE_FAILED);
        // 15 chars is the limit and fits.
        session.put_u8("exactly15chars_", 1).unwrap();
    }

    #[test]
    fn erase_and_clear() {
        let mut storage = Storage::in_memory();
        {
            let mut session = storage.begin(NS_ZONE, false).unwrap();
            session.put_string("zone_id", "z1").unwrap();
            session.put_string("master_zone", "m1").unwrap();
            session.commit().unwrap();
        }
        {
            let mut session = storage.begin(NS_ZONE, false).unwrap();
            session.erase("zone_id").unwrap();
            session.commit().unwrap();
        }
        let session = storage.begin(NS_ZONE, true).unwrap();
        assert!(!session.contains("zone_id"));
        assert!(session.contains("master_zone"));

        storage.erase_namespace(NS_ZONE).unwrap();
        let session = storage.begin(NS_ZONE, true).unwrap();
        assert!(!session.contains("master_zone"));
    }

    #[test]
    fn file_backend_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut storage = Storage::new(Box::new(FileBackend::new(dir.path())));
            let mut session = storage.begin(NS_ZONE, false).unwrap();
            session.put_string("zone_id", "greenhouse-3").unwrap();
            session.put_bool("assigned", true).unwrap();
            session.commit().unwrap();
        }
        let mut storage = Storage::new(Box::new(FileBackend::new(dir.path())));
        let session = storage.begin(NS_ZONE, true).unwrap();
        assert_eq!(session.get_string("zone_id", ""), "greenhouse-3");
        assert!(session.get_bool("assigned", false));
    }

    #[test]
    fn file_backend_corrupt_file_reports_open_failure() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("zone_config.json"), "{not json").unwrap();
        let mut storage = Storage::new(Box::new(FileBackend::new(dir.path())));
        let err = storage.begin(NS_ZONE, true).unwrap_err();
        assert_eq!(err.code(), ErrorCode::NAMESPACE_OPEN_FAILED);
    }
}
