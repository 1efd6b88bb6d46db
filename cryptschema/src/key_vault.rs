//! Key vault store abstraction.
//!
//! The key vault holds wrapped data keys, each tagged with alternate names.
//! Records are only ever created and read; nothing here deletes or updates
//! a key.

use crate::error::{Error, KeyProviderError, Result};
use crate::key_handle::KeyHandle;
use crate::kms::MasterKey;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

/// Fully-qualified `database.collection` of the key vault.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyVaultNamespace {
    database: String,
    collection: String,
}

impl KeyVaultNamespace {
    /// Creates a namespace from its parts.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if either part is empty.
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Result<Self> {
        let database = database.into();
        let collection = collection.into();
        if database.trim().is_empty() {
            return Err(Error::Configuration("key vault database name is missing".to_string()));
        }
        if collection.trim().is_empty() {
            return Err(Error::Configuration("key vault collection name is missing".to_string()));
        }
        Ok(Self { database, collection })
    }

    /// Database holding the key vault collection.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Key vault collection name.
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }
}

impl fmt::Display for KeyVaultNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

impl FromStr for KeyVaultNamespace {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (database, collection) = s.split_once('.').ok_or_else(|| {
            Error::Configuration(format!(
                "key vault namespace \"{s}\" must have the form database.collection"
            ))
        })?;
        Self::new(database, collection)
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded.as_bytes()).map_err(de::Error::custom)
    }
}

/// A wrapped data key as stored in the key vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataKeyRecord {
    #[serde(rename = "_id")]
    pub id: KeyHandle,
    /// DEK material wrapped by the master key
    #[serde(with = "base64_bytes")]
    pub key_material: Vec<u8>,
    pub key_alt_names: Vec<String>,
    pub master_key: MasterKey,
    /// Seconds since the Unix epoch
    pub creation_date: u64,
    pub update_date: u64,
    pub status: i32,
}

impl DataKeyRecord {
    /// Creates a record for freshly wrapped key material.
    #[must_use]
    pub fn new(key_material: Vec<u8>, alt_name: impl Into<String>, master_key: MasterKey) -> Self {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs());
        Self {
            id: KeyHandle::generate(),
            key_material,
            key_alt_names: vec![alt_name.into()],
            master_key,
            creation_date: now,
            update_date: now,
            status: 0,
        }
    }

    /// Whether this record is tagged with `alt_name`.
    #[must_use]
    pub fn has_alt_name(&self, alt_name: &str) -> bool {
        self.key_alt_names.iter().any(|n| n == alt_name)
    }
}

/// Backing store of the key vault.
///
/// Every lookup opens its own connection; the connection is released when the
/// returned value is dropped, whatever the outcome of the work done with it.
#[async_trait]
pub trait KeyVault: Send + Sync {
    /// Opens a connection scoped to `namespace`.
    ///
    /// # Errors
    ///
    /// Returns `KeyProviderError::ConnectionFailed` if the store is unreachable.
    async fn connect(
        &self,
        namespace: &KeyVaultNamespace,
    ) -> std::result::Result<Box<dyn KeyVaultConnection>, KeyProviderError>;
}

/// An open connection to the key vault.
#[async_trait]
pub trait KeyVaultConnection: Send + Sync {
    /// Finds the record whose alternate names contain `alt_name`.
    ///
    /// # Errors
    ///
    /// Returns `KeyProviderError::QueryFailed` if the lookup fails.
    async fn find_by_alt_name(
        &self,
        alt_name: &str,
    ) -> std::result::Result<Option<DataKeyRecord>, KeyProviderError>;

    /// Inserts a new record.
    ///
    /// Alternate names are unique across the vault.
    ///
    /// # Errors
    ///
    /// Returns `KeyProviderError::DuplicateAltName` if another record already
    /// carries one of the record's alternate names.
    async fn insert(&mut self, record: DataKeyRecord) -> std::result::Result<(), KeyProviderError>;
}

type Collections = HashMap<String, Vec<DataKeyRecord>>;

/// In-process key vault, useful for tests and local tooling.
#[derive(Debug, Clone, Default)]
pub struct MemoryKeyVault {
    collections: Arc<Mutex<Collections>>,
    open: Arc<AtomicUsize>,
}

impl MemoryKeyVault {
    /// Creates an empty vault.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the records stored under `namespace`.
    #[must_use]
    pub fn records(&self, namespace: &KeyVaultNamespace) -> Vec<DataKeyRecord> {
        self.collections
            .lock()
            .map(|c| c.get(&namespace.to_string()).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Number of connections currently open.
    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyVault for MemoryKeyVault {
    async fn connect(
        &self,
        namespace: &KeyVaultNamespace,
    ) -> std::result::Result<Box<dyn KeyVaultConnection>, KeyProviderError> {
        self.open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryConnection {
            namespace: namespace.to_string(),
            collections: Arc::clone(&self.collections),
            open: Arc::clone(&self.open),
        }))
    }
}

struct MemoryConnection {
    namespace: String,
    collections: Arc<Mutex<Collections>>,
    open: Arc<AtomicUsize>,
}

impl MemoryConnection {
    fn poisoned() -> KeyProviderError {
        KeyProviderError::QueryFailed("key vault lock poisoned".to_string())
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl KeyVaultConnection for MemoryConnection {
    async fn find_by_alt_name(
        &self,
        alt_name: &str,
    ) -> std::result::Result<Option<DataKeyRecord>, KeyProviderError> {
        let collections = self.collections.lock().map_err(|_| Self::poisoned())?;
        Ok(collections
            .get(&self.namespace)
            .and_then(|records| records.iter().find(|r| r.has_alt_name(alt_name)))
            .cloned())
    }

    async fn insert(&mut self, record: DataKeyRecord) -> std::result::Result<(), KeyProviderError> {
        let mut collections = self.collections.lock().map_err(|_| Self::poisoned())?;
        let records = collections.entry(self.namespace.clone()).or_default();
        if let Some(name) =
            record.key_alt_names.iter().find(|n| records.iter().any(|r| r.has_alt_name(n)))
        {
            return Err(KeyProviderError::DuplicateAltName(name.clone()));
        }
        records.push(record);
        Ok(())
    }
}
