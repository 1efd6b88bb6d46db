//! File-backed key vault.

use async_trait::async_trait;
use cryptschema::error::KeyProviderError;
use cryptschema::key_vault::{DataKeyRecord, KeyVault, KeyVaultConnection, KeyVaultNamespace};
use std::collections::HashMap;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock, PoisonError};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::debug;

type InsertLock = Arc<Mutex<()>>;

/// Insert locks shared by every vault in the process, keyed by namespace file.
static INSERT_LOCKS: OnceLock<StdMutex<HashMap<PathBuf, InsertLock>>> = OnceLock::new();

fn insert_lock(path: &Path) -> InsertLock {
    let locks = INSERT_LOCKS.get_or_init(|| StdMutex::new(HashMap::new()));
    let mut locks = locks.lock().unwrap_or_else(PoisonError::into_inner);
    Arc::clone(locks.entry(path.to_path_buf()).or_default())
}

/// Key vault stored as one JSON file per namespace.
///
/// Files live in a single directory:
/// ```text
/// keyvault/
/// ├── encryption.__keyVault.json
/// └── tenant_a.__keyVault.json
/// ```
///
/// Writes go to a uniquely named temporary file that is then renamed over the
/// original, so readers never see a partial file. Inserts into a namespace
/// are serialized across every `FileKeyVault` opened on the same directory
/// within the process, and reject duplicate alternate names. Separate
/// processes writing the same directory are not coordinated.
#[derive(Clone)]
pub struct FileKeyVault {
    dir: PathBuf,
    open: Arc<AtomicUsize>,
}

impl FileKeyVault {
    /// Creates a vault rooted at `dir`.
    ///
    /// # Arguments
    ///
    /// * `dir` - Directory holding the namespace files
    ///
    /// # Errors
    ///
    /// Returns `KeyProviderError::ConnectionFailed` if `dir` is not an
    /// existing directory.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, KeyProviderError> {
        let dir = dir.as_ref();
        let dir = std::fs::canonicalize(dir)
            .ok()
            .filter(|canonical| canonical.is_dir())
            .ok_or_else(|| {
                KeyProviderError::ConnectionFailed(format!(
                    "key vault directory does not exist: {}",
                    dir.display()
                ))
            })?;
        Ok(Self { dir, open: Arc::new(AtomicUsize::new(0)) })
    }

    /// Directory holding the namespace files, in canonical form.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of connections currently open.
    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Path of the file backing `namespace`.
    #[must_use]
    pub fn namespace_file(&self, namespace: &KeyVaultNamespace) -> PathBuf {
        self.dir.join(format!("{namespace}.json"))
    }
}

#[async_trait]
impl KeyVault for FileKeyVault {
    async fn connect(
        &self,
        namespace: &KeyVaultNamespace,
    ) -> Result<Box<dyn KeyVaultConnection>, KeyProviderError> {
        if !tokio::fs::metadata(&self.dir).await.map(|m| m.is_dir()).unwrap_or(false) {
            return Err(KeyProviderError::ConnectionFailed(format!(
                "key vault directory is gone: {}",
                self.dir.display()
            )));
        }
        let path = self.namespace_file(namespace);
        self.open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FileConnection {
            lock: insert_lock(&path),
            dir: self.dir.clone(),
            path,
            open: Arc::clone(&self.open),
        }))
    }
}

struct FileConnection {
    dir: PathBuf,
    path: PathBuf,
    lock: InsertLock,
    open: Arc<AtomicUsize>,
}

impl FileConnection {
    async fn read_records(&self) -> Result<Vec<DataKeyRecord>, KeyProviderError> {
        let contents = match tokio::fs::read(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(KeyProviderError::QueryFailed(format!(
                    "cannot read {}: {e}",
                    self.path.display()
                )))
            }
        };
        serde_json::from_slice(&contents).map_err(|e| {
            KeyProviderError::MalformedRecord(format!("{}: {e}", self.path.display()))
        })
    }

    async fn write_records(&self, records: &[DataKeyRecord]) -> Result<(), KeyProviderError> {
        let contents = serde_json::to_vec_pretty(records)
            .map_err(|e| KeyProviderError::InsertFailed(e.to_string()))?;
        let dir = self.dir.clone();
        let path = self.path.clone();
        let target = self.path.display().to_string();

        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut tmp = NamedTempFile::new_in(&dir)?;
            tmp.write_all(&contents)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&path).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| KeyProviderError::InsertFailed(format!("write task failed: {e}")))?
        .map_err(|e| KeyProviderError::InsertFailed(format!("cannot replace {target}: {e}")))
    }
}

impl Drop for FileConnection {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl KeyVaultConnection for FileConnection {
    async fn find_by_alt_name(
        &self,
        alt_name: &str,
    ) -> Result<Option<DataKeyRecord>, KeyProviderError> {
        let records = self.read_records().await?;
        Ok(records.into_iter().find(|r| r.has_alt_name(alt_name)))
    }

    async fn insert(&mut self, record: DataKeyRecord) -> Result<(), KeyProviderError> {
        let _guard = self.lock.lock().await;

        let mut records = self.read_records().await?;
        if let Some(name) =
            record.key_alt_names.iter().find(|n| records.iter().any(|r| r.has_alt_name(n)))
        {
            return Err(KeyProviderError::DuplicateAltName(name.clone()));
        }

        debug!(path = %self.path.display(), key_id = %record.id, "storing data key");
        records.push(record);
        self.write_records(&records).await
    }
}
