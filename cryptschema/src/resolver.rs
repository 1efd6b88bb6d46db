//! Data-key resolution by field path.
//!
//! A field path (`database.collection.field[.sub...]`) is the alternate name
//! of exactly one data key. Resolution returns the existing key when there is
//! one and otherwise creates, wraps and stores a new one.
//!
//! There is no in-process cache: every call is an independent round trip to
//! the key vault, so one failed path never affects another.

use crate::error::{Error, KeyProviderError, Result};
use crate::key_handle::KeyHandle;
use crate::key_provider::{generate_data_key, KeyProvider};
use crate::key_vault::{DataKeyRecord, KeyVault, KeyVaultNamespace};
use crate::kms::{KmsProvider, MasterKey};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Anything that maps a field path to a data key.
#[async_trait]
pub trait ResolveKey: Send + Sync {
    /// Returns the handle of the data key for `field_path`.
    ///
    /// # Errors
    ///
    /// Returns an error tagged with `field_path` if the key cannot be found
    /// or created.
    async fn resolve(&self, field_path: &str) -> Result<KeyHandle>;
}

#[async_trait]
impl<R: ResolveKey + ?Sized> ResolveKey for Arc<R> {
    async fn resolve(&self, field_path: &str) -> Result<KeyHandle> {
        (**self).resolve(field_path).await
    }
}

/// Resolves field paths against a key vault, creating keys through a KMS back-end.
///
/// # Example
///
/// ```rust,ignore
/// use cryptschema::prelude::*;
///
/// let resolver = KeyResolver::new(
///     Arc::new(MemoryKeyVault::new()),
///     "encryption.__keyVault".parse()?,
///     &config.kms,
///     Arc::new(LocalKeyProvider::new(&config.kms)?),
/// )?;
///
/// let first = resolver.resolve("app.users.ssn").await?;
/// let second = resolver.resolve("app.users.ssn").await?;
/// assert_eq!(first, second);
/// ```
pub struct KeyResolver {
    vault: Arc<dyn KeyVault>,
    namespace: KeyVaultNamespace,
    master_key: MasterKey,
    provider: Arc<dyn KeyProvider>,
}

impl KeyResolver {
    /// Creates a resolver.
    ///
    /// # Arguments
    ///
    /// * `vault` - Backing store of the key vault
    /// * `namespace` - Key vault `database.collection`
    /// * `kms` - Configured provider; supplies the master-key descriptor
    /// * `provider` - Back-end that wraps new keys
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if `provider` serves a different KMS
    /// than `kms` configures.
    pub fn new(
        vault: Arc<dyn KeyVault>,
        namespace: KeyVaultNamespace,
        kms: &KmsProvider,
        provider: Arc<dyn KeyProvider>,
    ) -> Result<Self> {
        if provider.kind() != kms.kind() {
            return Err(Error::Configuration(format!(
                "KMS back-end \"{}\" does not match configured provider \"{}\"",
                provider.kind(),
                kms.kind()
            )));
        }
        Ok(Self { vault, namespace, master_key: kms.master_key(), provider })
    }

    /// Key vault namespace this resolver reads and writes.
    #[must_use]
    pub const fn namespace(&self) -> &KeyVaultNamespace {
        &self.namespace
    }

    async fn find_or_create(
        &self,
        field_path: &str,
    ) -> std::result::Result<KeyHandle, KeyProviderError> {
        // Dropped on every exit path below, which releases the connection.
        let mut conn = self.vault.connect(&self.namespace).await?;

        if let Some(existing) = conn.find_by_alt_name(field_path).await? {
            debug!(field_path, key_id = %existing.id, "found existing data key");
            return Ok(existing.id);
        }

        let dek = generate_data_key();
        let wrapped = self.provider.wrap_dek(&self.master_key, &dek).await?;
        let record = DataKeyRecord::new(wrapped, field_path, self.master_key.clone());
        let id = record.id;

        match conn.insert(record).await {
            Ok(()) => {
                info!(field_path, key_id = %id, provider = %self.provider.kind(), "created data key");
                Ok(id)
            }
            // First write wins: adopt the key stored by the concurrent creator.
            Err(KeyProviderError::DuplicateAltName(_)) => {
                let winner = conn.find_by_alt_name(field_path).await?.ok_or_else(|| {
                    KeyProviderError::QueryFailed(format!(
                        "data key for {field_path} missing after duplicate insert"
                    ))
                })?;
                warn!(field_path, key_id = %winner.id, "lost data key creation race");
                Ok(winner.id)
            }
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl ResolveKey for KeyResolver {
    async fn resolve(&self, field_path: &str) -> Result<KeyHandle> {
        if field_path.is_empty() {
            return Err(Error::invalid_input("field path", "must not be empty"));
        }
        self.find_or_create(field_path)
            .await
            .map_err(|source| Error::KeyResolution { field_path: field_path.to_string(), source })
    }
}
