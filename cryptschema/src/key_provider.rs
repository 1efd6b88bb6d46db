//! KMS back-end abstraction.

use crate::error::KeyProviderError;
use crate::kms::{KmsProviderKind, MasterKey};
use async_trait::async_trait;
use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::SecretVec;

/// Size of data key material in bytes, as the native engine expects.
pub const DATA_KEY_SIZE: usize = 96;

/// Wraps freshly generated data keys under a customer master key.
///
/// Implementations must be thread-safe (`Send + Sync`) so one back-end can
/// serve concurrent resolutions.
///
/// # Example
///
/// ```rust,ignore
/// use cryptschema::key_provider::KeyProvider;
///
/// struct MyKms;
///
/// #[async_trait::async_trait]
/// impl KeyProvider for MyKms {
///     fn kind(&self) -> KmsProviderKind {
///         KmsProviderKind::Azure
///     }
///
///     async fn wrap_dek(&self, master_key: &MasterKey, dek: &SecretVec<u8>)
///         -> Result<Vec<u8>, KeyProviderError> {
///         // call the vendor SDK
///     }
/// }
/// ```
#[async_trait]
pub trait KeyProvider: Send + Sync {
    /// Provider tag this back-end serves.
    fn kind(&self) -> KmsProviderKind;

    /// Wraps (encrypts) a Data Encryption Key (DEK) under `master_key`.
    ///
    /// # Arguments
    ///
    /// * `master_key` - Descriptor of the customer master key
    /// * `dek` - The plaintext DEK, [`DATA_KEY_SIZE`] bytes
    ///
    /// # Errors
    ///
    /// Returns `KeyProviderError::WrapFailed` if wrapping fails, or
    /// `KeyProviderError::ProviderMismatch` if `master_key` belongs to a
    /// different provider.
    async fn wrap_dek(
        &self,
        master_key: &MasterKey,
        dek: &SecretVec<u8>,
    ) -> Result<Vec<u8>, KeyProviderError>;
}

/// Generates fresh random data key material.
#[must_use]
pub fn generate_data_key() -> SecretVec<u8> {
    let mut dek = vec![0u8; DATA_KEY_SIZE];
    OsRng.fill_bytes(&mut dek);
    SecretVec::new(dek)
}

/// Checks that `master_key` belongs to the provider `expected`.
///
/// # Errors
///
/// Returns `KeyProviderError::ProviderMismatch` otherwise.
pub fn ensure_provider(
    expected: KmsProviderKind,
    master_key: &MasterKey,
) -> Result<(), KeyProviderError> {
    if master_key.kind() == expected {
        Ok(())
    } else {
        Err(KeyProviderError::ProviderMismatch {
            expected: expected.to_string(),
            actual: master_key.kind().to_string(),
        })
    }
}
