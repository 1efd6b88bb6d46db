//! Local KMS provider.

use async_trait::async_trait;
use chacha20poly1305::{
    aead::{rand_core::RngCore, Aead, KeyInit, OsRng},
    ChaCha20Poly1305, Nonce,
};
use cryptschema::error::KeyProviderError;
use cryptschema::key_provider::{ensure_provider, KeyProvider};
use cryptschema::kms::{KmsProvider, KmsProviderKind, MasterKey, LOCAL_MASTER_KEY_SIZE};
use hkdf::Hkdf;
use secrecy::{ExposeSecret, SecretVec};
use sha2::Sha256;
use std::path::Path;
use zeroize::Zeroize;

/// Nonce size for ChaCha20-Poly1305 (96 bits).
const NONCE_SIZE: usize = 12;

/// Wrapping key size (256 bits).
const WRAPPING_KEY_SIZE: usize = 32;

const WRAPPING_KEY_INFO: &[u8] = b"cryptschema|local|dek-wrap|v1";

/// Reads a local master key file.
///
/// The file holds exactly [`LOCAL_MASTER_KEY_SIZE`] raw bytes. Creating key
/// files is left to operational tooling.
///
/// # Errors
///
/// Returns `KeyProviderError::Io` if the file cannot be read and
/// `KeyProviderError::InvalidMasterKey` if it has the wrong size.
pub fn load_master_key(path: impl AsRef<Path>) -> Result<SecretVec<u8>, KeyProviderError> {
    let mut bytes = std::fs::read(path.as_ref())?;
    if bytes.len() != LOCAL_MASTER_KEY_SIZE {
        let len = bytes.len();
        bytes.zeroize();
        return Err(KeyProviderError::InvalidMasterKey(format!(
            "master key file {} holds {len} bytes, expected {LOCAL_MASTER_KEY_SIZE}",
            path.as_ref().display()
        )));
    }
    Ok(SecretVec::new(bytes))
}

/// KMS back-end for the `local` provider.
///
/// A 256-bit wrapping key is derived from the master key with HKDF-SHA256.
/// Wrapped keys are `nonce || ciphertext` under ChaCha20-Poly1305.
pub struct LocalKeyProvider {
    wrapping_key: SecretVec<u8>,
}

impl LocalKeyProvider {
    /// Creates the provider from the configured `local` settings.
    ///
    /// # Errors
    ///
    /// Returns `KeyProviderError::ProviderMismatch` if `kms` configures a
    /// different provider.
    pub fn new(kms: &KmsProvider) -> Result<Self, KeyProviderError> {
        match kms {
            KmsProvider::Local(settings) => Self::from_master_key(settings.key()),
            other => Err(KeyProviderError::ProviderMismatch {
                expected: KmsProviderKind::Local.to_string(),
                actual: other.kind().to_string(),
            }),
        }
    }

    /// Creates the provider from raw master key bytes.
    ///
    /// # Errors
    ///
    /// Returns `KeyProviderError::InvalidMasterKey` if the key is not
    /// [`LOCAL_MASTER_KEY_SIZE`] bytes long.
    pub fn from_master_key(master_key: &SecretVec<u8>) -> Result<Self, KeyProviderError> {
        let ikm = master_key.expose_secret();
        if ikm.len() != LOCAL_MASTER_KEY_SIZE {
            return Err(KeyProviderError::InvalidMasterKey(format!(
                "local master key must be {LOCAL_MASTER_KEY_SIZE} bytes, found {}",
                ikm.len()
            )));
        }

        let hkdf = Hkdf::<Sha256>::new(None, ikm);
        let mut okm = vec![0u8; WRAPPING_KEY_SIZE];
        hkdf.expand(WRAPPING_KEY_INFO, &mut okm)
            .map_err(|e| KeyProviderError::WrapFailed(format!("key derivation failed: {e}")))?;
        Ok(Self { wrapping_key: SecretVec::new(okm) })
    }

    /// Creates the provider from a master key file.
    ///
    /// # Errors
    ///
    /// See [`load_master_key`].
    pub fn from_key_file(path: impl AsRef<Path>) -> Result<Self, KeyProviderError> {
        Self::from_master_key(&load_master_key(path)?)
    }

    fn cipher(&self) -> Result<ChaCha20Poly1305, String> {
        ChaCha20Poly1305::new_from_slice(self.wrapping_key.expose_secret())
            .map_err(|e| format!("invalid wrapping key: {e}"))
    }

    /// Recovers a data key wrapped by this provider.
    ///
    /// # Errors
    ///
    /// Returns `KeyProviderError::UnwrapFailed` if the input is truncated or
    /// fails authentication, e.g. because it was wrapped under another
    /// master key.
    pub fn unwrap_dek(&self, wrapped: &[u8]) -> Result<SecretVec<u8>, KeyProviderError> {
        if wrapped.len() <= NONCE_SIZE {
            return Err(KeyProviderError::UnwrapFailed("wrapped key is truncated".to_string()));
        }
        let (nonce_bytes, ciphertext) = wrapped.split_at(NONCE_SIZE);
        let cipher = self.cipher().map_err(KeyProviderError::UnwrapFailed)?;
        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map(SecretVec::new)
            .map_err(|_| KeyProviderError::UnwrapFailed("authentication failed".to_string()))
    }
}

#[async_trait]
impl KeyProvider for LocalKeyProvider {
    fn kind(&self) -> KmsProviderKind {
        KmsProviderKind::Local
    }

    async fn wrap_dek(
        &self,
        master_key: &MasterKey,
        dek: &SecretVec<u8>,
    ) -> Result<Vec<u8>, KeyProviderError> {
        ensure_provider(KmsProviderKind::Local, master_key)?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);

        let cipher = self.cipher().map_err(KeyProviderError::WrapFailed)?;
        let ciphertext = cipher
            .encrypt(&Nonce::from(nonce_bytes), dek.expose_secret().as_slice())
            .map_err(|e| KeyProviderError::WrapFailed(format!("ChaCha20-Poly1305: {e}")))?;

        let mut wrapped = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        wrapped.extend_from_slice(&nonce_bytes);
        wrapped.extend_from_slice(&ciphertext);
        Ok(wrapped)
    }
}
