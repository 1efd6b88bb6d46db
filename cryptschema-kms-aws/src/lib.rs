//! AWS KMS provider for `CryptSchema`.
//!
//! Wraps new data keys with the KMS `Encrypt` operation under the customer
//! master key named by the configured ARN.
//!
//! # Example
//!
//! ```rust,no_run
//! use cryptschema::config::Config;
//! use cryptschema_kms_aws::AwsKmsProvider;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load("cryptschema.toml")?;
//! let provider = AwsKmsProvider::new(&config.kms).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # AWS Configuration
//!
//! Credentials and region come from the `[kms]` table of the configuration,
//! not from the SDK's default credential chain. An optional `endpoint`
//! overrides the KMS endpoint, e.g. for a VPC endpoint or a local emulator.

#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_kms::config::{Credentials, Region};
use aws_sdk_kms::primitives::Blob;
use aws_sdk_kms::Client as KmsClient;
use cryptschema::error::KeyProviderError;
use cryptschema::key_provider::{ensure_provider, KeyProvider};
use cryptschema::kms::{KmsProvider, KmsProviderKind, MasterKey};
use secrecy::{ExposeSecret, SecretVec};
use thiserror::Error;
use tracing::debug;

const CREDENTIALS_SOURCE: &str = "cryptschema-config";

/// Errors specific to AWS KMS operations.
#[derive(Debug, Error)]
pub enum AwsKmsError {
    /// The configuration is for another provider
    #[error("expected aws KMS settings, found {0}")]
    NotAws(KmsProviderKind),

    /// Master key lives in another region than the client
    #[error("master key region {actual} does not match client region {expected}")]
    RegionMismatch {
        /// Region the client was built for
        expected: String,
        /// Region named by the master key
        actual: String,
    },

    /// AWS KMS API error
    #[error("AWS KMS error: {0}")]
    KmsError(String),

    /// KMS answered without a ciphertext
    #[error("KMS returned no ciphertext")]
    EmptyResponse,
}

impl From<AwsKmsError> for KeyProviderError {
    fn from(err: AwsKmsError) -> Self {
        match err {
            AwsKmsError::NotAws(actual) => Self::ProviderMismatch {
                expected: KmsProviderKind::Aws.to_string(),
                actual: actual.to_string(),
            },
            other => Self::WrapFailed(other.to_string()),
        }
    }
}

/// KMS back-end for the `aws` provider.
pub struct AwsKmsProvider {
    client: KmsClient,
    region: String,
}

impl AwsKmsProvider {
    /// Creates a provider from the configured `aws` settings.
    ///
    /// # Errors
    ///
    /// Returns `AwsKmsError::NotAws` if `kms` configures another provider.
    pub async fn new(kms: &KmsProvider) -> Result<Self, AwsKmsError> {
        let KmsProvider::Aws(settings) = kms else {
            return Err(AwsKmsError::NotAws(kms.kind()));
        };

        let credentials = Credentials::new(
            settings.access_key_id.clone(),
            settings.secret_access_key.expose_secret().clone(),
            settings.session_token.as_ref().map(|t| t.expose_secret().clone()),
            None,
            CREDENTIALS_SOURCE,
        );
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .credentials_provider(credentials);
        if let Some(endpoint) = &settings.endpoint {
            loader = loader.endpoint_url(endpoint_url(endpoint));
        }
        let config = loader.load().await;

        Ok(Self::from_client(KmsClient::new(&config), settings.region.clone()))
    }

    /// Creates a provider around an existing client.
    ///
    /// # Arguments
    ///
    /// * `client` - KMS client
    /// * `region` - Region the client talks to
    #[must_use]
    pub fn from_client(client: KmsClient, region: impl Into<String>) -> Self {
        Self { client, region: region.into() }
    }

    /// Region this provider talks to.
    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    async fn encrypt(&self, key_id: &str, dek: &SecretVec<u8>) -> Result<Vec<u8>, AwsKmsError> {
        let response = self
            .client
            .encrypt()
            .key_id(key_id)
            .plaintext(Blob::new(dek.expose_secret().clone()))
            .send()
            .await
            .map_err(|e| AwsKmsError::KmsError(format!("encrypt failed: {e}")))?;

        let ciphertext = response.ciphertext_blob().ok_or(AwsKmsError::EmptyResponse)?;
        Ok(ciphertext.as_ref().to_vec())
    }
}

/// Endpoints may be configured as bare hosts; the SDK needs a URL.
fn endpoint_url(endpoint: &str) -> String {
    if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("https://{endpoint}")
    }
}

#[async_trait]
impl KeyProvider for AwsKmsProvider {
    fn kind(&self) -> KmsProviderKind {
        KmsProviderKind::Aws
    }

    async fn wrap_dek(
        &self,
        master_key: &MasterKey,
        dek: &SecretVec<u8>,
    ) -> Result<Vec<u8>, KeyProviderError> {
        ensure_provider(KmsProviderKind::Aws, master_key)?;
        let MasterKey::Aws { region, key, .. } = master_key else {
            return Err(AwsKmsError::NotAws(master_key.kind()).into());
        };
        if *region != self.region {
            return Err(AwsKmsError::RegionMismatch {
                expected: self.region.clone(),
                actual: region.clone(),
            }
            .into());
        }

        debug!(key_arn = %key, region = %region, "wrapping data key with AWS KMS");
        Ok(self.encrypt(key, dek).await?)
    }
}
