//! KMS provider configuration.
//!
//! A [`KmsProvider`] is a closed union over the supported back-ends. Each arm
//! carries exactly the credentials and master-key descriptor that back-end
//! needs; the mapping to the native engine's `kmsProviders` and `masterKey`
//! documents is a pure function of the arm.

use crate::error::{Error, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use secrecy::{ExposeSecret, SecretString, SecretVec};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use zeroize::Zeroize;

/// Required length of a local master key in bytes.
pub const LOCAL_MASTER_KEY_SIZE: usize = 96;

/// Tag identifying a KMS back-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KmsProviderKind {
    /// Master key held in a local file
    Local,
    /// AWS KMS
    Aws,
    /// Azure Key Vault
    Azure,
    /// Google Cloud KMS
    Gcp,
}

impl KmsProviderKind {
    /// Every supported tag.
    pub const ALL: [Self; 4] = [Self::Local, Self::Aws, Self::Azure, Self::Gcp];

    /// Tag as used in configuration and in `kmsProviders`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Aws => "aws",
            Self::Azure => "azure",
            Self::Gcp => "gcp",
        }
    }
}

impl fmt::Display for KmsProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KmsProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s).ok_or_else(|| {
            Error::UnsupportedKmsProvider {
                provider: s.to_string(),
                supported: Self::ALL.map(Self::as_str).join(", "),
            }
        })
    }
}

/// Location of the customer master key that wraps new data keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum MasterKey {
    /// The local provider has no descriptor; the key itself is the credential.
    Local,
    /// AWS KMS key.
    #[serde(rename_all = "camelCase")]
    Aws {
        /// Region of the key
        region: String,
        /// Key ARN
        key: String,
        /// Custom KMS endpoint
        #[serde(default, skip_serializing_if = "Option::is_none")]
        endpoint: Option<String>,
    },
    /// Azure Key Vault key.
    #[serde(rename_all = "camelCase")]
    Azure {
        /// Vault endpoint, e.g. `myvault.vault.azure.net`
        key_vault_endpoint: String,
        /// Name of the key
        key_name: String,
        /// Specific key version
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key_version: Option<String>,
    },
    /// Google Cloud KMS key.
    #[serde(rename_all = "camelCase")]
    Gcp {
        /// Project owning the key ring
        project_id: String,
        /// Key ring location
        location: String,
        /// Key ring name
        key_ring: String,
        /// Name of the key
        key_name: String,
        /// Specific key version
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key_version: Option<String>,
        /// Custom KMS endpoint
        #[serde(default, skip_serializing_if = "Option::is_none")]
        endpoint: Option<String>,
    },
}

impl MasterKey {
    /// Provider this descriptor belongs to.
    #[must_use]
    pub const fn kind(&self) -> KmsProviderKind {
        match self {
            Self::Local => KmsProviderKind::Local,
            Self::Aws { .. } => KmsProviderKind::Aws,
            Self::Azure { .. } => KmsProviderKind::Azure,
            Self::Gcp { .. } => KmsProviderKind::Gcp,
        }
    }

    /// Renders the native `masterKey` document, or `None` for the local provider.
    #[must_use]
    pub fn to_document(&self) -> Option<Value> {
        match self {
            Self::Local => None,
            other => {
                let mut doc = serde_json::to_value(other).ok()?;
                if let Value::Object(map) = &mut doc {
                    map.remove("provider");
                }
                Some(doc)
            }
        }
    }
}

/// Settings of the local provider.
pub struct LocalSettings {
    key: SecretVec<u8>,
}

impl LocalSettings {
    /// Creates local settings from raw master key bytes.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the key is not 96 bytes long.
    pub fn new(mut key: Vec<u8>) -> Result<Self> {
        if key.len() != LOCAL_MASTER_KEY_SIZE {
            let len = key.len();
            key.zeroize();
            return Err(Error::Configuration(format!(
                "local master key must be {LOCAL_MASTER_KEY_SIZE} bytes, found {len}"
            )));
        }
        Ok(Self { key: SecretVec::new(key) })
    }

    /// The master key bytes.
    #[must_use]
    pub const fn key(&self) -> &SecretVec<u8> {
        &self.key
    }
}

impl fmt::Debug for LocalSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalSettings").field("key", &"[REDACTED]").finish()
    }
}

/// Settings of the AWS provider.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AwsSettings {
    pub access_key_id: String,
    pub secret_access_key: SecretString,
    #[serde(default)]
    pub session_token: Option<SecretString>,
    pub region: String,
    /// ARN of the master key
    pub key: String,
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// Settings of the Azure provider.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AzureSettings {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: SecretString,
    #[serde(default)]
    pub identity_platform_endpoint: Option<String>,
    pub key_vault_endpoint: String,
    pub key_name: String,
    #[serde(default)]
    pub key_version: Option<String>,
}

/// Settings of the GCP provider.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GcpSettings {
    pub email: String,
    /// Base64-encoded service account private key
    pub private_key: SecretString,
    #[serde(default)]
    pub endpoint: Option<String>,
    pub project_id: String,
    pub location: String,
    pub key_ring: String,
    pub key_name: String,
    #[serde(default)]
    pub key_version: Option<String>,
}

/// Local settings as written in a configuration file.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawLocalSettings {
    #[serde(default)]
    key: Option<SecretString>,
    #[serde(default)]
    key_file: Option<PathBuf>,
}

/// Configured KMS back-end.
#[derive(Debug)]
pub enum KmsProvider {
    Local(LocalSettings),
    Aws(AwsSettings),
    Azure(AzureSettings),
    Gcp(GcpSettings),
}

impl KmsProvider {
    /// Builds a provider from its tag and a table of settings.
    ///
    /// The tag is checked first so an unsupported provider is reported as such
    /// rather than as a missing field.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnsupportedKmsProvider` for an unknown tag and
    /// `Error::Configuration` for missing or empty settings.
    pub fn from_table(provider: &str, table: toml::Table) -> Result<Self> {
        let kind = provider.parse::<KmsProviderKind>()?;
        let value = toml::Value::Table(table);
        let invalid =
            |e: toml::de::Error| Error::Configuration(format!("invalid {kind} settings: {e}"));

        let parsed = match kind {
            KmsProviderKind::Local => {
                let raw: RawLocalSettings = value.try_into().map_err(invalid)?;
                Self::Local(Self::local_settings(raw)?)
            }
            KmsProviderKind::Aws => Self::Aws(value.try_into().map_err(invalid)?),
            KmsProviderKind::Azure => Self::Azure(value.try_into().map_err(invalid)?),
            KmsProviderKind::Gcp => Self::Gcp(value.try_into().map_err(invalid)?),
        };
        parsed.check_required()?;
        Ok(parsed)
    }

    fn local_settings(raw: RawLocalSettings) -> Result<LocalSettings> {
        match (raw.key, raw.key_file) {
            (Some(key), None) => {
                let bytes = STANDARD.decode(key.expose_secret().trim()).map_err(|e| {
                    Error::Configuration(format!("local master key is not valid base64: {e}"))
                })?;
                LocalSettings::new(bytes)
            }
            (None, Some(path)) => {
                let bytes = std::fs::read(&path).map_err(|e| {
                    Error::Configuration(format!(
                        "cannot read local master key file {}: {e}",
                        path.display()
                    ))
                })?;
                LocalSettings::new(bytes)
            }
            (Some(_), Some(_)) => Err(Error::Configuration(
                "local provider accepts either key or key_file, not both".to_string(),
            )),
            (None, None) => Err(Error::Configuration(
                "local provider requires key or key_file".to_string(),
            )),
        }
    }

    fn check_required(&self) -> Result<()> {
        let fields: Vec<(&str, &str)> = match self {
            Self::Local(_) => Vec::new(),
            Self::Aws(s) => vec![
                ("access_key_id", s.access_key_id.as_str()),
                ("secret_access_key", s.secret_access_key.expose_secret().as_str()),
                ("region", s.region.as_str()),
                ("key", s.key.as_str()),
            ],
            Self::Azure(s) => vec![
                ("tenant_id", s.tenant_id.as_str()),
                ("client_id", s.client_id.as_str()),
                ("client_secret", s.client_secret.expose_secret().as_str()),
                ("key_vault_endpoint", s.key_vault_endpoint.as_str()),
                ("key_name", s.key_name.as_str()),
            ],
            Self::Gcp(s) => vec![
                ("email", s.email.as_str()),
                ("private_key", s.private_key.expose_secret().as_str()),
                ("project_id", s.project_id.as_str()),
                ("location", s.location.as_str()),
                ("key_ring", s.key_ring.as_str()),
                ("key_name", s.key_name.as_str()),
            ],
        };
        match fields.into_iter().find(|(_, v)| v.trim().is_empty()) {
            Some((name, _)) => Err(Error::Configuration(format!(
                "{} setting \"{name}\" must not be empty",
                self.kind()
            ))),
            None => Ok(()),
        }
    }

    /// Provider tag of this configuration.
    #[must_use]
    pub const fn kind(&self) -> KmsProviderKind {
        match self {
            Self::Local(_) => KmsProviderKind::Local,
            Self::Aws(_) => KmsProviderKind::Aws,
            Self::Azure(_) => KmsProviderKind::Azure,
            Self::Gcp(_) => KmsProviderKind::Gcp,
        }
    }

    /// Credentials in the shape the native key-creation call expects.
    #[must_use]
    pub fn credentials(&self) -> Value {
        let mut doc = Map::new();
        match self {
            Self::Local(s) => {
                doc.insert(
                    "key".into(),
                    json!({ "$binary": {
                        "base64": STANDARD.encode(s.key().expose_secret()),
                        "subType": "00",
                    }}),
                );
            }
            Self::Aws(s) => {
                doc.insert("accessKeyId".into(), json!(s.access_key_id));
                doc.insert("secretAccessKey".into(), json!(s.secret_access_key.expose_secret()));
                if let Some(token) = &s.session_token {
                    doc.insert("sessionToken".into(), json!(token.expose_secret()));
                }
            }
            Self::Azure(s) => {
                doc.insert("tenantId".into(), json!(s.tenant_id));
                doc.insert("clientId".into(), json!(s.client_id));
                doc.insert("clientSecret".into(), json!(s.client_secret.expose_secret()));
                if let Some(endpoint) = &s.identity_platform_endpoint {
                    doc.insert("identityPlatformEndpoint".into(), json!(endpoint));
                }
            }
            Self::Gcp(s) => {
                doc.insert("email".into(), json!(s.email));
                doc.insert("privateKey".into(), json!(s.private_key.expose_secret()));
                if let Some(endpoint) = &s.endpoint {
                    doc.insert("endpoint".into(), json!(endpoint));
                }
            }
        }
        Value::Object(doc)
    }

    /// The native `kmsProviders` document: `{ <tag>: <credentials> }`.
    #[must_use]
    pub fn kms_providers(&self) -> Value {
        let mut doc = Map::new();
        doc.insert(self.kind().as_str().to_string(), self.credentials());
        Value::Object(doc)
    }

    /// Descriptor of the master key new data keys are wrapped with.
    #[must_use]
    pub fn master_key(&self) -> MasterKey {
        match self {
            Self::Local(_) => MasterKey::Local,
            Self::Aws(s) => MasterKey::Aws {
                region: s.region.clone(),
                key: s.key.clone(),
                endpoint: s.endpoint.clone(),
            },
            Self::Azure(s) => MasterKey::Azure {
                key_vault_endpoint: s.key_vault_endpoint.clone(),
                key_name: s.key_name.clone(),
                key_version: s.key_version.clone(),
            },
            Self::Gcp(s) => MasterKey::Gcp {
                project_id: s.project_id.clone(),
                location: s.location.clone(),
                key_ring: s.key_ring.clone(),
                key_name: s.key_name.clone(),
                key_version: s.key_version.clone(),
                endpoint: s.endpoint.clone(),
            },
        }
    }
}
