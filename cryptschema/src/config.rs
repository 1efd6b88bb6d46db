//! Configuration loaded from TOML.
//!
//! ```toml
//! connection_string = "mongodb://localhost:27017"
//! key_vault_namespace = "encryption.__keyVault"
//! bypass_auto_encryption = false
//!
//! [kms]
//! provider = "local"
//! key_file = "/etc/cryptschema/master-key.txt"
//! ```

use crate::error::{Error, Result};
use crate::key_vault::KeyVaultNamespace;
use crate::kms::KmsProvider;
use serde::Deserialize;
use std::path::{Path, PathBuf};

const SCHEMES: [&str; 2] = ["mongodb+srv://", "mongodb://"];

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    connection_string: String,
    key_vault_namespace: String,
    kms: toml::Table,
    #[serde(default)]
    crypt_shared_lib_path: Option<PathBuf>,
    #[serde(default)]
    bypass_auto_encryption: bool,
}

/// Validated runtime configuration.
#[derive(Debug)]
pub struct Config {
    pub connection_string: String,
    pub key_vault_namespace: KeyVaultNamespace,
    pub kms: KmsProvider,
    /// Location of the shared encryption library; the driver searches its
    /// default locations when unset.
    pub crypt_shared_lib_path: Option<PathBuf>,
    pub bypass_auto_encryption: bool,
}

impl Config {
    /// Parses and validates configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` error for malformed TOML, a bad connection
    /// string or namespace, or invalid KMS settings, and
    /// `Error::UnsupportedKmsProvider` for an unknown provider tag.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(contents)
            .map_err(|e| Error::Configuration(format!("invalid configuration: {e}")))?;
        Self::from_raw(raw)
    }

    /// Reads and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigFile` if the file cannot be read or parsed, and
    /// the errors of [`Config::from_toml_str`] otherwise.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigFile { path: path.to_path_buf(), message: e.to_string() })?;
        let raw: RawConfig = toml::from_str(&contents)
            .map_err(|e| Error::ConfigFile { path: path.to_path_buf(), message: e.to_string() })?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self> {
        validate_connection_string(&raw.connection_string)?;
        let key_vault_namespace = raw.key_vault_namespace.parse::<KeyVaultNamespace>()?;

        let mut kms = raw.kms;
        let provider = match kms.remove("provider") {
            Some(toml::Value::String(tag)) => tag,
            Some(_) => {
                return Err(Error::Configuration("kms.provider must be a string".to_string()))
            }
            None => return Err(Error::Configuration("kms.provider is required".to_string())),
        };
        let kms = KmsProvider::from_table(&provider, kms)?;

        Ok(Self {
            connection_string: raw.connection_string,
            key_vault_namespace,
            kms,
            crypt_shared_lib_path: raw.crypt_shared_lib_path,
            bypass_auto_encryption: raw.bypass_auto_encryption,
        })
    }
}

/// Checks the scheme and host of a connection string.
///
/// # Errors
///
/// Returns `Error::Configuration` if the scheme is not `mongodb://` or
/// `mongodb+srv://`, or no host follows it.
pub fn validate_connection_string(uri: &str) -> Result<()> {
    let rest = SCHEMES.iter().find_map(|scheme| uri.strip_prefix(scheme)).ok_or_else(|| {
        Error::Configuration(format!(
            "connection string must start with {}",
            SCHEMES.iter().rev().copied().collect::<Vec<_>>().join(" or ")
        ))
    })?;

    let authority = rest.split(['/', '?']).next().unwrap_or_default();
    let hosts = authority.rsplit_once('@').map_or(authority, |(_, hosts)| hosts);
    if hosts.split(',').any(|host| host.trim().is_empty()) {
        return Err(Error::Configuration("connection string has no host".to_string()));
    }
    Ok(())
}
