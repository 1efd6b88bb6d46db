//! # `CryptSchema`
//!
//! Schema expansion, data-key resolution and schema validation for
//! client-side field-level encryption.
//!
//! ## Features
//!
//! - Simplified per-field schemas expanded into the verbose schema map the
//!   native auto-encryption engine consumes
//! - One data key per field path, created on first use and reused afterwards
//! - Algorithm selection by field type, with deterministic/type compatibility
//!   checks
//! - Path-qualified validation errors for generated and hand-authored schemas
//! - Local, AWS, Azure and GCP KMS provider configuration
//!
//! ## Example
//!
//! ```rust,ignore
//! use cryptschema::prelude::*;
//! use cryptschema_key_file::{FileKeyVault, LocalKeyProvider};
//!
//! let config = Config::load("cryptschema.toml")?;
//! let resolver = KeyResolver::new(
//!     Arc::new(FileKeyVault::new("./keyvault")?),
//!     config.key_vault_namespace.clone(),
//!     &config.kms,
//!     Arc::new(LocalKeyProvider::new(&config.kms)?),
//! )?;
//!
//! let pipeline = Pipeline::new(config, resolver, driver);
//! let client = pipeline.build_client("schema.json").await?;
//! ```

#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod bson_type;
pub mod client;
pub mod config;
pub mod error;
pub mod key_handle;
pub mod key_provider;
pub mod key_vault;
pub mod kms;
pub mod resolver;
pub mod schema;

pub mod prelude {
    //! Convenience re-exports for common use.
    pub use crate::bson_type::{Algorithm, BsonType};
    pub use crate::client::{AutoEncryptionOptions, EncryptedClientFactory, Pipeline};
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorKind, KeyProviderError};
    pub use crate::key_handle::KeyHandle;
    pub use crate::key_provider::KeyProvider;
    pub use crate::key_vault::{KeyVault, KeyVaultNamespace, MemoryKeyVault};
    pub use crate::kms::{KmsProvider, KmsProviderKind, MasterKey};
    pub use crate::resolver::{KeyResolver, ResolveKey};
    pub use crate::schema::{SchemaExpander, SchemaValidator, VerboseCollectionSchema};
}
