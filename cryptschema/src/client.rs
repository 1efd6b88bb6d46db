//! Assembly of an auto-encrypting client.
//!
//! [`Pipeline`] runs the whole flow for one schema file: parse, expand with
//! per-field data keys, validate, then hand the options to the driver-side
//! [`EncryptedClientFactory`].

use crate::config::Config;
use crate::error::{Error, Result};
use crate::key_vault::KeyVaultNamespace;
use crate::resolver::ResolveKey;
use crate::schema::{load_schema_file, SchemaExpander, SchemaValidator, VerboseCollectionSchema};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::path::Path;
use tracing::info;

/// Options handed to the driver's encrypted-client constructor.
#[derive(Debug, Clone, PartialEq)]
pub struct AutoEncryptionOptions {
    pub key_vault_namespace: KeyVaultNamespace,
    /// Native `kmsProviders` document
    pub kms_providers: Value,
    pub schema_map: VerboseCollectionSchema,
    pub bypass_auto_encryption: bool,
    /// Native `extraOptions`, such as `cryptSharedLibPath`
    pub extra_options: Map<String, Value>,
}

impl AutoEncryptionOptions {
    /// Builds options from configuration and a validated schema map.
    #[must_use]
    pub fn new(config: &Config, schema_map: VerboseCollectionSchema) -> Self {
        let mut extra_options = Map::new();
        if let Some(path) = &config.crypt_shared_lib_path {
            extra_options.insert("cryptSharedLibPath".into(), json!(path.display().to_string()));
        }
        Self {
            key_vault_namespace: config.key_vault_namespace.clone(),
            kms_providers: config.kms.kms_providers(),
            schema_map,
            bypass_auto_encryption: config.bypass_auto_encryption,
            extra_options,
        }
    }

    /// Renders the options in the driver's `autoEncryption` shape.
    #[must_use]
    pub fn to_document(&self) -> Value {
        let mut doc = Map::new();
        doc.insert("keyVaultNamespace".into(), json!(self.key_vault_namespace.to_string()));
        doc.insert("kmsProviders".into(), self.kms_providers.clone());
        doc.insert("schemaMap".into(), self.schema_map.to_json());
        doc.insert("bypassAutoEncryption".into(), json!(self.bypass_auto_encryption));
        if !self.extra_options.is_empty() {
            doc.insert("extraOptions".into(), Value::Object(self.extra_options.clone()));
        }
        Value::Object(doc)
    }
}

/// Driver-side constructor of auto-encrypting clients.
#[async_trait]
pub trait EncryptedClientFactory: Send + Sync {
    /// The client type produced.
    type Client: Send;

    /// Connects a client that encrypts and decrypts according to `options`.
    ///
    /// # Errors
    ///
    /// Returns the driver's error if the client cannot be constructed.
    async fn connect(
        &self,
        connection_string: &str,
        options: AutoEncryptionOptions,
    ) -> std::result::Result<Self::Client, Box<dyn std::error::Error + Send + Sync>>;
}

/// Schema file to encrypted client, end to end.
pub struct Pipeline<R, F> {
    config: Config,
    expander: SchemaExpander<R>,
    validator: SchemaValidator,
    factory: F,
}

impl<R: ResolveKey, F: EncryptedClientFactory> Pipeline<R, F> {
    /// Creates a pipeline.
    ///
    /// # Arguments
    ///
    /// * `config` - Validated configuration
    /// * `resolver` - Data-key resolver used during expansion
    /// * `factory` - Constructor of the final client
    pub fn new(config: Config, resolver: R, factory: F) -> Self {
        Self {
            config,
            expander: SchemaExpander::new(resolver),
            validator: SchemaValidator::new(),
            factory,
        }
    }

    /// Replaces the validator, e.g. to change the error-path root label.
    #[must_use]
    pub fn with_validator(mut self, validator: SchemaValidator) -> Self {
        self.validator = validator;
        self
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Loads, expands and validates a schema file into client options.
    ///
    /// # Errors
    ///
    /// Returns the first failure of any stage; nothing is retried.
    pub async fn prepare(
        &self,
        schema_file: impl AsRef<Path> + Send,
    ) -> Result<AutoEncryptionOptions> {
        let schema_file = schema_file.as_ref();
        let documents = load_schema_file(schema_file)?;
        let schema = self.expander.expand(&documents).await?;
        self.validator.validate(&schema)?;

        info!(
            schema_file = %schema_file.display(),
            collections = schema.len(),
            key_vault = %self.config.key_vault_namespace,
            "encryption schema ready"
        );
        Ok(AutoEncryptionOptions::new(&self.config, schema))
    }

    /// Builds an auto-encrypting client for the collections in `schema_file`.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`Pipeline::prepare`], and
    /// `Error::ClientConstruction` if the factory fails.
    pub async fn build_client(&self, schema_file: impl AsRef<Path> + Send) -> Result<F::Client> {
        let options = self.prepare(schema_file).await?;
        let client = self
            .factory
            .connect(&self.config.connection_string, options)
            .await
            .map_err(|e| Error::ClientConstruction(e.to_string()))?;
        info!(kms_provider = %self.config.kms.kind(), "encrypted client constructed");
        Ok(client)
    }
}
