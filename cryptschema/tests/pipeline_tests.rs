//! Integration tests for cryptschema with FileKeyVault and LocalKeyProvider.

use cryptschema::client::{AutoEncryptionOptions, EncryptedClientFactory, Pipeline};
use cryptschema::config::Config;
use cryptschema::error::{ErrorKind, KeyProviderError};
use cryptschema::key_handle::KeyHandle;
use cryptschema::key_vault::{KeyVault, KeyVaultConnection};
use cryptschema::resolver::{KeyResolver, ResolveKey};
use cryptschema::schema::{KeyId, SchemaExpander, SchemaNode, SchemaValidator};
use cryptschema_key_file::{FileKeyVault, LocalKeyProvider};
use secrecy::ExposeSecret;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    config_path: PathBuf,
    vault_dir: PathBuf,
    schema_path: PathBuf,
}

fn fixture(schema: &str) -> Fixture {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let vault_dir = dir.path().join("keyvault");
    std::fs::create_dir(&vault_dir).unwrap();

    let key_file = dir.path().join("master-key.txt");
    std::fs::write(&key_file, [42u8; 96]).unwrap();

    let config_path = dir.path().join("cryptschema.toml");
    std::fs::write(
        &config_path,
        format!(
            r#"
connection_string = "mongodb://localhost:27017/?replicaSet=rs0"
key_vault_namespace = "encryption.__keyVault"

[kms]
provider = "local"
key_file = "{}"
"#,
            key_file.display()
        ),
    )
    .unwrap();

    let schema_path = dir.path().join("schema.json");
    std::fs::write(&schema_path, schema).unwrap();

    Fixture { _dir: dir, config_path, vault_dir, schema_path }
}

fn resolver(config: &Config, vault: &FileKeyVault) -> KeyResolver {
    KeyResolver::new(
        Arc::new(vault.clone()),
        config.key_vault_namespace.clone(),
        &config.kms,
        Arc::new(LocalKeyProvider::new(&config.kms).unwrap()),
    )
    .unwrap()
}

struct DocumentFactory;

#[async_trait::async_trait]
impl EncryptedClientFactory for DocumentFactory {
    type Client = Value;

    async fn connect(
        &self,
        _connection_string: &str,
        options: AutoEncryptionOptions,
    ) -> Result<Self::Client, Box<dyn std::error::Error + Send + Sync>> {
        Ok(options.to_document())
    }
}

const USERS: &str =
    r#"[{ "app.users": { "ssn": "string", "tags": "array", "profile": { "email": "string" } } }]"#;

#[tokio::test]
async fn test_end_to_end_with_file_vault() {
    let fx = fixture(USERS);
    let config = Config::load(&fx.config_path).unwrap();
    let vault = FileKeyVault::new(&fx.vault_dir).unwrap();
    let resolver = resolver(&config, &vault);

    let expander = SchemaExpander::new(resolver);
    let documents = cryptschema::schema::load_schema_file(&fx.schema_path).unwrap();
    let schema = expander.expand(&documents).await.unwrap();
    assert!(SchemaValidator::new().validate(&schema).unwrap());

    // one stored data key per leaf
    let conn = vault.connect(&config.key_vault_namespace).await.unwrap();
    for path in ["app.users.ssn", "app.users.tags", "app.users.profile.email"] {
        let record = conn.find_by_alt_name(path).await.unwrap().expect(path);
        assert_eq!(record.key_alt_names, vec![path.to_string()]);
    }
    drop(conn);
    assert_eq!(vault.open_connections(), 0);

    let Some(SchemaNode::Object(root)) = schema.get("app.users") else {
        panic!("collection root must be an object node");
    };
    let Some(SchemaNode::Encrypted(ssn)) = root.properties.as_ref().unwrap().get("ssn") else {
        panic!("ssn must be encrypted");
    };
    let conn = vault.connect(&config.key_vault_namespace).await.unwrap();
    let stored = conn.find_by_alt_name("app.users.ssn").await.unwrap().unwrap();
    assert_eq!(ssn.encrypt.key_id, Some(KeyId::Handles(vec![stored.id])));
}

#[tokio::test]
async fn test_stored_keys_unwrap_with_master_key() {
    let fx = fixture(USERS);
    let config = Config::load(&fx.config_path).unwrap();
    let vault = FileKeyVault::new(&fx.vault_dir).unwrap();
    resolver(&config, &vault).resolve("app.users.ssn").await.unwrap();

    let conn = vault.connect(&config.key_vault_namespace).await.unwrap();
    let record = conn.find_by_alt_name("app.users.ssn").await.unwrap().unwrap();
    let provider = LocalKeyProvider::new(&config.kms).unwrap();
    let dek = provider.unwrap_dek(&record.key_material).unwrap();
    assert_eq!(dek.expose_secret().len(), 96);
}

#[tokio::test]
async fn test_second_run_reuses_keys() {
    let fx = fixture(USERS);
    let config = Config::load(&fx.config_path).unwrap();

    let first = {
        let vault = FileKeyVault::new(&fx.vault_dir).unwrap();
        let pipeline = Pipeline::new(
            Config::load(&fx.config_path).unwrap(),
            resolver(&config, &vault),
            DocumentFactory,
        );
        pipeline.build_client(&fx.schema_path).await.unwrap()
    };
    let second = {
        let vault = FileKeyVault::new(&fx.vault_dir).unwrap();
        let pipeline = Pipeline::new(
            Config::load(&fx.config_path).unwrap(),
            resolver(&config, &vault),
            DocumentFactory,
        );
        pipeline.build_client(&fx.schema_path).await.unwrap()
    };

    assert_eq!(first["schemaMap"], second["schemaMap"]);
    assert_eq!(first["keyVaultNamespace"], json!("encryption.__keyVault"));
}

#[tokio::test]
async fn test_concurrent_first_resolution_converges() {
    let fx = fixture(USERS);
    let config = Config::load(&fx.config_path).unwrap();
    let vault = FileKeyVault::new(&fx.vault_dir).unwrap();
    let resolver = Arc::new(resolver(&config, &vault));

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let resolver = Arc::clone(&resolver);
            tokio::spawn(async move { resolver.resolve("app.users.ssn").await.unwrap() })
        })
        .collect();
    let mut handles: Vec<KeyHandle> = Vec::new();
    for task in tasks {
        handles.push(task.await.unwrap());
    }

    assert!(handles.windows(2).all(|w| w[0] == w[1]));
    let raw = std::fs::read_to_string(vault.namespace_file(&config.key_vault_namespace)).unwrap();
    let stored: Vec<Value> = serde_json::from_str(&raw).unwrap();
    assert_eq!(stored.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_resolvers_on_separate_vault_handles_converge() {
    let fx = fixture(USERS);
    let config = Config::load(&fx.config_path).unwrap();
    let resolvers: Vec<_> = (0..2)
        .map(|_| Arc::new(resolver(&config, &FileKeyVault::new(&fx.vault_dir).unwrap())))
        .collect();

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let resolver = Arc::clone(&resolvers[i % 2]);
            tokio::spawn(async move { resolver.resolve("app.users.ssn").await.unwrap() })
        })
        .collect();
    let mut handles: Vec<KeyHandle> = Vec::new();
    for task in tasks {
        handles.push(task.await.unwrap());
    }
    assert!(handles.windows(2).all(|w| w[0] == w[1]));

    let vault = FileKeyVault::new(&fx.vault_dir).unwrap();
    let conn = vault.connect(&config.key_vault_namespace).await.unwrap();
    let stored = conn.find_by_alt_name("app.users.ssn").await.unwrap().unwrap();
    assert_eq!(stored.id, handles[0]);
}

#[tokio::test]
async fn test_failed_resolution_leaves_no_record() {
    let fx = fixture(USERS);
    let config = Config::load(&fx.config_path).unwrap();
    let vault = FileKeyVault::new(&fx.vault_dir).unwrap();
    let resolver = resolver(&config, &vault);

    // an unreadable namespace file makes every lookup fail
    std::fs::write(vault.namespace_file(&config.key_vault_namespace), "not json").unwrap();
    let err = resolver.resolve("app.users.ssn").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Encryption);
    assert!(err.to_string().contains("app.users.ssn"));
    assert_eq!(vault.open_connections(), 0);

    std::fs::remove_file(vault.namespace_file(&config.key_vault_namespace)).unwrap();
    assert!(resolver.resolve("app.users.ssn").await.is_ok());
}

#[tokio::test]
async fn test_provider_mismatch_rejected() {
    let fx = fixture(USERS);
    let config = Config::load(&fx.config_path).unwrap();
    let aws = Config::from_toml_str(
        r#"
connection_string = "mongodb://localhost"
key_vault_namespace = "encryption.__keyVault"

[kms]
provider = "aws"
access_key_id = "AKIA"
secret_access_key = "secret"
region = "us-east-1"
key = "arn:aws:kms:us-east-1:123456789012:key/abcd"
"#,
    )
    .unwrap();

    let err = LocalKeyProvider::new(&aws.kms).err().unwrap();
    assert!(matches!(err, KeyProviderError::ProviderMismatch { .. }));

    let vault = FileKeyVault::new(&fx.vault_dir).unwrap();
    let err = KeyResolver::new(
        Arc::new(vault),
        aws.key_vault_namespace.clone(),
        &aws.kms,
        Arc::new(LocalKeyProvider::new(&config.kms).unwrap()),
    )
    .err()
    .unwrap();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[tokio::test]
async fn test_missing_schema_file() {
    let fx = fixture(USERS);
    let config = Config::load(&fx.config_path).unwrap();
    let vault = FileKeyVault::new(&fx.vault_dir).unwrap();
    let pipeline = Pipeline::new(
        Config::load(&fx.config_path).unwrap(),
        resolver(&config, &vault),
        DocumentFactory,
    );

    let err = pipeline.build_client(Path::new("/nonexistent/schema.json")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(err.to_string().contains("/nonexistent/schema.json"));
}
