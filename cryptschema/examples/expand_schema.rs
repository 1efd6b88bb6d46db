//! Expands a simplified schema with an in-memory key vault and the local KMS.

use cryptschema::prelude::*;
use cryptschema_key_file::LocalKeyProvider;
use std::sync::Arc;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("CryptSchema Expansion Example");
    println!("=============================\n");

    let config = Config::from_toml_str(&format!(
        r#"
connection_string = "mongodb://localhost:27017"
key_vault_namespace = "encryption.__keyVault"

[kms]
provider = "local"
key = "{}"
"#,
        "QUJD".repeat(32)
    ))?;
    println!("✓ Configuration loaded (KMS provider: {})\n", config.kms.kind());

    let vault = MemoryKeyVault::new();
    let resolver = KeyResolver::new(
        Arc::new(vault.clone()),
        config.key_vault_namespace.clone(),
        &config.kms,
        Arc::new(LocalKeyProvider::new(&config.kms)?),
    )?;

    let simplified = serde_json::json!([
        { "app.users": { "ssn": "string", "tags": "array", "profile": { "email": "string" } } }
    ]);
    println!("Simplified schema:\n{}\n", serde_json::to_string_pretty(&simplified)?);

    let expander = SchemaExpander::new(resolver);
    let schema = expander.expand_value(&simplified).await?;
    SchemaValidator::new().validate(&schema)?;
    println!("✓ Expanded and validated\n");

    println!("Verbose schema:\n{}\n", serde_json::to_string_pretty(&schema)?);
    println!(
        "✓ {} data keys stored in {}",
        vault.records(&config.key_vault_namespace).len(),
        config.key_vault_namespace
    );

    Ok(())
}
