//! Validation of verbose encryption schemas.
//!
//! Errors carry a dotted path starting at a root label (`root` by default),
//! extended by the collection name, then by each field name. Pattern
//! properties extend the path with `{pattern}`:
//!
//! ```text
//! root.app.users.profile.email
//! root.app.users.{^tmp_}
//! ```
//!
//! Validation either succeeds with `true` or fails with an error; it never
//! reports `false`.

use crate::bson_type::{Algorithm, DETERMINISTIC_TYPES};
use crate::error::{Error, Result};
use crate::key_handle::KeyHandle;
use crate::schema::verbose::{
    EncryptMetadata, EncryptSpec, EncryptedField, KeyId, NodeMetadata, ObjectSchema, PlainField,
    Properties, SchemaNode, VerboseCollectionSchema,
};
use serde_json::{Map, Value};

/// Keys permitted on a schema node.
pub const ALLOWED_NODE_KEYS: [&str; 8] = [
    "bsonType",
    "properties",
    "patternProperties",
    "encrypt",
    "encryptMetadata",
    "description",
    "title",
    "required",
];

const ALLOWED_ENCRYPT_KEYS: [&str; 3] = ["bsonType", "algorithm", "keyId"];
/// Node keys that an encrypted field may not carry next to `encrypt`.
const ENCRYPT_EXCLUSIVE_KEYS: [&str; 4] =
    ["bsonType", "properties", "patternProperties", "encryptMetadata"];
const ALLOWED_ENCRYPT_METADATA_KEYS: [&str; 2] = ["algorithm", "keyId"];

const DEFAULT_ROOT_LABEL: &str = "root";

/// Validates verbose schemas.
#[derive(Debug, Clone)]
pub struct SchemaValidator {
    root_label: String,
}

impl Default for SchemaValidator {
    fn default() -> Self {
        Self { root_label: DEFAULT_ROOT_LABEL.to_string() }
    }
}

impl SchemaValidator {
    /// Creates a validator whose error paths start at `root`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the label error paths start from.
    #[must_use]
    pub fn with_root_label(mut self, label: impl Into<String>) -> Self {
        self.root_label = label.into();
        self
    }

    /// Validates a typed schema.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidSchema` for a structural violation and
    /// `Error::IncompatibleAlgorithm` for deterministic encryption of a type
    /// outside [`DETERMINISTIC_TYPES`].
    pub fn validate(&self, schema: &VerboseCollectionSchema) -> Result<bool> {
        if schema.is_empty() {
            return Err(Error::invalid_schema(
                &self.root_label,
                "schema must define at least one collection",
            ));
        }
        for (collection, root) in schema.iter() {
            check_node(root, &format!("{}.{collection}", self.root_label))?;
        }
        Ok(true)
    }

    /// Validates a hand-authored schema map given as JSON.
    ///
    /// # Errors
    ///
    /// See [`SchemaValidator::parse`] and [`SchemaValidator::validate`].
    pub fn validate_json(&self, value: &Value) -> Result<bool> {
        let schema = self.parse(value)?;
        self.validate(&schema)
    }

    /// Parses a hand-authored schema map, enforcing node structure.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidSchema` naming the path of the first node that
    /// is not an object definition, carries an unknown key, or misuses
    /// `properties`, `patternProperties`, `encrypt` or `encryptMetadata`.
    pub fn parse(&self, value: &Value) -> Result<VerboseCollectionSchema> {
        let collections = value
            .as_object()
            .ok_or_else(|| Error::invalid_schema(&self.root_label, "must be an object definition"))?;
        if collections.is_empty() {
            return Err(Error::invalid_schema(
                &self.root_label,
                "schema must define at least one collection",
            ));
        }

        let mut schema = VerboseCollectionSchema::new();
        for (collection, root) in collections {
            schema.insert(
                collection.clone(),
                parse_node(root, &format!("{}.{collection}", self.root_label))?,
            );
        }
        Ok(schema)
    }
}

/// Validates a typed schema with the default `root` label.
///
/// # Errors
///
/// See [`SchemaValidator::validate`].
pub fn validate(schema: &VerboseCollectionSchema) -> Result<bool> {
    SchemaValidator::new().validate(schema)
}

fn pattern_path(path: &str, pattern: &str) -> String {
    format!("{path}.{{{pattern}}}")
}

fn check_node(node: &SchemaNode, path: &str) -> Result<()> {
    match node {
        SchemaNode::Encrypted(field) => check_encrypt(&field.encrypt, path),
        SchemaNode::Object(object) => {
            if let Some(properties) = &object.properties {
                if properties.is_empty() {
                    return Err(Error::invalid_schema(path, "properties must not be empty"));
                }
                for (name, child) in properties.iter() {
                    check_node(child, &format!("{path}.{name}"))?;
                }
            }
            if let Some(patterns) = &object.pattern_properties {
                for (pattern, child) in patterns.iter() {
                    check_node(child, &pattern_path(path, pattern))?;
                }
            }
            if let Some(KeyId::Handles(handles)) =
                object.encrypt_metadata.as_ref().and_then(|m| m.key_id.as_ref())
            {
                if handles.is_empty() {
                    return Err(Error::invalid_schema(path, "encryptMetadata.keyId must not be empty"));
                }
            }
            Ok(())
        }
        SchemaNode::Plain(_) => Ok(()),
    }
}

fn check_encrypt(encrypt: &EncryptSpec, path: &str) -> Result<()> {
    if encrypt.bson_type.is_empty() {
        return Err(Error::invalid_schema(path, "encrypted field is missing encrypt.bsonType"));
    }
    if !encrypt.algorithm.supports(&encrypt.bson_type) {
        return Err(Error::IncompatibleAlgorithm {
            path: path.to_string(),
            bson_type: encrypt.bson_type.clone(),
            allowed: DETERMINISTIC_TYPES.join(", "),
        });
    }
    if let Some(KeyId::Handles(handles)) = &encrypt.key_id {
        if handles.is_empty() {
            return Err(Error::invalid_schema(path, "encrypt.keyId must not be empty"));
        }
    }
    Ok(())
}

fn as_definition<'v>(value: &'v Value, path: &str) -> Result<&'v Map<String, Value>> {
    value.as_object().ok_or_else(|| Error::invalid_schema(path, "must be an object definition"))
}

fn check_keys(map: &Map<String, Value>, allowed: &[&str], path: &str, what: &str) -> Result<()> {
    match map.keys().find(|k| !allowed.contains(&k.as_str())) {
        Some(key) => Err(Error::invalid_schema(
            path,
            format!("unknown {what} key \"{key}\" (allowed: {})", allowed.join(", ")),
        )),
        None => Ok(()),
    }
}

fn optional_string(map: &Map<String, Value>, key: &str, path: &str) -> Result<Option<String>> {
    match map.get(key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(Error::invalid_schema(path, format!("{key} must be a string"))),
    }
}

fn parse_node(value: &Value, path: &str) -> Result<SchemaNode> {
    let node = as_definition(value, path)?;
    check_keys(node, &ALLOWED_NODE_KEYS, path, "schema")?;

    if let Some(encrypt) = node.get("encrypt") {
        if let Some(key) = ENCRYPT_EXCLUSIVE_KEYS.iter().find(|key| node.contains_key(**key)) {
            return Err(Error::invalid_schema(
                path,
                format!("a node cannot declare both encrypt and {key}"),
            ));
        }
        return Ok(SchemaNode::Encrypted(EncryptedField {
            encrypt: parse_encrypt(encrypt, path)?,
            metadata: parse_metadata(node, path)?,
        }));
    }

    let bson_type = optional_string(node, "bsonType", path)?;
    let metadata = parse_metadata(node, path)?;
    let is_object = bson_type.as_deref() == Some("object");

    if node.contains_key("properties") && !is_object {
        return Err(Error::invalid_schema(
            path,
            format!(
                "properties require bsonType \"object\", found {}",
                bson_type.as_deref().map_or_else(|| "none".to_string(), |t| format!("\"{t}\""))
            ),
        ));
    }
    if node.contains_key("patternProperties") && !is_object {
        return Err(Error::invalid_schema(path, "patternProperties require bsonType \"object\""));
    }
    if node.contains_key("encryptMetadata") && !is_object {
        return Err(Error::invalid_schema(path, "encryptMetadata requires bsonType \"object\""));
    }

    if is_object {
        let properties = match node.get("properties") {
            Some(value) => {
                let map = value
                    .as_object()
                    .ok_or_else(|| Error::invalid_schema(path, "properties must be an object"))?;
                if map.is_empty() {
                    return Err(Error::invalid_schema(path, "properties must not be empty"));
                }
                Some(parse_children(map, |name| format!("{path}.{name}"))?)
            }
            None => None,
        };
        let pattern_properties = match node.get("patternProperties") {
            Some(value) => {
                let map = value.as_object().ok_or_else(|| {
                    Error::invalid_schema(path, "patternProperties must be an object")
                })?;
                Some(parse_children(map, |pattern| pattern_path(path, pattern))?)
            }
            None => None,
        };
        let encrypt_metadata = node
            .get("encryptMetadata")
            .map(|value| parse_encrypt_metadata(value, path))
            .transpose()?;
        return Ok(SchemaNode::Object(ObjectSchema {
            properties,
            pattern_properties,
            encrypt_metadata,
            metadata,
        }));
    }

    Ok(SchemaNode::Plain(PlainField { bson_type, metadata }))
}

fn parse_children(
    map: &Map<String, Value>,
    child_path: impl Fn(&str) -> String,
) -> Result<Properties> {
    map.iter()
        .map(|(name, child)| Ok((name.clone(), parse_node(child, &child_path(name))?)))
        .collect()
}

fn parse_metadata(node: &Map<String, Value>, path: &str) -> Result<NodeMetadata> {
    let required = match node.get("required") {
        None => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| Error::invalid_schema(path, "required must list field names"))
            })
            .collect::<Result<_>>()?,
        Some(_) => return Err(Error::invalid_schema(path, "required must be an array")),
    };
    Ok(NodeMetadata {
        description: optional_string(node, "description", path)?,
        title: optional_string(node, "title", path)?,
        required,
    })
}

fn parse_encrypt(value: &Value, path: &str) -> Result<EncryptSpec> {
    let encrypt = value
        .as_object()
        .ok_or_else(|| Error::invalid_schema(path, "encrypt must be an object definition"))?;
    check_keys(encrypt, &ALLOWED_ENCRYPT_KEYS, path, "encrypt")?;

    let bson_type = match encrypt.get("bsonType") {
        None => {
            return Err(Error::invalid_schema(path, "encrypted field is missing encrypt.bsonType"))
        }
        Some(Value::String(t)) => t.clone(),
        Some(_) => return Err(Error::invalid_schema(path, "encrypt.bsonType must be a string")),
    };
    let algorithm = match encrypt.get("algorithm") {
        None => {
            return Err(Error::invalid_schema(path, "encrypted field is missing encrypt.algorithm"))
        }
        Some(value) => parse_algorithm(value, path)?,
    };
    let key_id = encrypt.get("keyId").map(|value| parse_key_id(value, path)).transpose()?;

    Ok(EncryptSpec { bson_type, algorithm, key_id })
}

fn parse_encrypt_metadata(value: &Value, path: &str) -> Result<EncryptMetadata> {
    let meta = value
        .as_object()
        .ok_or_else(|| Error::invalid_schema(path, "encryptMetadata must be an object definition"))?;
    check_keys(meta, &ALLOWED_ENCRYPT_METADATA_KEYS, path, "encryptMetadata")?;
    Ok(EncryptMetadata {
        algorithm: meta.get("algorithm").map(|value| parse_algorithm(value, path)).transpose()?,
        key_id: meta.get("keyId").map(|value| parse_key_id(value, path)).transpose()?,
    })
}

fn parse_algorithm(value: &Value, path: &str) -> Result<Algorithm> {
    let name = value
        .as_str()
        .ok_or_else(|| Error::invalid_schema(path, "encrypt.algorithm must be a string"))?;
    name.parse::<Algorithm>().map_err(|found| {
        Error::invalid_schema(path, format!("unsupported encryption algorithm \"{found}\""))
    })
}

fn parse_key_id(value: &Value, path: &str) -> Result<KeyId> {
    match value {
        Value::String(pointer) if pointer.starts_with('/') => Ok(KeyId::Pointer(pointer.clone())),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                serde_json::from_value::<KeyHandle>(item.clone())
                    .map_err(|e| Error::invalid_schema(path, format!("invalid keyId entry: {e}")))
            })
            .collect::<Result<Vec<_>>>()
            .map(KeyId::Handles),
        _ => Err(Error::invalid_schema(
            path,
            "keyId must be an array of key ids or a JSON pointer string",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    const DETERMINISTIC: &str = "AEAD_AES_256_CBC_HMAC_SHA_512-Deterministic";
    const RANDOM: &str = "AEAD_AES_256_CBC_HMAC_SHA_512-Random";

    fn key_id() -> Value {
        json!([{ "$binary": { "base64": "AAAAAAAAAAAAAAAAAAAAAA==", "subType": "04" } }])
    }

    fn field(bson_type: &str, algorithm: &str) -> Value {
        json!({ "app.users": {
            "bsonType": "object",
            "properties": {
                "f": { "encrypt": { "bsonType": bson_type, "algorithm": algorithm, "keyId": key_id() } }
            }
        }})
    }

    fn reason(err: &Error) -> (&str, String) {
        match err {
            Error::InvalidSchema { path, reason } => (path.as_str(), reason.clone()),
            other => panic!("expected InvalidSchema, got {other:?}"),
        }
    }

    #[test]
    fn test_valid_schema_returns_true() {
        let validator = SchemaValidator::new();
        assert!(validator.validate_json(&field("string", DETERMINISTIC)).unwrap());
        assert!(validator.validate_json(&field("double", RANDOM)).unwrap());
    }

    #[test]
    fn test_empty_top_level_rejected() {
        let err = SchemaValidator::new().validate_json(&json!({})).unwrap_err();
        assert_eq!(reason(&err).0, "root");

        let err = validate(&VerboseCollectionSchema::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_deterministic_incompatible_type_names_type_and_path() {
        let err = SchemaValidator::new().validate_json(&field("double", DETERMINISTIC)).unwrap_err();
        match &err {
            Error::IncompatibleAlgorithm { path, bson_type, allowed } => {
                assert_eq!(path, "root.app.users.f");
                assert_eq!(bson_type, "double");
                assert_eq!(allowed, "string, int32, int64, date, objectId, uuid");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(err.to_string().contains("double"));
    }

    #[test]
    fn test_deterministic_uuid_accepted() {
        assert!(SchemaValidator::new().validate_json(&field("uuid", DETERMINISTIC)).unwrap());
    }

    #[test]
    fn test_node_must_be_object_definition() {
        let err = SchemaValidator::new()
            .validate_json(&json!({ "app.users": { "bsonType": "object", "properties": { "f": "string" } } }))
            .unwrap_err();
        let (path, why) = reason(&err);
        assert_eq!(path, "root.app.users.f");
        assert_eq!(why, "must be an object definition");

        let err = SchemaValidator::new().validate_json(&json!({ "app.users": null })).unwrap_err();
        assert_eq!(reason(&err).0, "root.app.users");
    }

    #[test]
    fn test_properties_require_object_type() {
        let err = SchemaValidator::new()
            .validate_json(&json!({ "app.users": { "bsonType": "array", "properties": { "a": {} } } }))
            .unwrap_err();
        assert!(reason(&err).1.contains("bsonType \"object\""));

        let err = SchemaValidator::new()
            .validate_json(&json!({ "app.users": { "properties": { "a": {} } } }))
            .unwrap_err();
        assert!(reason(&err).1.contains("found none"));
    }

    #[test]
    fn test_empty_properties_rejected() {
        let err = SchemaValidator::new()
            .validate_json(&json!({ "app.users": { "bsonType": "object", "properties": {} } }))
            .unwrap_err();
        assert_eq!(reason(&err).1, "properties must not be empty");

        let mut schema = VerboseCollectionSchema::new();
        schema.insert("app.users", SchemaNode::Object(ObjectSchema::with_properties(Properties::new())));
        assert!(validate(&schema).is_err());
    }

    #[test]
    fn test_missing_encrypt_fields_have_distinct_messages() {
        let missing_type = json!({ "app.users": { "bsonType": "object", "properties": {
            "ssn": { "encrypt": { "algorithm": RANDOM } }
        }}});
        let err = SchemaValidator::new().validate_json(&missing_type).unwrap_err();
        let (path, why) = reason(&err);
        assert_eq!(path, "root.app.users.ssn");
        assert_eq!(why, "encrypted field is missing encrypt.bsonType");

        let missing_algorithm = json!({ "app.users": { "bsonType": "object", "properties": {
            "ssn": { "encrypt": { "bsonType": "string" } }
        }}});
        let err = SchemaValidator::new().validate_json(&missing_algorithm).unwrap_err();
        assert_eq!(reason(&err).1, "encrypted field is missing encrypt.algorithm");

        let not_object = json!({ "app.users": { "bsonType": "object", "properties": {
            "ssn": { "encrypt": "string" }
        }}});
        let err = SchemaValidator::new().validate_json(&not_object).unwrap_err();
        assert_eq!(reason(&err).1, "encrypt must be an object definition");
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = SchemaValidator::new()
            .validate_json(&json!({ "app.users": {
                "bsonType": "object",
                "properties": { "ssn": { "bsonType": "string", "minLength": 9 } }
            }}))
            .unwrap_err();
        let (path, why) = reason(&err);
        assert_eq!(path, "root.app.users.ssn");
        assert!(why.contains("\"minLength\""));
    }

    #[test]
    fn test_metadata_keys_permitted() {
        let schema = json!({ "app.users": {
            "bsonType": "object",
            "title": "users",
            "description": "user records",
            "required": ["ssn"],
            "encryptMetadata": { "keyId": key_id() },
            "properties": {
                "ssn": {
                    "description": "social security number",
                    "encrypt": { "bsonType": "string", "algorithm": DETERMINISTIC }
                },
                "name": { "bsonType": "string" }
            }
        }});
        assert!(SchemaValidator::new().validate_json(&schema).unwrap());
    }

    #[test]
    fn test_pattern_properties_path_and_type() {
        let schema = json!({ "app.users": {
            "bsonType": "object",
            "patternProperties": {
                "^secret_": { "encrypt": { "bsonType": "bool", "algorithm": DETERMINISTIC } }
            }
        }});
        let err = SchemaValidator::new().validate_json(&schema).unwrap_err();
        assert!(matches!(&err, Error::IncompatibleAlgorithm { path, .. } if path == "root.app.users.{^secret_}"));

        let err = SchemaValidator::new()
            .validate_json(&json!({ "app.users": { "patternProperties": { "^x": {} } } }))
            .unwrap_err();
        assert!(reason(&err).1.contains("patternProperties"));
    }

    #[test]
    fn test_custom_root_label() {
        let err = SchemaValidator::new()
            .with_root_label("schemaMap")
            .validate_json(&field("array", DETERMINISTIC))
            .unwrap_err();
        assert!(err.to_string().contains("schemaMap.app.users.f"));
    }

    #[test]
    fn test_key_id_forms() {
        let pointer = json!({ "app.users": { "bsonType": "object", "properties": {
            "ssn": { "encrypt": { "bsonType": "string", "algorithm": RANDOM, "keyId": "/keyName" } }
        }}});
        assert!(SchemaValidator::new().validate_json(&pointer).unwrap());

        let bad = json!({ "app.users": { "bsonType": "object", "properties": {
            "ssn": { "encrypt": { "bsonType": "string", "algorithm": RANDOM, "keyId": "keyName" } }
        }}});
        assert!(SchemaValidator::new().validate_json(&bad).is_err());

        let empty = json!({ "app.users": { "bsonType": "object", "properties": {
            "ssn": { "encrypt": { "bsonType": "string", "algorithm": RANDOM, "keyId": [] } }
        }}});
        assert!(SchemaValidator::new().validate_json(&empty).is_err());
    }

    #[test]
    fn test_encrypt_and_properties_conflict() {
        let schema = json!({ "app.users": {
            "bsonType": "object",
            "encrypt": { "bsonType": "object", "algorithm": RANDOM },
            "properties": { "a": {} }
        }});
        assert!(SchemaValidator::new().validate_json(&schema).is_err());
    }

    #[test]
    fn test_encrypt_excludes_structural_keys() {
        let schema = json!({ "app.users": {
            "bsonType": "object",
            "encrypt": { "bsonType": "object", "algorithm": RANDOM },
            "patternProperties": { "^x": 5 },
            "encryptMetadata": { "keyId": [] }
        }});
        let err = SchemaValidator::new().validate_json(&schema).unwrap_err();
        let (path, why) = reason(&err);
        assert_eq!(path, "root.app.users");
        assert!(why.contains("encrypt and bsonType"));

        for key in ["patternProperties", "encryptMetadata"] {
            let mut node = json!({ "encrypt": { "bsonType": "string", "algorithm": RANDOM } });
            node[key] = json!({});
            let schema = json!({ "app.users": { "bsonType": "object", "properties": { "f": node } } });
            let err = SchemaValidator::new().validate_json(&schema).unwrap_err();
            let (path, why) = reason(&err);
            assert_eq!(path, "root.app.users.f");
            assert!(why.contains(key));
        }
    }

    #[test]
    fn test_unknown_algorithm_rejected() {
        let err = SchemaValidator::new().validate_json(&field("string", "AES-GCM")).unwrap_err();
        assert!(reason(&err).1.contains("AES-GCM"));
    }

    #[test]
    fn test_parse_round_trips_through_json() {
        let input = field("string", DETERMINISTIC);
        let schema = SchemaValidator::new().parse(&input).unwrap();
        assert_eq!(schema.to_json(), input);
    }
}
