//! Verbose encryption schema, as consumed by the native auto-encryption engine.
//!
//! Nodes are an explicit sum type decided when the tree is built, not
//! inferred later from which keys happen to be present.

use crate::bson_type::Algorithm;
use crate::key_handle::KeyHandle;
use serde::{Serialize, Serializer};
use serde_json::{json, Map, Value};

/// Ordered mapping from field name to node, in declaration order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Properties(Vec<(String, SchemaNode)>);

impl Properties {
    /// Creates an empty mapping.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Adds or replaces `name`.
    pub fn insert(&mut self, name: impl Into<String>, node: SchemaNode) {
        let name = name.into();
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = node,
            None => self.0.push((name, node)),
        }
    }

    /// Node declared for `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&SchemaNode> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, node)| node)
    }

    /// Iterates in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SchemaNode)> {
        self.0.iter().map(|(n, node)| (n.as_str(), node))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn to_json(&self) -> Value {
        Value::Object(self.0.iter().map(|(n, node)| (n.clone(), node.to_json())).collect())
    }
}

impl FromIterator<(String, SchemaNode)> for Properties {
    fn from_iter<I: IntoIterator<Item = (String, SchemaNode)>>(iter: I) -> Self {
        let mut properties = Self::new();
        for (name, node) in iter {
            properties.insert(name, node);
        }
        properties
    }
}

/// Optional annotations allowed on any node.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodeMetadata {
    pub description: Option<String>,
    pub title: Option<String>,
    /// Names of required fields; empty when absent.
    pub required: Vec<String>,
}

impl NodeMetadata {
    fn write_into(&self, doc: &mut Map<String, Value>) {
        if let Some(description) = &self.description {
            doc.insert("description".into(), json!(description));
        }
        if let Some(title) = &self.title {
            doc.insert("title".into(), json!(title));
        }
        if !self.required.is_empty() {
            doc.insert("required".into(), json!(self.required));
        }
    }
}

/// Where the engine finds the data key for a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyId {
    /// Explicit key handles.
    Handles(Vec<KeyHandle>),
    /// JSON pointer to a document field holding a key alternate name.
    Pointer(String),
}

impl KeyId {
    fn to_json(&self) -> Value {
        match self {
            Self::Handles(handles) => json!(handles),
            Self::Pointer(pointer) => json!(pointer),
        }
    }
}

/// The `encrypt` sub-document of an encrypted field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptSpec {
    pub bson_type: String,
    pub algorithm: Algorithm,
    pub key_id: Option<KeyId>,
}

/// Leaf whose value is encrypted by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedField {
    pub encrypt: EncryptSpec,
    pub metadata: NodeMetadata,
}

impl EncryptedField {
    /// Creates an encrypted field bound to a single data key.
    #[must_use]
    pub fn new(bson_type: impl Into<String>, algorithm: Algorithm, key: KeyHandle) -> Self {
        Self {
            encrypt: EncryptSpec {
                bson_type: bson_type.into(),
                algorithm,
                key_id: Some(KeyId::Handles(vec![key])),
            },
            metadata: NodeMetadata::default(),
        }
    }
}

/// Defaults inherited by encrypted fields below an object.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EncryptMetadata {
    pub algorithm: Option<Algorithm>,
    pub key_id: Option<KeyId>,
}

/// Internal node with `bsonType: "object"`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObjectSchema {
    /// `None` when the node declares no `properties` at all.
    pub properties: Option<Properties>,
    /// Keyed by pattern; `None` when absent.
    pub pattern_properties: Option<Properties>,
    pub encrypt_metadata: Option<EncryptMetadata>,
    pub metadata: NodeMetadata,
}

impl ObjectSchema {
    /// Creates an object node with the given properties.
    #[must_use]
    pub fn with_properties(properties: Properties) -> Self {
        Self { properties: Some(properties), ..Self::default() }
    }
}

/// Unencrypted leaf, only found in hand-authored schemas.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PlainField {
    pub bson_type: Option<String>,
    pub metadata: NodeMetadata,
}

/// A node of the verbose schema tree.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaNode {
    Encrypted(EncryptedField),
    Object(ObjectSchema),
    Plain(PlainField),
}

impl SchemaNode {
    /// Renders the node in the engine's JSON schema dialect.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut doc = Map::new();
        match self {
            Self::Encrypted(field) => {
                let mut encrypt = Map::new();
                encrypt.insert("bsonType".into(), json!(field.encrypt.bson_type));
                encrypt.insert("algorithm".into(), json!(field.encrypt.algorithm));
                if let Some(key_id) = &field.encrypt.key_id {
                    encrypt.insert("keyId".into(), key_id.to_json());
                }
                doc.insert("encrypt".into(), Value::Object(encrypt));
                field.metadata.write_into(&mut doc);
            }
            Self::Object(object) => {
                doc.insert("bsonType".into(), json!("object"));
                if let Some(meta) = &object.encrypt_metadata {
                    let mut encrypt_metadata = Map::new();
                    if let Some(algorithm) = meta.algorithm {
                        encrypt_metadata.insert("algorithm".into(), json!(algorithm));
                    }
                    if let Some(key_id) = &meta.key_id {
                        encrypt_metadata.insert("keyId".into(), key_id.to_json());
                    }
                    doc.insert("encryptMetadata".into(), Value::Object(encrypt_metadata));
                }
                if let Some(properties) = &object.properties {
                    doc.insert("properties".into(), properties.to_json());
                }
                if let Some(patterns) = &object.pattern_properties {
                    doc.insert("patternProperties".into(), patterns.to_json());
                }
                object.metadata.write_into(&mut doc);
            }
            Self::Plain(plain) => {
                if let Some(bson_type) = &plain.bson_type {
                    doc.insert("bsonType".into(), json!(bson_type));
                }
                plain.metadata.write_into(&mut doc);
            }
        }
        Value::Object(doc)
    }
}

/// Schema map: collection name to the root node of that collection.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VerboseCollectionSchema {
    collections: Properties,
}

impl VerboseCollectionSchema {
    /// Creates an empty schema map.
    #[must_use]
    pub const fn new() -> Self {
        Self { collections: Properties::new() }
    }

    /// Adds or replaces the root node of `collection`.
    pub fn insert(&mut self, collection: impl Into<String>, root: SchemaNode) {
        self.collections.insert(collection, root);
    }

    /// Root node of `collection`.
    #[must_use]
    pub fn get(&self, collection: &str) -> Option<&SchemaNode> {
        self.collections.get(collection)
    }

    /// Iterates collections in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SchemaNode)> {
        self.collections.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.collections.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }

    /// Renders the schema map handed to the encrypted client.
    #[must_use]
    pub fn to_json(&self) -> Value {
        self.collections.to_json()
    }
}

impl Serialize for VerboseCollectionSchema {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}
