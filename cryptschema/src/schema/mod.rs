//! Encryption schemas: the simplified input, the verbose tree consumed by the
//! auto-encryption engine, expansion from one to the other, and validation.

pub mod expander;
pub mod simplified;
pub mod validator;
pub mod verbose;

pub use expander::SchemaExpander;
pub use simplified::{load_schema_file, parse_documents, CollectionSchemaDocument, FieldSpec};
pub use validator::SchemaValidator;
pub use verbose::{
    EncryptMetadata, EncryptSpec, EncryptedField, KeyId, NodeMetadata, ObjectSchema, PlainField,
    Properties, SchemaNode, VerboseCollectionSchema,
};
