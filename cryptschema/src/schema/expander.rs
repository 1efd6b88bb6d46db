//! Expansion of the simplified schema into the verbose encryption schema.
//!
//! Each leaf gets its own data key, looked up by the leaf's field path
//! (`database.collection.field[.sub...]`), and an algorithm chosen from its
//! type. Sub-objects become `bsonType: "object"` nodes.

use crate::bson_type::BsonType;
use crate::error::{Error, Result};
use crate::resolver::ResolveKey;
use crate::schema::simplified::{parse_documents, CollectionSchemaDocument, FieldSpec};
use crate::schema::verbose::{
    EncryptedField, ObjectSchema, Properties, SchemaNode, VerboseCollectionSchema,
};
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use tracing::debug;

/// Builds verbose schemas, resolving one data key per leaf field.
///
/// Fields are processed sequentially in declaration order; the first failure
/// aborts the whole expansion and no partial schema is returned.
pub struct SchemaExpander<R> {
    resolver: R,
}

impl<R: ResolveKey> SchemaExpander<R> {
    /// Creates an expander that resolves keys through `resolver`.
    pub const fn new(resolver: R) -> Self {
        Self { resolver }
    }

    /// Returns the underlying resolver.
    pub const fn resolver(&self) -> &R {
        &self.resolver
    }

    /// Parses a raw simplified schema and expands it.
    ///
    /// The input is fully checked before the first key is resolved.
    ///
    /// # Errors
    ///
    /// See [`parse_documents`] and [`SchemaExpander::expand`].
    pub async fn expand_value(&self, input: &Value) -> Result<VerboseCollectionSchema> {
        let documents = parse_documents(input)?;
        self.expand(&documents).await
    }

    /// Expands parsed collection schemas.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` if a collection appears twice, checked
    /// before any key is resolved, and `Error::SchemaGeneration` wrapping the
    /// resolver failure, tagged with the field path, if a data key cannot be
    /// obtained.
    pub async fn expand(
        &self,
        documents: &[CollectionSchemaDocument],
    ) -> Result<VerboseCollectionSchema> {
        for (index, document) in documents.iter().enumerate() {
            if documents[..index].iter().any(|d| d.collection == document.collection) {
                return Err(Error::invalid_input(
                    format!("[{index}]"),
                    format!("collection \"{}\" is declared more than once", document.collection),
                ));
            }
        }

        let mut schema = VerboseCollectionSchema::new();
        for document in documents {
            let properties = self.expand_fields(&document.collection, &document.fields).await?;
            schema.insert(
                document.collection.clone(),
                SchemaNode::Object(ObjectSchema::with_properties(properties)),
            );
        }
        Ok(schema)
    }

    fn expand_fields<'a>(
        &'a self,
        path: &'a str,
        fields: &'a [(String, FieldSpec)],
    ) -> BoxFuture<'a, Result<Properties>> {
        async move {
            let mut properties = Properties::new();
            for (name, spec) in fields {
                let field_path = format!("{path}.{name}");
                let node = match spec {
                    FieldSpec::Object(nested) => SchemaNode::Object(ObjectSchema::with_properties(
                        self.expand_fields(&field_path, nested).await?,
                    )),
                    FieldSpec::Type(bson_type) => self.expand_leaf(&field_path, *bson_type).await?,
                };
                properties.insert(name.clone(), node);
            }
            Ok(properties)
        }
        .boxed()
    }

    async fn expand_leaf(&self, field_path: &str, bson_type: BsonType) -> Result<SchemaNode> {
        let key = self.resolver.resolve(field_path).await.map_err(|source| {
            Error::SchemaGeneration { field_path: field_path.to_string(), source: Box::new(source) }
        })?;

        let algorithm = bson_type.default_algorithm();
        debug!(field_path, bson_type = %bson_type, algorithm = %algorithm, key_id = %key, "expanded field");
        Ok(SchemaNode::Encrypted(EncryptedField::new(bson_type.as_str(), algorithm, key)))
    }
}
