//! Simplified per-field schema input.
//!
//! The input is an ordered array of single-key objects. Each key is a
//! `database.collection` name and each value maps field names either to a
//! type tag or to a nested mapping:
//!
//! ```json
//! [
//!   { "app.users": { "ssn": "string", "profile": { "email": "string" } } }
//! ]
//! ```

use crate::bson_type::BsonType;
use crate::error::{Error, Result};
use serde_json::{Map, Value};
use std::path::Path;

/// A field in the simplified schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSpec {
    /// A normalized type tag.
    Type(BsonType),
    /// A sub-object with its own fields, in declaration order.
    Object(Vec<(String, FieldSpec)>),
}

/// The simplified schema of one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSchemaDocument {
    /// Fully-qualified `database.collection`
    pub collection: String,
    /// Top-level fields, in declaration order
    pub fields: Vec<(String, FieldSpec)>,
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Parses the simplified schema document array.
///
/// The whole input is checked before anything else happens, type tags
/// included, so a malformed element is reported before any key is resolved.
///
/// # Errors
///
/// Returns `Error::InvalidInput` naming the offending index or field path if
/// the top level is not an array, an element does not name exactly one
/// collection, or a field value is neither a type tag nor a mapping.
/// Returns `Error::UnknownType` for an unsupported type tag.
pub fn parse_documents(value: &Value) -> Result<Vec<CollectionSchemaDocument>> {
    let elements = value.as_array().ok_or_else(|| {
        Error::invalid_input(
            "root",
            format!("expected an array of collection schemas, found {}", json_type_name(value)),
        )
    })?;

    let mut documents: Vec<CollectionSchemaDocument> = Vec::with_capacity(elements.len());
    for (index, element) in elements.iter().enumerate() {
        let location = format!("[{index}]");
        let entry = element.as_object().ok_or_else(|| {
            Error::invalid_input(
                &location,
                format!("expected an object, found {}", json_type_name(element)),
            )
        })?;
        if entry.len() != 1 {
            return Err(Error::invalid_input(
                &location,
                format!("must name exactly one collection, found {} keys", entry.len()),
            ));
        }
        let Some((collection, fields)) = entry.iter().next() else {
            continue;
        };

        check_collection_name(&location, collection)?;
        if documents.iter().any(|d| &d.collection == collection) {
            return Err(Error::invalid_input(
                &location,
                format!("collection \"{collection}\" is declared more than once"),
            ));
        }

        let fields = fields.as_object().ok_or_else(|| {
            Error::invalid_input(
                collection,
                format!("expected a field mapping, found {}", json_type_name(fields)),
            )
        })?;
        documents.push(CollectionSchemaDocument {
            collection: collection.clone(),
            fields: parse_fields(collection, fields)?,
        });
    }
    Ok(documents)
}

fn check_collection_name(location: &str, name: &str) -> Result<()> {
    match name.split_once('.') {
        Some((db, coll)) if !db.is_empty() && !coll.is_empty() => Ok(()),
        _ => Err(Error::invalid_input(
            location,
            format!("collection name \"{name}\" must have the form database.collection"),
        )),
    }
}

fn parse_fields(path: &str, fields: &Map<String, Value>) -> Result<Vec<(String, FieldSpec)>> {
    fields
        .iter()
        .map(|(name, value)| {
            let field_path = format!("{path}.{name}");
            let spec = match value {
                Value::String(tag) => {
                    FieldSpec::Type(tag.parse::<BsonType>().map_err(|found| Error::UnknownType {
                        field_path: field_path.clone(),
                        found,
                        valid: BsonType::valid_tags(),
                    })?)
                }
                Value::Object(nested) => FieldSpec::Object(parse_fields(&field_path, nested)?),
                other => {
                    return Err(Error::invalid_input(
                        field_path,
                        format!(
                            "expected a type name or nested object, found {}",
                            json_type_name(other)
                        ),
                    ))
                }
            };
            Ok((name.clone(), spec))
        })
        .collect()
}

/// Reads and parses a simplified schema file.
///
/// # Errors
///
/// Returns `Error::SchemaFile` if the file cannot be read or is not valid
/// JSON, and the errors of [`parse_documents`] otherwise.
pub fn load_schema_file(path: impl AsRef<Path>) -> Result<Vec<CollectionSchemaDocument>> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .map_err(|e| Error::SchemaFile { path: path.to_path_buf(), message: e.to_string() })?;
    let value: Value = serde_json::from_str(&contents)
        .map_err(|e| Error::SchemaFile { path: path.to_path_buf(), message: e.to_string() })?;
    parse_documents(&value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    #[test]
    fn test_parse_nested_fields_in_order() {
        let docs = parse_documents(&json!([
            { "app.users": { "ssn": "string", "profile": { "email": "string", "age": "int32" } } },
            { "app.orders": { "card": "string" } }
        ]))
        .unwrap();

        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].collection, "app.users");
        assert_eq!(docs[0].fields[0], ("ssn".to_string(), FieldSpec::Type(BsonType::String)));
        assert_eq!(
            docs[0].fields[1],
            (
                "profile".to_string(),
                FieldSpec::Object(vec![
                    ("email".to_string(), FieldSpec::Type(BsonType::String)),
                    ("age".to_string(), FieldSpec::Type(BsonType::Int32)),
                ])
            )
        );
        assert_eq!(docs[1].collection, "app.orders");
    }

    #[test]
    fn test_rejects_non_array() {
        let err = parse_documents(&json!({ "app.users": {} })).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("found object"));
    }

    #[test]
    fn test_rejects_two_collections_in_one_element() {
        let err = parse_documents(&json!([
            { "app.users": { "ssn": "string" } },
            { "app.a": { "x": "string" }, "app.b": { "y": "string" } }
        ]))
        .unwrap_err();
        assert!(matches!(&err, Error::InvalidInput { location, .. } if location == "[1]"));
        assert!(err.to_string().contains("exactly one collection"));
    }

    #[test]
    fn test_type_tags_parsed_up_front() {
        let docs = parse_documents(&json!([{ "app.users": { "id": "OBJECTID" } }])).unwrap();
        assert_eq!(docs[0].fields[0].1, FieldSpec::Type(BsonType::ObjectId));

        let err = parse_documents(&json!([
            { "app.users": { "ssn": "string" } },
            { "app.orders": { "total": "money" } }
        ]))
        .unwrap_err();
        assert!(
            matches!(&err, Error::UnknownType { field_path, .. } if field_path == "app.orders.total")
        );
    }

    #[test]
    fn test_rejects_empty_element() {
        let err = parse_documents(&json!([{}])).unwrap_err();
        assert!(err.to_string().contains("found 0 keys"));
    }

    #[test]
    fn test_rejects_bad_field_value() {
        let err = parse_documents(&json!([{ "app.users": { "profile": { "age": 42 } } }]))
            .unwrap_err();
        assert!(
            matches!(&err, Error::InvalidInput { location, .. } if location == "app.users.profile.age")
        );
    }

    #[test]
    fn test_rejects_unqualified_collection() {
        let err = parse_documents(&json!([{ "users": { "ssn": "string" } }])).unwrap_err();
        assert!(err.to_string().contains("database.collection"));
    }

    #[test]
    fn test_rejects_duplicate_collection() {
        let err = parse_documents(&json!([
            { "app.users": { "ssn": "string" } },
            { "app.users": { "email": "string" } }
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_load_schema_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.json");
        std::fs::write(&path, r#"[{ "app.users": { "ssn": "string" } }]"#).unwrap();
        assert_eq!(load_schema_file(&path).unwrap().len(), 1);

        std::fs::write(&path, "[{ not json").unwrap();
        let err = load_schema_file(&path).unwrap_err();
        assert!(matches!(err, Error::SchemaFile { .. }));
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = load_schema_file(dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, Error::SchemaFile { .. }));
    }
}
