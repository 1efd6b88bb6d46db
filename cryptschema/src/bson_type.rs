//! Semantic field types and encryption algorithms.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Types allowed under deterministic encryption.
///
/// Only these have a canonical fixed encoding that keeps ciphertext equality
/// meaningful. `uuid` is accepted for hand-authored schemas even though the
/// simplified format has no tag for it.
pub const DETERMINISTIC_TYPES: [&str; 6] = ["string", "int32", "int64", "date", "objectId", "uuid"];

/// A semantic type tag usable in a simplified schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BsonType {
    Double,
    String,
    Object,
    Array,
    Binary,
    Undefined,
    ObjectId,
    Bool,
    Date,
    Null,
    Regex,
    DbPointer,
    Javascript,
    Symbol,
    JavascriptWithScope,
    Int32,
    Timestamp,
    Int64,
    Decimal128,
    MinKey,
    MaxKey,
}

impl BsonType {
    /// Every supported tag, in canonical order.
    pub const ALL: [Self; 21] = [
        Self::Double,
        Self::String,
        Self::Object,
        Self::Array,
        Self::Binary,
        Self::Undefined,
        Self::ObjectId,
        Self::Bool,
        Self::Date,
        Self::Null,
        Self::Regex,
        Self::DbPointer,
        Self::Javascript,
        Self::Symbol,
        Self::JavascriptWithScope,
        Self::Int32,
        Self::Timestamp,
        Self::Int64,
        Self::Decimal128,
        Self::MinKey,
        Self::MaxKey,
    ];

    /// Canonical name as written in the verbose schema.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Double => "double",
            Self::String => "string",
            Self::Object => "object",
            Self::Array => "array",
            Self::Binary => "binary",
            Self::Undefined => "undefined",
            Self::ObjectId => "objectId",
            Self::Bool => "bool",
            Self::Date => "date",
            Self::Null => "null",
            Self::Regex => "regex",
            Self::DbPointer => "dbPointer",
            Self::Javascript => "javascript",
            Self::Symbol => "symbol",
            Self::JavascriptWithScope => "javascriptWithScope",
            Self::Int32 => "int32",
            Self::Timestamp => "timestamp",
            Self::Int64 => "int64",
            Self::Decimal128 => "decimal128",
            Self::MinKey => "minKey",
            Self::MaxKey => "maxKey",
        }
    }

    /// Algorithm chosen for a field of this type during expansion.
    #[must_use]
    pub const fn default_algorithm(self) -> Algorithm {
        match self {
            Self::Array | Self::Object | Self::Bool | Self::Double | Self::Decimal128 => {
                Algorithm::Random
            }
            _ => Algorithm::Deterministic,
        }
    }

    /// Comma-separated list of accepted tags, for error messages.
    #[must_use]
    pub fn valid_tags() -> String {
        Self::ALL.iter().map(|t| t.as_str()).collect::<Vec<_>>().join(", ")
    }
}

impl fmt::Display for BsonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BsonType {
    type Err = String;

    /// Parses a type tag case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| s.to_string())
    }
}

/// Encryption algorithm applied by the native engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    /// Same plaintext and key yield the same ciphertext.
    #[serde(rename = "AEAD_AES_256_CBC_HMAC_SHA_512-Deterministic")]
    Deterministic,
    /// Fresh ciphertext on every encryption.
    #[serde(rename = "AEAD_AES_256_CBC_HMAC_SHA_512-Random")]
    Random,
}

impl Algorithm {
    /// Full algorithm identifier understood by the native engine.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Deterministic => "AEAD_AES_256_CBC_HMAC_SHA_512-Deterministic",
            Self::Random => "AEAD_AES_256_CBC_HMAC_SHA_512-Random",
        }
    }

    /// Whether a field declared with `bson_type` may use this algorithm.
    #[must_use]
    pub fn supports(self, bson_type: &str) -> bool {
        match self {
            Self::Random => true,
            Self::Deterministic => DETERMINISTIC_TYPES.contains(&bson_type),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AEAD_AES_256_CBC_HMAC_SHA_512-Deterministic" | "Deterministic" => {
                Ok(Self::Deterministic)
            }
            "AEAD_AES_256_CBC_HMAC_SHA_512-Random" | "Random" => Ok(Self::Random),
            other => Err(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("STRING".parse::<BsonType>(), Ok(BsonType::String));
        assert_eq!("objectid".parse::<BsonType>(), Ok(BsonType::ObjectId));
        assert_eq!("Int64".parse::<BsonType>(), Ok(BsonType::Int64));
        assert_eq!("javascriptWithScope".parse::<BsonType>(), Ok(BsonType::JavascriptWithScope));
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert_eq!("uuid".parse::<BsonType>(), Err("uuid".to_string()));
        assert!("".parse::<BsonType>().is_err());
    }

    #[test]
    fn test_default_algorithm_partition() {
        let random: Vec<_> = BsonType::ALL
            .into_iter()
            .filter(|t| t.default_algorithm() == Algorithm::Random)
            .collect();
        assert_eq!(
            random,
            vec![
                BsonType::Double,
                BsonType::Object,
                BsonType::Array,
                BsonType::Bool,
                BsonType::Decimal128
            ]
        );
    }

    #[test]
    fn test_every_tag_round_trips_through_parse() {
        for t in BsonType::ALL {
            assert_eq!(t.as_str().parse::<BsonType>(), Ok(t));
            assert_eq!(t.as_str().to_uppercase().parse::<BsonType>(), Ok(t));
        }
    }

    #[test]
    fn test_algorithm_names() {
        assert_eq!("Random".parse::<Algorithm>(), Ok(Algorithm::Random));
        assert_eq!(
            Algorithm::Deterministic.as_str().parse::<Algorithm>(),
            Ok(Algorithm::Deterministic)
        );
        assert!("AES".parse::<Algorithm>().is_err());
        assert_eq!(
            serde_json::to_value(Algorithm::Random).unwrap(),
            serde_json::json!("AEAD_AES_256_CBC_HMAC_SHA_512-Random")
        );
    }

    #[test]
    fn test_deterministic_support() {
        assert!(Algorithm::Deterministic.supports("string"));
        assert!(Algorithm::Deterministic.supports("uuid"));
        assert!(!Algorithm::Deterministic.supports("double"));
        assert!(Algorithm::Random.supports("anything"));
    }
}
