//! Opaque identifier of a data encryption key.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Binary subtype used for UUID-formatted key ids.
const UUID_SUBTYPE: &str = "04";

/// Handle of a data key stored in the key vault.
///
/// Serializes as canonical extended JSON binary, the form the native engine
/// expects inside `keyId` arrays:
///
/// ```json
/// { "$binary": { "base64": "...", "subType": "04" } }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyHandle(Uuid);

impl KeyHandle {
    /// Creates a fresh random handle.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn uuid(&self) -> Uuid {
        self.0
    }

    /// Returns the 16 raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Parses the 16 raw bytes of a handle.
    ///
    /// # Errors
    ///
    /// Returns an error message if `bytes` is not exactly 16 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, String> {
        Uuid::from_slice(bytes).map(Self).map_err(|e| format!("invalid key id: {e}"))
    }
}

impl fmt::Display for KeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl Serialize for KeyHandle {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Binary<'a> {
            base64: String,
            #[serde(rename = "subType")]
            sub_type: &'a str,
        }

        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(
            "$binary",
            &Binary { base64: STANDARD.encode(self.as_bytes()), sub_type: UUID_SUBTYPE },
        )?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for KeyHandle {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Binary {
            base64: String,
            #[serde(rename = "subType")]
            sub_type: String,
        }

        #[derive(Deserialize)]
        struct Wrapper {
            #[serde(rename = "$binary")]
            binary: Binary,
        }

        let wrapper = Wrapper::deserialize(deserializer)?;
        if wrapper.binary.sub_type != UUID_SUBTYPE && wrapper.binary.sub_type != "4" {
            return Err(de::Error::custom(format!(
                "key id must be binary subtype 04, found {}",
                wrapper.binary.sub_type
            )));
        }
        let bytes = STANDARD.decode(wrapper.binary.base64.as_bytes()).map_err(de::Error::custom)?;
        Self::from_slice(&bytes).map_err(de::Error::custom)
    }
}
