//! Object identifiers.

use crate::{Result, TypesError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Length of a raw SHA-1 object id.
pub const OID_RAW_LEN: usize = 20;

/// Length of an object id in its ASCII hex form.
pub const OID_HEX_LEN: usize = 2 * OID_RAW_LEN;

/// A 20-byte SHA-1 object identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ObjectId([u8; OID_RAW_LEN]);

impl Serialize for ObjectId {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ObjectId::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

impl ObjectId {
    /// The all-zero id. On the wire it stands for "no object": a ref being
    /// created has a zero old id, a ref being deleted a zero new id.
    pub const ZERO: Self = Self([0u8; OID_RAW_LEN]);

    /// Creates an ObjectId from raw bytes.
    pub fn from_bytes(bytes: [u8; OID_RAW_LEN]) -> Self {
        Self(bytes)
    }

    /// Creates an ObjectId from a hex string.
    ///
    /// Both upper and lower case digits are accepted; [`ObjectId::to_hex`]
    /// always produces lower case.
    pub fn from_hex(hex: &str) -> Result<Self> {
        Self::from_hex_bytes(hex.as_bytes())
    }

    /// Creates an ObjectId from hex digits that have not been validated as UTF-8.
    pub fn from_hex_bytes(hex: &[u8]) -> Result<Self> {
        if hex.len() != OID_HEX_LEN {
            return Err(TypesError::InvalidObjectId(format!(
                "expected {} hex digits, got {}",
                OID_HEX_LEN,
                hex.len()
            )));
        }
        let mut bytes = [0u8; OID_RAW_LEN];
        hex::decode_to_slice(hex, &mut bytes)
            .map_err(|e| TypesError::InvalidObjectId(e.to_string()))?;
        Ok(Self(bytes))
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; OID_RAW_LEN] {
        &self.0
    }

    /// Returns the lower case hex representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Returns true for the all-zero id.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; OID_RAW_LEN]
    }
}

impl FromStr for ObjectId {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SAMPLE: &str = "3f786850e387550fdab836ed7e6dc881de23001b";

    #[test]
    fn test_from_hex_roundtrip() {
        let id = ObjectId::from_hex(SAMPLE).unwrap();
        assert_eq!(id.to_hex(), SAMPLE);
        assert_eq!(id.to_string(), SAMPLE);
    }

    #[test]
    fn test_from_hex_upper_case() {
        let id = ObjectId::from_hex(&SAMPLE.to_uppercase()).unwrap();
        assert_eq!(id.to_hex(), SAMPLE);
    }

    #[test]
    fn test_from_hex_rejects_wrong_length() {
        assert!(ObjectId::from_hex("abc").is_err());
        assert!(ObjectId::from_hex(&format!("{SAMPLE}0")).is_err());
    }

    #[test]
    fn test_from_hex_rejects_non_hex() {
        let bad = format!("{}zz", &SAMPLE[..38]);
        assert!(matches!(
            ObjectId::from_hex(&bad),
            Err(TypesError::InvalidObjectId(_))
        ));
    }

    #[test]
    fn test_zero() {
        assert!(ObjectId::ZERO.is_zero());
        assert_eq!(ObjectId::ZERO.to_hex(), "0".repeat(OID_HEX_LEN));
        assert!(!ObjectId::from_hex(SAMPLE).unwrap().is_zero());
        assert_eq!(ObjectId::default(), ObjectId::ZERO);
    }

    #[test]
    fn test_parse_via_from_str() {
        let id: ObjectId = SAMPLE.parse().unwrap();
        assert_eq!(id.as_bytes()[0], 0x3f);
    }

    #[test]
    fn test_serde_as_hex_string() {
        let id = ObjectId::from_hex(SAMPLE).unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{SAMPLE}\""));
        let back: ObjectId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_debug_format() {
        let id = ObjectId::from_hex(SAMPLE).unwrap();
        assert_eq!(format!("{id:?}"), format!("ObjectId({SAMPLE})"));
    }

    proptest! {
        #[test]
        fn prop_hex_roundtrip(bytes in prop::array::uniform20(any::<u8>())) {
            let id = ObjectId::from_bytes(bytes);
            prop_assert_eq!(ObjectId::from_hex(&id.to_hex()).unwrap(), id);
        }
    }
}
