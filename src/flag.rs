use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Discriminator of a flag value, on the wire and in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Boolean,
    String,
    Integer,
    Double,
    Structure,
    /// A wire record that carries no value at all.
    NotSet,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Boolean => "BooleanValue",
            ValueKind::String => "StringValue",
            ValueKind::Integer => "IntegerValue",
            ValueKind::Double => "DoubleValue",
            ValueKind::Structure => "StructureValue",
            ValueKind::NotSet => "None",
        };
        f.write_str(name)
    }
}

/// Typed value of a cached flag.
///
/// Stored as externally tagged JSON (`{"Boolean":true}`), so every variant
/// reads back as the variant it was written as. Doubles are stored as their
/// IEEE-754 bit pattern; JSON numbers cannot carry NaN or infinities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FlagValue {
    Boolean(bool),
    String(String),
    Integer(i64),
    Double(#[serde(with = "f64_bits")] f64),
    /// Opaque structured payload, JSON encoded by the server.
    Structure(Vec<u8>),
}

mod f64_bits {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.to_bits())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        u64::deserialize(deserializer).map(f64::from_bits)
    }
}

impl FlagValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            FlagValue::Boolean(_) => ValueKind::Boolean,
            FlagValue::String(_) => ValueKind::String,
            FlagValue::Integer(_) => ValueKind::Integer,
            FlagValue::Double(_) => ValueKind::Double,
            FlagValue::Structure(_) => ValueKind::Structure,
        }
    }
}

impl From<bool> for FlagValue {
    fn from(value: bool) -> Self {
        FlagValue::Boolean(value)
    }
}

impl From<&str> for FlagValue {
    fn from(value: &str) -> Self {
        FlagValue::String(value.to_string())
    }
}

impl From<String> for FlagValue {
    fn from(value: String) -> Self {
        FlagValue::String(value)
    }
}

impl From<i64> for FlagValue {
    fn from(value: i64) -> Self {
        FlagValue::Integer(value)
    }
}

impl From<f64> for FlagValue {
    fn from(value: f64) -> Self {
        FlagValue::Double(value)
    }
}

/// A flag key paired with its value.
///
/// Real flags always have a non-empty key. The only keyless instance is
/// [`FeatureFlag::null`], returned by repositories for a missing key.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureFlag {
    key: String,
    value: FlagValue,
}

impl FeatureFlag {
    pub fn new(key: impl Into<String>, value: impl Into<FlagValue>) -> Result<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(Error::invalid_argument("flag key must not be empty"));
        }
        Ok(Self {
            key,
            value: value.into(),
        })
    }

    /// The "no such flag" sentinel.
    pub fn null() -> Self {
        Self {
            key: String::new(),
            value: FlagValue::Boolean(false),
        }
    }

    pub fn is_null(&self) -> bool {
        self.key.is_empty()
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &FlagValue {
        &self.value
    }

    pub fn into_parts(self) -> (String, FlagValue) {
        (self.key, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_empty_key() {
        let err = FeatureFlag::new("", true).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_equality_compares_key_and_value() {
        let a = FeatureFlag::new("checkout", true).unwrap();
        assert_eq!(a, FeatureFlag::new("checkout", true).unwrap());
        assert_ne!(a, FeatureFlag::new("checkout", false).unwrap());
        assert_ne!(a, FeatureFlag::new("Checkout", true).unwrap());
        assert_ne!(
            FeatureFlag::new("limit", 1i64).unwrap(),
            FeatureFlag::new("limit", 1.0).unwrap()
        );
    }

    #[test]
    fn test_null_sentinel() {
        let null = FeatureFlag::null();
        assert!(null.is_null());
        assert_eq!(null, FeatureFlag::null());
        assert!(!FeatureFlag::new("k", "v").unwrap().is_null());
    }

    #[test]
    fn test_value_json_encoding_keeps_the_variant() {
        let encoded = serde_json::to_string(&FlagValue::Integer(1)).unwrap();
        assert_eq!(encoded, r#"{"Integer":1}"#);
        let encoded = serde_json::to_string(&FlagValue::Double(1.0)).unwrap();
        assert_eq!(encoded, r#"{"Double":4607182418800017408}"#);
        let decoded: FlagValue = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, FlagValue::Double(1.0));
    }
}
