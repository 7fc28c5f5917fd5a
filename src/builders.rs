//! Conversion of wire records into typed [`FeatureFlag`]s.
//!
//! Every supported value variant has exactly one entry in a fixed table.
//! Lookup walks the table in order and takes the first entry whose kind
//! matches the record's discriminator.

use crate::error::{Error, Result};
use crate::flag::{FeatureFlag, FlagValue, ValueKind};
use crate::proto::feature_flag_reply::Value;
use crate::proto::FeatureFlagReply;

type BuildFn = fn(Option<&Value>) -> Option<FlagValue>;

/// Converts wire records carrying one particular value variant.
#[derive(Clone, Copy)]
pub struct FlagBuilder {
    kind: ValueKind,
    extract: BuildFn,
}

impl FlagBuilder {
    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    pub fn matches(&self, kind: ValueKind) -> bool {
        self.kind == kind
    }

    /// Builds the flag for `record`.
    ///
    /// Fails with [`Error::InvalidArgument`] when there is no record, when it
    /// carries a different variant, or when its key is empty.
    pub fn build(&self, record: Option<&FeatureFlagReply>) -> Result<FeatureFlag> {
        let record =
            record.ok_or_else(|| Error::invalid_argument("feature flag record is missing"))?;
        let value = (self.extract)(record.value.as_ref()).ok_or_else(|| {
            Error::invalid_argument(format!(
                "record '{}' carries {}, builder expects {}",
                record.key,
                record.value_kind(),
                self.kind
            ))
        })?;
        FeatureFlag::new(record.key.clone(), value)
    }
}

impl std::fmt::Debug for FlagBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlagBuilder").field("kind", &self.kind).finish()
    }
}

const BOOLEAN: FlagBuilder = FlagBuilder {
    kind: ValueKind::Boolean,
    extract: |value| match value {
        Some(Value::BooleanValue(v)) => Some(FlagValue::Boolean(*v)),
        _ => None,
    },
};

const STRING: FlagBuilder = FlagBuilder {
    kind: ValueKind::String,
    extract: |value| match value {
        Some(Value::StringValue(v)) => Some(FlagValue::String(v.clone())),
        _ => None,
    },
};

const INTEGER: FlagBuilder = FlagBuilder {
    kind: ValueKind::Integer,
    extract: |value| match value {
        Some(Value::IntegerValue(v)) => Some(FlagValue::Integer(*v)),
        _ => None,
    },
};

const DOUBLE: FlagBuilder = FlagBuilder {
    kind: ValueKind::Double,
    extract: |value| match value {
        Some(Value::DoubleValue(v)) => Some(FlagValue::Double(*v)),
        _ => None,
    },
};

const STRUCTURE: FlagBuilder = FlagBuilder {
    kind: ValueKind::Structure,
    extract: |value| match value {
        Some(Value::StructureValue(v)) => Some(FlagValue::Structure(v.clone())),
        _ => None,
    },
};

/// All builders, in lookup order.
pub const DEFAULT_BUILDERS: [FlagBuilder; 5] = [BOOLEAN, STRING, INTEGER, DOUBLE, STRUCTURE];

/// Ordered table of flag builders.
#[derive(Debug, Clone)]
pub struct BuilderRegistry {
    builders: Vec<FlagBuilder>,
}

impl Default for BuilderRegistry {
    fn default() -> Self {
        Self {
            builders: DEFAULT_BUILDERS.to_vec(),
        }
    }
}

impl BuilderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry restricted to the given kinds, keeping the default order.
    pub fn with_kinds(kinds: &[ValueKind]) -> Self {
        Self {
            builders: DEFAULT_BUILDERS
                .iter()
                .filter(|b| kinds.contains(&b.kind))
                .copied()
                .collect(),
        }
    }

    pub fn find(&self, kind: ValueKind) -> Result<&FlagBuilder> {
        self.builders
            .iter()
            .find(|b| b.matches(kind))
            .ok_or(Error::UnsupportedVariant(kind))
    }

    pub fn build(&self, record: &FeatureFlagReply) -> Result<FeatureFlag> {
        let kind = record.value_kind();
        let builder = self.find(kind).inspect_err(|_| {
            tracing::error!(key = %record.key, "missing a flag builder for [{}]", kind);
        })?;
        builder.build(Some(record))
    }
}
