use serde::Serialize;

use crate::flag::{FlagValue, ValueKind};

/// Classification of a resolution that fell back to the default value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    None,
    ProviderNotReady,
    InvalidArgument,
    FlagNotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Reason {
    /// Served from the local cache.
    Cached,
    Error,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::Cached => "CACHED",
            Reason::Error => "ERROR",
        }
    }
}

/// Result of resolving one flag.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionDetails<T> {
    #[serde(rename = "key")]
    pub flag_key: String,
    pub value: T,
    #[serde(rename = "errorCode")]
    pub error_kind: ErrorKind,
    pub reason: Reason,
    #[serde(rename = "errorDetails", skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl<T> ResolutionDetails<T> {
    pub(crate) fn cached(flag_key: &str, value: T) -> Self {
        Self {
            flag_key: flag_key.to_string(),
            value,
            error_kind: ErrorKind::None,
            reason: Reason::Cached,
            error_message: None,
        }
    }

    pub(crate) fn fallback(
        flag_key: &str,
        default_value: T,
        error_kind: ErrorKind,
        message: Option<&str>,
    ) -> Self {
        Self {
            flag_key: flag_key.to_string(),
            value: default_value,
            error_kind,
            reason: Reason::Error,
            error_message: message.map(str::to_string),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error_kind != ErrorKind::None
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ResolutionDetails<U> {
        ResolutionDetails {
            flag_key: self.flag_key,
            value: f(self.value),
            error_kind: self.error_kind,
            reason: self.reason,
            error_message: self.error_message,
        }
    }
}

/// A Rust type a cached flag value can be resolved into.
///
/// Conversions are exact: an integer flag does not resolve as a double.
pub trait FlagType: Sized {
    const KIND: ValueKind;

    fn from_flag_value(value: &FlagValue) -> Option<Self>;
}

impl FlagType for bool {
    const KIND: ValueKind = ValueKind::Boolean;

    fn from_flag_value(value: &FlagValue) -> Option<Self> {
        match value {
            FlagValue::Boolean(v) => Some(*v),
            _ => None,
        }
    }
}

impl FlagType for String {
    const KIND: ValueKind = ValueKind::String;

    fn from_flag_value(value: &FlagValue) -> Option<Self> {
        match value {
            FlagValue::String(v) => Some(v.clone()),
            _ => None,
        }
    }
}

impl FlagType for i64 {
    const KIND: ValueKind = ValueKind::Integer;

    fn from_flag_value(value: &FlagValue) -> Option<Self> {
        match value {
            FlagValue::Integer(v) => Some(*v),
            _ => None,
        }
    }
}

impl FlagType for f64 {
    const KIND: ValueKind = ValueKind::Double;

    fn from_flag_value(value: &FlagValue) -> Option<Self> {
        match value {
            FlagValue::Double(v) => Some(*v),
            _ => None,
        }
    }
}

/// Structured flags carry JSON bytes; they resolve into a parsed document.
impl FlagType for serde_json::Value {
    const KIND: ValueKind = ValueKind::Structure;

    fn from_flag_value(value: &FlagValue) -> Option<Self> {
        match value {
            FlagValue::Structure(bytes) => serde_json::from_slice(bytes).ok(),
            _ => None,
        }
    }
}
