use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use grapio::GrapioProvider;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FlagKind {
    Bool,
    String,
    Int,
    Double,
    Structure,
}

/// Resolve `flag_key` as `kind` and render the details as OFREP-style JSON.
pub async fn evaluate(
    provider: &GrapioProvider,
    flag_key: &str,
    kind: FlagKind,
    default: Option<&str>,
) -> Result<Value> {
    let details = match kind {
        FlagKind::Bool => {
            let default = match default {
                Some(raw) => parse_bool(raw)?,
                None => false,
            };
            serde_json::to_value(provider.resolve_boolean_value(flag_key, default).await?)?
        }
        FlagKind::String => {
            let default = default.unwrap_or_default();
            serde_json::to_value(provider.resolve_string_value(flag_key, default).await?)?
        }
        FlagKind::Int => {
            let default = match default {
                Some(raw) => raw
                    .trim()
                    .parse::<i64>()
                    .with_context(|| format!("default '{raw}' is not an integer"))?,
                None => 0,
            };
            serde_json::to_value(provider.resolve_integer_value(flag_key, default).await?)?
        }
        FlagKind::Double => {
            let default = match default {
                Some(raw) => raw
                    .trim()
                    .parse::<f64>()
                    .with_context(|| format!("default '{raw}' is not a number"))?,
                None => 0.0,
            };
            serde_json::to_value(provider.resolve_double_value(flag_key, default).await?)?
        }
        FlagKind::Structure => {
            let default = match default {
                Some(raw) => serde_json::from_str(raw)
                    .with_context(|| format!("default '{raw}' is not valid JSON"))?,
                None => Value::Null,
            };
            serde_json::to_value(provider.resolve_structure_value(flag_key, default).await?)?
        }
    };
    Ok(details)
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => bail!("default '{raw}' is not a boolean"),
    }
}
