use serde_yaml::{Mapping, Value};

use crate::common::error::SubmitError;
use crate::config::layers::merge;

/// Parses repeated `KEY=VALUE` overrides into a nested mapping.
///
/// Dotted keys create nested mappings (`a.b=1` => `{a: {b: 1}}`). Values are parsed as YAML
/// scalars, so `4` becomes an integer and `true` a boolean; anything that is not valid YAML is
/// kept as a plain string. Later entries win over earlier ones.
pub fn parse_overrides<S: AsRef<str>>(items: &[S]) -> crate::Result<Mapping> {
    items.iter().try_fold(Mapping::new(), |acc, item| {
        let single = parse_override(item.as_ref())?;
        Ok(merge(acc, single))
    })
}

fn parse_override(item: &str) -> crate::Result<Mapping> {
    let invalid = || SubmitError::InvalidOverride(item.to_string());

    let (key, value) = item.split_once('=').ok_or_else(invalid)?;
    let key = key.trim();
    if key.is_empty() {
        return Err(invalid());
    }
    let path: Vec<&str> = key.split('.').map(str::trim).collect();
    if path.iter().any(|segment| segment.is_empty()) {
        return Err(invalid());
    }

    let mut value = parse_scalar(value);
    for segment in path.into_iter().rev() {
        let mut level = Mapping::new();
        level.insert(Value::String(segment.to_string()), value);
        value = Value::Mapping(level);
    }
    match value {
        Value::Mapping(mapping) => Ok(mapping),
        _ => Err(invalid()),
    }
}

fn parse_scalar(value: &str) -> Value {
    serde_yaml::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()))
}
