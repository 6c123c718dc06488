use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};

use crate::common::error::{SubmitError, missing_key};
use crate::common::utils::fs::expand_home;

/// A validated, backend specific configuration record.
pub trait BackendSchema: Sized + std::fmt::Debug {
    /// Validates the fully merged configuration mapping.
    /// Fails on the first missing or malformed key, before anything is generated.
    fn from_merged(merged: &Mapping) -> crate::Result<Self>;
}

/// View of one level of the merged configuration, with typed accessors.
///
/// Keys are reported in errors with the section prefix, e.g. `htcondor.pool`.
#[derive(Clone, Copy)]
pub struct Section<'a> {
    prefix: Option<&'a str>,
    mapping: Option<&'a Mapping>,
}

impl<'a> Section<'a> {
    pub fn root(mapping: &'a Mapping) -> Self {
        Self {
            prefix: None,
            mapping: Some(mapping),
        }
    }

    /// Returns the section stored under `name` in `merged`.
    /// An absent or null section behaves as an empty one.
    pub fn nested(merged: &'a Mapping, name: &'a str) -> crate::Result<Self> {
        let mapping = match merged.get(name) {
            None | Some(Value::Null) => None,
            Some(Value::Mapping(mapping)) => Some(mapping),
            Some(value) => {
                return Err(SubmitError::InvalidValue {
                    key: name.to_string(),
                    expected: "a mapping",
                    found: describe(value),
                });
            }
        };
        Ok(Self {
            prefix: Some(name),
            mapping,
        })
    }

    fn key_name(&self, key: &str) -> String {
        match self.prefix {
            Some(prefix) => format!("{prefix}.{key}"),
            None => key.to_string(),
        }
    }

    fn value(&self, key: &str) -> Option<&'a Value> {
        self.mapping
            .and_then(|mapping| mapping.get(key))
            .filter(|value| !value.is_null())
    }

    fn invalid(&self, key: &str, expected: &'static str, value: &Value) -> SubmitError {
        SubmitError::InvalidValue {
            key: self.key_name(key),
            expected,
            found: describe(value),
        }
    }

    fn scalar_string(&self, key: &str, value: &Value) -> crate::Result<String> {
        match value {
            Value::String(value) => Ok(value.clone()),
            Value::Number(value) => Ok(value.to_string()),
            Value::Bool(value) => Ok(value.to_string()),
            value => Err(self.invalid(key, "a string", value)),
        }
    }

    pub fn required_str(&self, key: &str) -> crate::Result<String> {
        let value = match self.value(key) {
            Some(value) => self.scalar_string(key, value)?,
            None => return missing_key(self.key_name(key)),
        };
        if value.is_empty() {
            return missing_key(self.key_name(key));
        }
        Ok(value)
    }

    pub fn required_path(&self, key: &str) -> crate::Result<PathBuf> {
        self.required_str(key).map(|path| expand_home(&path))
    }

    pub fn optional_str(&self, key: &str, default: &str) -> crate::Result<String> {
        match self.value(key) {
            Some(value) => self.scalar_string(key, value),
            None => Ok(default.to_string()),
        }
    }

    /// Returns `None` for absent, null or empty values.
    pub fn optional_path(&self, key: &str) -> crate::Result<Option<PathBuf>> {
        let path = self.optional_str(key, "")?;
        Ok((!path.is_empty()).then(|| expand_home(&path)))
    }

    pub fn optional_u32(&self, key: &str, default: u32) -> crate::Result<u32> {
        const EXPECTED: &str = "a non-negative integer";

        let Some(value) = self.value(key) else {
            return Ok(default);
        };
        let parsed = match value {
            Value::Number(number) => number.as_u64().and_then(|n| u32::try_from(n).ok()),
            Value::String(text) => text.trim().parse::<u32>().ok(),
            _ => None,
        };
        parsed.ok_or_else(|| self.invalid(key, EXPECTED, value))
    }

    /// Reads a list of strings. A single scalar is treated as a list with one item.
    pub fn string_list(&self, key: &str) -> crate::Result<Vec<String>> {
        match self.value(key) {
            None => Ok(Vec::new()),
            Some(Value::Sequence(items)) => items
                .iter()
                .map(|item| self.scalar_string(key, item))
                .collect(),
            Some(value) => Ok(vec![self.scalar_string(key, value)?]),
        }
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(value) => format!("boolean {value}"),
        Value::Number(value) => format!("number {value}"),
        Value::String(value) => format!("string {value:?}"),
        Value::Sequence(_) => "a sequence".to_string(),
        Value::Mapping(_) => "a mapping".to_string(),
        Value::Tagged(tagged) => format!("tagged value {}", tagged.tag),
    }
}

/// Configuration shared by all backends.
#[derive(Debug, Clone, PartialEq)]
pub struct BaseConfig {
    project_dir: PathBuf,
    executable: String,
    data_dir: PathBuf,
    output_dir: PathBuf,
    image: PathBuf,
    requirements: String,
    venv: String,
    args: Vec<String>,
}

impl BaseConfig {
    pub fn parse(merged: &Mapping) -> crate::Result<Self> {
        let root = Section::root(merged);
        Ok(Self {
            project_dir: root.required_path("project_dir")?,
            data_dir: root.required_path("data_dir")?,
            output_dir: root.required_path("output_dir")?,
            image: root.required_path("image")?,
            executable: root.required_str("executable")?,
            requirements: root.optional_str("requirements", "")?,
            venv: expand_home(&root.optional_str("venv", "")?)
                .to_string_lossy()
                .into_owned(),
            args: root.string_list("args")?,
        })
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    /// Path of the executable, relative to the project directory.
    pub fn executable(&self) -> &str {
        &self.executable
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn image(&self) -> &Path {
        &self.image
    }

    /// Requirements file relative to the project directory, empty if not used.
    pub fn requirements(&self) -> &str {
        &self.requirements
    }

    /// Virtual environment location, empty if the backend default should be used.
    pub fn venv(&self) -> &str {
        &self.venv
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}
