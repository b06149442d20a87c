// Loading of pod and container config files (JSON or YAML).

use std::path::Path;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::errors::{CliError, CliResult};

/// Fields whose values are free-form string maps; their keys are user data.
const MAP_FIELDS: &[&str] = &["labels", "annotations", "sysctls", "unified", "labelSelector"];

/// Parse a config file. Keys may be snake_case (as in most published
/// examples) or camelCase; both map onto the same message fields.
pub fn load_config_file<T: DeserializeOwned>(path: &Path) -> CliResult<T> {
    let text = std::fs::read_to_string(path).map_err(|err| CliError::Config {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    parse_config(&text, path)
}

pub fn parse_config<T: DeserializeOwned>(text: &str, path: &Path) -> CliResult<T> {
    let invalid = |message: String| CliError::Config {
        path: path.to_path_buf(),
        message,
    };

    let is_json = path.extension().is_some_and(|ext| ext == "json");
    let raw: Value = if is_json {
        serde_json::from_str(text).map_err(|err| invalid(err.to_string()))?
    } else {
        serde_yaml::from_str(text).map_err(|err| invalid(err.to_string()))?
    };

    serde_json::from_value(normalize_keys(raw)).map_err(|err| invalid(err.to_string()))
}

fn normalize_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, value) in map {
                let key = camel_case(&key);
                let value = if MAP_FIELDS.contains(&key.as_str()) {
                    value
                } else {
                    normalize_keys(value)
                };
                out.insert(key, value);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(normalize_keys).collect()),
        other => other,
    }
}

fn camel_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper = false;
    for ch in key.chars() {
        if ch == '_' {
            upper = true;
        } else if upper {
            out.extend(ch.to_uppercase());
            upper = false;
        } else {
            out.push(ch);
        }
    }
    out
}
