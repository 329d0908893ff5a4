//! Conversion between configuration trees and frp's TOML dialect.
//!
//! Trees are serialized through `serde_json::Value` so every numeric field is
//! written the same way regardless of its Rust type. Absent, empty-string,
//! empty-array and empty-table fields are dropped before writing.

use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Number, Value};

/// Key `toml` uses when a datetime passes through a self-describing format.
const TOML_DATETIME_KEY: &str = "$__toml_private_datetime";

const SECRET_KEYS: &[&str] = &[
    "token",
    "password",
    "secretKey",
    "clientSecret",
    "httpPassword",
];

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("cannot represent configuration: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("configuration root must be a table")]
    NotATable,
}

/// Serializes `tree` as a global configuration document.
pub fn encode<T: Serialize>(tree: &T) -> Result<String, CodecError> {
    let table = pruned_table(tree)?;
    let mut lines = Vec::new();
    write_section(&table, None, &mut lines);
    Ok(finish(lines))
}

/// Serializes `tree` as one `[[header]]` block. Nested tables are flattened
/// into dotted keys so the block stays self-contained. No trailing newline.
pub fn encode_block<T: Serialize>(header: &str, tree: &T) -> Result<String, CodecError> {
    let table = pruned_table(tree)?;
    let mut lines = vec![format!("[[{}]]", format_key(header))];
    write_dotted(&table, None, &mut lines);
    Ok(lines.join("\n"))
}

/// Parses `text`; blank input yields the default tree.
pub fn decode<T: DeserializeOwned + Default>(text: &str) -> Result<T, CodecError> {
    if text.trim().is_empty() {
        return Ok(T::default());
    }
    Ok(toml::from_str(text)?)
}

/// Masks secret values so configuration text can be logged.
pub fn redact_secrets(text: &str) -> String {
    text.lines()
        .map(|line| {
            let Some(equals_position) = line.find('=') else {
                return line.to_string();
            };
            let key = line[..equals_position].trim();
            let leaf = key.rsplit('.').next().unwrap_or(key).trim_matches('"');
            if !SECRET_KEYS.contains(&leaf) {
                return line.to_string();
            }
            let value = line[equals_position + 1..].trim();
            let length = value
                .strip_prefix('"')
                .and_then(|stripped| stripped.strip_suffix('"'))
                .map(|inner| inner.chars().count())
                .unwrap_or(value.len());
            format!("{}= \"{}\"", &line[..equals_position], "*".repeat(length))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn pruned_table<T: Serialize>(tree: &T) -> Result<Map<String, Value>, CodecError> {
    match serde_json::to_value(tree)? {
        Value::Object(table) => Ok(prune_table(table)),
        Value::Null => Ok(Map::new()),
        _ => Err(CodecError::NotATable),
    }
}

fn prune_table(table: Map<String, Value>) -> Map<String, Value> {
    table
        .into_iter()
        .filter_map(|(key, value)| prune(value).map(|value| (key, value)))
        .collect()
}

fn prune(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::String(text) if text.is_empty() => None,
        Value::Array(items) => {
            let items: Vec<Value> = items
                .into_iter()
                .filter_map(|item| match item {
                    Value::Null => None,
                    Value::Object(table) => {
                        let table = prune_table(table);
                        (!table.is_empty()).then_some(Value::Object(table))
                    }
                    other => Some(other),
                })
                .collect();
            (!items.is_empty()).then_some(Value::Array(items))
        }
        Value::Object(table) if is_datetime(&table) => Some(Value::Object(table)),
        Value::Object(table) => {
            let table = prune_table(table);
            (!table.is_empty()).then_some(Value::Object(table))
        }
        other => Some(other),
    }
}

fn is_datetime(table: &Map<String, Value>) -> bool {
    table.len() == 1 && table.contains_key(TOML_DATETIME_KEY)
}

fn is_section(value: &Value) -> bool {
    matches!(value, Value::Object(table) if !is_datetime(table))
}

fn write_section(table: &Map<String, Value>, prefix: Option<&str>, lines: &mut Vec<String>) {
    let scalars: Vec<String> = table
        .iter()
        .filter(|(_, value)| !is_section(value))
        .map(|(key, value)| format!("{} = {}", format_key(key), format_value(value)))
        .collect();

    if let Some(prefix) = prefix
        && !scalars.is_empty()
    {
        if !lines.is_empty() {
            lines.push(String::new());
        }
        lines.push(format!("[{prefix}]"));
    }
    lines.extend(scalars);

    for (key, value) in table {
        let Value::Object(child) = value else {
            continue;
        };
        if is_datetime(child) {
            continue;
        }
        let path = match prefix {
            Some(prefix) => format!("{prefix}.{}", format_key(key)),
            None => format_key(key),
        };
        write_section(child, Some(&path), lines);
    }
}

fn write_dotted(table: &Map<String, Value>, prefix: Option<&str>, lines: &mut Vec<String>) {
    for (key, value) in table {
        let path = match prefix {
            Some(prefix) => format!("{prefix}.{}", format_key(key)),
            None => format_key(key),
        };
        match value {
            Value::Object(child) if !is_datetime(child) => write_dotted(child, Some(&path), lines),
            other => lines.push(format!("{path} = {}", format_value(other))),
        }
    }
}

fn finish(lines: Vec<String>) -> String {
    if lines.is_empty() {
        return String::new();
    }
    let mut text = lines.join("\n");
    text.push('\n');
    text
}

fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "\"\"".to_string(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => format_number(number),
        Value::String(text) => quote(text),
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(format_value).collect();
            format!("[{}]", items.join(", "))
        }
        Value::Object(table) => {
            if let Some(Value::String(raw)) = table.get(TOML_DATETIME_KEY)
                && table.len() == 1
            {
                return raw.clone();
            }
            let fields: Vec<String> = table
                .iter()
                .map(|(key, value)| format!("{} = {}", format_key(key), format_value(value)))
                .collect();
            if fields.is_empty() {
                "{}".to_string()
            } else {
                format!("{{{}}}", fields.join(", "))
            }
        }
    }
}

fn format_number(number: &Number) -> String {
    if let Some(integer) = number.as_i64() {
        return integer.to_string();
    }
    if let Some(unsigned) = number.as_u64() {
        return unsigned.to_string();
    }
    let Some(float) = number.as_f64() else {
        return number.to_string();
    };
    if float.is_nan() {
        "nan".to_string()
    } else if float.is_infinite() {
        let sign = if float > 0.0 { "" } else { "-" };
        format!("{sign}inf")
    } else if float.fract() == 0.0 && float.abs() < 1e15 {
        (float as i64).to_string()
    } else if float.fract() == 0.0 {
        format!("{float:e}")
    } else {
        float.to_string()
    }
}

fn format_key(key: &str) -> String {
    let bare = !key.is_empty()
        && key
            .chars()
            .all(|character| character.is_ascii_alphanumeric() || matches!(character, '_' | '-'));
    if bare { key.to_string() } else { quote(key) }
}

fn quote(text: &str) -> String {
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('"');
    for character in text.chars() {
        match character {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            '\u{8}' => quoted.push_str("\\b"),
            '\u{c}' => quoted.push_str("\\f"),
            character if character.is_control() => {
                quoted.push_str(&format!("\\u{:04X}", character as u32));
            }
            character => quoted.push(character),
        }
    }
    quoted.push('"');
    quoted
}
