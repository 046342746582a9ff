//! Input expression classification.

use crate::primitives::{DATA_FILE_KEY, DATA_OBJECT_NAME_KEY, LOGSHEET_KEY, UNSPECIFIED_MARKERS};

/// What an input expression in a package file binds to.
#[derive(Debug, Clone, PartialEq)]
pub enum InputClass {
    /// Left open, to be filled by a bridge.
    Unspecified,
    /// The name of the data object being processed.
    DataObjectName,
    /// A logsheet column. Holds the text after the sentinel prefix.
    LogsheetVariable(String),
    /// A dotted reference to another runnable's output.
    InputVariable(String),
    /// A data file path. Holds the table value under the sentinel key.
    DataFilePath(serde_json::Value),
    /// A literal value.
    Constant(serde_json::Value),
}

/// Classify one input expression.
#[must_use]
pub fn classify_input(input: &serde_json::Value) -> InputClass {
    match input {
        serde_json::Value::Null => InputClass::Unspecified,
        serde_json::Value::String(s) => {
            if UNSPECIFIED_MARKERS.contains(&s.as_str()) {
                InputClass::Unspecified
            } else if s == DATA_OBJECT_NAME_KEY {
                InputClass::DataObjectName
            } else if let Some(rest) = s.strip_prefix(LOGSHEET_KEY) {
                InputClass::LogsheetVariable(rest.trim_start_matches('.').to_string())
            } else if is_variable_path(s) {
                InputClass::InputVariable(s.clone())
            } else {
                InputClass::Constant(input.clone())
            }
        }
        serde_json::Value::Object(map) if map.len() == 1 => match map.get(DATA_FILE_KEY) {
            Some(path) => InputClass::DataFilePath(path.clone()),
            None => InputClass::Constant(input.clone()),
        },
        other => InputClass::Constant(other.clone()),
    }
}

/// Two or three dot-separated identifiers.
#[must_use]
pub fn is_variable_path(s: &str) -> bool {
    let segments: Vec<&str> = s.split('.').collect();
    (2..=3).contains(&segments.len()) && segments.iter().all(|seg| is_identifier(seg))
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}
