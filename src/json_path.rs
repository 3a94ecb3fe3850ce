//! Dotted JSON paths.
//!
//! A path such as `horse.name` or `weapons.0.type` addresses a field inside a
//! JSON document. Numeric segments index arrays, `\.` escapes a literal dot,
//! and `-1` appends when writing into an array.

use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Errors raised while parsing or writing a JSON path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JsonPathError {
    #[error("empty JSON path")]
    Empty,
    #[error("cannot write below `{segment}`: it holds a scalar value")]
    NotContainer { segment: String },
    #[error("array index `{segment}` is not valid for an array of length {len}")]
    BadIndex { segment: String, len: usize },
}

/// A parsed dotted path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPath {
    segments: Vec<String>,
}

impl JsonPath {
    /// Parse a dotted path. A single leading `.` is accepted and ignored.
    pub fn parse(path: &str) -> Result<Self, JsonPathError> {
        let path = path.strip_prefix('.').unwrap_or(path);
        if path.is_empty() {
            return Err(JsonPathError::Empty);
        }

        let mut segments = Vec::new();
        let mut current = String::new();
        let mut chars = path.chars();
        while let Some(ch) = chars.next() {
            match ch {
                '\\' => match chars.next() {
                    Some(escaped) => current.push(escaped),
                    None => current.push('\\'),
                },
                '.' => segments.push(std::mem::take(&mut current)),
                _ => current.push(ch),
            }
        }
        segments.push(current);

        Ok(Self { segments })
    }

    /// Look the path up in a document.
    pub fn get<'a>(&self, doc: &'a Value) -> Option<&'a Value> {
        self.segments
            .iter()
            .try_fold(doc, |node, segment| match node {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            })
    }

    /// Overwrite the value at the path, creating intermediate objects.
    pub fn set(&self, doc: &mut Value, value: Value) -> Result<(), JsonPathError> {
        let (last, parents) = match self.segments.split_last() {
            Some(split) => split,
            None => return Err(JsonPathError::Empty),
        };

        let mut node = doc;
        for segment in parents {
            node = child_mut(node, segment)?;
        }

        if node.is_null() {
            *node = Value::Object(Map::new());
        }
        match node {
            Value::Object(map) => {
                map.insert(last.clone(), value);
            }
            Value::Array(items) => {
                let index = array_slot(items, last)?;
                if index == items.len() {
                    items.push(value);
                } else {
                    items[index] = value;
                }
            }
            _ => {
                return Err(JsonPathError::NotContainer {
                    segment: last.clone(),
                })
            }
        }
        Ok(())
    }
}

fn child_mut<'a>(node: &'a mut Value, segment: &str) -> Result<&'a mut Value, JsonPathError> {
    if node.is_null() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => Ok(map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()))),
        Value::Array(items) => {
            let index = array_slot(items, segment)?;
            if index == items.len() {
                items.push(Value::Object(Map::new()));
            }
            Ok(&mut items[index])
        }
        _ => Err(JsonPathError::NotContainer {
            segment: segment.to_string(),
        }),
    }
}

// Index of an existing element, or `len` to append.
fn array_slot(items: &[Value], segment: &str) -> Result<usize, JsonPathError> {
    if segment == "-1" {
        return Ok(items.len());
    }
    match segment.parse::<usize>() {
        Ok(index) if index <= items.len() => Ok(index),
        _ => Err(JsonPathError::BadIndex {
            segment: segment.to_string(),
            len: items.len(),
        }),
    }
}

impl FromStr for JsonPath {
    type Err = JsonPathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let escaped: Vec<String> = self.segments.iter().map(|s| s.replace('.', "\\.")).collect();
        f.write_str(&escaped.join("."))
    }
}
