//! Key/value metadata and the `section:key=value,...;section:...` mini-language.
//!
//! Values are not quoted, so a value can never contain `,` or `;`.  Only the
//! first `=` of a pair separates key from value; later ones stay in the value.

use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum MetadataError {
    #[error("Invalid section metadata format: {0}")]
    InvalidSection(String),
    #[error("Invalid key-value pair: {0}")]
    InvalidKeyValue(String),
    #[error("Duplicate key in section metadata '{section}': {key}")]
    DuplicateKey { section: String, key: String },
    #[error("Integer value {0} is out of range for Int64")]
    IntegerOutOfRange(String),
}

/// A typed metadata value.  Exactly one variant is active.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    UInt8(u8),
    Int8(i8),
    UInt16(u16),
    Int16(i16),
    UInt32(u32),
    Int32(i32),
    Float32(f32),
    Bool(bool),
    String(String),
    UInt64(u64),
    Int64(i64),
    Double(f64),
    /// Union tag not known to this build.  Decoded, never encoded.
    Unknown(u8),
}

impl Value {
    /// Type label used by the inspector, e.g. `String` or `Int64`.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::UInt8(_)   => "UInt8",
            Value::Int8(_)    => "Int8",
            Value::UInt16(_)  => "UInt16",
            Value::Int16(_)   => "Int16",
            Value::UInt32(_)  => "UInt32",
            Value::Int32(_)   => "Int32",
            Value::Float32(_) => "Float",
            Value::Bool(_)    => "Bool",
            Value::String(_)  => "String",
            Value::UInt64(_)  => "UInt64",
            Value::Int64(_)   => "Int64",
            Value::Double(_)  => "Double",
            Value::Unknown(_) => "Unknown Type",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::UInt8(v)   => write!(f, "{v}"),
            Value::Int8(v)    => write!(f, "{v}"),
            Value::UInt16(v)  => write!(f, "{v}"),
            Value::Int16(v)   => write!(f, "{v}"),
            Value::UInt32(v)  => write!(f, "{v}"),
            Value::Int32(v)   => write!(f, "{v}"),
            Value::Float32(v) => write!(f, "{v}"),
            Value::Bool(true)  => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::String(v)  => f.write_str(v),
            Value::UInt64(v)  => write!(f, "{v}"),
            Value::Int64(v)   => write!(f, "{v}"),
            Value::Double(v)  => write!(f, "{v:.4}"),
            Value::Unknown(t) => write!(f, "<unknown type {t}>"),
        }
    }
}

impl serde::Serialize for Value {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::UInt8(v)   => serializer.serialize_u8(*v),
            Value::Int8(v)    => serializer.serialize_i8(*v),
            Value::UInt16(v)  => serializer.serialize_u16(*v),
            Value::Int16(v)   => serializer.serialize_i16(*v),
            Value::UInt32(v)  => serializer.serialize_u32(*v),
            Value::Int32(v)   => serializer.serialize_i32(*v),
            Value::Float32(v) => serializer.serialize_f32(*v),
            Value::Bool(v)    => serializer.serialize_bool(*v),
            Value::String(v)  => serializer.serialize_str(v),
            Value::UInt64(v)  => serializer.serialize_u64(*v),
            Value::Int64(v)   => serializer.serialize_i64(*v),
            Value::Double(v)  => serializer.serialize_f64(*v),
            Value::Unknown(_) => serializer.serialize_str(self.type_name()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self { Value::String(s.to_owned()) }
}
impl From<String> for Value {
    fn from(s: String) -> Self { Value::String(s) }
}
impl From<bool> for Value {
    fn from(v: bool) -> Self { Value::Bool(v) }
}
impl From<i64> for Value {
    fn from(v: i64) -> Self { Value::Int64(v) }
}
impl From<f64> for Value {
    fn from(v: f64) -> Self { Value::Double(v) }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct KeyValuePair {
    pub key: String,
    pub value: Value,
}

impl KeyValuePair {
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self { key: key.into(), value: value.into() }
    }
}

/// Metadata for one section, as named in the mini-language.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SectionMetadata {
    pub section_name: String,
    /// Insertion-ordered; keys are unique.
    pub items: Vec<KeyValuePair>,
}

impl SectionMetadata {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.items.iter().find(|kv| kv.key == key).map(|kv| &kv.value)
    }
}

/// Type a raw value string: bool, then i64, then f64, else string.
///
/// Numbers may carry surrounding whitespace and `_` digit separators
/// (` 5`, `1_000`); a value that falls through to a string is kept verbatim.
pub fn parse_value(raw: &str) -> Result<Value, MetadataError> {
    if raw.eq_ignore_ascii_case("true") {
        return Ok(Value::Bool(true));
    }
    if raw.eq_ignore_ascii_case("false") {
        return Ok(Value::Bool(false));
    }
    if let Some(number) = numeric_form(raw) {
        if is_integer_literal(&number) {
            return number
                .parse::<i64>()
                .map(Value::Int64)
                .map_err(|_| MetadataError::IntegerOutOfRange(raw.to_owned()));
        }
        if let Ok(f) = number.parse::<f64>() {
            return Ok(Value::Double(f));
        }
    }
    Ok(Value::String(raw.to_owned()))
}

/// `raw` trimmed with its digit separators removed, or `None` when an `_`
/// is not between two digits.
fn numeric_form(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let bytes = trimmed.as_bytes();
    let mut out = String::with_capacity(trimmed.len());
    for (i, c) in trimmed.char_indices() {
        if c == '_' {
            let before = i.checked_sub(1).and_then(|j| bytes.get(j));
            let after = bytes.get(i + 1);
            match (before, after) {
                (Some(b), Some(a)) if b.is_ascii_digit() && a.is_ascii_digit() => continue,
                _ => return None,
            }
        }
        out.push(c);
    }
    Some(out)
}

fn is_integer_literal(s: &str) -> bool {
    let digits = s.strip_prefix(['+', '-']).unwrap_or(s);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Parse the section metadata mini-language.
///
/// An empty string yields no sections.  Empty `;`-segments are skipped.
/// `name:` declares a section with no items.
pub fn parse_section_metadata(input: &str) -> Result<Vec<SectionMetadata>, MetadataError> {
    let mut sections = Vec::new();

    for segment in input.split(';').filter(|s| !s.is_empty()) {
        let (section_name, pairs) = segment
            .split_once(':')
            .ok_or_else(|| MetadataError::InvalidSection(segment.to_owned()))?;

        let mut section = SectionMetadata {
            section_name: section_name.to_owned(),
            items: Vec::new(),
        };
        if !pairs.is_empty() {
            for pair in pairs.split(',') {
                let (key, raw) = pair
                    .split_once('=')
                    .ok_or_else(|| MetadataError::InvalidKeyValue(pair.to_owned()))?;
                if section.get(key).is_some() {
                    return Err(MetadataError::DuplicateKey {
                        section: section.section_name,
                        key: key.to_owned(),
                    });
                }
                section.items.push(KeyValuePair::new(key, parse_value(raw)?));
            }
        }
        sections.push(section);
    }

    Ok(sections)
}
