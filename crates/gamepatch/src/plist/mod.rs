//! Property-list handling module.
//!
//! Provides the [`Value`] tree together with encoders and decoders for the
//! two on-disk property-list representations: the XML text form
//! ([`xml`]) and the `bplist00` binary form ([`binary`]).
//!
//! Format detection is content-based: binary property lists begin with an
//! 8-byte `bplist` magic plus two ASCII version digits; anything else is
//! treated as XML.

pub mod binary;
pub mod xml;

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};

/// On-disk property-list representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// `bplist00` binary form.
    Binary,
    /// XML text form (plist 1.0 markup).
    Xml,
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Format::Binary => write!(f, "binary"),
            Format::Xml => write!(f, "xml"),
        }
    }
}

/// A property-list value.
///
/// Explicit tagged union over the scalar and collection kinds both
/// representations can express. Both codec directions match exhaustively
/// on this enum, so an unsupported kind is a compile error rather than a
/// runtime surprise.
///
/// Equality is structural: dictionary key sets and nested structure,
/// numeric values, and every byte of a data value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// `<true/>` / `<false/>`.
    Boolean(bool),
    /// Signed 64-bit integer.
    Integer(i64),
    /// IEEE double.
    Real(f64),
    /// UTF-8 text.
    String(String),
    /// Absolute timestamp.
    Date(DateTime<Utc>),
    /// Raw byte sequence.
    Data(Vec<u8>),
    /// Ordered sequence of values.
    Array(Vec<Value>),
    /// String-keyed mapping, insertion order preserved.
    Dictionary(Dictionary),
}

impl Value {
    /// Decode a property list from raw bytes, auto-detecting the format.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PlistFormat`] for a malformed binary document and
    /// [`Error::PlistParse`] for malformed XML.
    pub fn from_bytes(bytes: &[u8]) -> Result<Value> {
        Self::from_bytes_as(bytes, detect_format(bytes))
    }

    /// Decode a property list from raw bytes in a known format.
    ///
    /// Unlike [`Value::from_bytes`] this does not sniff the content: bytes
    /// that do not match `format` are an error.
    pub fn from_bytes_as(bytes: &[u8], format: Format) -> Result<Value> {
        match format {
            Format::Binary => binary::decode(bytes),
            Format::Xml => xml::decode(bytes),
        }
    }

    /// Encode the value tree into the requested format.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PlistEncode`] if the tree cannot be represented.
    pub fn to_bytes(&self, format: Format) -> Result<Vec<u8>> {
        match format {
            Format::Binary => binary::encode(self),
            Format::Xml => xml::encode(self),
        }
    }

    /// Borrow the value as a dictionary, if it is one.
    pub fn as_dictionary(&self) -> Option<&Dictionary> {
        match self {
            Value::Dictionary(d) => Some(d),
            _ => None,
        }
    }

    /// Mutably borrow the value as a dictionary, if it is one.
    pub fn as_dictionary_mut(&mut self) -> Option<&mut Dictionary> {
        match self {
            Value::Dictionary(d) => Some(d),
            _ => None,
        }
    }

    /// Borrow the value as a string slice, if it is one.
    pub fn as_string(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Return the boolean value, if it is one.
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

/// String-keyed mapping with unique keys and stable insertion order.
///
/// The XML representation preserves key order, so the map is backed by an
/// ordered pair list rather than a hash map. Lookups are linear, which is
/// fine at Info.plist scale.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dictionary {
    entries: Vec<(String, Value)>,
}

impl Dictionary {
    /// Create an empty dictionary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a value by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Insert a key/value pair, returning the previous value if the key
    /// was already present. An existing key keeps its position.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        let key = key.into();
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(std::mem::replace(&mut slot.1, value))
        } else {
            self.entries.push((key, value));
            None
        }
    }

    /// Remove a key, returning its value if it was present.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the dictionary has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(key, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl FromIterator<(String, Value)> for Dictionary {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        let mut dict = Dictionary::new();
        for (k, v) in iter {
            dict.insert(k, v);
        }
        dict
    }
}

impl IntoIterator for Dictionary {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Detect the on-disk format of a property-list byte buffer.
///
/// Binary property lists begin with `bplist` followed by two ASCII version
/// digits; everything else is assumed to be the XML text form.
pub fn detect_format(bytes: &[u8]) -> Format {
    if bytes.len() >= 8
        && bytes.starts_with(b"bplist")
        && bytes[6].is_ascii_digit()
        && bytes[7].is_ascii_digit()
    {
        Format::Binary
    } else {
        Format::Xml
    }
}

/// Convert a property-list file between representations.
///
/// Reads `input`, decodes it (in `source` if given, auto-detected
/// otherwise), re-encodes it in `target`, and writes the result to
/// `output`.
///
/// # Arguments
///
/// * `input` - Path of the file to convert
/// * `source` - Expected source format, or `None` to auto-detect
/// * `target` - Format to produce
/// * `output` - Path for the converted file
///
/// # Returns
///
/// The output path, for caller convenience.
///
/// # Errors
///
/// Returns an error if the input cannot be read or decoded, or the output
/// cannot be written. A `source` hint that does not match the file content
/// is a decode error, not a silent fallback.
pub fn convert_file(
    input: impl AsRef<Path>,
    source: Option<Format>,
    target: Format,
    output: impl AsRef<Path>,
) -> Result<PathBuf> {
    let input = input.as_ref();
    let output = output.as_ref();

    let bytes = fs::read(input)?;

    let detected = detect_format(&bytes);
    if let Some(hint) = source {
        if hint != detected {
            return Err(Error::PlistDecode(format!(
                "{} is {} but {} was requested as the source format",
                input.display(),
                detected,
                hint
            )));
        }
    }

    let value = Value::from_bytes_as(&bytes, detected)?;
    let encoded = value.to_bytes(target)?;
    fs::write(output, encoded)?;

    log::info!(
        "converted {} ({}) -> {} ({})",
        input.display(),
        detected,
        output.display(),
        target
    );

    Ok(output.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn sample_tree() -> Value {
        let mut dict = Dictionary::new();
        dict.insert("CFBundleIdentifier", Value::from("com.example.app"));
        dict.insert("CFBundleVersion", Value::from("1.2.3"));
        dict.insert("GCSupportsGameMode", Value::from(false));
        dict.insert("LSMinimumSystemVersion", Value::Real(14.5));
        dict.insert("BuildNumber", Value::from(42i64));
        dict.insert(
            "BuildDate",
            Value::Date(Utc.with_ymd_and_hms(2024, 6, 1, 12, 30, 0).unwrap()),
        );
        dict.insert("Seed", Value::Data(vec![0xde, 0xad, 0xbe, 0xef]));
        dict.insert(
            "UIDeviceFamily",
            Value::Array(vec![Value::from(1i64), Value::from(2i64)]),
        );
        Value::Dictionary(dict)
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(detect_format(b"bplist00\x09"), Format::Binary);
        assert_eq!(detect_format(b"<?xml version=\"1.0\"?>"), Format::Xml);
        assert_eq!(detect_format(b"bplist"), Format::Xml); // truncated magic
        assert_eq!(detect_format(b"bplistXY"), Format::Xml); // bad version digits
    }

    #[test]
    fn test_roundtrip_binary() {
        let v = sample_tree();
        let bytes = v.to_bytes(Format::Binary).unwrap();
        assert_eq!(detect_format(&bytes), Format::Binary);
        assert_eq!(Value::from_bytes(&bytes).unwrap(), v);
    }

    #[test]
    fn test_roundtrip_xml() {
        let v = sample_tree();
        let bytes = v.to_bytes(Format::Xml).unwrap();
        assert_eq!(detect_format(&bytes), Format::Xml);
        assert_eq!(Value::from_bytes(&bytes).unwrap(), v);
    }

    #[test]
    fn test_cross_format_equivalence() {
        let v = sample_tree();
        let from_binary = Value::from_bytes(&v.to_bytes(Format::Binary).unwrap()).unwrap();
        let from_xml = Value::from_bytes(&v.to_bytes(Format::Xml).unwrap()).unwrap();
        assert_eq!(from_binary, from_xml);
    }

    #[test]
    fn test_dictionary_insert_preserves_position() {
        let mut dict = Dictionary::new();
        dict.insert("a", Value::from(1i64));
        dict.insert("b", Value::from(2i64));
        let prev = dict.insert("a", Value::from(3i64));
        assert_eq!(prev, Some(Value::Integer(1)));
        let keys: Vec<&str> = dict.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_convert_file_xml_to_binary() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("in.plist");
        let output = temp.path().join("out.bplist");

        let v = sample_tree();
        fs::write(&input, v.to_bytes(Format::Xml).unwrap()).unwrap();

        let out = convert_file(&input, Some(Format::Xml), Format::Binary, &output).unwrap();
        assert_eq!(out, output);

        let converted = fs::read(&output).unwrap();
        assert_eq!(detect_format(&converted), Format::Binary);
        assert_eq!(Value::from_bytes(&converted).unwrap(), v);
    }

    #[test]
    fn test_convert_file_wrong_source_hint() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("in.plist");
        let output = temp.path().join("out.plist");

        fs::write(&input, sample_tree().to_bytes(Format::Xml).unwrap()).unwrap();

        let result = convert_file(&input, Some(Format::Binary), Format::Xml, &output);
        assert!(matches!(result, Err(Error::PlistDecode(_))));
    }
}
