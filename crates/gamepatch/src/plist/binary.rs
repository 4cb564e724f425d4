//! Binary property-list (`bplist00`) encoder and decoder.
//!
//! The binary layout is an 8-byte `bplist00` header, a flat table of
//! variably-sized encoded objects, an offset table mapping object index to
//! byte offset, and a 32-byte big-endian trailer:
//!
//! - 6 unused bytes (the last of which carries sort-version 0)
//! - 1-byte offset-table entry size
//! - 1-byte object-reference size
//! - 8-byte object count
//! - 8-byte root object index
//! - 8-byte offset-table start offset
//!
//! Object markers put the kind in the high nibble and a count (or count
//! escape `0xF`, followed by an inline integer) in the low nibble:
//!
//! - `0x08` / `0x09`: false / true
//! - `0x1n`: integer, `2^n` bytes
//! - `0x2n`: real, `2^n` bytes
//! - `0x33`: date, 8-byte double of seconds since 2001-01-01T00:00:00Z
//! - `0x4n`: data, `n` bytes
//! - `0x5n`: ASCII string, `n` bytes
//! - `0x6n`: UTF-16BE string, `n` code units
//! - `0xAn`: array of `n` object references
//! - `0xDn`: dictionary of `n` key references then `n` value references
//!
//! Scalars are deduplicated in the object table; collections are emitted
//! once per occurrence. The decoder validates trailer geometry and every
//! offset/reference it follows, and fails on reference cycles instead of
//! looping.

use crate::plist::{Dictionary, Value};
use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

/// Magic prefix of every binary property list.
const MAGIC: &[u8; 8] = b"bplist00";

/// Trailer length in bytes.
const TRAILER_LEN: usize = 32;

/// 2001-01-01T00:00:00Z as a Unix timestamp; binary dates are seconds
/// relative to this instant.
const EPOCH_2001_UNIX: i64 = 978_307_200;

/// Container nesting bound for hostile input.
const MAX_DEPTH: usize = 512;

const MARKER_FALSE: u8 = 0x08;
const MARKER_TRUE: u8 = 0x09;
const MARKER_INT: u8 = 0x10;
const MARKER_REAL: u8 = 0x20;
const MARKER_DATE: u8 = 0x33;
const MARKER_DATA: u8 = 0x40;
const MARKER_ASCII: u8 = 0x50;
const MARKER_UTF16: u8 = 0x60;
const MARKER_ARRAY: u8 = 0xA0;
const MARKER_DICT: u8 = 0xD0;

fn reference_epoch() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(EPOCH_2001_UNIX, 0).unwrap_or_default()
}

fn date_to_seconds(date: &DateTime<Utc>) -> f64 {
    let delta = *date - reference_epoch();
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        None => delta.num_seconds() as f64,
    }
}

fn date_from_seconds(seconds: f64) -> Result<DateTime<Utc>> {
    let micros = (seconds * 1_000_000.0).round();
    if !micros.is_finite() || micros < i64::MIN as f64 || micros > i64::MAX as f64 {
        return Err(Error::PlistFormat(format!(
            "date value {seconds} out of representable range"
        )));
    }
    Ok(reference_epoch() + Duration::microseconds(micros as i64))
}

// ---------------------------------------------------------------------------
// Encoder
// ---------------------------------------------------------------------------

/// Flattened object-table entry: scalars carry their value, collections
/// carry references into the table.
enum FlatObject {
    Scalar(Value),
    Array(Vec<usize>),
    Dictionary(Vec<usize>, Vec<usize>),
}

/// Hashable identity of a scalar, used to deduplicate the object table.
#[derive(Hash, PartialEq, Eq)]
enum ScalarKey {
    Boolean(bool),
    Integer(i64),
    Real(u64),
    String(String),
    Date(u64),
    Data(Vec<u8>),
}

impl ScalarKey {
    fn for_value(value: &Value) -> Option<ScalarKey> {
        match value {
            Value::Boolean(b) => Some(ScalarKey::Boolean(*b)),
            Value::Integer(i) => Some(ScalarKey::Integer(*i)),
            Value::Real(r) => Some(ScalarKey::Real(r.to_bits())),
            Value::String(s) => Some(ScalarKey::String(s.clone())),
            Value::Date(d) => Some(ScalarKey::Date(date_to_seconds(d).to_bits())),
            Value::Data(d) => Some(ScalarKey::Data(d.clone())),
            Value::Array(_) | Value::Dictionary(_) => None,
        }
    }
}

struct Flattener {
    objects: Vec<FlatObject>,
    dedup: HashMap<ScalarKey, usize>,
}

impl Flattener {
    fn new() -> Self {
        Self {
            objects: Vec::new(),
            dedup: HashMap::new(),
        }
    }

    /// Assign an object-table index to `value`, reusing the entry of an
    /// identical scalar seen before. Containers are numbered before their
    /// children so the root keeps index 0.
    fn flatten(&mut self, value: &Value) -> usize {
        if let Some(key) = ScalarKey::for_value(value) {
            if let Some(&idx) = self.dedup.get(&key) {
                return idx;
            }
            let idx = self.objects.len();
            self.objects.push(FlatObject::Scalar(value.clone()));
            self.dedup.insert(key, idx);
            return idx;
        }

        match value {
            Value::Array(items) => {
                let idx = self.objects.len();
                self.objects.push(FlatObject::Array(Vec::new()));
                let refs: Vec<usize> = items.iter().map(|item| self.flatten(item)).collect();
                self.objects[idx] = FlatObject::Array(refs);
                idx
            }
            Value::Dictionary(dict) => {
                let idx = self.objects.len();
                self.objects.push(FlatObject::Dictionary(Vec::new(), Vec::new()));
                let key_refs: Vec<usize> = dict
                    .iter()
                    .map(|(k, _)| self.flatten(&Value::String(k.to_string())))
                    .collect();
                let value_refs: Vec<usize> = dict.iter().map(|(_, v)| self.flatten(v)).collect();
                self.objects[idx] = FlatObject::Dictionary(key_refs, value_refs);
                idx
            }
            _ => unreachable!("scalars handled above"),
        }
    }
}

/// Minimum of {1,2,4,8} bytes able to hold `value`.
fn count_to_size(value: u64) -> u8 {
    if value < 1 << 8 {
        1
    } else if value < 1 << 16 {
        2
    } else if value < 1 << 32 {
        4
    } else {
        8
    }
}

/// Append `value` big-endian in exactly `size` bytes.
fn push_sized_uint(out: &mut Vec<u8>, value: u64, size: u8) {
    let bytes = value.to_be_bytes();
    out.extend_from_slice(&bytes[8 - size as usize..]);
}

/// Append a marker byte, escaping counts of 15 or more into an inline
/// integer token.
fn push_marker(out: &mut Vec<u8>, marker: u8, count: usize) {
    if count < 15 {
        out.push(marker | count as u8);
    } else {
        out.push(marker | 0x0F);
        push_uint_token(out, count as u64);
    }
}

/// Append an integer token (`0x1n` marker plus payload) for a
/// non-negative value.
fn push_uint_token(out: &mut Vec<u8>, value: u64) {
    let size = count_to_size(value);
    match size {
        1 => out.push(MARKER_INT),
        2 => out.push(MARKER_INT | 0x01),
        4 => out.push(MARKER_INT | 0x02),
        _ => out.push(MARKER_INT | 0x03),
    }
    push_sized_uint(out, value, size);
}

fn push_integer(out: &mut Vec<u8>, value: i64) {
    if value < 0 {
        // Negative values always take the full 8-byte two's-complement form.
        out.push(MARKER_INT | 0x03);
        out.extend_from_slice(&value.to_be_bytes());
    } else {
        push_uint_token(out, value as u64);
    }
}

fn push_object(out: &mut Vec<u8>, object: &FlatObject, ref_size: u8) {
    match object {
        FlatObject::Scalar(Value::Boolean(false)) => out.push(MARKER_FALSE),
        FlatObject::Scalar(Value::Boolean(true)) => out.push(MARKER_TRUE),
        FlatObject::Scalar(Value::Integer(i)) => push_integer(out, *i),
        FlatObject::Scalar(Value::Real(r)) => {
            out.push(MARKER_REAL | 0x03);
            out.extend_from_slice(&r.to_be_bytes());
        }
        FlatObject::Scalar(Value::Date(d)) => {
            out.push(MARKER_DATE);
            out.extend_from_slice(&date_to_seconds(d).to_be_bytes());
        }
        FlatObject::Scalar(Value::Data(bytes)) => {
            push_marker(out, MARKER_DATA, bytes.len());
            out.extend_from_slice(bytes);
        }
        FlatObject::Scalar(Value::String(s)) => {
            if s.is_ascii() {
                push_marker(out, MARKER_ASCII, s.len());
                out.extend_from_slice(s.as_bytes());
            } else {
                let units: Vec<u16> = s.encode_utf16().collect();
                push_marker(out, MARKER_UTF16, units.len());
                for unit in units {
                    out.extend_from_slice(&unit.to_be_bytes());
                }
            }
        }
        FlatObject::Scalar(Value::Array(_) | Value::Dictionary(_)) => {
            unreachable!("collections are flattened, not stored as scalars")
        }
        FlatObject::Array(refs) => {
            push_marker(out, MARKER_ARRAY, refs.len());
            for &r in refs {
                push_sized_uint(out, r as u64, ref_size);
            }
        }
        FlatObject::Dictionary(key_refs, value_refs) => {
            push_marker(out, MARKER_DICT, key_refs.len());
            for &r in key_refs.iter().chain(value_refs.iter()) {
                push_sized_uint(out, r as u64, ref_size);
            }
        }
    }
}

/// Encode a value tree as a `bplist00` document.
///
/// The object table is flat and scalar-deduplicated; reference and
/// offset-entry widths are the minimum able to address the object count
/// and the largest offset respectively.
pub fn encode(value: &Value) -> Result<Vec<u8>> {
    let mut flattener = Flattener::new();
    let top = flattener.flatten(value);
    let objects = flattener.objects;

    let num_objects = objects.len() as u64;
    let ref_size = count_to_size(num_objects);

    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);

    let mut offsets = Vec::with_capacity(objects.len());
    for object in &objects {
        offsets.push(out.len() as u64);
        push_object(&mut out, object, ref_size);
    }

    let offset_table_offset = out.len() as u64;
    let offset_size = count_to_size(offset_table_offset);
    for &offset in &offsets {
        push_sized_uint(&mut out, offset, offset_size);
    }

    // Trailer: 6 unused bytes (sort-version 0), sizes, then three u64s.
    out.extend_from_slice(&[0u8; 6]);
    out.push(offset_size);
    out.push(ref_size);
    out.extend_from_slice(&num_objects.to_be_bytes());
    out.extend_from_slice(&(top as u64).to_be_bytes());
    out.extend_from_slice(&offset_table_offset.to_be_bytes());

    Ok(out)
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// Bounds-checked cursor over the document body.
struct BinaryReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BinaryReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        BinaryReader { data, pos: 0 }
    }

    fn seek(&mut self, offset: usize) -> Result<()> {
        if offset > self.data.len() {
            return Err(Error::PlistFormat(
                "offset past end of document".to_string(),
            ));
        }
        self.pos = offset;
        Ok(())
    }

    fn read_u8(&mut self) -> Result<u8> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or_else(|| Error::PlistFormat("unexpected end of document".to_string()))?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| Error::PlistFormat("unexpected end of document".to_string()))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    /// Big-endian unsigned integer of 1..=8 bytes.
    fn read_sized_uint(&mut self, size: u8) -> Result<u64> {
        let bytes = self.read_bytes(size as usize)?;
        let mut value = 0u64;
        for &b in bytes {
            value = (value << 8) | u64::from(b);
        }
        Ok(value)
    }
}

struct Parser<'a> {
    reader: BinaryReader<'a>,
    offsets: Vec<u64>,
    ref_size: u8,
    /// Marks objects currently being decoded; a reference back into this
    /// set is a cycle.
    in_flight: Vec<bool>,
}

impl<'a> Parser<'a> {
    /// Object count or element length; the `0xF` low nibble escapes to an
    /// inline integer token.
    fn read_count(&mut self, low_nibble: u8) -> Result<usize> {
        if low_nibble != 0x0F {
            return Ok(low_nibble as usize);
        }
        let marker = self.reader.read_u8()?;
        if marker & 0xF0 != MARKER_INT {
            return Err(Error::PlistFormat(format!(
                "expected integer count token, found marker 0x{marker:02x}"
            )));
        }
        let size = 1usize
            .checked_shl(u32::from(marker & 0x0F))
            .filter(|&s| s <= 8)
            .ok_or_else(|| Error::PlistFormat("count token too wide".to_string()))?;
        let count = self.reader.read_sized_uint(size as u8)?;
        usize::try_from(count)
            .map_err(|_| Error::PlistFormat("count exceeds addressable range".to_string()))
    }

    fn read_ref(&mut self) -> Result<usize> {
        let r = self.reader.read_sized_uint(self.ref_size)?;
        let r = usize::try_from(r)
            .map_err(|_| Error::PlistFormat("object reference out of range".to_string()))?;
        if r >= self.offsets.len() {
            return Err(Error::PlistFormat(format!(
                "object reference {r} out of range ({} objects)",
                self.offsets.len()
            )));
        }
        Ok(r)
    }

    fn decode_object(&mut self, index: usize, depth: usize) -> Result<Value> {
        if depth > MAX_DEPTH {
            return Err(Error::PlistFormat("nesting too deep".to_string()));
        }
        if self.in_flight[index] {
            return Err(Error::PlistFormat(format!(
                "cyclic reference to object {index}"
            )));
        }

        self.reader.seek(self.offsets[index] as usize)?;
        let marker = self.reader.read_u8()?;
        let low = marker & 0x0F;

        match marker & 0xF0 {
            0x00 => match marker {
                MARKER_FALSE => Ok(Value::Boolean(false)),
                MARKER_TRUE => Ok(Value::Boolean(true)),
                _ => Err(Error::PlistFormat(format!(
                    "unsupported object marker 0x{marker:02x}"
                ))),
            },
            MARKER_INT => {
                let size = 1usize
                    .checked_shl(u32::from(low))
                    .filter(|&s| s <= 8)
                    .ok_or_else(|| {
                        Error::PlistFormat("integer wider than 8 bytes".to_string())
                    })?;
                // 1/2/4-byte integers are unsigned; the 8-byte form is
                // two's-complement signed. Both are the raw bits as i64.
                let raw = self.reader.read_sized_uint(size as u8)?;
                Ok(Value::Integer(raw as i64))
            }
            MARKER_REAL => match low {
                0x02 => {
                    let bytes = self.reader.read_bytes(4)?;
                    let mut buf = [0u8; 4];
                    buf.copy_from_slice(bytes);
                    Ok(Value::Real(f64::from(f32::from_be_bytes(buf))))
                }
                0x03 => {
                    let bytes = self.reader.read_bytes(8)?;
                    let mut buf = [0u8; 8];
                    buf.copy_from_slice(bytes);
                    Ok(Value::Real(f64::from_be_bytes(buf)))
                }
                _ => Err(Error::PlistFormat(format!(
                    "unsupported real width marker 0x{marker:02x}"
                ))),
            },
            0x30 => {
                if marker != MARKER_DATE {
                    return Err(Error::PlistFormat(format!(
                        "unsupported object marker 0x{marker:02x}"
                    )));
                }
                let bytes = self.reader.read_bytes(8)?;
                let mut buf = [0u8; 8];
                buf.copy_from_slice(bytes);
                Ok(Value::Date(date_from_seconds(f64::from_be_bytes(buf))?))
            }
            MARKER_DATA => {
                let len = self.read_count(low)?;
                Ok(Value::Data(self.reader.read_bytes(len)?.to_vec()))
            }
            MARKER_ASCII => {
                let len = self.read_count(low)?;
                let bytes = self.reader.read_bytes(len)?;
                let s = std::str::from_utf8(bytes)
                    .map_err(|e| Error::PlistFormat(format!("invalid string bytes: {e}")))?;
                Ok(Value::String(s.to_string()))
            }
            MARKER_UTF16 => {
                let units = self.read_count(low)?;
                let byte_len = units
                    .checked_mul(2)
                    .ok_or_else(|| Error::PlistFormat("string length overflow".to_string()))?;
                let bytes = self.reader.read_bytes(byte_len)?;
                let code_units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                    .collect();
                let s = String::from_utf16(&code_units)
                    .map_err(|e| Error::PlistFormat(format!("invalid UTF-16 string: {e}")))?;
                Ok(Value::String(s))
            }
            MARKER_ARRAY => {
                let len = self.read_count(low)?;
                let refs: Vec<usize> = (0..len)
                    .map(|_| self.read_ref())
                    .collect::<Result<_>>()?;

                self.in_flight[index] = true;
                let mut items = Vec::with_capacity(len);
                for r in refs {
                    items.push(self.decode_object(r, depth + 1)?);
                }
                self.in_flight[index] = false;
                Ok(Value::Array(items))
            }
            MARKER_DICT => {
                let len = self.read_count(low)?;
                let key_refs: Vec<usize> = (0..len)
                    .map(|_| self.read_ref())
                    .collect::<Result<_>>()?;
                let value_refs: Vec<usize> = (0..len)
                    .map(|_| self.read_ref())
                    .collect::<Result<_>>()?;

                self.in_flight[index] = true;
                let mut dict = Dictionary::new();
                for (kr, vr) in key_refs.into_iter().zip(value_refs) {
                    let key = match self.decode_object(kr, depth + 1)? {
                        Value::String(s) => s,
                        other => {
                            return Err(Error::PlistFormat(format!(
                                "dictionary key is not a string: {other:?}"
                            )))
                        }
                    };
                    let value = self.decode_object(vr, depth + 1)?;
                    dict.insert(key, value);
                }
                self.in_flight[index] = false;
                Ok(Value::Dictionary(dict))
            }
            _ => Err(Error::PlistFormat(format!(
                "unsupported object marker 0x{marker:02x}"
            ))),
        }
    }
}

/// Decode a `bplist00` document.
///
/// Validates the header, trailer geometry, and every offset and object
/// reference before following it; malformed input fails with
/// [`Error::PlistFormat`] rather than panicking or looping.
pub fn decode(bytes: &[u8]) -> Result<Value> {
    if bytes.len() < MAGIC.len() + TRAILER_LEN {
        return Err(Error::PlistFormat("document too short".to_string()));
    }
    if !bytes.starts_with(b"bplist") || !bytes[6].is_ascii_digit() || !bytes[7].is_ascii_digit() {
        return Err(Error::PlistFormat("missing bplist header".to_string()));
    }

    let trailer = &bytes[bytes.len() - TRAILER_LEN..];
    let offset_size = trailer[6];
    let ref_size = trailer[7];
    let num_objects = u64::from_be_bytes(trailer[8..16].try_into().map_err(trailer_err)?);
    let top = u64::from_be_bytes(trailer[16..24].try_into().map_err(trailer_err)?);
    let table_offset = u64::from_be_bytes(trailer[24..32].try_into().map_err(trailer_err)?);

    if !(1..=8).contains(&offset_size) || !(1..=8).contains(&ref_size) {
        return Err(Error::PlistFormat(format!(
            "invalid trailer widths (offset {offset_size}, ref {ref_size})"
        )));
    }
    if num_objects == 0 {
        return Err(Error::PlistFormat("empty object table".to_string()));
    }
    if top >= num_objects {
        return Err(Error::PlistFormat(format!(
            "root index {top} out of range ({num_objects} objects)"
        )));
    }

    let body_len = (bytes.len() - TRAILER_LEN) as u64;
    let table_len = num_objects
        .checked_mul(u64::from(offset_size))
        .ok_or_else(|| Error::PlistFormat("offset table length overflow".to_string()))?;
    if table_offset < MAGIC.len() as u64 || table_offset.saturating_add(table_len) > body_len {
        return Err(Error::PlistFormat(format!(
            "offset table [{table_offset}, +{table_len}] outside document body"
        )));
    }

    let num_objects = num_objects as usize;
    let mut reader = BinaryReader::new(&bytes[..bytes.len() - TRAILER_LEN]);
    reader.seek(table_offset as usize)?;
    let mut offsets = Vec::with_capacity(num_objects);
    for _ in 0..num_objects {
        let offset = reader.read_sized_uint(offset_size)?;
        if offset < MAGIC.len() as u64 || offset >= table_offset {
            return Err(Error::PlistFormat(format!(
                "object offset {offset} outside object area"
            )));
        }
        offsets.push(offset);
    }

    let mut parser = Parser {
        reader,
        offsets,
        ref_size,
        in_flight: vec![false; num_objects],
    };
    parser.decode_object(top as usize, 0)
}

fn trailer_err(_: std::array::TryFromSliceError) -> Error {
    Error::PlistFormat("truncated trailer".to_string())
}
