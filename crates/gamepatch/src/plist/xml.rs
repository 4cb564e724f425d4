//! XML property-list encoder and decoder.
//!
//! Produces and consumes the conventional plist 1.0 markup: an XML
//! declaration, the Apple DOCTYPE, a `<plist version="1.0">` wrapper, and
//! the scalar/collection tag vocabulary (`dict`/`key`, `array`, `string`,
//! `integer`, `real`, `true`, `false`, `date`, `data`).
//!
//! Dates use the ISO-8601 `%Y-%m-%dT%H:%M:%SZ` form; data payloads are
//! base64. Dictionary key order is preserved both ways.

use crate::plist::{Dictionary, Value};
use crate::{Error, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

const DOCTYPE: &str = r#"plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd""#;

const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Container nesting bound for hostile input.
const MAX_DEPTH: usize = 512;

fn werr(e: impl std::fmt::Display) -> Error {
    Error::PlistEncode(e.to_string())
}

fn rerr(e: impl std::fmt::Display) -> Error {
    Error::PlistParse(e.to_string())
}

// ---------------------------------------------------------------------------
// Encoder
// ---------------------------------------------------------------------------

/// Encode a value tree as a plist 1.0 XML document.
pub fn encode(value: &Value) -> Result<Vec<u8>> {
    let mut writer = Writer::new_with_indent(Vec::new(), b'\t', 1);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(werr)?;
    writer
        .write_event(Event::DocType(BytesText::from_escaped(DOCTYPE)))
        .map_err(werr)?;

    let mut plist = BytesStart::new("plist");
    plist.push_attribute(("version", "1.0"));
    writer.write_event(Event::Start(plist)).map_err(werr)?;

    write_value(&mut writer, value)?;

    writer
        .write_event(Event::End(BytesEnd::new("plist")))
        .map_err(werr)?;

    let mut out = writer.into_inner();
    out.push(b'\n');
    Ok(out)
}

fn write_value(writer: &mut Writer<Vec<u8>>, value: &Value) -> Result<()> {
    match value {
        Value::Boolean(true) => writer
            .write_event(Event::Empty(BytesStart::new("true")))
            .map_err(werr),
        Value::Boolean(false) => writer
            .write_event(Event::Empty(BytesStart::new("false")))
            .map_err(werr),
        Value::Integer(i) => write_text_element(writer, "integer", &i.to_string()),
        Value::Real(r) => write_text_element(writer, "real", &format_real(*r)),
        Value::String(s) => write_text_element(writer, "string", s),
        Value::Date(d) => write_text_element(writer, "date", &d.format(DATE_FORMAT).to_string()),
        Value::Data(bytes) => write_text_element(writer, "data", &BASE64.encode(bytes)),
        Value::Array(items) => {
            if items.is_empty() {
                return writer
                    .write_event(Event::Empty(BytesStart::new("array")))
                    .map_err(werr);
            }
            writer
                .write_event(Event::Start(BytesStart::new("array")))
                .map_err(werr)?;
            for item in items {
                write_value(writer, item)?;
            }
            writer
                .write_event(Event::End(BytesEnd::new("array")))
                .map_err(werr)
        }
        Value::Dictionary(dict) => {
            if dict.is_empty() {
                return writer
                    .write_event(Event::Empty(BytesStart::new("dict")))
                    .map_err(werr);
            }
            writer
                .write_event(Event::Start(BytesStart::new("dict")))
                .map_err(werr)?;
            for (key, item) in dict.iter() {
                write_text_element(writer, "key", key)?;
                write_value(writer, item)?;
            }
            writer
                .write_event(Event::End(BytesEnd::new("dict")))
                .map_err(werr)
        }
    }
}

fn write_text_element(writer: &mut Writer<Vec<u8>>, tag: &str, text: &str) -> Result<()> {
    writer
        .write_event(Event::Start(BytesStart::new(tag)))
        .map_err(werr)?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .map_err(werr)?;
    writer
        .write_event(Event::End(BytesEnd::new(tag)))
        .map_err(werr)
}

/// Format a real so that `str::parse::<f64>` reads back the same value.
fn format_real(r: f64) -> String {
    if r.is_finite() && r == r.trunc() && r.abs() < 1e15 {
        // Keep a decimal point on integral values, as the conventional
        // writers do.
        format!("{r:.1}")
    } else {
        format!("{r}")
    }
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// Decode a plist 1.0 XML document.
///
/// Accepts a `<plist>`-wrapped document or a bare root value element.
/// Fails with [`Error::PlistParse`] on malformed markup or an
/// unrecognized tag.
pub fn decode(bytes: &[u8]) -> Result<Value> {
    let mut parser = XmlParser {
        reader: Reader::from_reader(bytes),
        buf: Vec::new(),
    };

    let mut root = None;
    let mut in_plist = false;

    loop {
        match parser.next_event()? {
            OwnedEvent::Start(name) => {
                if name == b"plist" && root.is_none() && !in_plist {
                    in_plist = true;
                } else if root.is_none() {
                    root = Some(parser.parse_value(&name, false, 0)?);
                } else {
                    return Err(Error::PlistParse(format!(
                        "unexpected second root element <{}>",
                        String::from_utf8_lossy(&name)
                    )));
                }
            }
            OwnedEvent::Empty(name) => {
                if root.is_none() {
                    root = Some(parser.parse_value(&name, true, 0)?);
                } else {
                    return Err(Error::PlistParse(format!(
                        "unexpected second root element <{}>",
                        String::from_utf8_lossy(&name)
                    )));
                }
            }
            OwnedEvent::End(name) => {
                if name == b"plist" && in_plist {
                    in_plist = false;
                } else {
                    return Err(Error::PlistParse(format!(
                        "unexpected closing tag </{}>",
                        String::from_utf8_lossy(&name)
                    )));
                }
            }
            OwnedEvent::Text(text) if text.trim().is_empty() => {}
            OwnedEvent::Text(text) => {
                return Err(Error::PlistParse(format!(
                    "unexpected text at document level: {text:?}"
                )))
            }
            OwnedEvent::Eof => break,
        }
    }

    root.ok_or_else(|| Error::PlistParse("document contains no value".to_string()))
}

/// Owned, simplified view of a quick-xml event; keeps the borrow checker
/// out of the recursive descent.
#[derive(Debug)]
enum OwnedEvent {
    Start(Vec<u8>),
    End(Vec<u8>),
    Empty(Vec<u8>),
    Text(String),
    Eof,
}

struct XmlParser<'a> {
    reader: Reader<&'a [u8]>,
    buf: Vec<u8>,
}

impl XmlParser<'_> {
    fn next_event(&mut self) -> Result<OwnedEvent> {
        loop {
            self.buf.clear();
            let event = self.reader.read_event_into(&mut self.buf).map_err(rerr)?;
            return Ok(match event {
                Event::Start(e) => OwnedEvent::Start(e.local_name().as_ref().to_vec()),
                Event::End(e) => OwnedEvent::End(e.local_name().as_ref().to_vec()),
                Event::Empty(e) => OwnedEvent::Empty(e.local_name().as_ref().to_vec()),
                Event::Text(e) => OwnedEvent::Text(e.unescape().map_err(rerr)?.into_owned()),
                Event::CData(e) => OwnedEvent::Text(
                    String::from_utf8(e.into_inner().into_owned()).map_err(rerr)?,
                ),
                Event::Eof => OwnedEvent::Eof,
                // Declarations, DOCTYPE, comments, and processing
                // instructions carry no plist content.
                Event::Decl(_) | Event::DocType(_) | Event::Comment(_) | Event::PI(_) => continue,
            });
        }
    }

    /// Parse the value whose opening tag (`name`) was just consumed.
    fn parse_value(&mut self, name: &[u8], empty: bool, depth: usize) -> Result<Value> {
        if depth > MAX_DEPTH {
            return Err(Error::PlistParse("nesting too deep".to_string()));
        }
        match name {
            b"true" => {
                if !empty {
                    self.expect_end(b"true")?;
                }
                Ok(Value::Boolean(true))
            }
            b"false" => {
                if !empty {
                    self.expect_end(b"false")?;
                }
                Ok(Value::Boolean(false))
            }
            b"integer" => {
                let text = self.element_text(b"integer", empty)?;
                text.trim()
                    .parse::<i64>()
                    .map(Value::Integer)
                    .map_err(|e| Error::PlistParse(format!("invalid integer {text:?}: {e}")))
            }
            b"real" => {
                let text = self.element_text(b"real", empty)?;
                text.trim()
                    .parse::<f64>()
                    .map(Value::Real)
                    .map_err(|e| Error::PlistParse(format!("invalid real {text:?}: {e}")))
            }
            b"string" => Ok(Value::String(self.element_text(b"string", empty)?)),
            b"date" => {
                let text = self.element_text(b"date", empty)?;
                parse_date(text.trim()).map(Value::Date)
            }
            b"data" => {
                let text = self.element_text(b"data", empty)?;
                let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
                BASE64
                    .decode(compact.as_bytes())
                    .map(Value::Data)
                    .map_err(|e| Error::PlistParse(format!("invalid base64 data: {e}")))
            }
            b"array" => {
                if empty {
                    return Ok(Value::Array(Vec::new()));
                }
                let mut items = Vec::new();
                loop {
                    match self.next_event()? {
                        OwnedEvent::Start(child) => {
                            items.push(self.parse_value(&child, false, depth + 1)?);
                        }
                        OwnedEvent::Empty(child) => {
                            items.push(self.parse_value(&child, true, depth + 1)?);
                        }
                        OwnedEvent::End(tag) if tag == b"array" => break,
                        OwnedEvent::Text(text) if text.trim().is_empty() => {}
                        other => {
                            return Err(Error::PlistParse(format!(
                                "unexpected content in array: {other:?}"
                            )))
                        }
                    }
                }
                Ok(Value::Array(items))
            }
            b"dict" => {
                if empty {
                    return Ok(Value::Dictionary(Dictionary::new()));
                }
                let mut dict = Dictionary::new();
                loop {
                    match self.next_event()? {
                        OwnedEvent::Start(tag) if tag == b"key" => {
                            let key = self.element_text(b"key", false)?;
                            let value = loop {
                                match self.next_event()? {
                                    OwnedEvent::Start(child) => {
                                        break self.parse_value(&child, false, depth + 1)?
                                    }
                                    OwnedEvent::Empty(child) => {
                                        break self.parse_value(&child, true, depth + 1)?
                                    }
                                    OwnedEvent::Text(text) if text.trim().is_empty() => {}
                                    other => {
                                        return Err(Error::PlistParse(format!(
                                            "key {key:?} has no value: {other:?}"
                                        )))
                                    }
                                }
                            };
                            dict.insert(key, value);
                        }
                        OwnedEvent::Empty(tag) if tag == b"key" => {
                            return Err(Error::PlistParse("empty dictionary key".to_string()));
                        }
                        OwnedEvent::End(tag) if tag == b"dict" => break,
                        OwnedEvent::Text(text) if text.trim().is_empty() => {}
                        other => {
                            return Err(Error::PlistParse(format!(
                                "unexpected content in dict: {other:?}"
                            )))
                        }
                    }
                }
                Ok(Value::Dictionary(dict))
            }
            other => Err(Error::PlistParse(format!(
                "unrecognized tag <{}>",
                String::from_utf8_lossy(other)
            ))),
        }
    }

    /// Text content of a scalar element up to its closing tag.
    fn element_text(&mut self, tag: &[u8], empty: bool) -> Result<String> {
        if empty {
            return Ok(String::new());
        }
        let mut text = String::new();
        loop {
            match self.next_event()? {
                OwnedEvent::Text(chunk) => text.push_str(&chunk),
                OwnedEvent::End(name) if name == tag => return Ok(text),
                other => {
                    return Err(Error::PlistParse(format!(
                        "unexpected content in <{}>: {other:?}",
                        String::from_utf8_lossy(tag)
                    )))
                }
            }
        }
    }

    fn expect_end(&mut self, tag: &[u8]) -> Result<()> {
        match self.next_event()? {
            OwnedEvent::End(name) if name == tag => Ok(()),
            other => Err(Error::PlistParse(format!(
                "expected </{}>, found {other:?}",
                String::from_utf8_lossy(tag)
            ))),
        }
    }
}

fn parse_date(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| Error::PlistParse(format!("invalid date {text:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn roundtrip(v: Value) {
        let bytes = encode(&v).unwrap();
        assert_eq!(decode(&bytes).unwrap(), v, "roundtrip of {v:?}");
    }

    #[test]
    fn test_roundtrip_scalars() {
        roundtrip(Value::Boolean(true));
        roundtrip(Value::Boolean(false));
        roundtrip(Value::Integer(-12345));
        roundtrip(Value::Integer(i64::MAX));
        roundtrip(Value::Real(3.25));
        roundtrip(Value::Real(-1.0));
        roundtrip(Value::String(String::new()));
        roundtrip(Value::String("with <angle> & ampersand".to_string()));
        roundtrip(Value::String("  padded  ".to_string()));
        roundtrip(Value::Data(vec![1, 2, 3, 250]));
        roundtrip(Value::Data(Vec::new()));
        roundtrip(Value::Date(
            Utc.with_ymd_and_hms(2023, 3, 14, 1, 59, 26).unwrap(),
        ));
    }

    #[test]
    fn test_roundtrip_collections() {
        roundtrip(Value::Array(Vec::new()));
        roundtrip(Value::Dictionary(Dictionary::new()));

        let mut dict = Dictionary::new();
        dict.insert("zebra", Value::from("last by name, first by order"));
        dict.insert("apple", Value::Integer(1));
        dict.insert("empty", Value::Array(Vec::new()));
        roundtrip(Value::Dictionary(dict));
    }

    #[test]
    fn test_key_order_preserved() {
        let mut dict = Dictionary::new();
        dict.insert("b", Value::Integer(1));
        dict.insert("a", Value::Integer(2));
        let bytes = encode(&Value::Dictionary(dict)).unwrap();
        let decoded = decode(&bytes).unwrap();
        let keys: Vec<String> = decoded
            .as_dictionary()
            .unwrap()
            .iter()
            .map(|(k, _)| k.to_string())
            .collect();
        assert_eq!(keys, vec!["b", "a"]);
    }

    #[test]
    fn test_decode_conventional_document() {
        let doc = br#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>CFBundleIdentifier</key>
    <string>com.test.app</string>
    <key>CFBundleVersion</key>
    <string>7</string>
    <key>GCSupportsGameMode</key>
    <false/>
    <key>Devices</key>
    <array>
        <integer>1</integer>
        <integer>2</integer>
    </array>
</dict>
</plist>"#;
        let value = decode(doc).unwrap();
        let dict = value.as_dictionary().unwrap();
        assert_eq!(
            dict.get("CFBundleIdentifier").and_then(Value::as_string),
            Some("com.test.app")
        );
        assert_eq!(
            dict.get("GCSupportsGameMode").and_then(Value::as_boolean),
            Some(false)
        );
        assert_eq!(
            dict.get("Devices"),
            Some(&Value::Array(vec![Value::Integer(1), Value::Integer(2)]))
        );
    }

    #[test]
    fn test_decode_rejects_unknown_tag() {
        let doc = b"<plist version=\"1.0\"><widget>3</widget></plist>";
        let err = decode(doc).unwrap_err();
        assert!(matches!(err, Error::PlistParse(ref msg) if msg.contains("widget")));
    }

    #[test]
    fn test_decode_rejects_malformed_markup() {
        assert!(decode(b"<plist><dict>").is_err());
        assert!(decode(b"not xml at all").is_err());
        assert!(decode(b"<plist version=\"1.0\"></plist>").is_err());
    }

    #[test]
    fn test_decode_rejects_bad_scalars() {
        assert!(decode(b"<integer>twelve</integer>").is_err());
        assert!(decode(b"<date>yesterday</date>").is_err());
        assert!(decode(b"<data>!!!</data>").is_err());
    }

    #[test]
    fn test_data_with_wrapped_base64() {
        let doc = b"<data>\n\tAAEC\n\tAwQF\n</data>";
        assert_eq!(
            decode(doc).unwrap(),
            Value::Data(vec![0, 1, 2, 3, 4, 5])
        );
    }

    #[test]
    fn test_real_formatting() {
        assert_eq!(format_real(1.0), "1.0");
        assert_eq!(format_real(-2.5), "-2.5");
        assert_eq!(format_real(0.1), "0.1");
    }
}
