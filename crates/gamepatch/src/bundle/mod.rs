//! App bundle handling module.
//!
//! Locates the `.app` bundle inside an extracted container and applies the
//! capability-flag patch to its `Info.plist`.

use crate::plist::{detect_format, Value};
use crate::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the bundle metadata file.
pub const INFO_PLIST: &str = "Info.plist";

/// The capability key this tool exists to force on.
pub const GAME_MODE_KEY: &str = "GCSupportsGameMode";

/// Name of the fixed container subdirectory holding the app bundle.
pub const PAYLOAD_DIR: &str = "Payload";

/// Find the single `.app` bundle inside the working root's `Payload/`
/// directory.
///
/// Entries are enumerated in lexicographic name order so the result does
/// not depend on filesystem enumeration order. Exactly one match is
/// required: zero is [`Error::BundleNotFound`] and two or more is
/// [`Error::AmbiguousBundle`] - the caller must disambiguate, the bundle
/// is never guessed.
pub fn locate_app_bundle(working_root: impl AsRef<Path>) -> Result<PathBuf> {
    let payload_dir = working_root.as_ref().join(PAYLOAD_DIR);

    if !payload_dir.is_dir() {
        return Err(Error::Archive(format!(
            "no {PAYLOAD_DIR}/ directory in container"
        )));
    }

    let mut matches: Vec<PathBuf> = Vec::new();
    for entry in fs::read_dir(&payload_dir)? {
        let entry = entry?;
        let path = entry.path();

        if path.is_dir() && path.extension().is_some_and(|ext| ext == "app") {
            matches.push(path);
        }
    }
    matches.sort();

    match matches.len() {
        0 => Err(Error::BundleNotFound(format!(
            "no .app directory under {PAYLOAD_DIR}/"
        ))),
        1 => {
            let bundle = matches.remove(0);
            log::debug!("located app bundle {}", bundle.display());
            Ok(bundle)
        }
        n => Err(Error::AmbiguousBundle(format!(
            "{n} .app directories under {PAYLOAD_DIR}/: {}",
            matches
                .iter()
                .filter_map(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join(", ")
        ))),
    }
}

/// Apply a keyed mutation to the bundle's `Info.plist`.
///
/// The metadata file is decoded in whatever format it is stored in and,
/// when a mutation is needed, re-encoded in that SAME format (binary stays
/// binary, XML stays XML). The mutation forces a capability flag on:
///
/// - key absent: inserted with `desired`
/// - key present as boolean `false` where `desired` is `true`: overwritten
/// - key present equal to `desired`: no-op, file left byte-for-byte intact
/// - key present with any other value: left unchanged
///
/// The no-mutation cases still count as a successful patch for the caller.
///
/// # Returns
///
/// The previous value of the key, if it was present.
///
/// # Errors
///
/// Returns [`Error::Io`] if the metadata file cannot be read or written,
/// the codec errors for malformed metadata, and [`Error::PlistDecode`] if
/// the metadata root is not a dictionary.
pub fn apply_patch(
    bundle_path: impl AsRef<Path>,
    key: &str,
    desired: &Value,
) -> Result<Option<Value>> {
    let info_plist_path = bundle_path.as_ref().join(INFO_PLIST);

    let raw = fs::read(&info_plist_path).map_err(|e| {
        Error::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read {}: {e}", info_plist_path.display()),
        ))
    })?;

    let format = detect_format(&raw);
    let mut root = Value::from_bytes_as(&raw, format)?;

    let dict = root.as_dictionary_mut().ok_or_else(|| {
        Error::PlistDecode(format!(
            "{} root is not a dictionary",
            info_plist_path.display()
        ))
    })?;

    let previous = dict.get(key).cloned();

    let mutate = match &previous {
        None => true,
        Some(current) if current == desired => false,
        // The tool only forces the flag on; a flag explicitly set to
        // anything other than false stays as the author left it.
        Some(Value::Boolean(false)) if *desired == Value::Boolean(true) => true,
        Some(_) => false,
    };

    if mutate {
        dict.insert(key, desired.clone());
        let encoded = root.to_bytes(format)?;
        fs::write(&info_plist_path, encoded)?;
        log::info!(
            "set {key} = {desired:?} in {} ({format} form)",
            info_plist_path.display()
        );
    } else {
        log::info!("{key} already satisfied in {}", info_plist_path.display());
    }

    Ok(previous)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plist::{Dictionary, Format};
    use tempfile::TempDir;

    fn make_bundle(root: &Path, name: &str) -> PathBuf {
        let bundle = root.join(PAYLOAD_DIR).join(name);
        fs::create_dir_all(&bundle).unwrap();
        bundle
    }

    fn write_info_plist(bundle: &Path, dict: Dictionary, format: Format) {
        let bytes = Value::Dictionary(dict).to_bytes(format).unwrap();
        fs::write(bundle.join(INFO_PLIST), bytes).unwrap();
    }

    fn read_info_plist(bundle: &Path) -> Value {
        Value::from_bytes(&fs::read(bundle.join(INFO_PLIST)).unwrap()).unwrap()
    }

    #[test]
    fn test_locate_single_bundle() {
        let temp = TempDir::new().unwrap();
        make_bundle(temp.path(), "Test.app");

        let found = locate_app_bundle(temp.path()).unwrap();
        assert!(found.ends_with("Payload/Test.app"));
    }

    #[test]
    fn test_locate_no_payload() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            locate_app_bundle(temp.path()),
            Err(Error::Archive(_))
        ));
    }

    #[test]
    fn test_locate_no_bundle() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join(PAYLOAD_DIR)).unwrap();

        assert!(matches!(
            locate_app_bundle(temp.path()),
            Err(Error::BundleNotFound(_))
        ));
    }

    #[test]
    fn test_locate_ambiguous_bundles() {
        let temp = TempDir::new().unwrap();
        make_bundle(temp.path(), "B.app");
        make_bundle(temp.path(), "A.app");

        let err = locate_app_bundle(temp.path()).unwrap_err();
        match err {
            Error::AmbiguousBundle(msg) => {
                // Lexicographic, not enumeration order.
                assert!(msg.contains("A.app, B.app"), "got: {msg}");
            }
            other => panic!("expected AmbiguousBundle, got {other:?}"),
        }
    }

    #[test]
    fn test_locate_ignores_non_app_entries() {
        let temp = TempDir::new().unwrap();
        make_bundle(temp.path(), "Test.app");
        fs::create_dir_all(temp.path().join(PAYLOAD_DIR).join("notes")).unwrap();
        fs::write(temp.path().join(PAYLOAD_DIR).join("stray.app"), b"a file").unwrap();

        let found = locate_app_bundle(temp.path()).unwrap();
        assert!(found.ends_with("Payload/Test.app"));
    }

    #[test]
    fn test_patch_inserts_missing_key() {
        let temp = TempDir::new().unwrap();
        let bundle = make_bundle(temp.path(), "Test.app");
        let mut dict = Dictionary::new();
        dict.insert("CFBundleIdentifier", Value::from("com.example.app"));
        write_info_plist(&bundle, dict, Format::Xml);

        let previous = apply_patch(&bundle, "GCSupportsGameMode", &Value::Boolean(true)).unwrap();
        assert_eq!(previous, None);

        let patched = read_info_plist(&bundle);
        let dict = patched.as_dictionary().unwrap();
        assert_eq!(
            dict.get("GCSupportsGameMode").and_then(Value::as_boolean),
            Some(true)
        );
        assert_eq!(
            dict.get("CFBundleIdentifier").and_then(Value::as_string),
            Some("com.example.app")
        );
    }

    #[test]
    fn test_patch_overwrites_false() {
        let temp = TempDir::new().unwrap();
        let bundle = make_bundle(temp.path(), "Test.app");
        let mut dict = Dictionary::new();
        dict.insert("GCSupportsGameMode", Value::Boolean(false));
        write_info_plist(&bundle, dict, Format::Binary);

        let previous = apply_patch(&bundle, "GCSupportsGameMode", &Value::Boolean(true)).unwrap();
        assert_eq!(previous, Some(Value::Boolean(false)));
        assert_eq!(
            read_info_plist(&bundle)
                .as_dictionary()
                .unwrap()
                .get("GCSupportsGameMode"),
            Some(&Value::Boolean(true))
        );
    }

    #[test]
    fn test_patch_preserves_format() {
        let temp = TempDir::new().unwrap();
        let bundle = make_bundle(temp.path(), "Test.app");
        let mut dict = Dictionary::new();
        dict.insert("CFBundleIdentifier", Value::from("com.example.app"));
        write_info_plist(&bundle, dict, Format::Binary);

        apply_patch(&bundle, "GCSupportsGameMode", &Value::Boolean(true)).unwrap();

        let raw = fs::read(bundle.join(INFO_PLIST)).unwrap();
        assert_eq!(detect_format(&raw), Format::Binary);
    }

    #[test]
    fn test_patch_already_true_is_byte_identical() {
        let temp = TempDir::new().unwrap();
        let bundle = make_bundle(temp.path(), "Test.app");

        // Hand-written XML, deliberately not this codec's canonical output.
        let doc = b"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<plist version=\"1.0\"><dict><key>GCSupportsGameMode</key><true/></dict></plist>";
        fs::write(bundle.join(INFO_PLIST), doc).unwrap();

        let previous = apply_patch(&bundle, "GCSupportsGameMode", &Value::Boolean(true)).unwrap();
        assert_eq!(previous, Some(Value::Boolean(true)));
        assert_eq!(fs::read(bundle.join(INFO_PLIST)).unwrap(), doc.to_vec());
    }

    #[test]
    fn test_patch_idempotent() {
        let temp = TempDir::new().unwrap();
        let bundle = make_bundle(temp.path(), "Test.app");
        let mut dict = Dictionary::new();
        dict.insert("GCSupportsGameMode", Value::Boolean(false));
        write_info_plist(&bundle, dict, Format::Xml);

        apply_patch(&bundle, "GCSupportsGameMode", &Value::Boolean(true)).unwrap();
        let after_first = fs::read(bundle.join(INFO_PLIST)).unwrap();

        apply_patch(&bundle, "GCSupportsGameMode", &Value::Boolean(true)).unwrap();
        let after_second = fs::read(bundle.join(INFO_PLIST)).unwrap();

        assert_eq!(after_first, after_second);
    }

    #[test]
    fn test_patch_leaves_other_values_alone() {
        let temp = TempDir::new().unwrap();
        let bundle = make_bundle(temp.path(), "Test.app");
        let mut dict = Dictionary::new();
        dict.insert("GCSupportsGameMode", Value::from("not a bool"));
        write_info_plist(&bundle, dict, Format::Xml);

        let previous = apply_patch(&bundle, "GCSupportsGameMode", &Value::Boolean(true)).unwrap();
        assert_eq!(previous, Some(Value::String("not a bool".to_string())));
        assert_eq!(
            read_info_plist(&bundle)
                .as_dictionary()
                .unwrap()
                .get("GCSupportsGameMode"),
            Some(&Value::String("not a bool".to_string()))
        );
    }

    #[test]
    fn test_patch_missing_metadata() {
        let temp = TempDir::new().unwrap();
        let bundle = make_bundle(temp.path(), "Test.app");

        let result = apply_patch(&bundle, "GCSupportsGameMode", &Value::Boolean(true));
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn test_patch_non_dictionary_root() {
        let temp = TempDir::new().unwrap();
        let bundle = make_bundle(temp.path(), "Test.app");
        let bytes = Value::Array(vec![Value::Integer(1)])
            .to_bytes(Format::Xml)
            .unwrap();
        fs::write(bundle.join(INFO_PLIST), bytes).unwrap();

        let result = apply_patch(&bundle, "GCSupportsGameMode", &Value::Boolean(true));
        assert!(matches!(result, Err(Error::PlistDecode(_))));
    }
}
