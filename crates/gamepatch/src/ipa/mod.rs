//! IPA handling module.
//!
//! Provides functionality for extracting, patching, and repacking IPA files.

pub mod archive;
pub mod extract;

pub use archive::{create_ipa, CompressionLevel};
pub use extract::{extract_ipa, validate_ipa};

use crate::bundle::{apply_patch, locate_app_bundle};
use crate::plist::Value;
use crate::{Error, Result};
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// IPA patching workflow.
///
/// This struct provides a high-level interface for patching IPA files,
/// handling the complete workflow of extraction, metadata mutation, and
/// repacking. The working root is a scoped temporary directory that is
/// removed when the operation finishes, whether it succeeded or failed.
pub struct IpaPatcher {
    /// Metadata key to force
    capability_key: String,
    /// Value the key is forced to
    desired_value: Value,
    /// Compression level for the output IPA
    compression_level: CompressionLevel,
}

impl IpaPatcher {
    /// Create a new IPA patcher for the given capability key and value.
    pub fn new(capability_key: impl Into<String>, desired_value: Value) -> Self {
        Self {
            capability_key: capability_key.into(),
            desired_value,
            compression_level: CompressionLevel::DEFAULT,
        }
    }

    /// Set the compression level for the output IPA.
    pub fn compression_level(mut self, level: CompressionLevel) -> Self {
        self.compression_level = level;
        self
    }

    /// Patch an IPA file.
    ///
    /// This performs the complete patching workflow:
    /// 1. Extract the IPA to a temporary working root
    /// 2. Find the single .app bundle in Payload/
    /// 3. Apply the capability mutation to its Info.plist, keeping the
    ///    metadata file's original encoding
    /// 4. Repack the working root into a new IPA
    ///
    /// The output container is named `modified_<input-file-name>` inside
    /// `output_dir`. All other entries are carried over byte-identical.
    ///
    /// # Arguments
    ///
    /// * `input_ipa` - Path to the input IPA file
    /// * `output_dir` - Directory to place the patched IPA in
    ///
    /// # Returns
    ///
    /// The path of the patched container.
    ///
    /// # Errors
    ///
    /// Returns an error if any step of the workflow fails. The temporary
    /// working root is removed on every exit path.
    pub fn patch(
        &self,
        input_ipa: impl AsRef<Path>,
        output_dir: impl AsRef<Path>,
    ) -> Result<PathBuf> {
        let input_ipa = input_ipa.as_ref();
        let output_dir = output_dir.as_ref();

        validate_ipa(input_ipa)?;

        let file_name = input_ipa
            .file_name()
            .ok_or_else(|| {
                Error::Io(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("input path has no file name: {}", input_ipa.display()),
                ))
            })?
            .to_string_lossy();
        let output_path = output_dir.join(format!("modified_{file_name}"));

        // Dropping the TempDir deletes the working root, so cleanup runs
        // on early error returns as well as on success.
        let temp_dir = TempDir::new().map_err(|e| {
            Error::Io(io::Error::other(format!(
                "failed to create temp directory: {e}"
            )))
        })?;

        extract_ipa(input_ipa, temp_dir.path())?;

        let app_bundle = locate_app_bundle(temp_dir.path())?;

        let previous = apply_patch(&app_bundle, &self.capability_key, &self.desired_value)?;
        log::debug!(
            "patched {} (previous value: {previous:?})",
            app_bundle.display()
        );

        create_ipa(temp_dir.path(), &output_path, self.compression_level)?;

        Ok(output_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{GAME_MODE_KEY, INFO_PLIST};
    use crate::plist::{Dictionary, Format};
    use std::fs;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    /// Create a minimal test IPA with the given Info.plist bytes.
    fn create_test_ipa(dir: &Path, info_plist: &[u8]) -> PathBuf {
        let ipa_path = dir.join("test.ipa");
        let file = fs::File::create(&ipa_path).unwrap();
        let mut zip = ZipWriter::new(file);

        let options = SimpleFileOptions::default();

        zip.add_directory("Payload/", options).unwrap();
        zip.add_directory("Payload/Test.app/", options).unwrap();

        zip.start_file("Payload/Test.app/Info.plist", options).unwrap();
        zip.write_all(info_plist).unwrap();

        zip.start_file("Payload/Test.app/Test", options).unwrap();
        zip.write_all(b"MACHO_PLACEHOLDER").unwrap();

        zip.finish().unwrap();

        ipa_path
    }

    fn xml_metadata() -> Vec<u8> {
        let mut dict = Dictionary::new();
        dict.insert("CFBundleIdentifier", Value::from("com.example.app"));
        Value::Dictionary(dict).to_bytes(Format::Xml).unwrap()
    }

    #[test]
    fn test_patch_workflow() {
        let temp_dir = TempDir::new().unwrap();
        let ipa_path = create_test_ipa(temp_dir.path(), &xml_metadata());
        let out_dir = temp_dir.path().join("out");

        let patcher = IpaPatcher::new(GAME_MODE_KEY, Value::Boolean(true));
        let output = patcher.patch(&ipa_path, &out_dir).unwrap();

        assert_eq!(
            output.file_name().unwrap().to_str().unwrap(),
            "modified_test.ipa"
        );
        assert!(output.exists());

        let verify_dir = temp_dir.path().join("verify");
        extract_ipa(&output, &verify_dir).unwrap();
        let raw = fs::read(verify_dir.join("Payload/Test.app").join(INFO_PLIST)).unwrap();
        let value = Value::from_bytes(&raw).unwrap();
        assert_eq!(
            value
                .as_dictionary()
                .unwrap()
                .get(GAME_MODE_KEY)
                .and_then(Value::as_boolean),
            Some(true)
        );
    }

    #[test]
    fn test_patch_missing_bundle() {
        let temp_dir = TempDir::new().unwrap();

        // A container whose Payload holds no .app directory.
        let ipa_path = temp_dir.path().join("empty.ipa");
        let file = fs::File::create(&ipa_path).unwrap();
        let mut zip = ZipWriter::new(file);
        zip.add_directory("Payload/", SimpleFileOptions::default())
            .unwrap();
        zip.finish().unwrap();

        let out_dir = temp_dir.path().join("out");
        let patcher = IpaPatcher::new(GAME_MODE_KEY, Value::Boolean(true));
        let result = patcher.patch(&ipa_path, &out_dir);

        assert!(matches!(result, Err(Error::BundleNotFound(_))));
        assert!(!out_dir.join("modified_empty.ipa").exists());
    }

    #[test]
    fn test_patch_rejects_non_zip() {
        let temp_dir = TempDir::new().unwrap();
        let bogus = temp_dir.path().join("bogus.ipa");
        fs::write(&bogus, b"plain text").unwrap();

        let patcher = IpaPatcher::new(GAME_MODE_KEY, Value::Boolean(true));
        assert!(patcher.patch(&bogus, temp_dir.path()).is_err());
    }
}
