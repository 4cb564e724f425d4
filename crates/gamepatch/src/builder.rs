//! GamePatch builder API
//!
//! Provides a builder pattern interface for IPA patching operations.

use crate::bundle::GAME_MODE_KEY;
use crate::ipa::{CompressionLevel, IpaPatcher};
use crate::plist::Value;
use crate::Result;
use std::path::{Path, PathBuf};

/// IPA capability patcher with builder pattern API.
///
/// By default the patcher forces `GCSupportsGameMode` to `true`, the one
/// transformation the tool exists for; both the key and the desired value
/// can be overridden.
///
/// # Example
///
/// ```no_run
/// use gamepatch::GamePatch;
///
/// let output = GamePatch::new()
///     .compression_level(9)
///     .patch("MyApp.ipa", "out")?;
/// println!("{}", output.display());
/// # Ok::<(), gamepatch::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct GamePatch {
    capability_key: String,
    desired_value: Value,
    compression_level: CompressionLevel,
}

impl GamePatch {
    /// Create a new GamePatch builder with the default capability key
    /// (`GCSupportsGameMode`) and desired value (`true`).
    pub fn new() -> Self {
        Self {
            capability_key: GAME_MODE_KEY.to_string(),
            desired_value: Value::Boolean(true),
            compression_level: CompressionLevel::DEFAULT,
        }
    }

    /// Set the metadata key to force.
    pub fn capability_key(mut self, key: impl Into<String>) -> Self {
        self.capability_key = key.into();
        self
    }

    /// Set the value the key is forced to.
    pub fn desired_value(mut self, value: impl Into<Value>) -> Self {
        self.desired_value = value.into();
        self
    }

    /// Set ZIP compression level for the output IPA (0-9).
    ///
    /// 0 = no compression (fastest), 9 = maximum compression (smallest).
    /// Default is 6 (balanced).
    pub fn compression_level(mut self, level: u32) -> Self {
        self.compression_level = CompressionLevel::new(level);
        self
    }

    /// Patch an IPA file.
    ///
    /// Extracts the container into a scoped working root, forces the
    /// configured key in the bundle's `Info.plist` (preserving the
    /// metadata file's original encoding), and repacks everything into
    /// `modified_<input-file-name>` inside `output_dir`. The working root
    /// is removed whether the operation succeeds or fails.
    ///
    /// # Arguments
    ///
    /// * `input` - Path to the input IPA file
    /// * `output_dir` - Directory to place the patched IPA in
    ///
    /// # Errors
    ///
    /// Returns an error if extraction, bundle location, metadata
    /// patching, or repacking fails.
    pub fn patch(&self, input: impl AsRef<Path>, output_dir: impl AsRef<Path>) -> Result<PathBuf> {
        IpaPatcher::new(self.capability_key.clone(), self.desired_value.clone())
            .compression_level(self.compression_level)
            .patch(input, output_dir)
    }
}

impl Default for GamePatch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let patcher = GamePatch::default();
        assert_eq!(patcher.capability_key, GAME_MODE_KEY);
        assert_eq!(patcher.desired_value, Value::Boolean(true));
        assert_eq!(patcher.compression_level.level(), 6);
    }

    #[test]
    fn test_builder_chain() {
        let patcher = GamePatch::new()
            .capability_key("SomeOtherFlag")
            .desired_value(false)
            .compression_level(9);

        assert_eq!(patcher.capability_key, "SomeOtherFlag");
        assert_eq!(patcher.desired_value, Value::Boolean(false));
        assert_eq!(patcher.compression_level.level(), 9);
    }

    #[test]
    fn test_builder_clamps_compression() {
        let patcher = GamePatch::new().compression_level(42);
        assert_eq!(patcher.compression_level.level(), 9);
    }

    #[test]
    fn test_patch_missing_input() {
        let result = GamePatch::new().patch("/nonexistent/app.ipa", "/tmp");
        assert!(result.is_err());
    }
}
