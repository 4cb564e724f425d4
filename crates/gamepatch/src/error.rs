//! Error types for gamepatch operations.
//!
//! This module defines the [`enum@Error`] enum covering all failure cases
//! in archive patching and property-list conversion, including I/O,
//! archive, bundle-location, and codec errors.
//!
//! # See Also
//!
//! - [`crate::Result`] - Convenience type alias using this error

use thiserror::Error;

/// Error type for gamepatch operations.
///
/// All public functions in this crate return [`crate::Result<T>`], which uses this error type.
/// Match on variants to handle specific failure cases.
///
/// # Examples
///
/// ```no_run
/// use gamepatch::{GamePatch, Error};
///
/// let result = GamePatch::new().patch("input.ipa", "out");
/// match result {
///     Ok(path) => println!("Patched: {}", path.display()),
///     Err(Error::BundleNotFound(msg)) => eprintln!("No app bundle: {msg}"),
///     Err(Error::Io(e)) => eprintln!("IO error: {e}"),
///     Err(e) => eprintln!("Other error: {e}"),
/// }
/// ```
#[derive(Debug, Error)]
pub enum Error {
    /// I/O operation failed.
    ///
    /// Occurs when reading input files, writing output files, or accessing
    /// the filesystem during a patch or conversion operation.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// ZIP archive operation failed.
    ///
    /// Occurs during IPA extraction or repacking. See [`crate::ipa`] module.
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Malformed or unusable container.
    ///
    /// The archive was readable as a ZIP but violates the expected IPA
    /// structure (e.g. no `Payload/` directory, unsafe entry paths).
    #[error("Invalid archive: {0}")]
    Archive(String),

    /// No `.app` bundle directory found under `Payload/`.
    #[error("App bundle not found: {0}")]
    BundleNotFound(String),

    /// More than one `.app` bundle directory found under `Payload/`.
    ///
    /// Exactly one bundle is required; the caller must disambiguate rather
    /// than have one picked by enumeration order.
    #[error("Ambiguous app bundle: {0}")]
    AmbiguousBundle(String),

    /// XML property list is not well-formed or uses an unrecognized tag.
    #[error("Plist parse error: {0}")]
    PlistParse(String),

    /// Binary property list has an inconsistent trailer or object table.
    ///
    /// Covers out-of-range offsets, invalid reference widths, truncated
    /// objects, cyclic object references, and object kinds outside the
    /// supported value set.
    #[error("Plist format error: {0}")]
    PlistFormat(String),

    /// Decoded property list violates a structural requirement.
    ///
    /// E.g. the bundle metadata root is not a dictionary.
    #[error("Plist decode error: {0}")]
    PlistDecode(String),

    /// Property list value could not be encoded.
    ///
    /// E.g. an integer does not fit a declared width.
    #[error("Plist encode error: {0}")]
    PlistEncode(String),
}
