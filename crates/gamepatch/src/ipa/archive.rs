//! IPA archive creation.
//!
//! Repacks an extracted working root into a new IPA (ZIP) container,
//! mirroring the on-disk tree verbatim: every directory, file, and symlink
//! appears in the output at its path relative to the root.
//!
//! For the reverse operation, see the [`extract`](super::extract) module.

use crate::{Error, Result};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// ZIP compression level for IPA creation.
///
/// Controls the trade-off between compression speed and output file size.
/// Use the provided constants for common use cases, or [`CompressionLevel::new`]
/// for custom levels.
///
/// # Examples
///
/// ```
/// use gamepatch::ipa::CompressionLevel;
///
/// let fast = CompressionLevel::NONE;        // Stored, no compression
/// let balanced = CompressionLevel::DEFAULT; // Level 6
/// let small = CompressionLevel::MAX;        // Maximum compression
///
/// let custom = CompressionLevel::new(3);
/// assert_eq!(custom.level(), 3);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct CompressionLevel(u32);

impl CompressionLevel {
    /// No compression (level 0); entries are stored.
    pub const NONE: CompressionLevel = CompressionLevel(0);

    /// Default DEFLATE compression (level 6).
    pub const DEFAULT: CompressionLevel = CompressionLevel(6);

    /// Maximum compression (level 9).
    pub const MAX: CompressionLevel = CompressionLevel(9);

    /// Creates a compression level from 0-9.
    ///
    /// Values greater than 9 are clamped to 9.
    #[must_use]
    pub fn new(level: u32) -> Self {
        CompressionLevel(level.min(9))
    }

    /// Returns the compression level value (0-9).
    #[must_use]
    pub fn level(&self) -> u32 {
        self.0
    }
}

impl Default for CompressionLevel {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl From<u32> for CompressionLevel {
    fn from(level: u32) -> Self {
        CompressionLevel::new(level)
    }
}

/// Creates an IPA container from an extracted working root.
///
/// Walks the working root and writes every entry at its root-relative
/// path, matching the structure [`extract_ipa`](super::extract_ipa)
/// produced. Directory entries are emitted even when empty; symlinks are
/// stored as symlinks, not followed.
///
/// # Arguments
///
/// * `working_root` - Directory tree to archive
/// * `output_path` - Path for the output IPA file
/// * `compression_level` - ZIP compression level (see [`CompressionLevel`])
///
/// # Errors
///
/// Returns [`Error::Io`] if:
/// - The working root doesn't exist or is not a directory (including a
///   root that vanished mid-operation)
/// - The output file cannot be created
/// - Any file cannot be read during archiving
///
/// Returns [`Error::Zip`] if the ZIP archive cannot be written.
pub fn create_ipa(
    working_root: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    compression_level: CompressionLevel,
) -> Result<()> {
    let working_root = working_root.as_ref();
    let output_path = output_path.as_ref();

    if !working_root.exists() {
        return Err(Error::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("working root not found: {}", working_root.display()),
        )));
    }

    if !working_root.is_dir() {
        return Err(Error::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("not a directory: {}", working_root.display()),
        )));
    }

    if let Some(parent) = output_path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }

    let file = File::create(output_path)?;
    let mut zip = ZipWriter::new(file);

    let options = if compression_level.level() == 0 {
        SimpleFileOptions::default().compression_method(CompressionMethod::Stored)
    } else {
        SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(compression_level.level() as i64))
    };

    // Walk the working root and add all entries - don't follow symlinks.
    for entry in WalkDir::new(working_root).min_depth(1).follow_links(false) {
        let entry = entry.map_err(|e| {
            Error::Io(io::Error::other(format!("failed to walk directory: {e}")))
        })?;

        let path = entry.path();
        let relative_path = path.strip_prefix(working_root).map_err(|_| {
            Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "failed to compute relative path",
            ))
        })?;

        // ZIP entry paths always use forward slashes.
        let archive_path = relative_path
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        // Check the entry type without following links.
        let metadata = fs::symlink_metadata(path)?;

        if metadata.is_dir() {
            zip.add_directory(format!("{archive_path}/"), options)
                .map_err(Error::Zip)?;
        } else if metadata.file_type().is_symlink() {
            let target = fs::read_link(path)?;
            let target_str = target.to_string_lossy();

            zip.add_symlink(&archive_path, target_str, options)
                .map_err(Error::Zip)?;
        } else {
            #[cfg(unix)]
            let options = {
                use std::os::unix::fs::PermissionsExt;
                let mode = metadata.permissions().mode();
                options.unix_permissions(mode)
            };

            zip.start_file(&archive_path, options).map_err(Error::Zip)?;

            let mut file = File::open(path)?;
            let mut buffer = Vec::new();
            file.read_to_end(&mut buffer)?;
            zip.write_all(&buffer)?;
        }
    }

    zip.finish().map_err(Error::Zip)?;

    log::debug!(
        "repacked {} into {}",
        working_root.display(),
        output_path.display()
    );

    Ok(())
}
