//! IPA extraction functionality.
//!
//! Opens the container as a ZIP structure and materializes every entry
//! under a destination directory, preserving relative paths, directory
//! entries, symlinks, and Unix permission bits.

use crate::{Error, Result};
use memmap2::Mmap;
use rayon::prelude::*;
use std::fs::{self, File};
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zip::ZipArchive;

/// Entry metadata for parallel extraction
struct ExtractEntry {
    index: usize,
    outpath: PathBuf,
    is_dir: bool,
    is_symlink: bool,
    #[cfg(unix)]
    unix_mode: Option<u32>,
}

/// Extract an IPA container to a destination directory.
///
/// Every entry is written at its archive-relative path under `dest_dir`;
/// directory entries are created even when empty, so repacking the
/// destination reproduces the original entry set.
///
/// # Arguments
///
/// * `ipa_path` - Path to the IPA file
/// * `dest_dir` - Destination directory for extraction
///
/// # Errors
///
/// Returns an error if:
/// - The IPA file cannot be opened or read
/// - The IPA is not a valid ZIP archive
/// - An entry path would escape the destination directory
/// - Extraction fails due to I/O errors
pub fn extract_ipa(ipa_path: impl AsRef<Path>, dest_dir: impl AsRef<Path>) -> Result<()> {
    let ipa_path = ipa_path.as_ref();
    let dest_dir = dest_dir.as_ref();

    if !ipa_path.exists() {
        return Err(Error::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("IPA file not found: {}", ipa_path.display()),
        )));
    }

    // Memory-map the container for cheap shared access across threads.
    let file = File::open(ipa_path)?;
    let mmap = unsafe { Mmap::map(&file)? };
    let mmap = Arc::new(mmap);

    let cursor = Cursor::new(&mmap[..]);
    let mut archive = ZipArchive::new(cursor).map_err(Error::Zip)?;

    fs::create_dir_all(dest_dir)?;

    // First pass: collect entry metadata and the directory set.
    let mut entries: Vec<ExtractEntry> = Vec::with_capacity(archive.len());
    let mut dirs_to_create: Vec<PathBuf> = Vec::new();

    for i in 0..archive.len() {
        let file = archive.by_index(i).map_err(Error::Zip)?;

        let outpath = match file.enclosed_name() {
            Some(path) => dest_dir.join(path),
            None => {
                return Err(Error::Archive(format!(
                    "entry {:?} escapes the extraction root",
                    file.name()
                )))
            }
        };

        #[cfg(unix)]
        let unix_mode = file.unix_mode();

        #[cfg(unix)]
        let is_symlink = unix_mode
            .map(|mode| (mode & 0o170000) == 0o120000)
            .unwrap_or(false);

        #[cfg(not(unix))]
        let is_symlink = false;

        if file.is_dir() {
            dirs_to_create.push(outpath.clone());
            entries.push(ExtractEntry {
                index: i,
                outpath,
                is_dir: true,
                is_symlink: false,
                #[cfg(unix)]
                unix_mode,
            });
        } else {
            if let Some(parent) = outpath.parent() {
                if !dirs_to_create.contains(&parent.to_path_buf()) {
                    dirs_to_create.push(parent.to_path_buf());
                }
            }
            entries.push(ExtractEntry {
                index: i,
                outpath,
                is_dir: false,
                is_symlink,
                #[cfg(unix)]
                unix_mode,
            });
        }
    }

    // Create all directories first (sequential, fast).
    for dir in &dirs_to_create {
        fs::create_dir_all(dir)?;
    }

    let file_entries: Vec<_> = entries.into_iter().filter(|e| !e.is_dir).collect();

    // Parallel extraction of file contents.
    file_entries
        .par_iter()
        .try_for_each(|entry| -> Result<()> {
            // Each thread gets its own cursor into the mmap.
            let cursor = Cursor::new(&mmap[..]);
            let mut archive = ZipArchive::new(cursor).map_err(Error::Zip)?;
            let mut file = archive.by_index(entry.index).map_err(Error::Zip)?;

            #[cfg(unix)]
            if entry.is_symlink {
                let mut target = String::new();
                file.read_to_string(&mut target)?;

                if entry.outpath.exists() || entry.outpath.symlink_metadata().is_ok() {
                    let _ = fs::remove_file(&entry.outpath);
                }

                use std::os::unix::fs::symlink;
                symlink(&target, &entry.outpath)?;
                return Ok(());
            }

            let mut outfile = File::create(&entry.outpath)?;
            io::copy(&mut file, &mut outfile)?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Some(mode) = entry.unix_mode {
                    let perms = mode & 0o7777;
                    fs::set_permissions(&entry.outpath, fs::Permissions::from_mode(perms))?;
                }
            }

            Ok(())
        })?;

    log::debug!(
        "extracted {} entries from {} into {}",
        file_entries.len() + dirs_to_create.len(),
        ipa_path.display(),
        dest_dir.display()
    );

    Ok(())
}

/// Validate that a path is a plausible IPA container.
///
/// Checks that the file exists and has a ZIP signature.
pub fn validate_ipa(ipa_path: impl AsRef<Path>) -> Result<()> {
    let ipa_path = ipa_path.as_ref();

    if !ipa_path.exists() {
        return Err(Error::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("IPA file not found: {}", ipa_path.display()),
        )));
    }

    // ZIP magic: PK\x03\x04 or PK\x05\x06 (empty) or PK\x07\x08 (spanned)
    let mut file = File::open(ipa_path)?;
    let mut magic = [0u8; 4];
    file.read_exact(&mut magic)?;

    if &magic[0..2] != b"PK" {
        return Err(Error::Archive(format!(
            "{} is not a ZIP container",
            ipa_path.display()
        )));
    }

    Ok(())
}
