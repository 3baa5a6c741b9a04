//! IPA archive creation.
//!
//! Repacks an extracted working tree (the directory holding `Payload/` and
//! any sibling entries such as `iTunesMetadata.plist`) into a new archive
//! with the same relative layout. For the reverse operation, see the
//! [`extract`](super::extract) module.
//!
//! # Examples
//!
//! ```no_run
//! use resign::ipa::{create_ipa, CompressionLevel};
//!
//! create_ipa("work", "output.ipa", CompressionLevel::DEFAULT)?;
//! # Ok::<(), resign::Error>(())
//! ```

use crate::{Error, Result};
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path};
use tempfile::NamedTempFile;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Deflate level for the output archive, 0 (stored) to 9.
///
/// ```
/// use resign::ipa::CompressionLevel;
///
/// assert_eq!(CompressionLevel::new(15).level(), 9);
/// assert_eq!(CompressionLevel::default(), CompressionLevel::DEFAULT);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionLevel(u32);

impl CompressionLevel {
    /// Entries are stored uncompressed.
    pub const NONE: CompressionLevel = CompressionLevel(0);

    /// Level 6.
    pub const DEFAULT: CompressionLevel = CompressionLevel(6);

    /// Level 9, smallest output.
    pub const MAX: CompressionLevel = CompressionLevel(9);

    /// Levels above 9 are clamped.
    #[must_use]
    pub fn new(level: u32) -> Self {
        CompressionLevel(level.min(9))
    }

    #[must_use]
    pub fn level(&self) -> u32 {
        self.0
    }

    fn file_options(self) -> SimpleFileOptions {
        if self.0 == 0 {
            SimpleFileOptions::default().compression_method(CompressionMethod::Stored)
        } else {
            SimpleFileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .compression_level(Some(i64::from(self.0)))
        }
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

/// Pack everything below `source_root` into `output_path`.
///
/// Entry names are relative to `source_root`. Symlinks are stored as links
/// and unix permissions are kept. The archive is written to a temporary file
/// next to `output_path` and moved into place once complete, so a failed run
/// never leaves a truncated output behind.
///
/// # Errors
///
/// - [`Error::Input`] if `source_root` is not a directory
/// - [`Error::Io`] if a file cannot be read or the output cannot be written
/// - [`Error::Zip`] if the archive cannot be written
pub fn create_ipa(
    source_root: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    compression_level: CompressionLevel,
) -> Result<()> {
    let source_root = source_root.as_ref();
    let output_path = output_path.as_ref();

    if !source_root.is_dir() {
        return Err(Error::Input(format!(
            "Not a directory: {}",
            source_root.display()
        )));
    }

    let parent = match output_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let mut zip = ZipWriter::new(NamedTempFile::new_in(parent)?);
    let options = compression_level.file_options();
    let mut entries = 0usize;

    for entry in WalkDir::new(source_root)
        .follow_links(false)
        .sort_by_file_name()
        .min_depth(1)
    {
        let entry = entry.map_err(|e| {
            Error::Io(io::Error::other(format!("Failed to walk directory: {}", e)))
        })?;
        let path = entry.path();
        let relative = path.strip_prefix(source_root).map_err(|_| {
            Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is outside {}", path.display(), source_root.display()),
            ))
        })?;
        let name = archive_name(relative);

        let metadata = fs::symlink_metadata(path)?;
        if metadata.is_dir() {
            zip.add_directory(format!("{}/", name), options)?;
        } else if metadata.file_type().is_symlink() {
            let target = fs::read_link(path)?;
            zip.add_symlink(name, target.to_string_lossy(), options)?;
        } else {
            zip.start_file(name, with_permissions(options, &metadata))?;
            io::copy(&mut File::open(path)?, &mut zip)?;
        }
        entries += 1;
    }

    let written = zip.finish()?;
    written
        .persist(output_path)
        .map_err(|e| Error::Io(e.error))?;

    log::debug!("Packed {} entries into {}", entries, output_path.display());
    Ok(())
}

/// `/`-separated archive name for a path relative to the source root.
fn archive_name(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(unix)]
fn with_permissions(options: SimpleFileOptions, metadata: &fs::Metadata) -> SimpleFileOptions {
    use std::os::unix::fs::PermissionsExt;
    options.unix_permissions(metadata.permissions().mode())
}

#[cfg(not(unix))]
fn with_permissions(options: SimpleFileOptions, _metadata: &fs::Metadata) -> SimpleFileOptions {
    options
}
