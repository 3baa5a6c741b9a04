//! IPA extraction.
//!
//! Unpacks an archive into a working directory, keeping directories, unix
//! permissions and symlinks, then locates the `.app` bundle under `Payload/`.
//! Nothing is ever written outside the working directory: symlinks must
//! resolve inside it, and no entry is written through a symlink.

use crate::bundle::BundleKind;
use crate::{Error, Result};
use memmap2::Mmap;
use std::fs::{self, File};
use std::io::{self, Cursor, Read};
use std::path::{Component, Path, PathBuf};
use zip::ZipArchive;

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

/// Extract every entry of `ipa_path` below `dest_dir`.
///
/// Entries whose names escape `dest_dir` are skipped. Returns the number of
/// entries written.
///
/// # Errors
///
/// - [`Error::Zip`] if the archive is not a readable ZIP
/// - [`Error::Input`] if a symlink points outside `dest_dir` or an entry
///   would be written through a symlink
/// - [`Error::Io`] if an entry cannot be written
pub fn extract_ipa(ipa_path: impl AsRef<Path>, dest_dir: impl AsRef<Path>) -> Result<usize> {
    let ipa_path = ipa_path.as_ref();
    let dest_dir = dest_dir.as_ref();

    let file = File::open(ipa_path)?;
    // The input is not modified for the duration of the run
    let mmap = unsafe { Mmap::map(&file)? };
    let mut archive = ZipArchive::new(Cursor::new(&mmap[..]))?;

    fs::create_dir_all(dest_dir)?;

    let mut written = 0;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;

        let relative = match entry.enclosed_name().and_then(normalized) {
            Some(relative) => relative,
            None => {
                log::warn!("Skipping unsafe archive entry {}", entry.name());
                continue;
            }
        };
        let outpath = dest_dir.join(&relative);

        let mode = entry.unix_mode();
        let is_symlink = mode.is_some_and(|m| m & S_IFMT == S_IFLNK);

        // A symlink entry replaces whatever sits at its own path, so only its
        // parents have to be real directories.
        refuse_symlinks(dest_dir, &relative, !is_symlink)?;

        if entry.is_dir() {
            fs::create_dir_all(&outpath)?;
            written += 1;
            continue;
        }

        if let Some(parent) = outpath.parent() {
            fs::create_dir_all(parent)?;
        }

        if is_symlink {
            let mut target = String::new();
            entry.read_to_string(&mut target)?;
            if !link_stays_inside(&relative, &target) {
                return Err(Error::Input(format!(
                    "Archive symlink {} points outside the archive: {}",
                    entry.name(),
                    target
                )));
            }
            create_symlink(&target, &outpath)?;
        } else {
            let mut outfile = File::create(&outpath)?;
            io::copy(&mut entry, &mut outfile)?;
            if let Some(mode) = mode {
                set_permissions(&outpath, mode)?;
            }
        }
        written += 1;
    }

    log::debug!(
        "Extracted {} entries from {} to {}",
        written,
        ipa_path.display(),
        dest_dir.display()
    );
    Ok(written)
}

/// Find the application bundle inside `<root>/Payload`.
///
/// When several `.app` directories are present the first by name wins.
/// Symlinked bundles are ignored.
pub fn locate_app_bundle(root: impl AsRef<Path>) -> Result<PathBuf> {
    let payload = root.as_ref().join("Payload");
    if !payload.is_dir() {
        return Err(Error::Input("No Payload directory found in IPA".into()));
    }

    let mut apps = Vec::new();
    for entry in fs::read_dir(&payload)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir()
            && BundleKind::from_path(&path) == Some(BundleKind::Application)
        {
            apps.push(path);
        }
    }
    apps.sort();

    if apps.len() > 1 {
        log::warn!("Found {} app bundles in Payload, using the first", apps.len());
    }
    apps.into_iter()
        .next()
        .ok_or_else(|| Error::Input("No .app bundle found in Payload/".into()))
}

/// Entry name reduced to plain components, `None` if anything else remains.
fn normalized(name: PathBuf) -> Option<PathBuf> {
    let mut path = PathBuf::new();
    for component in name.components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    (!path.as_os_str().is_empty()).then_some(path)
}

/// Fail if any existing prefix of `root/relative` is a symlink.
///
/// The last component is only checked when `include_last` is set.
fn refuse_symlinks(root: &Path, relative: &Path, include_last: bool) -> Result<()> {
    let mut current = root.to_path_buf();
    let mut components = relative.components().peekable();
    while let Some(component) = components.next() {
        if components.peek().is_none() && !include_last {
            break;
        }
        current.push(component);
        match fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => {
                return Err(Error::Input(format!(
                    "Archive entry {} would be written through symlink {}",
                    relative.display(),
                    current.display()
                )));
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Whether a symlink at `link` (relative to the root) to `target` resolves
/// inside the root.
///
/// `..` is only allowed before the first named component, so the walk up
/// never passes through another symlink.
fn link_stays_inside(link: &Path, target: &str) -> bool {
    let mut depth = link.components().count().saturating_sub(1);
    let mut leading = true;
    for component in Path::new(target).components() {
        match component {
            Component::Normal(_) => {
                depth += 1;
                leading = false;
            }
            Component::CurDir => {}
            Component::ParentDir if leading && depth > 0 => depth -= 1,
            _ => return false,
        }
    }
    !target.is_empty()
}

/// Check that `ipa_path` names an existing `.ipa` file starting with a ZIP signature.
///
/// # Errors
///
/// Returns [`Error::Input`] for any other extension (including `.zip`), a
/// missing file, or content that is not a ZIP archive.
pub fn validate_ipa(ipa_path: impl AsRef<Path>) -> Result<()> {
    let ipa_path = ipa_path.as_ref();

    let is_ipa = ipa_path.extension().is_some_and(|ext| ext == "ipa");
    if !is_ipa {
        return Err(Error::Input(format!(
            "unsupported file type: {}",
            ipa_path.display()
        )));
    }

    if !ipa_path.is_file() {
        return Err(Error::Input(format!(
            "IPA file not found: {}",
            ipa_path.display()
        )));
    }

    let mut magic = Vec::with_capacity(4);
    File::open(ipa_path)?.take(4).read_to_end(&mut magic)?;
    if !magic.starts_with(b"PK") {
        return Err(Error::Input(format!(
            "Not a valid ZIP/IPA file: {}",
            ipa_path.display()
        )));
    }

    Ok(())
}

#[cfg(unix)]
fn create_symlink(target: &str, link: &Path) -> io::Result<()> {
    if link.symlink_metadata().is_ok() {
        fs::remove_file(link)?;
    }
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn create_symlink(target: &str, link: &Path) -> io::Result<()> {
    fs::write(link, target)
}

#[cfg(unix)]
fn set_permissions(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let perms = mode & 0o7777;
    // Archives written without permission bits leave the default in place
    if perms == 0 {
        return Ok(());
    }
    fs::set_permissions(path, fs::Permissions::from_mode(perms))
}

#[cfg(not(unix))]
fn set_permissions(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}
