//! Installed provisioning profile lookup.
//!
//! Profiles are read fresh from disk on every call; nothing is cached.

use super::ProvisioningProfile;
use crate::process::{CommandRunner, Invocation};
use crate::{Error, Result};
use std::collections::HashSet;
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Extension of installed provisioning profiles.
pub const PROFILE_EXTENSION: &str = "mobileprovision";

/// Profile directory relative to the user's home.
const PROFILE_DIR: &str = "Library/MobileDevice/Provisioning Profiles";

/// Decoder that strips the CMS envelope of a profile.
const SECURITY: &str = "/usr/bin/security";

/// Scans a profile directory and decodes profiles through `security cms`.
pub struct ProfileStore<'a> {
    directory: PathBuf,
    runner: &'a dyn CommandRunner,
}

impl<'a> ProfileStore<'a> {
    /// Store over the current user's profile directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Input`] if the home directory cannot be determined.
    pub fn new(runner: &'a dyn CommandRunner) -> Result<Self> {
        let directory = Self::default_directory()
            .ok_or_else(|| Error::Input("Cannot determine the home directory".into()))?;
        Ok(Self::with_directory(runner, directory))
    }

    /// Store over an explicit directory.
    pub fn with_directory(runner: &'a dyn CommandRunner, directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            runner,
        }
    }

    /// `~/Library/MobileDevice/Provisioning Profiles`.
    pub fn default_directory() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(PROFILE_DIR))
    }

    /// Directory this store scans.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Decode a single profile file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the decoder cannot be launched and
    /// [`Error::Parse`] if it fails or its output is not a valid profile.
    pub fn parse(&self, path: impl AsRef<Path>) -> Result<ProvisioningProfile> {
        let path = path.as_ref();
        let invocation = Invocation::new(SECURITY).args(["cms", "-D", "-i"]).arg(path);
        let output = self.runner.run(&invocation)?;

        if !output.success() {
            return Err(Error::Parse(format!(
                "Failed to decode {} (security exited with {:?})",
                path.display(),
                output.code
            )));
        }

        ProvisioningProfile::from_decoded(&output.stdout, path)
    }

    /// All decodable profiles, newest first, one per `(name, app_id)`.
    ///
    /// Files that fail to decode are logged and skipped. A missing profile
    /// directory yields an empty list.
    pub fn enumerate(&self) -> Result<Vec<ProvisioningProfile>> {
        let entries = match fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("No profile directory at {}", self.directory.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(Error::Io(e)),
        };

        let mut profiles = Vec::new();
        for entry in entries {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    log::warn!("Skipping unreadable entry in {}: {}", self.directory.display(), e);
                    continue;
                }
            };

            if path.extension() != Some(OsStr::new(PROFILE_EXTENSION)) {
                continue;
            }

            match self.parse(&path) {
                Ok(profile) => profiles.push(profile),
                Err(e) => log::warn!("Skipping profile {}: {}", path.display(), e),
            }
        }

        Ok(sort_and_dedup(profiles))
    }

    /// Find a profile by `Name (TEAMID)` label or bare name.
    ///
    /// The first match in enumeration order wins, so the newest profile is
    /// picked when several share a name.
    pub fn resolve_by_name(&self, name: &str) -> Result<ProvisioningProfile> {
        self.enumerate()?
            .into_iter()
            .find(|p| p.display_label() == name || p.name == name)
            .ok_or_else(|| Error::NotFound(format!("No provisioning profile named \"{}\"", name)))
    }
}

/// Sort by creation date descending then name ascending, keeping the first
/// profile of each `(name, app_id)` pair.
pub(crate) fn sort_and_dedup(mut profiles: Vec<ProvisioningProfile>) -> Vec<ProvisioningProfile> {
    profiles.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.name.cmp(&b.name))
    });

    let mut seen = HashSet::new();
    profiles.retain(|p| seen.insert((p.name.clone(), p.app_id.clone())));
    profiles
}
