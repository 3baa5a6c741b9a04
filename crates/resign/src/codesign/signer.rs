//! Single-artifact signing.

use crate::bundle::BundleKind;
use crate::keychain::Identity;
use crate::process::{CommandRunner, Invocation};
use crate::{Error, Result};
use std::fs;
use std::io;
use std::path::Path;

const CODESIGN: &str = "/usr/bin/codesign";

/// File name of the profile embedded in app and extension bundles.
pub const EMBEDDED_PROFILE_NAME: &str = "embedded.mobileprovision";

/// Signs one artifact at a time with `codesign`.
pub struct CodeSigner<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> CodeSigner<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }

    /// Sign `artifact` in place.
    ///
    /// The signing target is resolved from the artifact kind (see
    /// [`BundleKind::executable_path`]); paths with an unrecognized extension
    /// are signed as-is. For app and extension bundles the profile at
    /// `provisioning_profile` replaces any `embedded.mobileprovision`, and
    /// `entitlements` is passed to `codesign` if the file exists.
    ///
    /// # Errors
    ///
    /// - [`Error::Parse`] if a bundle's `Info.plist` cannot be decoded
    /// - [`Error::Io`] if the profile cannot be copied into the bundle
    /// - [`Error::Signing`] if `codesign` fails or cannot be launched
    pub fn sign(
        &self,
        artifact: &Path,
        identity: &Identity,
        entitlements: Option<&Path>,
        provisioning_profile: Option<&Path>,
    ) -> Result<()> {
        let kind = BundleKind::from_path(artifact);
        let target = match kind {
            Some(kind) => kind.executable_path(artifact)?,
            None => artifact.to_path_buf(),
        };

        let mut entitlements_to_use = None;
        if kind.is_some_and(BundleKind::is_bundle) {
            if let Some(profile) = provisioning_profile {
                embed_profile(artifact, profile)?;
            }

            match entitlements {
                Some(path) if path.is_file() => entitlements_to_use = Some(path),
                Some(path) => log::debug!(
                    "Entitlements {} not found, signing {} without them",
                    path.display(),
                    artifact.display()
                ),
                None => {}
            }
        }

        let mut invocation = Invocation::new(CODESIGN)
            .args(["-f", "-s"])
            .arg(identity.as_str())
            .arg("--generate-entitlement-der");
        if let Some(path) = entitlements_to_use {
            invocation = invocation.arg("--entitlements").arg(path);
        }
        let invocation = invocation.arg(&target);

        log::info!("Signing {}", artifact.display());
        let output = self.runner.run(&invocation).map_err(|e| {
            log::error!("Could not launch codesign: {}", e);
            Error::Signing {
                path: artifact.to_path_buf(),
                code: None,
            }
        })?;

        if !output.success() {
            return Err(Error::Signing {
                path: artifact.to_path_buf(),
                code: output.code,
            });
        }

        Ok(())
    }

    /// Whether `codesign -v` accepts the signature of `path`.
    pub fn verify(&self, path: &Path) -> Result<bool> {
        let output = self
            .runner
            .run(&Invocation::new(CODESIGN).arg("-v").arg(path))?;
        Ok(output.success())
    }
}

/// Replace `<bundle>/embedded.mobileprovision` with `profile`.
fn embed_profile(bundle: &Path, profile: &Path) -> Result<()> {
    let embedded = bundle.join(EMBEDDED_PROFILE_NAME);

    // An absent or undeletable old profile surfaces through the copy below
    let _ = fs::remove_file(&embedded);

    fs::copy(profile, &embedded).map_err(|e| {
        Error::Io(io::Error::new(
            e.kind(),
            format!(
                "Failed to copy provisioning profile to {}: {}",
                embedded.display(),
                e
            ),
        ))
    })?;

    log::debug!("Embedded {} into {}", profile.display(), bundle.display());
    Ok(())
}
