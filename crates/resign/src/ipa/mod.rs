//! IPA re-signing pipeline.
//!
//! [`IpaSigner::sign`] runs one [`SigningRequest`] through the fixed sequence
//! of steps below. The first failing step ends the run and its error is
//! returned unchanged; the temporary directory is removed either way.
//!
//! 1. Validate inputs (no filesystem side effects)
//! 2. Probe the identity, remediating once if needed
//! 3. Extract the archive
//! 4. Locate `Payload/*.app`
//! 5. Synthesize entitlements from the profile, unless overridden
//! 6. Sign the bundle tree innermost first
//! 7. Repack into the output archive

pub mod archive;
pub mod extract;

pub use archive::{create_ipa, CompressionLevel};
pub use extract::{extract_ipa, locate_app_bundle, validate_ipa};

use crate::bundle::{BundleWalker, InfoPlist};
use crate::codesign::{CodeSigner, Entitlements, IdentityValidator, Remediation};
use crate::keychain::Identity;
use crate::process::CommandRunner;
use crate::profile::ProvisioningProfile;
use crate::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const ENTITLEMENTS_FILE_NAME: &str = "entitlements.plist";

/// Run options that do not change what is signed with what.
#[derive(Debug, Clone, Default)]
pub struct SignOptions {
    /// Deflate level of the output archive
    pub compression_level: CompressionLevel,
    /// Remove `get-task-allow` from the synthesized entitlements
    pub strip_get_task_allow: bool,
    /// Point a wildcard profile's `application-identifier` at the app's bundle id
    pub rebind_wildcard_app_id: bool,
    /// Parent of the per-run temporary directory, the system temp dir if unset
    pub work_dir: Option<PathBuf>,
}

/// Everything one signing run needs, resolved up front.
#[derive(Debug, Clone)]
pub struct SigningRequest {
    pub profile: ProvisioningProfile,
    pub identity: Identity,
    pub input: PathBuf,
    pub output: PathBuf,
    /// Entitlements plist used instead of the one synthesized from the profile
    pub entitlements: Option<PathBuf>,
    pub options: SignOptions,
}

/// Drives a [`SigningRequest`] from input archive to signed output archive.
pub struct IpaSigner<'a> {
    runner: &'a dyn CommandRunner,
    remediation: &'a dyn Remediation,
    probe_source: Option<PathBuf>,
}

impl<'a> IpaSigner<'a> {
    pub fn new(runner: &'a dyn CommandRunner, remediation: &'a dyn Remediation) -> Self {
        Self {
            runner,
            remediation,
            probe_source: None,
        }
    }

    /// Binary signed by the identity probe instead of the running executable.
    pub fn probe_source(mut self, path: impl Into<PathBuf>) -> Self {
        self.probe_source = Some(path.into());
        self
    }

    /// Re-sign `request.input` into `request.output`.
    ///
    /// # Errors
    ///
    /// - [`Error::Input`] for a missing or unsupported input file or override
    /// - [`Error::InvalidIdentity`] if the identity cannot sign
    /// - [`Error::Parse`] for an unreadable `Info.plist`
    /// - [`Error::Signing`] for the first artifact `codesign` rejects
    /// - [`Error::Io`] or [`Error::Zip`] for archive and filesystem failures
    pub fn sign(&self, request: &SigningRequest) -> Result<()> {
        validate_request(request)?;

        if request.profile.is_expired() {
            log::warn!(
                "Provisioning profile {} expired on {}",
                request.profile.display_label(),
                request.profile.expires_at
            );
        }

        let temp = match &request.options.work_dir {
            Some(dir) => tempfile::Builder::new().prefix("resign-").tempdir_in(dir)?,
            None => tempfile::Builder::new().prefix("resign-").tempdir()?,
        };
        log::debug!("Working in {}", temp.path().display());

        self.validate_identity(&request.identity, &temp)?;

        let work = temp.path().join("work");
        log::info!("Extracting {}", request.input.display());
        extract_ipa(&request.input, &work)?;

        let app = locate_app_bundle(&work)?;
        log::info!("Found app bundle {}", app.display());

        let entitlements = match &request.entitlements {
            Some(path) => {
                log::info!("Using entitlements from {}", path.display());
                path.clone()
            }
            None => {
                let path = temp.path().join(ENTITLEMENTS_FILE_NAME);
                synthesize_entitlements(request, &app, &path)?;
                path
            }
        };

        let signer = CodeSigner::new(self.runner);
        BundleWalker::new(&signer, &request.identity)
            .entitlements(&entitlements)
            .provisioning_profile(&request.profile.source_path)
            .sign_tree(&app)?;

        log::info!("Packing {}", request.output.display());
        create_ipa(&work, &request.output, request.options.compression_level)?;

        log::info!("Signed IPA written to {}", request.output.display());
        Ok(())
    }

    fn validate_identity(&self, identity: &Identity, temp: &TempDir) -> Result<()> {
        let scratch = temp.path().join("probe");
        fs::create_dir(&scratch)?;

        let mut validator =
            IdentityValidator::new(self.runner, self.remediation).scratch_root(scratch);
        if let Some(source) = &self.probe_source {
            validator = validator.probe_source(source);
        }
        validator.probe(identity)
    }
}

fn validate_request(request: &SigningRequest) -> Result<()> {
    validate_ipa(&request.input)?;

    if !request.profile.source_path.is_file() {
        return Err(Error::Input(format!(
            "Provisioning profile not found: {}",
            request.profile.source_path.display()
        )));
    }

    if let Some(path) = &request.entitlements {
        if !path.is_file() {
            return Err(Error::Input(format!(
                "Entitlements file not found: {}",
                path.display()
            )));
        }
    }

    Ok(())
}

fn synthesize_entitlements(request: &SigningRequest, app: &Path, path: &Path) -> Result<()> {
    let profile = &request.profile;
    let mut entitlements = Entitlements::from_profile(profile);

    if request.options.strip_get_task_allow && entitlements.strip_get_task_allow() {
        log::info!("Removed get-task-allow from entitlements");
    }

    if request.options.rebind_wildcard_app_id {
        let bundle_identifier = InfoPlist::read(app)?.identifier.ok_or_else(|| {
            Error::Parse(format!(
                "No CFBundleIdentifier in {}",
                app.join("Info.plist").display()
            ))
        })?;
        entitlements.rebind_application_identifier(profile, &bundle_identifier)?;
    }

    log::info!("Writing entitlements for {}", profile.application_identifier());
    entitlements.write_to(path)
}
