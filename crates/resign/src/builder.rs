//! Resign builder API
//!
//! Collects the options of a signing run, resolves the named profile and
//! identity, and hands an immutable [`SigningRequest`] to [`IpaSigner`].

use crate::codesign::{NoRemediation, Remediation};
use crate::ipa::{validate_ipa, CompressionLevel, IpaSigner, SignOptions, SigningRequest};
use crate::keychain::{Identity, Keychain};
use crate::process::{CommandRunner, SystemRunner};
use crate::profile::{ProfileStore, ProvisioningProfile};
use crate::{Error, Result};
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Identity label `codesign` treats as ad-hoc signing.
pub const AD_HOC_IDENTITY: &str = "-";

/// IPA re-signing with a builder pattern API.
///
/// # Example
///
/// ```no_run
/// use resign::Resign;
///
/// Resign::new()
///     .identity("Apple Development: Jane Doe (ABCDE12345)")
///     .profile_name("Example Dev (ABCDE12345)")
///     .strip_get_task_allow(true)
///     .sign_ipa("MyApp.ipa", "MyApp-signed.ipa")?;
/// # Ok::<(), resign::Error>(())
/// ```
#[derive(Clone)]
pub struct Resign {
    identity: Option<String>,
    profile_name: Option<String>,
    profile_path: Option<PathBuf>,
    profile_dir: Option<PathBuf>,
    entitlements: Option<PathBuf>,
    probe_source: Option<PathBuf>,
    options: SignOptions,
    runner: Rc<dyn CommandRunner>,
    remediation: Rc<dyn Remediation>,
}

impl Resign {
    /// Create a builder that runs the system tools and never remediates.
    pub fn new() -> Self {
        Self {
            identity: None,
            profile_name: None,
            profile_path: None,
            profile_dir: None,
            entitlements: None,
            probe_source: None,
            options: SignOptions::default(),
            runner: Rc::new(SystemRunner),
            remediation: Rc::new(NoRemediation),
        }
    }

    /// Signing identity label as listed by `security find-identity`.
    ///
    /// `-` selects ad-hoc signing and skips the keychain lookup.
    pub fn identity(mut self, label: impl Into<String>) -> Self {
        self.identity = Some(label.into());
        self
    }

    /// Installed profile, by `Name (TEAMID)` label or bare name.
    pub fn profile_name(mut self, name: impl Into<String>) -> Self {
        self.profile_name = Some(name.into());
        self
    }

    /// Profile file (.mobileprovision) anywhere on disk.
    pub fn profile_path(mut self, path: impl AsRef<Path>) -> Self {
        self.profile_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Directory searched by [`Self::profile_name`] instead of the user's profile directory.
    pub fn profile_dir(mut self, path: impl AsRef<Path>) -> Self {
        self.profile_dir = Some(path.as_ref().to_path_buf());
        self
    }

    /// Entitlements plist used instead of the one synthesized from the profile.
    pub fn entitlements(mut self, path: impl AsRef<Path>) -> Self {
        self.entitlements = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set ZIP compression level for the output IPA (0-9).
    pub fn compression_level(mut self, level: u32) -> Self {
        self.options.compression_level = CompressionLevel::new(level);
        self
    }

    /// Drop `get-task-allow` from the synthesized entitlements.
    pub fn strip_get_task_allow(mut self, strip: bool) -> Self {
        self.options.strip_get_task_allow = strip;
        self
    }

    /// Rewrite a wildcard profile's `application-identifier` to the app's bundle id.
    pub fn rebind_wildcard_app_id(mut self, rebind: bool) -> Self {
        self.options.rebind_wildcard_app_id = rebind;
        self
    }

    /// Directory that holds the per-run temporary directory.
    pub fn work_dir(mut self, path: impl AsRef<Path>) -> Self {
        self.options.work_dir = Some(path.as_ref().to_path_buf());
        self
    }

    /// Binary signed by the identity probe instead of the running executable.
    pub fn probe_source(mut self, path: impl AsRef<Path>) -> Self {
        self.probe_source = Some(path.as_ref().to_path_buf());
        self
    }

    /// Executor for `codesign`, `security` and the other platform tools.
    pub fn runner(mut self, runner: Rc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Fix attempted once when the identity probe fails.
    pub fn remediation(mut self, remediation: Rc<dyn Remediation>) -> Self {
        self.remediation = remediation;
        self
    }

    /// Validate the builder configuration.
    ///
    /// Returns an error if:
    /// - No identity is set
    /// - Both or neither of profile name and profile path are set
    pub fn validate(&self) -> Result<()> {
        if self.identity.as_deref().map_or(true, str::is_empty) {
            return Err(Error::Input("A signing identity is required".into()));
        }

        match (&self.profile_name, &self.profile_path) {
            (Some(_), Some(_)) => Err(Error::Input(
                "Cannot specify both a profile name and a profile path".into(),
            )),
            (None, None) => Err(Error::Input(
                "Must specify either a profile name or a profile path".into(),
            )),
            _ => Ok(()),
        }
    }

    /// Resolve the profile and identity into a request for `input` and `output`.
    ///
    /// The input archive is checked first, before any external tool runs.
    pub fn request(
        &self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
    ) -> Result<SigningRequest> {
        self.validate()?;
        let input = input.as_ref();
        validate_ipa(input)?;

        let profile = self.resolve_profile()?;
        log::info!("Using provisioning profile {}", profile.display_label());

        let identity = self.resolve_identity()?;
        log::info!("Using signing identity {}", identity);

        Ok(SigningRequest {
            profile,
            identity,
            input: input.to_path_buf(),
            output: output.as_ref().to_path_buf(),
            entitlements: self.entitlements.clone(),
            options: self.options.clone(),
        })
    }

    /// Sign an IPA file.
    ///
    /// Resolves the request, probes the identity, then extracts, signs and
    /// repacks `input` into `output`.
    ///
    /// # Errors
    ///
    /// Returns the first error of any step; see [`IpaSigner::sign`].
    pub fn sign_ipa(&self, input: impl AsRef<Path>, output: impl AsRef<Path>) -> Result<()> {
        let request = self.request(input, output)?;

        let mut signer = IpaSigner::new(self.runner.as_ref(), self.remediation.as_ref());
        if let Some(source) = &self.probe_source {
            signer = signer.probe_source(source);
        }
        signer.sign(&request)
    }

    /// Installed profiles, newest first, one per `(name, app id)`.
    pub fn list_profiles(&self) -> Result<Vec<ProvisioningProfile>> {
        self.profile_store()?.enumerate()
    }

    /// Valid code signing identity labels.
    pub fn list_identities(&self) -> Result<Vec<String>> {
        Keychain::new(self.runner.as_ref()).list_identities()
    }

    /// Run the configured remediation once.
    pub fn remediate(&self) -> Result<()> {
        self.remediation.remediate(self.runner.as_ref())
    }

    fn profile_store(&self) -> Result<ProfileStore<'_>> {
        match &self.profile_dir {
            Some(dir) => Ok(ProfileStore::with_directory(self.runner.as_ref(), dir)),
            None => ProfileStore::new(self.runner.as_ref()),
        }
    }

    fn resolve_profile(&self) -> Result<ProvisioningProfile> {
        let store = self.profile_store()?;
        match (&self.profile_name, &self.profile_path) {
            (Some(name), _) => store.resolve_by_name(name),
            (None, Some(path)) => {
                if !path.is_file() {
                    return Err(Error::Input(format!(
                        "Provisioning profile not found: {}",
                        path.display()
                    )));
                }
                store.parse(path)
            }
            (None, None) => Err(Error::Input("No provisioning profile configured".into())),
        }
    }

    fn resolve_identity(&self) -> Result<Identity> {
        let label = self
            .identity
            .as_deref()
            .ok_or_else(|| Error::Input("A signing identity is required".into()))?;

        if label == AD_HOC_IDENTITY {
            return Ok(Identity::new(label));
        }
        Keychain::new(self.runner.as_ref()).resolve_identity(label)
    }
}

impl Default for Resign {
    fn default() -> Self {
        Self::new()
    }
}
