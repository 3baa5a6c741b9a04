//! One-shot fix for identities that fail the signing probe.
//!
//! The usual cause of a valid-looking identity that cannot sign is a missing
//! Apple Worldwide Developer Relations intermediate certificate, which breaks
//! the chain of trust. [`TrustAnchorInstaller`] checks for it and, with the
//! operator's consent, installs it into the System keychain.

use crate::process::{CommandRunner, Invocation};
use crate::{Error, Result};
use std::io::Write;
use std::path::{Path, PathBuf};

const SECURITY: &str = "/usr/bin/security";

/// Common name of the WWDR intermediate certificate.
pub const WWDR_CERTIFICATE_NAME: &str =
    "Apple Worldwide Developer Relations Certification Authority";

/// Where Apple publishes the G3 WWDR intermediate.
pub const WWDR_CERTIFICATE_URL: &str =
    "https://www.apple.com/certificateauthority/AppleWWDRCAG3.cer";

const SYSTEM_KEYCHAIN: &str = "/Library/Keychains/System.keychain";

/// Action attempted once when an identity fails its first probe.
pub trait Remediation {
    /// Try to fix the signing environment.
    fn remediate(&self, runner: &dyn CommandRunner) -> Result<()>;
}

/// Remediation that does nothing, for non-interactive runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRemediation;

impl Remediation for NoRemediation {
    fn remediate(&self, _runner: &dyn CommandRunner) -> Result<()> {
        log::debug!("No remediation configured");
        Ok(())
    }
}

enum CertificateSource {
    Url(String),
    File(PathBuf),
}

/// Installs the WWDR intermediate into the System keychain after confirmation.
pub struct TrustAnchorInstaller {
    confirm: Box<dyn Fn(&str) -> bool>,
    source: CertificateSource,
}

impl TrustAnchorInstaller {
    /// Installer downloading from [`WWDR_CERTIFICATE_URL`].
    ///
    /// `confirm` receives a question and returns whether the operator agreed.
    pub fn new(confirm: impl Fn(&str) -> bool + 'static) -> Self {
        Self {
            confirm: Box::new(confirm),
            source: CertificateSource::Url(WWDR_CERTIFICATE_URL.to_string()),
        }
    }

    /// Install a certificate already on disk instead of downloading it.
    pub fn with_certificate_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.source = CertificateSource::File(path.into());
        self
    }

    /// Whether any keychain already holds the WWDR certificate.
    pub fn is_installed(&self, runner: &dyn CommandRunner) -> Result<bool> {
        let invocation = Invocation::new(SECURITY)
            .args(["find-certificate", "-c", WWDR_CERTIFICATE_NAME, "-a"]);
        Ok(runner.run(&invocation)?.success())
    }

    /// Add the certificate as a trusted root via `sudo security add-trusted-cert`.
    pub fn install(&self, runner: &dyn CommandRunner) -> Result<()> {
        match &self.source {
            CertificateSource::File(path) => add_trusted_cert(runner, path),
            CertificateSource::Url(url) => {
                let certificate = download(url)?;
                add_trusted_cert(runner, certificate.path())
            }
        }
    }
}

impl Remediation for TrustAnchorInstaller {
    fn remediate(&self, runner: &dyn CommandRunner) -> Result<()> {
        if self.is_installed(runner)? {
            log::info!("{} is already installed", WWDR_CERTIFICATE_NAME);
            return Ok(());
        }

        log::warn!("An issue has been detected with your code signing certificates");
        let question = format!(
            "Install the {} certificate into the System keychain?",
            WWDR_CERTIFICATE_NAME
        );
        if !(self.confirm)(&question) {
            log::warn!("Certificate installation declined");
            return Ok(());
        }

        self.install(runner)?;
        log::info!("{} certificate installed", WWDR_CERTIFICATE_NAME);
        Ok(())
    }
}

fn download(url: &str) -> Result<tempfile::NamedTempFile> {
    log::info!("Downloading {}", url);
    let bytes = reqwest::blocking::get(url)
        .and_then(|response| response.error_for_status())
        .and_then(|response| response.bytes())
        .map_err(|e| Error::Remediation(format!("Failed to download {}: {}", url, e)))?;

    let mut file = tempfile::Builder::new()
        .prefix("AppleWWDRCA-")
        .suffix(".cer")
        .tempfile()?;
    file.write_all(&bytes)?;
    file.flush()?;
    Ok(file)
}

fn add_trusted_cert(runner: &dyn CommandRunner, certificate: &Path) -> Result<()> {
    let invocation = Invocation::new("sudo")
        .arg(SECURITY)
        .args(["add-trusted-cert", "-d", "-r", "trustRoot", "-k", SYSTEM_KEYCHAIN])
        .arg(certificate);

    let output = runner.run(&invocation)?;
    if !output.success() {
        return Err(Error::Remediation(format!(
            "security add-trusted-cert exited with {:?}",
            output.code
        )));
    }
    Ok(())
}
