//! Identity probe run before any real signing work.
//!
//! A scratch binary is signed with the candidate identity and the result is
//! verified. If that fails, the configured [`Remediation`] runs once and the
//! probe is repeated. A second failure is final.

use super::{CodeSigner, Remediation};
use crate::keychain::Identity;
use crate::process::CommandRunner;
use crate::{Error, Result};
use std::env;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

const PROBE_FILE_NAME: &str = "probe-binary";

enum Attempt {
    Verified,
    Rejected(String),
}

/// Proves that an identity can produce a signature `codesign -v` accepts.
pub struct IdentityValidator<'a> {
    runner: &'a dyn CommandRunner,
    remediation: &'a dyn Remediation,
    probe_source: Option<PathBuf>,
    scratch_root: Option<PathBuf>,
}

impl<'a> IdentityValidator<'a> {
    pub fn new(runner: &'a dyn CommandRunner, remediation: &'a dyn Remediation) -> Self {
        Self {
            runner,
            remediation,
            probe_source: None,
            scratch_root: None,
        }
    }

    /// Binary copied and signed by the probe. Defaults to the running executable.
    pub fn probe_source(mut self, path: impl Into<PathBuf>) -> Self {
        self.probe_source = Some(path.into());
        self
    }

    /// Directory under which the scratch copy is made. Defaults to the system temp dir.
    pub fn scratch_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(path.into());
        self
    }

    /// Probe `identity`, remediating once on failure.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidIdentity`] if the probe fails after remediation.
    /// Errors setting up the scratch copy are returned as-is.
    pub fn probe(&self, identity: &Identity) -> Result<()> {
        log::info!("Validating signing identity {}", identity);

        let reason = match self.attempt(identity)? {
            Attempt::Verified => return Ok(()),
            Attempt::Rejected(reason) => reason,
        };
        log::warn!("Identity {} failed the signing probe: {}", identity, reason);

        if let Err(e) = self.remediation.remediate(self.runner) {
            log::warn!("{}", e);
        }

        match self.attempt(identity)? {
            Attempt::Verified => {
                log::info!("Identity {} is valid after remediation", identity);
                Ok(())
            }
            Attempt::Rejected(reason) => Err(Error::InvalidIdentity {
                identity: identity.to_string(),
                reason,
            }),
        }
    }

    fn attempt(&self, identity: &Identity) -> Result<Attempt> {
        let scratch = match &self.scratch_root {
            Some(root) => TempDir::new_in(root)?,
            None => TempDir::new()?,
        };
        let probe = scratch.path().join(PROBE_FILE_NAME);
        fs::copy(self.source()?, &probe)?;

        let signer = CodeSigner::new(self.runner);
        if let Err(e) = signer.sign(&probe, identity, None, None) {
            return Ok(Attempt::Rejected(e.to_string()));
        }

        match signer.verify(&probe) {
            Ok(true) => Ok(Attempt::Verified),
            Ok(false) => Ok(Attempt::Rejected("signature verification failed".to_string())),
            Err(e) => Ok(Attempt::Rejected(e.to_string())),
        }
    }

    fn source(&self) -> Result<PathBuf> {
        match &self.probe_source {
            Some(path) => Ok(path.clone()),
            None => Ok(env::current_exe()?),
        }
    }
}
