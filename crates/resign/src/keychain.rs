//! Code signing identity lookup.
//!
//! Identities are opaque labels as printed by `security find-identity`; their
//! certificates and keys never leave the keychain.

use crate::process::{CommandRunner, Invocation};
use crate::{Error, Result};
use std::fmt;

const SECURITY: &str = "/usr/bin/security";

/// A signing identity label, e.g. `Apple Development: Jane Doe (ABCDE12345)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    /// Wrap a label without looking it up.
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    /// The label passed to `codesign -s`.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Valid code signing identities in the user's keychains.
pub struct Keychain<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> Keychain<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }

    /// Sorted, deduplicated identity labels.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if `security` cannot be launched and
    /// [`Error::NotFound`] if it reports a failure.
    pub fn list_identities(&self) -> Result<Vec<String>> {
        let invocation = Invocation::new(SECURITY).args(["find-identity", "-v", "-p", "codesigning"]);
        let output = self.runner.run(&invocation)?;

        if !output.success() {
            return Err(Error::NotFound(format!(
                "Could not list code signing identities (security exited with {:?})",
                output.code
            )));
        }

        let mut labels = parse_identities(&String::from_utf8_lossy(&output.stdout));
        labels.sort();
        labels.dedup();
        Ok(labels)
    }

    /// Look up `label` among the valid identities.
    pub fn resolve_identity(&self, label: &str) -> Result<Identity> {
        self.list_identities()?
            .into_iter()
            .find(|candidate| candidate == label)
            .map(Identity)
            .ok_or_else(|| {
                Error::NotFound(format!("No valid code signing identity named \"{}\"", label))
            })
    }
}

/// Quoted labels from `security find-identity` output.
///
/// Lines look like `  1) 0123ABCD... "Apple Development: Jane (TEAM)"`; the
/// trailing summary line has no quotes and is ignored. Lines with an
/// unterminated quote are logged and skipped.
fn parse_identities(output: &str) -> Vec<String> {
    let mut labels = Vec::new();

    for line in output.lines() {
        let Some(start) = line.find('"') else {
            continue;
        };
        let rest = &line[start + 1..];
        match rest.rfind('"') {
            Some(end) if end > 0 => labels.push(rest[..end].to_string()),
            _ => log::warn!("Ignoring malformed identity line: {}", line.trim()),
        }
    }

    labels
}
