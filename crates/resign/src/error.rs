//! Error types for resign operations.
//!
//! This module defines the [`enum@Error`] enum covering every failure a
//! signing run can surface: bad inputs, undecodable profiles or bundle
//! descriptors, unusable identities, failed `codesign` invocations and
//! archive or filesystem errors.
//!
//! # See Also
//!
//! - [`crate::Result`] - Convenience type alias using this error

use std::path::PathBuf;
use thiserror::Error;

/// Error type for resign operations.
///
/// All public functions in this crate return [`crate::Result<T>`], which uses this error type.
/// Every variant bubbles up to the top-level run unchanged.
///
/// # Examples
///
/// ```no_run
/// use resign::{Error, Resign};
///
/// let result = Resign::new()
///     .identity("Apple Development: Jane Doe (ABCDE12345)")
///     .profile_path("profile.mobileprovision")
///     .sign_ipa("input.ipa", "output.ipa");
/// match result {
///     Ok(()) => println!("Signed successfully"),
///     Err(Error::InvalidIdentity { identity, .. }) => eprintln!("Cannot sign with {identity}"),
///     Err(Error::Input(msg)) => eprintln!("Fix your input: {msg}"),
///     Err(e) => eprintln!("Other error: {e}"),
/// }
/// ```
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or invalid input.
    ///
    /// The input file does not exist, has an unsupported extension, or a
    /// required option (identity, profile) was not provided. Never retried.
    #[error("Invalid input: {0}")]
    Input(String),

    /// A provisioning profile or bundle descriptor could not be decoded.
    ///
    /// Skipped during profile enumeration, fatal everywhere else.
    #[error("Parse error: {0}")]
    Parse(String),

    /// A named profile or identity does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The identity failed the signing probe twice, remediation included.
    #[error(
        "Identity \"{identity}\" cannot produce a valid signature: {reason}. \
         Make sure the certificate and its private key are in your login keychain \
         and that the Apple WWDR intermediate certificate is installed"
    )]
    InvalidIdentity {
        /// Label of the rejected identity
        identity: String,
        /// Failure observed on the retry
        reason: String,
    },

    /// `codesign` exited non-zero or could not be launched.
    ///
    /// `code` is `None` when the process never started or was killed by a signal.
    #[error("Signing failed for {}: {}", path.display(), exit_description(*code))]
    Signing {
        /// Artifact that was being signed
        path: PathBuf,
        /// Exit status of the signing tool
        code: Option<i32>,
    },

    /// The one-shot trust anchor remediation failed.
    #[error("Remediation failed: {0}")]
    Remediation(String),

    /// A required developer tool is not installed.
    #[error("Missing tool: {0}")]
    MissingTool(String),

    /// I/O operation failed.
    ///
    /// Occurs while reading inputs, copying profiles, managing the temporary
    /// working directory or writing the output archive.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Property list decoding or encoding failed.
    #[error("Plist error: {0}")]
    Plist(#[from] plist::Error),

    /// ZIP archive operation failed.
    ///
    /// Occurs during IPA extraction or creation. See [`crate::ipa`] module.
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

fn exit_description(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("codesign exited with status {code}"),
        None => "codesign did not run to completion".to_string(),
    }
}
