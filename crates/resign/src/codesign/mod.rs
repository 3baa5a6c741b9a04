//! Code signing through the platform `codesign` tool.
//!
//! - [`CodeSigner`] signs and verifies single artifacts
//! - [`IdentityValidator`] proves an identity works before a real run
//! - [`Remediation`] is the one-shot fix attempted between probes
//! - [`entitlements`] builds the entitlements plist from a profile

pub mod entitlements;
pub mod remediation;
pub mod signer;
pub mod validator;

pub use entitlements::Entitlements;
pub use remediation::{NoRemediation, Remediation, TrustAnchorInstaller};
pub use signer::{CodeSigner, EMBEDDED_PROFILE_NAME};
pub use validator::IdentityValidator;
