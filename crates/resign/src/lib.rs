pub mod builder;
pub mod bundle;
pub mod codesign;
pub mod error;
pub mod ipa;
pub mod keychain;
pub mod process;
pub mod profile;
pub mod toolchain;

pub use builder::Resign;
pub use bundle::{BundleKind, BundleWalker};
pub use codesign::{CodeSigner, IdentityValidator, NoRemediation, Remediation, TrustAnchorInstaller};
pub use error::Error;
pub use ipa::{create_ipa, extract_ipa, validate_ipa, CompressionLevel, IpaSigner, SignOptions, SigningRequest};
pub use keychain::{Identity, Keychain};
pub use process::{CommandOutput, CommandRunner, Invocation, SystemRunner};
pub use profile::{ProfileStore, ProvisioningProfile};

pub type Result<T> = std::result::Result<T, Error>;
