//! Typed access to a bundle's `Info.plist`.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::Path;

/// Keys of `Info.plist` the signer depends on.
///
/// Decoding fails with [`Error::Parse`] when `CFBundleExecutable` is missing
/// or not a string, rather than guessing an executable name.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InfoPlist {
    /// Name of the main executable inside the bundle
    #[serde(rename = "CFBundleExecutable")]
    pub executable: String,
    /// Bundle identifier, e.g. `com.example.app`
    #[serde(rename = "CFBundleIdentifier", default)]
    pub identifier: Option<String>,
}

impl InfoPlist {
    /// Read `<bundle>/Info.plist` (XML or binary).
    pub fn read(bundle_path: &Path) -> Result<Self> {
        let path = bundle_path.join("Info.plist");
        plist::from_file(&path)
            .map_err(|e| Error::Parse(format!("Invalid {}: {}", path.display(), e)))
    }
}
