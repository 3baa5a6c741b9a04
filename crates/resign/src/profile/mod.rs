//! Provisioning profile handling.
//!
//! A `.mobileprovision` file is a CMS envelope around an XML plist. The
//! envelope is stripped by the platform decoder (see [`ProfileStore`]); this
//! module locates the plist inside the decoder output and decodes it into a
//! [`ProvisioningProfile`].
//!
//! # Examples
//!
//! ```no_run
//! use resign::process::SystemRunner;
//! use resign::profile::ProfileStore;
//!
//! let store = ProfileStore::new(&SystemRunner)?;
//! for profile in store.enumerate()? {
//!     println!("{} expired={}", profile.display_label(), profile.is_expired());
//! }
//! # Ok::<(), resign::Error>(())
//! ```

pub mod store;

pub use store::ProfileStore;

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use plist::{Dictionary, Value};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Entitlement key holding `TEAMID.app.id`.
pub const APPLICATION_IDENTIFIER_KEY: &str = "application-identifier";

/// Entitlement that allows debuggers to attach.
pub const GET_TASK_ALLOW_KEY: &str = "get-task-allow";

/// Suffix marking a wildcard application id.
pub const WILDCARD_SUFFIX: char = '*';

/// Identity-bound authorization grant parsed from a `.mobileprovision` file.
///
/// Immutable once parsed; two profiles with the same `(name, app_id)` are
/// considered duplicates.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisioningProfile {
    /// Human readable name, not unique across files
    pub name: String,
    /// Team prefix of the application identifier
    pub team_id: String,
    /// Application id pattern, may end in `*`
    pub app_id: String,
    /// When the profile was issued
    pub created_at: DateTime<Utc>,
    /// When the profile stops being valid
    pub expires_at: DateTime<Utc>,
    /// Capability grants copied into the entitlements plist
    pub entitlements: Dictionary,
    /// File the profile was parsed from; embedded into signed bundles
    pub source_path: PathBuf,
}

/// Fields read from the decoded profile plist.
#[derive(Debug, Deserialize)]
struct RawProfile {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "CreationDate")]
    creation_date: plist::Date,
    #[serde(rename = "ExpirationDate")]
    expiration_date: plist::Date,
    #[serde(rename = "Entitlements")]
    entitlements: Value,
}

impl ProvisioningProfile {
    /// Decode a profile from the decoder's textual output.
    ///
    /// `decoded` may carry arbitrary bytes around the plist; everything from
    /// the `<?xml` marker up to the closing `</plist>` is decoded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] if no plist is present, a required key is
    /// missing or has the wrong type, or `application-identifier` is not of
    /// the form `TEAMID.appid`.
    pub fn from_decoded(decoded: &[u8], source_path: impl AsRef<Path>) -> Result<Self> {
        let source_path = source_path.as_ref();
        let plist_data = locate_plist(decoded).ok_or_else(|| {
            Error::Parse(format!("No plist found in {}", source_path.display()))
        })?;

        let raw: RawProfile = plist::from_bytes(plist_data).map_err(|e| {
            Error::Parse(format!("Invalid profile {}: {}", source_path.display(), e))
        })?;

        let entitlements = raw.entitlements.into_dictionary().ok_or_else(|| {
            Error::Parse(format!(
                "Entitlements in {} is not a dictionary",
                source_path.display()
            ))
        })?;

        let application_identifier = entitlements
            .get(APPLICATION_IDENTIFIER_KEY)
            .ok_or_else(|| {
                Error::Parse(format!(
                    "No {} in {}",
                    APPLICATION_IDENTIFIER_KEY,
                    source_path.display()
                ))
            })?
            .as_string()
            .ok_or_else(|| {
                Error::Parse(format!(
                    "{} in {} is not a string",
                    APPLICATION_IDENTIFIER_KEY,
                    source_path.display()
                ))
            })?;

        let (team_id, app_id) = split_application_identifier(application_identifier)?;

        Ok(Self {
            name: raw.name,
            team_id,
            app_id,
            created_at: to_utc(raw.creation_date),
            expires_at: to_utc(raw.expiration_date),
            entitlements,
            source_path: source_path.to_path_buf(),
        })
    }

    /// Label used for listing and name lookup: `Name (TEAMID)`.
    pub fn display_label(&self) -> String {
        format!("{} ({})", self.name, self.team_id)
    }

    /// Fully qualified `TEAMID.appid`.
    pub fn application_identifier(&self) -> String {
        format!("{}.{}", self.team_id, self.app_id)
    }

    /// Whether the app id ends in the wildcard marker.
    pub fn is_wildcard(&self) -> bool {
        self.app_id.ends_with(WILDCARD_SUFFIX)
    }

    /// Whether the profile had expired at `now`.
    ///
    /// A profile expiring exactly at `now` is still valid.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    /// Whether the profile has expired. Informational only, signing is not blocked.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Split `TEAMID.app.id` at its first `.`.
///
/// Team ids never contain a `.`; identifiers without a non-empty team and
/// app part are rejected.
pub fn split_application_identifier(identifier: &str) -> Result<(String, String)> {
    match identifier.split_once('.') {
        Some((team, app)) if !team.is_empty() && !app.is_empty() => {
            Ok((team.to_string(), app.to_string()))
        }
        _ => Err(Error::Parse(format!(
            "Malformed application identifier \"{}\", expected TEAMID.appid",
            identifier
        ))),
    }
}

/// Slice of `data` from `<?xml` through the last `</plist>`.
fn locate_plist(data: &[u8]) -> Option<&[u8]> {
    const START: &[u8] = b"<?xml";
    const END: &[u8] = b"</plist>";

    let start = data.windows(START.len()).position(|w| w == START)?;
    let end = data[start..]
        .windows(END.len())
        .rposition(|w| w == END)
        .map(|p| start + p + END.len())?;

    Some(&data[start..end])
}

fn to_utc(date: plist::Date) -> DateTime<Utc> {
    DateTime::<Utc>::from(SystemTime::from(date))
}
