//! Entitlements plist synthesized from a provisioning profile.

use crate::profile::{ProvisioningProfile, APPLICATION_IDENTIFIER_KEY, GET_TASK_ALLOW_KEY, WILDCARD_SUFFIX};
use crate::{Error, Result};
use plist::{Dictionary, Value, XmlWriteOptions};
use std::fs;
use std::path::Path;

/// Capability grants passed to `codesign --entitlements`.
#[derive(Debug, Clone, PartialEq)]
pub struct Entitlements(Dictionary);

impl Entitlements {
    /// The profile's entitlements, verbatim.
    pub fn from_profile(profile: &ProvisioningProfile) -> Self {
        Self(profile.entitlements.clone())
    }

    pub fn as_dictionary(&self) -> &Dictionary {
        &self.0
    }

    /// Drop `get-task-allow`. Returns whether it was present.
    pub fn strip_get_task_allow(&mut self) -> bool {
        self.0.remove(GET_TASK_ALLOW_KEY).is_some()
    }

    /// Point `application-identifier` at the app's real bundle identifier.
    ///
    /// The bundle identifier must equal the profile's app id, or start with
    /// its prefix for a wildcard profile. Only wildcard profiles change the
    /// entitlements: `application-identifier` becomes `TEAMID.<bundle id>`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Input`] if the bundle identifier is not covered by the profile.
    pub fn rebind_application_identifier(
        &mut self,
        profile: &ProvisioningProfile,
        bundle_identifier: &str,
    ) -> Result<()> {
        let covered = if profile.is_wildcard() {
            bundle_identifier.starts_with(profile.app_id.trim_end_matches(WILDCARD_SUFFIX))
        } else {
            bundle_identifier == profile.app_id
        };

        if !covered {
            return Err(Error::Input(format!(
                "Bundle identifier {} is not covered by provisioning profile app id {}",
                bundle_identifier, profile.app_id
            )));
        }

        if profile.is_wildcard() {
            if let Some(Value::String(current)) = self.0.get_mut(APPLICATION_IDENTIFIER_KEY) {
                *current = format!("{}.{}", profile.team_id, bundle_identifier);
                log::info!("Rebound application identifier to {}", current);
            }
        }

        Ok(())
    }

    /// XML plist with tab indentation.
    pub fn to_xml(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        let options = XmlWriteOptions::default().indent(b'\t', 1);
        Value::Dictionary(self.0.clone()).to_writer_xml_with_options(&mut buf, &options)?;
        Ok(buf)
    }

    /// Write [`Self::to_xml`] to `path`.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_xml()?)?;
        log::debug!("Wrote entitlements to {}", path.display());
        Ok(())
    }
}

/// Serialized entitlements for `profile`, with no keys removed.
pub fn synthesize(profile: &ProvisioningProfile) -> Result<Vec<u8>> {
    Entitlements::from_profile(profile).to_xml()
}
