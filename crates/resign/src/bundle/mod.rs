//! App bundle handling for iOS re-signing.
//!
//! This module provides functionality to:
//! - Classify bundle tree entries by extension ([`BundleKind`])
//! - Resolve the Mach-O a signable artifact is really signed through
//! - Walk nested bundles children-first ([`BundleWalker`])
//!
//! # Overview
//!
//! An `.app` bundle may embed frameworks, app extensions and plugins, each of
//! which is itself signed. The outer signature seals the on-disk contents of
//! the bundle, so every nested artifact has to be signed before the bundle
//! that contains it.
//!
//! Extensions are matched exactly, so `Legacy.APP` is not a bundle.
//!
//! | Extension | Kind | Signing target |
//! |-----------|------|----------------|
//! | `.app` | [`BundleKind::Application`] | `CFBundleExecutable` from `Info.plist` |
//! | `.appex` | [`BundleKind::Extension`] | `CFBundleExecutable` from `Info.plist` |
//! | `.framework` | [`BundleKind::Framework`] | `<name>.framework/<name>` |
//! | `.dylib` | [`BundleKind::DynamicLibrary`] | the file itself |
//! | `.so` | [`BundleKind::SharedObject`] | the file itself |
//! | `.vis`, `.pvr` | [`BundleKind::OtherBinary`] | the path itself |

pub mod info_plist;
pub mod walker;

pub use info_plist::InfoPlist;
pub use walker::BundleWalker;

use crate::Result;
use std::fs;
use std::path::{Path, PathBuf};

/// Signable entry types, recognized by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BundleKind {
    /// `.app`
    Application,
    /// `.appex` app extensions and plugins
    Extension,
    /// `.framework`
    Framework,
    /// `.dylib`
    DynamicLibrary,
    /// `.so`
    SharedObject,
    /// `.vis` and `.pvr` binary containers
    OtherBinary,
}

impl BundleKind {
    /// Classify `path` by its extension. Matching is case-sensitive.
    ///
    /// Returns `None` for entries that are never signed directly.
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        match path.as_ref().extension()?.to_str()? {
            "app" => Some(Self::Application),
            "appex" => Some(Self::Extension),
            "framework" => Some(Self::Framework),
            "dylib" => Some(Self::DynamicLibrary),
            "so" => Some(Self::SharedObject),
            "vis" | "pvr" => Some(Self::OtherBinary),
            _ => None,
        }
    }

    /// App and extension bundles carry a profile and entitlements.
    pub fn is_bundle(self) -> bool {
        matches!(self, Self::Application | Self::Extension)
    }

    /// Path handed to `codesign` for an artifact of this kind at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Parse`] if an app or extension bundle has no
    /// readable `Info.plist` declaring `CFBundleExecutable`.
    pub fn executable_path(self, path: &Path) -> Result<PathBuf> {
        match self {
            Self::Framework => {
                let name = path.file_stem().unwrap_or_default();
                Ok(path.join(name))
            }
            Self::Application | Self::Extension => {
                let info = InfoPlist::read(path)?;
                Ok(path.join(info.executable))
            }
            Self::DynamicLibrary | Self::SharedObject | Self::OtherBinary => Ok(path.to_path_buf()),
        }
    }
}

/// One entry of the bundle tree, built lazily while walking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleNode {
    /// Location on disk
    pub path: PathBuf,
    /// Signable kind, `None` for pass-through entries
    pub kind: Option<BundleKind>,
    /// Whether the entry is a directory (and may have children)
    pub is_dir: bool,
}

impl BundleNode {
    /// Classify the entry at `path`. Symlinks are not followed.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let is_dir = fs::symlink_metadata(&path)?.is_dir();
        let kind = BundleKind::from_path(&path);
        Ok(Self { path, kind, is_dir })
    }

    /// Directory children, in filesystem enumeration order.
    ///
    /// Files never have children, and plain files inside a directory are not
    /// returned: only directories are descended into.
    pub fn children(&self) -> Result<Vec<BundleNode>> {
        if !self.is_dir {
            return Ok(Vec::new());
        }

        let mut children = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                children.push(BundleNode {
                    kind: BundleKind::from_path(entry.path()),
                    path: entry.path(),
                    is_dir: true,
                });
            }
        }
        Ok(children)
    }
}
