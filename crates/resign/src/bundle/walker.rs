//! Children-first signing of a bundle tree.

use super::BundleNode;
use crate::codesign::CodeSigner;
use crate::keychain::Identity;
use crate::Result;
use std::path::Path;

/// Signs every recognized artifact under a root, innermost first.
///
/// A directory's signable descendants are always signed before the directory
/// itself, because the outer signature seals whatever is on disk at that
/// moment. The walk stops at the first failure.
pub struct BundleWalker<'a> {
    signer: &'a CodeSigner<'a>,
    identity: &'a Identity,
    entitlements: Option<&'a Path>,
    provisioning_profile: Option<&'a Path>,
}

impl<'a> BundleWalker<'a> {
    pub fn new(signer: &'a CodeSigner<'a>, identity: &'a Identity) -> Self {
        Self {
            signer,
            identity,
            entitlements: None,
            provisioning_profile: None,
        }
    }

    /// Entitlements plist passed when signing app and extension bundles.
    pub fn entitlements(mut self, path: &'a Path) -> Self {
        self.entitlements = Some(path);
        self
    }

    /// Profile embedded into app and extension bundles.
    pub fn provisioning_profile(mut self, path: &'a Path) -> Self {
        self.provisioning_profile = Some(path);
        self
    }

    /// Sign `root` and everything signable beneath it.
    ///
    /// Returns the number of artifacts signed.
    pub fn sign_tree(&self, root: &Path) -> Result<usize> {
        let signed = self.visit(&BundleNode::new(root)?)?;
        log::info!("Signed {} artifact(s) under {}", signed, root.display());
        Ok(signed)
    }

    fn visit(&self, node: &BundleNode) -> Result<usize> {
        let mut signed = 0;
        for child in node.children()? {
            signed += self.visit(&child)?;
        }

        if node.kind.is_none() {
            return Ok(signed);
        }

        self.signer.sign(
            &node.path,
            self.identity,
            self.entitlements,
            self.provisioning_profile,
        )?;
        Ok(signed + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::testing::FakeRunner;
    use crate::process::{CommandOutput, Invocation};
    use crate::Error;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn write_info(bundle: &Path, executable: &str) {
        fs::write(
            bundle.join("Info.plist"),
            format!(
                r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0"><dict>
<key>CFBundleExecutable</key><string>{executable}</string>
<key>CFBundleIdentifier</key><string>com.example.{executable}</string>
</dict></plist>"#
            ),
        )
        .unwrap();
        fs::write(bundle.join(executable), b"MACHO_PLACEHOLDER").unwrap();
    }

    /// MyApp.app with nested frameworks, an extension and inert entries.
    fn build_tree(root: &Path) -> PathBuf {
        let app = root.join("MyApp.app");
        let a = app.join("Frameworks/A.framework");
        let b = a.join("Frameworks/B.framework");
        let share = app.join("PlugIns/Share.appex");
        let c = share.join("Frameworks/C.framework");
        for dir in [&a, &b, &c, &share, &app.join("Base.lproj")] {
            fs::create_dir_all(dir).unwrap();
        }
        write_info(&app, "MyApp");
        write_info(&share, "Share");
        fs::write(a.join("A"), b"bin").unwrap();
        fs::write(b.join("B"), b"bin").unwrap();
        fs::write(c.join("C"), b"bin").unwrap();
        fs::write(app.join("Frameworks/libloose.dylib"), b"bin").unwrap();
        app
    }

    fn signed_targets(runner: &FakeRunner) -> Vec<PathBuf> {
        runner
            .calls_to("/usr/bin/codesign")
            .iter()
            .map(|c| PathBuf::from(c.last_arg().unwrap()))
            .collect()
    }

    fn position(order: &[PathBuf], target: &Path) -> usize {
        order
            .iter()
            .position(|p| p == target)
            .unwrap_or_else(|| panic!("{} was not signed", target.display()))
    }

    #[test]
    fn test_sign_tree_is_post_order() {
        let temp = TempDir::new().unwrap();
        let app = build_tree(temp.path());
        let runner = FakeRunner::succeeding();
        let signer = CodeSigner::new(&runner);
        let identity = Identity::new("Apple Development: Test");

        let count = BundleWalker::new(&signer, &identity).sign_tree(&app).unwrap();
        assert_eq!(count, 5);

        let order = signed_targets(&runner);
        assert_eq!(order.len(), 5);

        let a = position(&order, &app.join("Frameworks/A.framework/A"));
        let b = position(&order, &app.join("Frameworks/A.framework/Frameworks/B.framework/B"));
        let share = position(&order, &app.join("PlugIns/Share.appex/Share"));
        let c = position(&order, &app.join("PlugIns/Share.appex/Frameworks/C.framework/C"));
        let main = position(&order, &app.join("MyApp"));

        assert!(b < a, "B.framework must be signed before A.framework");
        assert!(c < share, "C.framework must be signed before Share.appex");
        assert_eq!(main, order.len() - 1, "the app is signed last");
    }

    #[test]
    fn test_sign_tree_skips_unrecognized_and_loose_files() {
        let temp = TempDir::new().unwrap();
        let app = build_tree(temp.path());
        let runner = FakeRunner::succeeding();
        let signer = CodeSigner::new(&runner);
        let identity = Identity::new("Apple Development: Test");

        BundleWalker::new(&signer, &identity).sign_tree(&app).unwrap();

        for target in signed_targets(&runner) {
            assert!(!target.ends_with("libloose.dylib"));
            assert!(!target.starts_with(app.join("Base.lproj")));
        }
    }

    #[test]
    fn test_sign_tree_aborts_on_first_failure() {
        let temp = TempDir::new().unwrap();
        let app = build_tree(temp.path());
        let failing = app.join("Frameworks/A.framework/Frameworks/B.framework/B");
        let runner = FakeRunner::new(move |inv: &Invocation| {
            if inv.last_arg() == Some(failing.as_os_str()) {
                Ok(CommandOutput::with_code(1))
            } else {
                Ok(CommandOutput::ok(Vec::new()))
            }
        });
        let signer = CodeSigner::new(&runner);
        let identity = Identity::new("Apple Development: Test");

        let err = BundleWalker::new(&signer, &identity).sign_tree(&app).unwrap_err();
        assert!(matches!(err, Error::Signing { code: Some(1), .. }));

        let order = signed_targets(&runner);
        assert!(!order.contains(&app.join("MyApp")), "the app must not be signed after a failure");
        assert!(!order.contains(&app.join("Frameworks/A.framework/A")));
    }

    #[test]
    fn test_sign_tree_passes_entitlements_and_profile_to_bundles_only() {
        let temp = TempDir::new().unwrap();
        let app = build_tree(temp.path());
        let entitlements = temp.path().join("entitlements.plist");
        fs::write(&entitlements, b"<plist/>").unwrap();
        let profile = temp.path().join("profile.mobileprovision");
        fs::write(&profile, b"PROFILE").unwrap();

        let runner = FakeRunner::succeeding();
        let signer = CodeSigner::new(&runner);
        let identity = Identity::new("Apple Development: Test");

        BundleWalker::new(&signer, &identity)
            .entitlements(&entitlements)
            .provisioning_profile(&profile)
            .sign_tree(&app)
            .unwrap();

        for call in runner.calls_to("/usr/bin/codesign") {
            let target = PathBuf::from(call.last_arg().unwrap());
            let is_bundle_executable =
                target == app.join("MyApp") || target == app.join("PlugIns/Share.appex/Share");
            assert_eq!(call.has_arg("--entitlements"), is_bundle_executable, "{}", target.display());
        }

        assert_eq!(fs::read(app.join("embedded.mobileprovision")).unwrap(), b"PROFILE");
        assert_eq!(
            fs::read(app.join("PlugIns/Share.appex/embedded.mobileprovision")).unwrap(),
            b"PROFILE"
        );
        assert!(!app.join("Frameworks/A.framework/embedded.mobileprovision").exists());
    }

    #[test]
    fn test_sign_tree_single_file_root() {
        let temp = TempDir::new().unwrap();
        let lib = temp.path().join("libfoo.dylib");
        fs::write(&lib, b"bin").unwrap();

        let runner = FakeRunner::succeeding();
        let signer = CodeSigner::new(&runner);
        let identity = Identity::new("-");

        assert_eq!(BundleWalker::new(&signer, &identity).sign_tree(&lib).unwrap(), 1);
        assert_eq!(signed_targets(&runner), vec![lib]);
    }
}
