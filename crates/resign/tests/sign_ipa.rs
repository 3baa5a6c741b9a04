//! End-to-end signing runs against recorded platform tools.
//!
//! `codesign` and `security` are replaced by [`FakeTools`], which answers the
//! way the real tools do and keeps what it was asked to do. The last test
//! runs the real tools and only works on macOS.

use plist::Value;
use resign::ipa::{create_ipa, extract_ipa, CompressionLevel};
use resign::{CommandOutput, CommandRunner, Error, Invocation, Remediation, Resign};
use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

const IDENTITY: &str = "Apple Development: Jane Doe (ABCDE12345)";
const CODESIGN: &str = "/usr/bin/codesign";
const SECURITY: &str = "/usr/bin/security";

const PROFILE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
	<key>CreationDate</key>
	<date>2024-03-01T10:00:00Z</date>
	<key>Entitlements</key>
	<dict>
		<key>application-identifier</key>
		<string>ABCDE12345.com.example.myapp</string>
		<key>com.apple.developer.team-identifier</key>
		<string>ABCDE12345</string>
		<key>get-task-allow</key>
		<true/>
		<key>keychain-access-groups</key>
		<array>
			<string>ABCDE12345.*</string>
		</array>
	</dict>
	<key>ExpirationDate</key>
	<date>2099-03-01T10:00:00Z</date>
	<key>Name</key>
	<string>MyApp Development</string>
</dict>
</plist>
"#;

/// Stand-in for `codesign` and `security`.
#[derive(Default)]
struct FakeTools {
    calls: RefCell<Vec<Invocation>>,
    entitlements_seen: RefCell<Vec<Vec<u8>>>,
    reject_signatures: bool,
}

impl FakeTools {
    fn rejecting() -> Self {
        Self {
            reject_signatures: true,
            ..Self::default()
        }
    }

    fn calls_to(&self, program: &str) -> Vec<Invocation> {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.program() == program)
            .cloned()
            .collect()
    }
}

impl CommandRunner for FakeTools {
    fn run(&self, invocation: &Invocation) -> io::Result<CommandOutput> {
        self.calls.borrow_mut().push(invocation.clone());

        match invocation.program() {
            SECURITY if invocation.has_arg("find-identity") => Ok(CommandOutput::ok(format!(
                "  1) 0123456789ABCDEF0123456789ABCDEF01234567 \"{}\"\n     1 valid identities found\n",
                IDENTITY
            ))),
            SECURITY if invocation.has_arg("cms") => {
                let path = invocation.last_arg().unwrap_or_default();
                Ok(CommandOutput::ok(fs::read(path)?))
            }
            CODESIGN if invocation.has_arg("-v") => Ok(CommandOutput::with_code(
                if self.reject_signatures { 1 } else { 0 },
            )),
            CODESIGN => {
                if let Some(path) = invocation.value_of("--entitlements") {
                    self.entitlements_seen.borrow_mut().push(fs::read(path)?);
                }
                Ok(CommandOutput::ok(Vec::new()))
            }
            _ => Ok(CommandOutput::ok(Vec::new())),
        }
    }
}

#[derive(Default)]
struct CountingRemediation {
    runs: Cell<usize>,
}

impl Remediation for CountingRemediation {
    fn remediate(&self, _runner: &dyn CommandRunner) -> resign::Result<()> {
        self.runs.set(self.runs.get() + 1);
        Ok(())
    }
}

struct Workspace {
    temp: TempDir,
    input: PathBuf,
    profile: PathBuf,
    probe: PathBuf,
    work_dir: PathBuf,
    output: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("MyApp.ipa");
        write_my_app_ipa(&input);

        let profile = temp.path().join("MyApp_Development.mobileprovision");
        fs::write(&profile, PROFILE).unwrap();

        let probe = temp.path().join("probe-source");
        fs::write(&probe, b"binary").unwrap();

        let work_dir = temp.path().join("tmp");
        fs::create_dir(&work_dir).unwrap();

        let output = temp.path().join("signed/MyApp.ipa");
        Self {
            temp,
            input,
            profile,
            probe,
            work_dir,
            output,
        }
    }

    fn builder(&self, tools: Rc<FakeTools>) -> Resign {
        Resign::new()
            .identity(IDENTITY)
            .profile_path(&self.profile)
            .probe_source(&self.probe)
            .work_dir(&self.work_dir)
            .runner(tools)
    }

    fn work_dir_is_empty(&self) -> bool {
        fs::read_dir(&self.work_dir).unwrap().next().is_none()
    }
}

fn write_my_app_ipa(path: &Path) {
    let mut zip = ZipWriter::new(File::create(path).unwrap());
    let options = SimpleFileOptions::default();

    zip.add_directory("Payload/", options).unwrap();
    zip.add_directory("Payload/MyApp.app/", options).unwrap();
    zip.start_file("Payload/MyApp.app/Info.plist", options).unwrap();
    zip.write_all(
        br#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0">
<dict>
	<key>CFBundleExecutable</key>
	<string>MyApp</string>
	<key>CFBundleIdentifier</key>
	<string>com.example.myapp</string>
</dict>
</plist>
"#,
    )
    .unwrap();
    zip.start_file("Payload/MyApp.app/MyApp", options.unix_permissions(0o755))
        .unwrap();
    zip.write_all(b"MACHO_PLACEHOLDER").unwrap();
    zip.add_directory("Payload/MyApp.app/Frameworks/Kit.framework/", options)
        .unwrap();
    zip.start_file("Payload/MyApp.app/Frameworks/Kit.framework/Kit", options)
        .unwrap();
    zip.write_all(b"MACHO_PLACEHOLDER").unwrap();
    zip.start_file("Payload/MyApp.app/Base.lproj/Main.strings", options)
        .unwrap();
    zip.write_all(b"\"title\" = \"MyApp\";").unwrap();
    zip.finish().unwrap();
}

fn read_entry(ipa: &Path, name: &str) -> Vec<u8> {
    let mut archive = ZipArchive::new(File::open(ipa).unwrap()).unwrap();
    let mut entry = archive.by_name(name).unwrap();
    let mut data = Vec::new();
    io::copy(&mut entry, &mut data).unwrap();
    data
}

fn file_listing(ipa: &Path) -> BTreeSet<String> {
    let mut archive = ZipArchive::new(File::open(ipa).unwrap()).unwrap();
    (0..archive.len())
        .filter_map(|i| {
            let entry = archive.by_index(i).unwrap();
            (!entry.is_dir()).then(|| entry.name().to_string())
        })
        .collect()
}

fn keys(plist_bytes: &[u8]) -> BTreeSet<String> {
    let value: Value = plist::from_bytes(plist_bytes).unwrap();
    value
        .into_dictionary()
        .unwrap()
        .keys()
        .cloned()
        .collect()
}

#[test]
fn test_sign_my_app_embeds_profile_and_entitlements() {
    let ws = Workspace::new();
    let tools = Rc::new(FakeTools::default());

    ws.builder(tools.clone()).sign_ipa(&ws.input, &ws.output).unwrap();

    let embedded = read_entry(&ws.output, "Payload/MyApp.app/embedded.mobileprovision");
    assert_eq!(embedded, fs::read(&ws.profile).unwrap());

    let seen = tools.entitlements_seen.borrow();
    assert_eq!(seen.len(), 1, "only the app bundle gets entitlements");
    let profile_entitlements: BTreeSet<String> = [
        "application-identifier",
        "com.apple.developer.team-identifier",
        "get-task-allow",
        "keychain-access-groups",
    ]
    .into_iter()
    .map(String::from)
    .collect();
    assert_eq!(keys(&seen[0]), profile_entitlements);

    assert!(ws.work_dir_is_empty(), "temporary directory must be removed");
}

#[test]
fn test_sign_my_app_signs_framework_before_app() {
    let ws = Workspace::new();
    let tools = Rc::new(FakeTools::default());

    ws.builder(tools.clone()).sign_ipa(&ws.input, &ws.output).unwrap();

    let targets: Vec<PathBuf> = tools
        .calls_to(CODESIGN)
        .iter()
        .filter(|c| c.has_arg("-s") && !c.has_arg("-v"))
        .filter_map(|c| c.last_arg().map(PathBuf::from))
        .filter(|p| p.components().any(|c| c.as_os_str() == "Payload"))
        .collect();

    assert_eq!(targets.len(), 2);
    assert!(targets[0].ends_with("Frameworks/Kit.framework/Kit"));
    assert!(targets[1].ends_with("MyApp.app/MyApp"));
}

#[test]
fn test_sign_keeps_unsigned_resources() {
    let ws = Workspace::new();
    let tools = Rc::new(FakeTools::default());

    ws.builder(tools).sign_ipa(&ws.input, &ws.output).unwrap();

    let mut expected = file_listing(&ws.input);
    expected.insert("Payload/MyApp.app/embedded.mobileprovision".to_string());
    assert_eq!(file_listing(&ws.output), expected);
}

#[test]
fn test_invalid_identity_stops_before_extraction() {
    let ws = Workspace::new();
    let tools = Rc::new(FakeTools::rejecting());
    let remediation = Rc::new(CountingRemediation::default());

    let err = ws
        .builder(tools.clone())
        .remediation(remediation.clone())
        .sign_ipa(&ws.input, &ws.output)
        .unwrap_err();

    assert!(matches!(err, Error::InvalidIdentity { .. }), "got {err:?}");
    assert_eq!(remediation.runs.get(), 1, "remediation runs exactly once");
    assert_eq!(tools.calls_to(CODESIGN).iter().filter(|c| c.has_arg("-v")).count(), 2);

    let touched_payload = tools
        .calls_to(CODESIGN)
        .iter()
        .filter_map(|c| c.last_arg().map(PathBuf::from))
        .any(|p| p.components().any(|c| c.as_os_str() == "Payload"));
    assert!(!touched_payload, "nothing inside the archive may be signed");
    assert!(ws.work_dir_is_empty());
    assert!(!ws.output.exists());
}

#[test]
fn test_zip_input_is_rejected_without_side_effects() {
    let ws = Workspace::new();
    let zip = ws.temp.path().join("MyApp.zip");
    fs::copy(&ws.input, &zip).unwrap();
    let tools = Rc::new(FakeTools::default());

    let err = ws.builder(tools.clone()).sign_ipa(&zip, &ws.output).unwrap_err();

    match err {
        Error::Input(msg) => assert!(msg.contains("unsupported file type"), "{msg}"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(tools.calls.borrow().is_empty());
    assert!(ws.work_dir_is_empty());
    assert!(!ws.output.exists());
    assert!(!ws.output.parent().unwrap().exists());
}

#[test]
fn test_extract_then_repack_keeps_listing() {
    let ws = Workspace::new();
    let work = ws.temp.path().join("work");
    let repacked = ws.temp.path().join("repacked.ipa");

    extract_ipa(&ws.input, &work).unwrap();
    create_ipa(&work, &repacked, CompressionLevel::NONE).unwrap();

    assert_eq!(file_listing(&repacked), file_listing(&ws.input));
    assert_eq!(
        read_entry(&repacked, "Payload/MyApp.app/Info.plist"),
        read_entry(&ws.input, "Payload/MyApp.app/Info.plist")
    );
}

#[test]
#[cfg(target_os = "macos")]
#[ignore = "runs the real codesign"]
fn test_resigning_ad_hoc_is_idempotent() {
    use resign::{BundleWalker, CodeSigner, Identity, SystemRunner};

    let temp = TempDir::new().unwrap();
    let app = temp.path().join("Probe.app");
    fs::create_dir(&app).unwrap();
    fs::write(
        app.join("Info.plist"),
        r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0"><dict>
<key>CFBundleExecutable</key><string>Probe</string>
<key>CFBundleIdentifier</key><string>com.example.probe</string>
</dict></plist>"#,
    )
    .unwrap();
    fs::copy(std::env::current_exe().unwrap(), app.join("Probe")).unwrap();

    let runner = SystemRunner;
    let signer = CodeSigner::new(&runner);
    let identity = Identity::new("-");

    for _ in 0..2 {
        BundleWalker::new(&signer, &identity).sign_tree(&app).unwrap();
        assert!(signer.verify(&app.join("Probe")).unwrap());
    }
}
