//! Command line developer tools preflight.

use crate::process::{CommandRunner, Invocation};
use crate::{Error, Result};

const DEVELOPER_TOOLS_PACKAGE: &str = "com.apple.pkg.DeveloperToolsCLI";

/// Whether both `xcode-select -p` and the developer tools package receipt are present.
pub fn command_line_tools_installed(runner: &dyn CommandRunner) -> bool {
    let probes = [
        Invocation::new("xcode-select").arg("-p"),
        Invocation::new("pkgutil").arg(format!("--pkg-info={}", DEVELOPER_TOOLS_PACKAGE)),
    ];

    probes.iter().all(|probe| match runner.run(probe) {
        Ok(output) => output.success(),
        Err(e) => {
            log::debug!("{} could not be run: {}", probe.program(), e);
            false
        }
    })
}

/// Make sure `codesign` and friends are available, offering to install them.
///
/// `confirm` is asked before launching `xcode-select --install`.
///
/// # Errors
///
/// Returns [`Error::MissingTool`] if the tools are missing and the operator
/// declines, the installer fails, or the tools are still missing afterwards.
pub fn ensure_command_line_tools(
    runner: &dyn CommandRunner,
    confirm: &dyn Fn(&str) -> bool,
) -> Result<()> {
    if command_line_tools_installed(runner) {
        return Ok(());
    }

    log::warn!("Xcode command line tools are not installed");
    if !confirm("Install the Xcode command line tools now?") {
        return Err(Error::MissingTool(
            "install the Xcode command line tools and run again".to_string(),
        ));
    }

    let output = runner.run(&Invocation::new("xcode-select").arg("--install"))?;
    if !output.success() {
        return Err(Error::MissingTool(
            "xcode-select --install did not complete".to_string(),
        ));
    }

    if !command_line_tools_installed(runner) {
        return Err(Error::MissingTool(
            "Xcode command line tools are still missing after installation".to_string(),
        ));
    }

    log::info!("Xcode command line tools installed");
    Ok(())
}
