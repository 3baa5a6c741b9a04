//! External tool execution.
//!
//! Every platform tool the signing pipeline relies on (`codesign`,
//! `security`, `xcode-select`, `pkgutil`) is run through [`CommandRunner`].
//! Runs are synchronous: the caller blocks until the tool exits. Standard
//! error is inherited so tool diagnostics reach the operator console
//! untouched; only standard output is captured.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io;
use std::process::{Command, Stdio};

/// A program plus its argument vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    program: String,
    args: Vec<OsString>,
}

impl Invocation {
    /// Start an invocation of `program`.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// Program name.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments, without the program name.
    pub fn arguments(&self) -> &[OsString] {
        &self.args
    }

    /// Whether any argument equals `needle`.
    pub fn has_arg(&self, needle: impl AsRef<OsStr>) -> bool {
        let needle = needle.as_ref();
        self.args.iter().any(|a| a == needle)
    }

    /// The argument following `flag`, if present.
    pub fn value_of(&self, flag: impl AsRef<OsStr>) -> Option<&OsStr> {
        let flag = flag.as_ref();
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(|a| a.as_os_str())
    }

    /// The final argument.
    pub fn last_arg(&self) -> Option<&OsStr> {
        self.args.last().map(|a| a.as_os_str())
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Captured result of a finished tool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Captured standard output
    pub stdout: Vec<u8>,
    /// Exit code, `None` if terminated by a signal
    pub code: Option<i32>,
}

impl CommandOutput {
    /// Output of a tool that exited with `code`.
    pub fn with_code(code: i32) -> Self {
        Self {
            stdout: Vec::new(),
            code: Some(code),
        }
    }

    /// Successful output carrying `stdout`.
    pub fn ok(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: stdout.into(),
            code: Some(0),
        }
    }

    /// Whether the tool exited with status 0.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Synchronous executor for trusted external tools.
///
/// `Err` means the process could not be launched at all; a launched process
/// that fails reports its status through [`CommandOutput::code`].
pub trait CommandRunner {
    /// Run `invocation` to completion.
    fn run(&self, invocation: &Invocation) -> io::Result<CommandOutput>;
}

impl<T: CommandRunner + ?Sized> CommandRunner for &T {
    fn run(&self, invocation: &Invocation) -> io::Result<CommandOutput> {
        (**self).run(invocation)
    }
}

/// [`CommandRunner`] backed by [`std::process::Command`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> io::Result<CommandOutput> {
        log::debug!("Running: {}", invocation);

        // stdin stays attached so `sudo` can prompt for a password
        let output = Command::new(invocation.program())
            .args(invocation.arguments())
            .stdin(Stdio::inherit())
            .stderr(Stdio::inherit())
            .output()?;

        Ok(CommandOutput {
            stdout: output.stdout,
            code: output.status.code(),
        })
    }
}
