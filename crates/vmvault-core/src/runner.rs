//! External command execution.
//!
//! Every tool vmvault drives (`virsh`, `7z`, `sha1sum`, `podman`, ...) is
//! described by a [`CommandSpec`] and executed through a [`Runner`]. The
//! runner decides whether a privileged command is elevated; callers only
//! mark which commands need it.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio as ProcessStdio};

use tracing::debug;
use zeroize::Zeroizing;

use crate::error::{Error, Result};

/// How the child's standard streams are connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Stdio {
    /// Capture stdout and stderr for the caller.
    #[default]
    Capture,
    /// Share the terminal with the child (progress output, password prompts).
    Inherit,
}

/// Description of one external command invocation.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    program: String,
    args: Vec<OsString>,
    cwd: Option<PathBuf>,
    privileged: bool,
    stdio: Stdio,
    input: Option<SecretInput>,
}

/// Bytes fed to a child's stdin. Wiped on drop and never printed.
#[derive(Clone)]
pub struct SecretInput(Zeroizing<Vec<u8>>);

impl SecretInput {
    pub fn new(bytes: Zeroizing<Vec<u8>>) -> Self {
        Self(bytes)
    }

    pub fn expose(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SecretInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretInput(***)")
    }
}

impl CommandSpec {
    /// Start a new command for `program`.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            privileged: false,
            stdio: Stdio::Capture,
            input: None,
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

    /// Write `input` to the child's stdin, then close it.
    ///
    /// Secrets travel this way so they never show up in the child's
    /// argv, where `ps` and the sudo log would see them.
    pub fn stdin_secret(mut self, input: SecretInput) -> Self {
        self.input = Some(input);
        self
    }

    /// Run the command from `dir`.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Mark the command as needing elevated rights.
    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }

    /// Connect the child to the terminal instead of capturing its output.
    pub fn inherit(mut self) -> Self {
        self.stdio = Stdio::Inherit;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn raw_args(&self) -> &[OsString] {
        &self.args
    }

    /// Arguments as lossy UTF-8 strings.
    pub fn arg_strings(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    pub fn cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    pub fn is_privileged(&self) -> bool {
        self.privileged
    }

    pub fn stdio(&self) -> Stdio {
        self.stdio
    }

    pub fn input(&self) -> Option<&SecretInput> {
        self.input.as_ref()
    }

    /// Re-target this command so it runs as `program` with `prefix`
    /// arguments placed before the original program and its arguments.
    ///
    /// Used to wrap a command inside another launcher (`sudo`, a
    /// container runtime). Stdin input is passed through.
    pub fn wrapped_in<I, S>(&self, program: &str, prefix: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut wrapped = CommandSpec::new(program).args(prefix);
        wrapped.args.push(OsString::from(&self.program));
        wrapped.args.extend(self.args.iter().cloned());
        wrapped.input = self.input.clone();
        wrapped.cwd = self.cwd.clone();
        wrapped.privileged = self.privileged;
        wrapped.stdio = self.stdio;
        wrapped
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when the child was killed by a signal.
    pub code: Option<i32>,
    /// Captured stdout (empty for inherited stdio).
    pub stdout: String,
    /// Captured stderr (empty for inherited stdio).
    pub stderr: String,
}

impl CommandOutput {
    /// A successful result with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed result with the given exit code and stderr.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Turn a non-zero exit into [`Error::CommandFailed`].
    pub fn check(self, program: &str) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(Error::CommandFailed {
                program: program.to_string(),
                code: self.code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

impl From<std::process::Output> for CommandOutput {
    fn from(out: std::process::Output) -> Self {
        Self {
            code: out.status.code(),
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
        }
    }
}

/// Write `input` to the child's stdin and close it.
///
/// A child that exits before reading everything is not an error here; its
/// exit status tells the caller what happened.
fn feed(child: &mut Child, input: &SecretInput) -> io::Result<()> {
    let Some(mut stdin) = child.stdin.take() else {
        return Ok(());
    };
    match stdin.write_all(input.expose()) {
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
            debug!("child closed stdin early");
            Ok(())
        }
        other => other,
    }
}

/// Executes external commands.
///
/// A runner reports the exit status as data; it never treats a non-zero
/// exit as an error itself. Only failing to start the program is an error.
pub trait Runner: Send + Sync {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;

    /// Run and fail on a non-zero exit.
    fn run_checked(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.run(spec)?.check(spec.program())
    }
}

/// Runs commands on the host, elevating privileged ones with `sudo`
/// when configured to.
#[derive(Debug, Clone, Copy)]
pub struct SystemRunner {
    elevate: bool,
}

impl SystemRunner {
    pub fn new(elevate: bool) -> Self {
        Self { elevate }
    }

    pub fn elevates(&self) -> bool {
        self.elevate
    }

    fn effective(&self, spec: &CommandSpec) -> CommandSpec {
        if self.elevate && spec.is_privileged() {
            spec.wrapped_in("sudo", ["--"])
        } else {
            spec.clone()
        }
    }
}

impl Runner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let effective = self.effective(spec);
        debug!(command = %effective, "running");

        let mut command = Command::new(effective.program());
        command.args(effective.raw_args());
        if let Some(dir) = effective.cwd() {
            command.current_dir(dir);
        }

        let spawn_err = |source| Error::Spawn {
            program: spec.program().to_string(),
            source,
        };

        let output = match (effective.stdio(), effective.input()) {
            (Stdio::Capture, None) => {
                let out = command
                    .stdin(ProcessStdio::null())
                    .output()
                    .map_err(spawn_err)?;
                CommandOutput::from(out)
            }
            (Stdio::Inherit, None) => {
                let status = command.status().map_err(spawn_err)?;
                CommandOutput {
                    code: status.code(),
                    ..CommandOutput::default()
                }
            }
            (stdio, Some(input)) => {
                command.stdin(ProcessStdio::piped());
                if stdio == Stdio::Capture {
                    command
                        .stdout(ProcessStdio::piped())
                        .stderr(ProcessStdio::piped());
                }
                let mut child = command.spawn().map_err(spawn_err)?;
                feed(&mut child, input).map_err(spawn_err)?;
                CommandOutput::from(child.wait_with_output().map_err(spawn_err)?)
            }
        };

        debug!(program = spec.program(), code = ?output.code, "finished");
        Ok(output)
    }
}
