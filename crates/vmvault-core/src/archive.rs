//! Encrypted 7-Zip archives.
//!
//! All archives are 7z with AES-256 and encrypted headers, so neither file
//! contents nor file names are readable without the passphrase. Entries are
//! always stored by bare file name: each command runs from the directory
//! holding the entry.
//!
//! The passphrase is never put on the command line. `7z` gets a bare `-p`
//! and reads the passphrase from its stdin.

use std::path::{Path, PathBuf};

use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::container::ContainerImage;
use crate::error::{Error, Result};
use crate::preflight::SEVEN_ZIP;
use crate::prompt::Passphrase;
use crate::runner::{CommandSpec, Runner, SecretInput};

/// Runs `7z` on the host or inside the archiver container.
pub struct Archiver<'a> {
    runner: &'a dyn Runner,
    container: Option<ContainerImage<'a>>,
    mounts: Vec<PathBuf>,
}

impl<'a> Archiver<'a> {
    /// Archiver using the host's `7z`.
    pub fn host(runner: &'a dyn Runner) -> Self {
        Self {
            runner,
            container: None,
            mounts: Vec::new(),
        }
    }

    /// Archiver running inside `image`, with `mounts` bind-mounted.
    pub fn in_container(runner: &'a dyn Runner, image: ContainerImage<'a>, mounts: Vec<PathBuf>) -> Self {
        Self {
            runner,
            container: Some(image),
            mounts,
        }
    }

    pub fn uses_container(&self) -> bool {
        self.container.is_some()
    }

    /// Make another directory visible to the containerized archiver.
    pub fn add_mount(&mut self, dir: impl Into<PathBuf>) {
        self.mounts.push(dir.into());
    }

    fn exec(&self, spec: CommandSpec) -> Result<()> {
        let spec = spec.privileged();
        let spec = match &self.container {
            Some(image) => image.wrap(&spec, &self.mounts),
            None => spec,
        };
        self.runner.run_checked(&spec)?;
        Ok(())
    }

    /// Create `archive` from `entries`, which are names relative to `cwd`.
    pub fn create(&self, archive: &Path, cwd: &Path, entries: &[&str], pass: &Passphrase) -> Result<()> {
        info!(archive = %archive.display(), "creating archive");
        self.exec(add_command(archive, pass).args(entries).current_dir(cwd))
    }

    /// Add `file` to `archive`, stored under its file name.
    pub fn append(&self, archive: &Path, file: &Path, pass: &Passphrase) -> Result<()> {
        let (dir, name) = split_entry(file)?;
        debug!(archive = %archive.display(), entry = %name, "appending to archive");
        self.exec(add_command(archive, pass).arg(name).current_dir(dir))
    }

    /// Extract every entry of `archive` into `dest`.
    pub fn extract(&self, archive: &Path, dest: &Path, pass: &Passphrase) -> Result<()> {
        info!(archive = %archive.display(), dest = %dest.display(), "extracting archive");
        let mut out = std::ffi::OsString::from("-o");
        out.push(dest);
        self.exec(
            CommandSpec::new(SEVEN_ZIP)
                .args(["x", "-p"])
                .stdin_secret(password_input(pass, 1))
                .arg(out)
                .arg("-y")
                .arg(archive),
        )
    }

    /// Decrypt and test every entry of `archive` without writing anything.
    pub fn test(&self, archive: &Path, pass: &Passphrase) -> Result<()> {
        info!(archive = %archive.display(), "testing archive");
        self.exec(
            CommandSpec::new(SEVEN_ZIP)
                .args(["t", "-p"])
                .stdin_secret(password_input(pass, 1))
                .arg(archive),
        )
    }
}

/// The passphrase as `lines` newline-terminated answers.
///
/// Creating an archive asks for the passphrase and then for its
/// confirmation; reading one asks once.
fn password_input(pass: &Passphrase, lines: usize) -> SecretInput {
    let line = pass.expose().as_bytes();
    let mut bytes = Zeroizing::new(Vec::with_capacity((line.len() + 1) * lines));
    for _ in 0..lines {
        bytes.extend_from_slice(line);
        bytes.push(b'\n');
    }
    SecretInput::new(bytes)
}

fn add_command(archive: &Path, pass: &Passphrase) -> CommandSpec {
    CommandSpec::new(SEVEN_ZIP)
        .args(["a", "-t7z", "-mhe=on", "-y", "-p"])
        .stdin_secret(password_input(pass, 2))
        .arg(archive)
}

fn split_entry(file: &Path) -> Result<(&Path, &str)> {
    let name = file
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::metadata(format!("'{}' has no usable file name", file.display())))?;
    let dir = file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    Ok((dir, name))
}
