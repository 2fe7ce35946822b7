//! Checksum sidecars.
//!
//! Sidecars use the coreutils line format (`<hex>  <name>`) so they can be
//! checked by hand with `sha1sum -c` / `sha256sum -c`. The name is always a
//! bare file name; verification runs from the directory holding the file.
//!
//! The whole-archive SHA-256 is computed in-process, since the archive sits
//! in the user's backup directory. Disk images usually need elevated rights
//! to read, so their SHA-1 is computed by `sha1sum` through the [`Runner`].

use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::preflight::SHA1SUM;
use crate::runner::{CommandSpec, Runner};

/// Extension of per-disk sidecars.
pub const SHA1_EXT: &str = "sha1";
/// Extension of the whole-archive sidecar.
pub const SHA256_EXT: &str = "sha256";

const SHA1_HEX_LEN: usize = 40;
const SHA256_HEX_LEN: usize = 64;
const READ_BUF_SIZE: usize = 1024 * 1024;

/// One digest line: a hex digest and the file it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sidecar {
    /// Lowercase hex digest.
    pub digest: String,
    /// Bare name of the covered file.
    pub file_name: String,
}

impl Sidecar {
    pub fn new(digest: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            digest: digest.into().to_ascii_lowercase(),
            file_name: file_name.into(),
        }
    }

    /// Parse the first line of coreutils checksum output.
    ///
    /// Accepts both text (`<hex>  <name>`) and binary (`<hex> *<name>`) mode.
    pub fn parse(text: &str) -> Result<Self> {
        let line = text
            .lines()
            .next()
            .ok_or_else(|| Error::integrity("empty checksum"))?;
        let (digest, rest) = line
            .split_once(' ')
            .ok_or_else(|| Error::integrity(format!("malformed checksum line: {line:?}")))?;
        if digest.is_empty() || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::integrity(format!("malformed digest: {digest:?}")));
        }
        let name = rest
            .strip_prefix(' ')
            .or_else(|| rest.strip_prefix('*'))
            .ok_or_else(|| Error::integrity(format!("malformed checksum line: {line:?}")))?;
        if name.is_empty() {
            return Err(Error::integrity(format!("checksum line names no file: {line:?}")));
        }
        Ok(Self::new(digest, name))
    }

    /// Render as one coreutils text-mode line.
    pub fn to_line(&self) -> String {
        format!("{}  {}\n", self.digest, self.file_name)
    }

    pub fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| Error::io(e, path))?;
        Self::parse(&text)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_line()).map_err(|e| Error::io(e, path))
    }
}

/// `file` with `.ext` appended to its full name.
pub fn sidecar_path(file: &Path, ext: &str) -> PathBuf {
    let mut name = file.as_os_str().to_os_string();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

fn file_name_of(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| Error::metadata(format!("'{}' has no usable file name", path.display())))
}

/// SHA-256 of `path` as lowercase hex.
///
/// `progress` is called with `(bytes_hashed, total_bytes)` after each read.
pub fn sha256_file(path: &Path, mut progress: impl FnMut(u64, u64)) -> Result<String> {
    let file = File::open(path).map_err(|e| Error::io(e, path))?;
    let total = file.metadata().map_err(|e| Error::io(e, path))?.len();
    let mut reader = BufReader::with_capacity(READ_BUF_SIZE, file);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];
    let mut done = 0u64;

    loop {
        let n = reader.read(&mut buf).map_err(|e| Error::io(e, path))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        done += n as u64;
        progress(done, total);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Hash `archive` and write `<archive>.sha256` beside it.
pub fn write_archive_sidecar(archive: &Path, progress: impl FnMut(u64, u64)) -> Result<Sidecar> {
    let digest = sha256_file(archive, progress)?;
    let sidecar = Sidecar::new(digest, file_name_of(archive)?);
    let path = sidecar_path(archive, SHA256_EXT);
    sidecar.write(&path)?;
    info!(sidecar = %path.display(), "wrote archive checksum");
    Ok(sidecar)
}

/// Check `archive` against `<archive>.sha256`.
pub fn verify_archive_sidecar(archive: &Path, progress: impl FnMut(u64, u64)) -> Result<()> {
    let path = sidecar_path(archive, SHA256_EXT);
    if !path.exists() {
        return Err(Error::integrity(format!(
            "checksum file {} is missing",
            path.display()
        )));
    }
    let expected = Sidecar::read(&path)?;
    if expected.digest.len() != SHA256_HEX_LEN {
        return Err(Error::integrity(format!(
            "{} does not hold a SHA-256 digest",
            path.display()
        )));
    }
    let name = file_name_of(archive)?;
    if expected.file_name != name {
        return Err(Error::integrity(format!(
            "{} covers '{}', not '{name}'",
            path.display(),
            expected.file_name
        )));
    }

    let actual = sha256_file(archive, progress)?;
    if actual != expected.digest {
        return Err(Error::integrity(format!(
            "{name}: SHA-256 mismatch (expected {}, got {actual})",
            expected.digest
        )));
    }
    info!(archive = %archive.display(), "archive checksum verified");
    Ok(())
}

/// SHA-1 sidecar for a disk image, computed with elevated `sha1sum`.
pub fn disk_sidecar(runner: &dyn Runner, disk: &Path) -> Result<Sidecar> {
    let out = runner.run_checked(&CommandSpec::new(SHA1SUM).arg(disk).privileged())?;
    let parsed = Sidecar::parse(&out.stdout)?;
    if parsed.digest.len() != SHA1_HEX_LEN {
        return Err(Error::metadata(format!(
            "unexpected sha1sum output for {}",
            disk.display()
        )));
    }
    let sidecar = Sidecar::new(parsed.digest, file_name_of(disk)?);
    debug!(disk = %disk.display(), digest = %sidecar.digest, "hashed disk");
    Ok(sidecar)
}

/// Verify every `*.sha1` sidecar in `dir` and return the covered file names.
///
/// Each sidecar must be named after the file it covers. A directory with no
/// sidecars verifies trivially.
pub fn verify_disk_sidecars(runner: &dyn Runner, dir: &Path) -> Result<Vec<String>> {
    let suffix = format!(".{SHA1_EXT}");
    let mut sidecars: Vec<String> = fs::read_dir(dir)
        .map_err(|e| Error::io(e, dir))?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .filter(|name| name.ends_with(&suffix) && name.len() > suffix.len())
        .collect();
    sidecars.sort();

    let mut verified = Vec::with_capacity(sidecars.len());
    for sidecar_name in sidecars {
        let covered = &sidecar_name[..sidecar_name.len() - suffix.len()];
        let sidecar = Sidecar::read(&dir.join(&sidecar_name))?;
        if sidecar.file_name != covered {
            return Err(Error::integrity(format!(
                "{sidecar_name} covers '{}', expected '{covered}'",
                sidecar.file_name
            )));
        }

        let out = runner.run(
            &CommandSpec::new(SHA1SUM)
                .arg("-c")
                .arg(&sidecar_name)
                .current_dir(dir)
                .privileged(),
        )?;
        if !out.success() {
            let detail = format!("{}{}", out.stdout.trim(), out.stderr.trim());
            return Err(Error::integrity(format!("{covered}: SHA-1 mismatch ({detail})")));
        }
        debug!(disk = covered, "disk checksum verified");
        verified.push(covered.to_string());
    }
    Ok(verified)
}
