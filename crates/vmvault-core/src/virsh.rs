//! libvirt access through `virsh`.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::preflight::VIRSH;
use crate::runner::{CommandSpec, Runner};

/// One row of `virsh domblklist --details`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDevice {
    /// Backing kind: `file`, `block`, `network`, ...
    pub kind: String,
    /// Device role: `disk`, `cdrom`, `floppy`, ...
    pub device: String,
    /// Guest target name (`vda`, `sda`, ...).
    pub target: String,
    /// Host path of the backing image.
    pub source: PathBuf,
}

impl BlockDevice {
    /// Backed by a plain file that can be archived and moved.
    pub fn is_file(&self) -> bool {
        self.kind == "file"
    }
}

/// Hypervisor control bound to one connection URI.
pub struct Virsh<'a> {
    runner: &'a dyn Runner,
    uri: String,
}

impl<'a> Virsh<'a> {
    pub fn new(runner: &'a dyn Runner, uri: impl Into<String>) -> Self {
        Self {
            runner,
            uri: uri.into(),
        }
    }

    fn command(&self) -> CommandSpec {
        CommandSpec::new(VIRSH)
            .args(["-c", &self.uri])
            .privileged()
    }

    /// Names of every defined domain, running or not.
    pub fn list_all(&self) -> Result<Vec<String>> {
        let out = self
            .runner
            .run_checked(&self.command().args(["list", "--all", "--name"]))?;
        Ok(parse_name_list(&out.stdout))
    }

    /// Whether `name` is defined.
    pub fn exists(&self, name: &str) -> Result<bool> {
        let out = self.runner.run(&self.command().args(["dominfo", name]))?;
        debug!(vm = name, code = ?out.code, "dominfo");
        Ok(out.success())
    }

    /// Full domain XML of `name`.
    pub fn dump_xml(&self, name: &str) -> Result<String> {
        let out = self
            .runner
            .run_checked(&self.command().args(["dumpxml", name]))?;
        if out.stdout.trim().is_empty() {
            return Err(Error::metadata(format!("virsh returned no XML for {name}")));
        }
        Ok(out.stdout)
    }

    /// Attached block devices of `name` that have a backing source.
    pub fn block_devices(&self, name: &str) -> Result<Vec<BlockDevice>> {
        let out = self
            .runner
            .run_checked(&self.command().args(["domblklist", name, "--details"]))?;
        parse_domblklist(&out.stdout)
    }

    /// Backing files of `name` that can be archived, in target order.
    pub fn disk_files(&self, name: &str) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for dev in self.block_devices(name)? {
            if dev.is_file() {
                files.push(dev.source);
            } else {
                warn!(
                    vm = name,
                    target = %dev.target,
                    kind = %dev.kind,
                    "skipping non-file block device"
                );
            }
        }
        Ok(files)
    }

    /// Register a domain from an XML definition.
    pub fn define(&self, xml: &Path) -> Result<()> {
        self.runner
            .run_checked(&self.command().arg("define").arg(xml))?;
        Ok(())
    }
}

fn parse_name_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse `domblklist --details`, dropping entries without a source (`-`).
///
/// The source column is everything after the third column, so paths with
/// spaces survive.
fn parse_domblklist(stdout: &str) -> Result<Vec<BlockDevice>> {
    let mut devices = Vec::new();
    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("---") || line.starts_with("Type ") {
            continue;
        }
        let mut rest = line;
        let mut columns = Vec::with_capacity(3);
        for _ in 0..3 {
            let (column, tail) = rest
                .split_once(char::is_whitespace)
                .ok_or_else(|| Error::metadata(format!("unexpected domblklist row: {line:?}")))?;
            columns.push(column.to_string());
            rest = tail.trim_start();
        }
        let source = rest.trim_end();
        if source.is_empty() || source == "-" {
            continue;
        }
        devices.push(BlockDevice {
            kind: columns[0].clone(),
            device: columns[1].clone(),
            target: columns[2].clone(),
            source: PathBuf::from(source),
        });
    }
    Ok(devices)
}
