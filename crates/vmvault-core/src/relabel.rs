//! SELinux label restoration.
//!
//! Bind-mounting with `:z` relabels host paths for container use. After a
//! containerized archiver run, the storage directories and their immediate
//! entries get their default labels back.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::{error, info};

use crate::error::Result;
use crate::runner::{CommandSpec, Runner};

/// `restorecon -F` each directory in `dirs` and its immediate entries.
pub fn restore_labels(runner: &dyn Runner, dirs: &[PathBuf]) -> Result<()> {
    let unique: BTreeSet<&Path> = dirs.iter().map(PathBuf::as_path).collect();
    for dir in unique {
        let listing = runner.run_checked(
            &CommandSpec::new("find")
                .arg(dir)
                .args(["-maxdepth", "1"])
                .privileged(),
        )?;
        let mut paths: Vec<&str> = listing
            .stdout
            .lines()
            .filter(|line| !line.is_empty())
            .collect();
        if paths.is_empty() {
            continue;
        }
        paths.sort_unstable();

        info!(dir = %dir.display(), entries = paths.len(), "restoring SELinux labels");
        runner.run_checked(
            &CommandSpec::new("restorecon")
                .arg("-F")
                .args(paths)
                .privileged(),
        )?;
    }
    Ok(())
}

/// Directories relabeled by container bind mounts and not yet restored.
///
/// Dropped without a successful [`restore`](Self::restore), it logs the
/// directories so the labels can be restored by hand.
#[derive(Debug)]
pub struct PendingLabels {
    dirs: Vec<PathBuf>,
    armed: bool,
}

impl PendingLabels {
    /// Track directories only when `container` is set; otherwise a no-op.
    pub fn new(container: bool) -> Self {
        Self {
            dirs: Vec::new(),
            armed: container,
        }
    }

    pub fn add(&mut self, dir: impl Into<PathBuf>) {
        self.dirs.push(dir.into());
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Manual recovery advice, when there is anything left to restore.
    pub fn hint(&self) -> Option<String> {
        if !self.armed || self.dirs.is_empty() {
            return None;
        }
        let unique: BTreeSet<&Path> = self.dirs.iter().map(PathBuf::as_path).collect();
        let list: Vec<String> = unique.iter().map(|d| d.display().to_string()).collect();
        Some(format!(
            "SELinux labels were not restored; run `restorecon -F` on {} and their entries",
            list.join(", ")
        ))
    }

    /// Restore every tracked directory, then stop tracking.
    pub fn restore(mut self, runner: &dyn Runner) -> Result<()> {
        if self.armed {
            restore_labels(runner, &self.dirs)?;
            self.armed = false;
        }
        Ok(())
    }
}

impl Drop for PendingLabels {
    fn drop(&mut self) {
        if let Some(hint) = self.hint() {
            error!("{hint}");
        }
    }
}

/// Parent directories of `files`, deduplicated.
pub fn parent_dirs<'p>(files: impl IntoIterator<Item = &'p Path>) -> Vec<PathBuf> {
    let dirs: BTreeSet<PathBuf> = files
        .into_iter()
        .filter_map(|f| f.parent())
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .collect();
    dirs.into_iter().collect()
}
