//! Per-run ephemeral files.
//!
//! Every transient path vmvault creates lives under a root directory named
//! after the run's [`RunToken`], so concurrent runs never collide and one
//! `cleanup` call removes all of it.

use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rand::distributions::{Alphanumeric, DistString};
use rand::rngs::OsRng;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Length of the run token.
pub const TOKEN_LEN: usize = 16;

/// Random alphanumeric identifier for one process run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunToken(String);

impl RunToken {
    /// Draw a fresh token from the operating system's CSPRNG.
    pub fn generate() -> Self {
        Self(Alphanumeric.sample_string(&mut OsRng, TOKEN_LEN))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Allocates and removes the run's ephemeral paths.
#[derive(Debug)]
pub struct TempTracker {
    token: RunToken,
    root: PathBuf,
    extra: Mutex<Vec<PathBuf>>,
}

impl TempTracker {
    /// Tracker rooted in the system temp directory.
    pub fn new(token: RunToken) -> Self {
        Self::in_dir(std::env::temp_dir(), token)
    }

    /// Tracker rooted in `base`.
    pub fn in_dir(base: impl AsRef<Path>, token: RunToken) -> Self {
        let root = base.as_ref().join(format!("vmvault-{token}"));
        Self {
            token,
            root,
            extra: Mutex::new(Vec::new()),
        }
    }

    pub fn token(&self) -> &RunToken {
        &self.token
    }

    /// Root directory for this run; it may not exist yet.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the root directory if needed and return it.
    pub fn ensure_root(&self) -> Result<&Path> {
        fs::create_dir_all(&self.root).map_err(|e| Error::io(e, &self.root))?;
        Ok(&self.root)
    }

    /// Path for a transient file named `name`; the file is not created.
    pub fn file(&self, name: &str) -> Result<PathBuf> {
        self.ensure_root()?;
        Ok(self.root.join(name))
    }

    /// Create a transient directory named `name` and return its path.
    pub fn dir(&self, name: &str) -> Result<PathBuf> {
        self.ensure_root()?;
        let path = self.root.join(name);
        fs::create_dir_all(&path).map_err(|e| Error::io(e, &path))?;
        Ok(path)
    }

    /// Track a path created outside the root so cleanup removes it too.
    pub fn register(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        debug!(path = %path.display(), "tracking temp path");
        if let Ok(mut extra) = self.extra.lock() {
            extra.push(path);
        }
    }

    /// Remove everything this run allocated. Missing paths are ignored.
    pub fn cleanup(&self) {
        let extra = match self.extra.lock() {
            Ok(mut extra) => std::mem::take(&mut *extra),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for path in extra.iter().chain(std::iter::once(&self.root)) {
            remove_path(path);
        }
    }
}

fn remove_path(path: &Path) {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == ErrorKind::NotFound => return,
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => debug!(path = %path.display(), "removed temp path"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "could not remove temp path"),
    }
}
