//! Static run configuration.
//!
//! Decided once at process start and passed by reference to every component.

use std::path::PathBuf;
use std::time::Duration;

use crate::privilege::DEFAULT_REFRESH_INTERVAL;

/// Default libvirt connection URI.
pub const DEFAULT_CONNECT_URI: &str = "qemu:///system";

/// Process name of the libvirt management UI that must not run concurrently.
pub const DEFAULT_UI_PROCESS: &str = "virt-manager";

/// Run configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Run privileged commands through sudo.
    pub elevate: bool,
    /// Run the archiver inside this container image instead of on the host.
    pub container_image: Option<String>,
    /// Remove and rebuild the container image before use.
    pub rebuild_image: bool,
    /// libvirt connection URI passed to every `virsh` call.
    pub connect_uri: String,
    /// Directory archives are written to and read from.
    pub backup_dir: PathBuf,
    /// Management UI process that must not be running.
    pub ui_process: String,
    /// Interval between sudo credential refreshes.
    pub keepalive_interval: Duration,
}

impl Config {
    /// Configuration with defaults and the given backup directory.
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            elevate: true,
            container_image: None,
            rebuild_image: false,
            connect_uri: DEFAULT_CONNECT_URI.to_string(),
            backup_dir: backup_dir.into(),
            ui_process: DEFAULT_UI_PROCESS.to_string(),
            keepalive_interval: DEFAULT_REFRESH_INTERVAL,
        }
    }

    pub fn uses_container(&self) -> bool {
        self.container_image.is_some()
    }

    /// `<backup_dir>/<vm>.7z`
    pub fn archive_path(&self, vm: &str) -> PathBuf {
        self.backup_dir.join(format!("{vm}.7z"))
    }

    /// `<backup_dir>/<vm>/`
    pub fn work_dir(&self, vm: &str) -> PathBuf {
        self.backup_dir.join(vm)
    }

    /// Directory of the running executable, the default backup directory.
    pub fn executable_dir() -> std::io::Result<PathBuf> {
        let exe = std::env::current_exe()?;
        exe.parent().map(PathBuf::from).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "executable path has no parent directory",
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::new("/srv/backups");
        assert!(config.elevate);
        assert!(!config.uses_container());
        assert!(!config.rebuild_image);
        assert_eq!(config.connect_uri, "qemu:///system");
        assert_eq!(config.ui_process, "virt-manager");
        assert_eq!(config.keepalive_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_artifact_paths() {
        let config = Config::new("/srv/backups");
        assert_eq!(config.archive_path("alpha"), PathBuf::from("/srv/backups/alpha.7z"));
        assert_eq!(config.work_dir("alpha"), PathBuf::from("/srv/backups/alpha"));
    }
}
