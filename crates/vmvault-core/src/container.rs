//! Optional archiver container.
//!
//! On image-based hosts where `7z` cannot be installed, the archiver runs
//! inside a small local podman image built on first use.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::preflight::PODMAN;
use crate::runner::{CommandSpec, Runner};
use crate::temp::TempTracker;

/// Base image the archiver image is built from.
pub const BASE_IMAGE: &str = "registry.fedoraproject.org/fedora-minimal:latest";

/// Build recipe for the archiver image.
pub fn containerfile() -> String {
    format!(
        "FROM {BASE_IMAGE}\n\
         RUN microdnf install -y p7zip p7zip-plugins && microdnf clean all\n"
    )
}

/// A named local image holding the archiver.
pub struct ContainerImage<'a> {
    runner: &'a dyn Runner,
    name: String,
}

impl<'a> ContainerImage<'a> {
    pub fn new(runner: &'a dyn Runner, name: impl Into<String>) -> Self {
        Self {
            runner,
            name: name.into(),
        }
    }

    /// Whether the image is present in local storage.
    pub fn exists(&self) -> Result<bool> {
        let out = self.runner.run(
            &CommandSpec::new(PODMAN)
                .args(["image", "exists", &self.name])
                .privileged(),
        )?;
        match out.code {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => out.check(PODMAN).map(|_| false),
        }
    }

    /// Build the image unless it already exists. Returns whether it built.
    pub fn ensure(&self, tracker: &TempTracker) -> Result<bool> {
        if self.exists()? {
            debug!(image = %self.name, "container image present");
            return Ok(false);
        }

        info!(image = %self.name, "building archiver container image");
        let context = tracker.dir(&format!("build-{}", sanitize(&self.name)))?;
        let recipe = context.join("Containerfile");
        fs::write(&recipe, containerfile()).map_err(|e| Error::io(e, &recipe))?;

        let built = self.runner.run_checked(
            &CommandSpec::new(PODMAN)
                .arg("build")
                .args(["-t", &self.name])
                .arg("-f")
                .arg(&recipe)
                .arg(&context)
                .privileged()
                .inherit(),
        );

        if let Err(e) = fs::remove_dir_all(&context) {
            warn!(path = %context.display(), error = %e, "could not remove build context");
        }
        built?;
        Ok(true)
    }

    /// Delete the image from local storage.
    pub fn remove(&self) -> Result<()> {
        info!(image = %self.name, "removing container image");
        self.runner.run_checked(
            &CommandSpec::new(PODMAN)
                .args(["rmi", "--force", &self.name])
                .privileged(),
        )?;
        Ok(())
    }

    /// Wrap `spec` so it runs inside this image.
    ///
    /// Each directory in `mounts` is bind-mounted at the same path with a
    /// private SELinux relabel, and the command runs from the spec's working
    /// directory. Stdin is kept open when the command has input.
    pub fn wrap(&self, spec: &CommandSpec, mounts: &[PathBuf]) -> CommandSpec {
        let mut prefix: Vec<String> = vec!["run".into(), "--rm".into()];
        if spec.input().is_some() {
            prefix.push("-i".into());
        }
        let unique: BTreeSet<&Path> = mounts.iter().map(PathBuf::as_path).collect();
        for dir in unique {
            prefix.push("-v".into());
            prefix.push(format!("{0}:{0}:z", dir.display()));
        }
        if let Some(cwd) = spec.cwd() {
            prefix.push("-w".into());
            prefix.push(cwd.display().to_string());
        }
        prefix.push(self.name.clone());
        spec.wrapped_in(PODMAN, prefix).privileged()
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{CommandOutput, SecretInput};
    use crate::temp::RunToken;
    use zeroize::Zeroizing;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct Podman {
        exists_code: i32,
        build_code: i32,
        calls: Mutex<Vec<Vec<String>>>,
        saw_recipe: Mutex<bool>,
    }

    impl Podman {
        fn new(exists_code: i32, build_code: i32) -> Self {
            Self {
                exists_code,
                build_code,
                calls: Mutex::new(Vec::new()),
                saw_recipe: Mutex::new(false),
            }
        }
    }

    impl Runner for Podman {
        fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
            let args = spec.arg_strings();
            self.calls.lock().unwrap().push(args.clone());
            let code = match args[0].as_str() {
                "image" => self.exists_code,
                "build" => {
                    let recipe = Path::new(&args[4]);
                    let text = fs::read_to_string(recipe).unwrap();
                    *self.saw_recipe.lock().unwrap() = text.contains("p7zip");
                    self.build_code
                }
                _ => 0,
            };
            Ok(CommandOutput {
                code: Some(code),
                ..CommandOutput::default()
            })
        }
    }

    #[test]
    fn test_ensure_skips_existing_image() {
        let base = TempDir::new().unwrap();
        let tracker = TempTracker::in_dir(base.path(), RunToken::generate());
        let podman = Podman::new(0, 0);
        let image = ContainerImage::new(&podman, "vmvault-7z");
        assert!(!image.ensure(&tracker).unwrap());
        assert_eq!(podman.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_ensure_builds_and_removes_context() {
        let base = TempDir::new().unwrap();
        let tracker = TempTracker::in_dir(base.path(), RunToken::generate());
        let podman = Podman::new(1, 0);
        let image = ContainerImage::new(&podman, "localhost/vmvault-7z");
        assert!(image.ensure(&tracker).unwrap());
        assert!(*podman.saw_recipe.lock().unwrap());

        let calls = podman.calls.lock().unwrap();
        assert_eq!(calls[1][0], "build");
        assert_eq!(calls[1][2], "localhost/vmvault-7z");
        let context = Path::new(calls[1].last().unwrap());
        assert!(!context.exists());
    }

    #[test]
    fn test_build_failure_is_fatal() {
        let base = TempDir::new().unwrap();
        let tracker = TempTracker::in_dir(base.path(), RunToken::generate());
        let podman = Podman::new(1, 125);
        let image = ContainerImage::new(&podman, "vmvault-7z");
        let err = image.ensure(&tracker).unwrap_err();
        assert!(matches!(err, Error::CommandFailed { code: Some(125), .. }));
    }

    #[test]
    fn test_exists_reports_runtime_errors() {
        let podman = Podman::new(125, 0);
        let image = ContainerImage::new(&podman, "vmvault-7z");
        assert!(image.exists().is_err());
    }

    #[test]
    fn test_wrap_mounts_and_workdir() {
        let podman = Podman::new(0, 0);
        let image = ContainerImage::new(&podman, "vmvault-7z");
        let spec = CommandSpec::new("7z")
            .args(["t", "-p", "alpha.7z"])
            .stdin_secret(SecretInput::new(Zeroizing::new(b"secret\n".to_vec())))
            .current_dir("/srv/backups");
        let wrapped = image.wrap(
            &spec,
            &[
                PathBuf::from("/srv/backups"),
                PathBuf::from("/var/lib/libvirt/images"),
                PathBuf::from("/srv/backups"),
            ],
        );
        assert_eq!(wrapped.program(), "podman");
        assert!(wrapped.is_privileged());
        assert!(wrapped.input().is_some());
        assert_eq!(
            wrapped.to_string(),
            "podman run --rm -i -v /srv/backups:/srv/backups:z \
             -v /var/lib/libvirt/images:/var/lib/libvirt/images:z \
             -w /srv/backups vmvault-7z 7z t -p alpha.7z"
        );
    }

    #[test]
    fn test_wrap_without_input_closes_stdin() {
        let podman = Podman::new(0, 0);
        let image = ContainerImage::new(&podman, "vmvault-7z");
        let wrapped = image.wrap(&CommandSpec::new("7z").arg("i"), &[]);
        assert_eq!(wrapped.to_string(), "podman run --rm vmvault-7z 7z i");
    }

    #[test]
    fn test_containerfile_installs_archiver() {
        let recipe = containerfile();
        assert!(recipe.starts_with("FROM "));
        assert!(recipe.contains("microdnf install -y p7zip"));
    }
}
