//! vmvault Core Library
//!
//! This crate provides the core functionality for backing up libvirt VMs to
//! encrypted, checksummed 7-Zip archives and restoring them.
//!
//! # Overview
//!
//! An export produces `<vm>.7z` (domain XML, disk images and a SHA-1 sidecar
//! per disk, AES encrypted with encrypted headers) plus a detached
//! `<vm>.7z.sha256`. An import checks both layers of checksums, moves the
//! disks back to the paths recorded in the domain XML and defines the VM.
//!
//! The actual work is done by external tools (`virsh`, `7z`, `sha1sum`,
//! `podman`, `restorecon`), driven through the [`Runner`] trait so the
//! workflows can run elevated, inside a container, or against fakes.
//!
//! # Modules
//!
//! - [`error`] - Error types and Result alias
//! - [`config`] - Static run configuration
//! - [`runner`] - External command execution and elevation
//! - [`privilege`] - sudo credential keep-alive
//! - [`temp`] / [`session`] - Per-run temp paths and exactly-once teardown
//! - [`preflight`] - Environment checks
//! - [`container`] - Optional archiver container image
//! - [`archive`] - 7-Zip archive commands
//! - [`checksum`] - SHA-1 / SHA-256 sidecars
//! - [`virsh`] / [`domain_xml`] - libvirt access and domain XML queries
//! - [`prompt`] - Interactive prompt seam
//! - [`export`] / [`import`] - The two workflows
//!
//! # Quick Start
//!
//! ```no_run
//! use vmvault_core::{export_vm, Config, Context, Passphrase, Prompter, SystemRunner, TempTracker, RunToken};
//!
//! # fn demo(prompter: &dyn Prompter) -> vmvault_core::Result<()> {
//! let config = Config::new("/srv/backups");
//! let runner = SystemRunner::new(config.elevate);
//! let tracker = TempTracker::new(RunToken::generate());
//! let ctx = Context::new(&config, &runner, prompter, &tracker);
//!
//! export_vm(&ctx, "alpha", &Passphrase::new("correct horse"), None)?;
//! tracker.cleanup();
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod checksum;
pub mod config;
pub mod container;
pub mod context;
pub mod domain_xml;
pub mod error;
pub mod export;
pub mod import;
pub mod preflight;
pub mod privilege;
pub mod progress;
pub mod prompt;
pub mod relabel;
pub mod runner;
pub mod session;
pub mod temp;
pub mod virsh;

pub use error::{Error, Result};

pub use config::Config;
pub use context::Context;
pub use export::{export_vm, run_export, ExportReport};
pub use import::{available_archives, import_vm, run_import, ImportReport};
pub use privilege::KeepAlive;
pub use progress::{Phase, Progress, ProgressCallback};
pub use prompt::{Passphrase, Prompter};
pub use runner::{CommandOutput, CommandSpec, Runner, SecretInput, SystemRunner};
pub use session::{Session, ShutdownGuard};
pub use temp::{RunToken, TempTracker};
