//! Import orchestrator: encrypted archive back to a defined libvirt VM.
//!
//! Nothing is moved or registered until both integrity gates pass: the
//! detached SHA-256 of the archive, then the SHA-1 of every extracted disk.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::checksum;
use crate::context::Context;
use crate::domain_xml::DomainXml;
use crate::error::{Error, Result};
use crate::progress::{Phase, Progress, ProgressCallback, Reporter};
use crate::prompt::{self, Passphrase};
use crate::relabel::PendingLabels;
use crate::runner::CommandSpec;

/// Summary of a finished import.
#[derive(Debug, Clone, Default)]
pub struct ImportReport {
    /// VM that was imported.
    pub vm: String,
    /// Disks moved into place.
    pub moved: Vec<PathBuf>,
    /// Disks left alone because their destination was already occupied.
    pub skipped: Vec<PathBuf>,
    /// Whether the VM was registered with libvirt.
    pub defined: bool,
}

/// Names of the VMs that have a `<name>.7z` in `backup_dir`, sorted.
pub fn available_archives(backup_dir: &Path) -> Result<Vec<String>> {
    let mut names: Vec<String> = fs::read_dir(backup_dir)
        .map_err(|e| Error::io(e, backup_dir))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|entry| {
            let name = entry.file_name().to_str()?.to_string();
            let stem = name.strip_suffix(".7z")?;
            (!stem.is_empty()).then(|| stem.to_string())
        })
        .collect();
    names.sort();
    Ok(names)
}

/// Interactive import: pick an archive, then import it.
pub fn run_import(ctx: &Context<'_>, progress: Option<ProgressCallback>) -> Result<ImportReport> {
    let names = available_archives(&ctx.config.backup_dir)?;
    if names.is_empty() {
        return Err(Error::not_found(
            "archive",
            format!("*.7z in {}", ctx.config.backup_dir.display()),
        ));
    }
    let vm = prompt::select_name(ctx.prompter, "VM to import", &names)?;
    import_vm(ctx, &vm, progress)
}

/// Import `vm` from `<backup_dir>/<vm>.7z`.
pub fn import_vm(
    ctx: &Context<'_>,
    vm: &str,
    progress_callback: Option<ProgressCallback>,
) -> Result<ImportReport> {
    let reporter = Reporter(progress_callback.as_ref());
    let virsh = ctx.virsh();
    let archive = ctx.config.archive_path(vm);
    let work_dir = ctx.config.work_dir(vm);

    if !archive.is_file() {
        return Err(Error::not_found("archive", archive.display().to_string()));
    }
    if virsh.exists(vm)? {
        return Err(Error::precondition(format!(
            "VM {vm} is already defined; undefine it before importing"
        )));
    }
    if work_dir.exists() {
        return Err(Error::precondition(format!(
            "working directory {} already exists; remove it before importing",
            work_dir.display()
        )));
    }

    // Step 1: whole-archive checksum, before anything is decrypted.
    let mut progress = Progress::new(Phase::HashingArchive, 0);
    progress.item = archive.file_name().map(|n| n.to_string_lossy().into_owned());
    reporter.report(&progress);
    checksum::verify_archive_sidecar(&archive, |done, total| {
        progress.bytes_processed = done;
        progress.bytes_total = total;
        reporter.report(&progress);
    })?;

    // Step 2: extract into a fresh working directory.
    let pass: Passphrase = ctx.prompter.passphrase("Archive passphrase")?;
    progress.enter(Phase::Extracting, None);
    reporter.report(&progress);
    let archiver = ctx.archiver()?;
    let mut labels = PendingLabels::new(archiver.uses_container());
    labels.add(&ctx.config.backup_dir);
    archiver.extract(&archive, &work_dir, &pass)?;

    // Step 3: per-disk checksums.
    progress.enter(Phase::VerifyingDisks, None);
    reporter.report(&progress);
    let disks = checksum::verify_disk_sidecars(ctx.runner, &work_dir)?;
    progress.total_disks = disks.len();

    // Step 4: move disks to where the domain XML expects them.
    let xml_path = work_dir.join(format!("{vm}.xml"));
    if !xml_path.is_file() {
        return Err(Error::not_found("domain XML", xml_path.display().to_string()));
    }
    let domain = DomainXml::from_file(&xml_path)?;
    if domain.name != vm {
        warn!(archive = vm, domain = %domain.name, "domain name differs from archive name");
    }

    let mut report = ImportReport {
        vm: vm.to_string(),
        ..ImportReport::default()
    };
    for (index, disk) in disks.iter().enumerate() {
        progress.current_disk = index + 1;
        progress.enter(Phase::RestoringDisks, Some(disk.clone()));
        reporter.report(&progress);

        let dest = domain.destination_for(disk)?.to_path_buf();
        if let Some(dir) = dest.parent() {
            labels.add(dir);
        }
        if restore_disk(ctx, &work_dir.join(disk), &dest)? {
            report.moved.push(dest);
        } else {
            report.skipped.push(dest);
        }
    }

    // Step 5: register, then drop the working directory.
    progress.enter(Phase::Defining, None);
    reporter.report(&progress);
    if virsh.exists(vm)? {
        warn!(vm, work_dir = %work_dir.display(), "VM appeared while importing; not redefining");
    } else {
        virsh.define(&xml_path)?;
        report.defined = true;
        info!(vm, "VM defined");
        ctx.runner.run_checked(
            &CommandSpec::new("rm")
                .args(["-rf", "--"])
                .arg(&work_dir)
                .privileged(),
        )?;
    }

    // Step 6: labels after container bind mounts.
    if labels.is_armed() {
        progress.enter(Phase::Relabeling, None);
        reporter.report(&progress);
    }
    labels.restore(ctx.runner)?;

    progress.enter(Phase::Complete, None);
    reporter.report(&progress);
    info!(
        vm,
        moved = report.moved.len(),
        skipped = report.skipped.len(),
        "import complete"
    );
    Ok(report)
}

/// Move `source` to `dest` unless `dest` is taken. Returns whether it moved.
fn restore_disk(ctx: &Context<'_>, source: &Path, dest: &Path) -> Result<bool> {
    let dir = dest
        .parent()
        .ok_or_else(|| Error::metadata(format!("{} has no parent directory", dest.display())))?;
    ctx.runner
        .run_checked(&CommandSpec::new("mkdir").arg("-p").arg(dir).privileged())?;

    let occupied = ctx
        .runner
        .run(&CommandSpec::new("test").arg("-e").arg(dest).privileged())?
        .success();
    if occupied {
        warn!(dest = %dest.display(), "destination exists; leaving it untouched");
        return Ok(false);
    }

    ctx.runner.run_checked(
        &CommandSpec::new("mv")
            .arg("-n")
            .arg("--")
            .arg(source)
            .arg(dest)
            .privileged(),
    )?;
    info!(dest = %dest.display(), "disk restored");
    Ok(true)
}
