//! Export orchestrator: libvirt VM to encrypted archive.
//!
//! This module coordinates the full export:
//! 1. Dump the domain XML into a fresh working directory
//! 2. Seal it into `<vm>.7z` and remove the working directory
//! 3. For each disk, add a SHA-1 sidecar and then the image itself
//! 4. Write the detached `<vm>.7z.sha256`
//! 5. Optionally test-decrypt the archive with a re-entered passphrase
//! 6. Restore SELinux labels when the archiver ran in a container
//!
//! A failure in step 3 leaves a partially populated archive behind. It is
//! reported, never resumed; the next export must start from scratch, which
//! step 0 enforces by refusing to overwrite an existing archive.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{error, info};

use crate::archive::Archiver;
use crate::checksum::{self, SHA1_EXT};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::progress::{Phase, Progress, ProgressCallback, Reporter};
use crate::prompt::{self, Passphrase};
use crate::relabel::{self, PendingLabels};

/// Summary of a finished export.
#[derive(Debug, Clone)]
pub struct ExportReport {
    /// VM that was exported.
    pub vm: String,
    /// `<backup_dir>/<vm>.7z`
    pub archive: PathBuf,
    /// `<backup_dir>/<vm>.7z.sha256`
    pub checksum: PathBuf,
    /// Disk images stored in the archive, in order.
    pub disks: Vec<PathBuf>,
    /// Whether the archive was test-decrypted.
    pub verified: bool,
}

/// Interactive export: pick a VM, read a new passphrase, export.
pub fn run_export(ctx: &Context<'_>, progress: Option<ProgressCallback>) -> Result<ExportReport> {
    let names = ctx.virsh().list_all()?;
    if names.is_empty() {
        return Err(Error::precondition("libvirt has no defined VMs"));
    }
    let vm = prompt::select_name(ctx.prompter, "VM to export", &names)?;
    let pass = prompt::read_new_passphrase(ctx.prompter)?;
    export_vm(ctx, &vm, &pass, progress)
}

/// Export `vm` to `<backup_dir>/<vm>.7z` encrypted with `pass`.
pub fn export_vm(
    ctx: &Context<'_>,
    vm: &str,
    pass: &Passphrase,
    progress_callback: Option<ProgressCallback>,
) -> Result<ExportReport> {
    let reporter = Reporter(progress_callback.as_ref());
    let virsh = ctx.virsh();
    let archive = ctx.config.archive_path(vm);
    let work_dir = ctx.config.work_dir(vm);

    if pass.is_empty() {
        return Err(Error::precondition("passphrase must not be empty"));
    }
    if !virsh.exists(vm)? {
        return Err(Error::not_found("VM", vm));
    }
    if archive.exists() {
        return Err(Error::precondition(format!(
            "{} already exists; move it away before exporting again",
            archive.display()
        )));
    }
    if work_dir.exists() {
        return Err(Error::precondition(format!(
            "working directory {} already exists",
            work_dir.display()
        )));
    }

    let mut progress = Progress::new(Phase::DumpingMetadata, 0);
    reporter.report(&progress);

    // Step 1: domain XML into a fresh working directory.
    let xml_name = format!("{vm}.xml");
    fs::create_dir(&work_dir).map_err(|e| Error::io(e, &work_dir))?;
    ctx.tracker.register(&work_dir);
    let xml = virsh.dump_xml(vm)?;
    let xml_path = work_dir.join(&xml_name);
    fs::write(&xml_path, xml).map_err(|e| Error::io(e, &xml_path))?;

    // Step 2: seal the metadata, then drop the working directory.
    progress.enter(Phase::SealingMetadata, Some(xml_name.clone()));
    reporter.report(&progress);
    let mut archiver = ctx.archiver()?;
    let mut labels = PendingLabels::new(archiver.uses_container());
    labels.add(&ctx.config.backup_dir);
    archiver.create(&archive, &work_dir, &[xml_name.as_str()], pass)?;
    fs::remove_dir_all(&work_dir).map_err(|e| Error::io(e, &work_dir))?;
    info!(vm, archive = %archive.display(), "metadata sealed");

    // Step 3: disks and their sidecars.
    let disks = virsh.disk_files(vm)?;
    check_unique_names(&disks)?;
    let disk_dirs = relabel::parent_dirs(disks.iter().map(PathBuf::as_path));
    for dir in disk_dirs {
        archiver.add_mount(&dir);
        labels.add(dir);
    }

    progress.total_disks = disks.len();
    for (index, disk) in disks.iter().enumerate() {
        progress.current_disk = index + 1;
        if let Err(e) = archive_disk(ctx, &archiver, &archive, disk, pass, &mut progress, &reporter) {
            error!(
                vm,
                disk = %disk.display(),
                archive = %archive.display(),
                "archive is incomplete; delete it and export again"
            );
            return Err(e);
        }
    }

    // Step 4: detached whole-archive checksum.
    progress.enter(Phase::HashingArchive, Some(file_name(&archive)));
    reporter.report(&progress);
    checksum::write_archive_sidecar(&archive, |done, total| {
        progress.bytes_processed = done;
        progress.bytes_total = total;
        reporter.report(&progress);
    })?;
    let checksum_path = checksum::sidecar_path(&archive, checksum::SHA256_EXT);

    // Step 5: optional test-decrypt.
    let verified = if ctx
        .prompter
        .confirm("Verify the archive with its passphrase now?", true)?
    {
        progress.enter(Phase::Verifying, Some(file_name(&archive)));
        reporter.report(&progress);
        let again = ctx.prompter.passphrase("Passphrase to verify")?;
        archiver.test(&archive, &again).map_err(|e| {
            Error::integrity(format!(
                "{} could not be opened with the entered passphrase; treat it as unusable ({e})",
                archive.display()
            ))
        })?;
        info!(archive = %archive.display(), "archive verified");
        true
    } else {
        false
    };

    // Step 6: labels after container bind mounts.
    if labels.is_armed() {
        progress.enter(Phase::Relabeling, None);
        reporter.report(&progress);
    }
    labels.restore(ctx.runner)?;

    progress.enter(Phase::Complete, None);
    reporter.report(&progress);
    info!(vm, archive = %archive.display(), disks = disks.len(), "export complete");

    Ok(ExportReport {
        vm: vm.to_string(),
        archive,
        checksum: checksum_path,
        disks,
        verified,
    })
}

/// Hash one disk, append its sidecar, then append the disk.
fn archive_disk(
    ctx: &Context<'_>,
    archiver: &Archiver<'_>,
    archive: &Path,
    disk: &Path,
    pass: &Passphrase,
    progress: &mut Progress,
    reporter: &Reporter<'_>,
) -> Result<()> {
    let name = file_name(disk);

    progress.enter(Phase::HashingDisk, Some(name.clone()));
    reporter.report(progress);
    let sidecar = checksum::disk_sidecar(ctx.runner, disk)?;

    progress.enter(Phase::ArchivingDisk, Some(name.clone()));
    reporter.report(progress);
    let sidecar_path = ctx.tracker.file(&format!("{name}.{SHA1_EXT}"))?;
    sidecar.write(&sidecar_path)?;
    let appended = archiver.append(archive, &sidecar_path, pass);
    fs::remove_file(&sidecar_path).map_err(|e| Error::io(e, &sidecar_path))?;
    appended?;

    archiver.append(archive, disk, pass)?;
    info!(disk = %disk.display(), "disk archived");
    Ok(())
}

/// Disks are stored flat, so two disks may not share a file name.
fn check_unique_names(disks: &[PathBuf]) -> Result<()> {
    let mut seen: BTreeMap<String, &Path> = BTreeMap::new();
    for disk in disks {
        let name = file_name(disk);
        if let Some(previous) = seen.insert(name.clone(), disk) {
            return Err(Error::precondition(format!(
                "disks {} and {} share the file name '{name}' and cannot be archived together",
                previous.display(),
                disk.display()
            )));
        }
    }
    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
