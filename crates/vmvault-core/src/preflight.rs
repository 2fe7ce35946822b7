//! Environment checks run before any workflow.
//!
//! Each check fails with [`Error::Precondition`] so nothing is touched when
//! the environment is wrong.

use std::path::Path;

use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::runner::{CommandSpec, Runner};

/// Hypervisor control tool.
pub const VIRSH: &str = "virsh";
/// Archiver.
pub const SEVEN_ZIP: &str = "7z";
/// Per-disk hash tool.
pub const SHA1SUM: &str = "sha1sum";
/// Container runtime.
pub const PODMAN: &str = "podman";
/// Privilege elevation tool.
pub const SUDO: &str = "sudo";

/// Run every check in order, stopping at the first failure.
pub fn run(config: &Config, runner: &dyn Runner) -> Result<()> {
    check_ui_not_running(runner, &config.ui_process)?;
    check_working_dir(&config.backup_dir)?;
    check_tools(&required_tools(config), |tool| which::which(tool).is_ok())?;
    info!("preflight checks passed");
    Ok(())
}

/// Fail if the management UI is running.
///
/// Looked up twice: by exact process name with `pgrep`, and by substring in
/// the full process list, so a UI started through an interpreter is caught
/// as well. vmvault's own process and its parent (`sudo`, usually) are left
/// out of the second lookup, since their arguments may name the UI.
pub fn check_ui_not_running(runner: &dyn Runner, ui_process: &str) -> Result<()> {
    let pgrep = runner.run(&CommandSpec::new("pgrep").args(["-x", ui_process]))?;
    match pgrep.code {
        Some(0) => return Err(ui_running(ui_process)),
        Some(1) => {}
        _ => {
            pgrep.check("pgrep")?;
        }
    }

    let ps = runner.run_checked(&CommandSpec::new("ps").args(["-eo", "pid=,args="]))?;
    let own = [std::process::id(), std::os::unix::process::parent_id()];
    if listed(&ps.stdout, ui_process, &own) {
        return Err(ui_running(ui_process));
    }

    debug!(ui_process, "management UI not running");
    Ok(())
}

/// Whether a `pid args` line outside `skip` mentions `ui_process`.
fn listed(table: &str, ui_process: &str, skip: &[u32]) -> bool {
    table.lines().any(|line| {
        let line = line.trim_start();
        let (pid, args) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let ours = pid.parse::<u32>().is_ok_and(|pid| skip.contains(&pid));
        !ours && args.contains(ui_process)
    })
}

fn ui_running(ui_process: &str) -> Error {
    Error::precondition(format!(
        "{ui_process} is running; close it before backing up or restoring VMs"
    ))
}

/// Fail unless the current directory is the backup directory.
pub fn check_working_dir(backup_dir: &Path) -> Result<()> {
    let cwd = std::env::current_dir()?;
    check_same_dir(&cwd, backup_dir)
}

fn check_same_dir(cwd: &Path, backup_dir: &Path) -> Result<()> {
    let cwd_real = cwd.canonicalize().map_err(|e| Error::io(e, cwd))?;
    let backup_real = backup_dir
        .canonicalize()
        .map_err(|e| Error::io(e, backup_dir))?;
    if cwd_real != backup_real {
        return Err(Error::precondition(format!(
            "run vmvault from {} (current directory is {})",
            backup_real.display(),
            cwd_real.display()
        )));
    }
    Ok(())
}

/// Tools that must be on `PATH` for `config`.
pub fn required_tools(config: &Config) -> Vec<&'static str> {
    let mut tools = vec![VIRSH, SHA1SUM];
    if config.uses_container() {
        tools.push(PODMAN);
    } else {
        tools.push(SEVEN_ZIP);
    }
    if config.elevate {
        tools.push(SUDO);
    }
    tools
}

/// Fail on the first tool `present` reports missing.
pub fn check_tools(tools: &[&str], present: impl Fn(&str) -> bool) -> Result<()> {
    for tool in tools {
        if !present(tool) {
            return Err(Error::precondition(format!(
                "required tool '{tool}' not found in PATH"
            )));
        }
        debug!(tool, "found");
    }
    Ok(())
}
