//! vmvault CLI - Interactive backup and restore of libvirt VMs.

mod output;
mod prompt;
mod signal;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Parser;
use indicatif::ProgressBar;
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use vmvault_core::config::DEFAULT_CONNECT_URI;
use vmvault_core::{
    preflight, run_export, run_import, Config, Context, KeepAlive, Prompter, RunToken, Runner,
    Session, SystemRunner, TempTracker,
};

use prompt::DialoguerPrompter;

/// Back up libvirt VMs to encrypted 7-Zip archives and restore them.
#[derive(Parser)]
#[command(name = "vmvault")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors.
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Run privileged commands directly instead of through sudo.
    #[arg(long, env = "VMVAULT_NO_SUDO")]
    no_sudo: bool,

    /// Run 7-Zip inside this podman image instead of on the host.
    #[arg(long, value_name = "IMAGE", env = "VMVAULT_CONTAINER")]
    container: Option<String>,

    /// Remove and rebuild the container image before use.
    #[arg(long, requires = "container")]
    rebuild_image: bool,

    /// libvirt connection URI.
    #[arg(long, value_name = "URI", env = "LIBVIRT_DEFAULT_URI", default_value = DEFAULT_CONNECT_URI)]
    connect: String,

    /// Directory holding the archives. Defaults to the executable's directory.
    #[arg(long, value_name = "DIR", env = "VMVAULT_BACKUP_DIR")]
    backup_dir: Option<PathBuf>,
}

/// Top-level menu entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Export,
    Import,
    Quit,
}

impl Action {
    const ALL: [Action; 3] = [Action::Export, Action::Import, Action::Quit];

    fn label(self) -> &'static str {
        match self {
            Action::Export => "Export a VM to an encrypted archive",
            Action::Import => "Import a VM from an archive",
            Action::Quit => "Quit",
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            output::error(&format!("{err:#}"));
            ExitCode::from(exit_code(&err))
        }
    }
}

/// Initialize tracing with appropriate verbosity
fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            1 => EnvFilter::new("info"),
            2 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// The failed command's status when there is one, otherwise 1.
fn exit_code(err: &anyhow::Error) -> u8 {
    let code = err
        .downcast_ref::<vmvault_core::Error>()
        .map(vmvault_core::Error::exit_code)
        .unwrap_or(1);
    u8::try_from(code).ok().filter(|c| *c != 0).unwrap_or(1)
}

fn build_config(cli: Cli) -> Result<Config> {
    let backup_dir = match cli.backup_dir {
        Some(dir) => dir,
        None => Config::executable_dir().context("cannot determine the executable's directory")?,
    };
    let mut config = Config::new(backup_dir);
    config.elevate = !cli.no_sudo;
    config.container_image = cli.container;
    config.rebuild_image = cli.rebuild_image;
    config.connect_uri = cli.connect;
    Ok(config)
}

fn run(cli: Cli) -> Result<()> {
    let config = build_config(cli)?;
    debug!(?config, "configuration");

    let runner: Arc<dyn Runner> = Arc::new(SystemRunner::new(config.elevate));
    preflight::run(&config, runner.as_ref()).context("preflight check failed")?;

    let keepalive = if config.elevate {
        KeepAlive::start(Arc::clone(&runner), config.keepalive_interval)
            .context("could not obtain sudo credentials")?
    } else {
        KeepAlive::disabled()
    };
    let session = Session::new(TempTracker::new(RunToken::generate()), keepalive);
    let _guard = session.guard();
    signal::watch(Arc::clone(&session)).context("failed to install signal handlers")?;

    let spinner = output::workflow_spinner();
    let prompter = DialoguerPrompter::new(spinner.clone());
    prompter.banner(&format!("vmvault {}", env!("CARGO_PKG_VERSION")));
    output::kv("Backups", &config.backup_dir.display().to_string());
    output::kv("libvirt", &config.connect_uri);
    if let Some(image) = &config.container_image {
        output::kv("Archiver", &format!("podman image {image}"));
    }

    let ctx = Context::new(&config, runner.as_ref(), &prompter, session.tracker());
    let labels: Vec<String> = Action::ALL.iter().map(|a| a.label().to_string()).collect();
    let action = prompter
        .select("What would you like to do?", &labels)?
        .and_then(|index| Action::ALL.get(index).copied())
        .unwrap_or(Action::Quit);

    let result = match action {
        Action::Export => export(&ctx, &spinner),
        Action::Import => import(&ctx, &spinner),
        Action::Quit => {
            output::info("Nothing to do");
            Ok(())
        }
    };
    spinner.finish_and_clear();
    result
}

fn export(ctx: &Context<'_>, spinner: &ProgressBar) -> Result<()> {
    let report = run_export(ctx, Some(output::progress_callback(spinner.clone())))?;
    spinner.finish_and_clear();

    ctx.prompter.banner(&format!("Export of {} complete", report.vm));
    output::success(&format!("Archive written: {}", report.archive.display()));
    output::kv("Checksum", &report.checksum.display().to_string());
    output::kv("Disks", &report.disks.len().to_string());
    for disk in &report.disks {
        output::kv("  disk", &disk.display().to_string());
    }
    if !report.verified {
        output::warning("The archive was not test-decrypted; keep the passphrase safe");
    }
    Ok(())
}

fn import(ctx: &Context<'_>, spinner: &ProgressBar) -> Result<()> {
    let report = run_import(ctx, Some(output::progress_callback(spinner.clone())))?;
    spinner.finish_and_clear();

    ctx.prompter.banner(&format!("Import of {} complete", report.vm));
    for disk in &report.moved {
        output::success(&format!("Restored {}", disk.display()));
    }
    for disk in &report.skipped {
        output::warning(&format!("Left existing {} in place", disk.display()));
    }
    if report.defined {
        output::success(&format!("VM {} defined", report.vm));
    } else {
        output::warning(&format!(
            "VM {} was already defined; extracted files remain in {}",
            report.vm,
            ctx.config.work_dir(&report.vm).display()
        ));
    }
    Ok(())
}
