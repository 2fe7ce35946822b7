//! Terminal output utilities

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use vmvault_core::{Progress, ProgressCallback};

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", style("✓").green().bold(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", style("✗").red().bold(), msg);
}

/// Print a warning message
pub fn warning(msg: &str) {
    eprintln!("{} {}", style("⚠").yellow().bold(), msg);
}

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", style("ℹ").blue().bold(), msg);
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", style(key).dim(), value);
}

/// Spinner that stays invisible until the first progress update.
pub fn workflow_spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(template) = ProgressStyle::with_template("{spinner:.blue} [{elapsed_precise}] {msg}") {
        pb.set_style(template.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"));
    }
    pb
}

/// Progress callback that drives `pb`.
pub fn progress_callback(pb: ProgressBar) -> ProgressCallback {
    let started = AtomicBool::new(false);
    Box::new(move |progress: Progress| {
        if !started.swap(true, Ordering::Relaxed) {
            pb.enable_steady_tick(Duration::from_millis(100));
        }
        pb.set_message(describe(&progress));
    })
}

fn describe(progress: &Progress) -> String {
    let mut msg = progress.phase.to_string();
    if progress.current_disk > 0 && progress.total_disks > 1 {
        msg.push_str(&format!(" [{}/{}]", progress.current_disk, progress.total_disks));
    }
    if let Some(item) = &progress.item {
        msg.push_str(&format!(" {item}"));
    }
    if progress.bytes_total > 0 {
        msg.push_str(&format!(" ({:.0}%)", progress.percent_complete()));
    }
    msg
}
