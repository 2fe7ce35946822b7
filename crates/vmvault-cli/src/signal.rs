//! Termination signals.
//!
//! The workflows are synchronous, so the signal streams are polled by a
//! single-threaded tokio runtime on a dedicated thread. On the first signal
//! the session is torn down and the process exits with the conventional
//! `128 + signo` status.

use std::sync::Arc;
use std::thread;

use tokio::signal::unix::{signal, SignalKind};
use tracing::warn;
use vmvault_core::Session;

const SIGHUP: i32 = 1;
const SIGINT: i32 = 2;
const SIGTERM: i32 = 15;

/// Start watching for SIGINT, SIGTERM and SIGHUP.
pub fn watch(session: Arc<Session>) -> std::io::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    // Registered here so a failure surfaces before any work starts.
    let (mut interrupt, mut terminate, mut hangup) = {
        let _entered = runtime.enter();
        (
            signal(SignalKind::interrupt())?,
            signal(SignalKind::terminate())?,
            signal(SignalKind::hangup())?,
        )
    };

    thread::Builder::new()
        .name("vmvault-signals".to_string())
        .spawn(move || {
            let signo = runtime.block_on(async {
                tokio::select! {
                    _ = interrupt.recv() => SIGINT,
                    _ = terminate.recv() => SIGTERM,
                    _ = hangup.recv() => SIGHUP,
                }
            });
            warn!(signal = signo, "terminated; removing temporary files");
            session.shutdown();
            std::process::exit(128 + signo);
        })?;
    Ok(())
}
