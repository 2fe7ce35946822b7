//! Elevated-session keep-alive.
//!
//! Archive and hashing steps on multi-gigabyte disks can outlast the sudo
//! credential cache. [`KeepAlive`] validates the credentials once up front
//! and then refreshes them from a background thread until stopped.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use tracing::{debug, warn};

use crate::error::Result;
use crate::runner::{CommandSpec, Runner};

/// Default interval between credential refreshes.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Background sudo credential refresher.
///
/// Dropping the sender closes the channel, which wakes the thread and ends
/// its loop; [`KeepAlive::stop`] then joins it.
pub struct KeepAlive {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl KeepAlive {
    /// A keep-alive that does nothing, for runs without elevation.
    pub fn disabled() -> Self {
        Self {
            stop: None,
            handle: None,
        }
    }

    /// Validate credentials (may prompt) and start refreshing them.
    pub fn start(runner: Arc<dyn Runner>, interval: Duration) -> Result<Self> {
        runner.run_checked(&CommandSpec::new("sudo").arg("-v").inherit())?;

        let (stop_tx, stop_rx) = bounded::<()>(0);
        let handle = thread::Builder::new()
            .name("sudo-keepalive".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let refresh = CommandSpec::new("sudo").args(["-n", "-v"]);
                        match runner.run(&refresh) {
                            Ok(out) if out.success() => debug!("sudo credentials refreshed"),
                            Ok(out) => warn!(code = ?out.code, "sudo credential refresh failed"),
                            Err(e) => warn!(error = %e, "sudo credential refresh failed"),
                        }
                    }
                    _ => break,
                }
            })?;

        Ok(Self {
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Cancel the refresher and wait for its thread to exit.
    pub fn stop(&mut self) {
        drop(self.stop.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("sudo keep-alive thread panicked");
            }
        }
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::CommandOutput;
    use std::sync::Mutex;
    use std::time::Instant;

    #[derive(Default)]
    struct CountingRunner {
        calls: Mutex<Vec<String>>,
    }

    impl Runner for CountingRunner {
        fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
            self.calls.lock().unwrap().push(spec.to_string());
            Ok(CommandOutput::ok(""))
        }
    }

    #[test]
    fn test_disabled_keepalive_has_no_thread() {
        let mut keepalive = KeepAlive::disabled();
        assert!(!keepalive.is_running());
        keepalive.stop();
    }

    #[test]
    fn test_keepalive_validates_then_refreshes() {
        let runner = Arc::new(CountingRunner::default());
        let mut keepalive =
            KeepAlive::start(runner.clone(), Duration::from_millis(10)).unwrap();
        assert!(keepalive.is_running());

        let deadline = Instant::now() + Duration::from_secs(5);
        while runner.calls.lock().unwrap().len() < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        keepalive.stop();
        assert!(!keepalive.is_running());

        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls[0], "sudo -v");
        assert!(calls.len() >= 3);
        assert!(calls[1..].iter().all(|c| c == "sudo -n -v"));
    }

    #[test]
    fn test_stop_does_not_wait_for_interval() {
        let runner = Arc::new(CountingRunner::default());
        let keepalive = KeepAlive::start(runner.clone(), Duration::from_secs(3600)).unwrap();
        let started = Instant::now();
        drop(keepalive);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(runner.calls.lock().unwrap().len(), 1);
    }
}
