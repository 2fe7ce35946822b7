//! Process-wide run state and its teardown.
//!
//! A [`Session`] owns what must be released on every exit path: the temp
//! tracker and the sudo keep-alive. Teardown runs exactly once, whether it is
//! reached through [`ShutdownGuard`]'s `Drop` on a normal or error return, or
//! explicitly from a signal handler.

use std::sync::{Arc, Mutex, Once};

use tracing::debug;

use crate::privilege::KeepAlive;
use crate::temp::TempTracker;

pub struct Session {
    tracker: TempTracker,
    keepalive: Mutex<KeepAlive>,
    teardown: Once,
}

impl Session {
    pub fn new(tracker: TempTracker, keepalive: KeepAlive) -> Arc<Self> {
        Arc::new(Self {
            tracker,
            keepalive: Mutex::new(keepalive),
            teardown: Once::new(),
        })
    }

    pub fn tracker(&self) -> &TempTracker {
        &self.tracker
    }

    /// Remove temp paths and stop the keep-alive. Later calls do nothing.
    pub fn shutdown(&self) {
        self.teardown.call_once(|| {
            debug!(token = %self.tracker.token(), "shutting down session");
            match self.keepalive.lock() {
                Ok(mut keepalive) => keepalive.stop(),
                Err(poisoned) => poisoned.into_inner().stop(),
            }
            self.tracker.cleanup();
        });
    }

    pub fn is_shut_down(&self) -> bool {
        self.teardown.is_completed()
    }

    /// Guard that shuts the session down when it goes out of scope.
    pub fn guard(self: &Arc<Self>) -> ShutdownGuard {
        ShutdownGuard(Arc::clone(self))
    }
}

/// Shuts its [`Session`] down on drop.
pub struct ShutdownGuard(Arc<Session>);

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        self.0.shutdown();
    }
}
