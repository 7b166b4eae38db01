//! Interruptible waiting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// A cancellation signal supporting interruptible waits.
///
/// The sync loop paces its ticks with this, and the apply engine uses it
/// for its inter-step yields, so triggering the signal (Ctrl-C, detach)
/// wakes every cooperating wait immediately instead of finishing a sleep.
pub struct WaitSignal {
    triggered: AtomicBool,
    condvar: Condvar,
    mutex: Mutex<()>,
}

impl WaitSignal {
    pub fn new() -> Self {
        Self {
            triggered: AtomicBool::new(false),
            condvar: Condvar::new(),
            mutex: Mutex::new(()),
        }
    }

    /// Trip the signal, waking all current and future waiters.
    pub fn trigger(&self) {
        self.triggered.store(true, Ordering::SeqCst);
        self.condvar.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` unless the signal trips first.
    ///
    /// Returns `true` when interrupted, `false` when the full duration
    /// elapsed.
    pub fn wait(&self, duration: Duration) -> bool {
        if self.is_triggered() {
            return true;
        }

        let guard = self.mutex.lock().unwrap();
        match self
            .condvar
            .wait_timeout_while(guard, duration, |_| !self.is_triggered())
        {
            Ok((_, timeout)) => !timeout.timed_out(),
            // A poisoned mutex means a waiter panicked; stop waiting.
            Err(_) => true,
        }
    }
}

impl Default for WaitSignal {
    fn default() -> Self {
        Self::new()
    }
}
