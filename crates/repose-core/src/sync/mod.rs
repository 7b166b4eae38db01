//! Background synchronization loop.
//!
//! A recurring, cancellable task that refreshes the mirrored skeleton from
//! process memory on a fixed cadence, independent of user-driven capture
//! and apply. Coordination with an in-progress apply is cooperative: the
//! loop checks the shared [`EditFlags`] every tick and backs off from
//! channels the apply has frozen, re-pinning their held values instead of
//! overwriting them with stale reads.

mod signal;

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::AccessError;
use crate::memory::ProcessMemory;
use crate::pose::{Channel, EditFlags};
use crate::skeleton::Skeleton;

pub use signal::WaitSignal;

/// Consecutive all-cells-failing ticks before the attachment is treated
/// as lost.
const FULL_FAILURE_TICKS: u32 = 3;

/// Called with the names of bones whose transforms changed this tick.
pub type ChangeCallback = Box<dyn Fn(&[String]) + Send>;

/// Owner handle for a running sync loop.
pub struct SyncLoopHandle {
    thread: Option<JoinHandle<()>>,
    signal: Arc<WaitSignal>,
}

impl SyncLoopHandle {
    /// Trigger the loop's signal and join the thread.
    pub fn stop(mut self) {
        self.signal.trigger();
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.thread
            .as_ref()
            .map(|t| t.is_finished())
            .unwrap_or(true)
    }
}

impl Drop for SyncLoopHandle {
    fn drop(&mut self) {
        self.signal.trigger();
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

/// The polling/synchronization loop.
pub struct SyncLoop;

impl SyncLoop {
    /// Spawn the loop on its own thread.
    ///
    /// Runs until `signal` trips, the attachment is lost, or the handle is
    /// stopped/dropped.
    pub fn spawn(
        skeleton: Arc<Mutex<Skeleton>>,
        port: Arc<dyn ProcessMemory>,
        flags: Arc<EditFlags>,
        signal: Arc<WaitSignal>,
        interval: Duration,
        on_change: Option<ChangeCallback>,
    ) -> SyncLoopHandle {
        let loop_signal = Arc::clone(&signal);
        let thread = thread::spawn(move || {
            run_loop(skeleton, port, flags, &loop_signal, interval, on_change);
        });

        SyncLoopHandle {
            thread: Some(thread),
            signal,
        }
    }
}

fn run_loop(
    skeleton: Arc<Mutex<Skeleton>>,
    port: Arc<dyn ProcessMemory>,
    flags: Arc<EditFlags>,
    signal: &WaitSignal,
    interval: Duration,
    on_change: Option<ChangeCallback>,
) {
    info!("sync loop started ({}ms interval)", interval.as_millis());
    let mut full_failure_ticks = 0u32;

    while !signal.wait(interval) {
        // An in-progress apply owns the target's memory; touch nothing.
        if flags.is_editing() {
            continue;
        }

        let mut changed = Vec::new();
        let outcome = {
            let mut skeleton = skeleton.lock().unwrap();
            tick(&mut skeleton, port.as_ref(), &flags, &mut changed)
        };

        match outcome {
            TickOutcome::AttachmentLost => {
                warn!("target process exited, sync loop stopping");
                break;
            }
            TickOutcome::AllFailed => {
                full_failure_ticks += 1;
                if full_failure_ticks >= FULL_FAILURE_TICKS {
                    warn!(
                        "every cell failed for {} consecutive ticks, treating attachment as lost",
                        full_failure_ticks
                    );
                    break;
                }
            }
            TickOutcome::Ok => {
                full_failure_ticks = 0;
            }
        }

        if !changed.is_empty() {
            debug!("external change in {} bone(s)", changed.len());
            if let Some(callback) = &on_change {
                callback(&changed);
            }
        }
    }

    info!("sync loop stopped");
}

enum TickOutcome {
    Ok,
    AllFailed,
    AttachmentLost,
}

/// One refresh pass over every bone channel.
fn tick(
    skeleton: &mut Skeleton,
    port: &dyn ProcessMemory,
    flags: &EditFlags,
    changed: &mut Vec<String>,
) -> TickOutcome {
    let base = skeleton.base();
    let names = skeleton.bone_names().to_vec();
    let mut any_ok = false;
    let mut any_attempted = false;

    for name in &names {
        let bone = skeleton.bone_mut(name).expect("ordered bone exists");

        for channel in Channel::ALL {
            any_attempted = true;

            let result = if flags.is_frozen(channel) {
                // Frozen: never overwrite the held value with a live read;
                // re-pin it against the target's own update cycle instead.
                bone.pin_channel(port, base, channel).map(|_| false)
            } else {
                bone.refresh_channel(port, base, channel)
            };

            match result {
                Ok(dirty) => {
                    any_ok = true;
                    if dirty && !changed.contains(name) {
                        changed.push(name.clone());
                    }
                }
                Err(AccessError::ProcessExited) => return TickOutcome::AttachmentLost,
                Err(e) => {
                    // Recoverable: the cell skips this cycle.
                    debug!("sync skipped {} {}: {}", name, channel, e);
                }
            }
        }
    }

    if any_attempted && !any_ok {
        TickOutcome::AllFailed
    } else {
        TickOutcome::Ok
    }
}
