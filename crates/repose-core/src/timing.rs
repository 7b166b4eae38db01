//! Timing constants for the sync loop and the apply sequence.

use std::time::Duration;

/// Interval between sync loop refresh ticks.
pub const SYNC_INTERVAL: Duration = Duration::from_millis(50);

/// Write passes over the hierarchy during one apply. Parent transforms
/// written in pass n only reach descendant world computations after the
/// target's own per-frame pass, so a single pass leaves children lagging
/// their intended parent-relative pose.
pub const APPLY_PASSES: usize = 3;

/// Sub-tick yield between per-bone write groups, letting the target's
/// update cycle settle before the next bone.
pub const APPLY_STEP_DELAY: Duration = Duration::from_millis(5);

/// Settle interval after the final pass, before freeze flags drop.
pub const APPLY_SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Delay between attach attempts while waiting for the target process.
pub const ATTACH_RETRY_DELAY: Duration = Duration::from_secs(5);
