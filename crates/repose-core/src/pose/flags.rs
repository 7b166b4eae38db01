//! Cooperative edit/freeze signaling between the apply engine and the
//! sync loop.
//!
//! These are acquire/release atomics, not a lock: the true serialization
//! point is the target process's own update cycle, which nobody here
//! controls. There is at most one active apply at a time by contract, so a
//! flag with visibility ordering is enough.

use std::sync::atomic::{AtomicBool, Ordering};

use strum::Display;

/// One transform channel of a bone.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    #[strum(serialize = "position")]
    Position,
    #[strum(serialize = "rotation")]
    Rotation,
    #[strum(serialize = "scale")]
    Scale,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Position, Channel::Rotation, Channel::Scale];
}

/// Shared freeze/editing state checked by both the apply engine and the
/// sync loop.
#[derive(Debug, Default)]
pub struct EditFlags {
    freeze_position: AtomicBool,
    freeze_rotation: AtomicBool,
    freeze_scale: AtomicBool,
    editing: AtomicBool,
}

impl EditFlags {
    pub fn new() -> Self {
        Self::default()
    }

    fn flag(&self, channel: Channel) -> &AtomicBool {
        match channel {
            Channel::Position => &self.freeze_position,
            Channel::Rotation => &self.freeze_rotation,
            Channel::Scale => &self.freeze_scale,
        }
    }

    /// True while the sync loop must not overwrite this channel with a
    /// value derived from a stale read.
    pub fn is_frozen(&self, channel: Channel) -> bool {
        self.flag(channel).load(Ordering::Acquire)
    }

    pub fn set_frozen(&self, channel: Channel, frozen: bool) {
        self.flag(channel).store(frozen, Ordering::Release);
    }

    /// True while a multi-step apply owns the target's memory; the sync
    /// loop writes nothing during this window.
    pub fn is_editing(&self) -> bool {
        self.editing.load(Ordering::Acquire)
    }

    /// Claim the single apply slot. Fails when an apply is already running.
    pub fn try_begin_edit(&self) -> bool {
        self.editing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn end_edit(&self) {
        self.editing.store(false, Ordering::Release);
    }

    /// Lower every freeze flag; the mandatory cleanup on any apply exit.
    pub fn unfreeze_all(&self) {
        for channel in Channel::ALL {
            self.set_frozen(channel, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edit_slot_is_exclusive() {
        let flags = EditFlags::new();
        assert!(flags.try_begin_edit());
        assert!(!flags.try_begin_edit(), "second apply must fail immediately");
        flags.end_edit();
        assert!(flags.try_begin_edit());
    }

    #[test]
    fn test_freeze_flags_are_per_channel() {
        let flags = EditFlags::new();
        flags.set_frozen(Channel::Rotation, true);
        assert!(flags.is_frozen(Channel::Rotation));
        assert!(!flags.is_frozen(Channel::Position));
        assert!(!flags.is_frozen(Channel::Scale));

        flags.unfreeze_all();
        assert!(Channel::ALL.iter().all(|c| !flags.is_frozen(*c)));
    }
}
