//! Skeleton capture and apply.
//!
//! Capture walks the mirrored hierarchy and snapshots transforms
//! all-or-nothing. Apply is a multi-step, time-extended sequence: the
//! target recomputes child transforms from parents on its own schedule, so
//! writes run in parents-before-children order over several passes with
//! cooperative yields in between, coordinated with the sync loop through
//! the shared [`EditFlags`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::{AccessError, Error, HierarchyError, Result};
use crate::memory::ProcessMemory;
use crate::pose::{ApplyOptions, Channel, EditFlags, PoseSnapshot, SavedBone, SnapshotConfig};
use crate::skeleton::{Bone, Skeleton};
use crate::sync::WaitSignal;
use crate::timing::{APPLY_PASSES, APPLY_SETTLE_DELAY, APPLY_STEP_DELAY};

/// What an apply actually did.
#[derive(Debug, Clone, Default)]
pub struct ApplyReport {
    /// Bones that had at least one channel written.
    pub applied: usize,
    /// Snapshot bones absent from the live hierarchy (model changed).
    pub missing: Vec<String>,
    /// Bones abandoned after a transform access failure.
    pub failed: Vec<String>,
    /// True when the wait signal tripped mid-sequence. Freeze flags are
    /// lowered regardless.
    pub interrupted: bool,
}

/// Capture/apply engine bound to the shared edit flags and wait signal.
pub struct PoseEngine {
    flags: Arc<EditFlags>,
    signal: Arc<WaitSignal>,
}

impl PoseEngine {
    pub fn new(flags: Arc<EditFlags>, signal: Arc<WaitSignal>) -> Self {
        Self { flags, signal }
    }

    pub fn flags(&self) -> &Arc<EditFlags> {
        &self.flags
    }

    /// Snapshot the live hierarchy.
    ///
    /// All-or-nothing for the bones it covers: the first unreadable
    /// transform aborts the capture, naming the offending bone.
    pub fn capture<P: ProcessMemory + ?Sized>(
        &self,
        skeleton: &mut Skeleton,
        port: &P,
        config: &SnapshotConfig,
    ) -> Result<PoseSnapshot> {
        if skeleton.is_empty() {
            return Err(HierarchyError::NoSkeleton.into());
        }

        let base = skeleton.base();
        let names = skeleton.bone_names().to_vec();
        let mut bones = BTreeMap::new();

        for name in names {
            let bone = skeleton.bone_mut(&name).expect("named bone exists");
            if config.selected_bones_only && !bone.is_selected() {
                continue;
            }

            let transform_err = |source: AccessError| HierarchyError::Transform {
                bone: name.clone(),
                source,
            };

            let mut saved = SavedBone::default();
            if config.include_position {
                saved.position = Some(bone.read_position(port, base).map_err(transform_err)?);
            }
            if config.include_rotation {
                saved.rotation = Some(bone.read_rotation(port, base).map_err(transform_err)?);
            }
            if config.include_scale {
                saved.scale = Some(bone.read_scale(port, base).map_err(transform_err)?);
            }

            bones.insert(name, Some(saved));
        }

        info!("captured pose snapshot: {} bones", bones.len());
        Ok(PoseSnapshot {
            config: config.clone(),
            captured_at: Utc::now(),
            bones,
        })
    }

    /// Write a snapshot back into the live hierarchy.
    ///
    /// The sequence: claim the single edit slot, raise the freeze flags
    /// for the channels both the snapshot and `options` cover, run
    /// [`APPLY_PASSES`] passes in parents-before-children order with a
    /// yield after each bone, wait one settle interval, lower the flags
    /// and refresh the hierarchy so the caller observes the settled state.
    /// The flags come down on every exit path, including failures.
    pub fn apply<P: ProcessMemory + ?Sized>(
        &self,
        skeleton: &mut Skeleton,
        port: &P,
        snapshot: &PoseSnapshot,
        options: &ApplyOptions,
    ) -> Result<ApplyReport> {
        if skeleton.is_empty() {
            return Err(HierarchyError::NoSkeleton.into());
        }
        if !self.flags.try_begin_edit() {
            return Err(Error::ApplyInProgress);
        }
        let guard = FreezeGuard::new(&self.flags);

        let channels: Vec<Channel> = Channel::ALL
            .into_iter()
            .filter(|c| snapshot.config.includes(*c) && options.requests(*c))
            .collect();
        for channel in &channels {
            self.flags.set_frozen(*channel, true);
        }
        debug!(
            "apply begins: {} snapshot bones, channels: {:?}",
            snapshot.bones.len(),
            channels
        );

        let mut report = ApplyReport::default();
        for name in snapshot.bones.keys() {
            if skeleton.bone(name).is_none() {
                warn!("bone \"{}\" not found", name);
                report.missing.push(name.clone());
            }
        }

        let base = skeleton.base();
        let order = skeleton.bone_names().to_vec();
        let mut touched: BTreeSet<String> = BTreeSet::new();
        let mut failed: BTreeSet<String> = BTreeSet::new();

        'passes: for pass in 0..APPLY_PASSES {
            for name in &order {
                if failed.contains(name) || !options.covers_bone(name) {
                    continue;
                }
                let Some(Some(saved)) = snapshot.bones.get(name) else {
                    continue;
                };
                let bone = skeleton.bone_mut(name).expect("ordered bone exists");

                match self.apply_bone(bone, port, base, saved, &channels) {
                    Ok(wrote) => {
                        if wrote {
                            touched.insert(name.clone());
                        }
                    }
                    Err(AccessError::ProcessExited) => {
                        // Guard drop lowers the freeze flags before the
                        // error reaches the caller.
                        return Err(Error::Access(AccessError::ProcessExited));
                    }
                    Err(e) => {
                        warn!("bone \"{}\": apply failed, abandoning: {}", name, e);
                        failed.insert(name.clone());
                        continue;
                    }
                }

                if self.signal.wait(APPLY_STEP_DELAY) {
                    debug!("apply interrupted during pass {}", pass + 1);
                    report.interrupted = true;
                    break 'passes;
                }
            }
        }

        if !report.interrupted && self.signal.wait(APPLY_SETTLE_DELAY) {
            report.interrupted = true;
        }

        // Mandatory cleanup: lower the freeze flags channel by channel and
        // reassert independent write-back, then disarm the failure guard.
        for channel in &channels {
            self.flags.set_frozen(*channel, false);
        }
        self.flags.end_edit();
        guard.disarm();

        // Final refresh so the caller observes the settled state, not an
        // intermediate one.
        skeleton.refresh_all(port)?;

        report.applied = touched.len();
        report.failed = failed.into_iter().collect();
        info!(
            "apply finished: {} bones written, {} missing, {} failed{}",
            report.applied,
            report.missing.len(),
            report.failed.len(),
            if report.interrupted {
                " (interrupted)"
            } else {
                ""
            }
        );
        Ok(report)
    }

    /// Write one bone's captured channels, then force an immediate re-read
    /// so descendants derive from the settled parent transform.
    fn apply_bone<P: ProcessMemory + ?Sized>(
        &self,
        bone: &mut Bone,
        port: &P,
        base: u64,
        saved: &SavedBone,
        channels: &[Channel],
    ) -> std::result::Result<bool, AccessError> {
        let mut wrote = false;

        for channel in channels {
            if !self.flags.is_frozen(*channel) {
                continue;
            }
            match channel {
                Channel::Position => {
                    if let Some(position) = saved.position {
                        // A collapsed resting transform reads as the zero
                        // vector; writing over it detaches the bone.
                        if !bone.read_position(port, base)?.is_zero() {
                            bone.write_position(port, base, position)?;
                            wrote = true;
                        }
                    }
                }
                Channel::Rotation => {
                    if let Some(rotation) = saved.rotation {
                        bone.write_rotation(port, base, rotation)?;
                        wrote = true;
                    }
                }
                Channel::Scale => {
                    if let Some(scale) = saved.scale {
                        if !bone.read_scale(port, base)?.is_zero() {
                            bone.write_scale(port, base, scale)?;
                            wrote = true;
                        }
                    }
                }
            }
        }

        if wrote {
            bone.refresh(port, base)?;
        }
        Ok(wrote)
    }
}

/// Lowers the freeze flags and releases the edit slot if an apply unwinds
/// before its explicit cleanup step.
struct FreezeGuard<'a> {
    flags: &'a EditFlags,
    armed: std::cell::Cell<bool>,
}

impl<'a> FreezeGuard<'a> {
    fn new(flags: &'a EditFlags) -> Self {
        Self {
            flags,
            armed: std::cell::Cell::new(true),
        }
    }

    fn disarm(&self) {
        self.armed.set(false);
    }
}

impl Drop for FreezeGuard<'_> {
    fn drop(&mut self) {
        if self.armed.get() {
            self.flags.unfreeze_all();
            self.flags.end_edit();
        }
    }
}
