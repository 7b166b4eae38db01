//! Mirrored bone hierarchy.
//!
//! The skeleton mirrors the tree the target process owns; this layer reads
//! and writes transforms but never restructures the topology. Bones hold
//! typed cells whose chains derive from the layout map, so every access
//! re-resolves against live process memory.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::config::SkeletonMap;
use crate::error::{AccessError, Error, Result};
use crate::math::{Quat, Transform, Vec3};
use crate::memory::{MemoryCell, OffsetStep, ProcessMemory};
use crate::pose::Channel;

/// One mirrored bone and its live transform cells.
#[derive(Debug, Clone)]
pub struct Bone {
    name: String,
    parent: Option<String>,
    selected: bool,
    position: MemoryCell<Vec3>,
    rotation: MemoryCell<Quat>,
    scale: MemoryCell<Vec3>,
}

impl Bone {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn is_selected(&self) -> bool {
        self.selected
    }

    pub fn set_selected(&mut self, selected: bool) {
        self.selected = selected;
    }

    pub fn read_position<P: ProcessMemory + ?Sized>(
        &mut self,
        port: &P,
        base: u64,
    ) -> std::result::Result<Vec3, AccessError> {
        self.position.read(port, base)
    }

    pub fn read_rotation<P: ProcessMemory + ?Sized>(
        &mut self,
        port: &P,
        base: u64,
    ) -> std::result::Result<Quat, AccessError> {
        self.rotation.read(port, base)
    }

    pub fn read_scale<P: ProcessMemory + ?Sized>(
        &mut self,
        port: &P,
        base: u64,
    ) -> std::result::Result<Vec3, AccessError> {
        self.scale.read(port, base)
    }

    pub fn write_position<P: ProcessMemory + ?Sized>(
        &mut self,
        port: &P,
        base: u64,
        value: Vec3,
    ) -> std::result::Result<(), AccessError> {
        self.position.write(port, base, value)
    }

    pub fn write_rotation<P: ProcessMemory + ?Sized>(
        &mut self,
        port: &P,
        base: u64,
        value: Quat,
    ) -> std::result::Result<(), AccessError> {
        self.rotation.write(port, base, value)
    }

    pub fn write_scale<P: ProcessMemory + ?Sized>(
        &mut self,
        port: &P,
        base: u64,
        value: Vec3,
    ) -> std::result::Result<(), AccessError> {
        self.scale.write(port, base, value)
    }

    /// Re-read all three channels; the bone's settled state after a write.
    pub fn refresh<P: ProcessMemory + ?Sized>(
        &mut self,
        port: &P,
        base: u64,
    ) -> std::result::Result<Transform, AccessError> {
        Ok(Transform {
            position: self.position.read(port, base)?,
            rotation: self.rotation.read(port, base)?,
            scale: self.scale.read(port, base)?,
        })
    }

    /// Re-read one channel. Returns whether the value changed bitwise.
    pub fn refresh_channel<P: ProcessMemory + ?Sized>(
        &mut self,
        port: &P,
        base: u64,
        channel: Channel,
    ) -> std::result::Result<bool, AccessError> {
        match channel {
            Channel::Position => self.position.read(port, base).map(|_| ()),
            Channel::Rotation => self.rotation.read(port, base).map(|_| ()),
            Channel::Scale => self.scale.read(port, base).map(|_| ()),
        }?;
        Ok(self.channel_dirty(channel))
    }

    /// Re-write the held value of one channel, pinning it against the
    /// target's own update cycle. Returns false when nothing is held yet.
    pub fn pin_channel<P: ProcessMemory + ?Sized>(
        &mut self,
        port: &P,
        base: u64,
        channel: Channel,
    ) -> std::result::Result<bool, AccessError> {
        match channel {
            Channel::Position => self.position.rewrite_last(port, base),
            Channel::Rotation => self.rotation.rewrite_last(port, base),
            Channel::Scale => self.scale.rewrite_last(port, base),
        }
    }

    pub fn channel_dirty(&self, channel: Channel) -> bool {
        match channel {
            Channel::Position => self.position.is_dirty(),
            Channel::Rotation => self.rotation.is_dirty(),
            Channel::Scale => self.scale.is_dirty(),
        }
    }

    /// Last observed transform, if every channel has been read at least once.
    pub fn last_transform(&self) -> Option<Transform> {
        Some(Transform {
            position: *self.position.last_known()?,
            rotation: *self.rotation.last_known()?,
            scale: *self.scale.last_known()?,
        })
    }
}

/// The mirrored hierarchy, bones held in hierarchy-stable order: parents
/// strictly before children.
#[derive(Debug, Clone)]
pub struct Skeleton {
    base: u64,
    order: Vec<String>,
    bones: HashMap<String, Bone>,
}

impl Skeleton {
    /// Build the mirror from a validated layout map.
    ///
    /// `base` is the target's module base; all chains resolve against it.
    pub fn mirror(map: &SkeletonMap, base: u64) -> Result<Self> {
        map.validate()?;

        let mut bones = HashMap::new();
        for def in &map.bones {
            let transform_base = def.index as i64 * map.transform_stride;
            let cell_chain = |field_offset: i64| {
                map.transform_array
                    .extended(OffsetStep::offset(transform_base + field_offset))
            };

            bones.insert(
                def.name.clone(),
                Bone {
                    name: def.name.clone(),
                    parent: def.parent.clone(),
                    selected: false,
                    position: MemoryCell::new(cell_chain(map.position_offset)),
                    rotation: MemoryCell::new(cell_chain(map.rotation_offset)),
                    scale: MemoryCell::new(cell_chain(map.scale_offset)),
                },
            );
        }

        let order = hierarchy_order(map)?;
        debug!("mirrored skeleton: {} bones", order.len());

        Ok(Self { base, order, bones })
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Bone names in hierarchy order, parents before children.
    pub fn bone_names(&self) -> &[String] {
        &self.order
    }

    pub fn bone(&self, name: &str) -> Option<&Bone> {
        self.bones.get(name)
    }

    pub fn bone_mut(&mut self, name: &str) -> Option<&mut Bone> {
        self.bones.get_mut(name)
    }

    /// Mark exactly the named bones as selected.
    pub fn select<'a, I: IntoIterator<Item = &'a str>>(&mut self, names: I) {
        for bone in self.bones.values_mut() {
            bone.selected = false;
        }
        for name in names {
            if let Some(bone) = self.bones.get_mut(name) {
                bone.selected = true;
            } else {
                warn!("cannot select unknown bone \"{}\"", name);
            }
        }
    }

    /// Full refresh of every bone. Per-bone failures are logged and
    /// skipped; a dead attachment escalates. Returns the names of bones
    /// whose transforms changed since the previous read.
    pub fn refresh_all<P: ProcessMemory + ?Sized>(&mut self, port: &P) -> Result<Vec<String>> {
        let base = self.base;
        let mut changed = Vec::new();

        for name in &self.order {
            let bone = self.bones.get_mut(name).expect("order entry has a bone");
            match bone.refresh(port, base) {
                Ok(_) => {
                    if Channel::ALL.iter().any(|c| bone.channel_dirty(*c)) {
                        changed.push(name.clone());
                    }
                }
                Err(AccessError::ProcessExited) => {
                    return Err(Error::Access(AccessError::ProcessExited));
                }
                Err(e) => {
                    debug!("refresh skipped bone \"{}\": {}", name, e);
                }
            }
        }

        Ok(changed)
    }
}

/// Order bones so every parent precedes its children, keeping the map's
/// own ordering among unrelated bones.
fn hierarchy_order(map: &SkeletonMap) -> Result<Vec<String>> {
    let mut emitted: std::collections::HashSet<&str> = std::collections::HashSet::new();
    let mut order = Vec::with_capacity(map.bones.len());

    while order.len() < map.bones.len() {
        let before = order.len();
        for def in &map.bones {
            if emitted.contains(def.name.as_str()) {
                continue;
            }
            let ready = match &def.parent {
                None => true,
                Some(parent) => emitted.contains(parent.as_str()),
            };
            if ready {
                emitted.insert(def.name.as_str());
                order.push(def.name.clone());
            }
        }
        if order.len() == before {
            // validate() rejects cycles; this is unreachable for a valid map.
            return Err(Error::InvalidMap("unresolvable bone ordering".to_string()));
        }
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BoneDef;
    use crate::memory::{MockProcess, OffsetChain};

    fn linear_map() -> SkeletonMap {
        SkeletonMap {
            version: "test".to_string(),
            transform_array: OffsetChain::new().deref(0x10),
            transform_stride: 0x30,
            position_offset: 0x00,
            rotation_offset: 0x0C,
            scale_offset: 0x1C,
            bones: vec![
                BoneDef {
                    name: "Head".to_string(),
                    index: 2,
                    parent: Some("Spine".to_string()),
                },
                BoneDef {
                    name: "Root".to_string(),
                    index: 0,
                    parent: None,
                },
                BoneDef {
                    name: "Spine".to_string(),
                    index: 1,
                    parent: Some("Root".to_string()),
                },
            ],
        }
    }

    fn mock_with_transforms() -> MockProcess {
        let mock = MockProcess::builder()
            .base_address(0x1000)
            .region(0x1000, 0x100)
            .region(0x4000, 0x200)
            .build();
        mock.plant_pointer(0x1010, 0x4000);
        mock
    }

    #[test]
    fn test_hierarchy_order_puts_parents_first() {
        let skeleton = Skeleton::mirror(&linear_map(), 0x1000).unwrap();
        assert_eq!(skeleton.bone_names(), &["Root", "Spine", "Head"]);
    }

    #[test]
    fn test_bone_cells_land_on_strided_fields() {
        let mock = mock_with_transforms();
        let mut skeleton = Skeleton::mirror(&linear_map(), 0x1000).unwrap();

        // Spine (index 1) position lives at 0x4000 + 1*0x30 + 0.
        mock.plant_f32(0x4030, 5.0);
        let spine = skeleton.bone_mut("Spine").unwrap();
        let position = spine.read_position(&mock, 0x1000).unwrap();
        assert_eq!(position.x.to_bits(), 5.0f32.to_bits());
    }

    #[test]
    fn test_refresh_all_reports_changed_bones() {
        let mock = mock_with_transforms();
        let mut skeleton = Skeleton::mirror(&linear_map(), 0x1000).unwrap();

        let first = skeleton.refresh_all(&mock).unwrap();
        assert_eq!(first.len(), 3, "first refresh sees every bone as new");

        let second = skeleton.refresh_all(&mock).unwrap();
        assert!(second.is_empty(), "quiescent memory reports no changes");

        // Move Head's rotation (index 2, rotation offset 0x0C).
        mock.plant_f32(0x4000 + 2 * 0x30 + 0x0C, 0.5);
        let third = skeleton.refresh_all(&mock).unwrap();
        assert_eq!(third, vec!["Head".to_string()]);
    }

    #[test]
    fn test_refresh_all_escalates_process_exit() {
        let mock = mock_with_transforms();
        let mut skeleton = Skeleton::mirror(&linear_map(), 0x1000).unwrap();
        mock.simulate_exit();

        let err = skeleton.refresh_all(&mock).unwrap_err();
        assert!(err.is_attachment_lost());
    }

    #[test]
    fn test_selection_marks_only_named_bones() {
        let mut skeleton = Skeleton::mirror(&linear_map(), 0x1000).unwrap();
        skeleton.select(["Head"]);
        assert!(skeleton.bone("Head").unwrap().is_selected());
        assert!(!skeleton.bone("Root").unwrap().is_selected());
        assert!(!skeleton.bone("Spine").unwrap().is_selected());
    }
}
