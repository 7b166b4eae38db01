//! Pose snapshots and the capture/apply engine.

pub mod engine;
mod flags;

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::math::{Quat, Vec3};

pub use engine::{ApplyReport, PoseEngine};
pub use flags::{Channel, EditFlags};

fn default_true() -> bool {
    true
}

/// Which channels a capture records, and whether it is limited to the
/// bones marked selected on the skeleton.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    #[serde(default = "default_true")]
    pub include_position: bool,
    #[serde(default = "default_true")]
    pub include_rotation: bool,
    #[serde(default = "default_true")]
    pub include_scale: bool,
    #[serde(default)]
    pub selected_bones_only: bool,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            include_position: true,
            include_rotation: true,
            include_scale: true,
            selected_bones_only: false,
        }
    }
}

impl SnapshotConfig {
    pub fn includes(&self, channel: Channel) -> bool {
        match channel {
            Channel::Position => self.include_position,
            Channel::Rotation => self.include_rotation,
            Channel::Scale => self.include_scale,
        }
    }
}

/// One bone's captured fields. `None` means the field was not captured,
/// which is distinct from a captured zero value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SavedBone {
    pub position: Option<Vec3>,
    pub rotation: Option<Quat>,
    pub scale: Option<Vec3>,
}

/// An immutable capture of per-bone transforms.
///
/// Independent of live cells; applying it later re-binds by bone name
/// against whatever hierarchy is live at that point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoseSnapshot {
    pub config: SnapshotConfig,
    pub captured_at: DateTime<Utc>,
    /// `None` for a bone records "present but nothing captured".
    pub bones: BTreeMap<String, Option<SavedBone>>,
}

impl PoseSnapshot {
    /// Load a snapshot from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save a snapshot to a JSON file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), content)?;
        info!(
            "saved pose snapshot ({} bones) to {}",
            self.bones.len(),
            path.as_ref().display()
        );
        Ok(())
    }
}

/// What an apply is allowed to touch. A field is written only when the
/// snapshot captured it AND these options request it AND the per-bone
/// entry holds a value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyOptions {
    /// Restrict the apply to these bones; `None` applies every bone the
    /// snapshot covers.
    #[serde(default)]
    pub selection: Option<BTreeSet<String>>,
    #[serde(default = "default_true")]
    pub load_positions: bool,
    #[serde(default = "default_true")]
    pub load_rotations: bool,
    #[serde(default = "default_true")]
    pub load_scales: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            selection: None,
            load_positions: true,
            load_rotations: true,
            load_scales: true,
        }
    }
}

impl ApplyOptions {
    pub fn requests(&self, channel: Channel) -> bool {
        match channel {
            Channel::Position => self.load_positions,
            Channel::Rotation => self.load_rotations,
            Channel::Scale => self.load_scales,
        }
    }

    pub fn covers_bone(&self, name: &str) -> bool {
        match &self.selection {
            Some(filter) => filter.contains(name),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_serde_keeps_null_distinct_from_zero() {
        let mut bones = BTreeMap::new();
        bones.insert(
            "Head".to_string(),
            Some(SavedBone {
                position: None,
                rotation: Some(Quat::IDENTITY),
                scale: Some(Vec3::ZERO),
            }),
        );
        bones.insert("Stub".to_string(), None);

        let snapshot = PoseSnapshot {
            config: SnapshotConfig::default(),
            captured_at: Utc::now(),
            bones,
        };

        let json = serde_json::to_string(&snapshot).unwrap();
        let back: PoseSnapshot = serde_json::from_str(&json).unwrap();

        let head = back.bones["Head"].as_ref().unwrap();
        assert!(head.position.is_none());
        assert_eq!(head.scale, Some(Vec3::ZERO));
        assert!(back.bones["Stub"].is_none());
    }

    #[test]
    fn test_apply_options_selection() {
        let options = ApplyOptions {
            selection: Some(["Head".to_string()].into_iter().collect()),
            ..Default::default()
        };
        assert!(options.covers_bone("Head"));
        assert!(!options.covers_bone("Spine"));

        let unfiltered = ApplyOptions::default();
        assert!(unfiltered.covers_bone("Spine"));
    }

    #[test]
    fn test_snapshot_config_channel_flags() {
        let config = SnapshotConfig {
            include_position: false,
            ..Default::default()
        };
        assert!(!config.includes(Channel::Position));
        assert!(config.includes(Channel::Rotation));
        assert!(config.includes(Channel::Scale));
    }
}
