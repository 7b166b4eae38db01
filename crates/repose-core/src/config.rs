//! Skeleton layout maps.
//!
//! Structure offsets are configuration data, not logic: each supported game
//! build ships a JSON map keyed by its version string, describing how to
//! reach the transform array from the module base and how bone transforms
//! are laid out inside it. Nothing in the core hard-codes a game build.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::memory::OffsetChain;

/// One bone of the target skeleton as described by the layout map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoneDef {
    pub name: String,
    /// Index into the target's transform array.
    pub index: u64,
    /// Parent bone name; `None` for roots.
    #[serde(default)]
    pub parent: Option<String>,
}

/// Version-keyed layout of the target's in-memory skeleton.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkeletonMap {
    /// Game build this map was made for (e.g. "2026.03.18.0000.0000").
    pub version: String,
    /// Chain from the module base to the first transform in the array.
    pub transform_array: OffsetChain,
    /// Byte stride between consecutive transforms.
    pub transform_stride: i64,
    pub position_offset: i64,
    pub rotation_offset: i64,
    pub scale_offset: i64,
    pub bones: Vec<BoneDef>,
}

impl SkeletonMap {
    /// Load a map from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let map: SkeletonMap = serde_json::from_str(&content)?;
        map.validate()?;
        debug!(
            "loaded skeleton map: version={}, {} bones",
            map.version,
            map.bones.len()
        );
        Ok(map)
    }

    /// Save a map to a JSON file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), content)?;
        info!("saved skeleton map to {}", path.as_ref().display());
        Ok(())
    }

    /// Check the map against the running game's reported build version.
    pub fn check_version(&self, game_version: &str) -> Result<()> {
        if self.version == game_version {
            Ok(())
        } else {
            Err(Error::MapVersionMismatch {
                expected: self.version.clone(),
                actual: game_version.to_string(),
            })
        }
    }

    /// Structural validation: a map that passes can always be mirrored
    /// into a skeleton.
    pub fn validate(&self) -> Result<()> {
        if self.version.trim().is_empty() {
            return Err(Error::InvalidMap("empty version".to_string()));
        }
        if self.transform_array.is_empty() {
            return Err(Error::InvalidMap("empty transform array chain".to_string()));
        }
        if self.transform_stride <= 0 {
            return Err(Error::InvalidMap(format!(
                "non-positive transform stride {}",
                self.transform_stride
            )));
        }
        if self.bones.is_empty() {
            return Err(Error::InvalidMap("no bones".to_string()));
        }

        let mut seen = std::collections::HashSet::new();
        for bone in &self.bones {
            if !seen.insert(bone.name.as_str()) {
                return Err(Error::InvalidMap(format!(
                    "duplicate bone name \"{}\"",
                    bone.name
                )));
            }
        }

        for bone in &self.bones {
            if let Some(parent) = &bone.parent {
                if !seen.contains(parent.as_str()) {
                    return Err(Error::InvalidMap(format!(
                        "bone \"{}\" references unknown parent \"{}\"",
                        bone.name, parent
                    )));
                }
                if parent == &bone.name {
                    return Err(Error::InvalidMap(format!(
                        "bone \"{}\" is its own parent",
                        bone.name
                    )));
                }
            }
        }

        self.check_acyclic()?;
        Ok(())
    }

    fn check_acyclic(&self) -> Result<()> {
        let parent_of: std::collections::HashMap<&str, &str> = self
            .bones
            .iter()
            .filter_map(|b| b.parent.as_deref().map(|p| (b.name.as_str(), p)))
            .collect();

        for bone in &self.bones {
            let mut cursor = bone.name.as_str();
            let mut hops = 0usize;
            while let Some(parent) = parent_of.get(cursor) {
                cursor = parent;
                hops += 1;
                if hops > self.bones.len() {
                    return Err(Error::InvalidMap(format!(
                        "parent cycle involving bone \"{}\"",
                        bone.name
                    )));
                }
            }
        }
        Ok(())
    }
}
