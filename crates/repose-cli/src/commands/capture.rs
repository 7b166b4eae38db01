//! Pose capture command.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use owo_colors::OwoColorize;
use repose_core::{EditFlags, PoseEngine, SnapshotConfig, WaitSignal};
use tracing::info;

use super::{ChannelFlags, mirror_skeleton, wait_for_attach};

/// Capture the live pose into a snapshot file.
pub fn run(
    process_name: &str,
    map_path: &Path,
    signal: &Arc<WaitSignal>,
    out: &Path,
    channels: ChannelFlags,
    bones: Option<Vec<String>>,
) -> Result<()> {
    let Some(port) = wait_for_attach(process_name, signal)? else {
        return Ok(());
    };
    let mut skeleton = mirror_skeleton(map_path, &port)?;

    let config = SnapshotConfig {
        include_position: channels.positions,
        include_rotation: channels.rotations,
        include_scale: channels.scales,
        selected_bones_only: bones.is_some(),
    };
    if let Some(names) = &bones {
        skeleton.select(names.iter().map(String::as_str));
    }

    let engine = PoseEngine::new(Arc::new(EditFlags::new()), Arc::clone(signal));
    let snapshot = engine.capture(&mut skeleton, &port, &config)?;
    snapshot.save(out)?;

    info!(
        "{} {} bones -> {}",
        "captured".green(),
        snapshot.bones.len(),
        out.display()
    );
    Ok(())
}
