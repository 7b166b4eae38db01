//! Pose apply command.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use owo_colors::OwoColorize;
use repose_core::{
    ApplyOptions, EditFlags, MemoryPort, PoseEngine, PoseSnapshot, ProcessMemory, SyncLoop,
    WaitSignal, timing,
};
use tracing::{info, warn};

use super::{ChannelFlags, mirror_skeleton, wait_for_attach};

/// Apply a saved snapshot to the live skeleton, with the sync loop running
/// alongside the way it does during interactive editing.
pub fn run(
    process_name: &str,
    map_path: &Path,
    signal: &Arc<WaitSignal>,
    pose_path: &Path,
    channels: ChannelFlags,
    bones: Option<Vec<String>>,
) -> Result<()> {
    let snapshot = PoseSnapshot::load(pose_path)?;
    info!(
        "loaded snapshot: {} bones, captured {}",
        snapshot.bones.len(),
        snapshot.captured_at
    );

    let Some(port) = wait_for_attach(process_name, signal)? else {
        return Ok(());
    };
    let skeleton = mirror_skeleton(map_path, &port)?;

    let port: Arc<MemoryPort> = Arc::new(port);
    let skeleton = Arc::new(Mutex::new(skeleton));
    let flags = Arc::new(EditFlags::new());
    let engine = PoseEngine::new(Arc::clone(&flags), Arc::clone(signal));

    let handle = SyncLoop::spawn(
        Arc::clone(&skeleton),
        Arc::clone(&port) as Arc<dyn ProcessMemory>,
        Arc::clone(&flags),
        Arc::clone(signal),
        timing::SYNC_INTERVAL,
        None,
    );

    let options = ApplyOptions {
        selection: bones.map(|names| names.into_iter().collect()),
        load_positions: channels.positions,
        load_rotations: channels.rotations,
        load_scales: channels.scales,
    };

    let report = {
        let mut skeleton = skeleton.lock().unwrap();
        engine.apply(&mut skeleton, port.as_ref(), &snapshot, &options)?
    };

    for name in &report.missing {
        warn!("snapshot bone \"{}\" is not in the live skeleton", name);
    }
    for name in &report.failed {
        warn!("bone \"{}\" could not be fully applied", name);
    }
    info!(
        "{} {} bones{}",
        "applied".green(),
        report.applied,
        if report.interrupted {
            " (interrupted)"
        } else {
            ""
        }
    );

    handle.stop();
    Ok(())
}
