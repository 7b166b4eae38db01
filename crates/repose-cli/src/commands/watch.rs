//! Live transform monitor.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use owo_colors::OwoColorize;
use repose_core::{EditFlags, ProcessMemory, SyncLoop, WaitSignal, timing};
use tracing::info;

use super::{mirror_skeleton, wait_for_attach};

/// Attach, mirror the skeleton and print externally-changed bones until
/// interrupted.
pub fn run(process_name: &str, map_path: &Path, signal: &Arc<WaitSignal>) -> Result<()> {
    let Some(port) = wait_for_attach(process_name, signal)? else {
        return Ok(());
    };
    let skeleton = mirror_skeleton(map_path, &port)?;

    let skeleton = Arc::new(Mutex::new(skeleton));
    let flags = Arc::new(EditFlags::new());

    let handle = SyncLoop::spawn(
        Arc::clone(&skeleton),
        Arc::new(port) as Arc<dyn ProcessMemory>,
        flags,
        Arc::clone(signal),
        timing::SYNC_INTERVAL,
        Some(Box::new(|names: &[String]| {
            for name in names {
                println!("  {} {}", "changed".yellow(), name.cyan());
            }
        })),
    );

    info!("watching; press Esc or q to stop");
    while !signal.wait(timing::SYNC_INTERVAL) {
        if handle.is_finished() {
            // The loop only exits on its own when the attachment is lost.
            info!("attachment lost, exiting watch mode");
            break;
        }
    }

    handle.stop();
    Ok(())
}
