pub mod apply;
pub mod capture;
pub mod watch;

use std::path::Path;

use anyhow::{Result, bail};
use repose_core::{
    AccessError, Error, MemoryPort, ProcessMemory, ProcessProvider, Skeleton, SkeletonMap,
    WaitSignal, timing,
};
use tracing::info;

/// Which transform channels a command touches.
#[derive(Debug, Clone, Copy)]
pub struct ChannelFlags {
    pub positions: bool,
    pub rotations: bool,
    pub scales: bool,
}

/// Attach to the target process, retrying until it appears or the signal
/// trips. Returns `None` on shutdown.
pub fn wait_for_attach(process_name: &str, signal: &WaitSignal) -> Result<Option<MemoryPort>> {
    let provider = ProcessProvider::new(process_name);
    let mut announced = false;

    loop {
        if signal.is_triggered() {
            return Ok(None);
        }

        match provider.attach() {
            Ok(port) => return Ok(Some(port)),
            Err(Error::Access(AccessError::Unsupported)) => {
                bail!("process attachment is not supported on this platform");
            }
            Err(_) => {
                if !announced {
                    info!("waiting for {} ...", process_name);
                    announced = true;
                }
            }
        }

        if signal.wait(timing::ATTACH_RETRY_DELAY) {
            return Ok(None);
        }
    }
}

/// Load the layout map and mirror the skeleton against the attachment.
pub fn mirror_skeleton(map_path: &Path, port: &MemoryPort) -> Result<Skeleton> {
    let map = SkeletonMap::load(map_path)?;
    let skeleton = Skeleton::mirror(&map, port.base_address())?;
    info!(
        "mirrored {} bones (map version {})",
        skeleton.len(),
        map.version
    );
    Ok(skeleton)
}
