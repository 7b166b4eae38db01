//! # repose-core
//!
//! Core library for the Repose live pose editor.
//!
//! This crate provides:
//! - Offset chain resolution inside an attached game process
//! - Typed memory cells with change detection
//! - The process access port owning the attachment lifecycle
//! - A background sync loop coordinated with pose edits via freeze flags
//! - The skeleton mirror and the pose capture/apply engine
//!
//! Structure offsets are never hard-coded: each supported game build is
//! described by a [`config::SkeletonMap`] loaded from JSON.

pub mod config;
pub mod error;
pub mod math;
pub mod memory;
pub mod pose;
pub mod skeleton;
pub mod sync;
pub mod timing;

pub use config::{BoneDef, SkeletonMap};
pub use error::{AccessError, Error, HierarchyError, ResolveError, Result};
pub use math::{Quat, Transform, Vec3};
pub use memory::{
    CellValue, FixedStr, MemoryCell, MemoryPort, OffsetChain, OffsetStep, ProcessHandle,
    ProcessInfo, ProcessMemory, ProcessProvider,
};
pub use pose::{
    ApplyOptions, ApplyReport, Channel, EditFlags, PoseEngine, PoseSnapshot, SavedBone,
    SnapshotConfig,
};
pub use skeleton::{Bone, Skeleton};
pub use sync::{ChangeCallback, SyncLoop, SyncLoopHandle, WaitSignal};

// Mock target process (requires no live attachment; used by tests).
#[doc(hidden)]
pub use memory::{MockProcess, MockProcessBuilder};
