//! Process access port: the single gateway for raw reads and writes
//! against the attached target process.
//!
//! Everything in the crate funnels byte-level access through one
//! [`MemoryPort`]. The port owns the OS handle lifecycle; once the target
//! is known to be gone every call short-circuits to
//! [`AccessError::ProcessExited`] without attempting another syscall.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::error::AccessError;

/// Byte-level access to a foreign address space.
///
/// Implemented by [`MemoryPort`] for a live attachment and by the mock
/// process used in tests. Typed helpers are provided so callers never
/// hand-roll little-endian decoding.
pub trait ProcessMemory: Send + Sync {
    /// Fill `buf` from `address`. A partial read is an error.
    fn read_bytes(&self, address: u64, buf: &mut [u8]) -> Result<(), AccessError>;

    /// Write `bytes` at `address`. A partial write is an error.
    fn write_bytes(&self, address: u64, bytes: &[u8]) -> Result<(), AccessError>;

    /// Base address of the target's main module.
    fn base_address(&self) -> u64;

    /// False once the attachment is known dead.
    fn is_open(&self) -> bool;

    fn read_u64(&self, address: u64) -> Result<u64, AccessError> {
        let mut buf = [0u8; 8];
        self.read_bytes(address, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn read_i32(&self, address: u64) -> Result<i32, AccessError> {
        let mut buf = [0u8; 4];
        self.read_bytes(address, &mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    fn read_f32(&self, address: u64) -> Result<f32, AccessError> {
        let mut buf = [0u8; 4];
        self.read_bytes(address, &mut buf)?;
        Ok(f32::from_le_bytes(buf))
    }
}

/// An open handle to the target process.
///
/// Process-wide shared state: every cell and the sync loop reach the target
/// through one handle, reference-counted inside [`MemoryPort`]. Only the
/// attachment owner closes it (on drop of the last clone).
#[derive(Debug)]
pub struct ProcessHandle {
    pid: u32,
    base_address: u64,
    exited: AtomicBool,
    #[cfg(target_os = "windows")]
    raw: windows::Win32::Foundation::HANDLE,
}

// SAFETY: the raw HANDLE is only ever passed to thread-safe Win32 memory
// APIs; the handle value itself is an opaque kernel object reference.
#[cfg(target_os = "windows")]
unsafe impl Send for ProcessHandle {}
#[cfg(target_os = "windows")]
unsafe impl Sync for ProcessHandle {}

impl ProcessHandle {
    #[cfg(target_os = "windows")]
    pub(crate) fn new(
        pid: u32,
        base_address: u64,
        raw: windows::Win32::Foundation::HANDLE,
    ) -> Self {
        Self {
            pid,
            base_address,
            exited: AtomicBool::new(false),
            raw,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn base_address(&self) -> u64 {
        self.base_address
    }

    /// True once the target process is known to have exited.
    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }

    /// Latch the attachment as lost. All subsequent port calls fail with
    /// [`AccessError::ProcessExited`] without touching the stale handle.
    pub fn mark_exited(&self) {
        if !self.exited.swap(true, Ordering::AcqRel) {
            debug!("process {} marked as exited", self.pid);
        }
    }

    /// Ask the OS whether the target is still running; latches `exited`
    /// when it is not.
    #[cfg(target_os = "windows")]
    pub fn still_running(&self) -> bool {
        use windows::Win32::Foundation::STILL_ACTIVE;
        use windows::Win32::System::Threading::GetExitCodeProcess;

        if self.has_exited() {
            return false;
        }

        let mut code: u32 = 0;
        // SAFETY: raw is a live process handle opened with query rights;
        // GetExitCodeProcess writes the exit code into a stack local.
        let alive = unsafe { GetExitCodeProcess(self.raw, &mut code) }
            .map(|_| code == STILL_ACTIVE.0 as u32)
            .unwrap_or(false);

        if !alive {
            self.mark_exited();
        }
        alive
    }

    #[cfg(not(target_os = "windows"))]
    pub fn still_running(&self) -> bool {
        !self.has_exited()
    }
}

#[cfg(target_os = "windows")]
impl Drop for ProcessHandle {
    fn drop(&mut self) {
        use windows::Win32::Foundation::CloseHandle;
        // SAFETY: raw was opened by this handle's constructor and is closed
        // exactly once, here.
        let _ = unsafe { CloseHandle(self.raw) };
    }
}

/// Shared gateway performing the actual inter-process reads and writes.
///
/// Cheap to clone; all clones share one [`ProcessHandle`].
#[derive(Debug, Clone)]
pub struct MemoryPort {
    handle: Arc<ProcessHandle>,
}

impl MemoryPort {
    pub fn new(handle: ProcessHandle) -> Self {
        Self {
            handle: Arc::new(handle),
        }
    }

    pub fn handle(&self) -> &ProcessHandle {
        &self.handle
    }

    /// Classify a failed syscall: if the target is gone, latch and report
    /// [`AccessError::ProcessExited`]; otherwise surface the OS error.
    #[cfg(target_os = "windows")]
    fn classify_failure(&self, address: u64, len: usize, message: String) -> AccessError {
        if !self.handle.still_running() {
            AccessError::ProcessExited
        } else {
            AccessError::Denied {
                address,
                len,
                message,
            }
        }
    }
}

#[cfg(target_os = "windows")]
impl ProcessMemory for MemoryPort {
    fn read_bytes(&self, address: u64, buf: &mut [u8]) -> Result<(), AccessError> {
        use windows::Win32::System::Diagnostics::Debug::ReadProcessMemory;

        if self.handle.has_exited() {
            return Err(AccessError::ProcessExited);
        }

        let mut read: usize = 0;
        // SAFETY: the destination is a live &mut [u8] of exactly buf.len()
        // bytes; ReadProcessMemory copies at most that many bytes into it.
        let result = unsafe {
            ReadProcessMemory(
                self.handle.raw,
                address as *const core::ffi::c_void,
                buf.as_mut_ptr().cast(),
                buf.len(),
                Some(&mut read as *mut usize),
            )
        };

        match result {
            Ok(()) if read == buf.len() => Ok(()),
            Ok(()) => Err(AccessError::ShortRead {
                address,
                wanted: buf.len(),
                got: read,
            }),
            Err(e) => Err(self.classify_failure(address, buf.len(), e.message())),
        }
    }

    fn write_bytes(&self, address: u64, bytes: &[u8]) -> Result<(), AccessError> {
        use windows::Win32::System::Diagnostics::Debug::WriteProcessMemory;

        if self.handle.has_exited() {
            return Err(AccessError::ProcessExited);
        }

        let mut written: usize = 0;
        // SAFETY: the source is a live &[u8]; WriteProcessMemory copies
        // bytes.len() bytes out of it into the target process.
        let result = unsafe {
            WriteProcessMemory(
                self.handle.raw,
                address as *const core::ffi::c_void,
                bytes.as_ptr().cast(),
                bytes.len(),
                Some(&mut written as *mut usize),
            )
        };

        match result {
            Ok(()) if written == bytes.len() => Ok(()),
            Ok(()) => Err(AccessError::ShortRead {
                address,
                wanted: bytes.len(),
                got: written,
            }),
            Err(e) => Err(self.classify_failure(address, bytes.len(), e.message())),
        }
    }

    fn base_address(&self) -> u64 {
        self.handle.base_address
    }

    fn is_open(&self) -> bool {
        !self.handle.has_exited()
    }
}

#[cfg(not(target_os = "windows"))]
impl ProcessMemory for MemoryPort {
    fn read_bytes(&self, _address: u64, _buf: &mut [u8]) -> Result<(), AccessError> {
        Err(AccessError::Unsupported)
    }

    fn write_bytes(&self, _address: u64, _bytes: &[u8]) -> Result<(), AccessError> {
        Err(AccessError::Unsupported)
    }

    fn base_address(&self) -> u64 {
        self.handle.base_address
    }

    fn is_open(&self) -> bool {
        !self.handle.has_exited()
    }
}
