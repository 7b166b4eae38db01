//! Process attachment provider.
//!
//! Finds the target game process by executable name, opens it with memory
//! access rights and resolves its main-module base address. The provider is
//! the only place a [`ProcessHandle`] is created; everything downstream
//! shares it through [`MemoryPort`].

use crate::error::{AccessError, Error, Result};
use crate::memory::port::MemoryPort;

/// A candidate process found during enumeration.
#[derive(Debug, Clone)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
}

/// Locates and opens the target process.
#[derive(Debug, Clone)]
pub struct ProcessProvider {
    process_name: String,
}

impl ProcessProvider {
    pub fn new(process_name: impl Into<String>) -> Self {
        Self {
            process_name: process_name.into(),
        }
    }

    pub fn process_name(&self) -> &str {
        &self.process_name
    }

    /// Enumerate running processes and return the first name match.
    #[cfg(target_os = "windows")]
    pub fn find(&self) -> Result<Option<ProcessInfo>> {
        use windows::Win32::Foundation::CloseHandle;
        use windows::Win32::System::Diagnostics::ToolHelp::{
            CreateToolhelp32Snapshot, PROCESSENTRY32W, Process32FirstW, Process32NextW,
            TH32CS_SNAPPROCESS,
        };

        // SAFETY: a snapshot handle is created and closed in this scope;
        // PROCESSENTRY32W is initialized with its required dwSize.
        unsafe {
            let snapshot = CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0)
                .map_err(|e| access_denied(format!("process snapshot failed: {e}")))?;

            let mut entry = PROCESSENTRY32W {
                dwSize: std::mem::size_of::<PROCESSENTRY32W>() as u32,
                ..Default::default()
            };

            let mut found = None;
            if Process32FirstW(snapshot, &mut entry).is_ok() {
                loop {
                    let name = utf16_until_nul(&entry.szExeFile);
                    if name.eq_ignore_ascii_case(&self.process_name) {
                        found = Some(ProcessInfo {
                            pid: entry.th32ProcessID,
                            name,
                        });
                        break;
                    }
                    if Process32NextW(snapshot, &mut entry).is_err() {
                        break;
                    }
                }
            }

            let _ = CloseHandle(snapshot);
            Ok(found)
        }
    }

    #[cfg(not(target_os = "windows"))]
    pub fn find(&self) -> Result<Option<ProcessInfo>> {
        Err(Error::Access(AccessError::Unsupported))
    }

    /// Open the target with read/write memory rights and resolve its
    /// main-module base.
    #[cfg(target_os = "windows")]
    pub fn attach(&self) -> Result<MemoryPort> {
        use windows::Win32::System::Threading::{
            OpenProcess, PROCESS_QUERY_INFORMATION, PROCESS_VM_OPERATION, PROCESS_VM_READ,
            PROCESS_VM_WRITE,
        };

        use crate::memory::port::ProcessHandle;

        let info = self
            .find()?
            .ok_or_else(|| access_denied(format!("process not found: {}", self.process_name)))?;

        let base_address = module_base(info.pid, &self.process_name)?;

        // SAFETY: OpenProcess returns an owned handle; ownership moves into
        // ProcessHandle, which closes it on drop.
        let raw = unsafe {
            OpenProcess(
                PROCESS_QUERY_INFORMATION | PROCESS_VM_READ | PROCESS_VM_WRITE
                    | PROCESS_VM_OPERATION,
                false,
                info.pid,
            )
        }
        .map_err(|e| access_denied(format!("failed to open process {}: {e}", info.pid)))?;

        tracing::info!(
            "attached to {} (pid {}, base {:#x})",
            info.name,
            info.pid,
            base_address
        );

        Ok(MemoryPort::new(ProcessHandle::new(
            info.pid,
            base_address,
            raw,
        )))
    }

    #[cfg(not(target_os = "windows"))]
    pub fn attach(&self) -> Result<MemoryPort> {
        Err(Error::Access(AccessError::Unsupported))
    }
}

/// Base address of the named module inside `pid`.
#[cfg(target_os = "windows")]
fn module_base(pid: u32, module_name: &str) -> Result<u64> {
    use windows::Win32::Foundation::CloseHandle;
    use windows::Win32::System::Diagnostics::ToolHelp::{
        CreateToolhelp32Snapshot, MODULEENTRY32W, Module32FirstW, Module32NextW,
        TH32CS_SNAPMODULE, TH32CS_SNAPMODULE32,
    };

    // SAFETY: same snapshot discipline as process enumeration above.
    unsafe {
        let snapshot = CreateToolhelp32Snapshot(TH32CS_SNAPMODULE | TH32CS_SNAPMODULE32, pid)
            .map_err(|e| access_denied(format!("module snapshot failed for pid {pid}: {e}")))?;

        let mut entry = MODULEENTRY32W {
            dwSize: std::mem::size_of::<MODULEENTRY32W>() as u32,
            ..Default::default()
        };

        let mut base = None;
        if Module32FirstW(snapshot, &mut entry).is_ok() {
            loop {
                let name = utf16_until_nul(&entry.szModule);
                // The first entry is the executable itself; keep it as a
                // fallback when the name comparison finds nothing.
                if base.is_none() || name.eq_ignore_ascii_case(module_name) {
                    base = Some(entry.modBaseAddr as u64);
                    if name.eq_ignore_ascii_case(module_name) {
                        break;
                    }
                }
                if Module32NextW(snapshot, &mut entry).is_err() {
                    break;
                }
            }
        }

        let _ = CloseHandle(snapshot);
        base.ok_or_else(|| access_denied(format!("no modules visible in pid {pid}")))
    }
}

#[cfg(target_os = "windows")]
fn utf16_until_nul(raw: &[u16]) -> String {
    let len = raw.iter().position(|&c| c == 0).unwrap_or(raw.len());
    String::from_utf16_lossy(&raw[..len])
}

#[cfg(target_os = "windows")]
fn access_denied(message: String) -> Error {
    Error::Access(AccessError::Denied {
        address: 0,
        len: 0,
        message,
    })
}
