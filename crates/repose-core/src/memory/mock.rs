//! Mock target process for unit and integration tests.
//!
//! Backs the [`ProcessMemory`] trait with an in-memory region map so the
//! resolver, cells, sync loop and pose engine can be exercised without a
//! live attachment. Supports planting pointers for chain tests, denying
//! address ranges, simulating process exit, and logging every write for
//! ordering assertions.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::AccessError;
use crate::memory::port::ProcessMemory;

#[derive(Default)]
pub struct MockProcessBuilder {
    regions: BTreeMap<u64, Vec<u8>>,
    base_address: u64,
}

impl MockProcessBuilder {
    /// Map a zero-initialized readable/writable region.
    pub fn region(mut self, base: u64, len: usize) -> Self {
        self.regions.insert(base, vec![0u8; len]);
        self
    }

    /// Main-module base address reported by the mock.
    pub fn base_address(mut self, base: u64) -> Self {
        self.base_address = base;
        self
    }

    pub fn build(self) -> MockProcess {
        MockProcess {
            regions: Mutex::new(self.regions),
            denied: Mutex::new(Vec::new()),
            write_log: Mutex::new(Vec::new()),
            exited: AtomicBool::new(false),
            base_address: self.base_address,
        }
    }
}

pub struct MockProcess {
    regions: Mutex<BTreeMap<u64, Vec<u8>>>,
    denied: Mutex<Vec<(u64, u64)>>,
    write_log: Mutex<Vec<(u64, Vec<u8>)>>,
    exited: AtomicBool,
    base_address: u64,
}

impl MockProcess {
    pub fn builder() -> MockProcessBuilder {
        MockProcessBuilder::default()
    }

    /// Store raw bytes without logging, for test setup.
    pub fn poke(&self, address: u64, bytes: &[u8]) {
        self.copy_in(address, bytes)
            .expect("poke outside mapped mock region");
    }

    /// Read raw bytes back, bypassing the access checks.
    pub fn peek(&self, address: u64, len: usize) -> Vec<u8> {
        let regions = self.regions.lock().unwrap();
        let (base, data) = Self::region_for(&regions, address, len)
            .expect("peek outside mapped mock region");
        let start = (address - base) as usize;
        data[start..start + len].to_vec()
    }

    /// Plant a little-endian pointer value, for chain tests.
    pub fn plant_pointer(&self, address: u64, value: u64) {
        self.poke(address, &value.to_le_bytes());
    }

    pub fn plant_f32(&self, address: u64, value: f32) {
        self.poke(address, &value.to_le_bytes());
    }

    /// Reject any access touching `[start, end)`.
    pub fn deny_range(&self, start: u64, end: u64) {
        self.denied.lock().unwrap().push((start, end));
    }

    /// Pretend the target process exited; all further calls fail.
    pub fn simulate_exit(&self) {
        self.exited.store(true, Ordering::Release);
    }

    /// Every write performed through the port, in order.
    pub fn writes(&self) -> Vec<(u64, Vec<u8>)> {
        self.write_log.lock().unwrap().clone()
    }

    pub fn clear_writes(&self) {
        self.write_log.lock().unwrap().clear();
    }

    fn region_for<'a>(
        regions: &'a BTreeMap<u64, Vec<u8>>,
        address: u64,
        len: usize,
    ) -> Option<(u64, &'a Vec<u8>)> {
        let (base, data) = regions.range(..=address).next_back()?;
        let end = base + data.len() as u64;
        if address + len as u64 <= end {
            Some((*base, data))
        } else {
            None
        }
    }

    fn copy_in(&self, address: u64, bytes: &[u8]) -> Result<(), AccessError> {
        let mut regions = self.regions.lock().unwrap();
        let (base, data) = regions
            .range_mut(..=address)
            .next_back()
            .filter(|(base, data)| address + bytes.len() as u64 <= *base + data.len() as u64)
            .map(|(base, data)| (*base, data))
            .ok_or(AccessError::Denied {
                address,
                len: bytes.len(),
                message: "unmapped".to_string(),
            })?;
        let start = (address - base) as usize;
        data[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn check_access(&self, address: u64, len: usize) -> Result<(), AccessError> {
        if self.exited.load(Ordering::Acquire) {
            return Err(AccessError::ProcessExited);
        }
        let end = address + len as u64;
        for (start, stop) in self.denied.lock().unwrap().iter() {
            if address < *stop && end > *start {
                return Err(AccessError::Denied {
                    address,
                    len,
                    message: "denied".to_string(),
                });
            }
        }
        Ok(())
    }
}

impl ProcessMemory for MockProcess {
    fn read_bytes(&self, address: u64, buf: &mut [u8]) -> Result<(), AccessError> {
        self.check_access(address, buf.len())?;

        let regions = self.regions.lock().unwrap();
        let (base, data) =
            Self::region_for(&regions, address, buf.len()).ok_or(AccessError::Denied {
                address,
                len: buf.len(),
                message: "unmapped".to_string(),
            })?;
        let start = (address - base) as usize;
        buf.copy_from_slice(&data[start..start + buf.len()]);
        Ok(())
    }

    fn write_bytes(&self, address: u64, bytes: &[u8]) -> Result<(), AccessError> {
        self.check_access(address, bytes.len())?;
        self.copy_in(address, bytes)?;
        self.write_log
            .lock()
            .unwrap()
            .push((address, bytes.to_vec()));
        Ok(())
    }

    fn base_address(&self) -> u64 {
        self.base_address
    }

    fn is_open(&self) -> bool {
        !self.exited.load(Ordering::Acquire)
    }
}
