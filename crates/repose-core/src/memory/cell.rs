//! Typed memory cells.
//!
//! A cell binds a semantic value type to an offset chain inside the target
//! process. Cells are lightweight descriptors: they own no OS resource and
//! re-resolve their chain on every access, since the target may relocate
//! the underlying structure between accesses. The value vocabulary is the
//! closed set of [`CellValue`] implementations, dispatched through one
//! read/write/dirty surface rather than runtime reflection.

use crate::error::AccessError;
use crate::math::{Quat, Vec3};
use crate::memory::chain::OffsetChain;
use crate::memory::port::ProcessMemory;

/// A value with a fixed little-endian binary footprint in target memory.
///
/// `bits_eq` is the change-detection comparison and must be exact: float
/// components compare bit patterns, never epsilon, so an externally
/// rewritten value is always observed as changed.
pub trait CellValue: Clone + Send + 'static {
    /// Exact binary footprint in bytes.
    const SIZE: usize;

    fn decode(bytes: &[u8]) -> Result<Self, AccessError>;

    /// Encode into exactly [`Self::SIZE`] bytes.
    fn encode(&self, out: &mut Vec<u8>);

    fn bits_eq(&self, other: &Self) -> bool;
}

impl CellValue for u8 {
    const SIZE: usize = 1;

    fn decode(bytes: &[u8]) -> Result<Self, AccessError> {
        Ok(bytes[0])
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.push(*self);
    }

    fn bits_eq(&self, other: &Self) -> bool {
        self == other
    }
}

impl CellValue for i32 {
    const SIZE: usize = 4;

    fn decode(bytes: &[u8]) -> Result<Self, AccessError> {
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }

    fn bits_eq(&self, other: &Self) -> bool {
        self == other
    }
}

impl CellValue for f32 {
    const SIZE: usize = 4;

    fn decode(bytes: &[u8]) -> Result<Self, AccessError> {
        Ok(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }

    fn bits_eq(&self, other: &Self) -> bool {
        self.to_bits() == other.to_bits()
    }
}

impl CellValue for Vec3 {
    const SIZE: usize = 12;

    fn decode(bytes: &[u8]) -> Result<Self, AccessError> {
        Ok(Vec3::new(
            f32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            f32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            f32::from_le_bytes(bytes[8..12].try_into().unwrap()),
        ))
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.x.to_le_bytes());
        out.extend_from_slice(&self.y.to_le_bytes());
        out.extend_from_slice(&self.z.to_le_bytes());
    }

    fn bits_eq(&self, other: &Self) -> bool {
        self.to_bits() == other.to_bits()
    }
}

impl CellValue for Quat {
    const SIZE: usize = 16;

    fn decode(bytes: &[u8]) -> Result<Self, AccessError> {
        Ok(Quat::new(
            f32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            f32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            f32::from_le_bytes(bytes[8..12].try_into().unwrap()),
            f32::from_le_bytes(bytes[12..16].try_into().unwrap()),
        ))
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.x.to_le_bytes());
        out.extend_from_slice(&self.y.to_le_bytes());
        out.extend_from_slice(&self.z.to_le_bytes());
        out.extend_from_slice(&self.w.to_le_bytes());
    }

    fn bits_eq(&self, other: &Self) -> bool {
        self.to_bits() == other.to_bits()
    }
}

/// NUL-padded UTF-8 string in a fixed N-byte field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedStr<const N: usize>(pub String);

impl<const N: usize> CellValue for FixedStr<N> {
    const SIZE: usize = N;

    fn decode(bytes: &[u8]) -> Result<Self, AccessError> {
        let len = memchr::memchr(0, bytes).unwrap_or(bytes.len());
        let text = std::str::from_utf8(&bytes[..len])
            .map_err(|e| AccessError::Decode(format!("invalid UTF-8 in string field: {e}")))?;
        Ok(Self(text.to_string()))
    }

    fn encode(&self, out: &mut Vec<u8>) {
        let raw = self.0.as_bytes();
        // Values longer than the field truncate at the field width.
        let take = raw.len().min(N);
        out.extend_from_slice(&raw[..take]);
        out.resize(out.len() + (N - take), 0);
    }

    fn bits_eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

/// A typed, re-resolvable binding between an offset chain and a value in
/// the target process.
#[derive(Debug, Clone)]
pub struct MemoryCell<T: CellValue> {
    chain: OffsetChain,
    last_known: Option<T>,
    dirty: bool,
}

impl<T: CellValue> MemoryCell<T> {
    pub fn new(chain: OffsetChain) -> Self {
        Self {
            chain,
            last_known: None,
            dirty: false,
        }
    }

    pub fn chain(&self) -> &OffsetChain {
        &self.chain
    }

    /// Last value observed by a read or recorded by a write, if any.
    pub fn last_known(&self) -> Option<&T> {
        self.last_known.as_ref()
    }

    /// True when the most recent read observed a value different (bitwise)
    /// from the one before it. An optimization signal for consumers, not a
    /// correctness gate.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Resolve, fetch and decode the live value.
    pub fn read<P: ProcessMemory + ?Sized>(
        &mut self,
        port: &P,
        base: u64,
    ) -> Result<T, AccessError> {
        let address = self.chain.resolve(port, base)?;
        let mut buf = vec![0u8; T::SIZE];
        port.read_bytes(address, &mut buf)?;
        let value = T::decode(&buf)?;

        self.dirty = match &self.last_known {
            Some(previous) => !previous.bits_eq(&value),
            None => true,
        };
        self.last_known = Some(value.clone());
        Ok(value)
    }

    /// Resolve, encode and write `value` into the target.
    ///
    /// Does not verify the target accepted the write; callers needing
    /// confirmation must read back explicitly.
    pub fn write<P: ProcessMemory + ?Sized>(
        &mut self,
        port: &P,
        base: u64,
        value: T,
    ) -> Result<(), AccessError> {
        let address = self.chain.resolve(port, base)?;

        let mut bytes = Vec::with_capacity(T::SIZE);
        value.encode(&mut bytes);
        if bytes.len() != T::SIZE {
            return Err(AccessError::Encode(format!(
                "encoded {} bytes for a {}-byte field",
                bytes.len(),
                T::SIZE
            )));
        }

        port.write_bytes(address, &bytes)?;
        self.last_known = Some(value);
        self.dirty = false;
        Ok(())
    }

    /// Re-write the held value into the target, used by the sync loop to
    /// pin a frozen channel against the foreign update cycle.
    pub fn rewrite_last<P: ProcessMemory + ?Sized>(
        &mut self,
        port: &P,
        base: u64,
    ) -> Result<bool, AccessError> {
        match self.last_known.clone() {
            Some(value) => {
                self.write(port, base, value)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
