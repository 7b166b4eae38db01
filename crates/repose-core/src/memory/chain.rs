//! Offset chain resolution.
//!
//! A chain is an ordered list of steps walked from a base address. Each
//! step displaces the cursor by a signed byte offset and then, if flagged,
//! dereferences it: reads a pointer-sized little-endian value at the
//! displaced cursor and continues from that value. Resolution either yields
//! the final address or a well-defined failure; it never hands back a
//! partially-applied address and never retries.

use serde::{Deserialize, Serialize};

use crate::error::{AccessError, ResolveError};
use crate::memory::port::ProcessMemory;

/// One link of an offset chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetStep {
    /// Signed byte displacement applied to the cursor first.
    pub displacement: i64,
    /// After displacing, read a pointer at the cursor and continue from it.
    #[serde(default)]
    pub dereference: bool,
}

impl OffsetStep {
    pub fn offset(displacement: i64) -> Self {
        Self {
            displacement,
            dereference: false,
        }
    }

    pub fn deref(displacement: i64) -> Self {
        Self {
            displacement,
            dereference: true,
        }
    }
}

/// Ordered sequence of offset steps from a base address to a target field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OffsetChain {
    steps: Vec<OffsetStep>,
}

impl OffsetChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a plain displacement step.
    pub fn offset(mut self, displacement: i64) -> Self {
        self.steps.push(OffsetStep::offset(displacement));
        self
    }

    /// Append a displace-then-dereference step.
    pub fn deref(mut self, displacement: i64) -> Self {
        self.steps.push(OffsetStep::deref(displacement));
        self
    }

    /// Derive a longer chain, e.g. a per-bone field chain from the
    /// skeleton's transform-array chain.
    pub fn extended(&self, step: OffsetStep) -> Self {
        let mut steps = self.steps.clone();
        steps.push(step);
        Self { steps }
    }

    pub fn steps(&self) -> &[OffsetStep] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Walk the chain from `base` through `port`.
    ///
    /// Fails with [`ResolveError::NullPointer`] on a zero pointer and
    /// [`ResolveError::UnmappedAddress`] when an intermediate read is
    /// rejected. [`AccessError::ProcessExited`] passes through untouched so
    /// callers can tell a dead attachment from a relocated structure.
    pub fn resolve<P: ProcessMemory + ?Sized>(
        &self,
        port: &P,
        base: u64,
    ) -> Result<u64, AccessError> {
        let mut cursor = base;

        for (step_idx, step) in self.steps.iter().enumerate() {
            cursor = cursor.wrapping_add_signed(step.displacement);

            if step.dereference {
                let pointer = match port.read_u64(cursor) {
                    Ok(v) => v,
                    Err(AccessError::ProcessExited) => return Err(AccessError::ProcessExited),
                    Err(_) => {
                        return Err(ResolveError::UnmappedAddress {
                            address: cursor,
                            step: step_idx,
                        }
                        .into());
                    }
                };

                if pointer == 0 {
                    return Err(ResolveError::NullPointer { step: step_idx }.into());
                }

                cursor = pointer;
            }
        }

        Ok(cursor)
    }
}

impl From<Vec<OffsetStep>> for OffsetChain {
    fn from(steps: Vec<OffsetStep>) -> Self {
        Self { steps }
    }
}
