pub mod cell;
pub mod chain;
mod port;
mod provider;

// Mock target process for testing (always available so unit and
// integration tests can share it).
#[doc(hidden)]
pub mod mock;

pub use cell::{CellValue, FixedStr, MemoryCell};
pub use chain::{OffsetChain, OffsetStep};
pub use port::{MemoryPort, ProcessHandle, ProcessMemory};
pub use provider::{ProcessInfo, ProcessProvider};

#[doc(hidden)]
pub use mock::{MockProcess, MockProcessBuilder};
