use thiserror::Error;

/// Failure while walking an offset chain.
///
/// Always recoverable: the sync loop skips the cell for one cycle, the
/// apply path surfaces it to the caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("unmapped address {address:#x} at chain step {step}")]
    UnmappedAddress { address: u64, step: usize },

    #[error("null pointer at chain step {step}")]
    NullPointer { step: usize },
}

/// Failure performing a raw or typed access against the target process.
#[derive(Debug, Error)]
pub enum AccessError {
    #[error("target process has exited")]
    ProcessExited,

    #[error("access denied for {len} bytes at {address:#x}: {message}")]
    Denied {
        address: u64,
        len: usize,
        message: String,
    },

    #[error("short read at {address:#x}: wanted {wanted} bytes, got {got}")]
    ShortRead {
        address: u64,
        wanted: usize,
        got: usize,
    },

    #[error("value decode failed: {0}")]
    Decode(String),

    #[error("value encode failed: {0}")]
    Encode(String),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("process attachment is not supported on this platform")]
    Unsupported,
}

impl AccessError {
    /// True when the attachment itself is gone and no further call can succeed.
    pub fn is_attachment_lost(&self) -> bool {
        matches!(self, AccessError::ProcessExited)
    }
}

/// Structural failure while walking the mirrored bone hierarchy.
#[derive(Debug, Error)]
pub enum HierarchyError {
    #[error("no skeleton is bound")]
    NoSkeleton,

    #[error("bone not found: {0}")]
    MissingBone(String),

    #[error("bone \"{bone}\": transform access failed: {source}")]
    Transform {
        bone: String,
        #[source]
        source: AccessError,
    },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Access(#[from] AccessError),

    #[error(transparent)]
    Hierarchy(#[from] HierarchyError),

    #[error("a pose apply is already in progress")]
    ApplyInProgress,

    #[error("invalid skeleton map: {0}")]
    InvalidMap(String),

    #[error("skeleton map version mismatch: expected {expected}, got {actual}")]
    MapVersionMismatch { expected: String, actual: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if this error means the target process is gone.
    pub fn is_attachment_lost(&self) -> bool {
        matches!(self, Error::Access(e) if e.is_attachment_lost())
    }
}
