use kernel_memory_addresses::VirtualRange;

/// Recoverable failures of the memory-management core.
///
/// Exhaustion is expected and propagates to the caller (typically the
/// syscall layer). Broken invariants are not represented here; they panic.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MmError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("invalid range {0}")]
    InvalidRange(VirtualRange),
    #[error("range {0} overlaps an existing region")]
    RangeInUse(VirtualRange),
    #[error("operation not supported by this memory object")]
    NotSupported,
    #[error("address arithmetic overflowed")]
    Overflow,
}
