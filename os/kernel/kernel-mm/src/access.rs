//! Access rights and region flag bits.

use bitfield_struct::bitfield;

/// Access rights of a mapping.
#[bitfield(u8, order = Lsb)]
#[derive(Eq, PartialEq)]
pub struct Access {
    pub readable: bool,
    pub writable: bool,
    pub executable: bool,
    #[bits(5, default = 0)]
    _reserved_3_7: u8,
}

impl Access {
    pub const NONE: Self = Self::new();
    pub const READ: Self = Self::new().with_readable(true);
    pub const READ_WRITE: Self = Self::READ.with_writable(true);
    pub const READ_EXECUTE: Self = Self::READ.with_executable(true);

    /// The same rights with write access removed.
    #[must_use]
    pub const fn without_write(self) -> Self {
        self.with_writable(false)
    }
}

/// Role markers of a region.
#[bitfield(u8, order = Lsb)]
#[derive(Eq, PartialEq)]
pub struct RegionFlags {
    /// Backs a thread stack.
    pub stack: bool,
    /// Created through an mmap-style request.
    pub mmap: bool,
    /// Entering the kernel from code in this region is permitted.
    pub syscall: bool,
    #[bits(5, default = 0)]
    _reserved_3_7: u8,
}
