/*!
 * Page Permissions
 * Page-table entry bits and the copy-on-write downgrade rule
 */

use bitflags::bitflags;

bitflags! {
    /// Low bits of a page-table entry.
    ///
    /// `COW` is one of the `AVAIL` bits: the hardware ignores it and the
    /// kernel carries it verbatim, so the meaning belongs to the library.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PteFlags: u32 {
        const PRESENT = 0x001;
        const WRITABLE = 0x002;
        const USER = 0x004;
        const WRITE_THROUGH = 0x008;
        const CACHE_DISABLE = 0x010;
        const ACCESSED = 0x020;
        const DIRTY = 0x040;
        const HUGE = 0x080;
        const GLOBAL = 0x100;

        /// Bits reserved for user-level policy
        const AVAIL = 0xE00;
        /// Copy-on-write marker
        const COW = 0x800;

        /// Bits a user environment may pass to the page syscalls
        const SYSCALL = Self::AVAIL.bits()
            | Self::PRESENT.bits()
            | Self::WRITABLE.bits()
            | Self::USER.bits();
    }
}

bitflags! {
    /// Error code pushed with a page fault
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FaultCode: u32 {
        /// Protection violation on a present page (clear: page not present)
        const PRESENT = 0x1;
        /// Faulting access was a write
        const WRITE = 0x2;
        /// Fault happened in user mode
        const USER = 0x4;
    }
}

impl PteFlags {
    /// Present, user-accessible, read-only
    pub const USER_RO: PteFlags = PteFlags::PRESENT.union(PteFlags::USER);

    /// Present, user-accessible, writable
    pub const USER_RW: PteFlags = PteFlags::USER_RO.union(PteFlags::WRITABLE);

    #[inline]
    pub fn is_present(self) -> bool {
        self.contains(PteFlags::PRESENT)
    }

    #[inline]
    pub fn is_writable(self) -> bool {
        self.contains(PteFlags::WRITABLE)
    }

    #[inline]
    pub fn is_cow(self) -> bool {
        self.contains(PteFlags::COW)
    }

    /// Permission both sides get when a page is duplicated copy-on-write.
    ///
    /// Writable or already-COW pages lose `WRITABLE` and gain `COW`; anything
    /// else is carried unchanged. The result is clipped to `SYSCALL`.
    pub fn cow_downgrade(self) -> PteFlags {
        let perm = if self.is_writable() || self.is_cow() {
            (self - PteFlags::WRITABLE) | PteFlags::COW
        } else {
            self
        };
        perm & PteFlags::SYSCALL
    }

    /// Permission for a page shared writable between parent and child
    pub fn shared_writable(self) -> PteFlags {
        (self - PteFlags::COW) & PteFlags::SYSCALL
    }
}
