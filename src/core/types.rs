/*!
 * Core Types
 * Identifiers and page arithmetic shared by the fork library and the simulator
 */

use super::limits::{PGSHIFT, PGSIZE, PTSHIFT};

/// Environment (process) identifier as handed out by the kernel
pub type Pid = u32;

/// User virtual address
pub type VirtAddr = usize;

/// Virtual page number (`va >> PGSHIFT`)
pub type PageNum = usize;

/// Page number containing `va`
#[inline]
pub const fn pgnum(va: VirtAddr) -> PageNum {
    va >> PGSHIFT
}

/// First address of page `pn`
#[inline]
pub const fn page_addr(pn: PageNum) -> VirtAddr {
    pn << PGSHIFT
}

/// Page-directory index of `va` (one entry covers `PTSIZE` bytes)
#[inline]
pub const fn pdx(va: VirtAddr) -> usize {
    va >> PTSHIFT
}

#[inline]
pub const fn round_down(va: VirtAddr) -> VirtAddr {
    va & !(PGSIZE - 1)
}

#[inline]
pub const fn round_up(va: VirtAddr) -> VirtAddr {
    round_down(va + PGSIZE - 1)
}

#[inline]
pub const fn is_page_aligned(va: VirtAddr) -> bool {
    va & (PGSIZE - 1) == 0
}
