/*!
 * Process Context
 *
 * The library's cached identity word. It lives in the environment's own
 * memory, so a child starts out with a verbatim copy of its parent's value
 * and must refresh it before trusting it. Code that can run before that
 * refresh (the fault handler in particular) asks the kernel instead.
 */

use crate::core::config::Layout;
use crate::core::errors::{ForkResult, SyscallContext};
use crate::core::types::{Pid, VirtAddr};
use crate::memory::{Kernel, PteFlags};
use tracing::debug;

/// Per-environment view of the identity cache
pub struct ProcessContext<'k, K: ?Sized> {
    kernel: &'k K,
    slot: VirtAddr,
    identity_page: VirtAddr,
}

impl<'k, K: Kernel + ?Sized> ProcessContext<'k, K> {
    pub fn new(kernel: &'k K, layout: &Layout) -> Self {
        Self {
            kernel,
            slot: layout.identity_slot,
            identity_page: layout.identity_page(),
        }
    }

    /// Library start-up: make sure the slot is backed, then fill it
    pub fn init(&self) -> ForkResult<Pid> {
        if self.kernel.page_perm(self.identity_page).is_none() {
            let me = self.kernel.getenvid();
            self.kernel
                .page_alloc(me, self.identity_page, PteFlags::USER_RW)
                .op("page_alloc(identity)")?;
        }
        self.refresh()
    }

    /// Cached identity, possibly stale in a child that has not refreshed
    pub fn this_env(&self) -> ForkResult<Pid> {
        self.kernel.read_u32(self.slot).op("read(identity)")
    }

    /// Refresh the cache if this environment keeps one
    pub fn fix_up(&self) -> ForkResult<Option<Pid>> {
        if self.kernel.page_perm(self.identity_page).is_none() {
            return Ok(None);
        }
        self.refresh().map(Some)
    }

    /// Overwrite the cache with the kernel's answer
    pub fn refresh(&self) -> ForkResult<Pid> {
        let me = self.kernel.getenvid();
        self.kernel.write_u32(self.slot, me).op("write(identity)")?;
        debug!(pid = me, slot = self.slot, "identity cache refreshed");
        Ok(me)
    }
}
