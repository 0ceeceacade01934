/*!
 * Copy-on-Write Fault Handler
 *
 * Repairs one copy-on-write page into a private writable page. Runs
 * synchronously on the exception stack of the faulting environment.
 */

use super::fatal;
use crate::core::config::Layout;
use crate::core::errors::{ForkError, ForkResult, SyscallContext};
use crate::core::limits::PGSIZE;
use crate::core::types::{round_down, VirtAddr};
use crate::memory::{FaultCode, Kernel, PteFlags, UTrapframe, UpcallEntry};
use std::sync::Arc;
use tracing::debug;

/// Page-fault handler for copy-on-write pages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFaultHandler {
    scratch: VirtAddr,
}

impl PageFaultHandler {
    pub fn new(layout: &Layout) -> Self {
        Self {
            scratch: layout.scratch,
        }
    }

    /// Scratch page the fresh copy is staged at
    pub fn scratch(&self) -> VirtAddr {
        self.scratch
    }

    /// Privatize the page behind `utf.fault_va`.
    ///
    /// Fails unless the fault is a write to a page currently marked COW.
    pub fn handle<K: Kernel + ?Sized>(&self, kernel: &K, utf: &UTrapframe) -> ForkResult<()> {
        let va = round_down(utf.fault_va);

        if !utf.err.contains(FaultCode::WRITE) {
            return Err(ForkError::NotWriteFault {
                va: utf.fault_va,
                code: utf.err,
            });
        }
        let perm = kernel.page_perm(va);
        if !perm.is_some_and(|p| p.is_present() && p.is_cow()) {
            return Err(ForkError::NotCopyOnWrite {
                va: utf.fault_va,
                perm,
            });
        }

        // The cached identity may still name the parent right after exofork.
        let me = kernel.getenvid();

        kernel
            .page_alloc(me, self.scratch, PteFlags::USER_RW)
            .op("page_alloc")?;

        let mut page = vec![0u8; PGSIZE];
        kernel.read(va, &mut page).op("copy_in")?;
        kernel.write(self.scratch, &page).op("copy_out")?;

        kernel
            .page_map(me, self.scratch, me, va, PteFlags::USER_RW)
            .op("page_map")?;
        kernel.page_unmap(me, self.scratch).op("page_unmap")?;

        debug!(pid = me, va = va, "privatized copy-on-write page");
        Ok(())
    }

    /// Upcall entry that terminates the environment when repair fails
    pub fn upcall(self) -> UpcallEntry {
        Arc::new(move |kernel: &dyn Kernel, utf: &UTrapframe| {
            if let Err(err) = self.handle(kernel, utf) {
                fatal(kernel, None, &err);
            }
        })
    }
}

impl Default for PageFaultHandler {
    fn default() -> Self {
        Self::new(&Layout::default())
    }
}
