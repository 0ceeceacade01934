/*!
 * Kernel Collaborator Traits
 * The narrow interface the fork library consumes from the kernel
 */

use super::perm::{FaultCode, PteFlags};
use crate::core::errors::SyscallResult;
use crate::core::types::{Pid, VirtAddr};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Scheduling status the library may request for an environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvStatus {
    /// Eligible to run
    Runnable,
    /// Exists but is never scheduled
    NotRunnable,
    /// Destroyed; only observable, never requested
    Dead,
}

/// The two continuations of a single child-creation call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExoFork {
    /// Seen by the caller: the new child's identifier
    Parent(Pid),
    /// Seen by the child when it first runs
    Child,
}

/// Fault descriptor handed to the user upcall
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UTrapframe {
    pub fault_va: VirtAddr,
    pub err: FaultCode,
}

/// Entry point the kernel invokes on a page fault, running on the
/// faulting environment's exception stack
pub type UpcallEntry = Arc<dyn Fn(&dyn Kernel, &UTrapframe) + Send + Sync>;

/// Kernel calls available to a user environment.
///
/// Every call is made on behalf of the calling environment; `pid`
/// arguments name the target, which must be the caller or its child.
pub trait Syscalls {
    /// Identity of the caller, answered by the kernel (never cached)
    fn getenvid(&self) -> Pid;

    /// Create a blank, not-runnable child
    fn exofork(&self) -> SyscallResult<ExoFork>;

    /// Allocate a zeroed page and map it at `va` in `pid`
    fn page_alloc(&self, pid: Pid, va: VirtAddr, perm: PteFlags) -> SyscallResult<()>;

    /// Map the page behind `src_va` in `src` at `dst_va` in `dst`
    fn page_map(
        &self,
        src: Pid,
        src_va: VirtAddr,
        dst: Pid,
        dst_va: VirtAddr,
        perm: PteFlags,
    ) -> SyscallResult<()>;

    /// Remove the mapping at `va` in `pid`, if any
    fn page_unmap(&self, pid: Pid, va: VirtAddr) -> SyscallResult<()>;

    /// Register the page-fault upcall of `pid`
    fn env_set_pgfault_upcall(&self, pid: Pid, entry: UpcallEntry) -> SyscallResult<()>;

    /// Change the scheduling status of `pid`
    fn env_set_status(&self, pid: Pid, status: EnvStatus) -> SyscallResult<()>;

    /// Destroy `pid` and release its pages
    fn env_destroy(&self, pid: Pid) -> SyscallResult<()>;

    /// Permission bits of the caller's own mapping at `va`, if present
    fn page_perm(&self, va: VirtAddr) -> Option<PteFlags>;

    /// Whether the caller's page directory has a table covering `va`
    fn dir_present(&self, va: VirtAddr) -> bool;
}

/// Loads and stores against the caller's own address space.
///
/// A store to a page without `WRITABLE` raises a page fault that is
/// delivered to the registered upcall before the store is retried.
pub trait UserMemory {
    fn read(&self, va: VirtAddr, buf: &mut [u8]) -> SyscallResult<()>;

    fn write(&self, va: VirtAddr, data: &[u8]) -> SyscallResult<()>;

    fn read_u32(&self, va: VirtAddr) -> SyscallResult<u32> {
        let mut word = [0u8; 4];
        self.read(va, &mut word)?;
        Ok(u32::from_le_bytes(word))
    }

    fn write_u32(&self, va: VirtAddr, value: u32) -> SyscallResult<()> {
        self.write(va, &value.to_le_bytes())
    }
}

/// Everything a running environment can do
pub trait Kernel: Syscalls + UserMemory {}

/// Implement Kernel for types that implement all required traits
impl<T: ?Sized + Syscalls + UserMemory> Kernel for T {}
