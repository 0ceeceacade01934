/*!
 * Error Types
 * Centralized error handling with thiserror and miette
 */

use super::types::{Pid, VirtAddr};
use crate::memory::{FaultCode, PteFlags};
use miette::Diagnostic;
use thiserror::Error;

/// Result of a single collaborator call
pub type SyscallResult<T> = Result<T, SyscallError>;

/// Result of a fork-library operation
pub type ForkResult<T> = Result<T, ForkError>;

/// Errors reported by the kernel collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
pub enum SyscallError {
    #[error("bad environment 0x{0:x}")]
    #[diagnostic(
        code(syscall::bad_env),
        help("The environment does not exist or has already been destroyed.")
    )]
    BadEnv(Pid),

    #[error("environment 0x{0:x} is neither the caller nor its child")]
    #[diagnostic(code(syscall::not_permitted))]
    NotPermitted(Pid),

    #[error("invalid argument: {0}")]
    #[diagnostic(code(syscall::invalid))]
    Invalid(String),

    #[error("out of physical memory")]
    #[diagnostic(
        code(syscall::no_mem),
        help("No free physical page is left. Tear down unused environments.")
    )]
    NoMem,

    #[error("no free environment slot")]
    #[diagnostic(code(syscall::no_free_env))]
    NoFreeEnv,

    #[error("unrecoverable fault at 0x{va:x}")]
    #[diagnostic(
        code(syscall::fault),
        help("The access faulted and the fault upcall could not repair it.")
    )]
    Fault { va: VirtAddr },
}

/// Errors raised by fork and the copy-on-write fault handler.
///
/// All of them are fatal for the process that hits them.
#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
pub enum ForkError {
    #[error("{op} failed: {source}")]
    #[diagnostic(
        code(fork::syscall),
        help("A kernel call made while duplicating or repairing the address space failed.")
    )]
    Syscall {
        op: &'static str,
        #[source]
        source: SyscallError,
    },

    #[error("page fault at 0x{va:x} was not caused by a write (code {code:?})")]
    #[diagnostic(
        code(fork::not_write_fault),
        help("Only writes to copy-on-write pages are repaired; this is a genuine memory error.")
    )]
    NotWriteFault { va: VirtAddr, code: FaultCode },

    #[error("write fault at 0x{va:x} hit a page that is not copy-on-write ({perm:?})")]
    #[diagnostic(
        code(fork::not_copy_on_write),
        help("The page was never shared by fork; the write is illegal.")
    )]
    NotCopyOnWrite {
        va: VirtAddr,
        perm: Option<PteFlags>,
    },

    #[error("invalid configuration: {0}")]
    #[diagnostic(code(fork::invalid_config))]
    InvalidConfig(String),
}

impl ForkError {
    /// Name of the collaborator call that failed, if any
    pub fn failed_op(&self) -> Option<&'static str> {
        match self {
            ForkError::Syscall { op, .. } => Some(op),
            _ => None,
        }
    }
}

/// Attach the name of the failing operation to a collaborator error
pub trait SyscallContext<T> {
    fn op(self, op: &'static str) -> ForkResult<T>;
}

impl<T> SyscallContext<T> for SyscallResult<T> {
    #[inline]
    fn op(self, op: &'static str) -> ForkResult<T> {
        self.map_err(|source| ForkError::Syscall { op, source })
    }
}
