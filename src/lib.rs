/*!
 * Copy-on-Write Fork Library
 *
 * User-space process duplication built on exokernel primitives: page
 * allocation, cross-environment mapping, blank-child creation and
 * page-fault upcalls. Ships with an in-memory machine for tests.
 */

pub mod core;
pub mod fork;
pub mod memory;
pub mod monitoring;
pub mod sim;

// Re-exports
pub use crate::core::{ForkConfig, ForkError, ForkPolicy, ForkResult, Layout, Pid, SyscallError, SyscallResult, VirtAddr};
pub use fork::{fork, sfork, ForkOutcome, ForkReport, Forker, PageFaultHandler, ProcessContext};
pub use memory::{EnvStatus, ExoFork, FaultCode, Kernel, PteFlags, Syscalls, UTrapframe, UserMemory};
pub use monitoring::init_tracing;
pub use sim::{Machine, MachineConfig, SimProcess, Violation};
