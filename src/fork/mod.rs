/*!
 * Fork Module
 * Copy-on-write process duplication and the fault handler that backs it
 */

pub mod context;
pub mod duppage;
pub mod fault;
pub mod orchestrator;
pub mod shared;

// Re-export for convenience
pub use context::ProcessContext;
pub use duppage::{DupKind, PageDuplicator};
pub use fault::PageFaultHandler;
pub use orchestrator::{fork, ForkOutcome, ForkReport, Forker};
pub use shared::{is_private, sfork};

use crate::core::errors::ForkError;
use crate::core::types::Pid;
use crate::memory::Syscalls;
use tracing::{error, warn};

/// Terminate the calling environment after an unrecoverable error,
/// destroying `child` first if one was being built
pub(crate) fn fatal<K: Syscalls + ?Sized>(kernel: &K, child: Option<Pid>, err: &ForkError) {
    let me = kernel.getenvid();

    if let Some(child) = child {
        match kernel.env_destroy(child) {
            Ok(()) => warn!(pid = me, child = child, "destroyed half-built child"),
            Err(e) => warn!(pid = me, child = child, error = %e, "could not destroy half-built child"),
        }
    }

    error!(
        pid = me,
        op = err.failed_op().unwrap_or("-"),
        error = %err,
        "fatal error, terminating environment"
    );
    if let Err(e) = kernel.env_destroy(me) {
        error!(pid = me, error = %e, "self-destroy failed");
    }
}
