/*!
 * Shared-Memory Fork
 *
 * Variant of fork for cooperating environments that want a common heap.
 * Writable pages are mapped writable into the child on the same frame,
 * except the private ranges, which keep copy-on-write semantics:
 *
 * - the normal stack region, since each side needs its own call frames
 * - the page holding the identity word, so each side can cache its own id
 *
 * Pages that are already COW stay COW and read-only pages propagate as is.
 */

use super::orchestrator::{ForkOutcome, Forker};
use crate::core::config::{ForkConfig, Layout};
use crate::core::errors::ForkResult;
use crate::core::types::{round_down, VirtAddr};
use crate::memory::Kernel;

/// Whether the page containing `va` must stay private across a shared fork
pub fn is_private(layout: &Layout, va: VirtAddr) -> bool {
    layout.is_stack(va) || round_down(va) == layout.identity_page()
}

/// Fork sharing the heap writable; stack and identity page are copy-on-write
pub fn sfork<K: Kernel + ?Sized>(kernel: &K) -> ForkResult<ForkOutcome> {
    Forker::new(kernel, ForkConfig::shared()).fork()
}
