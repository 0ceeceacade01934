/*!
 * Page Duplication
 * Shares one present page of the parent with a child
 */

use super::shared::is_private;
use crate::core::config::{ForkConfig, ForkPolicy, Layout};
use crate::core::errors::{ForkResult, SyscallContext, SyscallError};
use crate::core::types::{page_addr, PageNum, Pid};
use crate::memory::{PteFlags, Syscalls};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// How a page ended up in the child
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DupKind {
    /// Same frame, copy-on-write on both sides
    CopyOnWrite,
    /// Same frame, writable on both sides
    Shared,
    /// Same frame, original read-only permission on both sides
    ReadOnly,
}

/// Maps pages of the calling environment into a child at the same address
pub struct PageDuplicator<'k, K: ?Sized> {
    kernel: &'k K,
    parent: Pid,
    layout: Layout,
    policy: ForkPolicy,
}

impl<'k, K: Syscalls + ?Sized> PageDuplicator<'k, K> {
    /// `parent` must be the calling environment
    pub fn new(kernel: &'k K, parent: Pid, config: &ForkConfig) -> Self {
        Self {
            kernel,
            parent,
            layout: config.layout,
            policy: config.policy,
        }
    }

    /// Decide what `perm` at page `pn` turns into under the current policy
    pub fn classify(&self, pn: PageNum, perm: PteFlags) -> DupKind {
        if perm.is_cow() {
            return DupKind::CopyOnWrite;
        }
        if !perm.is_writable() {
            return DupKind::ReadOnly;
        }
        match self.policy {
            ForkPolicy::Shared if !is_private(&self.layout, page_addr(pn)) => DupKind::Shared,
            _ => DupKind::CopyOnWrite,
        }
    }

    /// Share page `pn` with `child`.
    ///
    /// Copy-on-write pages are installed in the child first and only then is
    /// the parent's own mapping downgraded. The page being duplicated may be
    /// the parent's running stack; downgrading it first would fault inside
    /// the next call and hand the child a frame the parent can still write.
    pub fn duplicate(&self, child: Pid, pn: PageNum) -> ForkResult<DupKind> {
        let va = page_addr(pn);
        let perm = match self.kernel.page_perm(va) {
            Some(perm) if perm.is_present() => perm,
            _ => {
                return Err(SyscallError::Invalid(format!("page 0x{:x} is not mapped", va)))
                    .op("duppage")
            }
        };

        let kind = self.classify(pn, perm);
        match kind {
            DupKind::CopyOnWrite => {
                let cow = perm.cow_downgrade();
                self.kernel
                    .page_map(self.parent, va, child, va, cow)
                    .op("page_map(child)")?;
                // Remap even if already COW: the call above may have
                // privatized our stack page behind our back.
                self.kernel
                    .page_map(self.parent, va, self.parent, va, cow)
                    .op("page_map(parent)")?;
            }
            DupKind::Shared => {
                self.kernel
                    .page_map(self.parent, va, child, va, perm.shared_writable())
                    .op("page_map(child)")?;
            }
            DupKind::ReadOnly => {
                self.kernel
                    .page_map(self.parent, va, child, va, perm & PteFlags::SYSCALL)
                    .op("page_map(child)")?;
            }
        }

        debug!(parent = self.parent, child = child, va = va, kind = ?kind, "duplicated page");
        Ok(kind)
    }
}
