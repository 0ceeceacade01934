/*!
 * Fork Orchestration
 *
 * User-level fork over exokernel page primitives:
 *
 * 1. Register the copy-on-write fault handler for the caller (allocating
 *    the caller's exception stack on first use).
 * 2. Create a blank child. The call returns twice: `Parent(id)` to the
 *    caller and `Child` when the child first runs.
 * 3. Child: refresh the identity cache and return.
 * 4. Parent: share every present page of the duplicable range with the
 *    child, give the child a private exception stack and the fault upcall,
 *    then mark it runnable.
 *
 * Any failure is fatal. A half-built child is destroyed and never made
 * runnable, and the caller is terminated.
 */

use super::context::ProcessContext;
use super::duppage::{DupKind, PageDuplicator};
use super::fatal;
use super::fault::PageFaultHandler;
use crate::core::config::{ForkConfig, ForkPolicy};
use crate::core::errors::{ForkError, ForkResult, SyscallContext};
use crate::core::limits::{PGSIZE, PTSHIFT};
use crate::core::types::{pdx, pgnum, Pid, VirtAddr};
use crate::memory::{EnvStatus, ExoFork, Kernel, PteFlags};
use crate::monitoring::ForkSpan;
use serde::{Deserialize, Serialize};
use tracing::info;

/// What `fork` returns along each execution path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkOutcome {
    /// Caller's path, carrying the new child's id
    Parent(Pid),
    /// Child's path
    Child,
}

impl ForkOutcome {
    /// Classic integer form: 0 in the child, the child's id in the parent
    pub fn as_raw(&self) -> Pid {
        match self {
            ForkOutcome::Parent(child) => *child,
            ForkOutcome::Child => 0,
        }
    }

    pub fn is_child(&self) -> bool {
        matches!(self, ForkOutcome::Child)
    }

    pub fn child_pid(&self) -> Option<Pid> {
        match self {
            ForkOutcome::Parent(child) => Some(*child),
            ForkOutcome::Child => None,
        }
    }
}

/// Summary of one duplication walk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForkReport {
    pub parent: Pid,
    pub child: Pid,
    pub policy: ForkPolicy,
    /// Present pages handed to the child
    pub pages: usize,
    pub copy_on_write: usize,
    pub shared: usize,
    pub read_only: usize,
}

impl ForkReport {
    fn new(parent: Pid, child: Pid, policy: ForkPolicy) -> Self {
        Self {
            parent,
            child,
            policy,
            ..Self::default()
        }
    }

    fn record(&mut self, kind: DupKind) {
        self.pages += 1;
        match kind {
            DupKind::CopyOnWrite => self.copy_on_write += 1,
            DupKind::Shared => self.shared += 1,
            DupKind::ReadOnly => self.read_only += 1,
        }
    }
}

/// Fork driver bound to the calling environment
pub struct Forker<'k, K: ?Sized> {
    kernel: &'k K,
    config: ForkConfig,
    handler: PageFaultHandler,
}

impl<'k, K: Kernel + ?Sized> Forker<'k, K> {
    pub fn new(kernel: &'k K, config: ForkConfig) -> Self {
        Self {
            kernel,
            handler: PageFaultHandler::new(&config.layout),
            config,
        }
    }

    pub fn config(&self) -> &ForkConfig {
        &self.config
    }

    /// Fork the calling environment
    pub fn fork(&self) -> ForkResult<ForkOutcome> {
        self.fork_with_report().map(|(outcome, _)| outcome)
    }

    /// Fork, also returning the walk summary on the parent's path
    pub fn fork_with_report(&self) -> ForkResult<(ForkOutcome, Option<ForkReport>)> {
        self.config
            .layout
            .validate()
            .map_err(|err| self.abort(None, err))?;

        let me = self.kernel.getenvid();
        info!(pid = me, policy = %self.config.policy, "fork starting");
        self.register_handler(me)
            .map_err(|err| self.abort(None, err))?;

        let ret = self
            .kernel
            .exofork()
            .op("exofork")
            .map_err(|err| self.abort(None, err))?;

        self.resume_with_report(ret)
    }

    /// Continue after `exofork` returned `ret`.
    ///
    /// A child resumes here with `ExoFork::Child` the first time it runs.
    pub fn resume(&self, ret: ExoFork) -> ForkResult<ForkOutcome> {
        self.resume_with_report(ret).map(|(outcome, _)| outcome)
    }

    fn resume_with_report(&self, ret: ExoFork) -> ForkResult<(ForkOutcome, Option<ForkReport>)> {
        match ret {
            ExoFork::Child => {
                ProcessContext::new(self.kernel, &self.config.layout)
                    .fix_up()
                    .map_err(|err| self.abort(None, err))?;
                Ok((ForkOutcome::Child, None))
            }
            ExoFork::Parent(child) => {
                let report = self
                    .populate(child)
                    .map_err(|err| self.abort(Some(child), err))?;
                Ok((ForkOutcome::Parent(child), Some(report)))
            }
        }
    }

    /// Install the fault handler for `me`; safe to repeat
    fn register_handler(&self, me: Pid) -> ForkResult<()> {
        let xstack = self.config.layout.exception_stack_page();
        if self.kernel.page_perm(xstack).is_none() {
            self.kernel
                .page_alloc(me, xstack, PteFlags::USER_RW)
                .op("page_alloc(exception stack)")?;
        }
        self.kernel
            .env_set_pgfault_upcall(me, self.handler.upcall())
            .op("env_set_pgfault_upcall")
    }

    /// Parent-side setup of `child`; the child stays not-runnable until the end
    fn populate(&self, child: Pid) -> ForkResult<ForkReport> {
        let me = self.kernel.getenvid();
        let layout = &self.config.layout;
        let span = ForkSpan::new(me, child, self.config.policy);
        let _entered = span.enter();

        let duplicator = PageDuplicator::new(self.kernel, me, &self.config);
        let mut report = ForkReport::new(me, child, self.config.policy);

        let mut va: VirtAddr = layout.dup_start;
        while va < layout.dup_end {
            if !self.kernel.dir_present(va) {
                va = (pdx(va) + 1) << PTSHIFT;
                continue;
            }
            match self.kernel.page_perm(va) {
                Some(perm) if perm.is_present() => {
                    report.record(duplicator.duplicate(child, pgnum(va))?);
                }
                _ => {}
            }
            va += PGSIZE;
        }

        self.kernel
            .page_alloc(child, layout.exception_stack_page(), PteFlags::USER_RW)
            .op("page_alloc(child exception stack)")?;
        self.kernel
            .env_set_pgfault_upcall(child, self.handler.upcall())
            .op("env_set_pgfault_upcall(child)")?;
        self.kernel
            .env_set_status(child, EnvStatus::Runnable)
            .op("env_set_status")?;

        span.finish(&report);
        info!(
            parent = me,
            child = child,
            pages = report.pages,
            copy_on_write = report.copy_on_write,
            shared = report.shared,
            read_only = report.read_only,
            "fork complete"
        );
        Ok(report)
    }

    fn abort(&self, child: Option<Pid>, err: ForkError) -> ForkError {
        fatal(self.kernel, child, &err);
        err
    }
}

/// Fork the calling environment with copy-on-write semantics
pub fn fork<K: Kernel + ?Sized>(kernel: &K) -> ForkResult<ForkOutcome> {
    Forker::new(kernel, ForkConfig::default()).fork()
}
