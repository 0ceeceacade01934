/*!
 * Simulated Machine
 *
 * In-memory exokernel implementing the page, environment and upcall
 * primitives the fork library consumes. Used by the tests and the demo.
 */

use super::audit::{self, Violation};
use super::frames::{FrameId, FrameTable};
use super::process::SimProcess;
use crate::core::config::Layout;
use crate::core::errors::{SyscallError, SyscallResult};
use crate::core::limits::{DEFAULT_FRAMES, DEFAULT_MAX_ENVS, FIRST_ENV_ID, PGSIZE, UTOP};
use crate::core::types::{is_page_aligned, page_addr, pgnum, PageNum, Pid, VirtAddr};
use crate::memory::{EnvStatus, ExoFork, PteFlags, UpcallEntry};
use ahash::AHashMap;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Simulated machine configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineConfig {
    /// Physical frames available
    pub frames: usize,
    /// Live environments allowed at once
    pub max_envs: usize,
    /// Layout used to locate exception stacks
    pub layout: Layout,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            frames: DEFAULT_FRAMES,
            max_envs: DEFAULT_MAX_ENVS,
            layout: Layout::default(),
        }
    }
}

impl MachineConfig {
    pub fn with_frames(mut self, frames: usize) -> Self {
        self.frames = frames;
        self
    }

    pub fn with_max_envs(mut self, max_envs: usize) -> Self {
        self.max_envs = max_envs;
        self
    }
}

/// Operation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineStats {
    pub page_allocs: u64,
    pub page_maps: u64,
    pub page_unmaps: u64,
    pub faults_delivered: u64,
    pub envs_created: u64,
    pub envs_destroyed: u64,
    pub live_frames: usize,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Pte {
    pub(crate) frame: FrameId,
    pub(crate) perm: PteFlags,
}

pub(crate) struct Env {
    pub(crate) id: Pid,
    pub(crate) parent: Option<Pid>,
    pub(crate) status: EnvStatus,
    pub(crate) upcall: Option<UpcallEntry>,
    pub(crate) pages: BTreeMap<PageNum, Pte>,
    /// Where syscall entry spills a word; `None` disables the stack model
    pub(crate) stack_pointer: Option<VirtAddr>,
    pub(crate) upcall_depth: u32,
    pub(crate) fork_return_pending: bool,
    pub(crate) seq: u32,
}

impl Env {
    fn new(id: Pid, parent: Option<Pid>, status: EnvStatus) -> Self {
        Self {
            id,
            parent,
            status,
            upcall: None,
            pages: BTreeMap::new(),
            stack_pointer: None,
            upcall_depth: 0,
            fork_return_pending: false,
            seq: 0,
        }
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.status != EnvStatus::Dead
    }
}

pub(crate) struct State {
    pub(crate) config: MachineConfig,
    pub(crate) frames: FrameTable,
    pub(crate) envs: AHashMap<Pid, Env>,
    pub(crate) stats: MachineStats,
    next_id: Pid,
}

impl State {
    fn new(config: MachineConfig) -> Self {
        Self {
            config,
            frames: FrameTable::new(config.frames),
            envs: AHashMap::new(),
            stats: MachineStats::default(),
            next_id: FIRST_ENV_ID,
        }
    }

    pub(crate) fn env(&self, pid: Pid) -> SyscallResult<&Env> {
        self.envs
            .get(&pid)
            .filter(|env| env.is_alive())
            .ok_or(SyscallError::BadEnv(pid))
    }

    pub(crate) fn env_mut(&mut self, pid: Pid) -> SyscallResult<&mut Env> {
        self.envs
            .get_mut(&pid)
            .filter(|env| env.is_alive())
            .ok_or(SyscallError::BadEnv(pid))
    }

    /// `target` must be alive and either the caller or the caller's child
    pub(crate) fn check_target(&self, caller: Pid, target: Pid) -> SyscallResult<()> {
        let env = self.env(target)?;
        if env.id == caller || env.parent == Some(caller) {
            Ok(())
        } else {
            Err(SyscallError::NotPermitted(target))
        }
    }

    pub(crate) fn check_va(va: VirtAddr) -> SyscallResult<()> {
        if va >= UTOP || !is_page_aligned(va) {
            return Err(SyscallError::Invalid(format!(
                "address 0x{:x} is unaligned or above UTOP",
                va
            )));
        }
        Ok(())
    }

    pub(crate) fn check_perm(perm: PteFlags) -> SyscallResult<()> {
        if !perm.contains(PteFlags::USER_RO) || !PteFlags::SYSCALL.contains(perm) {
            return Err(SyscallError::Invalid(format!(
                "permission {:?} must include PRESENT|USER and stay within SYSCALL",
                perm
            )));
        }
        Ok(())
    }

    pub(crate) fn create_env(&mut self, parent: Option<Pid>, status: EnvStatus) -> SyscallResult<Pid> {
        let alive = self.envs.values().filter(|env| env.is_alive()).count();
        if alive >= self.config.max_envs {
            return Err(SyscallError::NoFreeEnv);
        }
        let id = self.next_id;
        self.next_id += 1;
        self.envs.insert(id, Env::new(id, parent, status));
        self.stats.envs_created += 1;
        Ok(id)
    }

    /// Map `frame` at `va` in `pid`, replacing any previous mapping
    pub(crate) fn insert(&mut self, pid: Pid, va: VirtAddr, frame: FrameId, perm: PteFlags) -> SyscallResult<()> {
        self.frames.incref(frame);
        let env = match self.envs.get_mut(&pid).filter(|env| env.is_alive()) {
            Some(env) => env,
            None => {
                self.frames.decref(frame);
                return Err(SyscallError::BadEnv(pid));
            }
        };
        if let Some(old) = env.pages.insert(pgnum(va), Pte { frame, perm }) {
            self.frames.decref(old.frame);
        }
        Ok(())
    }

    pub(crate) fn remove(&mut self, pid: Pid, va: VirtAddr) -> SyscallResult<()> {
        let removed = self.env_mut(pid)?.pages.remove(&pgnum(va));
        if let Some(pte) = removed {
            self.frames.decref(pte.frame);
        }
        Ok(())
    }

    pub(crate) fn lookup(&self, pid: Pid, va: VirtAddr) -> Option<Pte> {
        self.env(pid).ok()?.pages.get(&pgnum(va)).copied()
    }

    /// Release every page of `pid` and mark it dead
    pub(crate) fn destroy(&mut self, pid: Pid) {
        let Some(env) = self.envs.get_mut(&pid).filter(|env| env.is_alive()) else {
            return;
        };
        let pages = std::mem::take(&mut env.pages);
        env.status = EnvStatus::Dead;
        env.upcall = None;
        for pte in pages.into_values() {
            self.frames.decref(pte.frame);
        }
        self.stats.envs_destroyed += 1;
        debug!(pid = pid, "environment destroyed");
    }
}

/// Handle to a simulated machine; clones share the same machine
#[derive(Clone)]
pub struct Machine {
    inner: Arc<Mutex<State>>,
}

impl Machine {
    pub fn new(config: MachineConfig) -> Self {
        debug!(
            frames = config.frames,
            max_envs = config.max_envs,
            "simulated machine initialized"
        );
        Self {
            inner: Arc::new(Mutex::new(State::new(config))),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, State> {
        self.inner.lock()
    }

    pub fn config(&self) -> MachineConfig {
        self.lock().config
    }

    /// Create a runnable root environment with an empty address space
    pub fn spawn(&self) -> SyscallResult<SimProcess> {
        let pid = self.lock().create_env(None, EnvStatus::Runnable)?;
        Ok(SimProcess::new(self.clone(), pid))
    }

    /// Handle for an existing, live environment
    pub fn process(&self, pid: Pid) -> SyscallResult<SimProcess> {
        self.lock().env(pid)?;
        Ok(SimProcess::new(self.clone(), pid))
    }

    /// Run a forked child for the first time.
    ///
    /// Returns the child's handle together with the value its `exofork`
    /// call returns on its side.
    pub fn enter(&self, pid: Pid) -> SyscallResult<(SimProcess, ExoFork)> {
        let mut guard = self.lock();
        let env = guard.env_mut(pid)?;
        if env.status != EnvStatus::Runnable {
            return Err(SyscallError::Invalid(format!(
                "environment 0x{:x} is not runnable",
                pid
            )));
        }
        if !env.fork_return_pending {
            return Err(SyscallError::Invalid(format!(
                "environment 0x{:x} has no pending fork return",
                pid
            )));
        }
        env.fork_return_pending = false;
        drop(guard);
        Ok((SimProcess::new(self.clone(), pid), ExoFork::Child))
    }

    /// Load `data` at page-aligned `va` in fresh frames mapped with `perm`
    pub fn load_segment(&self, pid: Pid, va: VirtAddr, data: &[u8], perm: PteFlags) -> SyscallResult<()> {
        State::check_va(va)?;
        State::check_perm(perm)?;
        let mut guard = self.lock();
        let state = &mut *guard;
        state.env(pid)?;

        let pages = data.len().max(1).div_ceil(PGSIZE);
        for i in 0..pages {
            let frame = state.frames.alloc()?;
            let chunk = &data[(i * PGSIZE).min(data.len())..((i + 1) * PGSIZE).min(data.len())];
            if let Some(page) = state.frames.data_mut(frame) {
                page[..chunk.len()].copy_from_slice(chunk);
            }
            state.insert(pid, va + i * PGSIZE, frame, perm)?;
        }
        Ok(())
    }

    /// Enable the stack model for `pid`; every syscall it makes then
    /// spills a word at `sp`
    pub fn set_stack_pointer(&self, pid: Pid, sp: Option<VirtAddr>) -> SyscallResult<()> {
        self.lock().env_mut(pid)?.stack_pointer = sp;
        Ok(())
    }

    pub fn status(&self, pid: Pid) -> Option<EnvStatus> {
        self.lock().envs.get(&pid).map(|env| env.status)
    }

    pub fn perm(&self, pid: Pid, va: VirtAddr) -> Option<PteFlags> {
        self.lock().lookup(pid, va).map(|pte| pte.perm)
    }

    pub fn frame_of(&self, pid: Pid, va: VirtAddr) -> Option<FrameId> {
        self.lock().lookup(pid, va).map(|pte| pte.frame)
    }

    /// Mappings currently referencing `frame`
    pub fn frame_refs(&self, frame: FrameId) -> u32 {
        self.lock().frames.refs(frame)
    }

    /// Kernel-side read that ignores permissions and never faults
    pub fn peek(&self, pid: Pid, va: VirtAddr, len: usize) -> Option<Vec<u8>> {
        let guard = self.lock();
        let mut out = Vec::with_capacity(len);
        let mut addr = va;
        while out.len() < len {
            let offset = addr % PGSIZE;
            let n = (PGSIZE - offset).min(len - out.len());
            let pte = guard.lookup(pid, addr)?;
            let page = guard.frames.data(pte.frame)?;
            out.extend_from_slice(&page[offset..offset + n]);
            addr += n;
        }
        Some(out)
    }

    /// Every mapping of `pid` in address order
    pub fn mappings(&self, pid: Pid) -> Vec<(VirtAddr, PteFlags)> {
        let guard = self.lock();
        match guard.env(pid) {
            Ok(env) => env
                .pages
                .iter()
                .map(|(pn, pte)| (page_addr(*pn), pte.perm))
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn stats(&self) -> MachineStats {
        let guard = self.lock();
        MachineStats {
            live_frames: guard.frames.live(),
            ..guard.stats
        }
    }

    /// Copy-on-write invariant violations across all live environments
    pub fn audit(&self) -> Vec<Violation> {
        let guard = self.lock();
        let violations = audit::audit(&guard);
        for violation in &violations {
            warn!(%violation, "address-space invariant violated");
        }
        violations
    }
}

impl Default for Machine {
    fn default() -> Self {
        Self::new(MachineConfig::default())
    }
}
