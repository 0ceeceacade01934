/*!
 * Simulated Environment Handle
 *
 * The view a running environment has of the simulated machine: its
 * syscalls and its own memory. Faulting stores are delivered to the
 * registered upcall on the environment's exception stack.
 */

use super::machine::{Machine, State};
use crate::core::errors::{SyscallError, SyscallResult};
use crate::core::limits::{NPTENTRIES, PGSIZE};
use crate::core::types::{pdx, pgnum, Pid, VirtAddr};
use crate::memory::{
    EnvStatus, ExoFork, FaultCode, Kernel, PteFlags, Syscalls, UTrapframe, UpcallEntry, UserMemory,
};
use tracing::{trace, warn};

/// A running environment on a simulated machine
#[derive(Clone)]
pub struct SimProcess {
    machine: Machine,
    pid: Pid,
}

impl SimProcess {
    pub(crate) fn new(machine: Machine, pid: Pid) -> Self {
        Self { machine, pid }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    /// Syscall entry: spill onto the current stack, then run `f` as the caller
    fn syscall<R>(&self, f: impl FnOnce(&mut State) -> SyscallResult<R>) -> SyscallResult<R> {
        self.touch_stack()?;
        let mut guard = self.machine.lock();
        guard.env(self.pid)?;
        f(&mut guard)
    }

    /// Model the stack traffic of making a call. Inside an upcall the
    /// exception stack is in use instead of the normal one.
    fn touch_stack(&self) -> SyscallResult<()> {
        let spill = {
            let mut guard = self.machine.lock();
            let xstack_top = guard.config.layout.exception_stack_top;
            let env = guard.env_mut(self.pid)?;
            env.seq = env.seq.wrapping_add(1);
            let sp = if env.upcall_depth > 0 {
                Some(xstack_top - 4)
            } else {
                env.stack_pointer
            };
            sp.map(|sp| (sp, env.seq))
        };
        match spill {
            Some((sp, seq)) => self.write(sp, &seq.to_le_bytes()),
            None => Ok(()),
        }
    }

    /// Run `f` on the page containing `va`, delivering at most one fault
    fn access_page(&self, va: VirtAddr, write: bool, f: &mut dyn FnMut(&mut [u8])) -> SyscallResult<()> {
        let mut faulted = false;
        loop {
            let code = {
                let mut guard = self.machine.lock();
                let state = &mut *guard;
                let env = state.env(self.pid)?;
                let mut code = FaultCode::USER;
                if write {
                    code |= FaultCode::WRITE;
                }
                match env.pages.get(&pgnum(va)).copied() {
                    Some(pte) if pte.perm.contains(PteFlags::USER_RO) && (!write || pte.perm.is_writable()) => {
                        let page = state
                            .frames
                            .data_mut(pte.frame)
                            .ok_or(SyscallError::Fault { va })?;
                        f(page);
                        return Ok(());
                    }
                    Some(_) => code | FaultCode::PRESENT,
                    None => code,
                }
            };

            if faulted {
                warn!(pid = self.pid, va = va, "fault persisted after upcall");
                self.machine.lock().destroy(self.pid);
                return Err(SyscallError::Fault { va });
            }
            faulted = true;
            self.deliver_fault(va, code)?;
        }
    }

    /// Invoke the upcall on the exception stack, or kill the environment
    /// when it has none it can run on
    fn deliver_fault(&self, va: VirtAddr, code: FaultCode) -> SyscallResult<()> {
        let entry: Option<UpcallEntry> = {
            let mut guard = self.machine.lock();
            let state = &mut *guard;
            let xstack = state.config.layout.exception_stack_page();
            let env = state.env_mut(self.pid)?;
            let xstack_ok = env
                .pages
                .get(&pgnum(xstack))
                .is_some_and(|pte| pte.perm.is_writable());
            let entry = match &env.upcall {
                Some(entry) if env.upcall_depth == 0 && xstack_ok => Some(entry.clone()),
                _ => None,
            };
            if entry.is_some() {
                env.upcall_depth += 1;
                state.stats.faults_delivered += 1;
            }
            entry
        };

        let Some(entry) = entry else {
            warn!(pid = self.pid, va = va, code = ?code, "unhandled page fault, destroying environment");
            self.machine.lock().destroy(self.pid);
            return Err(SyscallError::Fault { va });
        };

        trace!(pid = self.pid, va = va, code = ?code, "delivering page fault");
        let utf = UTrapframe { fault_va: va, err: code };
        entry(self as &dyn Kernel, &utf);

        let mut guard = self.machine.lock();
        match guard.envs.get_mut(&self.pid) {
            Some(env) if env.is_alive() => {
                env.upcall_depth = env.upcall_depth.saturating_sub(1);
                Ok(())
            }
            _ => Err(SyscallError::Fault { va }),
        }
    }
}

impl Syscalls for SimProcess {
    fn getenvid(&self) -> Pid {
        // The identity comes from the kernel; the spill only models the call.
        if let Err(err) = self.touch_stack() {
            warn!(pid = self.pid, error = %err, "stack spill failed during getenvid");
        }
        self.pid
    }

    fn exofork(&self) -> SyscallResult<ExoFork> {
        let caller = self.pid;
        self.syscall(|state| {
            let sp = state.env(caller)?.stack_pointer;
            let child = state.create_env(Some(caller), EnvStatus::NotRunnable)?;
            let env = state.env_mut(child)?;
            env.stack_pointer = sp;
            env.fork_return_pending = true;
            Ok(ExoFork::Parent(child))
        })
    }

    fn page_alloc(&self, pid: Pid, va: VirtAddr, perm: PteFlags) -> SyscallResult<()> {
        let caller = self.pid;
        self.syscall(|state| {
            State::check_va(va)?;
            State::check_perm(perm)?;
            state.check_target(caller, pid)?;
            let frame = state.frames.alloc()?;
            state.insert(pid, va, frame, perm)?;
            state.stats.page_allocs += 1;
            Ok(())
        })
    }

    fn page_map(
        &self,
        src: Pid,
        src_va: VirtAddr,
        dst: Pid,
        dst_va: VirtAddr,
        perm: PteFlags,
    ) -> SyscallResult<()> {
        let caller = self.pid;
        self.syscall(|state| {
            State::check_va(src_va)?;
            State::check_va(dst_va)?;
            State::check_perm(perm)?;
            state.check_target(caller, src)?;
            state.check_target(caller, dst)?;
            let pte = state.lookup(src, src_va).ok_or_else(|| {
                SyscallError::Invalid(format!("source page 0x{:x} is not mapped", src_va))
            })?;
            if perm.is_writable() && !pte.perm.is_writable() {
                return Err(SyscallError::Invalid(format!(
                    "cannot grant write access to read-only page 0x{:x}",
                    src_va
                )));
            }
            state.insert(dst, dst_va, pte.frame, perm)?;
            state.stats.page_maps += 1;
            Ok(())
        })
    }

    fn page_unmap(&self, pid: Pid, va: VirtAddr) -> SyscallResult<()> {
        let caller = self.pid;
        self.syscall(|state| {
            State::check_va(va)?;
            state.check_target(caller, pid)?;
            state.remove(pid, va)?;
            state.stats.page_unmaps += 1;
            Ok(())
        })
    }

    fn env_set_pgfault_upcall(&self, pid: Pid, entry: UpcallEntry) -> SyscallResult<()> {
        let caller = self.pid;
        self.syscall(|state| {
            state.check_target(caller, pid)?;
            state.env_mut(pid)?.upcall = Some(entry);
            Ok(())
        })
    }

    fn env_set_status(&self, pid: Pid, status: EnvStatus) -> SyscallResult<()> {
        let caller = self.pid;
        self.syscall(|state| {
            if status == EnvStatus::Dead {
                return Err(SyscallError::Invalid(
                    "use env_destroy to kill an environment".to_string(),
                ));
            }
            state.check_target(caller, pid)?;
            state.env_mut(pid)?.status = status;
            Ok(())
        })
    }

    fn env_destroy(&self, pid: Pid) -> SyscallResult<()> {
        let caller = self.pid;
        self.syscall(|state| {
            state.check_target(caller, pid)?;
            state.destroy(pid);
            Ok(())
        })
    }

    fn page_perm(&self, va: VirtAddr) -> Option<PteFlags> {
        self.machine.lock().lookup(self.pid, va).map(|pte| pte.perm)
    }

    fn dir_present(&self, va: VirtAddr) -> bool {
        let guard = self.machine.lock();
        let Ok(env) = guard.env(self.pid) else {
            return false;
        };
        let first = pdx(va) * NPTENTRIES;
        env.pages.range(first..first + NPTENTRIES).next().is_some()
    }
}

impl UserMemory for SimProcess {
    fn read(&self, va: VirtAddr, buf: &mut [u8]) -> SyscallResult<()> {
        let mut done = 0;
        while done < buf.len() {
            let addr = va + done;
            let offset = addr % PGSIZE;
            let n = (PGSIZE - offset).min(buf.len() - done);
            let dst = &mut buf[done..done + n];
            self.access_page(addr, false, &mut |page: &mut [u8]| {
                dst.copy_from_slice(&page[offset..offset + n])
            })?;
            done += n;
        }
        Ok(())
    }

    fn write(&self, va: VirtAddr, data: &[u8]) -> SyscallResult<()> {
        let mut done = 0;
        while done < data.len() {
            let addr = va + done;
            let offset = addr % PGSIZE;
            let n = (PGSIZE - offset).min(data.len() - done);
            let src = &data[done..done + n];
            self.access_page(addr, true, &mut |page: &mut [u8]| {
                page[offset..offset + n].copy_from_slice(src)
            })?;
            done += n;
        }
        Ok(())
    }
}
