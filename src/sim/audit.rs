/*!
 * Address-Space Audit
 * Checks the copy-on-write invariants over every live environment
 */

use super::frames::FrameId;
use super::machine::State;
use crate::core::types::{page_addr, pgnum, Pid, VirtAddr};
use crate::memory::PteFlags;
use ahash::AHashMap;
use serde::Serialize;
use thiserror::Error;

/// A broken copy-on-write invariant
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Violation {
    #[error("env 0x{pid:x} maps 0x{va:x} both writable and copy-on-write")]
    WritableCow { pid: Pid, va: VirtAddr },

    #[error("frame {frame:?} is writable at (env, va) {writer:x?} but copy-on-write at {cow:x?}")]
    WritableAlias {
        frame: FrameId,
        writer: (Pid, VirtAddr),
        cow: (Pid, VirtAddr),
    },

    #[error("exception stack of env 0x{pid:x} (frame {frame:?}) has {mappings} mappings")]
    SharedExceptionStack {
        pid: Pid,
        frame: FrameId,
        mappings: usize,
    },
}

pub(crate) fn audit(state: &State) -> Vec<Violation> {
    let mut pids: Vec<Pid> = state
        .envs
        .values()
        .filter(|env| env.is_alive())
        .map(|env| env.id)
        .collect();
    pids.sort_unstable();

    let mut violations = Vec::new();
    let mut by_frame: AHashMap<FrameId, Vec<(Pid, VirtAddr, PteFlags)>> = AHashMap::new();

    for pid in &pids {
        let env = &state.envs[pid];
        for (pn, pte) in &env.pages {
            let va = page_addr(*pn);
            if pte.perm.is_writable() && pte.perm.is_cow() {
                violations.push(Violation::WritableCow { pid: *pid, va });
            }
            by_frame
                .entry(pte.frame)
                .or_default()
                .push((*pid, va, pte.perm));
        }
    }

    let mut frames: Vec<_> = by_frame.keys().copied().collect();
    frames.sort_unstable();
    for frame in frames {
        let mappings = &by_frame[&frame];
        let writer = mappings.iter().find(|(_, _, perm)| perm.is_writable());
        let cow = mappings.iter().find(|(_, _, perm)| perm.is_cow());
        if let (Some(w), Some(c)) = (writer, cow) {
            violations.push(Violation::WritableAlias {
                frame,
                writer: (w.0, w.1),
                cow: (c.0, c.1),
            });
        }
    }

    let xstack = pgnum(state.config.layout.exception_stack_page());
    for pid in &pids {
        if let Some(pte) = state.envs[pid].pages.get(&xstack) {
            let mappings = by_frame.get(&pte.frame).map_or(0, Vec::len);
            if mappings > 1 {
                violations.push(Violation::SharedExceptionStack {
                    pid: *pid,
                    frame: pte.frame,
                    mappings,
                });
            }
        }
    }

    violations
}
