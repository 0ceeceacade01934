/*!
 * Physical Frames
 * Reference-counted page frames backing the simulated machine
 */

use crate::core::errors::{SyscallError, SyscallResult};
use crate::core::limits::PGSIZE;
use serde::{Deserialize, Serialize};

/// Index of a physical frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FrameId(pub(crate) usize);

struct Frame {
    data: Box<[u8]>,
    refs: u32,
}

/// Frame allocator with per-frame mapping counts.
///
/// A frame is released when its last mapping goes away.
pub(crate) struct FrameTable {
    frames: Vec<Option<Frame>>,
    free: Vec<usize>,
    limit: usize,
    live: usize,
}

impl FrameTable {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            frames: Vec::new(),
            free: Vec::new(),
            limit,
            live: 0,
        }
    }

    /// Zeroed frame with no mappings yet
    pub(crate) fn alloc(&mut self) -> SyscallResult<FrameId> {
        if self.live >= self.limit {
            return Err(SyscallError::NoMem);
        }
        let frame = Frame {
            data: vec![0u8; PGSIZE].into_boxed_slice(),
            refs: 0,
        };
        let index = match self.free.pop() {
            Some(index) => {
                self.frames[index] = Some(frame);
                index
            }
            None => {
                self.frames.push(Some(frame));
                self.frames.len() - 1
            }
        };
        self.live += 1;
        Ok(FrameId(index))
    }

    pub(crate) fn incref(&mut self, id: FrameId) {
        if let Some(frame) = self.frames.get_mut(id.0).and_then(Option::as_mut) {
            frame.refs += 1;
        }
    }

    pub(crate) fn decref(&mut self, id: FrameId) {
        let release = match self.frames.get_mut(id.0).and_then(Option::as_mut) {
            Some(frame) => {
                frame.refs = frame.refs.saturating_sub(1);
                frame.refs == 0
            }
            None => false,
        };
        if release {
            self.frames[id.0] = None;
            self.free.push(id.0);
            self.live -= 1;
        }
    }

    pub(crate) fn refs(&self, id: FrameId) -> u32 {
        self.frames
            .get(id.0)
            .and_then(Option::as_ref)
            .map_or(0, |frame| frame.refs)
    }

    pub(crate) fn data(&self, id: FrameId) -> Option<&[u8]> {
        self.frames
            .get(id.0)
            .and_then(Option::as_ref)
            .map(|frame| &frame.data[..])
    }

    pub(crate) fn data_mut(&mut self, id: FrameId) -> Option<&mut [u8]> {
        self.frames
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .map(|frame| &mut frame.data[..])
    }

    pub(crate) fn live(&self) -> usize {
        self.live
    }
}
