//! Fixed-capacity scratch buffer pool
//!
//! Each playing source needs a private stereo buffer for one mix pass: it is
//! decoded into, run through the source's effects and then summed into the
//! output. The pool preallocates N equal-size buffers; checkout takes the
//! first free one or reports that none is left. It never grows, never
//! allocates after construction and never blocks.

use std::ops::{Deref, DerefMut};

use crate::types::StereoBuffer;

/// A buffer checked out of a [`ScratchPool`]
///
/// Must be handed back with [`ScratchPool::give_back`]; a buffer that is
/// dropped instead permanently shrinks the pool.
#[derive(Debug)]
pub struct ScratchBuffer {
    slot: usize,
    buffer: StereoBuffer,
}

impl ScratchBuffer {
    /// Pool slot this buffer belongs to
    #[inline]
    pub fn slot(&self) -> usize {
        self.slot
    }
}

impl Deref for ScratchBuffer {
    type Target = StereoBuffer;

    fn deref(&self) -> &StereoBuffer {
        &self.buffer
    }
}

impl DerefMut for ScratchBuffer {
    fn deref_mut(&mut self) -> &mut StereoBuffer {
        &mut self.buffer
    }
}

/// Pool of equal-size stereo buffers
///
/// A slot holding `None` is checked out.
pub struct ScratchPool {
    slots: Vec<Option<StereoBuffer>>,
    frames: usize,
}

impl ScratchPool {
    /// Preallocate `count` buffers of `frames` stereo frames each
    pub fn new(count: usize, frames: usize) -> Self {
        let slots = (0..count).map(|_| Some(StereoBuffer::silence(frames))).collect();
        Self { slots, frames }
    }

    /// Take the first free buffer, or `None` when every slot is in use
    ///
    /// The buffer's contents are whatever the previous user left behind.
    pub fn checkout(&mut self) -> Option<ScratchBuffer> {
        self.slots.iter_mut().enumerate().find_map(|(slot, entry)| {
            entry.take().map(|buffer| ScratchBuffer { slot, buffer })
        })
    }

    /// Return a buffer to its slot
    pub fn give_back(&mut self, scratch: ScratchBuffer) {
        if let Some(entry) = self.slots.get_mut(scratch.slot) {
            debug_assert!(entry.is_none(), "slot {} returned twice", scratch.slot);
            *entry = Some(scratch.buffer);
        }
    }

    /// Whether `slot` is currently checked out
    pub fn in_use(&self, slot: usize) -> bool {
        matches!(self.slots.get(slot), Some(None))
    }

    /// Number of free slots
    pub fn available(&self) -> usize {
        self.slots.iter().filter(|entry| entry.is_some()).count()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Frames per buffer
    pub fn frames(&self) -> usize {
        self.frames
    }
}
