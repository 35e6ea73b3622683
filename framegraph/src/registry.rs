//! Chunked resource registry (component B).
//!
//! A column store arranged in fixed-size chunks, grounded on
//! `resource_managers.rs`'s `ResourceManager` (which keeps buffers/images in
//! a `SlotMap` plus a parallel `ResourceFrame` ring for deferred release).
//! This crate replaces the generational `SlotMap` key with the handle
//! encoding in [`crate::handle`] and replaces the fixed-size
//! frames-in-flight ring with a frame-number-keyed deferred-dispose queue,
//! per `spec.md` §4.B.
//!
//! Per-resource usage lists are *not* stored as a registry column: they are
//! arena-allocated and frame-scoped (see [`crate::usage`]), while the
//! registry itself is a process-wide, multi-frame-lived singleton. Keeping
//! the two separate avoids threading the arena's lifetime through every
//! registry slot; the per-frame recording context maps `Handle -> UsageList`
//! for the duration of one frame instead.

use framegraph_support::{DeferredRelease, IndexPool};

pub const DEFAULT_CHUNK_SIZE: u32 = 256;

bitflags::bitflags! {
    #[derive(Debug, Copy, Clone, Eq, PartialEq)]
    pub struct StateFlags: u8 {
        /// Set when the resource has been written to by any pass or CPU path.
        const INITIALISED = 1 << 0;
    }
}

struct Chunk<D, Extra> {
    descriptor: Vec<Option<D>>,
    label: Vec<Option<String>>,
    state: Vec<StateFlags>,
    read_wait_frame: Vec<u64>,
    write_wait_frame: Vec<u64>,
    extra: Vec<Option<Extra>>,
}

impl<D, Extra> Chunk<D, Extra> {
    fn new(size: u32) -> Self {
        let size = size as usize;
        Self {
            descriptor: (0..size).map(|_| None).collect(),
            label: (0..size).map(|_| None).collect(),
            state: vec![StateFlags::empty(); size],
            read_wait_frame: vec![0; size],
            write_wait_frame: vec![0; size],
            extra: (0..size).map(|_| None).collect(),
        }
    }
}

/// A chunked, index-addressed column store. `PERSISTENT` registries recycle
/// indices only once a deferred-disposed entry's wait-frame has completed;
/// `TRANSIENT` registries recycle everything at `cycle_frames()`.
pub struct Registry<D, Extra> {
    chunk_size: u32,
    chunks: Vec<Chunk<D, Extra>>,
    indices: IndexPool,
    /// Keyed by `max(readWaitFrame, writeWaitFrame)` at the time of
    /// `dispose` (§4.B).
    deferred: DeferredRelease<u32>,
    is_persistent: bool,
}

impl<D, Extra> Registry<D, Extra> {
    pub fn new_persistent(chunk_size: u32) -> Self {
        Self {
            chunk_size,
            chunks: Vec::new(),
            indices: IndexPool::new(0),
            deferred: DeferredRelease::new(),
            is_persistent: true,
        }
    }

    pub fn new_transient(chunk_size: u32) -> Self {
        Self {
            chunk_size,
            chunks: Vec::new(),
            indices: IndexPool::new(0),
            deferred: DeferredRelease::new(),
            is_persistent: false,
        }
    }

    fn location(&self, index: u32) -> (usize, usize) {
        let chunk_size = self.chunk_size;
        ((index / chunk_size) as usize, (index % chunk_size) as usize)
    }

    fn ensure_chunk(&mut self, chunk_index: usize) {
        while self.chunks.len() <= chunk_index {
            self.chunks.push(Chunk::new(self.chunk_size));
        }
    }

    /// Allocate a new slot. O(1) amortized; appends a chunk when the
    /// current one is exhausted.
    pub fn allocate(&mut self, descriptor: D, extra: Extra) -> u32 {
        let index = self.indices.acquire().expect("index pool exhausted");
        let (chunk_index, slot) = self.location(index);
        self.ensure_chunk(chunk_index);
        let chunk = &mut self.chunks[chunk_index];
        chunk.descriptor[slot] = Some(descriptor);
        chunk.label[slot] = None;
        chunk.state[slot] = StateFlags::empty();
        chunk.read_wait_frame[slot] = 0;
        chunk.write_wait_frame[slot] = 0;
        chunk.extra[slot] = Some(extra);
        index
    }

    pub fn descriptor(&self, index: u32) -> Option<&D> {
        let (c, s) = self.location(index);
        self.chunks.get(c)?.descriptor[s].as_ref()
    }

    pub fn extra(&self, index: u32) -> Option<&Extra> {
        let (c, s) = self.location(index);
        self.chunks.get(c)?.extra[s].as_ref()
    }

    pub fn extra_mut(&mut self, index: u32) -> Option<&mut Extra> {
        let (c, s) = self.location(index);
        self.chunks.get_mut(c)?.extra[s].as_mut()
    }

    pub fn label(&self, index: u32) -> Option<&str> {
        let (c, s) = self.location(index);
        self.chunks.get(c)?.label[s].as_deref()
    }

    pub fn set_label(&mut self, index: u32, label: impl Into<String>) {
        let (c, s) = self.location(index);
        self.chunks[c].label[s] = Some(label.into());
    }

    pub fn state(&self, index: u32) -> StateFlags {
        let (c, s) = self.location(index);
        self.chunks.get(c).map(|ch| ch.state[s]).unwrap_or_default()
    }

    pub fn mark_initialised(&mut self, index: u32) {
        let (c, s) = self.location(index);
        self.chunks[c].state[s].insert(StateFlags::INITIALISED);
    }

    pub fn read_wait_frame(&self, index: u32) -> u64 {
        let (c, s) = self.location(index);
        self.chunks.get(c).map(|ch| ch.read_wait_frame[s]).unwrap_or(0)
    }

    pub fn write_wait_frame(&self, index: u32) -> u64 {
        let (c, s) = self.location(index);
        self.chunks.get(c).map(|ch| ch.write_wait_frame[s]).unwrap_or(0)
    }

    pub fn stamp_read_wait_frame(&mut self, index: u32, frame: u64) {
        let (c, s) = self.location(index);
        self.chunks[c].read_wait_frame[s] = frame;
    }

    pub fn stamp_write_wait_frame(&mut self, index: u32, frame: u64) {
        let (c, s) = self.location(index);
        self.chunks[c].write_wait_frame[s] = frame;
    }

    /// Dispose a slot. Persistent registries enqueue the index into the
    /// deferred-dispose queue keyed by `max(readWaitFrame, writeWaitFrame)`;
    /// transient registries (or `atEndOfFrame == true`) free immediately —
    /// the caller is expected to only dispose transients at frame
    /// boundaries.
    pub fn dispose(&mut self, index: u32, at_end_of_frame: bool) {
        if self.is_persistent && !at_end_of_frame {
            let key = self.write_wait_frame(index).max(self.read_wait_frame(index));
            trace!("registry: deferring dispose of index {index} until frame {key} completes");
            self.deferred.push(key, index);
        } else {
            if !self.is_persistent && !at_end_of_frame {
                warn!("registry: transient index {index} disposed outside a frame boundary");
            }
            self.free_slot(index);
        }
    }

    fn free_slot(&mut self, index: u32) {
        let (c, s) = self.location(index);
        if let Some(chunk) = self.chunks.get_mut(c) {
            chunk.descriptor[s] = None;
            chunk.extra[s] = None;
            chunk.label[s] = None;
            chunk.state[s] = StateFlags::empty();
        }
        self.indices.release(index);
    }

    /// Drain every deferred-dispose entry whose key has completed on the
    /// GPU. Called before allocation and at frame boundaries (§4.B).
    pub fn drain_deferred(&mut self, completed_frame: u64) {
        for index in self.deferred.drain_ready(completed_frame) {
            debug!("registry: recycling deferred-disposed index {index} at frame {completed_frame}");
            self.free_slot(index);
        }
    }

    /// Transient registries only: atomically resets the index pool and
    /// frees every descriptor, recycling all indices for the next frame.
    pub fn cycle_frames(&mut self) {
        debug_assert!(!self.is_persistent, "cycle_frames is transient-only");
        for chunk in &mut self.chunks {
            for slot in chunk.descriptor.iter_mut() {
                *slot = None;
            }
            for slot in chunk.extra.iter_mut() {
                *slot = None;
            }
            for label in chunk.label.iter_mut() {
                *label = None;
            }
            for state in chunk.state.iter_mut() {
                *state = StateFlags::empty();
            }
        }
        self.indices.reset(0);
    }
}
