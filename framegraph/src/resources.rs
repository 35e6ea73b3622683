//! Typed resource facades (component C): Buffer, Texture, ArgumentBuffer,
//! ArgumentBufferArray.
//!
//! Grounded on `resource_managers.rs`'s `MappedSlice` (CPU-visible
//! buffer mapping) and `BufferTempResource`/`ImageTempResource` (deferred
//! materialization bookkeeping), generalized to the handle-based registry in
//! [`crate::registry`] instead of a `SlotMap`.

use std::ops::Range;

use ash::vk;
use gpu_allocator::MemoryLocation;

use crate::handle::{self, Handle, HandleFlags, ResourceType};
use crate::registry::{Registry, DEFAULT_CHUNK_SIZE};
use crate::usage::AccessType;
use crate::{Error, Result};

/// The transient/materialized/disposed state machine a design note calls
/// for, tracked alongside (not instead of) the `INITIALISED` state flag.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum LifecycleState {
    Declared,
    Materialized,
    Disposed,
}

#[derive(Debug, Clone)]
pub struct BufferDescriptor {
    pub size: u64,
    pub memory_location: MemoryLocation,
}

#[derive(Debug, Clone)]
pub struct TextureDescriptor {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub format: vk::Format,
    pub memory_location: MemoryLocation,
}

/// An arena-erased "apply this once materialized" capsule — the design
/// note's `{ range, apply(&Buffer) }`. Boxed on the heap rather than in the
/// per-frame arena: the closure's captures are typically small and the
/// extra indirection is negligible next to an allocation/copy.
pub struct DeferredSliceAction {
    pub range: Range<u64>,
    pub apply: Box<dyn FnOnce(&mut [u8]) + Send>,
}

pub struct BufferExtra {
    pub lifecycle: LifecycleState,
    pub backend_id: Option<u64>,
    pub usage_union: vk::BufferUsageFlags,
    pub deferred: Vec<DeferredSliceAction>,
    pub immutable_once_initialised: bool,
}

pub struct TextureExtra {
    pub lifecycle: LifecycleState,
    pub backend_id: Option<u64>,
    pub usage_union: vk::ImageUsageFlags,
    pub is_depth_stencil: bool,
    pub immutable_once_initialised: bool,
}

/// Writes `action`'s output into the real backend-mapped buffer, then
/// flushes the written range (§4.C: `didModifyRange` on every write).
fn write_mapped_range<B: crate::backend::Backend>(
    backend: &mut B,
    backend_id: u64,
    range: &Range<u64>,
    action: impl FnOnce(&mut [u8]),
) -> Result<()> {
    let len = (range.end - range.start) as usize;
    let ptr = backend.map_buffer(backend_id)?;
    let bytes = unsafe { std::slice::from_raw_parts_mut(ptr.add(range.start as usize), len) };
    action(bytes);
    backend.did_modify_range(backend_id, range.start, len as u64);
    backend.unmap_buffer(backend_id);
    Ok(())
}

fn is_depth_stencil_format(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT
            | vk::Format::D32_SFLOAT_S8_UINT
            | vk::Format::X8_D24_UNORM_PACK32
            | vk::Format::S8_UINT
    )
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Buffer(pub Handle);

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Texture(pub Handle);

/// Owns the buffer/texture registries (persistent + transient) behind one
/// roof, mirroring how `ResourceManager` owns both slot maps in the
/// teacher's code.
pub struct ResourceContext {
    persistent_buffers: Registry<BufferDescriptor, BufferExtra>,
    transient_buffers: Registry<BufferDescriptor, BufferExtra>,
    persistent_textures: Registry<TextureDescriptor, TextureExtra>,
    transient_textures: Registry<TextureDescriptor, TextureExtra>,
}

impl Default for ResourceContext {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl ResourceContext {
    pub fn new(chunk_size: u32) -> Self {
        Self {
            persistent_buffers: Registry::new_persistent(chunk_size),
            transient_buffers: Registry::new_transient(chunk_size),
            persistent_textures: Registry::new_persistent(chunk_size),
            transient_textures: Registry::new_transient(chunk_size),
        }
    }

    pub fn create_transient_buffer(&mut self, descriptor: BufferDescriptor) -> Buffer {
        let index = self.transient_buffers.allocate(
            descriptor,
            BufferExtra {
                lifecycle: LifecycleState::Declared,
                backend_id: None,
                usage_union: vk::BufferUsageFlags::empty(),
                deferred: Vec::new(),
                immutable_once_initialised: false,
            },
        );
        Buffer(handle::encode(ResourceType::Buffer, HandleFlags::empty(), index))
    }

    /// Invariant 2: a persistent resource must carry a non-empty usage hint
    /// at creation.
    pub fn create_persistent_buffer(
        &mut self,
        descriptor: BufferDescriptor,
        usage_hint: vk::BufferUsageFlags,
        flags: HandleFlags,
    ) -> Result<Buffer> {
        if usage_hint.is_empty() {
            return Err(Error::MissingUsageHint);
        }
        let index = self.persistent_buffers.allocate(
            descriptor,
            BufferExtra {
                lifecycle: LifecycleState::Declared,
                backend_id: None,
                usage_union: usage_hint,
                deferred: Vec::new(),
                immutable_once_initialised: flags.contains(HandleFlags::IMMUTABLE_ONCE_INITIALISED),
            },
        );
        Ok(Buffer(handle::encode(
            ResourceType::Buffer,
            flags | HandleFlags::PERSISTENT,
            index,
        )))
    }

    pub fn create_transient_texture(&mut self, descriptor: TextureDescriptor) -> Texture {
        let is_depth_stencil = is_depth_stencil_format(descriptor.format);
        let index = self.transient_textures.allocate(
            descriptor,
            TextureExtra {
                lifecycle: LifecycleState::Declared,
                backend_id: None,
                usage_union: vk::ImageUsageFlags::empty(),
                is_depth_stencil,
                immutable_once_initialised: false,
            },
        );
        Texture(handle::encode(ResourceType::Texture, HandleFlags::empty(), index))
    }

    /// Invariant 2: a persistent resource must carry a non-empty usage hint
    /// at creation.
    pub fn create_persistent_texture(
        &mut self,
        descriptor: TextureDescriptor,
        usage_hint: vk::ImageUsageFlags,
        flags: HandleFlags,
    ) -> Result<Texture> {
        if usage_hint.is_empty() {
            return Err(Error::MissingUsageHint);
        }
        let is_depth_stencil = is_depth_stencil_format(descriptor.format);
        let index = self.persistent_textures.allocate(
            descriptor,
            TextureExtra {
                lifecycle: LifecycleState::Declared,
                backend_id: None,
                usage_union: usage_hint,
                is_depth_stencil,
                immutable_once_initialised: flags.contains(HandleFlags::IMMUTABLE_ONCE_INITIALISED),
            },
        );
        Ok(Texture(handle::encode(
            ResourceType::Texture,
            flags | HandleFlags::PERSISTENT,
            index,
        )))
    }

    fn texture_registry(&self, handle: Handle) -> Result<(&Registry<TextureDescriptor, TextureExtra>, u32)> {
        let (ty, flags, index) = handle::decode(handle).ok_or(Error::InvalidHandle)?;
        if ty != ResourceType::Texture {
            return Err(Error::InvalidHandle);
        }
        let registry = if flags.contains(HandleFlags::PERSISTENT) {
            &self.persistent_textures
        } else {
            &self.transient_textures
        };
        Ok((registry, index))
    }

    fn texture_registry_mut(&mut self, handle: Handle) -> Result<(&mut Registry<TextureDescriptor, TextureExtra>, u32)> {
        let (ty, flags, index) = handle::decode(handle).ok_or(Error::InvalidHandle)?;
        if ty != ResourceType::Texture {
            return Err(Error::InvalidHandle);
        }
        let registry = if flags.contains(HandleFlags::PERSISTENT) {
            &mut self.persistent_textures
        } else {
            &mut self.transient_textures
        };
        Ok((registry, index))
    }

    pub fn mark_texture_materialized(&mut self, texture: Texture, backend_id: u64) -> Result<()> {
        let (registry, index) = self.texture_registry_mut(texture.0)?;
        let extra = registry.extra_mut(index).ok_or(Error::InvalidHandle)?;
        extra.lifecycle = LifecycleState::Materialized;
        extra.backend_id = Some(backend_id);
        Ok(())
    }

    pub fn texture_lifecycle(&self, texture: Texture) -> Result<LifecycleState> {
        let (registry, index) = self.texture_registry(texture.0)?;
        Ok(registry.extra(index).ok_or(Error::InvalidHandle)?.lifecycle)
    }

    /// Region replace (§4.C): copies `bytes` into the texture through the
    /// backend once it is materialized. A request against a
    /// still-`Declared` texture waits for CPU access rather than racing
    /// materialization, mirroring the design note's CPU-access wait.
    pub fn replace_texture_region<B: crate::backend::Backend>(
        &mut self,
        backend: &mut B,
        texture: Texture,
        bytes: &[u8],
        region: (u32, u32, u32, u32),
        mip_level: u32,
        array_slice: u32,
        bytes_per_row: u32,
        bytes_per_image: u32,
    ) -> Result<()> {
        let (registry, index) = self.texture_registry(texture.0)?;
        let extra = registry.extra(index).ok_or(Error::InvalidHandle)?;
        let backend_id = extra.backend_id.ok_or(Error::InvalidHandle)?;
        backend.copy_to_texture(backend_id, bytes, region, mip_level, array_slice, bytes_per_row, bytes_per_image)?;
        Ok(())
    }

    /// Copy-out (§4.C): reads a region back from the backend. Same
    /// materialization precondition as [`Self::replace_texture_region`].
    pub fn copy_out_texture_region<B: crate::backend::Backend>(
        &mut self,
        backend: &mut B,
        texture: Texture,
        region: (u32, u32, u32, u32),
        mip_level: u32,
        array_slice: u32,
    ) -> Result<Vec<u8>> {
        let (registry, index) = self.texture_registry(texture.0)?;
        let extra = registry.extra(index).ok_or(Error::InvalidHandle)?;
        let backend_id = extra.backend_id.ok_or(Error::InvalidHandle)?;
        Ok(backend.copy_from_texture(backend_id, region, mip_level, array_slice)?)
    }

    pub fn dispose_texture(&mut self, texture: Texture, at_end_of_frame: bool) -> Result<()> {
        let (registry, index) = self.texture_registry_mut(texture.0)?;
        let extra = registry.extra_mut(index).ok_or(Error::InvalidHandle)?;
        if extra.lifecycle == LifecycleState::Disposed {
            warn!("resources: texture {:?} disposed more than once", texture.0);
            return Err(Error::DoubleDispose);
        }
        extra.lifecycle = LifecycleState::Disposed;
        registry.dispose(index, at_end_of_frame);
        Ok(())
    }

    fn buffer_registry(&self, handle: Handle) -> Result<(&Registry<BufferDescriptor, BufferExtra>, u32)> {
        let (ty, flags, index) = handle::decode(handle).ok_or(Error::InvalidHandle)?;
        if ty != ResourceType::Buffer {
            return Err(Error::InvalidHandle);
        }
        let registry = if flags.contains(HandleFlags::PERSISTENT) {
            &self.persistent_buffers
        } else {
            &self.transient_buffers
        };
        Ok((registry, index))
    }

    fn buffer_registry_mut(&mut self, handle: Handle) -> Result<(&mut Registry<BufferDescriptor, BufferExtra>, u32)> {
        let (ty, flags, index) = handle::decode(handle).ok_or(Error::InvalidHandle)?;
        if ty != ResourceType::Buffer {
            return Err(Error::InvalidHandle);
        }
        let registry = if flags.contains(HandleFlags::PERSISTENT) {
            &mut self.persistent_buffers
        } else {
            &mut self.transient_buffers
        };
        Ok((registry, index))
    }

    /// A slice whose backing buffer already has a `backend_id` (it has been
    /// materialized) writes through to the real mapped memory immediately.
    /// One created before materialization is queued and drained by the
    /// analyzer at the resource's first active usage (S4).
    pub fn with_deferred_slice<B: crate::backend::Backend>(
        &mut self,
        backend: &mut B,
        buffer: Buffer,
        range: Range<u64>,
        action: impl FnOnce(&mut [u8]) + Send + 'static,
    ) -> Result<()> {
        let (registry, index) = self.buffer_registry_mut(buffer.0)?;
        let size = registry.descriptor(index).ok_or(Error::InvalidHandle)?.size;
        if range.start > range.end || range.end > size {
            return Err(Error::SliceOutOfRange);
        }
        let backend_id = registry.extra(index).ok_or(Error::InvalidHandle)?.backend_id;
        match backend_id {
            Some(backend_id) => write_mapped_range(backend, backend_id, &range, action)?,
            None => {
                let extra = registry.extra_mut(index).ok_or(Error::InvalidHandle)?;
                extra.deferred.push(DeferredSliceAction {
                    range,
                    apply: Box::new(action),
                });
            }
        }
        Ok(())
    }

    /// Run every queued deferred slice for a transient buffer once the
    /// analyzer has materialized it (invariant 6).
    pub fn drain_deferred_slices<B: crate::backend::Backend>(&mut self, backend: &mut B, buffer: Buffer) -> Result<()> {
        let (registry, index) = self.buffer_registry_mut(buffer.0)?;
        let extra = registry.extra_mut(index).ok_or(Error::InvalidHandle)?;
        debug_assert_eq!(extra.lifecycle, LifecycleState::Materialized);
        let backend_id = extra.backend_id.ok_or(Error::InvalidHandle)?;
        let actions: Vec<DeferredSliceAction> = extra.deferred.drain(..).collect();
        for action in actions {
            write_mapped_range(backend, backend_id, &action.range, action.apply)?;
        }
        Ok(())
    }

    pub fn mark_materialized(&mut self, buffer: Buffer, backend_id: u64) -> Result<()> {
        let (registry, index) = self.buffer_registry_mut(buffer.0)?;
        let extra = registry.extra_mut(index).ok_or(Error::InvalidHandle)?;
        extra.lifecycle = LifecycleState::Materialized;
        extra.backend_id = Some(backend_id);
        Ok(())
    }

    pub fn lifecycle(&self, buffer: Buffer) -> Result<LifecycleState> {
        let (registry, index) = self.buffer_registry(buffer.0)?;
        Ok(registry.extra(index).ok_or(Error::InvalidHandle)?.lifecycle)
    }

    /// Mark a buffer written; rejects the write if it is
    /// `immutableOnceInitialised` and already `INITIALISED`.
    pub fn mark_written(&mut self, buffer: Buffer) -> Result<()> {
        let (registry, index) = self.buffer_registry_mut(buffer.0)?;
        let extra = registry.extra(index).ok_or(Error::InvalidHandle)?;
        let already_initialised = registry
            .state(index)
            .contains(crate::registry::StateFlags::INITIALISED);
        if extra.immutable_once_initialised && already_initialised {
            warn!("resources: rejected write to immutable-once-initialised buffer {:?}", buffer.0);
            return Err(Error::ImmutableResourceRewritten);
        }
        registry.mark_initialised(index);
        Ok(())
    }

    pub fn dispose_buffer(&mut self, buffer: Buffer, at_end_of_frame: bool) -> Result<()> {
        let (registry, index) = self.buffer_registry_mut(buffer.0)?;
        let extra = registry.extra_mut(index).ok_or(Error::InvalidHandle)?;
        if extra.lifecycle == LifecycleState::Disposed {
            warn!("resources: buffer {:?} disposed more than once", buffer.0);
            return Err(Error::DoubleDispose);
        }
        extra.lifecycle = LifecycleState::Disposed;
        registry.dispose(index, at_end_of_frame);
        Ok(())
    }

    pub fn persistent_buffers_mut(&mut self) -> &mut Registry<BufferDescriptor, BufferExtra> {
        &mut self.persistent_buffers
    }

    pub fn transient_buffers_mut(&mut self) -> &mut Registry<BufferDescriptor, BufferExtra> {
        &mut self.transient_buffers
    }

    pub fn persistent_textures_mut(&mut self) -> &mut Registry<TextureDescriptor, TextureExtra> {
        &mut self.persistent_textures
    }

    pub fn transient_textures_mut(&mut self) -> &mut Registry<TextureDescriptor, TextureExtra> {
        &mut self.transient_textures
    }
}

/// A live byte-range view over a buffer with a known access type. On drop, a
/// slice that was written forces a flush to the backend (`didModifyRange`)
/// and sets `INITIALISED` (§4.C).
pub struct BufferSlice<'ctx, B: crate::backend::Backend> {
    context: &'ctx mut ResourceContext,
    backend: &'ctx mut B,
    buffer: Buffer,
    range: Range<u64>,
    access: AccessType,
}

impl<'ctx, B: crate::backend::Backend> BufferSlice<'ctx, B> {
    /// Fails with [`Error::SliceOutOfRange`] if `range` falls outside the
    /// buffer's declared size (§7).
    pub fn new(
        context: &'ctx mut ResourceContext,
        backend: &'ctx mut B,
        buffer: Buffer,
        range: Range<u64>,
        access: AccessType,
    ) -> Result<Self> {
        let (registry, index) = context.buffer_registry(buffer.0)?;
        let size = registry.descriptor(index).ok_or(Error::InvalidHandle)?.size;
        if range.start > range.end || range.end > size {
            return Err(Error::SliceOutOfRange);
        }
        Ok(Self {
            context,
            backend,
            buffer,
            range,
            access,
        })
    }

    pub fn range(&self) -> Range<u64> {
        self.range.clone()
    }

    pub fn access(&self) -> AccessType {
        self.access
    }
}

impl<'ctx, B: crate::backend::Backend> Drop for BufferSlice<'ctx, B> {
    fn drop(&mut self) {
        if !self.access.is_write() {
            return;
        }
        let _ = self.context.mark_written(self.buffer);
        if let Ok((registry, index)) = self.context.buffer_registry(self.buffer.0) {
            if let Some(backend_id) = registry.extra(index).and_then(|extra| extra.backend_id) {
                self.backend
                    .did_modify_range(backend_id, self.range.start, self.range.end - self.range.start);
            }
        }
    }
}
