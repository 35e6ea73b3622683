//! The backend and job-manager contracts (§6).
//!
//! Concrete Vulkan/Metal backends live outside this workspace; this module
//! only defines the boundary. Grounded on `neptune_vulkan::device::AshDevice`
//! for the shape of "what a backend owns" and on `resource_managers.rs` for
//! the allocate/map/copy operations the core actually calls.

use crate::analyzer::CompactedResourceCommand;
use crate::handle::Handle;
use ash::vk;

/// Opaque backend-reported failure, passed through `Error::Backend` without
/// the core core interpreting it.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error(transparent)]
    Vulkan(#[from] vk::Result),
    #[error(transparent)]
    Allocation(#[from] gpu_allocator::AllocationError),
    #[error("{0}")]
    Other(String),
}

/// A union of the per-resource usage flags the analyzer computed while
/// walking a resource's usage list, handed to the backend at materialization
/// time so it can allocate with exactly the capabilities that will be used.
#[derive(Debug, Default, Copy, Clone)]
pub struct ResourceUsageFlags {
    pub buffer_usage: vk::BufferUsageFlags,
    pub image_usage: vk::ImageUsageFlags,
}

/// The completion state of a submitted command buffer, reported
/// asynchronously by the backend once its timeline semaphore reaches the
/// stamped value.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CompletionStatus {
    Success,
    Failed,
}

/// What the core requires from a concrete graphics backend. A real
/// implementation would hold a `vk::Device`/`MTLDevice` and an allocator;
/// this crate only ever calls through the trait.
pub trait Backend {
    /// Allocate (or realize an alias for) a transient or first-used
    /// persistent buffer/texture with the given usage union. Returns an
    /// opaque backend resource id that the core never interprets beyond
    /// handing it back on later calls.
    fn materialize_buffer(&mut self, handle: Handle, usage: ResourceUsageFlags) -> Result<u64, BackendError>;
    fn materialize_texture(&mut self, handle: Handle, usage: ResourceUsageFlags) -> Result<u64, BackendError>;

    fn map_buffer(&mut self, backend_id: u64) -> Result<*mut u8, BackendError>;
    fn unmap_buffer(&mut self, backend_id: u64);
    fn did_modify_range(&mut self, backend_id: u64, offset: u64, len: u64);

    fn copy_to_texture(
        &mut self,
        backend_id: u64,
        bytes: &[u8],
        region: (u32, u32, u32, u32),
        mip_level: u32,
        array_slice: u32,
        bytes_per_row: u32,
        bytes_per_image: u32,
    ) -> Result<(), BackendError>;

    fn copy_from_texture(
        &mut self,
        backend_id: u64,
        region: (u32, u32, u32, u32),
        mip_level: u32,
        array_slice: u32,
    ) -> Result<Vec<u8>, BackendError>;

    fn dispose_resource(&mut self, backend_id: u64);

    /// Record a flattened stream of compacted resource commands (barriers,
    /// events) into whatever backend command buffer is currently open on
    /// `queue` (§4.D: 0 = graphics, 1 = async compute, 2 = async transfer).
    fn record_resource_commands(&mut self, queue: u32, commands: &[CompactedResourceCommand]) -> Result<(), BackendError>;

    /// Submit the command buffer currently open on `queue`, signalling
    /// `timeline_value` on that queue's timeline semaphore once complete
    /// (§4.D/§5: submission is serialized per queue, not per frame).
    fn submit(&mut self, queue: u32, timeline_value: u64) -> Result<(), BackendError>;

    /// Poll (non-blocking) whether every queue's timeline has reached
    /// `timeline_value`.
    fn timeline_reached(&self, timeline_value: u64) -> bool;
}

/// Mirrors `spec.md`'s job-manager contract: the executor may hand
/// independent pass bodies to a worker pool supplied by the host
/// application.
pub trait JobManager {
    fn run_async(&self, priority: i32, body: Box<dyn FnOnce() + Send + 'static>);
    fn sync_on_main_thread(&self, body: Box<dyn FnOnce() + Send + 'static>);
}

/// A `JobManager` that runs everything inline on the calling thread —
/// useful for tests and for hosts that do not supply a worker pool.
pub struct InlineJobManager;

impl JobManager for InlineJobManager {
    fn run_async(&self, _priority: i32, body: Box<dyn FnOnce() + Send + 'static>) {
        body();
    }

    fn sync_on_main_thread(&self, body: Box<dyn FnOnce() + Send + 'static>) {
        body();
    }
}
