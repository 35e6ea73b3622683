//! Frame graph core: resource registries, pass recording, dependency
//! analysis, frame compilation, execution, and a GPU resource uploader.
//!
//! Mirrors `neptune_vulkan`'s top-level shape (`Error`, `Result`, a
//! `MemoryLocation` re-export, module-per-concern layout) but implements the
//! in-memory frame-graph model instead of a concrete Vulkan backend.

#[macro_use]
extern crate log;

pub mod analyzer;
pub mod argument_buffer;
pub mod backend;
pub mod compiler;
pub mod executor;
pub mod frame;
pub mod graph;
pub mod handle;
pub mod pass;
pub mod registry;
pub mod resources;
pub mod uploader;
pub mod usage;

pub use gpu_allocator::MemoryLocation;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Vk(#[from] ash::vk::Result),
    #[error(transparent)]
    GpuAlloc(#[from] gpu_allocator::AllocationError),
    #[error(transparent)]
    Backend(#[from] backend::BackendError),

    /// A handle decoded with unknown type bits, or did not name the
    /// resource kind the caller expected. Fatal programmer error (§7).
    #[error("handle decoded to an unknown or mismatched resource type")]
    InvalidHandle,

    /// A persistent resource was created without a usage hint. Fatal
    /// programmer error (§7, invariant 2).
    #[error("persistent resources must declare a non-empty usage hint at creation")]
    MissingUsageHint,

    /// A buffer slice's byte range fell outside the backing resource.
    #[error("slice range is out of bounds for the underlying resource")]
    SliceOutOfRange,

    /// A handle was disposed more than once.
    #[error("resource handle disposed more than once")]
    DoubleDispose,

    /// A write was attempted on an `immutableOnceInitialised` resource that
    /// was already initialised.
    #[error("resource is immutable once initialised and has already been written")]
    ImmutableResourceRewritten,

    #[error("{0}")]
    StringError(String),
}

impl Error {
    pub fn string(message: impl Into<String>) -> Self {
        Error::StringError(message.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Tunables for the chunked registries (§3, §4.B).
#[derive(Debug, Copy, Clone)]
pub struct RegistryConfig {
    pub chunk_size: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            chunk_size: registry::DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Tunables for one frame graph instance (§4.D, §5).
#[derive(Debug, Copy, Clone)]
pub struct FrameGraphConfig {
    pub frames_in_flight: u32,
    pub registry: RegistryConfig,
}

impl Default for FrameGraphConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            registry: RegistryConfig::default(),
        }
    }
}

/// Tunables for the GPU resource uploader (§4.J).
#[derive(Debug, Copy, Clone)]
pub struct UploaderConfig {
    pub max_upload_size: usize,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            max_upload_size: 128 * 1024 * 1024,
        }
    }
}
