//! Opaque resource handles.
//!
//! Grounded on `neptune_vulkan`'s `slotmap`-keyed resources, which this crate
//! replaces with a hand-rolled encoding so the handle carries its own type
//! and lifecycle flags rather than relying on a generational key type per
//! resource kind. Layout is `[type:8][pad:8][flags:16][index:32]`, matching
//! the bit ranges the distilled design calls for.

use std::fmt;

/// The kind of resource a [`Handle`] refers to. Bits 48-55 of the encoded
/// value.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(u8)]
pub enum ResourceType {
    Buffer = 0,
    Texture = 1,
    Sampler = 2,
    ThreadgroupMemory = 3,
    ArgumentBuffer = 4,
    ArgumentBufferArray = 5,
    ImageblockData = 6,
    Imageblock = 7,
}

impl ResourceType {
    fn from_bits(bits: u8) -> Option<Self> {
        Some(match bits {
            0 => Self::Buffer,
            1 => Self::Texture,
            2 => Self::Sampler,
            3 => Self::ThreadgroupMemory,
            4 => Self::ArgumentBuffer,
            5 => Self::ArgumentBufferArray,
            6 => Self::ImageblockData,
            7 => Self::Imageblock,
            _ => return None,
        })
    }
}

bitflags::bitflags! {
    /// Lifecycle flags. Bits 32-47 of the encoded value.
    #[derive(Debug, Copy, Clone, Eq, PartialEq)]
    pub struct HandleFlags: u16 {
        /// Lives across frames; allocated from the persistent registry; must
        /// declare a usage hint at creation.
        const PERSISTENT = 1 << 0;
        /// Backs a swapchain image; must be disposed every frame even
        /// though it is persistent-like.
        const WINDOW_HANDLE = 1 << 1;
        /// Retained for N frames (read-after-write across frames); uses the
        /// persistent registry but has distinct creation/use semantics.
        const HISTORY_BUFFER = 1 << 2;
        /// Backing memory was registered by the application; the core never
        /// frees it.
        const EXTERNAL_OWNERSHIP = 1 << 3;
        /// After the first write, further writes are rejected.
        const IMMUTABLE_ONCE_INITIALISED = 1 << 4;
        /// A view into another resource; transient-only.
        const RESOURCE_VIEW = 1 << 5;
    }
}

const TYPE_SHIFT: u32 = 48;
const FLAGS_SHIFT: u32 = 32;
const INDEX_MASK: u64 = 0x1FFF_FFFF; // low 29 bits of the 32-bit index field
const FLAGS_MASK: u64 = 0xFFFF;
const TYPE_MASK: u64 = 0xFF;

/// A 64-bit opaque handle: `[type:8][pad:8][flags:16][index:32]`.
///
/// Equality and hashing are defined over the raw bits. `Handle::INVALID`
/// (all bits set) is the sentinel "no resource" value; it is never returned
/// by `encode`.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct Handle(u64);

impl Handle {
    pub const INVALID: Handle = Handle(u64::MAX);

    pub fn is_valid(self) -> bool {
        self.0 != u64::MAX
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn from_raw(raw: u64) -> Self {
        Handle(raw)
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_valid() {
            return write!(f, "Handle(INVALID)");
        }
        let (ty, flags, index) = decode(*self).expect("Handle held invalid type bits");
        write!(f, "Handle({:?}, {:?}, index={})", ty, flags, index)
    }
}

/// Encode a handle. `index` must fit in 29 bits; callers (the registries)
/// never hand out more than `2^29` live slots.
pub fn encode(resource_type: ResourceType, flags: HandleFlags, index: u32) -> Handle {
    debug_assert!(
        (index as u64) <= INDEX_MASK,
        "resource index {index} does not fit in 29 bits"
    );
    let bits = ((resource_type as u64) << TYPE_SHIFT)
        | ((flags.bits() as u64 & FLAGS_MASK) << FLAGS_SHIFT)
        | (index as u64 & INDEX_MASK);
    Handle(bits)
}

/// Decode a handle back into its constituent parts. Returns `None` when the
/// handle is `INVALID` or carries unknown type bits (a fatal programmer
/// error per the error-handling design — callers should treat `None` as
/// [`crate::Error::InvalidHandle`]).
pub fn decode(handle: Handle) -> Option<(ResourceType, HandleFlags, u32)> {
    if !handle.is_valid() {
        return None;
    }
    let type_bits = ((handle.0 >> TYPE_SHIFT) & TYPE_MASK) as u8;
    let resource_type = ResourceType::from_bits(type_bits)?;
    let flags_bits = ((handle.0 >> FLAGS_SHIFT) & FLAGS_MASK) as u16;
    let flags = HandleFlags::from_bits_truncate(flags_bits);
    let index = (handle.0 & INDEX_MASK) as u32;
    Some((resource_type, flags, index))
}
