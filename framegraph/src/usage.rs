//! Per-resource usage tracking (component F).
//!
//! An append-only singly linked list per resource, allocated out of the
//! per-frame tagged heap so the whole structure is freed as one unit at
//! frame end (`resourceCommandArrayTag` in the design notes) — grounded on
//! `framegraph_support::arena::FrameArena`, built for exactly this shape.
//! The teacher has no direct precedent (its render-graph drafts use plain
//! `Vec<ShaderResourceUsage>` per resource); the linked-list-over-arena
//! structure follows from the "lazy, append-only" + "freed as one unit"
//! requirements together.

use std::cell::Cell;
use std::ops::Range;

use ash::vk;

use crate::pass::PassId;

/// How a pass touches a resource. Mirrors `spec.md` §3's usage-record access
/// types exactly; this is a strict superset of the teacher's
/// `BufferAccessType`/`ImageAccessType`/`ShaderResourceUsage::resource_type`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum AccessType {
    Read,
    Write,
    ReadWrite,
    ConstantBuffer,
    BlitSource,
    BlitDestination,
    BlitSynchronisation,
    VertexBuffer,
    IndexBuffer,
    IndirectBuffer,
    Sampler,
    InputAttachment,
    ReadWriteRenderTarget,
    WriteOnlyRenderTarget,
    InputAttachmentRenderTarget,
    UnusedRenderTarget,
    UnusedArgumentBuffer,
}

impl AccessType {
    /// Invariant 2 / the pairwise rule's "neither is a write" test.
    pub fn is_write(self) -> bool {
        matches!(
            self,
            AccessType::Write
                | AccessType::ReadWrite
                | AccessType::BlitDestination
                | AccessType::ReadWriteRenderTarget
                | AccessType::WriteOnlyRenderTarget
        )
    }

    /// §4.G rule 2/5: usages that participate in render-target subpass
    /// fusion rather than standalone barriers.
    pub fn is_render_target(self) -> bool {
        matches!(
            self,
            AccessType::ReadWriteRenderTarget
                | AccessType::WriteOnlyRenderTarget
                | AccessType::InputAttachmentRenderTarget
                | AccessType::UnusedRenderTarget
        )
    }

    /// §4.G tie-break: these usages contribute to usage-flag unions but
    /// never introduce a dependency edge.
    pub fn never_introduces_dependency(self) -> bool {
        matches!(
            self,
            AccessType::UnusedRenderTarget | AccessType::UnusedArgumentBuffer
        )
    }

    /// The access mask this usage implies, used when no explicit backend
    /// access is recorded alongside it (textures/buffers sharing a uniform
    /// translation table — see `analyzer::access_mask_for`).
    pub fn vk_access(self) -> vk::AccessFlags2 {
        use vk::AccessFlags2 as A;
        match self {
            AccessType::Read => A::SHADER_READ,
            AccessType::Write => A::SHADER_WRITE,
            AccessType::ReadWrite => A::SHADER_READ | A::SHADER_WRITE,
            AccessType::ConstantBuffer => A::UNIFORM_READ,
            AccessType::BlitSource => A::TRANSFER_READ,
            AccessType::BlitDestination => A::TRANSFER_WRITE,
            AccessType::BlitSynchronisation => A::TRANSFER_READ | A::TRANSFER_WRITE,
            AccessType::VertexBuffer => A::VERTEX_ATTRIBUTE_READ,
            AccessType::IndexBuffer => A::INDEX_READ,
            AccessType::IndirectBuffer => A::INDIRECT_COMMAND_READ,
            AccessType::Sampler => A::SHADER_READ,
            AccessType::InputAttachment => A::INPUT_ATTACHMENT_READ,
            AccessType::ReadWriteRenderTarget => A::COLOR_ATTACHMENT_READ | A::COLOR_ATTACHMENT_WRITE,
            AccessType::WriteOnlyRenderTarget => A::COLOR_ATTACHMENT_WRITE,
            AccessType::InputAttachmentRenderTarget => A::INPUT_ATTACHMENT_READ,
            AccessType::UnusedRenderTarget => A::empty(),
            AccessType::UnusedArgumentBuffer => A::empty(),
        }
    }

    /// The image layout this usage requires, used by the analyzer's layout
    /// transitions (invariant 3).
    pub fn image_layout(self, is_depth_stencil: bool) -> vk::ImageLayout {
        match self {
            AccessType::BlitSource => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            AccessType::BlitDestination => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            AccessType::ReadWriteRenderTarget | AccessType::WriteOnlyRenderTarget if is_depth_stencil => {
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
            }
            AccessType::ReadWriteRenderTarget | AccessType::WriteOnlyRenderTarget => {
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
            }
            AccessType::InputAttachmentRenderTarget if is_depth_stencil => {
                vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
            }
            AccessType::InputAttachmentRenderTarget => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            AccessType::Read | AccessType::ConstantBuffer | AccessType::Sampler | AccessType::InputAttachment => {
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
            }
            AccessType::Write | AccessType::ReadWrite => vk::ImageLayout::GENERAL,
            _ => vk::ImageLayout::GENERAL,
        }
    }
}

/// A usage with `stages == cpuBeforeRender` drives materialization but is
/// excluded from the GPU ordering graph (§4.G tie-break).
pub const CPU_BEFORE_RENDER: vk::PipelineStageFlags2 = vk::PipelineStageFlags2::HOST;

#[derive(Debug, Copy, Clone)]
pub struct UsageRecord {
    pub pass: PassId,
    pub command_range: Range<u32>,
    pub access_type: AccessType,
    pub stage_mask: vk::PipelineStageFlags2,
}

impl UsageRecord {
    pub fn drives_gpu_ordering(&self) -> bool {
        !self.stage_mask.contains(CPU_BEFORE_RENDER) || self.stage_mask != CPU_BEFORE_RENDER
    }
}

pub struct UsageNode<'a> {
    pub record: UsageRecord,
    next: Cell<Option<&'a UsageNode<'a>>>,
}

/// An append-only usage list for a single resource, node-allocated from a
/// [`framegraph_support::FrameArena`].
pub struct UsageList<'a> {
    head: Cell<Option<&'a UsageNode<'a>>>,
    tail: Cell<Option<&'a UsageNode<'a>>>,
}

impl<'a> Default for UsageList<'a> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> UsageList<'a> {
    pub fn new() -> Self {
        Self {
            head: Cell::new(None),
            tail: Cell::new(None),
        }
    }

    pub fn push(&self, arena: &'a framegraph_support::FrameArena<UsageNode<'a>>, record: UsageRecord) {
        let node = arena.alloc(UsageNode {
            record,
            next: Cell::new(None),
        });
        match self.tail.get() {
            Some(tail) => tail.next.set(Some(node)),
            None => self.head.set(Some(node)),
        }
        self.tail.set(Some(node));
    }

    pub fn iter(&self) -> UsageIter<'a> {
        UsageIter { cur: self.head.get() }
    }

    pub fn is_empty(&self) -> bool {
        self.head.get().is_none()
    }
}

pub struct UsageIter<'a> {
    cur: Option<&'a UsageNode<'a>>,
}

impl<'a> Iterator for UsageIter<'a> {
    type Item = UsageRecord;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.cur?;
        self.cur = node.next.get();
        Some(node.record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framegraph_support::FrameArena;

    fn record(access: AccessType) -> UsageRecord {
        UsageRecord {
            pass: PassId(0),
            command_range: 0..1,
            access_type: access,
            stage_mask: vk::PipelineStageFlags2::COMPUTE_SHADER,
        }
    }

    #[test]
    fn iterates_first_to_last_in_push_order() {
        let arena = FrameArena::new("usage-test");
        let list = UsageList::new();
        list.push(&arena, record(AccessType::Write));
        list.push(&arena, record(AccessType::Read));
        list.push(&arena, record(AccessType::Read));
        let accesses: Vec<_> = list.iter().map(|u| u.access_type).collect();
        assert_eq!(
            accesses,
            vec![AccessType::Write, AccessType::Read, AccessType::Read]
        );
    }

    #[test]
    fn unused_variants_never_introduce_dependencies() {
        assert!(AccessType::UnusedRenderTarget.never_introduces_dependency());
        assert!(AccessType::UnusedArgumentBuffer.never_introduces_dependency());
        assert!(!AccessType::Write.never_introduces_dependency());
    }
}
