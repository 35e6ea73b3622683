//! Pass recording (component E).
//!
//! Grounded on the teacher's `render_graph_builder.rs` fluent-builder +
//! `Drop`-commits-the-pass pattern (`TransferPassBuilder2`,
//! `ComputePassBuilder`, `RasterPassBuilder`) and on the tagged-variant
//! design note replacing virtual dispatch over pass kinds.

use std::ops::Range;

use ash::vk;

use crate::handle::Handle;
use crate::usage::{AccessType, UsageList, UsageRecord};
use framegraph_support::FrameArena;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct PassId(pub u32);

/// Queue *preference*, not a hard assignment — a supplemented feature
/// (`render_graph_builder.rs`'s abandoned `QueueType`). The compiler may
/// demote a preferred secondary-queue pass back onto the graphics queue
/// when no such queue is configured.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum QueueType {
    Graphics,
    PreferAsyncCompute,
    PreferAsyncTransfer,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum LoadAction {
    Load,
    Clear,
    DontCare,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum StoreAction {
    Store,
    DontCare,
}

#[derive(Debug, Copy, Clone)]
pub struct AttachmentDescriptor {
    pub texture: Handle,
    pub load: LoadAction,
    pub store: StoreAction,
    pub clear_value: Option<[f32; 4]>,
    pub is_depth_stencil: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RenderTargetDescriptor {
    pub color_attachments: Vec<AttachmentDescriptor>,
    pub depth_stencil_attachment: Option<AttachmentDescriptor>,
}

impl RenderTargetDescriptor {
    /// §4.G subpass-merging test: "same attachments and load/store actions
    /// for every preserved attachment".
    pub fn compatible_for_fusion(&self, other: &RenderTargetDescriptor) -> bool {
        if self.color_attachments.len() != other.color_attachments.len() {
            return false;
        }
        let colors_match = self
            .color_attachments
            .iter()
            .zip(other.color_attachments.iter())
            .all(|(a, b)| a.texture == b.texture && a.store == b.store);
        let depth_match = match (&self.depth_stencil_attachment, &other.depth_stencil_attachment) {
            (Some(a), Some(b)) => a.texture == b.texture && a.store == b.store,
            (None, None) => true,
            _ => false,
        };
        colors_match && depth_match
    }
}

/// Tagged variant replacing virtual dispatch over pass kinds (design note).
/// The executor matches on this to pick the right encoder type.
#[derive(Debug, Clone)]
pub enum RenderPassVariant {
    Draw(RenderTargetDescriptor),
    Compute,
    Blit,
    External,
    Cpu,
}

impl RenderPassVariant {
    pub fn kind(&self) -> PassKind {
        match self {
            RenderPassVariant::Draw(_) => PassKind::Draw,
            RenderPassVariant::Compute => PassKind::Compute,
            RenderPassVariant::Blit => PassKind::Blit,
            RenderPassVariant::External => PassKind::External,
            RenderPassVariant::Cpu => PassKind::Cpu,
        }
    }

    pub fn render_target(&self) -> Option<&RenderTargetDescriptor> {
        match self {
            RenderPassVariant::Draw(rtd) => Some(rtd),
            _ => None,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PassKind {
    Draw,
    Compute,
    Blit,
    External,
    Cpu,
}

/// A recorded pass: its variant payload, the range of command indices it
/// owns within the frame, and debugging metadata. Usage annotations live in
/// the per-resource [`UsageList`]s, cross-referenced by `PassId`.
#[derive(Debug, Clone)]
pub struct RenderPassRecord {
    pub id: PassId,
    pub name: String,
    pub label_color: Option<[f32; 4]>,
    pub variant: RenderPassVariant,
    pub command_range: Range<u32>,
    pub queue_preference: QueueType,
    /// Whether this pass touches a window-handle (swapchain) texture —
    /// drives command-buffer partitioning in the compiler (§4.H).
    pub uses_window_texture: bool,
}

/// Records usages for a single pass into its resource's [`UsageList`]s and
/// hands out monotonically increasing command indices standing in for the
/// backend draw/dispatch/blit calls a concrete encoder would emit. Encoding
/// the actual GPU commands is the backend's job (§1 scope); this recorder
/// only needs the command index each usage is attributed to.
pub struct PassRecorder<'a> {
    pass: PassId,
    next_command_index: u32,
    arena: &'a FrameArena<crate::usage::UsageNode<'a>>,
}

impl<'a> PassRecorder<'a> {
    pub fn new(pass: PassId, first_command_index: u32, arena: &'a FrameArena<crate::usage::UsageNode<'a>>) -> Self {
        Self {
            pass,
            next_command_index: first_command_index,
            arena,
        }
    }

    /// Stand-in for "encode one backend command"; returns the command index
    /// the following usage declarations should be attributed to.
    pub fn advance_command(&mut self) -> u32 {
        let idx = self.next_command_index;
        self.next_command_index += 1;
        idx
    }

    pub fn declare_usage(
        &self,
        list: &UsageList<'a>,
        command_index: u32,
        access_type: AccessType,
        stage_mask: vk::PipelineStageFlags2,
    ) {
        list.push(
            self.arena,
            UsageRecord {
                pass: self.pass,
                command_range: command_index..command_index + 1,
                access_type,
                stage_mask,
            },
        );
    }

    pub fn command_count(&self) -> u32 {
        self.next_command_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attachment(texture: Handle) -> AttachmentDescriptor {
        AttachmentDescriptor {
            texture,
            load: LoadAction::Clear,
            store: StoreAction::Store,
            clear_value: None,
            is_depth_stencil: false,
        }
    }

    #[test]
    fn fusion_requires_identical_attachments_and_store_actions() {
        let a = RenderTargetDescriptor {
            color_attachments: vec![attachment(Handle::from_raw(1))],
            depth_stencil_attachment: None,
        };
        let b = RenderTargetDescriptor {
            color_attachments: vec![attachment(Handle::from_raw(1))],
            depth_stencil_attachment: None,
        };
        assert!(a.compatible_for_fusion(&b));

        let c = RenderTargetDescriptor {
            color_attachments: vec![attachment(Handle::from_raw(2))],
            depth_stencil_attachment: None,
        };
        assert!(!a.compatible_for_fusion(&c));
    }

    #[test]
    fn recorder_hands_out_increasing_command_indices() {
        let arena = FrameArena::new("test");
        let mut rec = PassRecorder::new(PassId(0), 0, &arena);
        assert_eq!(rec.advance_command(), 0);
        assert_eq!(rec.advance_command(), 1);
        assert_eq!(rec.command_count(), 2);
    }
}
