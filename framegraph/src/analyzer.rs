//! Dependency analyzer (component G) — the center of gravity.
//!
//! Grounded on `resource_managers.rs`'s `BufferResourceAccess::get_barrier_flags`/
//! `ImageResourceAccess::get_barrier_flags` (stage/access/layout translation
//! tables) and `render_graph.rs`'s `BufferBarrierSource`/`ImageBarrierSource`
//! (`FirstUsage` vs `Precalculated`) for the barrier-placement shape. The
//! pairwise-usage walk and subpass/event decision tree follow `spec.md`
//! §4.G, which the open questions in §9 say was itself reconstructed from a
//! large commented-out block in the original Vulkan context.

use ash::vk;

use crate::handle::Handle;
use crate::pass::PassId;
use crate::usage::{AccessType, UsageRecord};

pub type EventId = u32;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Order {
    Before,
    After,
}

#[derive(Debug, Copy, Clone)]
pub struct MemoryBarrier {
    pub src_stage: vk::PipelineStageFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_access: vk::AccessFlags2,
}

#[derive(Debug, Copy, Clone)]
pub struct BufferBarrier {
    pub buffer: Handle,
    pub src_stage: vk::PipelineStageFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_access: vk::AccessFlags2,
}

#[derive(Debug, Copy, Clone)]
pub struct ImageBarrier {
    pub image: Handle,
    pub src_stage: vk::PipelineStageFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_access: vk::AccessFlags2,
    pub src_layout: vk::ImageLayout,
    pub dst_layout: vk::ImageLayout,
}

#[derive(Debug, Copy, Clone)]
pub struct SubpassDependency {
    pub src_subpass: Option<u32>,
    pub dst_subpass: Option<u32>,
    pub src_stage: vk::PipelineStageFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_access: vk::AccessFlags2,
}

/// The opcode vocabulary the compiler flattens the analyzer's output into
/// (§4.H: "a compacted array of backend-specific opcodes").
#[derive(Debug, Clone)]
pub enum CompactedResourceCommand {
    SignalEvent {
        event: EventId,
    },
    WaitForEvents {
        events: Vec<EventId>,
        buffer_barriers: Vec<BufferBarrier>,
        image_barriers: Vec<ImageBarrier>,
    },
    PipelineBarrier {
        memory_barriers: Vec<MemoryBarrier>,
        buffer_barriers: Vec<BufferBarrier>,
        image_barriers: Vec<ImageBarrier>,
    },
    SubpassDependency(SubpassDependency),
}

/// A compacted resource command paired with the `(commandIndex, order)` key
/// the compiler sorts by before flattening (§4.H).
#[derive(Debug, Clone)]
pub struct ScheduledCommand {
    pub command_index: u32,
    pub order: Order,
    pub op: CompactedResourceCommand,
}

/// Which queue a pass actually landed on, after the compiler resolved
/// `QueueType` preferences against the configured queue set.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct ResolvedQueue(pub u32);

/// Where a pass sits with respect to render-pass fusion: `Some((group,
/// subpass))` when it was merged into a fused render pass, `None` when it
/// stands alone outside any render pass (compute/blit/external/cpu, or an
/// unfused draw pass treated as its own single-subpass group by the
/// caller).
pub type SubpassOf<'a> = dyn Fn(PassId) -> Option<(u32, u32)> + 'a;
pub type QueueOf<'a> = dyn Fn(PassId) -> ResolvedQueue + 'a;

/// Allocates monotonically increasing event ids for cross-queue
/// synchronization within one frame.
#[derive(Default)]
pub struct EventAllocator(EventId);

impl EventAllocator {
    pub fn new() -> Self {
        Self(0)
    }

    pub fn next(&mut self) -> EventId {
        let id = self.0;
        self.0 += 1;
        id
    }
}

/// Runs the pairwise rule (§4.G) over one resource's active usage list,
/// producing the compacted commands needed to order every write-involving
/// adjacent pair.
pub fn analyze_resource(
    resource: Handle,
    is_texture: bool,
    is_depth_stencil: bool,
    usages: &[UsageRecord],
    subpass_of: &SubpassOf,
    queue_of: &QueueOf,
    events: &mut EventAllocator,
) -> Vec<ScheduledCommand> {
    let active: Vec<UsageRecord> = usages.iter().copied().filter(|u| u.drives_gpu_ordering()).collect();
    let mut out = Vec::new();

    for pair in active.windows(2) {
        let (u1, u2) = (pair[0], pair[1]);

        // Rule 1: neither is a write -> no dependency.
        if !(u1.access_type.is_write() || u2.access_type.is_write()) {
            continue;
        }
        if u1.access_type.never_introduces_dependency() || u2.access_type.never_introduces_dependency() {
            continue;
        }

        let sp1 = subpass_of(u1.pass);
        let sp2 = subpass_of(u2.pass);

        // Rule 2: both the same render-target kind in the same render pass
        // -> covered by the subpass's own self-dependency, nothing to emit.
        if u1.access_type == u2.access_type
            && u1.access_type.is_render_target()
            && sp1.map(|(g, _)| g) == sp2.map(|(g, _)| g)
            && sp1.is_some()
        {
            continue;
        }

        // Redundant write-after-write with identical visibility — only
        // within the same pass (e.g. two usages from one fused subpass);
        // across passes the execution order itself still needs a barrier
        // even when the access/stage masks happen to match (see S1).
        if u1.pass == u2.pass
            && u1.access_type.is_write()
            && u2.access_type.is_write()
            && u1.access_type.vk_access() == u2.access_type.vk_access()
            && u1.stage_mask == u2.stage_mask
        {
            continue;
        }

        let src_stage = u1.stage_mask;
        let dst_stage = u2.stage_mask;
        let src_access = u1.access_type.vk_access();
        let dst_access = u2.access_type.vk_access();
        let src_layout = if is_texture {
            Some(u1.access_type.image_layout(is_depth_stencil))
        } else {
            None
        };
        let dst_layout = if is_texture {
            Some(u2.access_type.image_layout(is_depth_stencil))
        } else {
            None
        };

        let q1 = queue_of(u1.pass);
        let q2 = queue_of(u2.pass);

        if q1 != q2 {
            // Different queues: signal after the source, wait (with a
            // layout-transitioning barrier for textures) before the
            // destination.
            let event = events.next();
            out.push(ScheduledCommand {
                command_index: u1.command_range.end.saturating_sub(1),
                order: Order::After,
                op: CompactedResourceCommand::SignalEvent { event },
            });
            let image_barriers = if is_texture {
                vec![ImageBarrier {
                    image: resource,
                    src_stage,
                    dst_stage,
                    src_access,
                    dst_access,
                    src_layout: src_layout.unwrap(),
                    dst_layout: dst_layout.unwrap(),
                }]
            } else {
                Vec::new()
            };
            let buffer_barriers = if is_texture {
                Vec::new()
            } else {
                vec![BufferBarrier {
                    buffer: resource,
                    src_stage,
                    dst_stage,
                    src_access,
                    dst_access,
                }]
            };
            out.push(ScheduledCommand {
                command_index: u2.command_range.start,
                order: Order::Before,
                op: CompactedResourceCommand::WaitForEvents {
                    events: vec![event],
                    buffer_barriers,
                    image_barriers,
                },
            });
            continue;
        }

        match (sp1, sp2) {
            (Some((g1, s1)), Some((g2, s2))) if g1 == g2 => {
                // Same render pass.
                let dep = SubpassDependency {
                    src_subpass: Some(s1),
                    dst_subpass: Some(s2),
                    src_stage,
                    dst_stage,
                    src_access,
                    dst_access,
                };
                out.push(ScheduledCommand {
                    command_index: u2.command_range.start,
                    order: Order::Before,
                    op: CompactedResourceCommand::SubpassDependency(dep),
                });
                if s1 == s2 {
                    // src == dst subpass: also a pipeline barrier inside
                    // the subpass, layouts coerced to GENERAL.
                    let image_barriers = if is_texture {
                        vec![ImageBarrier {
                            image: resource,
                            src_stage,
                            dst_stage,
                            src_access,
                            dst_access,
                            src_layout: vk::ImageLayout::GENERAL,
                            dst_layout: vk::ImageLayout::GENERAL,
                        }]
                    } else {
                        Vec::new()
                    };
                    let buffer_barriers = if is_texture {
                        Vec::new()
                    } else {
                        vec![BufferBarrier {
                            buffer: resource,
                            src_stage,
                            dst_stage,
                            src_access,
                            dst_access,
                        }]
                    };
                    out.push(ScheduledCommand {
                        command_index: u2.command_range.start,
                        order: Order::Before,
                        op: CompactedResourceCommand::PipelineBarrier {
                            memory_barriers: Vec::new(),
                            buffer_barriers,
                            image_barriers,
                        },
                    });
                }
            }
            (None, Some(_)) => {
                // Boundary: source outside any render pass, destination
                // inside one -> attach to the first command of the
                // destination.
                out.push(barrier_command(
                    resource, is_texture, src_stage, dst_stage, src_access, dst_access, src_layout, dst_layout,
                    u2.command_range.start, Order::Before,
                ));
            }
            (Some(_), None) => {
                // Boundary: destination outside, source inside -> attach to
                // the last command of the source's render pass.
                out.push(barrier_command(
                    resource, is_texture, src_stage, dst_stage, src_access, dst_access, src_layout, dst_layout,
                    u1.command_range.end.saturating_sub(1), Order::After,
                ));
            }
            _ => {
                // Same queue, neither in a render pass: a single pipeline
                // barrier before the destination.
                out.push(barrier_command(
                    resource, is_texture, src_stage, dst_stage, src_access, dst_access, src_layout, dst_layout,
                    u2.command_range.start, Order::Before,
                ));
            }
        }
    }

    out
}

#[allow(clippy::too_many_arguments)]
fn barrier_command(
    resource: Handle,
    is_texture: bool,
    src_stage: vk::PipelineStageFlags2,
    dst_stage: vk::PipelineStageFlags2,
    src_access: vk::AccessFlags2,
    dst_access: vk::AccessFlags2,
    src_layout: Option<vk::ImageLayout>,
    dst_layout: Option<vk::ImageLayout>,
    command_index: u32,
    order: Order,
) -> ScheduledCommand {
    let op = if is_texture {
        CompactedResourceCommand::PipelineBarrier {
            memory_barriers: Vec::new(),
            buffer_barriers: Vec::new(),
            image_barriers: vec![ImageBarrier {
                image: resource,
                src_stage,
                dst_stage,
                src_access,
                dst_access,
                src_layout: src_layout.unwrap(),
                dst_layout: dst_layout.unwrap(),
            }],
        }
    } else {
        CompactedResourceCommand::PipelineBarrier {
            memory_barriers: Vec::new(),
            buffer_barriers: vec![BufferBarrier {
                buffer: resource,
                src_stage,
                dst_stage,
                src_access,
                dst_access,
            }],
            image_barriers: Vec::new(),
        }
    };
    ScheduledCommand {
        command_index,
        order,
        op,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(pass: u32, range: std::ops::Range<u32>, access: AccessType, stage: vk::PipelineStageFlags2) -> UsageRecord {
        UsageRecord {
            pass: PassId(pass),
            command_range: range,
            access_type: access,
            stage_mask: stage,
        }
    }

    fn same_queue(_: PassId) -> ResolvedQueue {
        ResolvedQueue(0)
    }

    fn no_subpass(_: PassId) -> Option<(u32, u32)> {
        None
    }

    /// S1: WAW in one compute encoder -> one pipeline barrier, no events.
    #[test]
    fn waw_same_queue_emits_single_pipeline_barrier() {
        let buf = Handle::from_raw(1);
        let usages = vec![
            usage(0, 0..1, AccessType::Write, vk::PipelineStageFlags2::COMPUTE_SHADER),
            usage(1, 1..2, AccessType::Write, vk::PipelineStageFlags2::COMPUTE_SHADER),
        ];
        let mut events = EventAllocator::new();
        let scheduled = analyze_resource(buf, false, false, &usages, &no_subpass, &same_queue, &mut events);
        assert_eq!(scheduled.len(), 1);
        match &scheduled[0].op {
            CompactedResourceCommand::PipelineBarrier { buffer_barriers, .. } => {
                assert_eq!(buffer_barriers.len(), 1);
                assert_eq!(buffer_barriers[0].src_access, vk::AccessFlags2::SHADER_WRITE);
                assert_eq!(buffer_barriers[0].dst_access, vk::AccessFlags2::SHADER_WRITE);
            }
            other => panic!("expected PipelineBarrier, got {other:?}"),
        }
    }

    /// S2: RAW across queues -> signal then wait-with-barrier.
    #[test]
    fn raw_across_queues_emits_signal_then_wait() {
        let buf = Handle::from_raw(2);
        let usages = vec![
            usage(0, 0..1, AccessType::Write, vk::PipelineStageFlags2::COMPUTE_SHADER),
            usage(1, 1..2, AccessType::Read, vk::PipelineStageFlags2::FRAGMENT_SHADER),
        ];
        let queue_of = |p: PassId| ResolvedQueue(p.0);
        let mut events = EventAllocator::new();
        let scheduled = analyze_resource(buf, false, false, &usages, &no_subpass, &queue_of, &mut events);
        assert_eq!(scheduled.len(), 2);
        assert!(matches!(scheduled[0].op, CompactedResourceCommand::SignalEvent { .. }));
        match &scheduled[1].op {
            CompactedResourceCommand::WaitForEvents { buffer_barriers, .. } => {
                assert_eq!(buffer_barriers[0].src_access, vk::AccessFlags2::SHADER_WRITE);
                assert_eq!(buffer_barriers[0].dst_access, vk::AccessFlags2::SHADER_READ);
            }
            other => panic!("expected WaitForEvents, got {other:?}"),
        }
    }

    #[test]
    fn read_after_read_emits_no_dependency() {
        let buf = Handle::from_raw(3);
        let usages = vec![
            usage(0, 0..1, AccessType::Read, vk::PipelineStageFlags2::COMPUTE_SHADER),
            usage(1, 1..2, AccessType::Read, vk::PipelineStageFlags2::COMPUTE_SHADER),
        ];
        let mut events = EventAllocator::new();
        let scheduled = analyze_resource(buf, false, false, &usages, &no_subpass, &same_queue, &mut events);
        assert!(scheduled.is_empty());
    }

    /// S3: a texture written as color attachment in subpass 0 and sampled
    /// in subpass 1 of the same fused render pass gets a subpass
    /// dependency, not a standalone barrier.
    #[test]
    fn fused_subpasses_emit_subpass_dependency() {
        let tex = Handle::from_raw(5);
        let usages = vec![
            usage(
                0,
                0..1,
                AccessType::WriteOnlyRenderTarget,
                vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            ),
            usage(
                1,
                1..2,
                AccessType::InputAttachmentRenderTarget,
                vk::PipelineStageFlags2::FRAGMENT_SHADER,
            ),
        ];
        let subpass_of = |p: PassId| Some((0u32, p.0));
        let mut events = EventAllocator::new();
        let scheduled = analyze_resource(tex, true, false, &usages, &subpass_of, &same_queue, &mut events);
        assert_eq!(scheduled.len(), 1);
        match &scheduled[0].op {
            CompactedResourceCommand::SubpassDependency(dep) => {
                assert_eq!(dep.src_subpass, Some(0));
                assert_eq!(dep.dst_subpass, Some(1));
                assert_eq!(dep.src_access, vk::AccessFlags2::COLOR_ATTACHMENT_WRITE);
                assert_eq!(dep.dst_access, vk::AccessFlags2::INPUT_ATTACHMENT_READ);
            }
            other => panic!("expected SubpassDependency, got {other:?}"),
        }
    }

    #[test]
    fn identical_write_after_write_within_one_pass_is_redundant() {
        let buf = Handle::from_raw(4);
        let usages = vec![
            usage(0, 0..1, AccessType::Write, vk::PipelineStageFlags2::COMPUTE_SHADER),
            usage(0, 1..2, AccessType::Write, vk::PipelineStageFlags2::COMPUTE_SHADER),
        ];
        let mut events = EventAllocator::new();
        let scheduled = analyze_resource(buf, false, false, &usages, &no_subpass, &same_queue, &mut events);
        assert!(scheduled.is_empty());
    }
}
