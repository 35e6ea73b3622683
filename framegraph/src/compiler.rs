//! Frame compiler (component H): pass culling, encoder/command-buffer
//! partitioning, and flattening of the analyzer's compacted resource
//! commands into one sorted stream.
//!
//! Grounded on the teacher's `CommandBuffer`/`RenderPassSet` shape in
//! `render_graph.rs`, generalized from "one fixed partition per recorded
//! graph" to the rule-driven partitioning `spec.md` §4.H describes.

use std::collections::HashMap;

use crate::analyzer::{Order, ResolvedQueue, ScheduledCommand};
use crate::pass::{PassId, PassKind, QueueType, RenderPassRecord, RenderTargetDescriptor};

/// Per-encoder metadata: its pass kind, the (fused) render-target
/// descriptor if it is a draw encoder, the passes assigned to it in order,
/// and which command buffer it belongs to.
#[derive(Debug, Clone)]
pub struct EncoderInfo {
    pub kind: PassKind,
    pub render_target: Option<RenderTargetDescriptor>,
    pub passes: Vec<PassId>,
    pub command_buffer_index: usize,
    pub is_external: bool,
    pub uses_window_texture: bool,
    pub queue: ResolvedQueue,
}

#[derive(Debug, Default)]
pub struct FrameCommandInfo {
    pub encoders: Vec<EncoderInfo>,
    pub pass_to_encoder: HashMap<PassId, usize>,
    /// `(fused render-pass group id, subpass index)` for draw passes that
    /// belong to a render pass; absent for every other pass kind.
    pub pass_to_subpass: HashMap<PassId, (u32, u32)>,
    pub pass_to_queue: HashMap<PassId, ResolvedQueue>,
    /// Which resolved queue each command buffer (by index) submits on.
    /// Command buffers never mix queues — a queue change always forces a
    /// new command buffer, same as an `(isExternal, usesWindowTexture)`
    /// change.
    pub command_buffer_queue: Vec<ResolvedQueue>,
    pub command_buffer_count: usize,
}

impl FrameCommandInfo {
    pub fn subpass_of(&self) -> impl Fn(PassId) -> Option<(u32, u32)> + '_ {
        move |pass| self.pass_to_subpass.get(&pass).copied()
    }

    pub fn queue_of(&self) -> impl Fn(PassId) -> ResolvedQueue + '_ {
        move |pass| self.pass_to_queue.get(&pass).copied().unwrap_or(ResolvedQueue(0))
    }
}

#[derive(Debug, Copy, Clone)]
pub struct QueueAvailability {
    pub async_compute: bool,
    pub async_transfer: bool,
}

impl Default for QueueAvailability {
    fn default() -> Self {
        Self {
            async_compute: false,
            async_transfer: false,
        }
    }
}

fn resolve_queue(preference: QueueType, availability: QueueAvailability) -> ResolvedQueue {
    match preference {
        QueueType::Graphics => ResolvedQueue(0),
        QueueType::PreferAsyncCompute if availability.async_compute => ResolvedQueue(1),
        QueueType::PreferAsyncTransfer if availability.async_transfer => ResolvedQueue(2),
        _ => ResolvedQueue(0),
    }
}

/// Every recorded pass is considered active; callers that want to cull
/// dead passes (e.g. a draw pass whose render target was never read) should
/// filter the slice before calling `compile`. `spec.md` leaves the culling
/// predicate itself unspecified beyond "active-passes".
pub fn compile(passes: &[RenderPassRecord], availability: QueueAvailability) -> FrameCommandInfo {
    let mut info = FrameCommandInfo::default();
    let mut group_id: u32 = 0;

    for pass in passes {
        let queue = resolve_queue(pass.queue_preference, availability);
        info.pass_to_queue.insert(pass.id, queue);

        let is_external = pass.variant.kind() == PassKind::External;
        let this_pair = (queue, is_external, pass.uses_window_texture);

        let starts_new_encoder = match info.encoders.last() {
            None => true,
            Some(prev) => {
                prev.kind != pass.variant.kind()
                    || prev.queue != queue
                    || match (&prev.render_target, pass.variant.render_target()) {
                        (Some(prev_rtd), Some(rtd)) => !prev_rtd.compatible_for_fusion(rtd),
                        (None, None) => false,
                        _ => true,
                    }
            }
        };

        if starts_new_encoder {
            if !info.encoders.is_empty() {
                group_id += 1;
            }
            let prev_pair = info
                .encoders
                .last()
                .map(|e| (e.queue, e.is_external, e.uses_window_texture));
            let command_buffer_index = match prev_pair {
                None => {
                    info.command_buffer_queue.push(queue);
                    0
                }
                Some(pair) if pair == this_pair => info.encoders.last().unwrap().command_buffer_index,
                Some(_) => {
                    info.command_buffer_queue.push(queue);
                    info.encoders.last().unwrap().command_buffer_index + 1
                }
            };
            trace!(
                "compiler: pass {:?} opens encoder {} (kind {:?}, queue {:?}) on command buffer {}",
                pass.id,
                info.encoders.len(),
                pass.variant.kind(),
                queue,
                command_buffer_index
            );
            info.encoders.push(EncoderInfo {
                kind: pass.variant.kind(),
                render_target: pass.variant.render_target().cloned(),
                passes: Vec::new(),
                command_buffer_index,
                is_external,
                uses_window_texture: pass.uses_window_texture,
                queue,
            });
        }

        let encoder_index = info.encoders.len() - 1;
        let subpass_index = info.encoders[encoder_index].passes.len() as u32;
        info.encoders[encoder_index].passes.push(pass.id);
        info.pass_to_encoder.insert(pass.id, encoder_index);
        if pass.variant.render_target().is_some() {
            info.pass_to_subpass.insert(pass.id, (group_id, subpass_index));
        }
    }

    debug!(
        "compiler: {} pass(es) compiled into {} encoder(s) across {} command buffer(s)",
        passes.len(),
        info.encoders.len(),
        info.command_buffer_queue.len()
    );
    info.command_buffer_count = info.command_buffer_queue.len();
    info
}

/// Flattens and sorts the analyzer's per-resource output streams into one
/// compacted command array, ordered by `(commandIndex, order)` as §4.H
/// requires. `Before` entries for a given command index precede the
/// command; `After` entries follow it.
pub fn flatten_and_sort(mut commands: Vec<ScheduledCommand>) -> Vec<ScheduledCommand> {
    commands.sort_by(|a, b| {
        a.command_index
            .cmp(&b.command_index)
            .then_with(|| order_rank(a.order).cmp(&order_rank(b.order)))
    });
    commands
}

fn order_rank(order: Order) -> u8 {
    match order {
        Order::Before => 0,
        Order::After => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pass::{LoadAction, RenderPassVariant, StoreAction};

    fn draw_pass(id: u32, rtd: RenderTargetDescriptor) -> RenderPassRecord {
        RenderPassRecord {
            id: PassId(id),
            name: format!("draw{id}"),
            label_color: None,
            variant: RenderPassVariant::Draw(rtd),
            command_range: 0..1,
            queue_preference: QueueType::Graphics,
            uses_window_texture: false,
        }
    }

    fn compute_pass(id: u32) -> RenderPassRecord {
        RenderPassRecord {
            id: PassId(id),
            name: format!("compute{id}"),
            label_color: None,
            variant: RenderPassVariant::Compute,
            command_range: 0..1,
            queue_preference: QueueType::Graphics,
            uses_window_texture: false,
        }
    }

    fn rtd(texture_index: u64) -> RenderTargetDescriptor {
        use crate::handle::Handle;
        RenderTargetDescriptor {
            color_attachments: vec![crate::pass::AttachmentDescriptor {
                texture: Handle::from_raw(texture_index),
                load: LoadAction::Clear,
                store: StoreAction::Store,
                clear_value: None,
                is_depth_stencil: false,
            }],
            depth_stencil_attachment: None,
        }
    }

    /// S6-adjacent sanity: a pass-kind change always opens a new encoder.
    #[test]
    fn pass_kind_change_starts_a_new_encoder() {
        let passes = vec![draw_pass(0, rtd(1)), compute_pass(1)];
        let info = compile(&passes, QueueAvailability::default());
        assert_eq!(info.encoders.len(), 2);
        assert_eq!(info.pass_to_encoder[&PassId(0)], 0);
        assert_eq!(info.pass_to_encoder[&PassId(1)], 1);
    }

    /// S3: two draw passes with identical attachments fuse into one
    /// render pass (encoder) with subpasses 0 and 1.
    #[test]
    fn compatible_draw_passes_fuse_into_one_encoder_with_subpasses() {
        let passes = vec![draw_pass(0, rtd(1)), draw_pass(1, rtd(1))];
        let info = compile(&passes, QueueAvailability::default());
        assert_eq!(info.encoders.len(), 1);
        assert_eq!(info.pass_to_subpass[&PassId(0)], (0, 0));
        assert_eq!(info.pass_to_subpass[&PassId(1)], (0, 1));
    }

    #[test]
    fn window_touching_pass_starts_a_new_command_buffer() {
        let mut window_pass = draw_pass(1, rtd(2));
        window_pass.uses_window_texture = true;
        let passes = vec![draw_pass(0, rtd(1)), window_pass];
        let info = compile(&passes, QueueAvailability::default());
        assert_eq!(info.encoders[0].command_buffer_index, 0);
        assert_eq!(info.encoders[1].command_buffer_index, 1);
        assert_eq!(info.command_buffer_count, 2);
    }

    #[test]
    fn preferred_async_compute_demotes_to_graphics_without_a_configured_queue() {
        let mut pass = compute_pass(0);
        pass.queue_preference = QueueType::PreferAsyncCompute;
        let info = compile(&[pass], QueueAvailability::default());
        assert_eq!(info.pass_to_queue[&PassId(0)], ResolvedQueue(0));

        let mut pass2 = compute_pass(1);
        pass2.queue_preference = QueueType::PreferAsyncCompute;
        let info2 = compile(
            &[pass2],
            QueueAvailability {
                async_compute: true,
                async_transfer: false,
            },
        );
        assert_eq!(info2.pass_to_queue[&PassId(1)], ResolvedQueue(1));
    }

    /// A pass resolved onto a different queue than its predecessor must not
    /// share a command buffer with it, even with the same
    /// `(isExternal, usesWindowTexture)` pair — one command buffer submits
    /// to exactly one queue.
    #[test]
    fn queue_change_forces_a_new_command_buffer() {
        let mut async_pass = compute_pass(1);
        async_pass.queue_preference = QueueType::PreferAsyncCompute;
        let passes = vec![compute_pass(0), async_pass];
        let info = compile(
            &passes,
            QueueAvailability {
                async_compute: true,
                async_transfer: false,
            },
        );
        assert_eq!(info.command_buffer_count, 2);
        assert_eq!(info.command_buffer_queue, vec![ResolvedQueue(0), ResolvedQueue(1)]);
        assert_eq!(info.encoders[0].command_buffer_index, 0);
        assert_eq!(info.encoders[1].command_buffer_index, 1);
    }

    #[test]
    fn flatten_sorts_before_entries_ahead_of_after_at_the_same_index() {
        use crate::analyzer::CompactedResourceCommand;
        let commands = vec![
            ScheduledCommand {
                command_index: 2,
                order: Order::After,
                op: CompactedResourceCommand::SignalEvent { event: 0 },
            },
            ScheduledCommand {
                command_index: 2,
                order: Order::Before,
                op: CompactedResourceCommand::SignalEvent { event: 1 },
            },
            ScheduledCommand {
                command_index: 1,
                order: Order::After,
                op: CompactedResourceCommand::SignalEvent { event: 2 },
            },
        ];
        let sorted = flatten_and_sort(commands);
        let indices: Vec<_> = sorted.iter().map(|c| (c.command_index, c.order)).collect();
        assert_eq!(
            indices,
            vec![(1, Order::After), (2, Order::Before), (2, Order::After)]
        );
    }
}
