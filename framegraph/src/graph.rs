//! The public frame-graph facade: ties pass recording (component E),
//! per-resource usage tracking (F), the dependency analyzer (G), the frame
//! compiler (H) and the executor (I) into the declare-then-compile workflow
//! `spec.md` §2's data flow describes.
//!
//! Grounded on `render_graph_builder.rs`'s `RenderGraphBuilder` for the
//! overall "accumulate passes, then `build()`" shape. Per-resource usage
//! records are kept in a plain `Vec` cleared every `cycle_frames()` rather
//! than threaded through [`crate::usage::UsageList`]'s arena lifetime here
//! — see `DESIGN.md` for why the facade doesn't self-reference an arena.

use std::collections::HashMap;

use crate::analyzer::{self, EventAllocator, ResolvedQueue};
use crate::backend::Backend;
use crate::compiler::{self, QueueAvailability};
use crate::handle::Handle;
use crate::pass::{PassId, QueueType, RenderPassRecord, RenderPassVariant};
use crate::resources::ResourceContext;
use crate::usage::{AccessType, UsageRecord};
use crate::executor::Executor;
use ash::vk;

/// One resource's usage list plus whether it is a texture (layout-bearing)
/// and, if so, whether it is a depth/stencil format.
struct TrackedResource {
    is_texture: bool,
    is_depth_stencil: bool,
    usages: Vec<UsageRecord>,
}

/// Accumulates passes and usages for exactly one frame, then compiles and
/// executes them. Reused across frames; `reset_for_next_frame` clears the
/// recording state without touching the registries (those cycle inside
/// `Executor::execute`).
pub struct FrameGraph {
    passes: Vec<RenderPassRecord>,
    tracked: HashMap<Handle, TrackedResource>,
    next_pass_id: u32,
    /// Command indices are global across the whole frame (not per-pass), so
    /// that a flattened, sorted compacted-command stream can be routed back
    /// to the pass — and hence the encoder/command buffer — that owns each
    /// index.
    next_command_index: u32,
    queue_availability: QueueAvailability,
}

impl Default for FrameGraph {
    fn default() -> Self {
        Self::new(QueueAvailability::default())
    }
}

impl FrameGraph {
    pub fn new(queue_availability: QueueAvailability) -> Self {
        Self {
            passes: Vec::new(),
            tracked: HashMap::new(),
            next_pass_id: 0,
            next_command_index: 0,
            queue_availability,
        }
    }

    fn alloc_pass_id(&mut self) -> PassId {
        let id = PassId(self.next_pass_id);
        self.next_pass_id += 1;
        id
    }

    /// Records a pass. `usages` declares every resource this pass touches;
    /// `command_index` is the index *within the pass* (0-based) each usage
    /// belongs to — the recorder in [`crate::pass`] is the typed way to
    /// build this list incrementally; this takes the finished list
    /// directly for simplicity at the facade layer. Local indices are
    /// rebased onto the frame's global command index space so the
    /// flattened analyzer output can be routed back to the owning pass.
    #[allow(clippy::too_many_arguments)]
    pub fn add_pass(
        &mut self,
        name: impl Into<String>,
        variant: RenderPassVariant,
        queue_preference: QueueType,
        uses_window_texture: bool,
        command_count: u32,
        usages: Vec<(Handle, bool, bool, AccessType, vk::PipelineStageFlags2, u32)>,
    ) -> PassId {
        let id = self.alloc_pass_id();
        let base = self.next_command_index;
        for (handle, is_texture, is_depth_stencil, access_type, stage_mask, local_command_index) in usages {
            let global_index = base + local_command_index;
            let entry = self.tracked.entry(handle).or_insert_with(|| TrackedResource {
                is_texture,
                is_depth_stencil,
                usages: Vec::new(),
            });
            entry.usages.push(UsageRecord {
                pass: id,
                command_range: global_index..global_index + 1,
                access_type,
                stage_mask,
            });
        }
        self.passes.push(RenderPassRecord {
            id,
            name: name.into(),
            label_color: None,
            variant,
            command_range: base..base + command_count,
            queue_preference,
            uses_window_texture,
        });
        self.next_command_index += command_count;
        id
    }

    pub fn passes(&self) -> &[RenderPassRecord] {
        &self.passes
    }

    /// Runs the compiler (H) and analyzer (G), producing one flattened,
    /// sorted compacted-command stream per command buffer, in command-buffer
    /// order, each tagged with the queue the compiler resolved it onto
    /// (§4.D/§5: a command buffer submits to exactly one queue).
    pub fn compile(&self) -> Vec<(ResolvedQueue, Vec<analyzer::CompactedResourceCommand>)> {
        let info = compiler::compile(&self.passes, self.queue_availability);
        let subpass_of = info.subpass_of();
        let queue_of = info.queue_of();
        let mut events = EventAllocator::new();

        let mut scheduled = Vec::new();
        for (handle, tracked) in &self.tracked {
            scheduled.extend(analyzer::analyze_resource(
                *handle,
                tracked.is_texture,
                tracked.is_depth_stencil,
                &tracked.usages,
                &subpass_of,
                &queue_of,
                &mut events,
            ));
        }
        let flattened = compiler::flatten_and_sort(scheduled);

        let mut by_command_buffer: Vec<Vec<analyzer::CompactedResourceCommand>> =
            vec![Vec::new(); info.command_buffer_count];
        // Each encoder owns a contiguous run of command indices starting at
        // 0 within its pass; for the facade's purposes every pass's
        // commands are attributed to its encoder's command buffer.
        let mut pass_to_command_buffer = HashMap::new();
        for encoder in &info.encoders {
            for pass in &encoder.passes {
                pass_to_command_buffer.insert(*pass, encoder.command_buffer_index);
            }
        }
        for command in flattened {
            // The command index alone does not carry the owning pass once
            // flattened; route by the pass whose command_range contains it.
            let owning_pass = self
                .passes
                .iter()
                .find(|p| p.command_range.contains(&command.command_index))
                .map(|p| p.id);
            let buffer_index = owning_pass
                .and_then(|p| pass_to_command_buffer.get(&p).copied())
                .unwrap_or(0);
            by_command_buffer[buffer_index].push(command.op);
        }
        info
            .command_buffer_queue
            .into_iter()
            .zip(by_command_buffer)
            .collect()
    }

    /// Executes the compiled frame and clears recording state for the next
    /// one. Persistent-resource wait-frame stamping (invariant 4) is the
    /// caller's responsibility via [`ResourceContext`], since only it knows
    /// which usages were reads vs. writes per handle.
    pub fn execute<B: Backend>(&mut self, executor: &mut Executor<B>, resources: &mut ResourceContext) -> crate::Result<u64> {
        let command_buffers = self.compile();
        let frame = executor.execute(&command_buffers, resources)?;
        self.stamp_persistent_wait_frames(resources, frame);
        self.passes.clear();
        self.tracked.clear();
        self.next_pass_id = 0;
        self.next_command_index = 0;
        Ok(frame)
    }

    fn stamp_persistent_wait_frames(&self, resources: &mut ResourceContext, frame: u64) {
        for (&handle, tracked) in &self.tracked {
            let Some((ty, flags, index)) = crate::handle::decode(handle) else {
                continue;
            };
            if !flags.contains(crate::handle::HandleFlags::PERSISTENT) {
                continue;
            }
            let wrote = tracked.usages.iter().any(|u| u.access_type.is_write());
            let read = tracked.usages.iter().any(|u| !u.access_type.is_write());
            if ty == crate::handle::ResourceType::Buffer {
                let registry = resources.persistent_buffers_mut();
                if wrote {
                    registry.stamp_write_wait_frame(index, frame);
                }
                if read {
                    registry.stamp_read_wait_frame(index, frame);
                }
            } else if ty == crate::handle::ResourceType::Texture {
                let registry = resources.persistent_textures_mut();
                if wrote {
                    registry.stamp_write_wait_frame(index, frame);
                }
                if read {
                    registry.stamp_read_wait_frame(index, frame);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, ResourceUsageFlags};
    use crate::FrameGraphConfig;

    struct NoopBackend;
    impl Backend for NoopBackend {
        fn materialize_buffer(&mut self, _h: Handle, _u: ResourceUsageFlags) -> std::result::Result<u64, BackendError> {
            Ok(0)
        }
        fn materialize_texture(&mut self, _h: Handle, _u: ResourceUsageFlags) -> std::result::Result<u64, BackendError> {
            Ok(0)
        }
        fn map_buffer(&mut self, _id: u64) -> std::result::Result<*mut u8, BackendError> {
            Ok(std::ptr::null_mut())
        }
        fn unmap_buffer(&mut self, _id: u64) {}
        fn did_modify_range(&mut self, _id: u64, _offset: u64, _len: u64) {}
        fn copy_to_texture(
            &mut self,
            _id: u64,
            _b: &[u8],
            _r: (u32, u32, u32, u32),
            _m: u32,
            _s: u32,
            _bpr: u32,
            _bpi: u32,
        ) -> std::result::Result<(), BackendError> {
            Ok(())
        }
        fn copy_from_texture(
            &mut self,
            _id: u64,
            _r: (u32, u32, u32, u32),
            _m: u32,
            _s: u32,
        ) -> std::result::Result<Vec<u8>, BackendError> {
            Ok(Vec::new())
        }
        fn dispose_resource(&mut self, _id: u64) {}
        fn record_resource_commands(
            &mut self,
            _q: u32,
            _c: &[analyzer::CompactedResourceCommand],
        ) -> std::result::Result<(), BackendError> {
            Ok(())
        }
        fn submit(&mut self, _q: u32, _v: u64) -> std::result::Result<(), BackendError> {
            Ok(())
        }
        fn timeline_reached(&self, _v: u64) -> bool {
            true
        }
    }

    /// S1 end-to-end: two compute passes writing the same buffer compile to
    /// exactly one pipeline barrier.
    #[test]
    fn two_compute_writes_compile_to_one_barrier() {
        let mut graph = FrameGraph::default();
        let mut resources = ResourceContext::default();
        let buffer = resources.create_transient_buffer(crate::resources::BufferDescriptor {
            size: 256,
            memory_location: crate::MemoryLocation::GpuOnly,
        });

        graph.add_pass(
            "write-a",
            RenderPassVariant::Compute,
            QueueType::Graphics,
            false,
            1,
            vec![(
                buffer.0,
                false,
                false,
                AccessType::Write,
                vk::PipelineStageFlags2::COMPUTE_SHADER,
                0,
            )],
        );
        graph.add_pass(
            "write-b",
            RenderPassVariant::Compute,
            QueueType::Graphics,
            false,
            1,
            vec![(
                buffer.0,
                false,
                false,
                AccessType::Write,
                vk::PipelineStageFlags2::COMPUTE_SHADER,
                0,
            )],
        );

        let command_buffers = graph.compile();
        let total: usize = command_buffers.iter().map(|(_, c)| c.len()).sum();
        assert_eq!(total, 1);

        let mut executor = Executor::new(NoopBackend, FrameGraphConfig::default());
        let frame = graph.execute(&mut executor, &mut resources).unwrap();
        assert_eq!(frame, 1);
    }

    /// Invariant 7: compiling and executing with no passes at all produces
    /// no commands and still advances the frame.
    #[test]
    fn empty_graph_compiles_to_nothing() {
        let graph = FrameGraph::default();
        assert!(graph.compile().is_empty() || graph.compile().iter().all(|(_, c)| c.is_empty()));
    }
}
