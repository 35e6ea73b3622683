//! Executor (component I): dispatches compacted resource commands through
//! the backend, submits command buffers, and cycles frame state.
//!
//! Grounded on `render_graph_executor.rs`'s `BasicRenderGraphExecutor`
//! (`execute_graph`'s fence-wait → record → submit → present shape),
//! replaced here with the timeline/semaphore model `spec.md` §4.I and §5
//! describe instead of a concrete swapchain present loop.

use crate::analyzer::{CompactedResourceCommand, ResolvedQueue};
use crate::backend::{Backend, CompletionStatus, InlineJobManager, JobManager};
use crate::frame::{FrameCompletion, InflightSemaphore, Queue, ASYNC_COMPUTE_QUEUE, ASYNC_TRANSFER_QUEUE, GRAPHICS_QUEUE};
use crate::resources::ResourceContext;
use crate::{FrameGraphConfig, Result};

struct PendingCallback {
    frame: u64,
    callback: Box<dyn FnOnce(CompletionStatus) + Send>,
}

/// Drives one frame graph instance's submission loop. Generic over the
/// concrete `Backend` so tests can supply a stub.
pub struct Executor<B: Backend> {
    backend: B,
    job_manager: Box<dyn JobManager>,
    pub frame_completion: FrameCompletion,
    pub inflight: InflightSemaphore,
    queues: Vec<Queue>,
    current_frame: u64,
    pending_callbacks: Vec<PendingCallback>,
}

impl<B: Backend> Executor<B> {
    pub fn new(backend: B, config: FrameGraphConfig) -> Self {
        Self {
            backend,
            job_manager: Box::new(InlineJobManager),
            frame_completion: FrameCompletion::new(),
            inflight: InflightSemaphore::new(config.frames_in_flight),
            queues: vec![
                Queue::new(GRAPHICS_QUEUE),
                Queue::new(ASYNC_COMPUTE_QUEUE),
                Queue::new(ASYNC_TRANSFER_QUEUE),
            ],
            current_frame: 0,
            pending_callbacks: Vec::new(),
        }
    }

    pub fn with_job_manager(mut self, job_manager: Box<dyn JobManager>) -> Self {
        self.job_manager = job_manager;
        self
    }

    pub fn dispatch_pass_body(&self, priority: i32, body: Box<dyn FnOnce() + Send + 'static>) {
        self.job_manager.run_async(priority, body);
    }

    pub fn backend(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn current_frame(&self) -> u64 {
        self.current_frame
    }

    /// Fires once `lastCompletedFrame >= frame`. If the frame has already
    /// completed by the time this is called, it runs immediately.
    pub fn on_frame_complete(&mut self, frame: u64, callback: impl FnOnce(CompletionStatus) + Send + 'static) {
        if self.frame_completion.current() >= frame {
            callback(CompletionStatus::Success);
        } else {
            self.pending_callbacks.push(PendingCallback {
                frame,
                callback: Box::new(callback),
            });
        }
    }

    /// Executes one frame's command buffers (each a flattened, sorted
    /// stream of compacted resource commands from [`crate::compiler`],
    /// tagged with the queue the compiler resolved it onto). Calling this
    /// with an empty slice is invariant 7's idempotent-execute path: frame
    /// state still advances and the semaphore still signals, but the
    /// backend records and submits nothing.
    ///
    /// Submission is serialized per queue (§4.D/§5): every command buffer
    /// is recorded and counted against its own queue's timeline, and each
    /// queue touched this frame is submitted exactly once.
    pub fn execute(
        &mut self,
        command_buffers: &[(ResolvedQueue, Vec<CompactedResourceCommand>)],
        resources: &mut ResourceContext,
    ) -> Result<u64> {
        self.inflight.acquire();
        self.current_frame += 1;
        let frame = self.current_frame;

        if !command_buffers.is_empty() {
            let mut touched_queues = Vec::new();
            for (queue, commands) in command_buffers {
                let queue_index = queue.0 as usize;
                self.backend.record_resource_commands(queue.0, commands)?;
                self.queues[queue_index].next_submission_value();
                if !touched_queues.contains(&queue_index) {
                    touched_queues.push(queue_index);
                }
            }
            info!(
                "executor: frame {frame} submitted {} command buffer(s) across {} queue(s)",
                command_buffers.len(),
                touched_queues.len()
            );
            for queue_index in touched_queues {
                self.backend.submit(queue_index as u32, frame)?;
            }
        }

        self.frame_completion.advance_to(frame);

        let mut i = 0;
        while i < self.pending_callbacks.len() {
            if self.pending_callbacks[i].frame <= frame {
                let pending = self.pending_callbacks.remove(i);
                (pending.callback)(CompletionStatus::Success);
            } else {
                i += 1;
            }
        }

        resources.transient_buffers_mut().cycle_frames();
        resources.transient_textures_mut().cycle_frames();
        resources.persistent_buffers_mut().drain_deferred(frame);
        resources.persistent_textures_mut().drain_deferred(frame);

        self.inflight.release();
        Ok(frame)
    }
}
