use coalesce_shared::{debug_info, AsDebugInfo, DebugInfo};

use crate::{batch_buffer::BatchBuffer, flush_stamp::FlushStampTracker, graphics_allocation::AllocationRef};

/// One recorded unit of GPU work that waits for submission.
///
/// A `CommandBuffer` is handed to the [`SubmissionAggregator`](crate::submission_aggregator::SubmissionAggregator)
/// with `record` and from then on identified by its [`CommandBufferId`](crate::command_buffer_queue::CommandBufferId).
pub struct CommandBuffer {
    surfaces: Vec<AllocationRef>,
    batch_buffer: BatchBuffer,
    inspection_id: u32,
    flush_stamp: FlushStampTracker,
    task_count: u32,
    debug_info: DebugInfo,
}

impl CommandBuffer {
    /// Creates a new [`CommandBufferBuilder`] for a [`CommandBuffer`]
    pub fn builder() -> CommandBufferBuilder {
        CommandBufferBuilder::new()
    }

    /// Allocations the command buffer references. The list may contain duplicates.
    pub fn surfaces(&self) -> &[AllocationRef] {
        &self.surfaces
    }

    /// Adds an allocation to the surfaces of the command buffer
    pub fn push_surface(&mut self, allocation: AllocationRef) {
        self.surfaces.push(allocation);
    }

    pub fn batch_buffer(&self) -> &BatchBuffer {
        &self.batch_buffer
    }

    pub fn batch_buffer_mut(&mut self) -> &mut BatchBuffer {
        &mut self.batch_buffer
    }

    /// Generation of the aggregation pass that last included this command buffer. 0 means never.
    pub fn inspection_id(&self) -> u32 {
        self.inspection_id
    }

    pub(crate) fn set_inspection_id(&mut self, inspection_id: u32) {
        self.inspection_id = inspection_id;
    }

    /// Completion signal of the work in this command buffer
    pub fn flush_stamp(&self) -> &FlushStampTracker {
        &self.flush_stamp
    }

    pub fn flush_stamp_mut(&mut self) -> &mut FlushStampTracker {
        &mut self.flush_stamp
    }

    /// Task count that the command buffer completes
    pub fn task_count(&self) -> u32 {
        self.task_count
    }

    pub fn debug_info(&self) -> &DebugInfo {
        &self.debug_info
    }
}

impl AsDebugInfo for CommandBuffer {
    fn as_debug_info(&self) -> &DebugInfo {
        &self.debug_info
    }
}

impl std::fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBuffer")
            .field("name", &self.debug_info.name())
            .field("surfaces", &self.surfaces.len())
            .field("batch_buffer", &self.batch_buffer)
            .field("inspection_id", &self.inspection_id)
            .field("task_count", &self.task_count)
            .finish()
    }
}

pub struct CommandBufferBuilder {
    surfaces: Vec<AllocationRef>,
    batch_buffer: Option<BatchBuffer>,
    flush_stamp: Option<FlushStampTracker>,
    task_count: u32,
    debug_info: Option<DebugInfo>,
}

impl CommandBufferBuilder {
    fn new() -> Self {
        Self {
            surfaces: Vec::new(),
            batch_buffer: None,
            flush_stamp: None,
            task_count: 0,
            debug_info: None,
        }
    }

    /// Sets the surfaces of the [`CommandBuffer`]
    pub fn with_surfaces(mut self, surfaces: impl IntoIterator<Item = AllocationRef>) -> Self {
        self.surfaces = surfaces.into_iter().collect();
        self
    }

    /// Appends one surface to the [`CommandBuffer`]
    pub fn with_surface(mut self, surface: AllocationRef) -> Self {
        self.surfaces.push(surface);
        self
    }

    /// Sets the [`BatchBuffer`] of the [`CommandBuffer`]
    pub fn with_batch_buffer(mut self, batch_buffer: BatchBuffer) -> Self {
        self.batch_buffer = Some(batch_buffer);
        self
    }

    /// Sets the [`FlushStampTracker`] of the [`CommandBuffer`]. Without it, no tracking object is allocated.
    pub fn with_flush_stamp(mut self, flush_stamp: FlushStampTracker) -> Self {
        self.flush_stamp = Some(flush_stamp);
        self
    }

    pub fn with_task_count(mut self, task_count: u32) -> Self {
        self.task_count = task_count;
        self
    }

    /// Sets the [`DebugInfo`] of the [`CommandBuffer`]
    pub fn with_debug_info(mut self, debug_info: DebugInfo) -> Self {
        self.debug_info = Some(debug_info);
        self
    }

    /// Creates the [`CommandBuffer`]
    pub fn build(self) -> CommandBuffer {
        CommandBuffer {
            surfaces: self.surfaces,
            batch_buffer: self.batch_buffer.unwrap_or_default(),
            inspection_id: 0,
            flush_stamp: self.flush_stamp.unwrap_or_default(),
            task_count: self.task_count,
            debug_info: self.debug_info.unwrap_or_else(|| debug_info!("Anonymous CommandBuffer")),
        }
    }
}
