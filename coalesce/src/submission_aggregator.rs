use coalesce_shared::{
    format_bytes,
    log::{debug, trace},
    tracy_client::span,
};

use crate::{
    command_buffer::CommandBuffer,
    command_buffer_queue::{CommandBufferId, CommandBufferQueue},
    graphics_allocation::AllocationRef,
};

/// Deduplicated list of allocations that have to be resident for a merged submission
pub type ResourcePackage = Vec<AllocationRef>;

/// Merges consecutive recorded [`CommandBuffer`]s into one hardware submission.
///
/// Every [`aggregate`](SubmissionAggregator::aggregate) call is one inspection pass with its own
/// generation number. An allocation counts towards a pass only when its inspection id for the OS
/// context is lower than the generation of the pass, so duplicates across all merged command
/// buffers are detected in O(1) per reference.
///
/// The aggregator does no locking. Callers that record and aggregate from different threads have
/// to serialize both on the same lock.
pub struct SubmissionAggregator {
    command_buffers: CommandBufferQueue,
    inspection_id: u32,
}

impl Default for SubmissionAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl SubmissionAggregator {
    pub fn new() -> Self {
        Self {
            command_buffers: CommandBufferQueue::new(),
            // 0 is the inspection id of command buffers that were never inspected
            inspection_id: 1,
        }
    }

    /// Appends the [`CommandBuffer`] to the queue of pending command buffers
    pub fn record(&mut self, command_buffer: CommandBuffer) -> CommandBufferId {
        trace!(
            "Recording {} with {} surfaces",
            command_buffer.debug_info().format_one_line(),
            command_buffer.surfaces().len()
        );
        self.command_buffers.push_tail(command_buffer)
    }

    /// Marks the longest mergeable run at the head of the queue with the generation of this pass.
    ///
    /// The head of the queue is always part of the run and its surfaces are added without looking
    /// at `total_memory_budget`. The following command buffers are added one after the other as
    /// long as the allocations they add on top of `total_used_size` fit into the budget. The walk
    /// stops at the first command buffer that doesn't fit. Nothing is merged when the batch buffer
    /// of the second command buffer is not compatible with the head.
    ///
    /// New allocations are appended to `resource_package` and their sizes are added to
    /// `total_used_size`, saturating at `usize::MAX`. The queue itself is not modified; the caller
    /// removes the run once it has been submitted.
    ///
    /// # Panics
    ///
    /// Panics when the generation counter of the aggregator would overflow `u32::MAX`.
    pub fn aggregate(
        &mut self,
        resource_package: &mut ResourcePackage,
        total_used_size: &mut usize,
        total_memory_budget: usize,
        os_context_id: u32,
    ) {
        let _span = span!("aggregate");

        let Some(primary_id) = self.command_buffers.peek_head_id() else {
            return;
        };
        let current_inspection = self.inspection_id;
        self.inspection_id = current_inspection
            .checked_add(1)
            .unwrap_or_else(|| panic!("Generation counter of the SubmissionAggregator overflowed after inspection {current_inspection}"));

        let Some(primary) = self.command_buffers.get_mut(primary_id) else {
            return;
        };
        primary.set_inspection_id(current_inspection);
        let primary_batch_buffer = primary.batch_buffer().clone();

        // The primary command buffer is submitted in any case, so its surfaces ignore the budget
        for surface in primary.surfaces() {
            *total_used_size = total_used_size.saturating_add(take_if_new(surface, current_inspection, os_context_id, resource_package));
        }
        trace!(
            "Inspection {current_inspection}: primary {} uses {}",
            primary.debug_info().format_one_line(),
            format_bytes(*total_used_size)
        );

        let mut candidate_id = self.command_buffers.next(primary_id);
        let Some(first_candidate) = candidate_id.and_then(|id| self.command_buffers.get(id)) else {
            return;
        };
        if !primary_batch_buffer.is_mergeable_with(first_candidate.batch_buffer()) {
            debug!(
                "Inspection {current_inspection}: {} can't be merged because its batch buffer differs",
                first_candidate.debug_info().format_one_line()
            );
            return;
        }

        let mut new_resources = ResourcePackage::new();
        while let Some(id) = candidate_id {
            let Some(candidate) = self.command_buffers.get(id) else {
                break;
            };

            new_resources.clear();
            let mut candidate_new_bytes: usize = 0;
            for surface in candidate.surfaces() {
                if primary_batch_buffer.is_command_buffer_allocation(surface) {
                    continue;
                }
                candidate_new_bytes = candidate_new_bytes.saturating_add(take_if_new(surface, current_inspection, os_context_id, &mut new_resources));
            }
            if let Some(command_buffer_allocation) = &candidate.batch_buffer().command_buffer_allocation {
                if !primary_batch_buffer.is_command_buffer_allocation(command_buffer_allocation) {
                    candidate_new_bytes = candidate_new_bytes.saturating_add(take_if_new(
                        command_buffer_allocation,
                        current_inspection,
                        os_context_id,
                        &mut new_resources,
                    ));
                }
            }

            // Allocations of a rejected candidate keep the stamp of this pass. The next pass has a new generation.
            if candidate_new_bytes > total_memory_budget.saturating_sub(*total_used_size) {
                debug!(
                    "Inspection {current_inspection}: {} adds {} which exceeds the budget of {} ({} used)",
                    candidate.debug_info().format_one_line(),
                    format_bytes(candidate_new_bytes),
                    format_bytes(total_memory_budget),
                    format_bytes(*total_used_size)
                );
                break;
            }

            trace!(
                "Inspection {current_inspection}: merging {} which adds {}",
                candidate.debug_info().format_one_line(),
                format_bytes(candidate_new_bytes)
            );
            candidate_id = self.command_buffers.next(id);
            *total_used_size = total_used_size.saturating_add(candidate_new_bytes);
            if let Some(candidate) = self.command_buffers.get_mut(id) {
                candidate.set_inspection_id(current_inspection);
            }
            resource_package.append(&mut new_resources);
        }
    }

    /// The pending command buffers in recording order
    pub fn command_buffers(&self) -> &CommandBufferQueue {
        &self.command_buffers
    }

    /// The pending command buffers. Used by the flush path to remove submitted command buffers.
    pub fn command_buffers_mut(&mut self) -> &mut CommandBufferQueue {
        &mut self.command_buffers
    }

    /// Generation that the next [`aggregate`](SubmissionAggregator::aggregate) call will use
    pub fn generation_counter(&self) -> u32 {
        self.inspection_id
    }

    #[cfg(test)]
    fn with_generation_counter(inspection_id: u32) -> Self {
        Self {
            command_buffers: CommandBufferQueue::new(),
            inspection_id,
        }
    }
}

/// Stamps the allocation and appends it to `resources` unless it was already counted in this inspection.
///
/// Returns the number of bytes that were added.
fn take_if_new(allocation: &AllocationRef, current_inspection: u32, os_context_id: u32, resources: &mut ResourcePackage) -> usize {
    if allocation.inspection_id(os_context_id) < current_inspection {
        allocation.set_inspection_id(current_inspection, os_context_id);
        resources.push(allocation.clone());
        allocation.underlying_buffer_size()
    } else {
        0
    }
}
