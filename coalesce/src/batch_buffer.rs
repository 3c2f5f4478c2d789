use coalesce_shared::derive_more::Display;

use crate::graphics_allocation::{same_allocation, AllocationRef};

/// Scheduling hint of the queue that recorded a command buffer
#[derive(Debug, Display, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueThrottle {
    Low,
    #[default]
    Medium,
    High,
}

/// Hardware submission parameters of a command buffer.
///
/// Two adjacent command buffers can only share a submission when the fields compared by
/// [`BatchBuffer::is_mergeable_with`] are equal.
#[derive(Clone, Default)]
pub struct BatchBuffer {
    /// Allocation that holds the instruction stream of the command buffer
    pub command_buffer_allocation: Option<AllocationRef>,
    pub start_offset: usize,
    pub used_size: usize,
    pub low_priority: bool,
    pub throttle: QueueThrottle,
    pub slice_count: u64,
    pub requires_coherency: bool,
}

impl BatchBuffer {
    /// Returns whether a command buffer with `other` as its batch buffer may be chained behind this one
    pub fn is_mergeable_with(&self, other: &BatchBuffer) -> bool {
        self.low_priority == other.low_priority
            && self.throttle == other.throttle
            && self.slice_count == other.slice_count
            && self.requires_coherency == other.requires_coherency
    }

    /// Returns whether `allocation` is the instruction stream allocation of this batch buffer
    pub fn is_command_buffer_allocation(&self, allocation: &AllocationRef) -> bool {
        self.command_buffer_allocation
            .as_ref()
            .is_some_and(|command_buffer_allocation| same_allocation(command_buffer_allocation, allocation))
    }
}

impl std::fmt::Debug for BatchBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchBuffer")
            .field(
                "command_buffer_allocation_size",
                &self.command_buffer_allocation.as_ref().map(|a| a.underlying_buffer_size()),
            )
            .field("start_offset", &self.start_offset)
            .field("used_size", &self.used_size)
            .field("low_priority", &self.low_priority)
            .field("throttle", &self.throttle)
            .field("slice_count", &self.slice_count)
            .field("requires_coherency", &self.requires_coherency)
            .finish()
    }
}
