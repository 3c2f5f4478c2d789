use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

use coalesce_shared::{debug_info, AsDebugInfo, DebugInfo};

/// Number of OS contexts a [`GraphicsAllocation`] tracks when nothing else is requested
pub const DEFAULT_OS_CONTEXT_COUNT: usize = 64;

/// Capability of an allocation to be deduplicated by the [`SubmissionAggregator`](crate::submission_aggregator::SubmissionAggregator).
///
/// The inspection id of an allocation is a per-OS-context marker holding the last aggregation
/// pass that counted the allocation. Every aggregator only writes the slot of its own OS context,
/// which is why the stamps are written through a shared reference.
pub trait InspectAllocation: Send + Sync {
    /// Returns the inspection id of the allocation for the given OS context
    fn inspection_id(&self, os_context_id: u32) -> u32;

    /// Sets the inspection id of the allocation for the given OS context
    fn set_inspection_id(&self, inspection_id: u32, os_context_id: u32);

    /// Size of the underlying buffer in bytes
    fn underlying_buffer_size(&self) -> usize;
}

/// Shared reference to an allocation. Two references denote the same resource iff they point to the same allocation.
pub type AllocationRef = Arc<dyn InspectAllocation>;

/// Returns whether both references point to the same allocation
pub fn same_allocation(a: &AllocationRef, b: &AllocationRef) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// GPU memory allocation as seen by the submission path: a size and one inspection stamp per OS context
pub struct GraphicsAllocation {
    size: usize,
    usage_infos: Box<[AtomicU32]>,
    debug_info: DebugInfo,
}

impl GraphicsAllocation {
    /// Creates a new [`GraphicsAllocation`] tracking [`DEFAULT_OS_CONTEXT_COUNT`] OS contexts
    pub fn new(size: usize, debug_info: DebugInfo) -> Self {
        Self::with_os_context_count(size, DEFAULT_OS_CONTEXT_COUNT, debug_info)
    }

    /// Creates a new [`GraphicsAllocation`] tracking `os_context_count` OS contexts
    pub fn with_os_context_count(size: usize, os_context_count: usize, debug_info: DebugInfo) -> Self {
        Self {
            size,
            usage_infos: (0..os_context_count).map(|_| AtomicU32::new(0)).collect(),
            debug_info,
        }
    }

    /// Creates an anonymous allocation of the given size and wraps it into an [`AllocationRef`]
    pub fn shared(size: usize) -> AllocationRef {
        Arc::new(Self::new(size, debug_info!(format!("GraphicsAllocation-{size}"))))
    }

    /// Number of OS contexts for which inspection ids are tracked
    pub fn os_context_count(&self) -> usize {
        self.usage_infos.len()
    }

    fn usage_info(&self, os_context_id: u32) -> &AtomicU32 {
        let os_context_count = self.usage_infos.len();
        self.usage_infos.get(os_context_id as usize).unwrap_or_else(|| {
            panic!(
                "OS context {os_context_id} is out of range for {} which tracks {os_context_count} contexts",
                self.debug_info.format_one_line()
            )
        })
    }
}

impl InspectAllocation for GraphicsAllocation {
    fn inspection_id(&self, os_context_id: u32) -> u32 {
        self.usage_info(os_context_id).load(Ordering::Relaxed)
    }

    fn set_inspection_id(&self, inspection_id: u32, os_context_id: u32) {
        self.usage_info(os_context_id).store(inspection_id, Ordering::Relaxed);
    }

    fn underlying_buffer_size(&self) -> usize {
        self.size
    }
}

impl AsDebugInfo for GraphicsAllocation {
    fn as_debug_info(&self) -> &DebugInfo {
        &self.debug_info
    }
}
