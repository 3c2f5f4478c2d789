pub mod batch_buffer;
pub mod batched_flush;
pub mod command_buffer;
pub mod command_buffer_queue;
pub mod config;
pub mod flush_stamp;
pub mod graphics_allocation;
pub mod submission_aggregator;

use coalesce_shared::{serde_yaml, thiserror};

pub use batch_buffer::{BatchBuffer, QueueThrottle};
pub use batched_flush::{BatchedFlusher, MergedSubmission, SubmitBatch};
pub use command_buffer::{CommandBuffer, CommandBufferBuilder};
pub use command_buffer_queue::{CommandBufferId, CommandBufferQueue};
pub use config::{DispatchMode, FlushConfig};
pub use flush_stamp::{FlushStamp, FlushStampTracker, FlushStampTrackingObj, FlushStampUpdateHelper};
pub use graphics_allocation::{AllocationRef, GraphicsAllocation, InspectAllocation};
pub use submission_aggregator::{ResourcePackage, SubmissionAggregator};

/// Error type for the whole library
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to submit the merged command buffers: {0}")]
    SubmissionFailed(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Failed to parse the configuration: {0}")]
    ConfigParse(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
