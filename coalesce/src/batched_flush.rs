use coalesce_shared::{
    derive_new::new,
    format_bytes,
    log::{debug, error, info},
    parking_lot::Mutex,
    tracy_client::{span, Client},
};

use crate::{
    command_buffer::CommandBuffer,
    command_buffer_queue::CommandBufferId,
    config::{DispatchMode, FlushConfig},
    flush_stamp::{FlushStamp, FlushStampUpdateHelper},
    submission_aggregator::{ResourcePackage, SubmissionAggregator},
};

/// A run of command buffers that was merged into one hardware submission
pub struct MergedSubmission {
    /// Head of the run. Its batch buffer is the one that is submitted.
    pub primary: CommandBuffer,
    /// Command buffers chained behind the primary in recording order
    pub chained: Vec<CommandBuffer>,
    pub resource_package: ResourcePackage,
    pub total_used_size: usize,
    pub inspection_id: u32,
}

impl MergedSubmission {
    /// Task count of the last command buffer in the run
    pub fn last_task_count(&self) -> u32 {
        self.chained.last().unwrap_or(&self.primary).task_count()
    }

    /// Number of command buffers in the run
    pub fn command_buffer_count(&self) -> usize {
        1 + self.chained.len()
    }

    /// All command buffers of the run in recording order
    pub fn command_buffers(&self) -> impl Iterator<Item = &CommandBuffer> {
        std::iter::once(&self.primary).chain(self.chained.iter())
    }
}

/// OS specific backend that hands a merged submission to the hardware
pub trait SubmitBatch: Send {
    /// Submits the merged command buffers and returns the flush stamp of the submission
    fn submit(&mut self, submission: &MergedSubmission) -> crate::Result<FlushStamp>;
}

#[derive(new)]
struct FlushState<S> {
    submitter: S,
    #[new(default)]
    aggregator: SubmissionAggregator,
    #[new(default)]
    task_level: u32,
    #[new(default)]
    latest_flushed_task_count: u32,
    #[new(default)]
    latest_flush_stamp: FlushStamp,
}

/// Records command buffers and flushes them as merged submissions.
///
/// Recording and flushing lock the same mutex, so producers on other threads can record while
/// nothing is being flushed.
pub struct BatchedFlusher<S: SubmitBatch> {
    config: FlushConfig,
    state: Mutex<FlushState<S>>,
}

impl<S: SubmitBatch> BatchedFlusher<S> {
    /// Creates a new [`BatchedFlusher`] that submits through `submitter`.
    ///
    /// Fails with [`Error::InvalidConfig`](crate::Error::InvalidConfig) when the config doesn't validate.
    pub fn new(config: FlushConfig, submitter: S) -> crate::Result<Self> {
        config.validate()?;

        // The flush path opens profiling spans, which need a running client
        let _tracy_client = Client::start();

        #[cfg(feature = "deadlock_detection")]
        {
            static DEADLOCK_DETECTION: std::sync::Once = std::sync::Once::new();
            DEADLOCK_DETECTION.call_once(|| {
                std::thread::spawn(run_deadlock_detection);
            });
        }

        info!(
            "Creating BatchedFlusher in {} with a budget of {} for OS context {}",
            config.dispatch_mode,
            format_bytes(config.total_memory_budget()),
            config.os_context_id
        );
        Ok(Self {
            config,
            state: Mutex::new(FlushState::new(submitter)),
        })
    }

    pub fn config(&self) -> &FlushConfig {
        &self.config
    }

    /// Records the [`CommandBuffer`] for the next flush
    pub fn record(&self, command_buffer: CommandBuffer) -> CommandBufferId {
        self.state.lock().aggregator.record(command_buffer)
    }

    /// Submits all recorded command buffers.
    ///
    /// Consecutive command buffers are merged as long as they fit into the memory budget. Every
    /// merged run is submitted as one batch and the flush stamp of that submission is written into
    /// the completion signals of all command buffers of the run. When a submission fails, the
    /// failed run is dropped, the remaining command buffers stay recorded and the error is returned.
    pub fn flush_batched_submissions(&self) -> crate::Result<()> {
        if self.config.dispatch_mode == DispatchMode::ImmediateDispatch {
            return Ok(());
        }
        let _span = span!("flush_batched_submissions");

        let total_memory_budget = self.config.total_memory_budget();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        while !state.aggregator.command_buffers().is_empty() {
            let mut resource_package = ResourcePackage::new();
            let mut total_used_size = 0;
            state
                .aggregator
                .aggregate(&mut resource_package, &mut total_used_size, total_memory_budget, self.config.os_context_id);

            let queue = state.aggregator.command_buffers_mut();
            let Some(primary) = queue.remove_front_one() else {
                break;
            };
            let inspection_id = primary.inspection_id();

            let mut flush_stamps = FlushStampUpdateHelper::default();
            flush_stamps.insert(primary.flush_stamp());
            let mut chained = Vec::new();
            while queue.peek_head().is_some_and(|next| next.inspection_id() == inspection_id) {
                let Some(next) = queue.remove_front_one() else {
                    break;
                };
                flush_stamps.insert(next.flush_stamp());
                chained.push(next);
            }

            let submission = MergedSubmission {
                primary,
                chained,
                resource_package,
                total_used_size,
                inspection_id,
            };
            debug!(
                "Submitting {} command buffers with {} resources ({})",
                submission.command_buffer_count(),
                submission.resource_package.len(),
                format_bytes(submission.total_used_size)
            );

            let flush_stamp = match state.submitter.submit(&submission) {
                Ok(flush_stamp) => flush_stamp,
                Err(err) => {
                    error!(
                        "Submission of {} failed: {err}",
                        submission.primary.debug_info().format_one_line()
                    );
                    return Err(err);
                }
            };

            state.task_level += 1;
            flush_stamps.update_all(flush_stamp);
            state.latest_flush_stamp = flush_stamp;
            state.latest_flushed_task_count = submission.last_task_count();
        }
        Ok(())
    }

    /// Number of recorded command buffers that were not flushed yet
    pub fn pending_count(&self) -> usize {
        self.state.lock().aggregator.command_buffers().len()
    }

    /// Increases by one with every submission
    pub fn task_level(&self) -> u32 {
        self.state.lock().task_level
    }

    pub fn latest_flushed_task_count(&self) -> u32 {
        self.state.lock().latest_flushed_task_count
    }

    pub fn latest_flush_stamp(&self) -> FlushStamp {
        self.state.lock().latest_flush_stamp
    }

    /// Runs `f` with the aggregator while holding the lock
    pub fn with_aggregator<R>(&self, f: impl FnOnce(&mut SubmissionAggregator) -> R) -> R {
        f(&mut self.state.lock().aggregator)
    }

    /// Runs `f` with the submitter while holding the lock
    pub fn with_submitter<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(&mut self.state.lock().submitter)
    }
}

#[cfg(feature = "deadlock_detection")]
fn run_deadlock_detection() {
    use coalesce_shared::parking_lot::deadlock;
    use std::{thread, time::Duration};

    info!("Deadlock detection thread started");

    loop {
        thread::sleep(Duration::from_secs(1));
        let deadlocks = deadlock::check_deadlock();
        if deadlocks.is_empty() {
            continue;
        }

        error!("{} deadlocks detected", deadlocks.len());
        for (i, threads) in deadlocks.iter().enumerate() {
            error!("Deadlock #{i}");
            for t in threads {
                error!("Thread Id {:#?}", t.thread_id());
                error!("{:#?}", t.backtrace());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use coalesce_shared::debug_info;
    use coalesce_test::{
        setup_logger,
        spectral::{assert_that, prelude::*},
    };

    use super::*;
    use crate::{
        command_buffer::tests::{new_allocations, new_command_buffer},
        flush_stamp::FlushStampTracker,
        graphics_allocation::AllocationRef,
        Error,
    };

    /// What the backend saw of one submission
    #[derive(Debug, Clone, PartialEq)]
    struct SubmittedBatch {
        command_buffer_names: Vec<String>,
        resource_sizes: Vec<usize>,
        total_used_size: usize,
    }

    struct MockSubmitter {
        flush_stamp: FlushStamp,
        fail_at: Option<usize>,
        submitted: Vec<SubmittedBatch>,
    }

    impl MockSubmitter {
        fn new(flush_stamp: FlushStamp) -> Self {
            Self {
                flush_stamp,
                fail_at: None,
                submitted: Vec::new(),
            }
        }
    }

    impl SubmitBatch for MockSubmitter {
        fn submit(&mut self, submission: &MergedSubmission) -> crate::Result<FlushStamp> {
            if self.fail_at == Some(self.submitted.len()) {
                return Err(Error::SubmissionFailed("device lost".to_owned()));
            }
            self.submitted.push(SubmittedBatch {
                command_buffer_names: submission
                    .command_buffers()
                    .map(|command_buffer| command_buffer.debug_info().name().to_owned())
                    .collect(),
                resource_sizes: submission.resource_package.iter().map(|a| a.underlying_buffer_size()).collect(),
                total_used_size: submission.total_used_size,
            });
            self.flush_stamp += 1;
            Ok(self.flush_stamp)
        }
    }

    fn config_with_budget(budget: u64) -> FlushConfig {
        FlushConfig {
            global_memory_size: budget,
            memory_budget_percent: 100,
            ..Default::default()
        }
    }

    /// Command buffer whose completion signal is shared with the `producer`
    fn new_tracked_command_buffer(name: &'static str, surfaces: &[&AllocationRef], producer: &FlushStampTracker, task_count: u32) -> CommandBuffer {
        let mut command_buffer = CommandBuffer::builder()
            .with_surfaces(surfaces.iter().map(|surface| (*surface).clone()))
            .with_task_count(task_count)
            .with_debug_info(debug_info!(name))
            .build();
        if let Some(stamp_object) = producer.stamp_reference() {
            command_buffer.flush_stamp_mut().replace_stamp_object(stamp_object.clone());
        }
        command_buffer
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = FlushConfig {
            global_memory_size: 100,
            memory_budget_percent: 250,
            ..Default::default()
        };
        let result = BatchedFlusher::new(config, MockSubmitter::new(0));
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn immediate_dispatch_does_nothing() {
        let config = FlushConfig {
            dispatch_mode: DispatchMode::ImmediateDispatch,
            ..Default::default()
        };
        let flusher = BatchedFlusher::new(config, MockSubmitter::new(0)).unwrap();
        flusher.record(new_command_buffer("a", &[]));
        flusher.flush_batched_submissions().unwrap();
        assert_eq!(flusher.pending_count(), 1);
        flusher.with_submitter(|submitter| assert!(submitter.submitted.is_empty()));
    }

    #[test]
    fn empty_flush() {
        let flusher = BatchedFlusher::new(FlushConfig::default(), MockSubmitter::new(0)).unwrap();
        flusher.flush_batched_submissions().unwrap();
        assert_eq!(flusher.task_level(), 0);
        assert_eq!(flusher.with_aggregator(|aggregator| aggregator.generation_counter()), 1);
    }

    #[test]
    fn merged_run_is_submitted_once() {
        setup_logger();
        let [a1, a2, a3, a4, a5, a6, a7] = new_allocations([1, 2, 3, 4, 5, 6, 7]);
        let flusher = BatchedFlusher::new(config_with_budget(1024), MockSubmitter::new(0)).unwrap();
        flusher.record(new_command_buffer("a", &[&a5, &a6, &a5, &a3, &a6]));
        flusher.record(new_command_buffer("b", &[&a1, &a2, &a5, &a4]));
        flusher.record(new_command_buffer("c", &[&a7, &a5]));

        flusher.flush_batched_submissions().unwrap();

        assert_eq!(flusher.pending_count(), 0);
        assert_eq!(flusher.task_level(), 1);
        flusher.with_submitter(|submitter| {
            assert_that!(submitter.submitted).is_equal_to(vec![SubmittedBatch {
                command_buffer_names: vec!["a".to_owned(), "b".to_owned(), "c".to_owned()],
                resource_sizes: vec![5, 6, 3, 1, 2, 4, 7],
                total_used_size: 28,
            }]);
        });
    }

    #[test]
    fn budget_splits_into_several_submissions() {
        let [a1, a2, a3, a4, a5, a6, a7] = new_allocations([1, 2, 3, 4, 5, 6, 7]);
        let flusher = BatchedFlusher::new(config_with_budget(22), MockSubmitter::new(0)).unwrap();
        flusher.record(new_command_buffer("a", &[&a5, &a6, &a5, &a3, &a6]));
        flusher.record(new_command_buffer("b", &[&a1, &a2, &a5, &a4]));
        flusher.record(new_command_buffer("c", &[&a7, &a5]));

        flusher.flush_batched_submissions().unwrap();

        assert_eq!(flusher.task_level(), 2);
        assert_eq!(flusher.latest_flush_stamp(), 2);
        flusher.with_submitter(|submitter| {
            assert_eq!(submitter.submitted.len(), 2);
            assert_that!(submitter.submitted[0].command_buffer_names).is_equal_to(vec!["a".to_owned(), "b".to_owned()]);
            assert_eq!(submitter.submitted[0].total_used_size, 21);
            assert_that!(submitter.submitted[1].command_buffer_names).is_equal_to(vec!["c".to_owned()]);
            assert_that!(submitter.submitted[1].resource_sizes).is_equal_to(vec![7, 5]);
            assert_eq!(submitter.submitted[1].total_used_size, 12);
        });
    }

    #[test]
    fn flush_stamps_of_merged_command_buffers_are_updated() {
        // Given
        let queue1 = FlushStampTracker::new(true);
        let queue2 = FlushStampTracker::new(true);
        let [a1, a2] = new_allocations([1, 2]);
        let flusher = BatchedFlusher::new(FlushConfig::default(), MockSubmitter::new(5)).unwrap();
        flusher.record(new_tracked_command_buffer("a", &[&a1], &queue1, 1));
        flusher.record(new_tracked_command_buffer("b", &[&a2], &queue2, 2));
        assert_eq!(Arc::strong_count(queue1.stamp_reference().unwrap()), 2);
        assert_eq!(Arc::strong_count(queue2.stamp_reference().unwrap()), 2);

        // When
        flusher.flush_batched_submissions().unwrap();

        // Then
        assert_eq!(flusher.latest_flush_stamp(), 6);
        assert_eq!(queue1.peek_stamp(), 6);
        assert_eq!(queue2.peek_stamp(), 6);
        assert_eq!(flusher.latest_flushed_task_count(), 2);
        assert_eq!(Arc::strong_count(queue1.stamp_reference().unwrap()), 1);
        assert_eq!(Arc::strong_count(queue2.stamp_reference().unwrap()), 1);
    }

    #[test]
    fn flush_stamps_of_separate_submissions_differ() {
        // Given
        let queue1 = FlushStampTracker::new(true);
        let queue2 = FlushStampTracker::new(true);
        let [a1, a2] = new_allocations([1, 2]);
        let flusher = BatchedFlusher::new(FlushConfig::default(), MockSubmitter::new(5)).unwrap();
        flusher.record(new_tracked_command_buffer("a", &[&a1], &queue1, 1));
        let mut second = new_tracked_command_buffer("b", &[&a2], &queue2, 2);
        second.batch_buffer_mut().low_priority = true;
        flusher.record(second);

        // When
        flusher.flush_batched_submissions().unwrap();

        // Then
        assert_eq!(queue1.peek_stamp(), 6);
        assert_eq!(queue2.peek_stamp(), 7);
        assert_eq!(flusher.task_level(), 2);
        assert_eq!(flusher.latest_flushed_task_count(), 2);
    }

    #[test]
    fn failed_submission_keeps_the_rest() {
        // Given
        let [a1, a2, a3] = new_allocations([1, 2, 3]);
        let mut submitter = MockSubmitter::new(0);
        submitter.fail_at = Some(1);
        let flusher = BatchedFlusher::new(FlushConfig::default(), submitter).unwrap();
        flusher.record(new_command_buffer("a", &[&a1]));
        let mut second = new_command_buffer("b", &[&a2]);
        second.batch_buffer_mut().requires_coherency = true;
        flusher.record(second);
        let mut third = new_command_buffer("c", &[&a3]);
        third.batch_buffer_mut().throttle = crate::QueueThrottle::High;
        flusher.record(third);

        // When
        let result = flusher.flush_batched_submissions();

        // Then
        assert!(matches!(result, Err(Error::SubmissionFailed(_))));
        assert_eq!(flusher.task_level(), 1);
        assert_eq!(flusher.pending_count(), 1);
        flusher.with_aggregator(|aggregator| {
            assert_eq!(aggregator.command_buffers().peek_head().unwrap().debug_info().name(), "c");
        });
    }

    #[test]
    fn record_from_several_threads() {
        // Given
        let [shared] = new_allocations([4]);
        let flusher = Arc::new(BatchedFlusher::new(FlushConfig::default(), MockSubmitter::new(0)).unwrap());
        let handles = (0..4)
            .map(|_| {
                let flusher = flusher.clone();
                let shared = shared.clone();
                thread::spawn(move || {
                    for _ in 0..8 {
                        flusher.record(new_command_buffer("worker", &[&shared]));
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(flusher.pending_count(), 32);

        // When
        flusher.flush_batched_submissions().unwrap();

        // Then
        flusher.with_submitter(|submitter| {
            assert_eq!(submitter.submitted.len(), 1);
            assert_eq!(submitter.submitted[0].command_buffer_names.len(), 32);
            assert_that!(submitter.submitted[0].resource_sizes).is_equal_to(vec![4]);
        });
    }
}
