use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

pub type FlushStamp = u64;

/// Completion object that is shared between everything waiting for the same submission.
///
/// Holds the flush stamp of the hardware submission that contained the work.
#[derive(Debug, Default)]
pub struct FlushStampTrackingObj {
    flush_stamp: AtomicU64,
    initialized: AtomicBool,
}

impl FlushStampTrackingObj {
    /// Latest flush stamp that was written into the object
    pub fn flush_stamp(&self) -> FlushStamp {
        self.flush_stamp.load(Ordering::Acquire)
    }

    /// Whether a flush stamp was written at least once
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    fn set(&self, flush_stamp: FlushStamp) {
        self.flush_stamp.store(flush_stamp, Ordering::Release);
        self.initialized.store(true, Ordering::Release);
    }
}

/// Handle to a [`FlushStampTrackingObj`] that may not be allocated
#[derive(Debug)]
pub struct FlushStampTracker {
    stamp_reference: Option<Arc<FlushStampTrackingObj>>,
}

impl FlushStampTracker {
    /// Creates a new tracker. The tracking object is only allocated when `allocate_objects` is true.
    pub fn new(allocate_objects: bool) -> Self {
        Self {
            stamp_reference: allocate_objects.then(|| Arc::new(FlushStampTrackingObj::default())),
        }
    }

    /// Returns the tracking object if one is allocated
    pub fn stamp_reference(&self) -> Option<&Arc<FlushStampTrackingObj>> {
        self.stamp_reference.as_ref()
    }

    /// Returns the flush stamp or 0 if no tracking object is allocated
    pub fn peek_stamp(&self) -> FlushStamp {
        self.stamp_reference.as_ref().map_or(0, |obj| obj.flush_stamp())
    }

    /// Writes the flush stamp. Does nothing when no tracking object is allocated.
    pub fn set_stamp(&self, flush_stamp: FlushStamp) {
        if let Some(obj) = &self.stamp_reference {
            obj.set(flush_stamp);
        }
    }

    /// Shares the given tracking object with this tracker and releases the previous one
    pub fn replace_stamp_object(&mut self, stamp_object: Arc<FlushStampTrackingObj>) {
        self.stamp_reference = Some(stamp_object);
    }
}

impl Default for FlushStampTracker {
    fn default() -> Self {
        Self::new(false)
    }
}

/// Collects the tracking objects of all command buffers that end up in one submission
#[derive(Debug, Default)]
pub struct FlushStampUpdateHelper {
    flush_stamps: Vec<Arc<FlushStampTrackingObj>>,
}

impl FlushStampUpdateHelper {
    /// Adds the tracking object of the given tracker. Trackers without an object are skipped.
    pub fn insert(&mut self, tracker: &FlushStampTracker) {
        if let Some(obj) = tracker.stamp_reference() {
            self.flush_stamps.push(obj.clone());
        }
    }

    /// Writes the flush stamp into every collected tracking object
    pub fn update_all(&self, flush_stamp: FlushStamp) {
        for obj in &self.flush_stamps {
            obj.set(flush_stamp);
        }
    }

    pub fn len(&self) -> usize {
        self.flush_stamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flush_stamps.is_empty()
    }
}
