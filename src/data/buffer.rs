//! Rolling frame buffer shared between the acquisition and reduction paths.
//!
//! The buffer holds at most `capacity` frames. Pushing into a full buffer evicts
//! the oldest frame first, so the contents are always the most recent
//! acquisitions in arrival order.
//!
//! # Concurrency
//!
//! The session owns the buffer behind [`SharedBuffer`]
//! (`Arc<parking_lot::RwLock<BufferStore>>`). Only the acquisition path takes
//! the write lock; reductions take the read lock, so a reader never observes a
//! half-applied push.

use ndarray::ArrayView2;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::data::reduction::BufferHandler;
use crate::error::{AppResult, DaqError};
use crate::hardware::Frame;

/// Buffer shared between the session (writer) and signal readers.
pub type SharedBuffer = Arc<RwLock<BufferStore>>;

/// Capacity-bounded FIFO of raw frames.
#[derive(Debug, Clone)]
pub struct BufferStore {
    capacity: usize,
    frames: VecDeque<Frame>,
    total_pushed: u64,
}

impl BufferStore {
    /// Create an empty buffer holding at most `capacity` frames.
    pub fn new(capacity: usize) -> AppResult<Self> {
        if capacity == 0 {
            return Err(DaqError::Configuration(
                "buffer capacity must be at least 1".into(),
            ));
        }
        Ok(Self {
            capacity,
            frames: VecDeque::with_capacity(capacity),
            total_pushed: 0,
        })
    }

    /// Wrap in the shared handle used by the session.
    pub fn into_shared(self) -> SharedBuffer {
        Arc::new(RwLock::new(self))
    }

    /// Maximum number of frames retained.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of frames currently buffered.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether no frames are buffered.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frames pushed since creation, including evicted ones.
    pub fn total_pushed(&self) -> u64 {
        self.total_pushed
    }

    /// Channel width of the buffered frames, if any.
    pub fn channel_count(&self) -> Option<usize> {
        self.frames.front().map(|f| f.ncols())
    }

    /// Append a frame, evicting the oldest one when full.
    ///
    /// A frame whose channel width differs from the buffered frames is rejected
    /// and the buffer is left untouched.
    pub fn push(&mut self, frame: Frame) -> AppResult<()> {
        if frame.ncols() == 0 || frame.nrows() == 0 {
            return Err(DaqError::Validation(format!(
                "frame has empty shape {:?}",
                frame.shape()
            )));
        }
        if let Some(expected) = self.channel_count() {
            if frame.ncols() != expected {
                return Err(DaqError::Shape {
                    expected,
                    actual: frame.ncols(),
                });
            }
        }

        if self.frames.len() == self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
        self.total_pushed += 1;
        Ok(())
    }

    /// Copy of the buffered frames, oldest first.
    pub fn snapshot(&self) -> Vec<Frame> {
        self.frames.iter().cloned().collect()
    }

    /// Reduce all buffered frames with `handler`.
    pub fn latest_reduced(&self, handler: &BufferHandler) -> AppResult<Frame> {
        if self.frames.is_empty() {
            return Err(DaqError::EmptyBuffer);
        }
        let views: Vec<ArrayView2<'_, f64>> = self.frames.iter().map(|f| f.view()).collect();
        handler.apply(&views)
    }

    /// Reduce the buffer if frames arrived after push number `seen`.
    ///
    /// Returns the push count the reduction covers together with the reduced
    /// frame, or `None` when nothing new arrived. Both come from the same
    /// borrow, so the count always matches the reduced contents.
    pub fn reduce_if_newer(
        &self,
        seen: u64,
        handler: &BufferHandler,
    ) -> AppResult<Option<(u64, Frame)>> {
        if self.frames.is_empty() || self.total_pushed == seen {
            return Ok(None);
        }
        let reduced = self.latest_reduced(handler)?;
        Ok(Some((self.total_pushed, reduced)))
    }

    /// Drop all buffered frames.
    pub fn clear(&mut self) {
        self.frames.clear();
    }
}
