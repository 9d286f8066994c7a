//! Signals: the reading handed to the display layer.
//!
//! A [`Signal`] wraps one 2-D block of intensities (rows are sub-acquisitions,
//! or a single row after reduction; columns are channels) and exposes the
//! channel indices and the intensity row the display plots.
//!
//! Two ways to get one:
//! - [`await_read_signal`] waits for one acquisition and bypasses the buffer.
//! - [`read_signal`] reduces whatever is buffered right now and returns
//!   `Ok(None)` when nothing has arrived yet.

use ndarray::Ix2;
use serde::{Deserialize, Serialize};

use crate::data::{BufferHandler, SharedBuffer};
use crate::error::{AppResult, DaqError};
use crate::hardware::{Frame, RawFrame};
use crate::session::DeviceSession;

/// Reject anything that is not a non-empty 2-D array.
pub(crate) fn require_frame(data: RawFrame) -> AppResult<Frame> {
    let ndim = data.ndim();
    let frame = data.into_dimensionality::<Ix2>().map_err(|_| {
        DaqError::Validation(format!(
            "Two dimensional data are supported only, got {ndim} dimensions"
        ))
    })?;
    ensure_non_empty(&frame)?;
    Ok(frame)
}

fn ensure_non_empty(frame: &Frame) -> AppResult<()> {
    if frame.nrows() == 0 || frame.ncols() == 0 {
        return Err(DaqError::Validation(format!(
            "signal data has empty shape {:?}",
            frame.shape()
        )));
    }
    Ok(())
}

/// Channel-indexed intensity reading.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    data: Frame,
}

impl Signal {
    /// Build from data of unknown rank. Fails unless the data is 2-D.
    pub fn new(data: RawFrame) -> AppResult<Self> {
        Ok(Self {
            data: require_frame(data)?,
        })
    }

    /// Build from an already 2-D frame.
    pub fn from_frame(data: Frame) -> AppResult<Self> {
        ensure_non_empty(&data)?;
        Ok(Self { data })
    }

    /// Number of channels.
    pub fn channel_count(&self) -> usize {
        self.data.ncols()
    }

    /// Channel indices `0..channel_count`.
    pub fn channel_indices(&self) -> Vec<usize> {
        (0..self.channel_count()).collect()
    }

    /// Intensity per channel (first row of the data).
    pub fn values(&self) -> Vec<f64> {
        self.data.row(0).to_vec()
    }

    /// Underlying data.
    pub fn data(&self) -> &Frame {
        &self.data
    }

    /// Payload for the display layer.
    pub fn to_update(&self) -> SignalUpdate {
        SignalUpdate {
            channel_indices: self.channel_indices(),
            values: self.values(),
            channel_count: self.channel_count(),
        }
    }
}

/// What the display layer receives per update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalUpdate {
    /// `0..channel_count`
    pub channel_indices: Vec<usize>,
    /// Intensity per channel
    pub values: Vec<f64>,
    /// Number of channels
    pub channel_count: usize,
}

/// Wait for one acquisition and wrap it as a signal.
///
/// The buffer is not touched.
pub async fn await_read_signal(session: &DeviceSession) -> AppResult<Signal> {
    let frame = session.await_read().await?;
    Signal::new(frame)
}

/// Reduce the current buffer contents into a signal.
///
/// Returns `Ok(None)` when the buffer is empty. Never blocks on the device and
/// never mutates the buffer.
pub fn read_signal(buffer: &SharedBuffer, handler: &BufferHandler) -> AppResult<Option<Signal>> {
    let reduced = match buffer.read().latest_reduced(handler) {
        Ok(frame) => frame,
        Err(DaqError::EmptyBuffer) => return Ok(None),
        Err(e) => return Err(e),
    };
    Signal::from_frame(reduced).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{BufferStore, HandlerRegistry};
    use ndarray::{array, ArrayD, IxDyn};

    #[test]
    fn two_dimensional_data_is_accepted() {
        let signal = Signal::new(array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]].into_dyn()).unwrap();
        assert_eq!(signal.channel_count(), 3);
        assert_eq!(signal.channel_indices(), vec![0, 1, 2]);
        assert_eq!(signal.values(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn other_ranks_are_rejected() {
        for shape in [vec![4], vec![2, 2, 2], vec![1, 1, 1, 1], vec![]] {
            let len: usize = shape.iter().product();
            let data = ArrayD::from_shape_vec(IxDyn(&shape), vec![0.0; len]).unwrap();
            let result = Signal::new(data);
            assert!(
                matches!(result, Err(DaqError::Validation(_))),
                "shape {:?} should be rejected",
                shape
            );
        }
    }

    #[test]
    fn empty_shapes_are_rejected() {
        let data = ArrayD::from_shape_vec(IxDyn(&[1, 0]), vec![]).unwrap();
        assert!(Signal::new(data).is_err());
        assert!(Signal::from_frame(Frame::zeros((0, 4))).is_err());
    }

    #[test]
    fn update_payload_matches_signal() {
        let signal = Signal::from_frame(array![[0.5, 1.5]]).unwrap();
        let update = signal.to_update();
        assert_eq!(update.channel_indices, vec![0, 1]);
        assert_eq!(update.values, vec![0.5, 1.5]);
        assert_eq!(update.channel_count, 2);

        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["channel_count"], 2);
    }

    #[test]
    fn read_signal_on_empty_buffer_is_none() {
        let buffer = BufferStore::new(3).unwrap().into_shared();
        let handler = HandlerRegistry::builtin().resolve("average").unwrap();
        assert!(read_signal(&buffer, &handler).unwrap().is_none());
    }

    #[test]
    fn read_signal_reduces_buffer() {
        let buffer = BufferStore::new(3).unwrap().into_shared();
        {
            let mut guard = buffer.write();
            guard.push(array![[1.0, 2.0]]).unwrap();
            guard.push(array![[3.0, 4.0]]).unwrap();
            guard.push(array![[5.0, 6.0]]).unwrap();
        }
        let handler = HandlerRegistry::builtin().resolve("average").unwrap();

        let signal = read_signal(&buffer, &handler).unwrap().unwrap();
        assert_eq!(signal.values(), vec![3.0, 4.0]);
        assert_eq!(signal.channel_indices(), vec![0, 1]);
        assert_eq!(buffer.read().len(), 3);
    }
}
