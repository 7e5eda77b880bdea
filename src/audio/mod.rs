//! Audio capture and playback.

pub mod capture;
pub mod playback;

pub use capture::CaptureHandle;
pub use playback::PlaybackScheduler;

/// A block of mono f32 samples at a fixed sample rate.
///
/// Frames are moved between pipeline stages, never shared: the capture
/// callback produces them, the codec consumes them on the way up, and
/// the playback scheduler consumes them on the way down.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>) -> Self {
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
