//! Captured frames.
//!
//! A `Frame` lives for exactly one tick: a source produces it, the detector reads
//! it, and it is dropped before the next tick begins. There is no frame buffer;
//! a frame that was not scored in its own tick is never scored later.

use std::time::{Duration, Instant};

/// Bytes per pixel for the packed RGB layout every source produces.
pub const RGB_CHANNELS: usize = 3;

/// One decoded RGB frame.
///
/// Not `Clone`: a frame has exactly one owner for its tick.
pub struct Frame {
    data: Vec<u8>,

    pub width: u32,
    pub height: u32,

    /// Per-source capture counter (1-based).
    pub sequence: u64,

    captured_at: Instant,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u64) -> Self {
        Self {
            data,
            width,
            height,
            sequence,
            captured_at: Instant::now(),
        }
    }

    /// Packed RGB pixels, row-major.
    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Byte length implied by the dimensions, `None` on overflow.
    pub fn expected_len(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)
            .and_then(|v| v.checked_mul(RGB_CHANNELS))
    }

    /// True when the pixel buffer matches the dimensions.
    pub fn is_well_formed(&self) -> bool {
        self.width > 0 && self.height > 0 && self.expected_len() == Some(self.data.len())
    }

    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .field("bytes", &self.data.len())
            .finish()
    }
}
