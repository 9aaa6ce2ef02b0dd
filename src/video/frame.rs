//! Decoded video frames.

use bytes::Bytes;

/// Bytes per pixel in packed RGB24 layout.
pub const BYTES_PER_PIXEL: usize = 3;

/// Size in bytes of one packed RGB24 frame.
pub const fn frame_size(width: u32, height: u32) -> usize {
    width as usize * height as usize * BYTES_PER_PIXEL
}

/// A single decoded video frame in packed RGB24 layout.
///
/// Pixel data is row-major, three bytes per pixel (R, G, B), no row padding.
/// Frames are immutable once constructed; cloning is cheap because the pixel
/// data is reference-counted, so consumers can poll the latest frame without
/// copying it.
#[derive(Debug, Clone)]
pub struct Frame {
    data: Bytes,
    width: u32,
    height: u32,
}

impl Frame {
    /// Copy a raw RGB24 buffer into an owned frame.
    ///
    /// Returns `None` if the buffer length does not match
    /// `width * height * 3`, which indicates a framing error in the raw
    /// stream rather than a valid frame.
    pub fn from_raw(raw: &[u8], width: u32, height: u32) -> Option<Self> {
        if raw.len() != frame_size(width, height) {
            return None;
        }
        Some(Self {
            data: Bytes::copy_from_slice(raw),
            width,
            height,
        })
    }

    /// Raw pixel data.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the frame carries no pixels.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
