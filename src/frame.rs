#[cfg(test)]
mod frame_test;

use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;

use crate::error::{Error, Result};

/// A Frame is an opaque, byte-addressable media sample.
pub trait Frame {
    /// Size of the frame in bytes.
    fn size(&self) -> usize;
    /// Copies the frame content into `dst`, returning the number of bytes
    /// written. Fails with [`Error::ErrShortBuffer`] if `dst` is smaller
    /// than [`Frame::size`]; nothing is written in that case.
    fn copy_to(&self, dst: &mut [u8]) -> Result<usize>;
}

/// PCM16 frames are sequences of signed 16-bit linear samples,
/// serialized little-endian.
impl Frame for [i16] {
    fn size(&self) -> usize {
        self.len() * 2
    }

    fn copy_to(&self, dst: &mut [u8]) -> Result<usize> {
        let sz = self.size();
        if dst.len() < sz {
            return Err(Error::ErrShortBuffer);
        }
        LittleEndian::write_i16_into(self, &mut dst[..sz]);
        Ok(sz)
    }
}

/// Compressed frames are opaque byte payloads.
impl Frame for Bytes {
    fn size(&self) -> usize {
        self.len()
    }

    fn copy_to(&self, dst: &mut [u8]) -> Result<usize> {
        if dst.len() < self.len() {
            return Err(Error::ErrShortBuffer);
        }
        dst[..self.len()].copy_from_slice(self);
        Ok(self.len())
    }
}

impl Frame for [u8] {
    fn size(&self) -> usize {
        self.len()
    }

    fn copy_to(&self, dst: &mut [u8]) -> Result<usize> {
        if dst.len() < self.len() {
            return Err(Error::ErrShortBuffer);
        }
        dst[..self.len()].copy_from_slice(self);
        Ok(self.len())
    }
}
