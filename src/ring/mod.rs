
/// A fixed-capacity ring of samples. Writes never block and never fail:
/// when the ring is full the oldest samples are overwritten. Used as the
/// per-input buffer of the mixer, where a slow consumer must cost frames,
/// not stall the producer.
pub struct Buffer<T: Copy + Default> {
    buf: Vec<T>,
    read: usize,
    len: usize,
}

impl<T: Copy + Default> Buffer<T> {
    pub fn new(size: usize) -> Self {
        if size == 0 {
            panic!("invalid ring buffer size");
        }
        Buffer {
            buf: vec![T::default(); size],
            read: 0,
            len: 0,
        }
    }

    /// Capacity of the ring.
    pub fn size(&self) -> usize {
        self.buf.len()
    }

    /// Number of samples currently buffered.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends `data`, dropping the oldest samples if the ring overflows.
    /// Returns the number of samples dropped.
    pub fn write(&mut self, data: &[T]) -> usize {
        let cap = self.buf.len();
        let mut dropped = 0;

        // Only the trailing window of an oversized write can survive.
        let src = if data.len() > cap {
            dropped += data.len() - cap;
            &data[data.len() - cap..]
        } else {
            data
        };

        let overflow = (self.len + src.len()).saturating_sub(cap);
        if overflow > 0 {
            self.read = (self.read + overflow) % cap;
            self.len -= overflow;
            dropped += overflow;
        }

        let w = (self.read + self.len) % cap;
        let head = src.len().min(cap - w);
        self.buf[w..w + head].copy_from_slice(&src[..head]);
        if head < src.len() {
            self.buf[..src.len() - head].copy_from_slice(&src[head..]);
        }
        self.len += src.len();
        dropped
    }

    /// Drains up to `out.len()` samples into `out`, returning how many were
    /// copied.
    pub fn read(&mut self, out: &mut [T]) -> usize {
        let cap = self.buf.len();
        let n = out.len().min(self.len);
        let head = n.min(cap - self.read);
        out[..head].copy_from_slice(&self.buf[self.read..self.read + head]);
        if head < n {
            out[head..n].copy_from_slice(&self.buf[..n - head]);
        }
        self.read = (self.read + n) % cap;
        self.len -= n;
        n
    }
}
