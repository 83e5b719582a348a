
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crate::error::Result;
use crate::frame::Frame;

/// Writer consumes media samples of one carrier type, synchronously and
/// fully before returning. Implementations that queue a sample must copy
/// it first.
pub trait Writer<T: ?Sized>: fmt::Display + Send {
    /// The rate the samples are denominated in: samples per second for PCM,
    /// the RTP clock rate for compressed video.
    fn sample_rate(&self) -> u32;
    fn write_sample(&mut self, sample: &T) -> Result<()>;
}

/// WriteCloser is a [`Writer`] that owns shutdown of its downstream.
/// `close` must be idempotent: the second call is a no-op repeating the
/// first call's result.
pub trait WriteCloser<T: ?Sized>: Writer<T> {
    fn close(&mut self) -> Result<()>;
}

/// A chain of writers carrying raw PCM16 frames.
pub type Pcm16Writer = Box<dyn WriteCloser<[i16]> + Send>;

/// A chain of writers carrying opaque compressed frames.
pub type FrameWriter = Box<dyn WriteCloser<Bytes> + Send>;

struct NopCloser<T: ?Sized, W: Writer<T>> {
    w: W,
    _marker: std::marker::PhantomData<fn(&T)>,
}

/// Adapts a [`Writer`] into a [`WriteCloser`] whose `close` does nothing.
pub fn nop_closer<T, W>(w: W) -> impl WriteCloser<T>
where
    T: ?Sized,
    W: Writer<T>,
{
    NopCloser {
        w,
        _marker: std::marker::PhantomData,
    }
}

impl<T: ?Sized, W: Writer<T>> fmt::Display for NopCloser<T, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.w)
    }
}

impl<T: ?Sized, W: Writer<T>> Writer<T> for NopCloser<T, W> {
    fn sample_rate(&self) -> u32 {
        self.w.sample_rate()
    }

    fn write_sample(&mut self, sample: &T) -> Result<()> {
        self.w.write_sample(sample)
    }
}

impl<T: ?Sized, W: Writer<T>> WriteCloser<T> for NopCloser<T, W> {
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// MultiWriter fans every sample out to all children. Writes continue past
/// failures; the last error wins. The sample rate is taken from the first
/// child.
pub struct MultiWriter<T: ?Sized> {
    writers: Vec<Box<dyn WriteCloser<T> + Send>>,
}

impl<T: ?Sized> MultiWriter<T> {
    pub fn new(writers: Vec<Box<dyn WriteCloser<T> + Send>>) -> Self {
        MultiWriter { writers }
    }
}

impl<T: ?Sized> fmt::Display for MultiWriter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MultiWriter({},{})", self.writers.len(), self.sample_rate())?;
        for (i, w) in self.writers.iter().enumerate() {
            write!(f, "; ${}-> {}", i + 1, w)?;
        }
        Ok(())
    }
}

impl<T: ?Sized> Writer<T> for MultiWriter<T> {
    fn sample_rate(&self) -> u32 {
        match self.writers.first() {
            Some(w) => w.sample_rate(),
            None => 0,
        }
    }

    fn write_sample(&mut self, sample: &T) -> Result<()> {
        let mut last = Ok(());
        for w in &mut self.writers {
            if let Err(err) = w.write_sample(sample) {
                last = Err(err);
            }
        }
        last
    }
}

impl<T: ?Sized> WriteCloser<T> for MultiWriter<T> {
    fn close(&mut self) -> Result<()> {
        let mut last = Ok(());
        for w in &mut self.writers {
            if let Err(err) = w.close() {
                last = Err(err);
            }
        }
        last
    }
}

/// Creates a writer that emits only full frames of `frame_size` samples to
/// the underlying writer. The remainder is carried between calls; `close`
/// flushes a final partial frame.
pub fn full_frames(w: Pcm16Writer, frame_size: usize) -> Pcm16Writer {
    if frame_size == 0 {
        panic!("invalid frame size");
    }
    Box::new(FrameBuffer {
        w,
        frame_size,
        buf: Vec::with_capacity(frame_size),
        closed: None,
    })
}

struct FrameBuffer {
    frame_size: usize,
    w: Pcm16Writer,
    buf: Vec<i16>,
    closed: Option<Result<()>>,
}

impl FrameBuffer {
    fn flush(&mut self, force: bool) -> Result<()> {
        let mut off = 0;
        let mut res = Ok(());
        while self.buf.len() - off >= self.frame_size {
            let frame = &self.buf[off..off + self.frame_size];
            if let Err(err) = self.w.write_sample(frame) {
                res = Err(err);
                break;
            }
            off += self.frame_size;
        }
        self.buf.drain(..off);
        res?;
        if force && !self.buf.is_empty() {
            self.w.write_sample(&self.buf)?;
            self.buf.clear();
        }
        Ok(())
    }
}

impl fmt::Display for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FrameBuf({}) -> {}", self.frame_size, self.w)
    }
}

impl Writer<[i16]> for FrameBuffer {
    fn sample_rate(&self) -> u32 {
        self.w.sample_rate()
    }

    fn write_sample(&mut self, sample: &[i16]) -> Result<()> {
        self.buf.extend_from_slice(sample);
        self.flush(false)
    }
}

impl WriteCloser<[i16]> for FrameBuffer {
    fn close(&mut self) -> Result<()> {
        if let Some(res) = &self.closed {
            return res.clone();
        }
        let flushed = self.flush(true);
        let closed = self.w.close();
        let res = flushed.and(closed);
        self.closed = Some(res.clone());
        res
    }
}

/// FileWriter dumps raw frame bytes into any `io::Write` destination,
/// buffered.
pub struct FileWriter<T: Frame + ?Sized, W: Write + Send> {
    bw: BufWriter<W>,
    sample_rate: u32,
    buf: Vec<u8>,
    closed: Option<Result<()>>,
    _marker: std::marker::PhantomData<fn(&T)>,
}

pub fn new_file_writer<T, W>(w: W, sample_rate: u32) -> FileWriter<T, W>
where
    T: Frame + ?Sized,
    W: Write + Send,
{
    FileWriter {
        bw: BufWriter::new(w),
        sample_rate,
        buf: Vec::new(),
        closed: None,
        _marker: std::marker::PhantomData,
    }
}

impl<T: Frame + ?Sized, W: Write + Send> fmt::Display for FileWriter<T, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawFile({})", self.sample_rate)
    }
}

impl<T: Frame + ?Sized, W: Write + Send> Writer<T> for FileWriter<T, W> {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn write_sample(&mut self, sample: &T) -> Result<()> {
        let sz = sample.size();
        self.buf.resize(sz, 0);
        let n = sample.copy_to(&mut self.buf)?;
        self.bw.write_all(&self.buf[..n])?;
        Ok(())
    }
}

impl<T: Frame + ?Sized, W: Write + Send> WriteCloser<T> for FileWriter<T, W> {
    fn close(&mut self) -> Result<()> {
        if let Some(res) = &self.closed {
            return res.clone();
        }
        let res = self.bw.flush().map_err(Into::into);
        self.closed = Some(res.clone());
        res
    }
}

/// DumpWriter tees every sample into `{name}.{ext}` while forwarding it
/// downstream. Dump failures are logged, never surfaced: instrumentation
/// must not stall the media path. If the file cannot be created the
/// original writer is returned unwrapped.
pub fn dump_writer<T>(
    ext: &str,
    name: &str,
    w: Box<dyn WriteCloser<T> + Send>,
) -> Box<dyn WriteCloser<T> + Send>
where
    T: Frame + ?Sized + 'static,
{
    let path = format!("{name}.{ext}");
    let file = match File::create(&path) {
        Ok(f) => f,
        Err(err) => {
            log::warn!("failed to create media dump {path}: {err}");
            return w;
        }
    };
    Box::new(DumpWriter {
        file: new_file_writer(file, w.sample_rate()),
        w,
    })
}

struct DumpWriter<T: Frame + ?Sized + 'static> {
    file: FileWriter<T, File>,
    w: Box<dyn WriteCloser<T> + Send>,
}

impl<T: Frame + ?Sized + 'static> fmt::Display for DumpWriter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Dump -> {}", self.w)
    }
}

impl<T: Frame + ?Sized + 'static> Writer<T> for DumpWriter<T> {
    fn sample_rate(&self) -> u32 {
        self.w.sample_rate()
    }

    fn write_sample(&mut self, sample: &T) -> Result<()> {
        if let Err(err) = self.file.write_sample(sample) {
            log::warn!("media dump write failed: {err}");
        }
        self.w.write_sample(sample)
    }
}

impl<T: Frame + ?Sized + 'static> WriteCloser<T> for DumpWriter<T> {
    fn close(&mut self) -> Result<()> {
        if let Err(err) = self.file.close() {
            log::warn!("media dump close failed: {err}");
        }
        self.w.close()
    }
}

/// Pcm16FrameWriter appends every incoming frame to a shared list. Useful
/// as a chain terminator in tests and diagnostics.
#[derive(Clone)]
pub struct Pcm16FrameWriter {
    frames: Arc<Mutex<Vec<Vec<i16>>>>,
    sample_rate: u32,
}

impl Pcm16FrameWriter {
    pub fn new(sample_rate: u32) -> Self {
        Pcm16FrameWriter {
            frames: Arc::new(Mutex::new(Vec::new())),
            sample_rate,
        }
    }

    pub fn frames(&self) -> Vec<Vec<i16>> {
        self.frames.lock().unwrap().clone()
    }
}

impl fmt::Display for Pcm16FrameWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PCM16Frames({})", self.sample_rate)
    }
}

impl Writer<[i16]> for Pcm16FrameWriter {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn write_sample(&mut self, sample: &[i16]) -> Result<()> {
        self.frames.lock().unwrap().push(sample.to_vec());
        Ok(())
    }
}

impl WriteCloser<[i16]> for Pcm16FrameWriter {
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
