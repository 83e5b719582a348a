
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::Result;
use crate::resample::resample_writer;
use crate::writer::{Pcm16Writer, WriteCloser, Writer};

/// SwitchWriter is a PCM sink whose downstream can be swapped mid-call.
/// Handles are cheap to clone and share one underlying slot; a reader can
/// never observe a torn or freed sink.
///
/// The sample rate is committed once: either at construction, or exactly
/// one later [`SwitchWriter::set_sample_rate`] call when constructed with
/// the `-1` sentinel. Violations are configuration bugs and panic.
#[derive(Clone)]
pub struct SwitchWriter {
    inner: Arc<SwitchInner>,
}

struct SwitchInner {
    w: Mutex<Option<Pcm16Writer>>,
    sample_rate: AtomicI32,
    disabled: AtomicBool,
}

impl SwitchWriter {
    /// Creates a switch committed to `sample_rate`, or with the rate left
    /// unset when `sample_rate` is negative.
    pub fn new(sample_rate: i32) -> Self {
        // Passing -1 delays initialization. If the rate is still unset when
        // another writer is attached, sample_rate() panics instead.
        if sample_rate == 0 {
            panic!("no sample rate specified");
        }
        let rate = if sample_rate < 0 { -1 } else { sample_rate };
        SwitchWriter {
            inner: Arc::new(SwitchInner {
                w: Mutex::new(None),
                sample_rate: AtomicI32::new(rate),
                disabled: AtomicBool::new(false),
            }),
        }
    }

    pub fn enable(&self) {
        self.inner.disabled.store(false, Ordering::SeqCst);
    }

    pub fn disable(&self) {
        self.inner.disabled.store(true, Ordering::SeqCst);
    }

    /// Sets the sample rate on a switch constructed with `-1`. Panics if
    /// the rate was already committed.
    pub fn set_sample_rate(&self, rate: u32) {
        if rate == 0 {
            panic!("invalid sample rate");
        }
        if self
            .inner
            .sample_rate
            .compare_exchange(-1, rate as i32, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            panic!("sample rate can only be changed once");
        }
    }

    fn committed_rate(&self) -> u32 {
        let rate = self.inner.sample_rate.load(Ordering::SeqCst);
        if rate == 0 {
            panic!("switch writer not initialized");
        } else if rate < 0 {
            panic!("sample rate is unset on a switch writer");
        }
        rate as u32
    }

    /// Replaces the downstream writer and returns the old one. The caller
    /// is responsible for closing the returned writer. A writer with a
    /// mismatched sample rate is wrapped in a resampler first.
    pub fn swap(&self, w: Option<Pcm16Writer>) -> Option<Pcm16Writer> {
        let w = w.map(|w| {
            let rate = self.committed_rate();
            if rate != w.sample_rate() {
                resample_writer(w, rate)
            } else {
                w
            }
        });
        let mut slot = self.inner.w.lock().unwrap();
        std::mem::replace(&mut *slot, w)
    }
}

impl fmt::Display for SwitchWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rate = self.inner.sample_rate.load(Ordering::SeqCst);
        let slot = self.inner.w.lock().unwrap();
        match &*slot {
            Some(w) => write!(f, "Switch({rate}) -> {w}"),
            None => write!(f, "Switch({rate}) -> <none>"),
        }
    }
}

impl Writer<[i16]> for SwitchWriter {
    fn sample_rate(&self) -> u32 {
        self.committed_rate()
    }

    fn write_sample(&mut self, sample: &[i16]) -> Result<()> {
        if self.inner.disabled.load(Ordering::SeqCst) {
            return Ok(());
        }
        let mut slot = self.inner.w.lock().unwrap();
        match &mut *slot {
            Some(w) => w.write_sample(sample),
            None => Ok(()),
        }
    }
}

impl WriteCloser<[i16]> for SwitchWriter {
    fn close(&mut self) -> Result<()> {
        let old = {
            let mut slot = self.inner.w.lock().unwrap();
            slot.take()
        };
        match old {
            Some(mut w) => w.close(),
            None => Ok(()),
        }
    }
}
