#[cfg(test)]
mod resample_test;

use std::fmt;

use crate::error::Result;
use crate::writer::{Pcm16Writer, WriteCloser, Writer};

/// Wraps `w` so the returned writer accepts PCM16 at `rate` and forwards
/// linearly interpolated samples at `w.sample_rate()`. Phase carries across
/// calls, so frame boundaries do not matter. If the rates already match,
/// `w` is returned unchanged.
pub fn resample_writer(w: Pcm16Writer, rate: u32) -> Pcm16Writer {
    if rate == 0 {
        panic!("invalid sample rate");
    }
    if w.sample_rate() == rate {
        return w;
    }
    let step = f64::from(rate) / f64::from(w.sample_rate());
    Box::new(Resampler {
        w,
        rate,
        step,
        pos: 0.0,
        prev: 0,
        started: false,
        out: Vec::new(),
    })
}

struct Resampler {
    w: Pcm16Writer,
    rate: u32,
    // input samples consumed per output sample
    step: f64,
    // position of the next output sample, in input samples, relative to `prev`
    pos: f64,
    prev: i16,
    started: bool,
    out: Vec<i16>,
}

impl fmt::Display for Resampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Resample({}->{}) -> {}", self.rate, self.w.sample_rate(), self.w)
    }
}

impl Writer<[i16]> for Resampler {
    fn sample_rate(&self) -> u32 {
        self.rate
    }

    fn write_sample(&mut self, sample: &[i16]) -> Result<()> {
        let mut rest = sample;
        if !self.started {
            if rest.is_empty() {
                return Ok(());
            }
            self.prev = rest[0];
            self.pos = 0.0;
            self.started = true;
            rest = &rest[1..];
        }

        let n = rest.len();
        self.out.clear();
        loop {
            let i = self.pos.floor() as usize;
            let frac = self.pos - i as f64;
            let s0 = if i == 0 {
                self.prev
            } else if i <= n {
                rest[i - 1]
            } else {
                break;
            };
            let v = if frac == 0.0 {
                if i > n {
                    break;
                }
                f64::from(s0)
            } else {
                if i >= n {
                    break;
                }
                let s1 = rest[i];
                f64::from(s0) + frac * (f64::from(s1) - f64::from(s0))
            };
            self.out.push(v.round() as i16);
            self.pos += self.step;
        }

        if n > 0 {
            self.prev = rest[n - 1];
            self.pos -= n as f64;
        }
        if self.out.is_empty() {
            return Ok(());
        }
        self.w.write_sample(&self.out)
    }
}

impl WriteCloser<[i16]> for Resampler {
    fn close(&mut self) -> Result<()> {
        self.w.close()
    }
}
