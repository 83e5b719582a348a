#[cfg(test)]
mod mixer_test;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::error::{Error, Result};
use crate::ring;
use crate::writer::{Pcm16Writer, WriteCloser, Writer};

pub const DEFAULT_INPUT_BUFFER_FRAMES: usize = 5;
pub const DEFAULT_INPUT_BUFFER_MIN: usize = DEFAULT_INPUT_BUFFER_FRAMES / 2 + 1;

/// Counters for every recoverable anomaly in the mixer. All fields are
/// updated atomically; the mixer itself logs nothing.
#[derive(Debug, Default)]
pub struct Stats {
    pub tracks: AtomicI64,
    pub tracks_total: AtomicU64,
    pub restarts: AtomicU64,
    pub timing_resets: AtomicU64,

    pub mixes: AtomicU64,
    pub timed_mixes: AtomicU64,
    pub jump_mixes: AtomicU64,
    pub zero_mixes: AtomicU64,
    pub negative_mixes: AtomicU64,

    pub input_samples: AtomicU64,
    pub input_frames: AtomicU64,
    pub input_samples_dropped: AtomicU64,
    pub input_frames_dropped: AtomicU64,

    pub mixed_samples: AtomicU64,
    pub mixed_frames: AtomicU64,

    pub output_samples: AtomicU64,
    pub output_frames: AtomicU64,

    pub write_errors: AtomicU64,
    pub blocked_mixes: AtomicU64,
}

/// Options for [`Mixer::new`].
#[derive(Default)]
pub struct MixerOptions {
    /// When set, mixed frames go through a bounded channel and a writer
    /// task instead of a direct downstream call, unblocking the ticker. A
    /// full channel still blocks the next mix (output is never dropped).
    pub output_channel_size: Option<usize>,
    /// Max frames each input buffers before old ones are dropped. Also
    /// derives the minimum buffered level required to (re)start playback.
    pub input_buffer_frames: Option<usize>,
    /// Externally supplied counters; allocated internally when absent.
    pub stats: Option<Arc<Stats>>,
}

struct InputState {
    buf: ring::Buffer<i16>,
    buffering: bool,
}

struct InputShared {
    state: Mutex<InputState>,
}

impl InputShared {
    fn read_sample(&self, buf_min: usize, out: &mut [i16], stats: &Stats) -> usize {
        let mut st = self.state.lock().unwrap();
        if st.buffering {
            if st.buf.len() < buf_min {
                return 0; // keep buffering
            }
            // buffered enough data - start playing as usual
            st.buffering = false;
        }
        let n = st.buf.read(out);
        if n == 0 {
            // starving; pause the input and start buffering again
            st.buffering = true;
            stats.restarts.fetch_add(1, Ordering::Relaxed);
        }
        n
    }
}

struct Shared {
    sample_rate: u32,
    ticker_dur: Duration,
    frame_samples: usize,
    input_buffer_frames: usize,
    input_buffer_min: usize,
    inputs: Mutex<Vec<Arc<InputShared>>>,
    stats: Arc<Stats>,
    stopped: AtomicBool,
    stop_tx: watch::Sender<bool>,
}

/// Mixer sums N mono PCM inputs into one output stream on a fixed
/// wall-clock cadence. Inputs ride per-input ring buffers and never block
/// their producers.
pub struct Mixer {
    shared: Arc<Shared>,
}

impl Mixer {
    /// Creates a mixer emitting one frame of `buffer_dur` to `out` per
    /// tick. Only mono is supported. Must be called within a tokio
    /// runtime.
    pub fn new(
        out: Pcm16Writer,
        buffer_dur: Duration,
        channels: u32,
        options: MixerOptions,
    ) -> Result<Mixer> {
        if channels != 1 {
            return Err(Error::ErrUnsupportedChannels);
        }

        let sample_rate = out.sample_rate();
        let frame_samples =
            (u64::from(sample_rate) * buffer_dur.as_nanos() as u64 / 1_000_000_000) as usize;

        let (input_buffer_frames, input_buffer_min) = match options.input_buffer_frames {
            Some(n) if n > 0 => (n, n / 2 + 1),
            _ => (DEFAULT_INPUT_BUFFER_FRAMES, DEFAULT_INPUT_BUFFER_MIN),
        };
        let stats = options.stats.unwrap_or_default();

        let (stop_tx, stop_rx) = watch::channel(false);
        let shared = Arc::new(Shared {
            sample_rate,
            ticker_dur: buffer_dur,
            frame_samples,
            input_buffer_frames,
            input_buffer_min,
            inputs: Mutex::new(Vec::new()),
            stats,
            stopped: AtomicBool::new(false),
            stop_tx,
        });

        let output = match options.output_channel_size {
            None => Output::Direct(out),
            Some(size) => {
                let size = size.max(1);
                let (tx, rx) = mpsc::channel::<Vec<i16>>(size);
                tokio::spawn(write_loop(
                    rx,
                    out,
                    Arc::clone(&shared.stats),
                    stop_rx.clone(),
                ));
                Output::Channel(tx)
            }
        };

        tokio::spawn(run(Arc::clone(&shared), output, stop_rx));

        Ok(Mixer { shared })
    }

    /// Stops the ticker. Inputs created afterwards return `None`.
    pub fn stop(&self) {
        let _inputs = self.shared.inputs.lock().unwrap();
        self.shared.stopped.store(true, Ordering::SeqCst);
        let _ = self.shared.stop_tx.send(true);
    }

    /// Registers a new input, initially buffering until it holds enough
    /// frames to play.
    pub fn new_input(&self) -> Option<Input> {
        let mut inputs = self.shared.inputs.lock().unwrap();
        if self.shared.stopped.load(Ordering::SeqCst) {
            return None;
        }

        self.shared.stats.tracks.fetch_add(1, Ordering::Relaxed);
        self.shared.stats.tracks_total.fetch_add(1, Ordering::Relaxed);

        let input = Arc::new(InputShared {
            state: Mutex::new(InputState {
                buf: ring::Buffer::new(self.shared.frame_samples * self.shared.input_buffer_frames),
                buffering: true, // buffer some data initially
            }),
        });
        inputs.push(Arc::clone(&input));
        Some(Input {
            shared: input,
            mixer: Arc::clone(&self.shared),
        })
    }

    pub fn remove_input(&self, input: &Input) {
        remove_input(&self.shared, &input.shared);
    }

    pub fn sample_rate(&self) -> u32 {
        self.shared.sample_rate
    }

    pub fn stats(&self) -> Arc<Stats> {
        Arc::clone(&self.shared.stats)
    }
}

fn remove_input(mixer: &Arc<Shared>, input: &Arc<InputShared>) {
    let mut inputs = mixer.inputs.lock().unwrap();
    let Some(i) = inputs.iter().position(|other| Arc::ptr_eq(other, input)) else {
        return;
    };
    inputs.remove(i);
    mixer.stats.tracks.fetch_sub(1, Ordering::Relaxed);
}

impl fmt::Display for Mixer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inputs = self.shared.inputs.lock().unwrap();
        write!(f, "Mixer({},{})", inputs.len(), self.shared.sample_rate)
    }
}

/// One mixer input. Writes append to the input's ring buffer, dropping the
/// oldest samples on overflow. Closing removes the input from the mixer.
#[derive(Clone)]
pub struct Input {
    shared: Arc<InputShared>,
    mixer: Arc<Shared>,
}

impl fmt::Display for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MixInput({})", self.mixer.sample_rate)
    }
}

impl Writer<[i16]> for Input {
    fn sample_rate(&self) -> u32 {
        self.mixer.sample_rate
    }

    fn write_sample(&mut self, sample: &[i16]) -> Result<()> {
        let stats = &self.mixer.stats;
        let mut st = self.shared.state.lock().unwrap();

        stats.input_frames.fetch_add(1, Ordering::Relaxed);
        stats
            .input_samples
            .fetch_add(sample.len() as u64, Ordering::Relaxed);
        let discarded = (st.buf.len() + sample.len()).saturating_sub(st.buf.size());
        if discarded > 0 {
            stats.input_frames_dropped.fetch_add(1, Ordering::Relaxed);
            stats
                .input_samples_dropped
                .fetch_add(discarded as u64, Ordering::Relaxed);
        }

        st.buf.write(sample);
        Ok(())
    }
}

impl WriteCloser<[i16]> for Input {
    fn close(&mut self) -> Result<()> {
        remove_input(&self.mixer, &self.shared);
        Ok(())
    }
}

enum Output {
    Direct(Pcm16Writer),
    Channel(mpsc::Sender<Vec<i16>>),
}

struct MixState {
    mix_buf: Vec<i32>,
    mix_tmp: Vec<i16>,
    last_mix_end: Option<Instant>,
}

async fn run(shared: Arc<Shared>, mut output: Output, mut stop_rx: watch::Receiver<bool>) {
    let mut ticker = interval_at(Instant::now() + shared.ticker_dur, shared.ticker_dur);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut mix = MixState {
        mix_buf: vec![0i32; shared.frame_samples],
        mix_tmp: vec![0i16; shared.frame_samples],
        last_mix_end: None,
    };

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if mix_update(&shared, &mut mix, &mut output).await.is_err() {
                    return;
                }
            }
            _ = stop_rx.changed() => return,
        }
    }
}

async fn write_loop(
    mut rx: mpsc::Receiver<Vec<i16>>,
    mut out: Pcm16Writer,
    stats: Arc<Stats>,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            mixed = rx.recv() => {
                let Some(mixed) = mixed else { return };
                if out.write_sample(&mixed).is_err() {
                    stats.write_errors.fetch_add(1, Ordering::Relaxed);
                }
            }
            _ = stop_rx.changed() => return,
        }
    }
}

// Returns Err only when the output side is gone and the ticker should
// exit.
async fn mix_update(shared: &Shared, mix: &mut MixState, output: &mut Output) -> Result<()> {
    let stats = &shared.stats;
    let now = Instant::now();
    let mut n;
    match mix.last_mix_end {
        None => {
            stats.timed_mixes.fetch_add(1, Ordering::Relaxed);
            mix.last_mix_end = Some(now);
            n = 1;
        }
        Some(last) => {
            if now < last {
                // Can happen when last time we went a little over due to fuzz.
                stats.negative_mixes.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
            // In case the scheduler stops us for too long, detect it and run
            // the mix multiple times.
            let dt = now.duration_since(last) + shared.ticker_dur / 4;
            n = (dt.as_nanos() / shared.ticker_dur.as_nanos()) as usize;
            mix.last_mix_end = Some(last + shared.ticker_dur * n as u32);
            match n {
                // Baseline got set later than necessary.
                0 => stats.zero_mixes.fetch_add(1, Ordering::Relaxed),
                1 => stats.timed_mixes.fetch_add(1, Ordering::Relaxed),
                // We've not woken up in quite some time, count the skipped
                // mixes as jumps.
                _ => stats.jump_mixes.fetch_add(n as u64, Ordering::Relaxed),
            };
        }
    }
    if n > shared.input_buffer_frames {
        n = shared.input_buffer_frames;
        stats.timing_resets.fetch_add(n as u64, Ordering::Relaxed);
        mix.last_mix_end = Some(now);
    }
    for _ in 0..n {
        mix_once(shared, mix, output).await?;
    }
    Ok(())
}

async fn mix_once(shared: &Shared, mix: &mut MixState, output: &mut Output) -> Result<()> {
    let stats = &shared.stats;
    stats.mixes.fetch_add(1, Ordering::Relaxed);
    mix.mix_buf.fill(0);
    mix_inputs(shared, mix);

    let mut out = vec![0i16; mix.mix_buf.len()];
    for (o, &v) in out.iter_mut().zip(mix.mix_buf.iter()) {
        *o = v.clamp(-0x7FFF, 0x7FFF) as i16;
    }

    stats.output_frames.fetch_add(1, Ordering::Relaxed);
    stats
        .output_samples
        .fetch_add(out.len() as u64, Ordering::Relaxed);

    match output {
        Output::Direct(w) => {
            if w.write_sample(&out).is_err() {
                stats.write_errors.fetch_add(1, Ordering::Relaxed);
            }
            Ok(())
        }
        Output::Channel(tx) => match tx.try_send(out) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(out)) => {
                // Blocked, wait for the output channel to be ready. This
                // mimics the behavior of writing downstream directly.
                stats.blocked_mixes.fetch_add(1, Ordering::Relaxed);
                tx.send(out).await.map_err(|_| Error::ErrClosed)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(Error::ErrClosed),
        },
    }
}

fn mix_inputs(shared: &Shared, mix: &mut MixState) {
    let stats = &shared.stats;
    let inputs = shared.inputs.lock().unwrap();
    // Keep at least half of the samples buffered.
    let buf_min = shared.input_buffer_min * mix.mix_buf.len();
    for input in inputs.iter() {
        let frame = &mut mix.mix_tmp[..mix.mix_buf.len()];
        let n = input.read_sample(buf_min, frame, stats);
        if n == 0 {
            continue;
        }

        stats.mixed_frames.fetch_add(1, Ordering::Relaxed);
        stats.mixed_samples.fetch_add(n as u64, Ordering::Relaxed);

        for (acc, &v) in mix.mix_buf.iter_mut().zip(frame[..n].iter()) {
            // Sum the samples. This can potentially overflow the i32
            // accumulator only with thousands of inputs; dividing by the
            // source count instead would drop the volume every time
            // somebody joins.
            *acc += i32::from(v);
        }
    }
}
