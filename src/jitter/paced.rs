use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::jitter::{Buffer, BufferStats, PacketLossHandler};
use crate::rtp::{Depacketizer, Packet};

pub const PACED_SAMPLES_BUFFER: usize = 50;
pub const INCOMING_SAMPLES_BUFFER: usize = 150;

/// Invoked with the packet count of a sample dropped due to backpressure.
pub type DropHandler = Arc<dyn Fn(usize) + Send + Sync>;

struct PacerState {
    clock_rate: u32,
    max_lag: Duration,
    allow_lead: Duration,
    last_ts: u32,
    release_at: Option<Instant>,
    last_forward: Option<Instant>,
}

struct PacerSnapshot {
    last_ts: u32,
    release_at: Option<Instant>,
}

impl PacerState {
    fn new(clock_rate: u32, max_lag: Duration, allow_lead: Duration) -> Self {
        PacerState {
            clock_rate,
            max_lag,
            allow_lead,
            last_ts: 0,
            release_at: None,
            last_forward: None,
        }
    }

    fn snapshot(&self) -> PacerSnapshot {
        PacerSnapshot {
            last_ts: self.last_ts,
            release_at: self.release_at,
        }
    }

    fn restore(&mut self, s: PacerSnapshot) {
        self.last_ts = s.last_ts;
        self.release_at = s.release_at;
    }

    /// Updates pacing deadlines based on the incoming RTP timestamp.
    /// Returns the time to wait before forwarding and whether lag was
    /// clamped.
    fn prepare(&mut self, now: Instant, ts: u32) -> (Duration, bool) {
        let fresh = match (self.release_at, self.last_forward) {
            (None, _) | (_, None) => true,
            (Some(_), Some(fwd)) => now.saturating_duration_since(fwd) > self.max_lag,
        };
        if fresh {
            self.release_at = Some(now.checked_sub(self.allow_lead).unwrap_or(now));
        } else {
            let diff = ts.wrapping_sub(self.last_ts);
            self.release_at =
                Some(self.release_at.unwrap() + duration_from_timestamp_diff(diff, self.clock_rate));
        }

        if self.allow_lead > Duration::ZERO {
            let max_release = now + self.allow_lead;
            if self.release_at.unwrap() > max_release {
                self.release_at = Some(max_release);
            }
        }

        self.last_ts = ts;

        let wait = self.release_at.unwrap().saturating_duration_since(now);
        if wait > self.max_lag {
            self.release_at = Some(now);
            return (Duration::ZERO, true);
        }
        (wait, false)
    }

    fn mark_forward(&mut self) {
        self.last_forward = Some(Instant::now());
    }
}

fn duration_from_timestamp_diff(diff: u32, clock_rate: u32) -> Duration {
    if clock_rate == 0 || diff == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos(u64::from(diff) * 1_000_000_000 / u64::from(clock_rate))
}

// One-shot level signal shared between the pacer task and its owner.
struct Signal {
    set: AtomicBool,
    notify: Notify,
}

impl Signal {
    fn new() -> Arc<Self> {
        Arc::new(Signal {
            set: AtomicBool::new(false),
            notify: Notify::new(),
        })
    }

    fn raise(&self) {
        self.set.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    fn is_raised(&self) -> bool {
        self.set.load(Ordering::SeqCst)
    }

    async fn wait(&self) {
        while !self.set.load(Ordering::SeqCst) {
            self.notify.notified().await;
        }
    }
}

/// PacedBuffer wraps the jitter buffer with pacing logic so bursts are
/// consumed at a wall-clock rate derived from RTP timestamps.
///
/// Samples flow jitter buffer -> `incoming` queue -> pacer task ->
/// `samples` queue. Neither queue ever blocks the producer: overflow
/// drops the sample and reports it through the drop handler.
pub struct PacedBuffer {
    buffer: Arc<Buffer>,
    stop: Arc<Signal>,
    start: Arc<Signal>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PacedBuffer {
    /// Constructs a paced jitter buffer and returns it together with the
    /// receiving side of its output queue. After [`PacedBuffer::close`],
    /// the receiver drains the remainder and then reports closure.
    ///
    /// `max_lag` is clamped to `(0, 1s]`. Pacing begins only after
    /// [`PacedBuffer::start`]; earlier samples queue up in `incoming`.
    ///
    /// Must be called within a tokio runtime.
    pub fn new(
        depacketizer: Box<dyn Depacketizer>,
        latency: Duration,
        clock_rate: u32,
        allow_lead: Duration,
        max_lag: Duration,
        on_loss: Option<PacketLossHandler>,
        on_drop: Option<DropHandler>,
    ) -> (PacedBuffer, mpsc::Receiver<Vec<Packet>>) {
        let max_lag = if max_lag.is_zero() || max_lag > Duration::from_secs(1) {
            Duration::from_secs(1)
        } else {
            max_lag
        };

        let (incoming_tx, incoming_rx) = mpsc::channel::<Vec<Packet>>(INCOMING_SAMPLES_BUFFER);
        let (samples_tx, samples_rx) = mpsc::channel::<Vec<Packet>>(PACED_SAMPLES_BUFFER);

        let stop = Signal::new();
        let start = Signal::new();

        let handler_stop = Arc::clone(&stop);
        let handler_drop = on_drop.clone();
        let mut buffer = Buffer::new(
            depacketizer,
            latency,
            Box::new(move |sample: Vec<Packet>| {
                if handler_stop.is_raised() {
                    return;
                }
                match incoming_tx.try_send(sample) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(sample)) => {
                        if let Some(f) = &handler_drop {
                            f(sample.len());
                        }
                        log::warn!("pacer queue full, dropping sample");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {}
                }
            }),
        );
        if let Some(f) = on_loss {
            buffer = buffer.with_packet_loss_handler(f);
        }
        let buffer = Arc::new(buffer);

        let state = PacerState::new(clock_rate, max_lag, allow_lead);
        let handle = tokio::spawn(run(
            incoming_rx,
            samples_tx,
            state,
            Arc::clone(&stop),
            Arc::clone(&start),
            on_drop,
        ));

        (
            PacedBuffer {
                buffer,
                stop,
                start,
                handle: Mutex::new(Some(handle)),
            },
            samples_rx,
        )
    }

    pub fn push(&self, packet: Packet) {
        self.buffer.push(packet);
    }

    /// Allows pacing to begin; until called, incoming samples are queued.
    pub fn start(&self) {
        self.start.raise();
    }

    pub fn stats(&self) -> BufferStats {
        self.buffer.stats()
    }

    pub fn update_latency(&self, latency: Duration) {
        self.buffer.update_latency(latency);
    }

    /// Stops the pacer, closes the jitter buffer and waits for the pacer
    /// task to exit. Idempotent.
    pub async fn close(&self) {
        self.stop.raise();
        self.buffer.close();
        self.start.raise();
        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

async fn run(
    mut incoming: mpsc::Receiver<Vec<Packet>>,
    samples_tx: mpsc::Sender<Vec<Packet>>,
    mut state: PacerState,
    stop: Arc<Signal>,
    start: Arc<Signal>,
    on_drop: Option<DropHandler>,
) {
    tokio::select! {
        _ = start.wait() => {}
        _ = stop.wait() => return,
    }

    loop {
        let sample = tokio::select! {
            _ = stop.wait() => return,
            sample = incoming.recv() => match sample {
                Some(sample) => sample,
                None => return,
            },
        };
        if sample.is_empty() {
            continue;
        }

        let snapshot = state.snapshot();
        let (wait, clamped) = state.prepare(Instant::now(), sample[0].header.timestamp);
        if clamped {
            log::warn!(
                "pacer lag exceeded, clamping: packet_timestamp={} max_lag={:?}",
                sample[0].header.timestamp,
                state.max_lag,
            );
        }

        if !wait.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = stop.wait() => {
                    state.restore(snapshot);
                    return;
                }
            }
        }

        if stop.is_raised() {
            state.restore(snapshot);
            return;
        }
        match samples_tx.try_send(sample) {
            Ok(()) => state.mark_forward(),
            Err(mpsc::error::TrySendError::Full(sample)) => {
                state.restore(snapshot);
                if let Some(f) = &on_drop {
                    f(sample.len());
                }
                log::warn!("output queue full, dropping sample");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                state.restore(snapshot);
                return;
            }
        }
    }
}
