use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crate::error::Result;
use crate::rtp::header::Header;
use crate::rtp::RtpWriter;
use crate::writer::{FrameWriter, WriteCloser, Writer};
use crate::DEF_FRAMES_PER_SEC;

/// How many packet durations a sub-stream may fall behind its siblings
/// before its clock is reset to theirs (500ms @ ptime=20ms).
pub const STREAM_TS_RESET_FRAMES: u32 = 25;

/// A single RTP event: one packet worth of payload with explicit type,
/// timestamp and marker.
#[derive(Debug, Clone, Default)]
pub struct Event {
    pub payload_type: u8,
    pub timestamp: u32,
    pub payload: Bytes,
    pub marker: bool,
}

struct SeqShared {
    w: Box<dyn RtpWriter + Send>,
    h: Header,
}

/// SeqWriter owns one SSRC and stamps every emitted packet with the next
/// sequence number, across all of its sub-streams.
pub struct SeqWriter {
    max_ts: AtomicU32,
    shared: Mutex<SeqShared>,
}

impl SeqWriter {
    /// Creates an RTP writer with a random SSRC and a sequence counter
    /// starting at zero.
    pub fn new(w: Box<dyn RtpWriter + Send>) -> Arc<SeqWriter> {
        Arc::new(SeqWriter {
            max_ts: AtomicU32::new(0),
            shared: Mutex::new(SeqShared {
                w,
                h: Header {
                    ssrc: rand::random::<u32>(),
                    ..Default::default()
                },
            }),
        })
    }

    /// Reconciles a stream's candidate timestamp `ts` against the largest
    /// timestamp any sibling has emitted. Returns `ts` unchanged while it
    /// is within tolerance, or the siblings' clock when the caller has
    /// been dormant for more than [`STREAM_TS_RESET_FRAMES`] packets.
    pub fn cur_ts(&self, ts: u32, inc: u32) -> u32 {
        loop {
            let cur = self.max_ts.load(Ordering::SeqCst);
            // TODO: Handle wrap-around. Not a concern for now, because all streams start at TS=0.
            if cur > ts.wrapping_add(STREAM_TS_RESET_FRAMES.wrapping_mul(inc)) {
                // Previous timestamp on the stream was too long ago.
                // Force a timestamp reset to the one from a more recent stream.
                return cur;
            }
            if cur >= ts {
                // Timestamp is within allowed range.
                return ts;
            }
            // Adjust the max timestamp, make sure other stream didn't update it before us.
            if self
                .max_ts
                .compare_exchange(cur, ts, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return ts;
            }
        }
    }

    /// Writes one event and increments the shared sequence number.
    pub fn write_event(&self, ev: &Event) -> Result<()> {
        let mut shared = self.shared.lock().unwrap();
        shared.h.payload_type = ev.payload_type;
        shared.h.marker = ev.marker;
        shared.h.timestamp = ev.timestamp;
        let SeqShared { w, h } = &mut *shared;
        w.write_rtp(h, &ev.payload)?;
        shared.h.sequence_number = shared.h.sequence_number.wrapping_add(1);
        Ok(())
    }

    /// Creates a new media sub-stream with the default 20ms packet time.
    pub fn new_stream(self: &Arc<Self>, payload_type: u8, clock_rate: u32) -> Arc<Stream> {
        self.new_stream_with_dur(payload_type, clock_rate / DEF_FRAMES_PER_SEC)
    }

    pub fn new_stream_with_dur(self: &Arc<Self>, payload_type: u8, packet_dur: u32) -> Arc<Stream> {
        Arc::new(Stream {
            seq: Arc::clone(self),
            packet_dur,
            state: Mutex::new(StreamState {
                ev: Event {
                    payload_type,
                    ..Default::default()
                },
                followup: false,
            }),
        })
    }
}

impl fmt::Display for SeqWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = self.shared.lock().unwrap();
        write!(f, "{}", shared.w)
    }
}

struct StreamState {
    ev: Event,
    followup: bool,
}

/// Stream is one logical media track sharing SSRC and sequence space with
/// its siblings on the same [`SeqWriter`].
pub struct Stream {
    seq: Arc<SeqWriter>,
    packet_dur: u32,
    state: Mutex<StreamState>,
}

impl Stream {
    fn write_payload_inner(&self, inc: bool, data: Bytes, marker: bool) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.ev.payload = data;
        state.ev.marker = marker;
        if !state.followup {
            state.ev.timestamp = self.seq.cur_ts(state.ev.timestamp, self.packet_dur);
        }
        self.seq.write_event(&state.ev)?;
        if inc {
            state.followup = false;
            state.ev.timestamp = state.ev.timestamp.wrapping_add(self.packet_dur);
        } else {
            state.followup = true;
        }
        Ok(())
    }

    /// Writes the payload to RTP and advances the timestamp.
    pub fn write_payload(&self, data: Bytes, marker: bool) -> Result<()> {
        self.write_payload_inner(true, data, marker)
    }

    /// Writes the payload to RTP at the current timestamp, without
    /// advancing it. This allows emitting multiple different payloads with
    /// the same timestamp on one stream (e.g. DTMF). The caller is
    /// expected to call [`Stream::delay`] or [`Stream::delay_n`] at some
    /// point to advance the timestamp.
    pub fn write_payload_at_current(&self, data: Bytes, marker: bool) -> Result<()> {
        self.write_payload_inner(false, data, marker)
    }

    /// Advances the timestamp of the next frame. Typically used in
    /// combination with [`Stream::write_payload_at_current`].
    pub fn delay(&self, dur: u32) {
        let mut state = self.state.lock().unwrap();
        state.ev.timestamp = state.ev.timestamp.wrapping_add(dur);
        state.ev.timestamp = self.seq.cur_ts(state.ev.timestamp, self.packet_dur);
        state.followup = false;
    }

    /// Like [`Stream::delay`], in multiples of the packet duration.
    pub fn delay_n(&self, n: u32) {
        self.delay(n.wrapping_mul(self.packet_dur));
    }

    pub fn reset_timestamp(&self, ts: u32) {
        let mut state = self.state.lock().unwrap();
        state.ev.timestamp = ts;
        state.followup = false;
    }

    pub fn current_timestamp(&self) -> u32 {
        self.state.lock().unwrap().ev.timestamp
    }

    pub fn packet_duration(&self) -> u32 {
        self.packet_dur
    }
}

/// MediaStreamOut exposes a [`Stream`] as a compressed-frame writer.
pub struct MediaStreamOut {
    stream: Arc<Stream>,
    sample_rate: u32,
}

impl MediaStreamOut {
    pub fn new(stream: Arc<Stream>, sample_rate: u32) -> Self {
        MediaStreamOut {
            stream,
            sample_rate,
        }
    }
}

impl fmt::Display for MediaStreamOut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RTP({})", self.sample_rate)
    }
}

impl Writer<Bytes> for MediaStreamOut {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn write_sample(&mut self, sample: &Bytes) -> Result<()> {
        self.stream.write_payload(sample.clone(), false)
    }
}

impl WriteCloser<Bytes> for MediaStreamOut {
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// MediaStreamIn feeds incoming RTP payloads into a frame writer chain.
pub struct MediaStreamIn {
    pub writer: FrameWriter,
}

impl MediaStreamIn {
    pub fn new(writer: FrameWriter) -> Self {
        MediaStreamIn { writer }
    }
}

impl fmt::Display for MediaStreamIn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RTP({}) -> {}", self.writer.sample_rate(), self.writer)
    }
}

impl super::Handler for MediaStreamIn {
    fn handle_rtp(&mut self, _header: &Header, payload: &Bytes) -> Result<()> {
        self.writer.write_sample(payload)
    }
}
