
pub mod paced;

use std::cmp::Ordering as CmpOrdering;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub use paced::PacedBuffer;

use crate::rtp::{Depacketizer, Packet};

/// Receives one depacketized media unit: the packets that constitute one
/// sample, in sequence order.
pub type SampleHandler = Box<dyn FnMut(Vec<Packet>) + Send>;

/// Invoked once per detected sequence gap, after the reorder window
/// expired.
pub type PacketLossHandler = Box<dyn FnMut() + Send>;

/// Counters and last-emitted markers of a jitter buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferStats {
    pub packets_pushed: u64,
    pub samples_emitted: u64,
    pub packets_dropped: u64,
    pub last_sequence_number: u16,
    pub last_timestamp: u32,
}

// Wrap-aware sequence comparison over the half range.
fn seq_cmp(a: u16, b: u16) -> CmpOrdering {
    (a.wrapping_sub(b) as i16).cmp(&0)
}

struct Entry {
    packet: Packet,
    arrival: Instant,
}

struct State {
    depacketizer: Box<dyn Depacketizer>,
    latency: Duration,
    packets: VecDeque<Entry>,
    expected_seq: Option<u16>,
    has_last: bool,
    last_seq: u16,
    last_ts: u32,
    packets_pushed: u64,
    samples_emitted: u64,
    packets_dropped: u64,
    closed: bool,
}

/// Buffer reorders incoming RTP packets and surfaces complete media units
/// in timestamp order through its sample callback.
///
/// All decisions are taken during [`Buffer::push`]: a unit is released
/// when its tail packet arrived and everything before it was released, or
/// when the oldest pending packet has been held longer than the latency
/// window. Expired gaps fire the loss callback once and are skipped.
pub struct Buffer {
    state: Mutex<State>,
    on_sample: Mutex<SampleHandler>,
    on_loss: Mutex<Option<PacketLossHandler>>,
}

impl Buffer {
    pub fn new(
        depacketizer: Box<dyn Depacketizer>,
        latency: Duration,
        on_sample: SampleHandler,
    ) -> Buffer {
        Buffer {
            state: Mutex::new(State {
                depacketizer,
                latency,
                packets: VecDeque::new(),
                expected_seq: None,
                has_last: false,
                last_seq: 0,
                last_ts: 0,
                packets_pushed: 0,
                samples_emitted: 0,
                packets_dropped: 0,
                closed: false,
            }),
            on_sample: Mutex::new(on_sample),
            on_loss: Mutex::new(None),
        }
    }

    pub fn with_packet_loss_handler(self, f: PacketLossHandler) -> Self {
        *self.on_loss.lock().unwrap() = Some(f);
        self
    }

    /// Adds one packet, releasing any units that became ready. Stale and
    /// duplicate packets are counted and discarded.
    pub fn push(&self, packet: Packet) {
        let mut emitted: Vec<Vec<Packet>> = Vec::new();
        let mut loss = false;
        {
            let mut st = self.state.lock().unwrap();
            if st.closed {
                return;
            }
            st.packets_pushed += 1;

            let seq = packet.header.sequence_number;
            let stale = (st.has_last && seq_cmp(seq, st.last_seq) != CmpOrdering::Greater)
                || matches!(st.expected_seq, Some(e) if seq_cmp(seq, e) == CmpOrdering::Less);
            if stale {
                st.packets_dropped += 1;
                return;
            }

            // Insert in sequence order, scanning from the back: packets
            // usually arrive nearly in order.
            let mut idx = st.packets.len();
            let mut dup = false;
            while idx > 0 {
                match seq_cmp(st.packets[idx - 1].packet.header.sequence_number, seq) {
                    CmpOrdering::Greater => idx -= 1,
                    CmpOrdering::Equal => {
                        dup = true;
                        break;
                    }
                    CmpOrdering::Less => break,
                }
            }
            if dup {
                st.packets_dropped += 1;
                return;
            }
            st.packets.insert(
                idx,
                Entry {
                    packet,
                    arrival: Instant::now(),
                },
            );

            self.release(&mut st, &mut emitted, &mut loss);
        }

        if loss {
            if let Some(f) = &mut *self.on_loss.lock().unwrap() {
                f();
            }
        }
        if !emitted.is_empty() {
            let mut h = self.on_sample.lock().unwrap();
            for s in emitted {
                h(s);
            }
        }
    }

    fn release(&self, st: &mut State, emitted: &mut Vec<Vec<Packet>>, loss: &mut bool) {
        let now = Instant::now();
        loop {
            let Some(head) = st.packets.front() else {
                break;
            };
            let head_seq = head.packet.header.sequence_number;
            let timed_out = now.duration_since(head.arrival) > st.latency;

            // Before anything was released, hold until the stream start
            // looks like the beginning of a media unit.
            if st.expected_seq.is_none()
                && !timed_out
                && !st
                    .depacketizer
                    .is_partition_head(&st.packets[0].packet.payload)
            {
                break;
            }
            let expected = st.expected_seq.unwrap_or(head_seq);
            if head_seq != expected {
                if !timed_out {
                    break;
                }
                // The reorder window expired: give up on the missing range.
                let gap = head_seq.wrapping_sub(expected);
                st.packets_dropped += u64::from(gap);
                *loss = true;
                st.expected_seq = Some(head_seq);
            }

            let ts = st.packets[0].packet.header.timestamp;
            let mut complete = None;
            let mut run = 0;
            while run < st.packets.len() {
                let p = &st.packets[run].packet;
                if p.header.sequence_number != head_seq.wrapping_add(run as u16) {
                    break;
                }
                if p.header.timestamp != ts {
                    // A later unit started: the current one cannot grow.
                    complete = Some(run);
                    break;
                }
                if st
                    .depacketizer
                    .is_partition_tail(p.header.marker, &p.payload)
                {
                    complete = Some(run + 1);
                    break;
                }
                run += 1;
            }

            let take = match complete {
                Some(n) => n,
                // Tail still missing: release the partial unit only after
                // the window expired.
                None if timed_out && run > 0 => run,
                None => break,
            };

            let sample: Vec<Packet> = st.packets.drain(..take).map(|e| e.packet).collect();
            let Some(last) = sample.last() else {
                break;
            };
            st.last_seq = last.header.sequence_number;
            st.last_ts = last.header.timestamp;
            st.has_last = true;
            st.expected_seq = Some(st.last_seq.wrapping_add(1));
            st.samples_emitted += 1;
            emitted.push(sample);
        }
    }

    /// Changes the reorder window; takes effect on the next push.
    pub fn update_latency(&self, latency: Duration) {
        self.state.lock().unwrap().latency = latency;
    }

    pub fn stats(&self) -> BufferStats {
        let st = self.state.lock().unwrap();
        BufferStats {
            packets_pushed: st.packets_pushed,
            samples_emitted: st.samples_emitted,
            packets_dropped: st.packets_dropped,
            last_sequence_number: st.last_seq,
            last_timestamp: st.last_ts,
        }
    }

    pub fn last_sequence_number(&self) -> u16 {
        self.state.lock().unwrap().last_seq
    }

    pub fn last_timestamp(&self) -> u32 {
        self.state.lock().unwrap().last_ts
    }

    /// Discards pending packets and stops accepting new ones.
    pub fn close(&self) {
        let mut st = self.state.lock().unwrap();
        if st.closed {
            return;
        }
        st.closed = true;
        st.packets_dropped += st.packets.len() as u64;
        st.packets.clear();
    }
}
