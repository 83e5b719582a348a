
pub mod depacketizer;
pub mod header;
pub mod packet;
pub mod seq;

use std::fmt;
use std::sync::{Arc, Mutex};

use bytes::Bytes;

pub use depacketizer::{AudioDepacketizer, Depacketizer};
pub use header::Header;
pub use packet::{
    new_packet_write_stream, new_stream_nop_closer, Packet, PacketWriteStream, PacketWriter,
    WriteStreamSwitcher,
};
pub use seq::{Event, MediaStreamIn, MediaStreamOut, SeqWriter, Stream, STREAM_TS_RESET_FRAMES};

use crate::error::Result;

/// RtpWriter emits one RTP packet per call, given its header and payload.
/// Framing and socket I/O belong to the implementation.
pub trait RtpWriter: fmt::Display + Send {
    fn write_rtp(&mut self, header: &Header, payload: &Bytes) -> Result<usize>;
}

/// An [`RtpWriter`] that owns shutdown of its downstream.
pub trait RtpWriteCloser: RtpWriter {
    fn close(&mut self) -> Result<()>;
}

/// RtpReader produces RTP packets, typically from a socket.
pub trait RtpReader: Send {
    fn read_rtp(&mut self) -> Result<Packet>;
}

/// Handler consumes incoming RTP packets.
pub trait Handler: fmt::Display + Send {
    fn handle_rtp(&mut self, header: &Header, payload: &Bytes) -> Result<()>;
}

/// A [`Handler`] with an explicit shutdown hook.
pub trait HandlerCloser: Handler {
    fn close(&mut self);
}

struct NopHandlerCloser<H: Handler> {
    h: H,
}

/// Adapts a [`Handler`] into a [`HandlerCloser`] whose close does nothing.
pub fn nop_handler_closer<H: Handler>(h: H) -> impl HandlerCloser {
    NopHandlerCloser { h }
}

impl<H: Handler> fmt::Display for NopHandlerCloser<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.h)
    }
}

impl<H: Handler> Handler for NopHandlerCloser<H> {
    fn handle_rtp(&mut self, header: &Header, payload: &Bytes) -> Result<()> {
        self.h.handle_rtp(header, payload)
    }
}

impl<H: Handler> HandlerCloser for NopHandlerCloser<H> {
    fn close(&mut self) {}
}

/// Reads packets from `r` and feeds them to `h` until either side fails,
/// closing the handler on the way out.
pub fn handle_loop<R: RtpReader, H: HandlerCloser>(mut r: R, mut h: H) -> Result<()> {
    let res = loop {
        let p = match r.read_rtp() {
            Ok(p) => p,
            Err(err) => break Err(err),
        };
        if let Err(err) = h.handle_rtp(&p.header, &p.payload) {
            break Err(err);
        }
    };
    h.close();
    res
}

/// Buffer is an [`RtpWriter`] that clones every packet into a shared list.
/// Handles are cheap to clone; used by tests and diagnostics.
#[derive(Clone, Default)]
pub struct Buffer {
    packets: Arc<Mutex<Vec<Packet>>>,
}

impl Buffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn packets(&self) -> Vec<Packet> {
        self.packets.lock().unwrap().clone()
    }
}

impl fmt::Display for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Buffer")
    }
}

impl RtpWriter for Buffer {
    fn write_rtp(&mut self, header: &Header, payload: &Bytes) -> Result<usize> {
        self.packets.lock().unwrap().push(Packet {
            header: header.clone(),
            payload: payload.clone(),
        });
        Ok(payload.len())
    }
}
