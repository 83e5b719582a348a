use std::fmt;
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::rtp::header::Header;
use crate::rtp::{RtpWriteCloser, RtpWriter};

/// Packet represents a full RTP packet.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Packet {
    pub header: Header,
    pub payload: Bytes,
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "RTP PACKET:")?;
        writeln!(f, "\tVersion: {}", self.header.version)?;
        writeln!(f, "\tMarker: {}", self.header.marker)?;
        writeln!(f, "\tPayload Type: {}", self.header.payload_type)?;
        writeln!(f, "\tSequence Number: {}", self.header.sequence_number)?;
        writeln!(f, "\tTimestamp: {}", self.header.timestamp)?;
        writeln!(f, "\tSSRC: {} ({:x})", self.header.ssrc, self.header.ssrc)?;
        write!(f, "\tPayload Length: {}", self.payload.len())
    }
}

impl Packet {
    pub fn marshal_size(&self) -> usize {
        self.header.marshal_size() + self.payload.len()
    }

    pub fn marshal(&self) -> Result<Bytes> {
        let mut buf = vec![0u8; self.marshal_size()];
        let n = self.header.marshal_to(&mut buf)?;
        buf[n..].copy_from_slice(&self.payload);
        Ok(Bytes::from(buf))
    }

    /// Parses `raw` into a packet, stripping any padding.
    pub fn unmarshal(raw: &Bytes) -> Result<Packet> {
        let (header, offset) = Header::unmarshal(raw)?;
        let mut end = raw.len();
        if header.padding {
            if end <= offset {
                return Err(Error::ErrShortBuffer);
            }
            let pad = raw[end - 1] as usize;
            if pad == 0 || end < offset + pad {
                return Err(Error::ErrShortBuffer);
            }
            end -= pad;
        }
        Ok(Packet {
            header,
            payload: raw.slice(offset..end),
        })
    }
}

/// PacketWriter consumes whole RTP packets, typically on the far side of a
/// socket or an SRTP session.
pub trait PacketWriter: Send {
    fn write_packet(&mut self, packet: &Packet) -> Result<()>;
}

/// Adapts a [`PacketWriter`] into the header/payload [`RtpWriter`] used by
/// the sequence writer.
pub struct PacketWriteStream {
    pw: Box<dyn PacketWriter + Send>,
}

pub fn new_packet_write_stream(pw: Box<dyn PacketWriter + Send>) -> PacketWriteStream {
    PacketWriteStream { pw }
}

impl fmt::Display for PacketWriteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PacketWriteStream")
    }
}

impl RtpWriter for PacketWriteStream {
    fn write_rtp(&mut self, header: &Header, payload: &Bytes) -> Result<usize> {
        let packet = Packet {
            header: header.clone(),
            payload: payload.clone(),
        };
        self.pw.write_packet(&packet)?;
        Ok(payload.len())
    }
}

struct StreamNopCloser {
    w: Box<dyn RtpWriter + Send>,
}

/// Adapts an [`RtpWriter`] into an [`RtpWriteCloser`] whose close does
/// nothing.
pub fn new_stream_nop_closer(w: Box<dyn RtpWriter + Send>) -> Box<dyn RtpWriteCloser + Send> {
    Box::new(StreamNopCloser { w })
}

impl fmt::Display for StreamNopCloser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.w)
    }
}

impl RtpWriter for StreamNopCloser {
    fn write_rtp(&mut self, header: &Header, payload: &Bytes) -> Result<usize> {
        self.w.write_rtp(header, payload)
    }
}

impl RtpWriteCloser for StreamNopCloser {
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// WriteStreamSwitcher forwards RTP to a downstream that can be swapped
/// mid-call. Writes with no downstream attached succeed and go nowhere.
#[derive(Clone, Default)]
pub struct WriteStreamSwitcher {
    w: Arc<Mutex<Option<Box<dyn RtpWriteCloser + Send>>>>,
}

impl WriteStreamSwitcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the downstream writer, returning the old one. The caller
    /// is responsible for closing it.
    pub fn swap(
        &self,
        w: Option<Box<dyn RtpWriteCloser + Send>>,
    ) -> Option<Box<dyn RtpWriteCloser + Send>> {
        let mut slot = self.w.lock().unwrap();
        std::mem::replace(&mut *slot, w)
    }

    pub fn close(&self) -> Result<()> {
        match self.swap(None) {
            Some(mut w) => w.close(),
            None => Ok(()),
        }
    }
}

impl fmt::Display for WriteStreamSwitcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.w.lock().unwrap();
        match &*slot {
            Some(w) => write!(f, "WriteStreamSwitcher({w})"),
            None => write!(f, "WriteStreamSwitcher(nil)"),
        }
    }
}

impl RtpWriter for WriteStreamSwitcher {
    fn write_rtp(&mut self, header: &Header, payload: &Bytes) -> Result<usize> {
        let mut slot = self.w.lock().unwrap();
        match &mut *slot {
            Some(w) => w.write_rtp(header, payload),
            None => Ok(0),
        }
    }
}
