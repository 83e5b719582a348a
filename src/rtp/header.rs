use bytes::Bytes;

use crate::error::{Error, Result};

pub const HEADER_LENGTH: usize = 12;
pub const VERSION: u8 = 2;
const VERSION_SHIFT: u8 = 6;
const PADDING_SHIFT: u8 = 5;
const EXTENSION_SHIFT: u8 = 4;
const CC_MASK: u8 = 0x0f;
const MARKER_SHIFT: u8 = 7;
const PT_MASK: u8 = 0x7f;
const CSRC_LENGTH: usize = 4;

/// Header represents an RTP packet header.
///
/// The core emits the 12-byte fixed header plus CSRC list only; header
/// extensions are never written and are skipped when parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub csrc: Vec<u32>,
}

impl Default for Header {
    fn default() -> Self {
        Header {
            version: VERSION,
            padding: false,
            extension: false,
            marker: false,
            payload_type: 0,
            sequence_number: 0,
            timestamp: 0,
            ssrc: 0,
            csrc: Vec::new(),
        }
    }
}

impl Header {
    /// Size of the header once marshaled.
    pub fn marshal_size(&self) -> usize {
        HEADER_LENGTH + self.csrc.len() * CSRC_LENGTH
    }

    /// Serializes the header into `buf`, returning the number of bytes
    /// written.
    pub fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        let size = self.marshal_size();
        if buf.len() < size {
            return Err(Error::ErrBufferTooSmall);
        }

        buf[0] = (self.version << VERSION_SHIFT)
            | (u8::from(self.padding) << PADDING_SHIFT)
            | (u8::from(self.extension) << EXTENSION_SHIFT)
            | (self.csrc.len() as u8 & CC_MASK);
        buf[1] = (u8::from(self.marker) << MARKER_SHIFT) | (self.payload_type & PT_MASK);
        buf[2..4].copy_from_slice(&self.sequence_number.to_be_bytes());
        buf[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        buf[8..12].copy_from_slice(&self.ssrc.to_be_bytes());

        let mut off = HEADER_LENGTH;
        for csrc in &self.csrc {
            buf[off..off + CSRC_LENGTH].copy_from_slice(&csrc.to_be_bytes());
            off += CSRC_LENGTH;
        }
        Ok(off)
    }

    pub fn marshal(&self) -> Result<Bytes> {
        let mut buf = vec![0u8; self.marshal_size()];
        let n = self.marshal_to(&mut buf)?;
        buf.truncate(n);
        Ok(Bytes::from(buf))
    }

    /// Parses a header from `buf`, returning it together with the offset
    /// at which the payload begins. Extension blocks are validated and
    /// skipped.
    pub fn unmarshal(buf: &[u8]) -> Result<(Header, usize)> {
        if buf.len() < HEADER_LENGTH {
            return Err(Error::ErrHeaderSizeInsufficient);
        }

        let version = buf[0] >> VERSION_SHIFT;
        if version != VERSION {
            return Err(Error::ErrBadVersion);
        }
        let padding = (buf[0] >> PADDING_SHIFT) & 0x1 == 1;
        let extension = (buf[0] >> EXTENSION_SHIFT) & 0x1 == 1;
        let cc = (buf[0] & CC_MASK) as usize;

        let marker = buf[1] >> MARKER_SHIFT == 1;
        let payload_type = buf[1] & PT_MASK;

        let sequence_number = u16::from_be_bytes([buf[2], buf[3]]);
        let timestamp = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let ssrc = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);

        let mut off = HEADER_LENGTH;
        if buf.len() < off + cc * CSRC_LENGTH {
            return Err(Error::ErrHeaderSizeInsufficient);
        }
        let mut csrc = Vec::with_capacity(cc);
        for _ in 0..cc {
            csrc.push(u32::from_be_bytes([
                buf[off],
                buf[off + 1],
                buf[off + 2],
                buf[off + 3],
            ]));
            off += CSRC_LENGTH;
        }

        if extension {
            if buf.len() < off + 4 {
                return Err(Error::ErrHeaderSizeInsufficient);
            }
            let ext_words = u16::from_be_bytes([buf[off + 2], buf[off + 3]]) as usize;
            off += 4;
            if buf.len() < off + ext_words * 4 {
                return Err(Error::ErrHeaderSizeInsufficient);
            }
            off += ext_words * 4;
        }

        Ok((
            Header {
                version,
                padding,
                extension,
                marker,
                payload_type,
                sequence_number,
                timestamp,
                ssrc,
                csrc,
            },
            off,
        ))
    }
}
