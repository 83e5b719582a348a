use bytes::Bytes;

use crate::error::Result;

/// Depacketizer strips RTP payload framing and tells the jitter buffer
/// where media units begin and end.
pub trait Depacketizer: Send {
    fn depacketize(&mut self, payload: &Bytes) -> Result<Bytes>;
    /// Whether `payload` starts a new media unit (partition).
    fn is_partition_head(&self, payload: &Bytes) -> bool;
    /// Whether a packet with this `marker` bit and `payload` ends the
    /// current media unit.
    fn is_partition_tail(&self, marker: bool, payload: &Bytes) -> bool;
}

/// AudioDepacketizer treats every packet as one complete media unit, which
/// holds for all audio codecs carried here.
#[derive(Debug, Default, Clone, Copy)]
pub struct AudioDepacketizer;

impl Depacketizer for AudioDepacketizer {
    fn depacketize(&mut self, payload: &Bytes) -> Result<Bytes> {
        Ok(payload.clone())
    }

    fn is_partition_head(&self, _payload: &Bytes) -> bool {
        true
    }

    fn is_partition_tail(&self, _marker: bool, _payload: &Bytes) -> bool {
        true
    }
}
