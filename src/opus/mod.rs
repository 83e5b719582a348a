#[cfg(test)]
mod opus_test;

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::jitter::Buffer;
use crate::rtp::{AudioDepacketizer, Handler, HandlerCloser, Header, Packet};
use crate::writer::{Pcm16Writer, WriteCloser, Writer};

const JITTER_MAX_LATENCY: Duration = Duration::from_millis(60);
const DTX_FRAME_LENGTH: usize = 1;
// Largest Opus frame: 120ms at 48kHz, per channel.
const MAX_FRAME_SAMPLES: usize = 5760;

/// The Opus DSP boundary. Implementations wrap an actual decoder (e.g.
/// libopus); this crate only drives it.
pub trait Decoder: Send {
    /// Number of output channels the decoder is configured for.
    fn channels(&self) -> usize;
    /// Decodes `input` into interleaved PCM, returning samples written per
    /// channel. With `fec` set, recovers the lost previous packet from the
    /// redundancy carried in `input`.
    fn decode(&mut self, input: &[u8], output: &mut [i16], fec: bool) -> Result<usize>;
    /// Packet-loss concealment: fills all of `output` from decoder state.
    fn conceal(&mut self, output: &mut [i16]) -> Result<()>;
}

/// Creates a [`Decoder`] for the given channel count. Called again
/// whenever the inbound channel layout changes.
pub type DecoderFactory = Box<dyn Fn(usize) -> Result<Box<dyn Decoder>> + Send>;

/// Reads the channel count from the Opus TOC byte.
pub fn sample_channels(payload: &[u8]) -> usize {
    if payload.is_empty() {
        return 1;
    }
    if payload[0] & 0x04 != 0 {
        2
    } else {
        1
    }
}

struct Core {
    w: Pcm16Writer,
    factory: DecoderFactory,
    decoder: Option<Box<dyn Decoder>>,
    target_channels: usize,
    last_channels: usize,
    last_packet: Option<Packet>,
    next_packet: Option<Packet>,
    pending_loss: bool,
    decode_buf: Vec<i16>,
}

impl Core {
    fn handle_packet(&mut self, p: Packet) {
        let is_dtx = p.payload.len() == DTX_FRAME_LENGTH;

        // Not sure what to do if we have a pending loss and the packet is DTX.
        if self.pending_loss && !is_dtx {
            // Store the next packet for FEC.
            self.next_packet = Some(p.clone());
            self.handle_packet_loss();
            self.pending_loss = false;
        }

        if let Some(last) = &self.last_packet {
            if is_dtx || last.payload.len() == DTX_FRAME_LENGTH {
                let silence = p.header.timestamp.wrapping_sub(last.header.timestamp) as i32;
                if silence > 0 {
                    let buf = vec![0i16; silence as usize * self.target_channels];
                    if let Err(err) = self.w.write_sample(&buf) {
                        log::warn!("failed to write silence: {err}");
                    }
                }

                if is_dtx {
                    self.last_packet = Some(p);
                    return;
                }
            }
        }

        if let Err(err) = self.decode_and_write(&p.payload) {
            log::warn!("failed to decode packet: {err}");
        }

        self.last_packet = Some(p);
    }

    fn handle_packet_loss(&mut self) {
        if self.decoder.is_none() {
            return;
        }
        let Some(next) = self.next_packet.take() else {
            return;
        };
        let Some(last) = &self.last_packet else {
            return;
        };

        let lost_packets = i32::from(
            next.header
                .sequence_number
                .wrapping_sub(last.header.sequence_number) as i16,
        ) - 1;
        if lost_packets <= 0 {
            return;
        }

        let total_samples = next
            .header
            .timestamp
            .wrapping_sub(last.header.timestamp) as i32;
        if total_samples <= 0 {
            return;
        }

        let samples_per_packet = (total_samples / lost_packets) as usize;

        if lost_packets > 1 {
            // The buffer must cover the exact duration of the lost audio,
            // even if concealment right after generated silence is rough.
            let plc_samples = samples_per_packet * (lost_packets as usize - 1) * self.last_channels;
            let mut buf = vec![0i16; plc_samples];
            let Some(decoder) = self.decoder.as_mut() else {
                return;
            };
            if let Err(err) = decoder.conceal(&mut buf) {
                log::warn!("failed to recover lost packets with PLC: {err}");
                return;
            }
            let channels = self.last_channels;
            if let Err(err) = self.remix_and_write(&buf, channels) {
                log::warn!("failed to write PLC samples: {err}");
            }
        }

        // Match the decoder to the next packet before FEC, so its state
        // lines up with what follows.
        let channels = sample_channels(&next.payload);
        if let Err(err) = self.reset_decoder(channels) {
            log::warn!("failed to reset decoder for FEC: {err}");
            return;
        }

        let mut buf = vec![0i16; samples_per_packet * channels];
        let Some(decoder) = self.decoder.as_mut() else {
            return;
        };
        match decoder.decode(&next.payload, &mut buf, true) {
            Err(err) => {
                log::warn!("failed to recover last lost packet with FEC: {err}");
            }
            Ok(n) => {
                let written = &buf[..n * channels];
                if let Err(err) = self.remix_and_write(written, channels) {
                    log::warn!("failed to write FEC samples: {err}");
                }
            }
        }
        self.last_channels = channels;
    }

    fn decode_and_write(&mut self, payload: &Bytes) -> Result<()> {
        let channels = sample_channels(payload);
        self.reset_decoder(channels)?;

        let decoder = self
            .decoder
            .as_mut()
            .ok_or_else(|| Error::Decode("no decoder".to_string()))?;
        self.decode_buf.resize(MAX_FRAME_SAMPLES * channels, 0);
        let n = decoder.decode(payload, &mut self.decode_buf, false)?;
        let buf = std::mem::take(&mut self.decode_buf);
        let res = self.remix_and_write(&buf[..n * channels], channels);
        self.decode_buf = buf;
        self.last_channels = channels;
        res
    }

    // Recreates the decoder when the inbound channel layout changes.
    fn reset_decoder(&mut self, channels: usize) -> Result<()> {
        let needed = match &self.decoder {
            Some(d) => d.channels() != channels,
            None => true,
        };
        if needed {
            self.decoder = Some((self.factory)(channels)?);
        }
        Ok(())
    }

    // Converts `buf` from `channels` to the target layout and writes it.
    fn remix_and_write(&mut self, buf: &[i16], channels: usize) -> Result<()> {
        if channels == self.target_channels {
            return self.w.write_sample(buf);
        }
        match (channels, self.target_channels) {
            (1, 2) => {
                let mut out = Vec::with_capacity(buf.len() * 2);
                for &v in buf {
                    out.push(v);
                    out.push(v);
                }
                self.w.write_sample(&out)
            }
            (2, 1) => {
                let mut out = Vec::with_capacity(buf.len() / 2);
                for pair in buf.chunks_exact(2) {
                    out.push(((i32::from(pair[0]) + i32::from(pair[1])) / 2) as i16);
                }
                self.w.write_sample(&out)
            }
            _ => Err(Error::ErrUnsupportedChannels),
        }
    }
}

/// An Opus-aware RTP handler: a jitter buffer plus DTX silence synthesis
/// and PLC/FEC loss recovery in front of a PCM sink.
///
/// DSP failures are logged and swallowed; the only error surfaced through
/// [`Handler::handle_rtp`] is a failure to construct the decoder itself.
pub struct JitterHandler {
    buf: Buffer,
    core: Arc<Mutex<Core>>,
    err: Arc<Mutex<Option<Error>>>,
}

pub fn new_jitter_handler(
    w: Pcm16Writer,
    target_channels: usize,
    factory: DecoderFactory,
) -> JitterHandler {
    let err = Arc::new(Mutex::new(None));
    let decoder = match (factory)(target_channels) {
        Ok(d) => Some(d),
        Err(e) => {
            *err.lock().unwrap() = Some(e);
            None
        }
    };

    let core = Arc::new(Mutex::new(Core {
        w,
        factory,
        decoder,
        target_channels,
        last_channels: target_channels,
        last_packet: None,
        next_packet: None,
        pending_loss: false,
        decode_buf: Vec::new(),
    }));

    let sample_core = Arc::clone(&core);
    let loss_core = Arc::clone(&core);
    let buf = Buffer::new(
        Box::new(AudioDepacketizer),
        JITTER_MAX_LATENCY,
        Box::new(move |packets: Vec<Packet>| {
            let mut core = sample_core.lock().unwrap();
            for p in packets {
                core.handle_packet(p);
            }
        }),
    )
    .with_packet_loss_handler(Box::new(move || {
        loss_core.lock().unwrap().pending_loss = true;
    }));

    JitterHandler { buf, core, err }
}

impl fmt::Display for JitterHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.core.lock().unwrap();
        write!(f, "OpusJitter -> {}", core.w)
    }
}

impl Handler for JitterHandler {
    fn handle_rtp(&mut self, header: &Header, payload: &Bytes) -> Result<()> {
        self.buf.push(Packet {
            header: header.clone(),
            payload: payload.clone(),
        });
        if let Some(err) = self.err.lock().unwrap().take() {
            return Err(err);
        }
        Ok(())
    }
}

impl HandlerCloser for JitterHandler {
    fn close(&mut self) {
        self.buf.close();
        let mut core = self.core.lock().unwrap();
        if let Err(err) = core.w.close() {
            log::warn!("failed to close PCM sink: {err}");
        }
    }
}
