use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use super::*;
use crate::writer::Pcm16FrameWriter;

const FRAME_SAMPLES: usize = 960; // 20ms at 48kHz

// Scripted decoder: regular decodes yield 1s, FEC yields 3s, concealment
// yields 2s. FEC fills the whole requested duration; regular decode
// produces one frame.
struct ScriptedDecoder {
    channels: usize,
    fail: bool,
}

impl Decoder for ScriptedDecoder {
    fn channels(&self) -> usize {
        self.channels
    }

    fn decode(&mut self, _input: &[u8], output: &mut [i16], fec: bool) -> crate::error::Result<usize> {
        if self.fail {
            return Err(Error::Decode("scripted failure".to_string()));
        }
        if fec {
            output.fill(3);
            return Ok(output.len() / self.channels);
        }
        let n = FRAME_SAMPLES.min(output.len() / self.channels);
        output[..n * self.channels].fill(1);
        Ok(n)
    }

    fn conceal(&mut self, output: &mut [i16]) -> crate::error::Result<()> {
        if self.fail {
            return Err(Error::Decode("scripted failure".to_string()));
        }
        output.fill(2);
        Ok(())
    }
}

fn factory(created: Arc<AtomicUsize>) -> DecoderFactory {
    Box::new(move |channels| {
        created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedDecoder {
            channels,
            fail: false,
        }))
    })
}

fn packet_header(seq: u16, ts: u32) -> Header {
    Header {
        sequence_number: seq,
        timestamp: ts,
        ..Default::default()
    }
}

// Mono TOC byte (stereo bit unset) followed by fake compressed data.
fn voice_payload() -> Bytes {
    Bytes::from_static(&[0x00, 0xaa, 0xbb])
}

fn dtx_payload() -> Bytes {
    Bytes::from_static(&[0x00])
}

#[test]
fn test_decodes_in_order_packets() {
    let sink = Pcm16FrameWriter::new(48000);
    let mut h = new_jitter_handler(
        Box::new(sink.clone()),
        1,
        factory(Arc::new(AtomicUsize::new(0))),
    );

    for i in 0..3u16 {
        h.handle_rtp(
            &packet_header(i, u32::from(i) * FRAME_SAMPLES as u32),
            &voice_payload(),
        )
        .unwrap();
    }

    let frames = sink.frames();
    assert_eq!(frames.len(), 3);
    assert!(frames.iter().all(|f| f == &vec![1i16; FRAME_SAMPLES]));
}

#[test]
fn test_dtx_synthesizes_silence() {
    let sink = Pcm16FrameWriter::new(48000);
    let mut h = new_jitter_handler(
        Box::new(sink.clone()),
        1,
        factory(Arc::new(AtomicUsize::new(0))),
    );

    let step = FRAME_SAMPLES as u32;
    h.handle_rtp(&packet_header(0, 0), &voice_payload()).unwrap();
    // DTX packet: silence covers the timestamp advance, no decode.
    h.handle_rtp(&packet_header(1, step), &dtx_payload()).unwrap();
    // Voice resumes after DTX: the silent stretch is filled in.
    h.handle_rtp(&packet_header(2, 3 * step), &voice_payload())
        .unwrap();

    let frames = sink.frames();
    assert_eq!(frames.len(), 4);
    assert_eq!(frames[0], vec![1i16; FRAME_SAMPLES]);
    // Silence advances with the DTX packet's timestamp...
    assert_eq!(frames[1], vec![0i16; FRAME_SAMPLES]);
    // ...and covers the whole silent stretch when voice resumes.
    assert_eq!(frames[2], vec![0i16; 2 * FRAME_SAMPLES]);
    assert_eq!(frames[3], vec![1i16; FRAME_SAMPLES]);
}

#[test]
fn test_packet_loss_recovers_with_plc_and_fec() {
    let sink = Pcm16FrameWriter::new(48000);
    let mut h = new_jitter_handler(
        Box::new(sink.clone()),
        1,
        factory(Arc::new(AtomicUsize::new(0))),
    );

    let step = FRAME_SAMPLES as u32;
    h.handle_rtp(&packet_header(0, 0), &voice_payload()).unwrap();
    // Packets 1..3 are lost. Packet 4 arrives and waits out the reorder
    // window; packet 5 then triggers the loss handling.
    h.handle_rtp(&packet_header(4, 4 * step), &voice_payload())
        .unwrap();
    thread::sleep(std::time::Duration::from_millis(80));
    h.handle_rtp(&packet_header(5, 5 * step), &voice_payload())
        .unwrap();

    let all: Vec<i16> = sink.frames().concat();

    // Conservation: concealment plus FEC cover exactly the timestamp span
    // between the packets around the gap, split evenly over the losses.
    let spp = 4 * FRAME_SAMPLES / 3;
    let plc: usize = all.iter().filter(|&&v| v == 2).count();
    let fec: usize = all.iter().filter(|&&v| v == 3).count();
    assert_eq!(plc, 2 * spp);
    assert_eq!(fec, spp);
    assert_eq!(plc + fec, 4 * FRAME_SAMPLES);

    // Plus the three real packets.
    let voice: usize = all.iter().filter(|&&v| v == 1).count();
    assert_eq!(voice, 3 * FRAME_SAMPLES);
}

#[test]
fn test_decoder_construction_failure_is_buffered() {
    let sink = Pcm16FrameWriter::new(48000);
    let mut h = new_jitter_handler(
        Box::new(sink),
        1,
        Box::new(|_| Err(Error::Decode("no dsp".to_string()))),
    );

    // The constructor error surfaces on the next push, once.
    let res = h.handle_rtp(&packet_header(0, 0), &voice_payload());
    assert!(res.is_err());
}

#[test]
fn test_channel_switch_recreates_decoder() {
    let created = Arc::new(AtomicUsize::new(0));
    let sink = Pcm16FrameWriter::new(48000);
    let mut h = new_jitter_handler(Box::new(sink.clone()), 1, factory(Arc::clone(&created)));
    assert_eq!(created.load(Ordering::SeqCst), 1);

    let step = FRAME_SAMPLES as u32;
    h.handle_rtp(&packet_header(0, 0), &voice_payload()).unwrap();
    assert_eq!(created.load(Ordering::SeqCst), 1);

    // Stereo TOC bit set: the decoder is rebuilt for two channels and the
    // output is remixed down to the mono target.
    let stereo = Bytes::from_static(&[0x04, 0xcc, 0xdd]);
    h.handle_rtp(&packet_header(1, step), &stereo).unwrap();
    assert_eq!(created.load(Ordering::SeqCst), 2);

    let frames = sink.frames();
    assert_eq!(frames.len(), 2);
    // Stereo 1s average back to mono 1s at the target rate.
    assert_eq!(frames[1], vec![1i16; FRAME_SAMPLES]);
}
