use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::*;
use crate::writer::{nop_closer, WriteCloser, Writer};

fn test_codec(name: &str, typ: u8, is_static: bool, disabled: bool) -> CodecRef {
    CodecRef::Audio(new_audio_codec(
        CodecInfo {
            sdp_name: name.to_string(),
            sample_rate: 8000,
            rtp_def_type: typ,
            rtp_is_static: is_static,
            disabled,
            ..Default::default()
        },
        |w| Box::new(PassThrough { w }) as FrameWriter,
        |w| Box::new(PcmToBytes { w }) as Pcm16Writer,
    ))
}

struct PassThrough {
    w: Pcm16Writer,
}

impl std::fmt::Display for PassThrough {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PassThrough -> {}", self.w)
    }
}

impl crate::writer::Writer<bytes::Bytes> for PassThrough {
    fn sample_rate(&self) -> u32 {
        self.w.sample_rate()
    }

    fn write_sample(&mut self, sample: &bytes::Bytes) -> crate::error::Result<()> {
        // Interpret each payload byte as one PCM sample.
        let pcm: Vec<i16> = sample.iter().map(|&b| i16::from(b)).collect();
        self.w.write_sample(&pcm)
    }
}

impl crate::writer::WriteCloser<bytes::Bytes> for PassThrough {
    fn close(&mut self) -> crate::error::Result<()> {
        self.w.close()
    }
}

struct PcmToBytes {
    w: FrameWriter,
}

impl std::fmt::Display for PcmToBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PcmToBytes -> {}", self.w)
    }
}

impl crate::writer::Writer<[i16]> for PcmToBytes {
    fn sample_rate(&self) -> u32 {
        self.w.sample_rate()
    }

    fn write_sample(&mut self, sample: &[i16]) -> crate::error::Result<()> {
        let bytes: Vec<u8> = sample.iter().map(|&v| v as u8).collect();
        self.w.write_sample(&bytes::Bytes::from(bytes))
    }
}

impl crate::writer::WriteCloser<[i16]> for PcmToBytes {
    fn close(&mut self) -> crate::error::Result<()> {
        self.w.close()
    }
}

#[test]
fn test_register_and_lookup() {
    register_codec(test_codec("TESTA/8000", 96, false, false));
    register_codec(test_codec("TESTB/8000", 9, true, false));

    let a = codec_by_name("TESTA/8000").expect("TESTA registered");
    assert_eq!(a.info().sdp_name, "TESTA/8000");
    assert!(a.as_audio().is_some());
    assert!(a.as_video().is_none());

    // Only statically typed codecs resolve by payload type.
    assert!(codec_by_payload_type(96).is_none() || {
        // Another test may have claimed 96; it must not be TESTA.
        codec_by_payload_type(96).unwrap().info().sdp_name != "TESTA/8000"
    });
    let b = codec_by_payload_type(9).expect("TESTB registered as static");
    assert_eq!(b.info().sdp_name, "TESTB/8000");
}

#[test]
fn test_register_overwrites_by_name() {
    register_codec(test_codec("TESTDUP/8000", 0, false, true));
    register_codec(test_codec("TESTDUP/8000", 0, false, false));
    let c = codec_by_name("TESTDUP/8000").unwrap();
    assert!(!c.info().disabled);
}

#[test]
fn test_enabled_codecs_filters_disabled() {
    register_codec(test_codec("TESTOFF/8000", 0, false, true));
    register_codec(test_codec("TESTON/8000", 0, false, false));

    let enabled: Vec<String> = enabled_codecs()
        .iter()
        .map(|c| c.info().sdp_name)
        .collect();
    assert!(enabled.contains(&"TESTON/8000".to_string()));
    assert!(!enabled.contains(&"TESTOFF/8000".to_string()));
    assert!(codecs()
        .iter()
        .any(|c| c.info().sdp_name == "TESTOFF/8000"));
}

#[test]
fn test_on_register_replays_and_observes() {
    register_codec(test_codec("TESTEARLY/8000", 0, false, false));

    let seen = Arc::new(AtomicUsize::new(0));
    let seen2 = Arc::clone(&seen);
    on_register(move |c| {
        let name = c.info().sdp_name;
        if name == "TESTEARLY/8000" || name == "TESTLATE/8000" {
            seen2.fetch_add(1, Ordering::SeqCst);
        }
    });
    // Already-registered codecs are replayed...
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    // ...and late registrations still fire.
    register_codec(test_codec("TESTLATE/8000", 0, false, false));
    assert_eq!(seen.load(Ordering::SeqCst), 2);
}

#[test]
fn test_clock_rate_defaults_to_sample_rate() {
    let c = new_audio_codec(
        CodecInfo {
            sdp_name: "TESTRATE/8000".to_string(),
            sample_rate: 8000,
            ..Default::default()
        },
        |w| Box::new(PassThrough { w }) as FrameWriter,
        |w| Box::new(PcmToBytes { w }) as Pcm16Writer,
    );
    assert_eq!(c.info().rtp_clock_rate, 8000);
}

#[test]
fn test_encode_rtp_chain() {
    use crate::rtp::{Buffer, SeqWriter};

    let c = test_codec("TESTCHAIN/8000", 0, false, false);
    let audio = c.as_audio().unwrap();

    let buf = Buffer::new();
    let w = SeqWriter::new(Box::new(buf.clone()));
    let stream = w.new_stream(0, 8000);

    let mut pcm = audio.encode_rtp(stream);
    pcm.write_sample(&[1, 2, 3]).unwrap();
    pcm.close().unwrap();

    let packets = buf.packets();
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].payload.as_ref(), &[1, 2, 3]);
}

#[test]
fn test_decode_rtp_chain() {
    use crate::rtp::Header;
    use crate::writer::Pcm16FrameWriter;

    let c = test_codec("TESTDEC/8000", 0, false, false);
    let audio = c.as_audio().unwrap();

    let sink = Pcm16FrameWriter::new(8000);
    let mut handler = audio.decode_rtp(Box::new(nop_closer(sink.clone())), 0);

    handler
        .handle_rtp(&Header::default(), &bytes::Bytes::from_static(&[5, 6]))
        .unwrap();
    assert_eq!(sink.frames(), vec![vec![5, 6]]);
}
